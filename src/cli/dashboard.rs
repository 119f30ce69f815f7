use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span, Text},
    widgets::{Axis, Bar, BarChart, BarGroup, Block, Borders, Chart, Dataset, GraphType, Paragraph, Wrap},
    Frame, Terminal,
};
use std::time::Duration;
use tracing::{debug, info};

use crate::dataset::TabularDataset;
use crate::filter::{FilterValue, AGE_ATTRIBUTE};
use crate::kpi::Kpi;
use crate::plotting::format_correlation;
use crate::session::{KpiPanel, Session};

/// Parental education levels offered by the `e` key, after "All"
pub const EDUCATION_LEVELS: [&str; 5] = ["High School", "Bachelor", "Master", "Postgraduate", "None"];

const GENDER_ATTRIBUTE: &str = "gender";
const EDUCATION_ATTRIBUTE: &str = "parental_education_level";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Filters changed; panels must be recomputed
    Recompute,
    Ignored,
    Quit,
}

/// Interactive 2×2 KPI dashboard over a session.
pub struct Dashboard {
    session: Session,
    panels: [KpiPanel; 4],
    gender_options: Vec<String>,
    /// `None` means "All"
    gender_index: Option<usize>,
    education_index: Option<usize>,
    age_bounds: (f64, f64),
    age_range: (f64, f64),
    status: String,
}

impl Dashboard {
    pub fn new(session: Session) -> Self {
        let gender_options = session.gender_options();
        let age_bounds = session.age_bounds();
        let panels = session.compute_dashboard();
        Self {
            session,
            panels,
            gender_options,
            gender_index: None,
            education_index: None,
            age_bounds,
            age_range: age_bounds,
            status: "Ready".to_string(),
        }
    }

    /// Run until the user quits, then hand the session back
    pub fn run(mut self) -> Result<Session> {
        enable_raw_mode()?;
        let mut stdout = std::io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_app(&mut terminal);

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
        terminal.show_cursor()?;
        info!("🏁 Dashboard closed");

        result.map(|_| self.session)
    }

    fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        loop {
            terminal.draw(|f| self.ui(f))?;

            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match self.handle_key(key.code) {
                        KeyOutcome::Quit => return Ok(()),
                        KeyOutcome::Recompute => self.recompute(),
                        KeyOutcome::Ignored => {}
                    }
                }
            }
        }
    }

    /// Apply a key press to the filter state
    pub fn handle_key(&mut self, code: KeyCode) -> KeyOutcome {
        let (lo_bound, hi_bound) = self.age_bounds;
        let (lo, hi) = self.age_range;

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return KeyOutcome::Quit,
            KeyCode::Char('r') => return KeyOutcome::Recompute,
            KeyCode::Char('g') => {
                self.gender_index = cycle(self.gender_index, self.gender_options.len());
                let value = self.gender_index.map(|i| self.gender_options[i].clone());
                self.apply_choice(GENDER_ATTRIBUTE, value);
            }
            KeyCode::Char('e') => {
                self.education_index = cycle(self.education_index, EDUCATION_LEVELS.len());
                let value = self.education_index.map(|i| EDUCATION_LEVELS[i].to_string());
                self.apply_choice(EDUCATION_ATTRIBUTE, value);
            }
            KeyCode::Char('a') => self.set_age_range((lo + 1.0).min(hi), hi),
            KeyCode::Char('A') => self.set_age_range((lo - 1.0).max(lo_bound), hi),
            KeyCode::Char('z') => self.set_age_range(lo, (hi + 1.0).min(hi_bound)),
            KeyCode::Char('Z') => self.set_age_range(lo, (hi - 1.0).max(lo)),
            KeyCode::Char('c') => {
                self.session.clear_filters();
                self.gender_index = None;
                self.education_index = None;
                self.age_range = self.age_bounds;
                self.status = "Filters cleared".to_string();
            }
            _ => return KeyOutcome::Ignored,
        }
        KeyOutcome::Recompute
    }

    fn apply_choice(&mut self, attribute: &str, value: Option<String>) {
        match value {
            Some(v) => {
                self.status = format!("{} = {}", attribute, v);
                // Scalar filters are always valid
                let _ = self.session.set_filter(attribute, FilterValue::Scalar(v.into()));
            }
            None => {
                self.status = format!("{} = All", attribute);
                self.session.remove_filter(attribute);
            }
        }
    }

    fn set_age_range(&mut self, lo: f64, hi: f64) {
        self.age_range = (lo, hi);
        if self.age_range == self.age_bounds {
            self.session.remove_filter(AGE_ATTRIBUTE);
        } else if let Err(e) = self.session.set_filter(AGE_ATTRIBUTE, FilterValue::Range(lo, hi)) {
            self.status = e.to_string();
            return;
        }
        self.status = format!("age {:.0}-{:.0}", lo, hi);
    }

    pub fn recompute(&mut self) {
        debug!("Recomputing dashboard with {} filters", self.session.filters().len());
        self.panels = self.session.compute_dashboard();
    }

    fn ui(&self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(4), Constraint::Min(0), Constraint::Length(1)])
            .split(f.area());

        self.render_header(f, chunks[0]);

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(chunks[1]);
        for (row_index, row) in rows.iter().enumerate() {
            let cells = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(*row);
            for (col_index, cell) in cells.iter().enumerate() {
                self.render_panel(f, *cell, &self.panels[row_index * 2 + col_index]);
            }
        }

        let help = "g: gender  e: education  a/A: min age ±  z/Z: max age ±  c: clear  r: refresh  q/Esc: quit";
        let status = Paragraph::new(help).style(Style::default().bg(Color::DarkGray).fg(Color::White));
        f.render_widget(status, chunks[2]);
    }

    fn render_header(&self, f: &mut Frame, area: Rect) {
        let tables: Vec<String> = self.session.loaded_tables().into_iter().collect();
        let tables = if tables.is_empty() {
            "none (use --habits / --factors)".to_string()
        } else {
            tables.join(", ")
        };

        let gender = self.gender_index.map_or("All", |i| self.gender_options[i].as_str());
        let education = self.education_index.map_or("All", |i| EDUCATION_LEVELS[i]);

        let lines = vec![
            Line::from(vec![
                Span::styled("Session: ", Style::default().fg(Color::Cyan)),
                Span::raw(self.session.id().to_string()),
                Span::styled("  Tables: ", Style::default().fg(Color::Cyan)),
                Span::raw(tables),
            ]),
            Line::from(vec![
                Span::styled("Gender: ", Style::default().fg(Color::Yellow)),
                Span::raw(gender),
                Span::styled("  Education: ", Style::default().fg(Color::Yellow)),
                Span::raw(education),
                Span::styled("  Age: ", Style::default().fg(Color::Yellow)),
                Span::raw(format!("{:.0}-{:.0}", self.age_range.0, self.age_range.1)),
                Span::styled("  │ ", Style::default().fg(Color::Gray)),
                Span::raw(self.status.as_str()),
            ]),
        ];

        let header = Paragraph::new(Text::from(lines)).block(
            Block::default().borders(Borders::ALL).title(Span::styled(
                " 🎓 Student Performance Dashboard ",
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            )),
        );
        f.render_widget(header, area);
    }

    fn render_panel(&self, f: &mut Frame, area: Rect, panel: &KpiPanel) {
        let title = format!(" KPI {}: {} ", panel.kpi.number(), panel.kpi.title());
        match &panel.result {
            Err(message) => render_message(f, area, &title, "❌ KPI FAILED", message, Color::Red),
            Ok(data) if data.is_empty() => {
                render_message(f, area, &title, "📊 No data available", "Load a dataset or relax filters", Color::Blue)
            }
            Ok(data) => match panel.kpi {
                Kpi::ScoresByGroup => render_bars(f, area, &title, data, "group"),
                Kpi::AttendanceImpact => render_bars(f, area, &title, data, "attendance_range"),
                Kpi::StudyCorrelation | Kpi::SleepPerformance => render_scatter(f, area, &title, panel, data),
            },
        }
    }
}

/// Next option index, wrapping back to "All" after the last option
fn cycle(current: Option<usize>, len: usize) -> Option<usize> {
    match current {
        None if len > 0 => Some(0),
        Some(i) if i + 1 < len => Some(i + 1),
        _ => None,
    }
}

fn panel_block(title: &str, color: Color) -> Block<'_> {
    Block::default().borders(Borders::ALL).title(Span::styled(
        title,
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    ))
}

fn render_message(f: &mut Frame, area: Rect, title: &str, headline: &str, detail: &str, color: Color) {
    let text = vec![
        Line::from(""),
        Line::from(Span::styled(
            headline.to_string(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(Span::styled(detail.to_string(), Style::default().fg(Color::Gray))),
    ];
    let paragraph = Paragraph::new(Text::from(text))
        .block(panel_block(title, color))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
    f.render_widget(paragraph, area);
}

fn render_bars(f: &mut Frame, area: Rect, title: &str, data: &TabularDataset, label_col: &str) {
    let bars: Vec<Bar> = (0..data.row_count())
        .filter_map(|i| {
            let score = data.value(i, "average_score")?.as_f64()?;
            let label = data.value(i, label_col).map(|v| v.to_string()).unwrap_or_default();
            Some(
                Bar::default()
                    .value(score.round().max(0.0) as u64)
                    .text_value(format!("{:.1}", score))
                    .label(Line::from(label)),
            )
        })
        .collect();

    let chart = BarChart::default()
        .block(panel_block(title, Color::Green))
        .data(BarGroup::default().bars(&bars))
        .bar_width(7)
        .bar_gap(1)
        .bar_style(Style::default().fg(Color::Cyan))
        .value_style(Style::default().fg(Color::Black).bg(Color::Cyan));
    f.render_widget(chart, area);
}

fn render_scatter(f: &mut Frame, area: Rect, title: &str, panel: &KpiPanel, data: &TabularDataset) {
    let cols = panel.kpi.output_columns();
    let points = data.numeric_pairs(cols[0], cols[1]);

    let (x_min, x_max) = bounds(points.iter().map(|p| p.0));
    let (y_min, y_max) = bounds(points.iter().map(|p| p.1));

    let r_label = panel.correlation().map(format_correlation).unwrap_or_default();
    let datasets = vec![Dataset::default()
        .name(r_label)
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Scatter)
        .style(Style::default().fg(Color::Cyan))
        .data(&points)];

    let chart = Chart::new(datasets)
        .block(panel_block(title, Color::Green))
        .x_axis(
            Axis::default()
                .title(cols[0])
                .style(Style::default().fg(Color::Gray))
                .labels(axis_labels(x_min, x_max))
                .bounds([x_min, x_max]),
        )
        .y_axis(
            Axis::default()
                .title(cols[1])
                .style(Style::default().fg(Color::Gray))
                .labels(axis_labels(y_min, y_max))
                .bounds([y_min, y_max]),
        );
    f.render_widget(chart, area);
}

/// Axis bounds with 10% padding; constant data gets a unit of padding
fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !min.is_finite() {
        return (0.0, 1.0);
    }
    let range = max - min;
    let padding = if range > 0.0 { range * 0.1 } else { 1.0 };
    (min - padding, max + padding)
}

fn axis_labels(min: f64, max: f64) -> Vec<Span<'static>> {
    vec![
        Span::raw(format!("{:.1}", min)),
        Span::raw(format!("{:.1}", (min + max) / 2.0)),
        Span::raw(format!("{:.1}", max)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::ImportMode;
    use crate::session::DatasetKind;

    const HABITS_CSV: &[u8] = b"gender,age,parental_education_level,study_hours_per_day,attendance_percentage,sleep_hours,exam_score\n\
        Male,18,Master,5.0,85.0,7.0,85.0\n\
        Female,22,Bachelor,6.0,90.0,8.0,90.0\n\
        Other,20,High School,4.0,74.0,6.0,78.0\n";

    fn dashboard() -> Dashboard {
        let mut session = Session::start(AppConfig::default()).unwrap();
        session.upload(DatasetKind::Habits, HABITS_CSV, ImportMode::Replace).unwrap();
        Dashboard::new(session)
    }

    #[test]
    fn test_cycle_wraps_to_all() {
        assert_eq!(cycle(None, 2), Some(0));
        assert_eq!(cycle(Some(0), 2), Some(1));
        assert_eq!(cycle(Some(1), 2), None);
        assert_eq!(cycle(None, 0), None);
    }

    #[test]
    fn test_initial_state_uses_loaded_data() {
        let dash = dashboard();
        assert_eq!(dash.gender_options, vec!["Female", "Male", "Other"]);
        assert_eq!(dash.age_bounds, (18.0, 22.0));
        assert!(dash.session.filters().is_empty());
        assert_eq!(dash.panels[0].result.as_ref().unwrap().row_count(), 3);
    }

    #[test]
    fn test_gender_key_sets_and_clears_filter() {
        let mut dash = dashboard();
        assert_eq!(dash.handle_key(KeyCode::Char('g')), KeyOutcome::Recompute);
        assert_eq!(
            dash.session.filters().get("gender"),
            Some(&FilterValue::Scalar("Female".into()))
        );

        dash.recompute();
        assert_eq!(dash.panels[0].result.as_ref().unwrap().row_count(), 1);

        for _ in 0..3 {
            dash.handle_key(KeyCode::Char('g'));
        }
        assert!(dash.session.filters().get("gender").is_none());
    }

    #[test]
    fn test_education_key_cycles_levels() {
        let mut dash = dashboard();
        dash.handle_key(KeyCode::Char('e'));
        dash.handle_key(KeyCode::Char('e'));
        assert_eq!(
            dash.session.filters().get(EDUCATION_ATTRIBUTE),
            Some(&FilterValue::Scalar("Bachelor".into()))
        );
    }

    #[test]
    fn test_age_keys_stay_within_bounds() {
        let mut dash = dashboard();
        dash.handle_key(KeyCode::Char('A'));
        assert!(dash.session.filters().get(AGE_ATTRIBUTE).is_none());

        dash.handle_key(KeyCode::Char('a'));
        dash.handle_key(KeyCode::Char('Z'));
        assert_eq!(
            dash.session.filters().get(AGE_ATTRIBUTE),
            Some(&FilterValue::Range(19.0, 21.0))
        );

        for _ in 0..5 {
            dash.handle_key(KeyCode::Char('a'));
        }
        assert_eq!(dash.age_range, (21.0, 21.0));

        dash.recompute();
        assert_eq!(dash.panels[0].result.as_ref().unwrap().row_count(), 0);
    }

    #[test]
    fn test_clear_and_quit() {
        let mut dash = dashboard();
        dash.handle_key(KeyCode::Char('g'));
        dash.handle_key(KeyCode::Char('a'));
        dash.handle_key(KeyCode::Char('c'));
        assert!(dash.session.filters().is_empty());
        assert_eq!(dash.age_range, dash.age_bounds);

        assert_eq!(dash.handle_key(KeyCode::Char('x')), KeyOutcome::Ignored);
        assert_eq!(dash.handle_key(KeyCode::Esc), KeyOutcome::Quit);
        assert_eq!(dash.handle_key(KeyCode::Char('q')), KeyOutcome::Quit);
    }

    #[test]
    fn test_bounds_padding() {
        assert_eq!(bounds([5.0, 5.0].into_iter()), (4.0, 6.0));
        assert_eq!(bounds(std::iter::empty()), (0.0, 1.0));
        let (lo, hi) = bounds([0.0, 10.0].into_iter());
        assert!((lo + 1.0).abs() < 1e-9 && (hi - 11.0).abs() < 1e-9);
    }
}
