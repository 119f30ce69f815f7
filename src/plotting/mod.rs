use textplots::{Chart, Plot, Shape};

use crate::config::ChartConfig;
use crate::dataset::TabularDataset;
use crate::kpi::{Kpi, KpiAggregator};
use crate::session::KpiPanel;

/// Longest bar drawn for the top value
const BAR_WIDTH: usize = 40;
/// textplots refuses narrower canvases
const MIN_CHART_WIDTH: u32 = 32;
const MIN_CHART_HEIGHT: u32 = 3;

/// ASCII rendering of KPI results
pub struct KpiChartRenderer {
    width: u32,
    height: u32,
}

impl KpiChartRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(MIN_CHART_WIDTH),
            height: height.max(MIN_CHART_HEIGHT),
        }
    }

    /// Configured size, with unset dimensions taken from the terminal
    pub fn from_config(config: &ChartConfig) -> Self {
        let (term_width, term_height) = Self::get_optimal_dimensions();
        Self::new(
            config.width.unwrap_or(term_width as u32),
            config.height.unwrap_or(term_height as u32),
        )
    }

    /// Get appropriate plot dimensions based on terminal size
    pub fn get_optimal_dimensions() -> (usize, usize) {
        match crossterm::terminal::size() {
            Ok((cols, rows)) => {
                let width = (cols as usize).clamp(60, 120);
                let height = (rows as usize / 3).clamp(10, 30);
                (width, height)
            }
            Err(_) => (80, 20),
        }
    }

    /// Render a dashboard panel, including its error if the KPI failed
    pub fn render_panel(&self, panel: &KpiPanel) -> String {
        match &panel.result {
            Ok(data) => self.render(panel.kpi, data),
            Err(message) => format!("{}\n❌ {}", Self::title(panel.kpi), message),
        }
    }

    pub fn render(&self, kpi: Kpi, data: &TabularDataset) -> String {
        let mut output = Self::title(kpi);
        output.push('\n');
        output.push_str(&"─".repeat(self.width as usize));
        output.push('\n');

        if data.is_empty() {
            output.push_str("📊 No data available");
            return output;
        }

        let body = match kpi {
            Kpi::ScoresByGroup => Self::render_bars(data, "group", "average_score", "Exam score"),
            Kpi::AttendanceImpact => Self::render_bars(data, "attendance_range", "average_score", "Attendance %"),
            Kpi::StudyCorrelation | Kpi::SleepPerformance => self.render_scatter(kpi, data),
        };
        output.push_str(&body);
        output
    }

    fn title(kpi: Kpi) -> String {
        format!("📊 KPI {}: {}", kpi.number(), kpi.title())
    }

    /// Horizontal bars scaled to the largest value, with value and row count
    fn render_bars(data: &TabularDataset, label_col: &str, value_col: &str, axis: &str) -> String {
        let rows: Vec<(String, f64, String)> = (0..data.row_count())
            .filter_map(|i| {
                let value = data.value(i, value_col)?.as_f64()?;
                let label = data.value(i, label_col).map(|v| v.to_string()).unwrap_or_default();
                let count = data.value(i, "count").map(|v| v.to_string()).unwrap_or_default();
                Some((label, value, count))
            })
            .collect();

        let max_value = rows.iter().map(|(_, v, _)| *v).fold(0.0_f64, f64::max);
        let label_width = rows.iter().map(|(l, _, _)| l.chars().count()).max().unwrap_or(0);

        let mut output = format!("{}\n", axis);
        for (label, value, count) in &rows {
            let bar_length = if max_value > 0.0 {
                ((value / max_value) * BAR_WIDTH as f64).round() as usize
            } else {
                0
            };
            output.push_str(&format!(
                "  {:>width$} │ {} {:.1} (n={})\n",
                label,
                "█".repeat(bar_length),
                value,
                count,
                width = label_width
            ));
        }
        output
    }

    fn render_scatter(&self, kpi: Kpi, data: &TabularDataset) -> String {
        let cols = kpi.output_columns();
        let points: Vec<(f32, f32)> = data
            .numeric_pairs(cols[0], cols[1])
            .into_iter()
            .map(|(x, y)| (x as f32, y as f32))
            .collect();
        if points.is_empty() {
            return "📊 No data available".to_string();
        }

        let (x_min, x_max) = padded_range(points.iter().map(|p| p.0));
        let (y_min, y_max) = padded_range(points.iter().map(|p| p.1));

        let chart = Chart::new_with_y_range(self.width, self.height, x_min, x_max, y_min, y_max)
            .lineplot(&Shape::Points(&points))
            .to_string();

        let mut output = chart;
        output.push('\n');
        output.push_str(&format!("x: {} | y: {} | {} points\n", cols[0], cols[1], points.len()));
        if let Some(r) = KpiAggregator::correlation(kpi, data) {
            output.push_str(&format!("📈 {}\n", format_correlation(r)));
        }
        output
    }
}

impl Default for KpiChartRenderer {
    fn default() -> Self {
        Self::new(80, 20)
    }
}

/// Min/max of the values, widened by one unit when they coincide
fn padded_range(values: impl Iterator<Item = f32>) -> (f32, f32) {
    let (min, max) = values.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if max > min {
        (min, max)
    } else {
        (min - 1.0, max + 1.0)
    }
}

/// `r = 0.87`, or a note when the coefficient is undefined
pub fn format_correlation(r: f64) -> String {
    if r.is_nan() {
        "r = n/a (no variance)".to_string()
    } else {
        format!("r = {:.2}", r)
    }
}
