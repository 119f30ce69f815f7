pub mod commands;
pub mod dashboard;
