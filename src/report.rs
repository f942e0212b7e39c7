use crate::errors::AppError;
use std::fs;
use std::path::{Path, PathBuf};

pub const REPORT_FILE: &str = "feedback_summary.md";
pub const PLACEHOLDER: &str = "_No summary generated._";

pub fn render(summary: Option<&str>) -> String {
    let lines = [
        "# Trainee Interview Feedback Summary",
        "",
        "## GPT Analysis",
        "",
        summary.filter(|s| !s.is_empty()).unwrap_or(PLACEHOLDER),
    ];
    lines.join("\n")
}

/// Writes the report, replacing any existing file, and returns its absolute path.
pub fn write_report(path: &Path, summary: Option<&str>) -> Result<PathBuf, AppError> {
    fs::write(path, render(summary))?;
    Ok(fs::canonicalize(path)?)
}
