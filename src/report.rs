//! Structured check reports
//!
//! Machine-readable output of a check run:
//! - JSON reports with every diagnostic
//! - Check statistics
//! - Human-readable rendering with the offending source line

use crate::semantic::{CheckOutcome, Diagnostic};
use serde::Serialize;

/// Statistics of one check run
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckStats {
    /// Front-end time in milliseconds
    pub parse_time_ms: u64,

    /// Analyzer time in milliseconds
    pub check_time_ms: u64,

    pub total_time_ms: u64,

    /// Functions and methods, nested ones included
    pub function_count: usize,

    /// Lines of source
    pub loc: usize,
}

/// Complete result of checking one file
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub success: bool,

    pub source_file: String,

    /// All diagnostics, in source order
    pub diagnostics: Vec<Diagnostic>,

    pub stats: CheckStats,
}

impl CheckReport {
    /// Report for a file the analyzer ran on
    pub fn from_outcome(source_file: &str, outcome: &CheckOutcome, stats: CheckStats) -> Self {
        Self {
            success: outcome.ok,
            source_file: source_file.to_string(),
            diagnostics: outcome.diagnostics.clone(),
            stats,
        }
    }

    /// Report for a file that never reached the analyzer
    pub fn failure(source_file: &str, diagnostics: Vec<Diagnostic>, stats: CheckStats) -> Self {
        Self {
            success: false,
            source_file: source_file.to_string(),
            diagnostics,
            stats,
        }
    }

    /// Output as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Output as compact JSON (single line)
    pub fn to_json_compact(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Render `file:line:col: kind: message`, then the source line and a caret
pub fn render_diagnostic(diag: &Diagnostic, source: &str) -> String {
    let mut out = format!(
        "{}:{}:{}: {}: {}",
        diag.file(),
        diag.line(),
        diag.col(),
        diag.kind(),
        diag.message()
    );
    let line = diag
        .line()
        .checked_sub(1)
        .and_then(|index| source.lines().nth(index));
    if let Some(text) = line {
        let gutter = diag.line().to_string();
        let caret = " ".repeat(diag.col().saturating_sub(1));
        out.push_str(&format!("\n {} | {}", gutter, text));
        out.push_str(&format!("\n {} | {}^", " ".repeat(gutter.len()), caret));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{Error, Span};
    use pretty_assertions::assert_eq;

    fn undefined() -> Diagnostic {
        let err = Error::UndefinedName {
            name: "y".into(),
            span: Span::new(15, 16, 2, 10),
        };
        Diagnostic::from_error(&err, "m.py")
    }

    #[test]
    fn test_render_points_at_column() {
        let source = "x = 1\nprint(x, y)\n";
        let rendered = render_diagnostic(&undefined(), source);
        assert_eq!(
            rendered,
            "m.py:2:10: UndefinedName: name 'y' is not defined\n 2 | print(x, y)\n   |          ^"
        );
    }

    #[test]
    fn test_render_without_source_line() {
        let rendered = render_diagnostic(&undefined(), "");
        assert_eq!(rendered, "m.py:2:10: UndefinedName: name 'y' is not defined");
    }

    #[test]
    fn test_json_report() {
        let report = CheckReport::failure("m.py", vec![undefined()], CheckStats::default());
        let value: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(value["success"], serde_json::json!(false));
        assert_eq!(value["diagnostics"][0]["kind"], serde_json::json!("UndefinedName"));
        assert_eq!(value["diagnostics"][0]["line"], serde_json::json!(2));
        assert!(!report.to_json_compact().contains('\n'));
    }
}
