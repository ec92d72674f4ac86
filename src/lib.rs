//! Serpent
//!
//! Flow-sensitive type and scope analysis for a statically checkable
//! Python subset.

pub mod frontend;
pub mod report;
pub mod semantic;
pub mod stdlib;
pub mod types;
pub mod utils;

pub use frontend::parse_source;
pub use report::{CheckReport, CheckStats};
pub use semantic::{check, check_with_options, CheckOptions, CheckOutcome, Diagnostic, DiagnosticKind};

use frontend::ast::{Module, Stmt, StmtKind};
use log::debug;
use std::time::Instant;

/// Parse and check source text, reporting syntax errors as diagnostics
pub fn check_source(source: &str, file: &str, options: &CheckOptions) -> CheckReport {
    let start = Instant::now();
    let mut stats = CheckStats {
        loc: source.lines().count(),
        ..CheckStats::default()
    };

    let mut module = match parse_source(source, file) {
        Ok(module) => module,
        Err(err) => {
            debug!("{}: front end failed: {}", file, err);
            stats.parse_time_ms = start.elapsed().as_millis() as u64;
            stats.total_time_ms = stats.parse_time_ms;
            return CheckReport::failure(file, vec![Diagnostic::from_error(&err, file)], stats);
        }
    };
    stats.parse_time_ms = start.elapsed().as_millis() as u64;

    let analysis = Instant::now();
    let outcome = check_with_options(&mut module, options);
    stats.check_time_ms = analysis.elapsed().as_millis() as u64;
    stats.total_time_ms = start.elapsed().as_millis() as u64;
    stats.function_count = count_functions(&module);

    CheckReport::from_outcome(file, &outcome, stats)
}

fn count_functions(module: &Module) -> usize {
    fn count(body: &[Stmt]) -> usize {
        body.iter()
            .map(|stmt| match &stmt.kind {
                StmtKind::FunctionDef(def) => 1 + count(&def.body),
                StmtKind::ClassDef(class) => count(&class.body),
                StmtKind::If { body, orelse, .. }
                | StmtKind::While { body, orelse, .. }
                | StmtKind::For { body, orelse, .. } => count(body) + count(orelse),
                StmtKind::Try(t) => {
                    count(&t.body)
                        + count(&t.orelse)
                        + count(&t.finalbody)
                        + t.handlers.iter().map(|h| count(&h.body)).sum::<usize>()
                }
                _ => 0,
            })
            .sum()
    }
    count(&module.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_check_source_reports_syntax_errors() {
        let report = check_source("def f(:\n", "bad.py", &CheckOptions::default());
        assert!(!report.success);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].kind(), DiagnosticKind::Syntax);
    }

    #[test]
    fn test_check_source_stats() {
        let source = "class C:\n    def m(self) -> int:\n        return 1\n\ndef f() -> None:\n    def g() -> None:\n        pass\n";
        let report = check_source(source, "ok.py", &CheckOptions::default());
        assert!(report.success);
        assert_eq!(report.stats.function_count, 3);
        assert_eq!(report.stats.loc, 7);
    }
}
