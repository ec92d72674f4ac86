//! Semantic analysis
//!
//! Flow-sensitive type and scope checking of a parsed module. The analyzer
//! annotates the tree in place and returns the diagnostics it found.

pub mod call_binder;
pub mod collect;
pub mod diagnostic;
pub mod effects;
pub mod env;
pub mod exceptions;
mod expr;
pub mod operators;
pub mod refine;
pub mod scope;
mod walker;

pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use walker::Walker;

use crate::frontend::ast::{FunctionFlags, Module};
use serde::Serialize;
use std::collections::BTreeMap;

/// Analyzer configuration
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// Require annotations on every parameter and return
    pub strict_annotations: bool,
}

impl CheckOptions {
    pub fn strict() -> Self {
        Self {
            strict_annotations: true,
        }
    }
}

/// Result of checking one module
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    /// True iff no diagnostics were reported
    pub ok: bool,
    pub diagnostics: Vec<Diagnostic>,
    /// Generator/coroutine flags keyed by qualified function name
    pub function_flags: BTreeMap<String, FunctionFlags>,
}

/// Check a module with the default options
pub fn check(module: &mut Module) -> CheckOutcome {
    check_with_options(module, &CheckOptions::default())
}

pub fn check_with_options(module: &mut Module, options: &CheckOptions) -> CheckOutcome {
    let file = module.file.clone();
    Walker::new(&file, options.clone()).run(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_source;
    use pretty_assertions::assert_eq;

    fn outcome(source: &str, options: &CheckOptions) -> CheckOutcome {
        let mut module = parse_source(source, "t.py").unwrap();
        check_with_options(&mut module, options)
    }

    #[test]
    fn test_strict_annotations() {
        let source = "def f(a, b: int):\n    return b\n";
        assert!(outcome(source, &CheckOptions::default()).ok);
        let strict = outcome(source, &CheckOptions::strict());
        let kinds: Vec<DiagnosticKind> = strict.diagnostics.iter().map(|d| d.kind()).collect();
        assert_eq!(
            kinds,
            vec![DiagnosticKind::UnsupportedConstruct, DiagnosticKind::UnsupportedConstruct]
        );
    }

    #[test]
    fn test_diagnostics_sorted_by_position() {
        let source = "def f() -> int:\n    return \"a\"\n\nprint(missing)\nx: int = \"b\"\n";
        let result = outcome(source, &CheckOptions::default());
        let lines: Vec<usize> = result.diagnostics.iter().map(|d| d.line()).collect();
        assert_eq!(lines, vec![2, 4, 5]);
        assert!(result.diagnostics.iter().all(|d| d.file() == "t.py"));
    }
}
