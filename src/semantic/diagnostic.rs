//! Diagnostics reported by the analyzer

use crate::utils::Error;
use serde::Serialize;
use std::fmt;

/// Category of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticKind {
    UndefinedName,
    ScopeConflict,
    ArityMismatch,
    UnexpectedOrMissingKeyword,
    TypeMismatch,
    UnknownAttribute,
    ExceptionTypeInvalid,
    ExceptionHandlerShadowed,
    SecurityRejection,
    UnsupportedConstruct,
    /// Lexer or parser failure surfaced by the driver
    Syntax,
    Io,
}

impl DiagnosticKind {
    /// Classify an error
    pub fn of(error: &Error) -> Self {
        match error {
            Error::UndefinedName { .. } => Self::UndefinedName,
            Error::ScopeConflict { .. } => Self::ScopeConflict,
            Error::ArityMismatch { .. } => Self::ArityMismatch,
            Error::UnexpectedOrMissingKeyword { .. } => Self::UnexpectedOrMissingKeyword,
            Error::TypeMismatch { .. } => Self::TypeMismatch,
            Error::UnknownAttribute { .. } => Self::UnknownAttribute,
            Error::ExceptionTypeInvalid { .. } => Self::ExceptionTypeInvalid,
            Error::ExceptionHandlerShadowed { .. } => Self::ExceptionHandlerShadowed,
            Error::SecurityRejection { .. } => Self::SecurityRejection,
            Error::UnsupportedConstruct { .. } => Self::UnsupportedConstruct,
            Error::Io(_) => Self::Io,
            Error::UnexpectedChar { .. }
            | Error::UnterminatedString { .. }
            | Error::InvalidNumber { .. }
            | Error::InconsistentDedent { .. }
            | Error::UnexpectedToken { .. }
            | Error::InvalidTarget { .. }
            | Error::InvalidSyntax { .. } => Self::Syntax,
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A located, immutable analysis message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    kind: DiagnosticKind,
    message: String,
    file: String,
    line: usize,
    col: usize,
}

impl Diagnostic {
    pub fn from_error(error: &Error, file: &str) -> Self {
        let (line, col) = error.span().map(|s| (s.line, s.col)).unwrap_or((0, 0));
        Self {
            kind: DiagnosticKind::of(error),
            message: error.to_string(),
            file: file.to_string(),
            line,
            col,
        }
    }

    pub fn kind(&self) -> DiagnosticKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn col(&self) -> usize {
        self.col
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.file, self.line, self.col, self.kind, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Span;

    #[test]
    fn test_from_error() {
        let err = Error::SecurityRejection {
            name: "eval".into(),
            span: Span::new(10, 14, 3, 5),
        };
        let diag = Diagnostic::from_error(&err, "main.py");
        assert_eq!(diag.kind(), DiagnosticKind::SecurityRejection);
        assert_eq!((diag.line(), diag.col()), (3, 5));
        assert_eq!(
            diag.to_string(),
            "main.py:3:5: SecurityRejection: use of 'eval' is rejected: dynamic evaluation is not allowed"
        );
    }

    #[test]
    fn test_syntax_errors_classified() {
        let err = Error::UnterminatedString { span: Span::dummy() };
        assert_eq!(DiagnosticKind::of(&err), DiagnosticKind::Syntax);
    }
}
