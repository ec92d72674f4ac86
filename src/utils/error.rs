//! Error handling for Serpent

use crate::utils::Span;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Compiler error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ==================== Lexer Errors ====================

    #[error("unexpected character '{ch}'")]
    UnexpectedChar { ch: char, span: Span },

    #[error("unterminated string literal")]
    UnterminatedString { span: Span },

    #[error("invalid number literal '{text}'")]
    InvalidNumber { text: String, span: Span },

    #[error("unindent does not match any outer indentation level")]
    InconsistentDedent { span: Span },

    // ==================== Parser Errors ====================

    #[error("expected {expected}, got {got}")]
    UnexpectedToken {
        expected: String,
        got: String,
        span: Span,
    },

    #[error("cannot assign to {what}")]
    InvalidTarget { what: String, span: Span },

    #[error("invalid syntax: {message}")]
    InvalidSyntax { message: String, span: Span },

    // ==================== Semantic Errors ====================

    #[error("name '{name}' is not defined")]
    UndefinedName { name: String, span: Span },

    #[error("{message}")]
    ScopeConflict { message: String, span: Span },

    #[error("{callee}() {message}")]
    ArityMismatch {
        callee: String,
        message: String,
        span: Span,
    },

    #[error("{callee}() {message}")]
    UnexpectedOrMissingKeyword {
        callee: String,
        message: String,
        span: Span,
    },

    #[error("{context}: expected {expected}, got {got}")]
    TypeMismatch {
        context: String,
        expected: String,
        got: String,
        span: Span,
    },

    #[error("'{owner}' has no attribute '{attr}'")]
    UnknownAttribute {
        owner: String,
        attr: String,
        span: Span,
    },

    #[error("{message}")]
    ExceptionTypeInvalid { message: String, span: Span },

    #[error("handler for '{handler}' is unreachable: '{earlier}' is caught first")]
    ExceptionHandlerShadowed {
        handler: String,
        earlier: String,
        span: Span,
    },

    #[error("use of '{name}' is rejected: dynamic evaluation is not allowed")]
    SecurityRejection { name: String, span: Span },

    #[error("unsupported construct: {construct}")]
    UnsupportedConstruct { construct: String, span: Span },

    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// Get the span associated with this error
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::UnexpectedChar { span, .. } => Some(*span),
            Self::UnterminatedString { span } => Some(*span),
            Self::InvalidNumber { span, .. } => Some(*span),
            Self::InconsistentDedent { span } => Some(*span),
            Self::UnexpectedToken { span, .. } => Some(*span),
            Self::InvalidTarget { span, .. } => Some(*span),
            Self::InvalidSyntax { span, .. } => Some(*span),
            Self::UndefinedName { span, .. } => Some(*span),
            Self::ScopeConflict { span, .. } => Some(*span),
            Self::ArityMismatch { span, .. } => Some(*span),
            Self::UnexpectedOrMissingKeyword { span, .. } => Some(*span),
            Self::TypeMismatch { span, .. } => Some(*span),
            Self::UnknownAttribute { span, .. } => Some(*span),
            Self::ExceptionTypeInvalid { span, .. } => Some(*span),
            Self::ExceptionHandlerShadowed { span, .. } => Some(*span),
            Self::SecurityRejection { span, .. } => Some(*span),
            Self::UnsupportedConstruct { span, .. } => Some(*span),
            Self::Io(_) => None,
        }
    }

    /// Whether the error comes from tokenizing or parsing rather than analysis
    pub fn is_syntax(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedChar { .. }
                | Self::UnterminatedString { .. }
                | Self::InvalidNumber { .. }
                | Self::InconsistentDedent { .. }
                | Self::UnexpectedToken { .. }
                | Self::InvalidTarget { .. }
                | Self::InvalidSyntax { .. }
        )
    }

    pub(crate) fn type_mismatch(
        context: impl Into<String>,
        expected: impl ToString,
        got: impl ToString,
        span: Span,
    ) -> Self {
        Self::TypeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            got: got.to_string(),
            span,
        }
    }

    pub(crate) fn unsupported(construct: impl Into<String>, span: Span) -> Self {
        Self::UnsupportedConstruct {
            construct: construct.into(),
            span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_and_spans() {
        let span = Span::new(4, 7, 1, 5);
        let err = Error::UndefinedName { name: "foo".into(), span };
        assert_eq!(err.to_string(), "name 'foo' is not defined");
        assert_eq!(err.span(), Some(span));
        assert!(!err.is_syntax());

        let err = Error::type_mismatch("operand of '+'", "int", "int | None", span);
        assert_eq!(err.to_string(), "operand of '+': expected int, got int | None");

        assert_eq!(Error::Io("gone".into()).span(), None);
    }
}
