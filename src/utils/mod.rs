//! Shared plumbing: source spans and the analyzer error type

mod error;
mod span;

pub use error::{Error, Result};
pub use span::Span;
