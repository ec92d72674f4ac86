//! Source location tracking

use serde::Serialize;

/// A span represents a range in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    /// Start byte offset
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
    /// 1-based line of the start offset
    pub line: usize,
    /// 1-based column of the start offset
    pub col: usize,
}

impl Span {
    /// Create a new span
    pub fn new(start: usize, end: usize, line: usize, col: usize) -> Self {
        Self { start, end, line, col }
    }

    /// Create a dummy span (for testing)
    pub fn dummy() -> Self {
        Self { start: 0, end: 0, line: 1, col: 1 }
    }

    /// Merge two spans. The result starts where the earlier span starts.
    pub fn merge(&self, other: &Span) -> Span {
        let (line, col) = if other.start < self.start {
            (other.line, other.col)
        } else {
            (self.line, self.col)
        };
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line,
            col,
        }
    }

    /// Get the length of the span
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Check if the span is empty
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::dummy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_earliest_position() {
        let a = Span::new(10, 14, 2, 5);
        let b = Span::new(3, 6, 1, 4);
        let merged = a.merge(&b);
        assert_eq!(merged.start, 3);
        assert_eq!(merged.end, 14);
        assert_eq!((merged.line, merged.col), (1, 4));
        assert_eq!(merged.len(), 11);
    }
}
