//! Lexer for Serpent
//!
//! Converts source code into a stream of tokens. Indentation is turned into
//! explicit `Indent`/`Dedent` tokens; line breaks inside brackets and after a
//! backslash are joined.

use crate::frontend::token::{Token, TokenKind};
use crate::utils::{Error, Result, Span};

/// The lexer state
pub struct Lexer {
    /// Source code as characters
    source: Vec<char>,
    /// Current position in source
    pos: usize,
    /// Start position of current token
    start: usize,
    line: usize,
    col: usize,
    start_line: usize,
    start_col: usize,
    /// Open indentation levels, innermost last
    indent_stack: Vec<usize>,
    /// Nesting depth of (), [] and {}
    paren_depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    /// Create a new lexer for the given source code
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            start: 0,
            line: 1,
            col: 1,
            start_line: 1,
            start_col: 1,
            indent_stack: vec![0],
            paren_depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    /// Get the current character without advancing
    fn peek(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    /// Get the next character without advancing
    fn peek_next(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.source.get(self.pos + offset).copied()
    }

    /// Advance to the next character
    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    /// Consume `expected` if it is the current character
    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn mark_start(&mut self) {
        self.start = self.pos;
        self.start_line = self.line;
        self.start_col = self.col;
    }

    /// Create a span from start to current position
    fn make_span(&self) -> Span {
        Span::new(self.start, self.pos, self.start_line, self.start_col)
    }

    fn push(&mut self, kind: TokenKind) {
        let span = self.make_span();
        self.tokens.push(Token::new(kind, span));
    }

    /// Tokenize the entire source
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        loop {
            if self.at_line_start && self.paren_depth == 0 {
                self.handle_indentation()?;
            }
            self.skip_whitespace();
            self.mark_start();

            match self.peek() {
                None => break,
                Some('\n') => {
                    self.advance();
                    if self.paren_depth == 0 {
                        self.push(TokenKind::Newline);
                        self.at_line_start = true;
                    }
                }
                Some(c) => {
                    let kind = self.read_token(c)?;
                    self.push(kind);
                }
            }
        }

        self.mark_start();
        let needs_newline = matches!(
            self.tokens.last(),
            Some(tok) if !matches!(tok.kind, TokenKind::Newline | TokenKind::Dedent)
        );
        if needs_newline {
            self.push(TokenKind::Newline);
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push(TokenKind::Dedent);
        }
        self.push(TokenKind::Eof);
        Ok(std::mem::take(&mut self.tokens))
    }

    /// Measure the indentation of the next logical line and emit Indent/Dedent.
    /// Blank and comment-only lines are skipped entirely.
    fn handle_indentation(&mut self) -> Result<()> {
        loop {
            let mut indent = 0;
            while let Some(c) = self.peek() {
                match c {
                    ' ' => indent += 1,
                    '\t' => indent = (indent / 8 + 1) * 8,
                    '\x0c' => indent = 0,
                    _ => break,
                }
                self.advance();
            }

            match self.peek() {
                Some('\n') | Some('\r') => {
                    self.advance();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                None => {
                    self.at_line_start = false;
                    return Ok(());
                }
                Some(_) => {
                    self.at_line_start = false;
                    self.mark_start();
                    let current = self.indent_stack.last().copied().unwrap_or(0);
                    if indent > current {
                        self.indent_stack.push(indent);
                        self.push(TokenKind::Indent);
                    } else if indent < current {
                        while self.indent_stack.last().copied().unwrap_or(0) > indent {
                            self.indent_stack.pop();
                            self.push(TokenKind::Dedent);
                        }
                        if self.indent_stack.last().copied().unwrap_or(0) != indent {
                            return Err(Error::InconsistentDedent { span: self.make_span() });
                        }
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Skip whitespace, comments and backslash continuations
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' | '\x0c' => {
                    self.advance();
                }
                '#' => {
                    while let Some(next) = self.peek() {
                        if next == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                '\\' if self.peek_next() == Some('\n') => {
                    self.advance();
                    self.advance();
                }
                '\\' if self.peek_next() == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.advance();
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn read_token(&mut self, c: char) -> Result<TokenKind> {
        if c.is_alphabetic() || c == '_' {
            return self.read_identifier();
        }
        if c.is_ascii_digit() || (c == '.' && self.peek_next().is_some_and(|n| n.is_ascii_digit())) {
            return self.read_number();
        }
        if c == '"' || c == '\'' {
            return self.read_string("");
        }

        self.advance();
        let kind = match c {
            '+' => self.with_eq(TokenKind::PlusEq, TokenKind::Plus),
            '-' => {
                if self.eat('>') {
                    TokenKind::Arrow
                } else {
                    self.with_eq(TokenKind::MinusEq, TokenKind::Minus)
                }
            }
            '*' => {
                if self.eat('*') {
                    self.with_eq(TokenKind::DoubleStarEq, TokenKind::DoubleStar)
                } else {
                    self.with_eq(TokenKind::StarEq, TokenKind::Star)
                }
            }
            '/' => {
                if self.eat('/') {
                    self.with_eq(TokenKind::DoubleSlashEq, TokenKind::DoubleSlash)
                } else {
                    self.with_eq(TokenKind::SlashEq, TokenKind::Slash)
                }
            }
            '%' => self.with_eq(TokenKind::PercentEq, TokenKind::Percent),
            '@' => self.with_eq(TokenKind::AtEq, TokenKind::At),
            '&' => self.with_eq(TokenKind::AmpEq, TokenKind::Amp),
            '|' => self.with_eq(TokenKind::PipeEq, TokenKind::Pipe),
            '^' => self.with_eq(TokenKind::CaretEq, TokenKind::Caret),
            '~' => TokenKind::Tilde,
            '<' => {
                if self.eat('<') {
                    self.with_eq(TokenKind::ShlEq, TokenKind::Shl)
                } else {
                    self.with_eq(TokenKind::Le, TokenKind::Lt)
                }
            }
            '>' => {
                if self.eat('>') {
                    self.with_eq(TokenKind::ShrEq, TokenKind::Shr)
                } else {
                    self.with_eq(TokenKind::Ge, TokenKind::Gt)
                }
            }
            '=' => self.with_eq(TokenKind::EqEq, TokenKind::Eq),
            '!' if self.eat('=') => TokenKind::Ne,
            '(' => self.open(TokenKind::LParen),
            '[' => self.open(TokenKind::LBracket),
            '{' => self.open(TokenKind::LBrace),
            ')' => self.close(TokenKind::RParen),
            ']' => self.close(TokenKind::RBracket),
            '}' => self.close(TokenKind::RBrace),
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '.' => {
                if self.peek() == Some('.') && self.peek_next() == Some('.') {
                    self.advance();
                    self.advance();
                    TokenKind::Ellipsis
                } else {
                    TokenKind::Dot
                }
            }
            other => {
                return Err(Error::UnexpectedChar {
                    ch: other,
                    span: self.make_span(),
                })
            }
        };
        Ok(kind)
    }

    fn with_eq(&mut self, with: TokenKind, without: TokenKind) -> TokenKind {
        if self.eat('=') {
            with
        } else {
            without
        }
    }

    fn open(&mut self, kind: TokenKind) -> TokenKind {
        self.paren_depth += 1;
        kind
    }

    fn close(&mut self, kind: TokenKind) -> TokenKind {
        self.paren_depth = self.paren_depth.saturating_sub(1);
        kind
    }

    /// Read an identifier, keyword, or a prefixed string literal
    fn read_identifier(&mut self) -> Result<TokenKind> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if matches!(self.peek(), Some('"') | Some('\'')) && is_string_prefix(&text) {
            return self.read_string(&text.to_ascii_lowercase());
        }

        Ok(TokenKind::keyword_from_str(&text).unwrap_or(TokenKind::Ident(text)))
    }

    fn read_number(&mut self) -> Result<TokenKind> {
        let mut text = String::new();

        if self.peek() == Some('0') {
            let radix = match self.peek_next() {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance();
                self.advance();
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        if c != '_' {
                            text.push(c);
                        }
                        self.advance();
                    } else {
                        break;
                    }
                }
                let prefix = match radix {
                    16 => "0x",
                    8 => "0o",
                    _ => "0b",
                };
                return int_token(&text, radix, prefix).ok_or_else(|| Error::InvalidNumber {
                    text: self.source[self.start..self.pos].iter().collect(),
                    span: self.make_span(),
                });
            }
        }

        let mut is_float = false;
        self.read_digits(&mut text);
        if self.peek() == Some('.') && self.peek_next() != Some('.') {
            is_float = true;
            if text.is_empty() {
                text.push('0');
            }
            text.push('.');
            self.advance();
            self.read_digits(&mut text);
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let signed = matches!(self.peek_next(), Some('+') | Some('-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                self.advance();
                if signed {
                    if let Some(sign) = self.advance() {
                        text.push(sign);
                    }
                }
                self.read_digits(&mut text);
            }
        }

        let invalid = |lexer: &Self| Error::InvalidNumber {
            text: lexer.source[lexer.start..lexer.pos].iter().collect(),
            span: lexer.make_span(),
        };

        if self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
                self.advance();
            }
            return Err(invalid(self));
        }

        if is_float {
            text.parse::<f64>().map(TokenKind::Float).map_err(|_| invalid(self))
        } else {
            int_token(&text, 10, "").ok_or_else(|| invalid(self))
        }
    }

    fn read_digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else if c == '_' && self.peek_next().is_some_and(|n| n.is_ascii_digit()) {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Read a string or bytes literal; `prefix` is already consumed and lowercased
    fn read_string(&mut self, prefix: &str) -> Result<TokenKind> {
        let raw = prefix.contains('r');
        let bytes = prefix.contains('b');
        let quote = match self.advance() {
            Some(q) => q,
            None => return Err(Error::UnterminatedString { span: self.make_span() }),
        };
        let triple = self.peek() == Some(quote) && self.peek_next() == Some(quote);
        if triple {
            self.advance();
            self.advance();
        }

        let mut text = String::new();
        loop {
            let c = match self.peek() {
                Some(c) => c,
                None => return Err(Error::UnterminatedString { span: self.make_span() }),
            };
            if c == quote {
                if !triple {
                    self.advance();
                    break;
                }
                if self.peek_next() == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.advance();
                    self.advance();
                    self.advance();
                    break;
                }
            }
            if c == '\n' && !triple {
                return Err(Error::UnterminatedString { span: self.make_span() });
            }
            self.advance();
            if c != '\\' {
                text.push(c);
                continue;
            }

            let escaped = match self.advance() {
                Some(e) => e,
                None => return Err(Error::UnterminatedString { span: self.make_span() }),
            };
            if raw {
                text.push('\\');
                text.push(escaped);
                continue;
            }
            match escaped {
                '\n' => {}
                'n' => text.push('\n'),
                't' => text.push('\t'),
                'r' => text.push('\r'),
                '0' => text.push('\0'),
                'a' => text.push('\x07'),
                'b' => text.push('\x08'),
                'f' => text.push('\x0c'),
                'v' => text.push('\x0b'),
                '\\' => text.push('\\'),
                '\'' => text.push('\''),
                '"' => text.push('"'),
                'x' => {
                    let hex: String = [self.advance(), self.advance()].iter().flatten().collect();
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(ch) if hex.len() == 2 => text.push(ch),
                        _ => {
                            return Err(Error::InvalidSyntax {
                                message: format!("invalid \\x escape '{}'", hex),
                                span: self.make_span(),
                            })
                        }
                    }
                }
                other => {
                    text.push('\\');
                    text.push(other);
                }
            }
        }

        if bytes {
            Ok(TokenKind::Bytes(text.chars().map(|c| c as u32 as u8).collect()))
        } else {
            Ok(TokenKind::Str(text))
        }
    }
}

fn is_string_prefix(text: &str) -> bool {
    matches!(
        text.to_ascii_lowercase().as_str(),
        "r" | "b" | "f" | "u" | "rb" | "br" | "fr" | "rf"
    )
}

/// An integer literal; values past `i64` keep their digits
fn int_token(digits: &str, radix: u32, prefix: &str) -> Option<TokenKind> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let token = match i64::from_str_radix(digits, radix) {
        Ok(value) => TokenKind::Int(value),
        Err(_) => TokenKind::BigInt(format!("{}{}", prefix, digits.to_ascii_lowercase())),
    };
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .expect("lexing failed")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_indentation() {
        let source = "
def main():
    print(\"Hello\")
    if x:
        pass
    return 0
";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::Def,
                TokenKind::Ident("main".into()),
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Ident("print".into()),
                TokenKind::LParen,
                TokenKind::Str("Hello".into()),
                TokenKind::RParen,
                TokenKind::Newline,
                TokenKind::If,
                TokenKind::Ident("x".into()),
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Pass,
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Return,
                TokenKind::Int(0),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_brackets_join_lines() {
        let source = "x = [1,\n     2]  # trailing\ny = 1 + \\\n    2\n";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Eq,
                TokenKind::LBracket,
                TokenKind::Int(1),
                TokenKind::Comma,
                TokenKind::Int(2),
                TokenKind::RBracket,
                TokenKind::Newline,
                TokenKind::Ident("y".into()),
                TokenKind::Eq,
                TokenKind::Int(1),
                TokenKind::Plus,
                TokenKind::Int(2),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("0x1F 1_000 2.5 1e3 .5 0b101"),
            vec![
                TokenKind::Int(31),
                TokenKind::Int(1000),
                TokenKind::Float(2.5),
                TokenKind::Float(1000.0),
                TokenKind::Float(0.5),
                TokenKind::Int(5),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
        assert!(Lexer::new("12abc").tokenize().is_err());
    }

    #[test]
    fn test_integers_past_i64() {
        assert_eq!(
            kinds("99999999999999999999 0xFFFF_FFFF_FFFF_FFFF_F 9223372036854775807"),
            vec![
                TokenKind::BigInt("99999999999999999999".into()),
                TokenKind::BigInt("0xfffffffffffffffff".into()),
                TokenKind::Int(i64::MAX),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
        assert!(Lexer::new("0x").tokenize().is_err());
        assert!(Lexer::new("0b102").tokenize().is_err());
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            kinds(r#"'a\n' "b" r'\d' b'xy' """multi
line""""#),
            vec![
                TokenKind::Str("a\n".into()),
                TokenKind::Str("b".into()),
                TokenKind::Str("\\d".into()),
                TokenKind::Bytes(vec![b'x', b'y']),
                TokenKind::Str("multi\nline".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
        assert!(matches!(
            Lexer::new("x = 'open").tokenize(),
            Err(Error::UnterminatedString { .. })
        ));
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a //= b ** c -> d != e ... f"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::DoubleSlashEq,
                TokenKind::Ident("b".into()),
                TokenKind::DoubleStar,
                TokenKind::Ident("c".into()),
                TokenKind::Arrow,
                TokenKind::Ident("d".into()),
                TokenKind::Ne,
                TokenKind::Ident("e".into()),
                TokenKind::Ellipsis,
                TokenKind::Ident("f".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_inconsistent_dedent() {
        let source = "if x:\n        a = 1\n    b = 2\n";
        assert!(matches!(
            Lexer::new(source).tokenize(),
            Err(Error::InconsistentDedent { .. })
        ));
    }

    #[test]
    fn test_spans_track_lines() {
        let tokens = Lexer::new("a = 1\nbb = 2\n").tokenize().expect("lexing failed");
        let bb = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Ident("bb".into()))
            .expect("missing token");
        assert_eq!((bb.span.line, bb.span.col), (2, 1));
        assert_eq!(bb.span.len(), 2);
    }
}
