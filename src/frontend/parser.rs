//! Parser for Serpent
//!
//! Recursive descent parser with Pratt parsing for binary operators.

use crate::frontend::ast::*;
use crate::frontend::token::{Token, TokenKind};
use crate::utils::{Error, Result, Span};

/// The parser
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    eof: Token,
}

impl Parser {
    /// Create a parser from pre-tokenized input
    pub fn new(tokens: Vec<Token>) -> Self {
        let end = tokens.last().map(|t| t.span).unwrap_or_default();
        Self {
            tokens,
            pos: 0,
            eof: Token::eof(end),
        }
    }

    // ==================== Helper Methods ====================

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    fn current_kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.pos + 1)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.current_kind()) == std::mem::discriminant(kind)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_kind(), TokenKind::Eof)
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token> {
        if self.check(&expected) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected.to_string()))
        }
    }

    fn consume(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: impl Into<String>) -> Error {
        Error::UnexpectedToken {
            expected: expected.into(),
            got: self.current_kind().to_string(),
            span: self.current().span,
        }
    }

    fn invalid(&self, message: impl Into<String>, span: Span) -> Error {
        Error::InvalidSyntax {
            message: message.into(),
            span,
        }
    }

    fn prev_span(&self) -> Span {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map(|t| t.span)
            .unwrap_or_default()
    }

    /// Span from `start` to the end of the last consumed token
    fn span_from(&self, start: Span) -> Span {
        start.merge(&self.prev_span())
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.current_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.current_kind(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
        )
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.current_kind(),
            TokenKind::Ident(_)
                | TokenKind::Int(_)
                | TokenKind::BigInt(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::Bytes(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::None
                | TokenKind::Ellipsis
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Minus
                | TokenKind::Plus
                | TokenKind::Tilde
                | TokenKind::Not
                | TokenKind::Lambda
                | TokenKind::Await
                | TokenKind::Star
                | TokenKind::Yield
        )
    }

    // ==================== Statements ====================

    /// Parse a complete module
    pub fn parse_module(&mut self, file: &str) -> Result<Module> {
        let mut body = Vec::new();
        while !self.is_at_end() {
            if self.consume(&TokenKind::Newline) {
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Module {
            file: file.to_string(),
            body,
        })
    }

    /// Parse one logical line; simple statements separated by `;` yield several
    fn parse_statement(&mut self) -> Result<Vec<Stmt>> {
        let stmt = match self.current_kind() {
            TokenKind::Def => self.parse_function_def(Vec::new(), false)?,
            TokenKind::Async => self.parse_async()?,
            TokenKind::Class => self.parse_class_def(Vec::new())?,
            TokenKind::At => self.parse_decorated()?,
            TokenKind::If => self.parse_if()?,
            TokenKind::While => self.parse_while()?,
            TokenKind::For => self.parse_for()?,
            TokenKind::Try => self.parse_try()?,
            TokenKind::With => {
                return Err(self.invalid("'with' statements are not supported", self.current().span))
            }
            TokenKind::Indent => return Err(self.invalid("unexpected indent", self.current().span)),
            _ => return self.parse_simple_statements(),
        };
        Ok(vec![stmt])
    }

    fn parse_simple_statements(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = vec![self.parse_small_statement()?];
        while self.consume(&TokenKind::Semicolon) {
            if self.at_statement_end() {
                break;
            }
            stmts.push(self.parse_small_statement()?);
        }
        if !self.is_at_end() {
            self.expect(TokenKind::Newline)?;
        }
        Ok(stmts)
    }

    /// Parse `: suite`, either an indented block or statements on the same line
    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(TokenKind::Colon)?;
        if !self.consume(&TokenKind::Newline) {
            return self.parse_simple_statements();
        }
        self.expect(TokenKind::Indent)?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::Dedent) && !self.is_at_end() {
            if self.consume(&TokenKind::Newline) {
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        self.consume(&TokenKind::Dedent);
        Ok(body)
    }

    fn parse_small_statement(&mut self) -> Result<Stmt> {
        let start = self.current().span;
        let kind = match self.current_kind() {
            TokenKind::Pass => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Break => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Return => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_testlist_star()?))
                }
            }
            TokenKind::Raise => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Raise {
                        exc: None,
                        cause: None,
                    }
                } else {
                    let exc = self.parse_test()?;
                    let cause = if self.consume(&TokenKind::From) {
                        Some(self.parse_test()?)
                    } else {
                        None
                    };
                    StmtKind::Raise {
                        exc: Some(exc),
                        cause,
                    }
                }
            }
            TokenKind::Global => {
                self.advance();
                StmtKind::Global(self.parse_name_list()?)
            }
            TokenKind::Nonlocal => {
                self.advance();
                StmtKind::Nonlocal(self.parse_name_list()?)
            }
            TokenKind::Import => self.parse_import()?,
            TokenKind::From => self.parse_import_from()?,
            TokenKind::Assert => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.consume(&TokenKind::Comma) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            TokenKind::Del => {
                self.advance();
                let target = self.parse_target_list()?;
                let targets = match target.kind {
                    ExprKind::Tuple(items) => items,
                    _ => vec![target],
                };
                for target in &targets {
                    self.validate_target(target)?;
                }
                StmtKind::Delete(targets)
            }
            _ => self.parse_expr_statement()?,
        };
        Ok(Stmt::new(kind, self.span_from(start)))
    }

    fn parse_expr_statement(&mut self) -> Result<StmtKind> {
        let first = self.parse_testlist_star()?;

        if self.check(&TokenKind::Colon) {
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
            ) {
                return Err(self.invalid("illegal target for annotation", first.span));
            }
            self.advance();
            let annotation = self.parse_test()?;
            let value = if self.consume(&TokenKind::Eq) {
                Some(self.parse_testlist_star()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign {
                target: first,
                annotation,
                value,
            });
        }

        if self.current_kind().is_aug_assign() {
            let op = Self::aug_assign_op(self.current_kind());
            self.advance();
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
            ) {
                return Err(self.invalid("illegal expression for augmented assignment", first.span));
            }
            let value = self.parse_testlist_star()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }

        if self.check(&TokenKind::Eq) {
            let mut targets = vec![first];
            while self.consume(&TokenKind::Eq) {
                targets.push(self.parse_testlist_star()?);
            }
            let value = match targets.pop() {
                Some(value) => value,
                None => return Err(self.unexpected("expression")),
            };
            for target in &targets {
                self.validate_target(target)?;
            }
            return Ok(StmtKind::Assign { targets, value });
        }

        Ok(StmtKind::Expr(first))
    }

    fn aug_assign_op(kind: &TokenKind) -> BinOp {
        match kind {
            TokenKind::PlusEq => BinOp::Add,
            TokenKind::MinusEq => BinOp::Sub,
            TokenKind::StarEq => BinOp::Mult,
            TokenKind::DoubleStarEq => BinOp::Pow,
            TokenKind::SlashEq => BinOp::Div,
            TokenKind::DoubleSlashEq => BinOp::FloorDiv,
            TokenKind::PercentEq => BinOp::Mod,
            TokenKind::AtEq => BinOp::MatMult,
            TokenKind::ShlEq => BinOp::LShift,
            TokenKind::ShrEq => BinOp::RShift,
            TokenKind::AmpEq => BinOp::BitAnd,
            TokenKind::PipeEq => BinOp::BitOr,
            _ => BinOp::BitXor,
        }
    }

    /// Reject expressions that cannot be assigned to
    fn validate_target(&self, target: &Expr) -> Result<()> {
        match &target.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                items.iter().try_for_each(|item| self.validate_target(item))
            }
            ExprKind::Starred(inner) => self.validate_target(inner),
            ExprKind::Call { .. } => Err(Error::InvalidTarget {
                what: "function call".into(),
                span: target.span,
            }),
            ExprKind::Int(_)
            | ExprKind::BigInt(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Bytes(_)
            | ExprKind::Bool(_)
            | ExprKind::NoneLit
            | ExprKind::Ellipsis => Err(Error::InvalidTarget {
                what: "literal".into(),
                span: target.span,
            }),
            _ => Err(Error::InvalidTarget {
                what: "expression".into(),
                span: target.span,
            }),
        }
    }

    fn parse_name_list(&mut self) -> Result<Vec<String>> {
        let mut names = vec![self.expect_ident()?];
        while self.consume(&TokenKind::Comma) {
            names.push(self.expect_ident()?);
        }
        Ok(names)
    }

    fn parse_dotted_name(&mut self) -> Result<String> {
        let mut name = self.expect_ident()?;
        while self.consume(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        Ok(name)
    }

    fn parse_alias(&mut self, dotted: bool) -> Result<Alias> {
        let name = if dotted {
            self.parse_dotted_name()?
        } else {
            self.expect_ident()?
        };
        let asname = if self.consume(&TokenKind::As) {
            Some(self.expect_ident()?)
        } else {
            None
        };
        Ok(Alias { name, asname })
    }

    fn parse_import(&mut self) -> Result<StmtKind> {
        self.expect(TokenKind::Import)?;
        let mut aliases = vec![self.parse_alias(true)?];
        while self.consume(&TokenKind::Comma) {
            aliases.push(self.parse_alias(true)?);
        }
        Ok(StmtKind::Import(aliases))
    }

    fn parse_import_from(&mut self) -> Result<StmtKind> {
        self.expect(TokenKind::From)?;
        if self.check(&TokenKind::Dot) || self.check(&TokenKind::Ellipsis) {
            return Err(self.invalid("relative imports are not supported", self.current().span));
        }
        let module = self.parse_dotted_name()?;
        self.expect(TokenKind::Import)?;
        if self.check(&TokenKind::Star) {
            return Err(self.invalid("wildcard imports are not supported", self.current().span));
        }
        let parenthesized = self.consume(&TokenKind::LParen);
        let mut names = vec![self.parse_alias(false)?];
        while self.consume(&TokenKind::Comma) {
            if parenthesized && self.check(&TokenKind::RParen) {
                break;
            }
            names.push(self.parse_alias(false)?);
        }
        if parenthesized {
            self.expect(TokenKind::RParen)?;
        }
        Ok(StmtKind::ImportFrom { module, names })
    }

    fn parse_decorated(&mut self) -> Result<Stmt> {
        let mut decorators = Vec::new();
        while self.consume(&TokenKind::At) {
            decorators.push(self.parse_test()?);
            self.expect(TokenKind::Newline)?;
        }
        match self.current_kind() {
            TokenKind::Def => self.parse_function_def(decorators, false),
            TokenKind::Class => self.parse_class_def(decorators),
            TokenKind::Async if matches!(self.peek_kind(), TokenKind::Def) => {
                self.advance();
                self.parse_function_def(decorators, true)
            }
            _ => Err(self.unexpected("function or class definition after decorator")),
        }
    }

    fn parse_async(&mut self) -> Result<Stmt> {
        let span = self.current().span;
        self.expect(TokenKind::Async)?;
        if self.check(&TokenKind::Def) {
            let mut stmt = self.parse_function_def(Vec::new(), true)?;
            stmt.span = self.span_from(span);
            if let StmtKind::FunctionDef(def) = &mut stmt.kind {
                def.span = stmt.span;
            }
            return Ok(stmt);
        }
        Err(self.invalid("only 'async def' is supported", span))
    }

    /// Parse a function definition
    fn parse_function_def(&mut self, decorators: Vec<Expr>, is_async: bool) -> Result<Stmt> {
        let start = self.current().span;
        self.expect(TokenKind::Def)?;
        let name = self.expect_ident()?;

        self.expect(TokenKind::LParen)?;
        let params = self.parse_params(&TokenKind::RParen, true)?;
        self.expect(TokenKind::RParen)?;

        let returns = if self.consume(&TokenKind::Arrow) {
            Some(self.parse_test()?)
        } else {
            None
        };
        let header = self.span_from(start);
        let body = self.parse_block()?;

        let def = FunctionDef {
            name,
            params,
            returns,
            body,
            decorators,
            is_async,
            flags: FunctionFlags::default(),
            span: header,
        };
        Ok(Stmt::new(StmtKind::FunctionDef(def), header))
    }

    /// Parse a parameter list up to (not including) `closing`
    fn parse_params(&mut self, closing: &TokenKind, annotated: bool) -> Result<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        let mut kind = ParamKind::Positional;
        let mut seen_default = false;
        let mut seen_slash = false;

        while !self.check(closing) && !self.is_at_end() {
            let start = self.current().span;

            if self.consume(&TokenKind::Slash) {
                if seen_slash || kind != ParamKind::Positional || params.is_empty() {
                    return Err(self.invalid("misplaced '/' in parameter list", start));
                }
                seen_slash = true;
                for param in params.iter_mut() {
                    param.kind = ParamKind::PositionalOnly;
                }
            } else if self.consume(&TokenKind::DoubleStar) {
                let name = self.expect_ident()?;
                let annotation = self.parse_param_annotation(annotated)?;
                params.push(Param {
                    name,
                    annotation,
                    default: None,
                    kind: ParamKind::KwVarArgs,
                    span: self.span_from(start),
                });
            } else if self.consume(&TokenKind::Star) {
                if kind == ParamKind::KeywordOnly {
                    return Err(self.invalid("'*' may appear only once", start));
                }
                if !self.check(&TokenKind::Comma) && !self.check(closing) {
                    let name = self.expect_ident()?;
                    let annotation = self.parse_param_annotation(annotated)?;
                    params.push(Param {
                        name,
                        annotation,
                        default: None,
                        kind: ParamKind::VarArgs,
                        span: self.span_from(start),
                    });
                }
                kind = ParamKind::KeywordOnly;
            } else {
                if params.iter().any(|p| p.kind == ParamKind::KwVarArgs) {
                    return Err(self.invalid("parameter follows '**' parameter", start));
                }
                let name = self.expect_ident()?;
                let annotation = self.parse_param_annotation(annotated)?;
                let default = if self.consume(&TokenKind::Eq) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                if default.is_some() {
                    seen_default = true;
                } else if seen_default && kind == ParamKind::Positional {
                    return Err(self.invalid("non-default argument follows default argument", start));
                }
                params.push(Param {
                    name,
                    annotation,
                    default,
                    kind,
                    span: self.span_from(start),
                });
            }

            if !self.consume(&TokenKind::Comma) {
                break;
            }
        }

        let mut seen = std::collections::HashSet::new();
        for param in &params {
            if !seen.insert(param.name.as_str()) {
                return Err(self.invalid(
                    format!("duplicate argument '{}' in function definition", param.name),
                    param.span,
                ));
            }
        }
        Ok(params)
    }

    fn parse_param_annotation(&mut self, annotated: bool) -> Result<Option<Expr>> {
        if annotated && self.consume(&TokenKind::Colon) {
            Ok(Some(self.parse_test()?))
        } else {
            Ok(None)
        }
    }

    fn parse_class_def(&mut self, decorators: Vec<Expr>) -> Result<Stmt> {
        let start = self.current().span;
        self.expect(TokenKind::Class)?;
        let name = self.expect_ident()?;

        let mut bases = Vec::new();
        if self.consume(&TokenKind::LParen) {
            let (args, keywords) = self.parse_call_args()?;
            if let Some(keyword) = keywords.first() {
                return Err(self.invalid("class keywords are not supported", keyword.span));
            }
            bases = args;
        }
        let header = self.span_from(start);
        let body = self.parse_block()?;

        let class = ClassDef {
            name,
            bases,
            body,
            decorators,
            span: header,
        };
        Ok(Stmt::new(StmtKind::ClassDef(class), header))
    }

    /// Parse `if`/`elif`; an `elif` becomes a nested `If` in `orelse`
    fn parse_if(&mut self) -> Result<Stmt> {
        let start = self.current().span;
        self.advance();
        let test = self.parse_test()?;
        let body = self.parse_block()?;

        let orelse = if self.check(&TokenKind::Elif) {
            vec![self.parse_if()?]
        } else if self.consume(&TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };

        Ok(Stmt::new(
            StmtKind::If { test, body, orelse },
            self.span_from(start),
        ))
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        let start = self.current().span;
        self.expect(TokenKind::While)?;
        let test = self.parse_test()?;
        let body = self.parse_block()?;
        let orelse = if self.consume(&TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(
            StmtKind::While { test, body, orelse },
            self.span_from(start),
        ))
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        let start = self.current().span;
        self.expect(TokenKind::For)?;
        let target = self.parse_target_list()?;
        self.validate_target(&target)?;
        self.expect(TokenKind::In)?;
        let iter = self.parse_testlist_star()?;
        let body = self.parse_block()?;
        let orelse = if self.consume(&TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
            self.span_from(start),
        ))
    }

    fn parse_try(&mut self) -> Result<Stmt> {
        let start = self.current().span;
        self.expect(TokenKind::Try)?;
        let body = self.parse_block()?;

        let mut handlers = Vec::new();
        while self.check(&TokenKind::Except) {
            let handler_start = self.advance().span;
            let typ = if self.check(&TokenKind::Colon) {
                None
            } else {
                Some(self.parse_test()?)
            };
            let name = if typ.is_some() && self.consume(&TokenKind::As) {
                Some(self.expect_ident()?)
            } else {
                None
            };
            let span = self.span_from(handler_start);
            let body = self.parse_block()?;
            handlers.push(ExceptHandler {
                typ,
                name,
                body,
                span,
            });
        }

        let orelse = if !handlers.is_empty() && self.consume(&TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.consume(&TokenKind::Finally) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.unexpected("'except' or 'finally'"));
        }

        Ok(Stmt::new(
            StmtKind::Try(TryStmt {
                body,
                handlers,
                orelse,
                finalbody,
            }),
            self.span_from(start),
        ))
    }

    // ==================== Expressions ====================

    /// `a, b, *c` as used on either side of an assignment; a single item is returned as is
    fn parse_testlist_star(&mut self) -> Result<Expr> {
        if self.check(&TokenKind::Yield) {
            return self.parse_yield();
        }
        let first = self.parse_star_or_test()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let start = first.span;
        let mut items = vec![first];
        while self.consume(&TokenKind::Comma) {
            if !self.starts_expression() {
                break;
            }
            items.push(self.parse_star_or_test()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), self.span_from(start)))
    }

    /// Assignment targets for `for` and comprehensions; stops before `in`
    fn parse_target_list(&mut self) -> Result<Expr> {
        let first = self.parse_star_or_bitor()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let start = first.span;
        let mut items = vec![first];
        while self.consume(&TokenKind::Comma) {
            if !self.starts_expression() {
                break;
            }
            items.push(self.parse_star_or_bitor()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), self.span_from(start)))
    }

    fn parse_star_or_test(&mut self) -> Result<Expr> {
        if self.check(&TokenKind::Star) {
            let start = self.advance().span;
            let inner = self.parse_expr_bp(0)?;
            return Ok(Expr::new(
                ExprKind::Starred(Box::new(inner)),
                self.span_from(start),
            ));
        }
        self.parse_test()
    }

    fn parse_star_or_bitor(&mut self) -> Result<Expr> {
        if self.check(&TokenKind::Star) {
            let start = self.advance().span;
            let inner = self.parse_expr_bp(0)?;
            return Ok(Expr::new(
                ExprKind::Starred(Box::new(inner)),
                self.span_from(start),
            ));
        }
        self.parse_expr_bp(0)
    }

    fn parse_yield(&mut self) -> Result<Expr> {
        let start = self.current().span;
        self.expect(TokenKind::Yield)?;
        if self.consume(&TokenKind::From) {
            let value = self.parse_test()?;
            return Ok(Expr::new(
                ExprKind::YieldFrom(Box::new(value)),
                self.span_from(start),
            ));
        }
        let value = if self.starts_expression() {
            Some(Box::new(self.parse_testlist_star()?))
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Yield(value), self.span_from(start)))
    }

    /// Conditional expression level (also handles `lambda`)
    pub fn parse_test(&mut self) -> Result<Expr> {
        if self.check(&TokenKind::Lambda) {
            return self.parse_lambda();
        }
        let body = self.parse_or_test()?;
        if !self.check(&TokenKind::If) {
            return Ok(body);
        }
        self.advance();
        let test = self.parse_or_test()?;
        self.expect(TokenKind::Else)?;
        let orelse = self.parse_test()?;
        let span = body.span.merge(&orelse.span);
        Ok(Expr::new(
            ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            span,
        ))
    }

    fn parse_lambda(&mut self) -> Result<Expr> {
        let start = self.current().span;
        self.expect(TokenKind::Lambda)?;
        let params = self.parse_params(&TokenKind::Colon, false)?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_test()?;
        Ok(Expr::new(
            ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
            self.span_from(start),
        ))
    }

    fn parse_or_test(&mut self) -> Result<Expr> {
        let first = self.parse_and_test()?;
        if !self.check(&TokenKind::Or) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.consume(&TokenKind::Or) {
            values.push(self.parse_and_test()?);
        }
        Ok(Self::bool_op(BoolOp::Or, values))
    }

    fn parse_and_test(&mut self) -> Result<Expr> {
        let first = self.parse_not_test()?;
        if !self.check(&TokenKind::And) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.consume(&TokenKind::And) {
            values.push(self.parse_not_test()?);
        }
        Ok(Self::bool_op(BoolOp::And, values))
    }

    fn bool_op(op: BoolOp, values: Vec<Expr>) -> Expr {
        let span = match (values.first(), values.last()) {
            (Some(first), Some(last)) => first.span.merge(&last.span),
            _ => Span::dummy(),
        };
        Expr::new(ExprKind::BoolOp { op, values }, span)
    }

    fn parse_not_test(&mut self) -> Result<Expr> {
        if self.check(&TokenKind::Not) {
            let start = self.advance().span;
            let operand = self.parse_not_test()?;
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                self.span_from(start),
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_expr_bp(0)?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();

        loop {
            let op = match self.current_kind() {
                TokenKind::Lt => CmpOp::Lt,
                TokenKind::Gt => CmpOp::Gt,
                TokenKind::Le => CmpOp::LtE,
                TokenKind::Ge => CmpOp::GtE,
                TokenKind::EqEq => CmpOp::Eq,
                TokenKind::Ne => CmpOp::NotEq,
                TokenKind::In => CmpOp::In,
                TokenKind::Not if matches!(self.peek_kind(), TokenKind::In) => {
                    self.advance();
                    CmpOp::NotIn
                }
                TokenKind::Is => {
                    if matches!(self.peek_kind(), TokenKind::Not) {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            ops.push(op);
            comparators.push(self.parse_expr_bp(0)?);
        }

        if ops.is_empty() {
            return Ok(left);
        }
        let span = match comparators.last() {
            Some(last) => left.span.merge(&last.span),
            None => left.span,
        };
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            span,
        ))
    }

    /// Parse binary operators with binding power (Pratt parsing)
    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr> {
        let mut left = self.parse_factor()?;

        loop {
            let Some(bp) = self.current_kind().binary_precedence() else {
                break;
            };
            if bp < min_bp {
                break;
            }

            let op = Self::token_to_binop(self.current_kind());
            self.advance();
            let right = self.parse_expr_bp(bp + 1)?;
            let span = left.span.merge(&right.span);

            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    fn token_to_binop(kind: &TokenKind) -> BinOp {
        match kind {
            TokenKind::Pipe => BinOp::BitOr,
            TokenKind::Caret => BinOp::BitXor,
            TokenKind::Amp => BinOp::BitAnd,
            TokenKind::Shl => BinOp::LShift,
            TokenKind::Shr => BinOp::RShift,
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Star => BinOp::Mult,
            TokenKind::Slash => BinOp::Div,
            TokenKind::DoubleSlash => BinOp::FloorDiv,
            TokenKind::Percent => BinOp::Mod,
            _ => BinOp::MatMult,
        }
    }

    /// Unary `+`, `-`, `~`
    fn parse_factor(&mut self) -> Result<Expr> {
        let op = match self.current_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            TokenKind::Tilde => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        let start = self.advance().span;
        let operand = self.parse_factor()?;
        Ok(Expr::new(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            self.span_from(start),
        ))
    }

    /// `await`-primary `**` factor, right associative
    fn parse_power(&mut self) -> Result<Expr> {
        let base = if self.check(&TokenKind::Await) {
            let start = self.advance().span;
            let atom = self.parse_atom()?;
            let value = self.parse_postfix(atom)?;
            Expr::new(ExprKind::Await(Box::new(value)), self.span_from(start))
        } else {
            let atom = self.parse_atom()?;
            self.parse_postfix(atom)?
        };

        if !self.consume(&TokenKind::DoubleStar) {
            return Ok(base);
        }
        let exponent = self.parse_factor()?;
        let span = base.span.merge(&exponent.span);
        Ok(Expr::new(
            ExprKind::BinOp {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent),
            },
            span,
        ))
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let token = self.current().clone();
        let kind = match &token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                ExprKind::Name(name.clone())
            }
            TokenKind::Int(v) => {
                self.advance();
                ExprKind::Int(*v)
            }
            TokenKind::BigInt(digits) => {
                self.advance();
                ExprKind::BigInt(digits.clone())
            }
            TokenKind::Float(v) => {
                self.advance();
                ExprKind::Float(*v)
            }
            TokenKind::Str(_) | TokenKind::Bytes(_) => return self.parse_strings(),
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::None => {
                self.advance();
                ExprKind::NoneLit
            }
            TokenKind::Ellipsis => {
                self.advance();
                ExprKind::Ellipsis
            }
            TokenKind::LParen => return self.parse_paren(),
            TokenKind::LBracket => return self.parse_list_display(),
            TokenKind::LBrace => return self.parse_brace_display(),
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr::new(kind, token.span))
    }

    /// Adjacent string literals concatenate
    fn parse_strings(&mut self) -> Result<Expr> {
        let start = self.current().span;
        let mut text: Option<String> = None;
        let mut bytes: Option<Vec<u8>> = None;
        loop {
            match self.current_kind().clone() {
                TokenKind::Str(s) if bytes.is_none() => {
                    text.get_or_insert_with(String::new).push_str(&s);
                }
                TokenKind::Bytes(b) if text.is_none() => {
                    bytes.get_or_insert_with(Vec::new).extend(b);
                }
                TokenKind::Str(_) | TokenKind::Bytes(_) => {
                    return Err(self.invalid("cannot mix bytes and nonbytes literals", self.current().span))
                }
                _ => break,
            }
            self.advance();
        }
        let kind = match bytes {
            Some(b) => ExprKind::Bytes(b),
            None => ExprKind::Str(text.unwrap_or_default()),
        };
        Ok(Expr::new(kind, self.span_from(start)))
    }

    fn parse_paren(&mut self) -> Result<Expr> {
        let start = self.current().span;
        self.expect(TokenKind::LParen)?;
        if self.consume(&TokenKind::RParen) {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), self.span_from(start)));
        }
        if self.check(&TokenKind::Yield) {
            let value = self.parse_yield()?;
            self.expect(TokenKind::RParen)?;
            return Ok(value);
        }

        let first = self.parse_star_or_test()?;
        if self.check(&TokenKind::For) {
            let generators = self.parse_comp_for()?;
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::new(
                ExprKind::GeneratorExp {
                    elt: Box::new(first),
                    generators,
                },
                self.span_from(start),
            ));
        }
        if !self.check(&TokenKind::Comma) {
            self.expect(TokenKind::RParen)?;
            return Ok(first);
        }

        let mut items = vec![first];
        while self.consume(&TokenKind::Comma) {
            if self.check(&TokenKind::RParen) {
                break;
            }
            items.push(self.parse_star_or_test()?);
        }
        self.expect(TokenKind::RParen)?;
        Ok(Expr::new(ExprKind::Tuple(items), self.span_from(start)))
    }

    fn parse_list_display(&mut self) -> Result<Expr> {
        let start = self.current().span;
        self.expect(TokenKind::LBracket)?;
        if self.consume(&TokenKind::RBracket) {
            return Ok(Expr::new(ExprKind::List(Vec::new()), self.span_from(start)));
        }

        let first = self.parse_star_or_test()?;
        if self.check(&TokenKind::For) {
            let generators = self.parse_comp_for()?;
            self.expect(TokenKind::RBracket)?;
            return Ok(Expr::new(
                ExprKind::ListComp {
                    elt: Box::new(first),
                    generators,
                },
                self.span_from(start),
            ));
        }

        let mut items = vec![first];
        while self.consume(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_star_or_test()?);
        }
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::new(ExprKind::List(items), self.span_from(start)))
    }

    fn parse_brace_display(&mut self) -> Result<Expr> {
        let start = self.current().span;
        self.expect(TokenKind::LBrace)?;
        if self.consume(&TokenKind::RBrace) {
            return Ok(Expr::new(ExprKind::Dict(Vec::new()), self.span_from(start)));
        }
        if self.check(&TokenKind::DoubleStar) {
            return Err(self.invalid("dict unpacking is not supported", self.current().span));
        }

        let first = self.parse_star_or_test()?;
        if self.consume(&TokenKind::Colon) {
            let value = self.parse_test()?;
            if self.check(&TokenKind::For) {
                let generators = self.parse_comp_for()?;
                self.expect(TokenKind::RBrace)?;
                return Ok(Expr::new(
                    ExprKind::DictComp {
                        key: Box::new(first),
                        value: Box::new(value),
                        generators,
                    },
                    self.span_from(start),
                ));
            }
            let mut pairs = vec![(first, value)];
            while self.consume(&TokenKind::Comma) {
                if self.check(&TokenKind::RBrace) {
                    break;
                }
                let key = self.parse_test()?;
                self.expect(TokenKind::Colon)?;
                let value = self.parse_test()?;
                pairs.push((key, value));
            }
            self.expect(TokenKind::RBrace)?;
            return Ok(Expr::new(ExprKind::Dict(pairs), self.span_from(start)));
        }

        if self.check(&TokenKind::For) {
            let generators = self.parse_comp_for()?;
            self.expect(TokenKind::RBrace)?;
            return Ok(Expr::new(
                ExprKind::SetComp {
                    elt: Box::new(first),
                    generators,
                },
                self.span_from(start),
            ));
        }
        let mut items = vec![first];
        while self.consume(&TokenKind::Comma) {
            if self.check(&TokenKind::RBrace) {
                break;
            }
            items.push(self.parse_star_or_test()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::new(ExprKind::Set(items), self.span_from(start)))
    }

    /// One or more `for target in iter [if cond]*` clauses
    fn parse_comp_for(&mut self) -> Result<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.consume(&TokenKind::For) {
            let target = self.parse_target_list()?;
            self.validate_target(&target)?;
            self.expect(TokenKind::In)?;
            let iter = self.parse_or_test()?;
            let mut ifs = Vec::new();
            while self.consume(&TokenKind::If) {
                ifs.push(self.parse_or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr> {
        loop {
            if self.consume(&TokenKind::LParen) {
                let (args, keywords) = self.parse_call_args()?;
                let span = self.span_from(expr.span);
                expr = Expr::new(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    },
                    span,
                );
            } else if self.consume(&TokenKind::Dot) {
                let attr = self.expect_ident()?;
                let span = self.span_from(expr.span);
                expr = Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    span,
                );
            } else if self.consume(&TokenKind::LBracket) {
                let index = self.parse_subscript_list()?;
                self.expect(TokenKind::RBracket)?;
                let span = self.span_from(expr.span);
                expr = Expr::new(
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Arguments after `(` up to and including `)`
    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();

        while !self.check(&TokenKind::RParen) && !self.is_at_end() {
            let start = self.current().span;
            if self.consume(&TokenKind::DoubleStar) {
                let value = self.parse_test()?;
                keywords.push(Keyword {
                    name: None,
                    value,
                    span: self.span_from(start),
                });
            } else if matches!(self.current_kind(), TokenKind::Ident(_))
                && matches!(self.peek_kind(), TokenKind::Eq)
            {
                let name = self.expect_ident()?;
                self.expect(TokenKind::Eq)?;
                let value = self.parse_test()?;
                if keywords.iter().any(|k| k.name.as_deref() == Some(name.as_str())) {
                    return Err(self.invalid(format!("keyword argument repeated: {}", name), start));
                }
                keywords.push(Keyword {
                    name: Some(name),
                    value,
                    span: self.span_from(start),
                });
            } else {
                let arg = self.parse_star_or_test()?;
                let is_starred = matches!(arg.kind, ExprKind::Starred(_));
                if !keywords.is_empty() && !is_starred {
                    return Err(self.invalid("positional argument follows keyword argument", arg.span));
                }
                if self.check(&TokenKind::For) {
                    let generators = self.parse_comp_for()?;
                    let span = self.span_from(start);
                    args.push(Expr::new(
                        ExprKind::GeneratorExp {
                            elt: Box::new(arg),
                            generators,
                        },
                        span,
                    ));
                } else {
                    args.push(arg);
                }
            }
            if !self.consume(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok((args, keywords))
    }

    fn parse_subscript_list(&mut self) -> Result<Expr> {
        let first = self.parse_subscript()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let start = first.span;
        let mut items = vec![first];
        while self.consume(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_subscript()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), self.span_from(start)))
    }

    fn parse_subscript(&mut self) -> Result<Expr> {
        let start = self.current().span;
        let lower = if self.check(&TokenKind::Colon) {
            None
        } else {
            let value = self.parse_test()?;
            if !self.check(&TokenKind::Colon) {
                return Ok(value);
            }
            Some(Box::new(value))
        };
        self.expect(TokenKind::Colon)?;

        let ends_part = |p: &Self| {
            matches!(
                p.current_kind(),
                TokenKind::Colon | TokenKind::RBracket | TokenKind::Comma
            )
        };
        let upper = if ends_part(self) {
            None
        } else {
            Some(Box::new(self.parse_test()?))
        };
        let step = if self.consume(&TokenKind::Colon) && !ends_part(self) {
            Some(Box::new(self.parse_test()?))
        } else {
            None
        };
        Ok(Expr::new(
            ExprKind::Slice { lower, upper, step },
            self.span_from(start),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Result<Module> {
        let tokens = Lexer::new(source).tokenize()?;
        Parser::new(tokens).parse_module("test.py")
    }

    fn only_expr(source: &str) -> Expr {
        let module = parse(source).expect("parse failed");
        match module.body.into_iter().next().map(|s| s.kind) {
            Some(StmtKind::Expr(e)) => e,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_function_with_annotations() {
        let module = parse("def add(a: int, /, b: int = 2, *args, c: str, **kw) -> int:\n    return a + b\n")
            .expect("parse failed");
        let StmtKind::FunctionDef(def) = &module.body[0].kind else {
            panic!("expected def");
        };
        let kinds: Vec<ParamKind> = def.params.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ParamKind::PositionalOnly,
                ParamKind::Positional,
                ParamKind::VarArgs,
                ParamKind::KeywordOnly,
                ParamKind::KwVarArgs,
            ]
        );
        assert!(def.params[1].default.is_some());
        assert!(def.returns.is_some());
        assert_eq!(def.body.len(), 1);
    }

    #[test]
    fn test_elif_chain_nests() {
        let module = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n").expect("parse failed");
        let StmtKind::If { orelse, .. } = &module.body[0].kind else {
            panic!("expected if");
        };
        assert_eq!(orelse.len(), 1);
        let StmtKind::If { orelse: inner, .. } = &orelse[0].kind else {
            panic!("expected nested if");
        };
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn test_precedence() {
        let expr = only_expr("1 + 2 * 3 ** 2\n");
        let ExprKind::BinOp { op, right, .. } = &expr.kind else {
            panic!("expected binop");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Mult, .. }));

        let expr = only_expr("-x ** 2\n");
        assert!(matches!(expr.kind, ExprKind::UnaryOp { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn test_chained_comparison_and_membership() {
        let expr = only_expr("a < b <= c not in d is not None\n");
        let ExprKind::Compare { ops, .. } = &expr.kind else {
            panic!("expected compare");
        };
        assert_eq!(ops, &vec![CmpOp::Lt, CmpOp::LtE, CmpOp::NotIn, CmpOp::IsNot]);
    }

    #[test]
    fn test_calls_and_comprehensions() {
        let expr = only_expr("f(1, *rest, key=v, **opts)\n");
        let ExprKind::Call { args, keywords, .. } = &expr.kind else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 2);
        assert_eq!(keywords.len(), 2);
        assert!(keywords[1].name.is_none());

        let expr = only_expr("[x * 2 for x in xs if x > 0]\n");
        assert!(matches!(expr.kind, ExprKind::ListComp { .. }));
        let expr = only_expr("{k: v for k, v in pairs}\n");
        assert!(matches!(expr.kind, ExprKind::DictComp { .. }));
        let expr = only_expr("sum(x for x in xs)\n");
        let ExprKind::Call { args, .. } = &expr.kind else {
            panic!("expected call");
        };
        assert!(matches!(args[0].kind, ExprKind::GeneratorExp { .. }));
    }

    #[test]
    fn test_try_statement() {
        let source = "\
try:
    risky()
except (ValueError, KeyError) as e:
    raise RuntimeError('bad') from e
except Exception:
    pass
else:
    done()
finally:
    cleanup()
";
        let module = parse(source).expect("parse failed");
        let StmtKind::Try(t) = &module.body[0].kind else {
            panic!("expected try");
        };
        assert_eq!(t.handlers.len(), 2);
        assert_eq!(t.handlers[0].name.as_deref(), Some("e"));
        assert_eq!(t.orelse.len(), 1);
        assert_eq!(t.finalbody.len(), 1);
    }

    #[test]
    fn test_assignments() {
        let module = parse("a = b = 1\nx, *y = items\nn: int = 0\ncount += 1; pass\n").expect("parse failed");
        assert_eq!(module.body.len(), 5);
        assert!(matches!(&module.body[0].kind, StmtKind::Assign { targets, .. } if targets.len() == 2));
        assert!(matches!(module.body[2].kind, StmtKind::AnnAssign { .. }));
        assert!(matches!(module.body[3].kind, StmtKind::AugAssign { op: BinOp::Add, .. }));
    }

    #[test]
    fn test_decorated_async_and_class() {
        let source = "@cache\nasync def fetch(x):\n    return await get(x)\nclass B(A):\n    y = 1\n";
        let module = parse(source).expect("parse failed");
        let StmtKind::FunctionDef(def) = &module.body[0].kind else {
            panic!("expected def");
        };
        assert!(def.is_async);
        assert_eq!(def.decorators.len(), 1);
        let StmtKind::ClassDef(class) = &module.body[1].kind else {
            panic!("expected class");
        };
        assert_eq!(class.bases.len(), 1);
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse("f() = 1\n"), Err(Error::InvalidTarget { .. })));
        assert!(matches!(parse("f(a=1, 2)\n"), Err(Error::InvalidSyntax { .. })));
        assert!(matches!(parse("def f(a=1, b):\n    pass\n"), Err(Error::InvalidSyntax { .. })));
        assert!(matches!(parse("x = (1, \n"), Err(_)));
        assert!(matches!(parse("try:\n    pass\n"), Err(Error::UnexpectedToken { .. })));
    }

    #[test]
    fn test_slices() {
        let expr = only_expr("xs[1:n:2]\n");
        let ExprKind::Subscript { index, .. } = &expr.kind else {
            panic!("expected subscript");
        };
        assert!(matches!(
            &index.kind,
            ExprKind::Slice { lower: Some(_), upper: Some(_), step: Some(_) }
        ));
    }
}
