//! Abstract Syntax Tree definitions for Serpent
//!
//! The analyzer annotates the tree in place: expressions receive their
//! possible types and canonical keys, statements their may-raise effect, and
//! function definitions their generator/coroutine flags.

use crate::types::TypeSet;
use crate::utils::Span;
use serde::Serialize;
use std::collections::BTreeSet;

/// A complete module (compilation unit)
#[derive(Debug, Clone)]
pub struct Module {
    pub file: String,
    pub body: Vec<Stmt>,
}

// ==================== Statements ====================

/// A statement with its location and effect annotation
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
    /// Set by the analyzer: evaluating this statement can raise
    pub may_raise: bool,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self {
            kind,
            span,
            may_raise: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
    Return(Option<Expr>),
    /// `a = b = value`
    Assign { targets: Vec<Expr>, value: Expr },
    /// `target: annotation [= value]`
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
    },
    /// `target op= value`
    AugAssign { target: Expr, op: BinOp, value: Expr },
    Expr(Expr),
    /// `elif` chains are nested `If`s in `orelse`
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    Try(TryStmt),
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Assert { test: Expr, msg: Option<Expr> },
    Delete(Vec<Expr>),
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Import(Vec<Alias>),
    ImportFrom { module: String, names: Vec<Alias> },
    Pass,
    Break,
    Continue,
}

/// Function definition
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Option<Expr>,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Expr>,
    pub is_async: bool,
    /// Set by the analyzer
    pub flags: FunctionFlags,
    pub span: Span,
}

/// Function parameter
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub annotation: Option<Expr>,
    pub default: Option<Expr>,
    pub kind: ParamKind,
    pub span: Span,
}

/// How an argument may be passed to a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParamKind {
    /// Positional or keyword
    Positional,
    /// Before `/`
    PositionalOnly,
    /// After `*` or `*args`
    KeywordOnly,
    /// `*args`
    VarArgs,
    /// `**kwargs`
    KwVarArgs,
}

/// Generator/coroutine classification of a function body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionFlags {
    pub is_generator: bool,
    pub is_coroutine: bool,
}

/// Class definition
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TryStmt {
    pub body: Vec<Stmt>,
    pub handlers: Vec<ExceptHandler>,
    pub orelse: Vec<Stmt>,
    pub finalbody: Vec<Stmt>,
}

/// `except [typ [as name]]:`
#[derive(Debug, Clone)]
pub struct ExceptHandler {
    pub typ: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// `name [as asname]` in imports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

impl Alias {
    /// The name bound by the import
    pub fn bound_name(&self) -> &str {
        self.asname.as_deref().unwrap_or(&self.name)
    }
}

// ==================== Expressions ====================

/// An expression with its analysis annotations
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Possible types at this point, set by the analyzer
    pub ty: Option<TypeSet>,
    /// Identity of a pure value, set by the analyzer
    pub canonical_key: Option<String>,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            ty: None,
            canonical_key: None,
        }
    }

    /// The identifier, if this is a bare name
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Direct subexpressions, left to right. Lambda bodies are not included.
    pub fn children(&self) -> Vec<&Expr> {
        let mut out: Vec<&Expr> = Vec::new();
        match &self.kind {
            ExprKind::Name(_)
            | ExprKind::Int(_)
            | ExprKind::BigInt(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Bytes(_)
            | ExprKind::Bool(_)
            | ExprKind::NoneLit
            | ExprKind::Ellipsis
            | ExprKind::Lambda { .. } => {}
            ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
                out.extend(items)
            }
            ExprKind::Dict(pairs) => {
                for (k, v) in pairs {
                    out.push(k);
                    out.push(v);
                }
            }
            ExprKind::BinOp { left, right, .. } => {
                out.push(left);
                out.push(right);
            }
            ExprKind::UnaryOp { operand, .. } => out.push(operand),
            ExprKind::BoolOp { values, .. } => out.extend(values),
            ExprKind::Compare {
                left, comparators, ..
            } => {
                out.push(left);
                out.extend(comparators);
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                out.push(func);
                out.extend(args);
                out.extend(keywords.iter().map(|k| &k.value));
            }
            ExprKind::Attribute { value, .. } => out.push(value),
            ExprKind::Subscript { value, index } => {
                out.push(value);
                out.push(index);
            }
            ExprKind::Slice { lower, upper, step } => {
                out.extend([lower, upper, step].into_iter().flatten().map(|b| &**b))
            }
            ExprKind::IfExp { test, body, orelse } => {
                out.push(test);
                out.push(body);
                out.push(orelse);
            }
            ExprKind::ListComp { elt, generators }
            | ExprKind::SetComp { elt, generators }
            | ExprKind::GeneratorExp { elt, generators } => {
                push_generators(&mut out, generators);
                out.push(elt);
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                push_generators(&mut out, generators);
                out.push(key);
                out.push(value);
            }
            ExprKind::Yield(value) => out.extend(value.iter().map(|b| &**b)),
            ExprKind::YieldFrom(value) | ExprKind::Await(value) | ExprKind::Starred(value) => {
                out.push(value)
            }
        }
        out
    }

    /// Visit this expression and every nested one, pre-order
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }
}

fn push_generators<'a>(out: &mut Vec<&'a Expr>, generators: &'a [Comprehension]) {
    for gen in generators {
        out.push(&gen.iter);
        out.push(&gen.target);
        out.extend(&gen.ifs);
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Name(String),
    Int(i64),
    BigInt(String),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
    NoneLit,
    Ellipsis,
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    /// `left op0 c0 op1 c1 ...`
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    /// `body if test else orelse`
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    GeneratorExp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
    },
    Yield(Option<Box<Expr>>),
    YieldFrom(Box<Expr>),
    Await(Box<Expr>),
    Starred(Box<Expr>),
}

/// Call keyword argument; `name` is `None` for `**mapping`
#[derive(Debug, Clone)]
pub struct Keyword {
    pub name: Option<String>,
    pub value: Expr,
    pub span: Span,
}

/// `for target in iter if cond...` clause
#[derive(Debug, Clone)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

// ==================== Operators ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mult => "*",
            BinOp::MatMult => "@",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    Invert,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Not => "not ",
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Invert => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        }
    }
}

// ==================== Helpers ====================

/// Names bound by assignment anywhere in `body`, not descending into
/// nested function or class bodies.
pub fn assigned_names(body: &[Stmt]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for stmt in body {
        collect_assigned(stmt, &mut names);
    }
    names
}

fn collect_assigned(stmt: &Stmt, names: &mut BTreeSet<String>) {
    match &stmt.kind {
        StmtKind::Assign { targets, .. } => {
            for target in targets {
                target_names(target, names);
            }
        }
        StmtKind::AnnAssign { target, .. } | StmtKind::AugAssign { target, .. } => {
            target_names(target, names)
        }
        StmtKind::For {
            target,
            body,
            orelse,
            ..
        } => {
            target_names(target, names);
            names.extend(assigned_names(body));
            names.extend(assigned_names(orelse));
        }
        StmtKind::If { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
            names.extend(assigned_names(body));
            names.extend(assigned_names(orelse));
        }
        StmtKind::Try(t) => {
            names.extend(assigned_names(&t.body));
            names.extend(assigned_names(&t.orelse));
            names.extend(assigned_names(&t.finalbody));
            for handler in &t.handlers {
                names.extend(handler.name.iter().cloned());
                names.extend(assigned_names(&handler.body));
            }
        }
        StmtKind::FunctionDef(def) => {
            names.insert(def.name.clone());
        }
        StmtKind::ClassDef(class) => {
            names.insert(class.name.clone());
        }
        StmtKind::Import(aliases) | StmtKind::ImportFrom { names: aliases, .. } => {
            names.extend(aliases.iter().map(|a| a.bound_name().to_string()))
        }
        _ => {}
    }
}

/// Whether any statement in `body`, at any depth, is a `global` declaration
pub fn declares_global(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| match &stmt.kind {
        StmtKind::Global(_) => true,
        StmtKind::If { body, orelse, .. }
        | StmtKind::While { body, orelse, .. }
        | StmtKind::For { body, orelse, .. } => declares_global(body) || declares_global(orelse),
        StmtKind::Try(t) => {
            declares_global(&t.body)
                || declares_global(&t.orelse)
                || declares_global(&t.finalbody)
                || t.handlers.iter().any(|h| declares_global(&h.body))
        }
        StmtKind::FunctionDef(def) => declares_global(&def.body),
        StmtKind::ClassDef(class) => declares_global(&class.body),
        _ => false,
    })
}

/// Names bound by an assignment target
pub fn target_names(target: &Expr, names: &mut BTreeSet<String>) {
    match &target.kind {
        ExprKind::Name(name) => {
            names.insert(name.clone());
        }
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for item in items {
                target_names(item, names);
            }
        }
        ExprKind::Starred(inner) => target_names(inner, names),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> Expr {
        Expr::new(ExprKind::Name(n.into()), Span::dummy())
    }

    #[test]
    fn test_children_order() {
        let call = Expr::new(
            ExprKind::Call {
                func: Box::new(name("f")),
                args: vec![name("a")],
                keywords: vec![Keyword {
                    name: Some("k".into()),
                    value: name("b"),
                    span: Span::dummy(),
                }],
            },
            Span::dummy(),
        );
        let names: Vec<&str> = call.children().iter().filter_map(|e| e.as_name()).collect();
        assert_eq!(names, vec!["f", "a", "b"]);

        let mut seen = 0;
        call.walk(&mut |_| seen += 1);
        assert_eq!(seen, 4);
    }

    #[test]
    fn test_assigned_names_skip_nested_defs() {
        let assign = Stmt::new(
            StmtKind::Assign {
                targets: vec![Expr::new(
                    ExprKind::Tuple(vec![name("a"), name("b")]),
                    Span::dummy(),
                )],
                value: name("pair"),
            },
            Span::dummy(),
        );
        let inner = Stmt::new(
            StmtKind::Assign {
                targets: vec![name("hidden")],
                value: name("v"),
            },
            Span::dummy(),
        );
        let def = Stmt::new(
            StmtKind::FunctionDef(FunctionDef {
                name: "helper".into(),
                params: Vec::new(),
                returns: None,
                body: vec![inner],
                decorators: Vec::new(),
                is_async: false,
                flags: FunctionFlags::default(),
                span: Span::dummy(),
            }),
            Span::dummy(),
        );
        let names = assigned_names(&[assign, def]);
        let names: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "helper"]);
    }

    #[test]
    fn test_declares_global_looks_into_defs() {
        let global = Stmt::new(StmtKind::Global(vec!["x".into()]), Span::dummy());
        let loop_stmt = Stmt::new(
            StmtKind::While {
                test: name("n"),
                body: vec![global],
                orelse: Vec::new(),
            },
            Span::dummy(),
        );
        let def = Stmt::new(
            StmtKind::FunctionDef(FunctionDef {
                name: "f".into(),
                params: Vec::new(),
                returns: None,
                body: vec![loop_stmt],
                decorators: Vec::new(),
                is_async: false,
                flags: FunctionFlags::default(),
                span: Span::dummy(),
            }),
            Span::dummy(),
        );
        assert!(!declares_global(&[Stmt::new(StmtKind::Pass, Span::dummy())]));
        assert!(declares_global(&[def]));
    }
}
