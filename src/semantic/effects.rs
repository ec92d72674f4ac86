//! Effect classification: generator/coroutine flags and may-raise statements

use crate::frontend::ast::{BinOp, Expr, ExprKind, FunctionDef, FunctionFlags, Stmt, StmtKind};

/// Classify a function by its own body; nested functions, classes and
/// lambdas do not count.
pub fn function_flags(def: &FunctionDef) -> FunctionFlags {
    let mut flags = FunctionFlags {
        is_generator: false,
        is_coroutine: def.is_async,
    };
    for stmt in &def.body {
        scan_stmt(stmt, &mut flags);
    }
    flags
}

fn scan_stmt(stmt: &Stmt, flags: &mut FunctionFlags) {
    for expr in header_exprs(stmt) {
        expr.walk(&mut |e| match e.kind {
            ExprKind::Yield(_) | ExprKind::YieldFrom(_) => flags.is_generator = true,
            ExprKind::Await(_) => flags.is_coroutine = true,
            _ => {}
        });
    }
    for block in child_blocks(stmt) {
        for inner in block {
            scan_stmt(inner, flags);
        }
    }
}

/// Whether evaluating the statement itself can raise.
///
/// Compound statements report their header only; each nested statement
/// carries its own flag. A `for` header always counts since advancing
/// the iterator runs arbitrary code.
pub fn may_raise(stmt: &Stmt) -> bool {
    match stmt.kind {
        StmtKind::Raise { .. }
        | StmtKind::Assert { .. }
        | StmtKind::Delete(_)
        | StmtKind::For { .. } => true,
        _ => header_exprs(stmt).into_iter().any(expr_may_raise),
    }
}

fn expr_may_raise(expr: &Expr) -> bool {
    let mut raises = false;
    expr.walk(&mut |e| {
        raises |= matches!(
            e.kind,
            ExprKind::BinOp {
                op: BinOp::Div | BinOp::FloorDiv | BinOp::Mod,
                ..
            } | ExprKind::Subscript { .. }
                | ExprKind::Attribute { .. }
                | ExprKind::Call { .. }
        );
    });
    raises
}

/// Expressions evaluated by the statement itself
fn header_exprs(stmt: &Stmt) -> Vec<&Expr> {
    match &stmt.kind {
        StmtKind::FunctionDef(def) => def
            .decorators
            .iter()
            .chain(def.params.iter().filter_map(|p| p.default.as_ref()))
            .collect(),
        StmtKind::ClassDef(class) => class.decorators.iter().chain(&class.bases).collect(),
        StmtKind::Return(value) => value.iter().collect(),
        StmtKind::Assign { targets, value } => targets.iter().chain(Some(value)).collect(),
        StmtKind::AnnAssign { target, value, .. } => Some(target).into_iter().chain(value).collect(),
        StmtKind::AugAssign { target, value, .. } => vec![target, value],
        StmtKind::Expr(value) => vec![value],
        StmtKind::If { test, .. } | StmtKind::While { test, .. } => vec![test],
        StmtKind::For { target, iter, .. } => vec![target, iter],
        StmtKind::Raise { exc, cause } => exc.iter().chain(cause).collect(),
        StmtKind::Assert { test, msg } => Some(test).into_iter().chain(msg).collect(),
        StmtKind::Delete(targets) => targets.iter().collect(),
        StmtKind::Try(_)
        | StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Import(_)
        | StmtKind::ImportFrom { .. }
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => Vec::new(),
    }
}

/// Nested statement blocks belonging to the same function body
fn child_blocks(stmt: &Stmt) -> Vec<&[Stmt]> {
    match &stmt.kind {
        StmtKind::If { body, orelse, .. }
        | StmtKind::While { body, orelse, .. }
        | StmtKind::For { body, orelse, .. } => vec![body, orelse],
        StmtKind::Try(t) => {
            let mut blocks: Vec<&[Stmt]> = vec![&t.body, &t.orelse, &t.finalbody];
            blocks.extend(t.handlers.iter().map(|h| h.body.as_slice()));
            blocks
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_source;

    fn first_def(source: &str) -> FunctionDef {
        let module = parse_source(source, "t.py").unwrap();
        match module.body.into_iter().next().map(|s| s.kind) {
            Some(StmtKind::FunctionDef(def)) => def,
            other => panic!("expected def, got {:?}", other),
        }
    }

    #[test]
    fn test_generator_and_coroutine_flags() {
        let gen = first_def("def g():\n    yield 1\n");
        assert!(!gen.is_async);
        assert!(function_flags(&gen).is_generator);

        let coro = first_def("async def c():\n    return 1\n");
        assert_eq!(
            function_flags(&coro),
            FunctionFlags {
                is_generator: false,
                is_coroutine: true
            }
        );

        let outer = first_def("def outer():\n    def inner():\n        yield 1\n    return inner\n");
        assert_eq!(function_flags(&outer), FunctionFlags::default());
    }

    #[test]
    fn test_may_raise_statements() {
        let module = parse_source(
            "x = 1 + 2\ny = x / 2\nz = [1][0]\nprint(x)\nraise ValueError\npass\nif x.real:\n    pass\nfor v in [1]:\n    pass\nwhile x:\n    x = x // 0\n",
            "t.py",
        )
        .unwrap();
        let flags: Vec<bool> = module.body.iter().map(may_raise).collect();
        assert_eq!(flags, vec![false, true, true, true, true, false, true, true, false]);
    }
}
