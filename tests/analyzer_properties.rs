//! End-to-end properties of the analyzer, driven from source text

use pretty_assertions::assert_eq;
use serpent::frontend::ast::{ExprKind, Module, StmtKind};
use serpent::{check, parse_source, CheckOutcome, DiagnosticKind};

fn parse(source: &str) -> Module {
    parse_source(source, "prop.py").expect("test source parses")
}

fn run(source: &str) -> CheckOutcome {
    check(&mut parse(source))
}

fn kinds(source: &str) -> Vec<DiagnosticKind> {
    run(source).diagnostics.iter().map(|d| d.kind()).collect()
}

#[test]
fn green_program_is_idempotent() {
    let source = "\
import math

class Shape:
    def __init__(self, name: str) -> None:
        self.name = name

    def area(self) -> float:
        return 0.0

class Circle(Shape):
    def __init__(self, r: float) -> None:
        super().__init__(\"circle\")
        self.r = r

    def area(self) -> float:
        return math.pi * self.r * self.r

def total(shapes: list[Shape]) -> float:
    acc = 0.0
    for s in shapes:
        acc = acc + s.area()
    return acc

print(total([Circle(1.0), Shape(\"dot\")]))
";
    let mut module = parse(source);
    let first = check(&mut module);
    assert_eq!(first.diagnostics, vec![]);
    assert!(first.ok);
    let second = check(&mut module);
    assert!(second.ok);
    assert_eq!(second.diagnostics, vec![]);
}

#[test]
fn merge_joins_branch_types() {
    let same = "def f(c: bool) -> int:\n    if c:\n        y = 1\n    else:\n        y = 2\n    return y + 1\n";
    assert!(run(same).ok);

    let different = "def f(c: bool) -> int:\n    if c:\n        y = 1\n    else:\n        y = \"a\"\n    return y + 1\n";
    assert_eq!(kinds(different), vec![DiagnosticKind::TypeMismatch]);

    let unused = "def f(c: bool) -> int:\n    if c:\n        y = 1\n    else:\n        y = \"a\"\n    return 0\n";
    assert!(run(unused).ok);
}

#[test]
fn refinement_is_sound() {
    let narrowed = "def f(x: int) -> int:\n    if isinstance(x, int):\n        return x + 1\n    else:\n        return 0\n";
    assert!(run(narrowed).ok);

    let negated = "def f(x: int) -> int:\n    if not isinstance(x, int):\n        return x + 1\n    else:\n        return 0\n";
    assert_eq!(kinds(negated), vec![DiagnosticKind::TypeMismatch]);

    let conjoined = "def f(x: int) -> int:\n    if not isinstance(x, int) and x is not None:\n        return x + 1\n    return 0\n";
    assert_eq!(kinds(conjoined), vec![DiagnosticKind::TypeMismatch]);
}

#[test]
fn optional_needs_none_check() {
    let unchecked = "def f(x: int | None) -> int:\n    return x + 1\n";
    assert_eq!(kinds(unchecked), vec![DiagnosticKind::TypeMismatch]);

    let checked = "def f(x: int | None) -> int:\n    if x is not None:\n        return x + 1\n    return 0\n";
    assert!(run(checked).ok);

    let reversed = "def f(x: int | None) -> int:\n    if None == x:\n        return 0\n    return x + 1\n";
    assert!(run(reversed).ok);
}

#[test]
fn loop_bindings_do_not_leak() {
    let source = "def f(n: int) -> int:\n    while n:\n        z = 1\n    return z\n";
    assert_eq!(kinds(source), vec![DiagnosticKind::UndefinedName]);
}

#[test]
fn scope_conflicts_are_rejected() {
    let both = "\
x = 0
def outer() -> None:
    x = 1
    def inner() -> None:
        global x
        nonlocal x
";
    assert_eq!(kinds(both), vec![DiagnosticKind::ScopeConflict]);

    let unbound = "def f() -> None:\n    def g() -> None:\n        nonlocal a\n        a = 1\n";
    assert_eq!(kinds(unbound), vec![DiagnosticKind::ScopeConflict]);

    let late = "def f() -> None:\n    y = 1\n    global y\n";
    assert_eq!(kinds(late), vec![DiagnosticKind::ScopeConflict]);
}

#[test]
fn global_needs_module_assignment() {
    let missing = "def f() -> int:\n    global counter\n    return counter\n";
    assert_eq!(
        kinds(missing),
        vec![DiagnosticKind::UndefinedName, DiagnosticKind::UndefinedName]
    );

    let function_only = "def f() -> None:\n    global x\n    x = 1\n\ndef g() -> int:\n    return x\n";
    assert_eq!(
        kinds(function_only),
        vec![DiagnosticKind::UndefinedName, DiagnosticKind::UndefinedName]
    );

    let forward = "def f() -> int:\n    global counter\n    counter = counter + 1\n    return counter\n\ncounter = 0\n";
    assert!(run(forward).ok);
}

#[test]
fn global_writes_are_checked() {
    let read_back = "x = 1\ndef f() -> int:\n    global x\n    x = \"s\"\n    return x + 1\n";
    assert_eq!(kinds(read_back), vec![DiagnosticKind::TypeMismatch]);

    let other_function = "x = 1\ndef f() -> None:\n    global x\n    x = \"s\"\ndef g() -> int:\n    return x + 1\n";
    assert_eq!(kinds(other_function), vec![DiagnosticKind::TypeMismatch]);

    let same_type = "x = 1\ndef f() -> None:\n    global x\n    x = 2\ndef g() -> int:\n    return x + 1\n";
    assert!(run(same_type).ok);
}

#[test]
fn loop_back_edge_reaches_body() {
    let source = "def f(n: int) -> int:\n    x = 1\n    while n:\n        y = x + 1\n        x = \"s\"\n    return 0\n";
    let outcome = run(source);
    assert_eq!(
        outcome.diagnostics.iter().map(|d| d.kind()).collect::<Vec<_>>(),
        vec![DiagnosticKind::TypeMismatch]
    );
    assert_eq!(outcome.diagnostics[0].line(), 4);
}

#[test]
fn nonlocal_updates_enclosing_binding() {
    let source = "\
def counter() -> int:
    n = 0
    def bump() -> None:
        nonlocal n
        n = n + 1
    bump()
    return n
";
    assert!(run(source).ok);
}

#[test]
fn class_locals_are_not_visible_to_methods() {
    let source = "\
class C:
    size = 3
    def m(self) -> int:
        return size
";
    assert_eq!(kinds(source), vec![DiagnosticKind::UndefinedName]);
}

#[test]
fn positional_only_binding() {
    let header = "def f(a: int, /, b: int) -> int:\n    return a + b\n\n";
    assert_eq!(
        kinds(&format!("{}r = f(a=1, b=2)\n", header)),
        vec![DiagnosticKind::UnexpectedOrMissingKeyword]
    );
    assert!(run(&format!("{}r = f(1, b=2)\n", header)).ok);
}

#[test]
fn passthrough_call_shares_key() {
    let source = "def id(a: int) -> int:\n    return a\n\nx = 5\ny = id(x) - x\n";
    let mut module = parse(source);
    let outcome = check(&mut module);
    assert!(outcome.ok);

    let StmtKind::Assign { value, .. } = &module.body[2].kind else {
        panic!("expected assignment");
    };
    let ExprKind::BinOp { left, right, .. } = &value.kind else {
        panic!("expected subtraction");
    };
    assert!(matches!(left.kind, ExprKind::Call { .. }));
    assert_eq!(left.canonical_key, right.canonical_key);
    assert_eq!(right.canonical_key.as_deref(), Some("int:5"));
}

#[test]
fn exception_handler_order() {
    let shadowed = "\
def f() -> None:
    try:
        pass
    except Exception:
        pass
    except ValueError:
        pass
";
    assert_eq!(kinds(shadowed), vec![DiagnosticKind::ExceptionHandlerShadowed]);

    let ordered = shadowed
        .replace("except Exception:", "except TMP:")
        .replace("except ValueError:", "except Exception:")
        .replace("except TMP:", "except ValueError:");
    assert!(run(&ordered).ok);

    let alias = "def f() -> None:\n    try:\n        pass\n    except OSError:\n        pass\n    except IOError:\n        pass\n";
    assert_eq!(kinds(alias), vec![DiagnosticKind::ExceptionHandlerShadowed]);
}

#[test]
fn raise_rules() {
    assert_eq!(kinds("raise 5\n"), vec![DiagnosticKind::ExceptionTypeInvalid]);
    assert_eq!(kinds("raise\n"), vec![DiagnosticKind::ExceptionTypeInvalid]);
    assert!(run("raise ValueError(\"bad\") from None\n").ok);

    let user = "\
class AppError(Exception):
    pass

def f() -> None:
    try:
        raise AppError(\"x\")
    except AppError as err:
        raise RuntimeError(\"wrapped\") from err
";
    assert!(run(user).ok);
}

#[test]
fn try_visibility() {
    let source = "\
def f() -> int:
    try:
        a = int(\"1\")
    except ValueError:
        a = 0
        only_handler = 1
    finally:
        done = True
    if done:
        return a
    return only_handler
";
    assert_eq!(kinds(source), vec![DiagnosticKind::UndefinedName]);
}

#[test]
fn function_flags_survive_rejection() {
    let source = "\
def gen() -> int:
    yield 1

async def co() -> None:
    await co()

def plain() -> int:
    return 1
";
    let mut module = parse(source);
    let outcome = check(&mut module);
    assert!(!outcome.ok);
    assert!(outcome.function_flags["gen"].is_generator);
    assert!(outcome.function_flags["co"].is_coroutine);
    assert!(!outcome.function_flags["plain"].is_generator);

    let StmtKind::FunctionDef(def) = &module.body[0].kind else {
        panic!("expected def");
    };
    assert!(def.flags.is_generator);
}

#[test]
fn may_raise_is_annotated() {
    let mut module = parse("a = 1\nb = a / 2\nc = [a]\nd = c[0]\ne = a + 1\n");
    check(&mut module);
    let flags: Vec<bool> = module.body.iter().map(|s| s.may_raise).collect();
    assert_eq!(flags, vec![false, true, false, true, false]);
}

#[test]
fn rejected_names() {
    for name in ["eval", "exec", "getattr", "__import__"] {
        let source = format!("{}(\"x\")\n", name);
        assert_eq!(kinds(&source), vec![DiagnosticKind::SecurityRejection], "{}", name);
    }
}

#[test]
fn huge_int_literal_is_int() {
    let source = "BIG = 123456789012345678901234567890\n\ndef f() -> int:\n    return BIG + 1\n";
    let mut module = parse(source);
    assert!(check(&mut module).ok);

    let StmtKind::Assign { value, .. } = &module.body[0].kind else {
        panic!("expected assignment");
    };
    assert!(matches!(value.kind, ExprKind::BigInt(_)));
    assert_eq!(
        value.canonical_key.as_deref(),
        Some("int:123456789012345678901234567890")
    );
}
