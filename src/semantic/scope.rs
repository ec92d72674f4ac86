//! Scope resolution
//!
//! Scopes live in a flat arena and refer to their parent and enclosing
//! function by index. Class and comprehension scopes never take part in the
//! enclosing-function chain used for closures and `nonlocal`.

use crate::utils::{Error, Result, Span};
use std::collections::{HashMap, HashSet};

/// Unique identifier for a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Class,
    Comprehension,
}

/// How a name came to be bound in a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Parameter,
    Local,
    Function,
    Class,
    Import,
    Global,
    Nonlocal,
}

/// Where a name's value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Bound in the given scope itself
    Local(ScopeId),
    /// Bound in an enclosing function scope
    Enclosing(ScopeId),
    /// Module-level name
    Global,
    /// Built-in function, type or exception
    Builtin,
}

/// A single lexical scope
#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub name: String,
    pub parent: Option<ScopeId>,
    /// Nearest enclosing Function scope, skipping classes and comprehensions
    pub enclosing_function: Option<ScopeId>,
    bindings: HashMap<String, BindingKind>,
    globals: HashSet<String>,
    nonlocals: HashMap<String, ScopeId>,
}

impl Scope {
    fn new(kind: ScopeKind, name: &str, parent: Option<ScopeId>, enclosing_function: Option<ScopeId>) -> Self {
        Self {
            kind,
            name: name.to_string(),
            parent,
            enclosing_function,
            bindings: HashMap::new(),
            globals: HashSet::new(),
            nonlocals: HashMap::new(),
        }
    }

    pub fn binding(&self, name: &str) -> Option<BindingKind> {
        self.bindings.get(name).copied()
    }
}

/// Nested scope chain with `global`/`nonlocal` enforcement
#[derive(Clone)]
pub struct ScopeResolver {
    scopes: Vec<Scope>,
    current: ScopeId,
    /// Every name assigned at module level anywhere in the module
    module_assigned: HashSet<String>,
    builtin_names: HashSet<String>,
}

impl ScopeResolver {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new(ScopeKind::Module, "<module>", None, None)],
            current: ScopeId(0),
            module_assigned: HashSet::new(),
            builtin_names: HashSet::new(),
        }
    }

    /// Register names resolvable as built-ins
    pub fn add_builtins<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.builtin_names.extend(names.into_iter().map(Into::into));
    }

    /// Record a module-level assignment found while collecting signatures
    pub fn note_module_assignment(&mut self, name: &str) {
        self.module_assigned.insert(name.to_string());
    }

    pub fn module(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn current(&self) -> ScopeId {
        self.current
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    fn nearest_function(&self, from: ScopeId) -> Option<ScopeId> {
        let mut next = Some(from);
        while let Some(id) = next {
            let scope = &self.scopes[id.0];
            if scope.kind == ScopeKind::Function {
                return Some(id);
            }
            next = scope.parent;
        }
        None
    }

    fn enter(&mut self, kind: ScopeKind, name: &str) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        let enclosing = self.nearest_function(self.current);
        self.scopes
            .push(Scope::new(kind, name, Some(self.current), enclosing));
        self.current = id;
        id
    }

    pub fn enter_function(&mut self, name: &str) -> ScopeId {
        self.enter(ScopeKind::Function, name)
    }

    pub fn enter_class(&mut self, name: &str) -> ScopeId {
        self.enter(ScopeKind::Class, name)
    }

    pub fn enter_comprehension(&mut self) -> ScopeId {
        self.enter(ScopeKind::Comprehension, "<comprehension>")
    }

    /// Make an existing scope current again, for bodies walked after their parent
    pub fn reenter(&mut self, id: ScopeId) {
        self.current = id;
    }

    /// Exit the current scope
    pub fn leave(&mut self) {
        if let Some(parent) = self.scopes[self.current.0].parent {
            self.current = parent;
        }
    }

    // ==================== Declarations ====================

    /// Declare `name` in `scope`; returns where writes to it go
    pub fn declare(&mut self, scope: ScopeId, name: &str, kind: BindingKind, span: Span) -> Result<Resolution> {
        match kind {
            BindingKind::Global => return self.declare_global(scope, name, span),
            BindingKind::Nonlocal => return self.declare_nonlocal(scope, name, span),
            _ => {}
        }

        let entry = &mut self.scopes[scope.0];
        match entry.kind {
            ScopeKind::Module => {
                entry.bindings.insert(name.to_string(), kind);
                self.module_assigned.insert(name.to_string());
                Ok(Resolution::Global)
            }
            _ => {
                if let Some(target) = entry.nonlocals.get(name) {
                    return Ok(Resolution::Enclosing(*target));
                }
                if entry.globals.contains(name) {
                    return Ok(Resolution::Global);
                }
                entry.bindings.insert(name.to_string(), kind);
                Ok(Resolution::Local(scope))
            }
        }
    }

    fn declare_global(&mut self, scope: ScopeId, name: &str, span: Span) -> Result<Resolution> {
        let entry = &self.scopes[scope.0];
        if entry.kind == ScopeKind::Module {
            return Ok(Resolution::Global);
        }
        if entry.nonlocals.contains_key(name) {
            return Err(conflict(format!("name '{}' is nonlocal and global", name), span));
        }
        match entry.bindings.get(name) {
            Some(BindingKind::Parameter) => {
                return Err(conflict(format!("name '{}' is parameter and global", name), span))
            }
            Some(_) => {
                return Err(conflict(
                    format!("name '{}' is assigned to before global declaration", name),
                    span,
                ))
            }
            None => {}
        }
        self.scopes[scope.0].globals.insert(name.to_string());
        // recorded even when rejected; later writes still target module scope
        if !self.module_assigned.contains(name) {
            return Err(Error::UndefinedName {
                name: name.to_string(),
                span,
            });
        }
        Ok(Resolution::Global)
    }

    fn declare_nonlocal(&mut self, scope: ScopeId, name: &str, span: Span) -> Result<Resolution> {
        let entry = &self.scopes[scope.0];
        match entry.kind {
            ScopeKind::Function => {}
            ScopeKind::Module => {
                return Err(conflict("nonlocal declaration not allowed at module level", span))
            }
            _ => {
                return Err(conflict(
                    "nonlocal declaration not allowed outside a function body",
                    span,
                ))
            }
        }
        if entry.globals.contains(name) {
            return Err(conflict(format!("name '{}' is nonlocal and global", name), span));
        }
        match entry.bindings.get(name) {
            Some(BindingKind::Parameter) => {
                return Err(conflict(format!("name '{}' is parameter and nonlocal", name), span))
            }
            Some(_) => {
                return Err(conflict(
                    format!("name '{}' is assigned to before nonlocal declaration", name),
                    span,
                ))
            }
            None => {}
        }

        let mut next = entry.enclosing_function;
        let mut target = None;
        while let Some(id) = next {
            let outer = &self.scopes[id.0];
            if outer.globals.contains(name) {
                return Err(conflict(
                    format!(
                        "no binding for nonlocal '{}' found: it is declared global in enclosing function '{}'",
                        name, outer.name
                    ),
                    span,
                ));
            }
            if let Some(t) = outer.nonlocals.get(name) {
                target = Some(*t);
                break;
            }
            if outer.bindings.contains_key(name) {
                target = Some(id);
                break;
            }
            next = outer.enclosing_function;
        }

        let Some(target) = target else {
            return Err(conflict(format!("no binding for nonlocal '{}' found", name), span));
        };
        self.scopes[scope.0]
            .nonlocals
            .insert(name.to_string(), target);
        Ok(Resolution::Enclosing(target))
    }

    // ==================== Resolution ====================

    /// Resolve a read of `name` from `scope`
    pub fn resolve(&self, scope: ScopeId, name: &str, span: Span) -> Result<Resolution> {
        let entry = &self.scopes[scope.0];
        match entry.kind {
            ScopeKind::Module => self.resolve_global(name, span),
            ScopeKind::Comprehension => {
                if entry.bindings.contains_key(name) {
                    return Ok(Resolution::Local(scope));
                }
                match entry.parent {
                    Some(parent) => self.resolve(parent, name, span),
                    None => self.resolve_global(name, span),
                }
            }
            ScopeKind::Class => {
                if entry.bindings.contains_key(name) {
                    return Ok(Resolution::Local(scope));
                }
                if entry.globals.contains(name) {
                    return self.resolve_global(name, span);
                }
                self.resolve_enclosing(entry.enclosing_function, name, span)
            }
            ScopeKind::Function => {
                if let Some(target) = entry.nonlocals.get(name) {
                    return Ok(Resolution::Enclosing(*target));
                }
                if entry.globals.contains(name) {
                    return self.resolve_global(name, span);
                }
                if entry.bindings.contains_key(name) {
                    return Ok(Resolution::Local(scope));
                }
                self.resolve_enclosing(entry.enclosing_function, name, span)
            }
        }
    }

    fn resolve_enclosing(&self, mut next: Option<ScopeId>, name: &str, span: Span) -> Result<Resolution> {
        while let Some(id) = next {
            let outer = &self.scopes[id.0];
            if outer.globals.contains(name) {
                return self.resolve_global(name, span);
            }
            if let Some(target) = outer.nonlocals.get(name) {
                return Ok(Resolution::Enclosing(*target));
            }
            if outer.bindings.contains_key(name) {
                return Ok(Resolution::Enclosing(id));
            }
            next = outer.enclosing_function;
        }
        self.resolve_global(name, span)
    }

    fn resolve_global(&self, name: &str, span: Span) -> Result<Resolution> {
        if self.module_assigned.contains(name) {
            Ok(Resolution::Global)
        } else if self.builtin_names.contains(name) {
            Ok(Resolution::Builtin)
        } else {
            Err(Error::UndefinedName {
                name: name.to_string(),
                span,
            })
        }
    }
}

impl Default for ScopeResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn conflict(message: impl Into<String>, span: Span) -> Error {
    Error::ScopeConflict {
        message: message.into(),
        span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp() -> Span {
        Span::dummy()
    }

    #[test]
    fn test_function_locals_and_globals() {
        let mut scopes = ScopeResolver::new();
        let module = scopes.module();
        scopes.declare(module, "counter", BindingKind::Local, sp()).unwrap();
        let f = scopes.enter_function("f");

        assert_eq!(scopes.resolve(f, "counter", sp()).unwrap(), Resolution::Global);
        scopes.declare(f, "tmp", BindingKind::Local, sp()).unwrap();
        assert_eq!(scopes.resolve(f, "tmp", sp()).unwrap(), Resolution::Local(f));
        assert!(matches!(
            scopes.resolve(f, "missing", sp()),
            Err(Error::UndefinedName { .. })
        ));
    }

    #[test]
    fn test_global_declaration_redirects_writes() {
        let mut scopes = ScopeResolver::new();
        scopes.note_module_assignment("total");
        let f = scopes.enter_function("f");
        scopes.declare(f, "total", BindingKind::Global, sp()).unwrap();
        assert_eq!(
            scopes.declare(f, "total", BindingKind::Local, sp()).unwrap(),
            Resolution::Global
        );
    }

    #[test]
    fn test_global_requires_module_assignment() {
        let mut scopes = ScopeResolver::new();
        let f = scopes.enter_function("f");
        assert!(matches!(
            scopes.declare(f, "late", BindingKind::Global, sp()),
            Err(Error::UndefinedName { .. })
        ));
        assert_eq!(
            scopes.declare(f, "late", BindingKind::Local, sp()).unwrap(),
            Resolution::Global
        );
        let g = scopes.enter_function("g");
        assert!(matches!(
            scopes.resolve(g, "late", sp()),
            Err(Error::UndefinedName { .. })
        ));
    }

    #[test]
    fn test_global_after_assignment_conflicts() {
        let mut scopes = ScopeResolver::new();
        let f = scopes.enter_function("f");
        scopes.declare(f, "x", BindingKind::Local, sp()).unwrap();
        assert!(matches!(
            scopes.declare(f, "x", BindingKind::Global, sp()),
            Err(Error::ScopeConflict { .. })
        ));
    }

    #[test]
    fn test_global_and_nonlocal_conflict() {
        let mut scopes = ScopeResolver::new();
        let outer = scopes.enter_function("outer");
        scopes.declare(outer, "x", BindingKind::Local, sp()).unwrap();
        scopes.note_module_assignment("x");
        let inner = scopes.enter_function("inner");
        scopes.declare(inner, "x", BindingKind::Global, sp()).unwrap();
        assert!(matches!(
            scopes.declare(inner, "x", BindingKind::Nonlocal, sp()),
            Err(Error::ScopeConflict { .. })
        ));
    }

    #[test]
    fn test_nonlocal_requires_enclosing_function_binding() {
        let mut scopes = ScopeResolver::new();
        let module = scopes.module();
        scopes.declare(module, "a", BindingKind::Local, sp()).unwrap();
        let f = scopes.enter_function("f");
        assert!(matches!(
            scopes.declare(f, "a", BindingKind::Nonlocal, sp()),
            Err(Error::ScopeConflict { .. })
        ));
        assert!(matches!(
            scopes.declare(module, "a", BindingKind::Nonlocal, sp()),
            Err(Error::ScopeConflict { .. })
        ));
    }

    #[test]
    fn test_nonlocal_skips_class_scopes() {
        let mut scopes = ScopeResolver::new();
        let outer = scopes.enter_function("outer");
        scopes.declare(outer, "n", BindingKind::Parameter, sp()).unwrap();
        let class = scopes.enter_class("Holder");
        scopes.declare(class, "n", BindingKind::Local, sp()).unwrap();
        let method = scopes.enter_function("method");
        assert_eq!(
            scopes.declare(method, "n", BindingKind::Nonlocal, sp()).unwrap(),
            Resolution::Enclosing(outer)
        );
    }

    #[test]
    fn test_nonlocal_cannot_cross_global() {
        let mut scopes = ScopeResolver::new();
        let a = scopes.enter_function("a");
        scopes.declare(a, "v", BindingKind::Local, sp()).unwrap();
        scopes.note_module_assignment("v");
        let b = scopes.enter_function("b");
        scopes.declare(b, "v", BindingKind::Global, sp()).unwrap();
        let c = scopes.enter_function("c");
        assert!(matches!(
            scopes.declare(c, "v", BindingKind::Nonlocal, sp()),
            Err(Error::ScopeConflict { .. })
        ));
    }

    #[test]
    fn test_class_locals_invisible_to_methods() {
        let mut scopes = ScopeResolver::new();
        let class = scopes.enter_class("C");
        scopes.declare(class, "attr", BindingKind::Local, sp()).unwrap();
        assert_eq!(scopes.resolve(class, "attr", sp()).unwrap(), Resolution::Local(class));
        let method = scopes.enter_function("m");
        assert!(scopes.resolve(method, "attr", sp()).is_err());
    }

    #[test]
    fn test_comprehension_targets_shadow() {
        let mut scopes = ScopeResolver::new();
        scopes.add_builtins(["len"]);
        let f = scopes.enter_function("f");
        scopes.declare(f, "x", BindingKind::Local, sp()).unwrap();
        let comp = scopes.enter_comprehension();
        scopes.declare(comp, "x", BindingKind::Local, sp()).unwrap();
        assert_eq!(scopes.resolve(comp, "x", sp()).unwrap(), Resolution::Local(comp));
        assert_eq!(scopes.resolve(comp, "len", sp()).unwrap(), Resolution::Builtin);
        scopes.leave();
        assert_eq!(scopes.current(), f);
        assert_eq!(scopes.resolve(f, "x", sp()).unwrap(), Resolution::Local(f));
    }
}
