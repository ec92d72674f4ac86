//! Statement walker
//!
//! Drives the analysis of a module: collects signatures, walks the module
//! body and then every function body, threading a flow-sensitive
//! environment through each statement and merging it at join points.

use super::collect::{self, ClassTable, Signatures};
use super::diagnostic::Diagnostic;
use super::effects;
use super::env::{merge_all, Binding, CallTarget, Environment};
use super::exceptions::HandlerClause;
use super::operators;
use super::refine::refine;
use super::scope::{BindingKind, Resolution, ScopeId, ScopeResolver};
use super::{CheckOptions, CheckOutcome};
use crate::frontend::ast::{
    assigned_names, declares_global, target_names, ClassDef, Expr, ExprKind, FunctionDef, FunctionFlags, Module,
    ParamKind, Stmt, StmtKind, TryStmt,
};
use crate::stdlib::builtins::{BuiltinRegistry, TYPE_NAMES};
use crate::types::{accepts, TypeInfo, TypeSet, TypeTag};
use crate::utils::{Error, Result, Span};
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FrameKind {
    Module,
    Function,
    Class,
}

/// Environments reaching the exits of the innermost loop
#[derive(Debug, Default)]
struct LoopState {
    breaks: Vec<Environment>,
    continues: Vec<Environment>,
}

/// Per-body walking state
#[derive(Debug)]
pub(super) struct Frame {
    pub(super) kind: FrameKind,
    pub(super) scope: ScopeId,
    pub(super) env: Environment,
    pub(super) qualname: String,
    /// Receiver class of a method body, or the class of a class body
    pub(super) class: Option<String>,
    ret: Option<TypeInfo>,
    /// Annotated names keep their declared type
    declared: HashMap<String, TypeInfo>,
    except_depth: usize,
    loops: Vec<LoopState>,
}

impl Frame {
    fn new(kind: FrameKind, scope: ScopeId, qualname: &str) -> Self {
        Self {
            kind,
            scope,
            env: Environment::new(),
            qualname: qualname.to_string(),
            class: None,
            ret: None,
            declared: HashMap::new(),
            except_depth: 0,
            loops: Vec::new(),
        }
    }
}

/// An evaluated expression
#[derive(Debug, Clone)]
pub(super) struct Value {
    pub(super) info: TypeInfo,
    pub(super) key: Option<String>,
    pub(super) target: Option<CallTarget>,
}

impl Value {
    pub(super) fn new(info: TypeInfo) -> Self {
        Self {
            info,
            key: None,
            target: None,
        }
    }

    pub(super) fn unknown() -> Self {
        Self::new(TypeInfo::unknown())
    }

    pub(super) fn pure(info: TypeInfo, key: String) -> Self {
        Self {
            info,
            key: Some(key),
            target: None,
        }
    }

    pub(super) fn callable(target: CallTarget) -> Self {
        Self {
            info: TypeInfo::of(TypeTag::Callable),
            key: None,
            target: Some(target),
        }
    }

    pub(super) fn from_binding(binding: &Binding) -> Self {
        Self {
            info: binding.info.clone(),
            key: binding.canonical.clone(),
            target: binding.target.clone(),
        }
    }
}

/// The analyzer state for one module
pub struct Walker {
    file: String,
    options: CheckOptions,
    pub(super) scopes: ScopeResolver,
    pub(super) classes: ClassTable,
    pub(super) signatures: Signatures,
    pub(super) builtins: BuiltinRegistry,
    /// Join of every module-level assignment, read by function bodies
    module_globals: Environment,
    module_done: bool,
    /// Inside a pass whose diagnostics are discarded
    speculating: bool,
    pub(super) frame: Frame,
    outer: Vec<Frame>,
    diagnostics: Vec<Diagnostic>,
    function_flags: BTreeMap<String, FunctionFlags>,
    next_key: usize,
    class_scopes: HashMap<usize, ScopeId>,
}

impl Walker {
    pub fn new(file: &str, options: CheckOptions) -> Self {
        let builtins = BuiltinRegistry::new();
        let classes = ClassTable::new();
        let mut scopes = ScopeResolver::new();
        scopes.add_builtins(
            builtins
                .all()
                .filter(|f| f.module == "builtins")
                .map(|f| f.name.clone()),
        );
        scopes.add_builtins(TYPE_NAMES.iter().copied());
        scopes.add_builtins(classes.exceptions().builtin_names().map(str::to_string));
        scopes.add_builtins(["super"]);
        let module_scope = scopes.module();

        Self {
            file: file.to_string(),
            options,
            scopes,
            classes,
            signatures: Signatures::new(),
            builtins,
            module_globals: Environment::new(),
            module_done: false,
            speculating: false,
            frame: Frame::new(FrameKind::Module, module_scope, ""),
            outer: Vec::new(),
            diagnostics: Vec::new(),
            function_flags: BTreeMap::new(),
            next_key: 0,
            class_scopes: HashMap::new(),
        }
    }

    /// Check a whole module, annotating it in place
    pub fn run(mut self, module: &mut Module) -> CheckOutcome {
        debug!("checking {}", module.file);
        let collected = collect::collect_module(module, self.options.strict_annotations);
        self.classes = collected.classes;
        self.signatures = collected.signatures;
        for err in collected.errors {
            self.report(err);
        }
        for name in assigned_names(&module.body) {
            self.scopes.note_module_assignment(&name);
        }

        debug!("walking module body of {}", module.file);
        self.walk_module_body(&mut module.body);
        self.module_done = true;

        if declares_global(&module.body) {
            // writes through `global` in any function reach reads in every other
            debug!("collecting global writes of {}", module.file);
            self.speculate(|walker| walker.walk_deferred(&mut module.body));
        }
        debug!("walking function bodies of {}", module.file);
        self.walk_deferred(&mut module.body);

        let mut diagnostics = self.diagnostics;
        diagnostics.sort_by_key(|d| (d.line(), d.col()));
        debug!("{}: {} diagnostic(s)", module.file, diagnostics.len());
        CheckOutcome {
            ok: diagnostics.is_empty(),
            diagnostics,
            function_flags: self.function_flags,
        }
    }

    // ==================== Bookkeeping ====================

    pub(super) fn report(&mut self, err: Error) {
        trace!("diagnostic: {}", err);
        self.diagnostics.push(Diagnostic::from_error(&err, &self.file));
    }

    /// Run `f` keeping only its effect on environments; diagnostics,
    /// scopes and definitions it creates are rolled back
    fn speculate<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let reported = self.diagnostics.len();
        let scopes = self.scopes.clone();
        let signatures = self.signatures.clone();
        let classes = self.classes.clone();
        let was = std::mem::replace(&mut self.speculating, true);
        let out = f(self);
        self.speculating = was;
        self.diagnostics.truncate(reported);
        self.scopes = scopes;
        self.signatures = signatures;
        self.classes = classes;
        out
    }

    pub(super) fn env(&self) -> &Environment {
        &self.frame.env
    }

    pub(super) fn env_mut(&mut self) -> &mut Environment {
        &mut self.frame.env
    }

    /// Install `env` as the current environment, returning the previous one
    pub(super) fn replace_env(&mut self, env: Environment) -> Environment {
        std::mem::replace(&mut self.frame.env, env)
    }

    /// Evaluate with a temporary environment
    pub(super) fn with_env<T>(&mut self, env: Environment, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = self.replace_env(env);
        let out = f(self);
        self.replace_env(saved);
        out
    }

    fn push_frame(&mut self, frame: Frame) {
        let outer = std::mem::replace(&mut self.frame, frame);
        self.outer.push(outer);
    }

    fn pop_frame(&mut self) {
        let base = match self.outer.pop() {
            Some(frame) => frame,
            None => Frame::new(FrameKind::Module, self.scopes.module(), ""),
        };
        self.frame = base;
    }

    fn module_frame(&self) -> &Frame {
        self.outer.first().unwrap_or(&self.frame)
    }

    fn frame_for_scope(&mut self, scope: ScopeId) -> Option<&mut Frame> {
        if self.frame.scope == scope {
            return Some(&mut self.frame);
        }
        self.outer.iter_mut().rev().find(|f| f.scope == scope)
    }

    pub(super) fn fresh_key(&mut self, name: &str) -> String {
        self.next_key += 1;
        format!("{}#{}", name, self.next_key)
    }

    fn qualify(&self, name: &str) -> String {
        if self.frame.qualname.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.frame.qualname, name)
        }
    }

    // ==================== Names ====================

    /// Read a name at the current point
    pub(super) fn read_name(&mut self, name: &str, span: Span) -> Result<Value> {
        if BuiltinRegistry::is_rejected(name) {
            return Err(Error::SecurityRejection {
                name: name.to_string(),
                span,
            });
        }
        let undefined = || Error::UndefinedName {
            name: name.to_string(),
            span,
        };
        match self.scopes.resolve(self.scopes.current(), name, span)? {
            Resolution::Local(_) => self.env().get(name).map(Value::from_binding).ok_or_else(undefined),
            Resolution::Enclosing(scope) => Ok(self
                .frame_for_scope(scope)
                .and_then(|f| f.env.get(name))
                .map(Value::from_binding)
                .unwrap_or_else(Value::unknown)),
            Resolution::Global if self.module_done => Ok(self
                .module_globals
                .get(name)
                .map(Value::from_binding)
                .unwrap_or_else(Value::unknown)),
            Resolution::Global => self
                .module_frame()
                .env
                .get(name)
                .map(Value::from_binding)
                .ok_or_else(undefined),
            Resolution::Builtin => Ok(self.builtin_value(name)),
        }
    }

    fn builtin_value(&self, name: &str) -> Value {
        if TYPE_NAMES.contains(&name) {
            Value {
                info: TypeInfo::of(TypeTag::Class(name.to_string())),
                key: None,
                target: Some(CallTarget::Builtin("builtins".into(), name.to_string())),
            }
        } else if self.classes.is_exception(name) {
            let canonical = self.classes.exceptions().canonical(name).to_string();
            Value::new(TypeInfo::of(TypeTag::Class(canonical)))
        } else if self.builtins.get("builtins", name).is_some() {
            Value::callable(CallTarget::Builtin("builtins".into(), name.to_string()))
        } else {
            Value::new(TypeInfo::of(TypeTag::Callable))
        }
    }

    /// Bind `name` in the current scope
    pub(super) fn bind_name(&mut self, name: &str, value: Value, kind: BindingKind, span: Span) -> Result<()> {
        let scope = self.scopes.current();
        let resolution = self.scopes.declare(scope, name, kind, span)?;
        let mut binding = Binding {
            info: value.info,
            canonical: value.key,
            target: value.target,
        };

        let declared = match resolution {
            Resolution::Local(scope) if scope == self.frame.scope => self.frame.declared.get(name).cloned(),
            Resolution::Global => self.module_frame().declared.get(name).cloned(),
            _ => None,
        };
        // the name stays bound with its declared type even when the value is rejected
        let mut mismatch = None;
        if let Some(declared) = declared {
            if !accepts(&declared, &binding.info, &self.classes) {
                mismatch = Some(Error::type_mismatch(
                    format!("assignment to '{}'", name),
                    &declared,
                    &binding.info,
                    span,
                ));
            }
            binding.info = declared;
        }

        match resolution {
            Resolution::Local(_) => self.env_mut().bind(name, binding),
            Resolution::Global => {
                let joined = match self.module_globals.get(name) {
                    Some(existing) => existing.join(&binding),
                    None => binding.clone(),
                };
                self.module_globals.bind(name, joined);
                if self.frame.kind == FrameKind::Module {
                    self.env_mut().bind(name, binding);
                }
            }
            Resolution::Enclosing(target) => {
                if let Some(frame) = self.frame_for_scope(target) {
                    let joined = match frame.env.get(name) {
                        Some(existing) => existing.join(&binding),
                        None => binding,
                    };
                    frame.env.bind(name, joined);
                }
            }
            Resolution::Builtin => {}
        }
        match mismatch {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Assign an evaluated value to a target expression
    pub(super) fn assign_target(&mut self, target: &mut Expr, value: Value) {
        let span = target.span;
        target.ty = Some(value.info.set.clone());
        match &mut target.kind {
            ExprKind::Name(name) => {
                let key = match &value.key {
                    Some(key) => key.clone(),
                    None => self.fresh_key(name),
                };
                target.canonical_key = Some(key.clone());
                let value = Value {
                    key: Some(key),
                    ..value
                };
                if let Err(err) = self.bind_name(name, value, BindingKind::Local, span) {
                    self.report(err);
                }
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let parts = match self.unpack(&value.info, items.len(), span) {
                    Ok(parts) => parts,
                    Err(err) => {
                        self.report(err);
                        vec![TypeSet::unknown(); items.len()]
                    }
                };
                for (item, set) in items.iter_mut().zip(parts) {
                    self.assign_target(item, Value::new(TypeInfo::from_set(set)));
                }
            }
            ExprKind::Starred(inner) => {
                self.report(Error::unsupported("starred assignment target", span));
                self.assign_target(inner, Value::unknown());
            }
            ExprKind::Attribute { value: receiver, attr } => {
                let receiver = self.eval(receiver);
                if let Err(err) = self.check_attribute_store(&receiver.info, attr, &value.info, span) {
                    self.report(err);
                }
            }
            ExprKind::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container);
                let index = self.eval(index);
                if let Err(err) = self.check_item_store(&container.info, &index.info, &value.info, span) {
                    self.report(err);
                }
            }
            _ => self.report(Error::InvalidTarget {
                what: "expression".into(),
                span,
            }),
        }
    }

    /// Element types when unpacking `info` into `count` targets
    fn unpack(&self, info: &TypeInfo, count: usize, span: Span) -> Result<Vec<TypeSet>> {
        if info.is_unknown() {
            return Ok(vec![TypeSet::unknown(); count]);
        }
        if let Some(items) = &info.items {
            if items.len() != count {
                return Err(Error::type_mismatch(
                    "unpacking",
                    format!("{} values", count),
                    format!("{} values", items.len()),
                    span,
                ));
            }
            return Ok(items.clone());
        }
        let element = self.iteration_element(info, span)?;
        Ok(vec![element; count])
    }

    /// Element type produced by iterating over `info`
    pub(super) fn iteration_element(&self, info: &TypeInfo, span: Span) -> Result<TypeSet> {
        if info.contradicted {
            return Err(Error::type_mismatch("iteration", "a reachable value", info, span));
        }
        if info.is_unknown() {
            return Ok(TypeSet::unknown());
        }
        match info.single() {
            Some(tag) if tag.is_container() || matches!(tag, TypeTag::Str | TypeTag::Bytes) => {
                Ok(info.element())
            }
            _ => Err(Error::type_mismatch("iteration", "an iterable", info, span)),
        }
    }

    fn check_item_store(&self, container: &TypeInfo, index: &TypeInfo, value: &TypeInfo, span: Span) -> Result<()> {
        if container.is_unknown() {
            return Ok(());
        }
        let check_part = |declared: &Option<TypeSet>, actual: &TypeInfo, what: &str| match declared {
            Some(declared) if !accepts(&TypeInfo::from_set(declared.clone()), actual, &self.classes) => {
                Err(Error::type_mismatch(what.to_string(), declared, &actual.set, span))
            }
            _ => Ok(()),
        };
        match container.single() {
            Some(TypeTag::List) if !container.contradicted => {
                operators::subscript(container, operators::Index::Item(index, None), &self.classes, span)?;
                check_part(&container.elem, value, "list item assignment")
            }
            Some(TypeTag::Dict) if !container.contradicted => {
                check_part(&container.key, index, "dict key")?;
                check_part(&container.elem, value, "dict value assignment")
            }
            _ => Err(Error::type_mismatch(
                "item assignment",
                "a list or dict",
                container,
                span,
            )),
        }
    }

    // ==================== Module and definitions ====================

    fn walk_module_body(&mut self, body: &mut [Stmt]) {
        for (index, stmt) in body.iter_mut().enumerate() {
            stmt.may_raise = effects::may_raise(stmt);
            match &mut stmt.kind {
                StmtKind::FunctionDef(def) => self.define_function(def, false),
                StmtKind::ClassDef(class) => {
                    let scope = self.walk_class(class, false);
                    self.class_scopes.insert(index, scope);
                }
                _ => {
                    self.walk_stmt(stmt);
                }
            }
        }
    }

    /// Walk top-level function bodies and the methods of top-level classes
    fn walk_deferred(&mut self, body: &mut [Stmt]) {
        let module_scope = self.scopes.module();
        for (index, stmt) in body.iter_mut().enumerate() {
            match &mut stmt.kind {
                StmtKind::FunctionDef(def) => {
                    self.scopes.reenter(module_scope);
                    let qualname = def.name.clone();
                    self.walk_function(def, &qualname, None);
                }
                StmtKind::ClassDef(class) => {
                    let Some(&class_scope) = self.class_scopes.get(&index) else {
                        continue;
                    };
                    let class_name = class.name.clone();
                    for member in class.body.iter_mut() {
                        if let StmtKind::FunctionDef(def) = &mut member.kind {
                            self.scopes.reenter(class_scope);
                            let qualname = format!("{}.{}", class_name, def.name);
                            self.walk_function(def, &qualname, Some(class_name.clone()));
                        }
                    }
                }
                _ => {}
            }
        }
        self.scopes.reenter(module_scope);
    }

    /// Handle a `def` statement; the body is walked now or left for later
    fn define_function(&mut self, def: &mut FunctionDef, walk_body: bool) {
        let qualname = self.qualify(&def.name);
        let owner = match self.frame.kind {
            FrameKind::Class => self.frame.class.clone(),
            _ => None,
        };

        let flags = effects::function_flags(def);
        def.flags = flags;
        self.function_flags.insert(qualname.clone(), flags);

        for decorator in &def.decorators {
            self.report(Error::unsupported("decorator", decorator.span));
        }
        if def.is_async {
            self.report(Error::unsupported(format!("coroutine function '{}'", def.name), def.span));
        }

        if !self.signatures.contains_key(&qualname) {
            let (sig, errors) = collect::function_signature(
                def,
                &qualname,
                owner.as_deref(),
                &self.classes,
                self.options.strict_annotations,
            );
            for err in errors {
                self.report(err);
            }
            self.signatures.insert(qualname.clone(), sig);
        }

        let params = self
            .signatures
            .get(&qualname)
            .map(|s| s.params.clone())
            .unwrap_or_default();
        for (param, declared) in def.params.iter_mut().zip(params) {
            let Some(default) = param.default.as_mut() else {
                continue;
            };
            let value = self.eval(default);
            if !accepts(&declared.ty, &value.info, &self.classes) {
                self.report(Error::type_mismatch(
                    format!("default for parameter '{}'", param.name),
                    &declared.ty,
                    &value.info,
                    default.span,
                ));
            }
        }

        let binding = Value::callable(CallTarget::User(qualname.clone()));
        if let Err(err) = self.bind_name(&def.name, binding, BindingKind::Function, def.span) {
            self.report(err);
        }

        if walk_body {
            self.walk_function(def, &qualname, owner);
        }
    }

    fn walk_function(&mut self, def: &mut FunctionDef, qualname: &str, owner: Option<String>) {
        let Some(sig) = self.signatures.get(qualname).cloned() else {
            return;
        };
        debug!("walking function {}", qualname);
        let saved_scope = self.scopes.current();
        let scope = self.scopes.enter_function(&def.name);

        let mut frame = Frame::new(FrameKind::Function, scope, qualname);
        frame.ret = Some(sig.ret.clone());
        frame.class = owner;
        self.push_frame(frame);

        for (param, declared) in def.params.iter().zip(&sig.params) {
            let info = match param.kind {
                ParamKind::VarArgs => TypeInfo {
                    elem: Some(declared.ty.set.clone()),
                    ..TypeInfo::of(TypeTag::Tuple)
                },
                ParamKind::KwVarArgs => TypeInfo::dict_of(TypeSet::single(TypeTag::Str), declared.ty.set.clone()),
                _ => {
                    if param.annotation.is_some() {
                        self.frame.declared.insert(param.name.clone(), declared.ty.clone());
                    }
                    declared.ty.clone()
                }
            };
            if let Err(err) = self.scopes.declare(scope, &param.name, BindingKind::Parameter, param.span) {
                self.report(err);
            }
            let key = format!("param:{}.{}", qualname, param.name);
            self.env_mut().bind(&param.name, Binding::new(info, Some(key)));
        }

        self.walk_block(&mut def.body);

        self.pop_frame();
        self.scopes.reenter(saved_scope);
    }

    /// Handle a `class` statement; returns the class scope
    fn walk_class(&mut self, class: &mut ClassDef, walk_methods: bool) -> ScopeId {
        let qualname = self.qualify(&class.name);
        for decorator in &class.decorators {
            self.report(Error::unsupported("class decorator", decorator.span));
        }

        let collected = self
            .classes
            .get(&class.name)
            .is_some_and(|c| c.qualname == qualname);
        if !collected {
            let mut errors = collect::declare_class(&mut self.classes, class, &qualname);
            errors.extend(collect::collect_members(
                &mut self.classes,
                &mut self.signatures,
                class,
                self.options.strict_annotations,
            ));
            for err in errors {
                self.report(err);
            }
        }

        for base in class.bases.iter_mut() {
            self.eval(base);
        }
        let value = Value::new(TypeInfo::of(TypeTag::Class(class.name.clone())));
        if let Err(err) = self.bind_name(&class.name, value, BindingKind::Class, class.span) {
            self.report(err);
        }

        debug!("walking class body {}", qualname);
        let scope = self.scopes.enter_class(&class.name);
        let mut frame = Frame::new(FrameKind::Class, scope, &qualname);
        frame.class = Some(class.name.clone());
        self.push_frame(frame);

        for stmt in class.body.iter_mut() {
            stmt.may_raise = effects::may_raise(stmt);
            match &mut stmt.kind {
                StmtKind::FunctionDef(def) => self.define_function(def, walk_methods),
                _ => {
                    self.walk_stmt(stmt);
                }
            }
        }

        self.pop_frame();
        self.scopes.leave();
        scope
    }

    // ==================== Statements ====================

    /// Walk a block; returns whether control can fall off its end
    pub(super) fn walk_block(&mut self, body: &mut [Stmt]) -> bool {
        let mut live = true;
        for stmt in body.iter_mut() {
            if !self.walk_stmt(stmt) {
                live = false;
            }
        }
        live
    }

    /// Walk one statement; returns whether control falls through it
    fn walk_stmt(&mut self, stmt: &mut Stmt) -> bool {
        stmt.may_raise = effects::may_raise(stmt);
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::FunctionDef(def) => {
                self.define_function(def, true);
                true
            }
            StmtKind::ClassDef(class) => {
                self.walk_class(class, true);
                true
            }
            StmtKind::Return(value) => {
                self.walk_return(value.as_mut(), span);
                false
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value);
                for target in targets.iter_mut() {
                    self.assign_target(target, value.clone());
                }
                true
            }
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => {
                self.walk_ann_assign(target, annotation, value.as_mut(), span);
                true
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval(target);
                let rhs = self.eval(value);
                let info = match operators::binary(*op, &current.info, &rhs.info, span) {
                    Ok(info) => info,
                    Err(err) => {
                        self.report(err);
                        TypeInfo::unknown()
                    }
                };
                self.assign_target(target, Value::new(info));
                true
            }
            StmtKind::Expr(value) => {
                self.eval(value);
                true
            }
            StmtKind::If { test, body, orelse } => self.walk_if(test, body, orelse),
            StmtKind::While { test, body, orelse } => self.walk_while(test, body, orelse),
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => self.walk_for(target, iter, body, orelse),
            StmtKind::Try(t) => self.walk_try(t),
            StmtKind::Raise { exc, cause } => {
                self.walk_raise(exc.as_mut(), cause.as_mut(), span);
                false
            }
            StmtKind::Assert { test, msg } => {
                self.eval(test);
                if let Some(msg) = msg {
                    self.eval(msg);
                }
                let narrowed = refine(test, self.env(), &self.classes).then.apply(self.env());
                self.replace_env(narrowed);
                true
            }
            StmtKind::Delete(targets) => {
                for target in targets.iter_mut() {
                    self.walk_delete(target);
                }
                true
            }
            StmtKind::Global(names) => {
                self.declare_all(names, BindingKind::Global, span);
                true
            }
            StmtKind::Nonlocal(names) => {
                self.declare_all(names, BindingKind::Nonlocal, span);
                true
            }
            StmtKind::Import(aliases) => {
                for alias in aliases.iter() {
                    if !self.builtins.has_module(&alias.name) {
                        self.report(Error::unsupported(format!("import of unknown module '{}'", alias.name), span));
                        continue;
                    }
                    let value = Value::new(TypeInfo::of(TypeTag::Module(alias.name.clone())));
                    if let Err(err) = self.bind_name(alias.bound_name(), value, BindingKind::Import, span) {
                        self.report(err);
                    }
                }
                true
            }
            StmtKind::ImportFrom { module, names } => {
                if !self.builtins.has_module(module) {
                    self.report(Error::unsupported(format!("import of unknown module '{}'", module), span));
                    return true;
                }
                for alias in names.iter() {
                    let value = if self.builtins.get(module, &alias.name).is_some() {
                        Value::callable(CallTarget::Builtin(module.clone(), alias.name.clone()))
                    } else if let Some(info) = self.builtins.module_constant(module, &alias.name) {
                        Value::new(info.clone())
                    } else {
                        self.report(Error::UnknownAttribute {
                            owner: module.clone(),
                            attr: alias.name.clone(),
                            span,
                        });
                        Value::unknown()
                    };
                    if let Err(err) = self.bind_name(alias.bound_name(), value, BindingKind::Import, span) {
                        self.report(err);
                    }
                }
                true
            }
            StmtKind::Pass => true,
            StmtKind::Break => self.walk_jump(true, span),
            StmtKind::Continue => self.walk_jump(false, span),
        }
    }

    /// Record the environment reaching a `break` or `continue`
    fn walk_jump(&mut self, is_break: bool, span: Span) -> bool {
        let env = self.env().clone();
        match self.frame.loops.last_mut() {
            Some(state) if is_break => state.breaks.push(env),
            Some(state) => state.continues.push(env),
            None => {
                let keyword = if is_break { "break" } else { "continue" };
                self.report(Error::unsupported(format!("'{}' outside loop", keyword), span));
            }
        }
        false
    }

    fn declare_all(&mut self, names: &[String], kind: BindingKind, span: Span) {
        let scope = self.scopes.current();
        for name in names {
            if let Err(err) = self.scopes.declare(scope, name, kind, span) {
                self.report(err);
            }
        }
    }

    fn walk_return(&mut self, value: Option<&mut Expr>, span: Span) {
        let (info, value_span) = match value {
            Some(expr) => (self.eval(expr).info, expr.span),
            None => (TypeInfo::none(), span),
        };
        let Some(declared) = self.frame.ret.clone() else {
            self.report(Error::unsupported("'return' outside function", span));
            return;
        };
        if !accepts(&declared, &info, &self.classes) {
            let context = format!("return value of {}()", self.frame.qualname);
            self.report(Error::type_mismatch(context, &declared, &info, value_span));
        }
    }

    fn walk_ann_assign(&mut self, target: &mut Expr, annotation: &Expr, value: Option<&mut Expr>, span: Span) {
        let declared = match collect::annotation_type(annotation, &self.classes) {
            Ok(info) => info,
            Err(err) => {
                self.report(err);
                TypeInfo::unknown()
            }
        };
        let evaluated = value.map(|v| self.eval(v));

        match &target.kind {
            ExprKind::Name(name) => {
                let name = name.clone();
                self.frame.declared.insert(name.clone(), declared);
                match evaluated {
                    Some(value) => self.assign_target(target, value),
                    None => {
                        let scope = self.scopes.current();
                        if let Err(err) = self.scopes.declare(scope, &name, BindingKind::Local, span) {
                            self.report(err);
                        }
                    }
                }
            }
            _ => {
                if let Some(value) = evaluated {
                    if !accepts(&declared, &value.info, &self.classes) {
                        self.report(Error::type_mismatch("annotated assignment", &declared, &value.info, span));
                    }
                    self.assign_target(target, value);
                }
            }
        }
    }

    fn walk_if(&mut self, test: &mut Expr, body: &mut [Stmt], orelse: &mut [Stmt]) -> bool {
        self.eval(test);
        let pre = self.env().clone();
        let refinement = refine(test, &pre, &self.classes);

        self.replace_env(refinement.then.apply(&pre));
        let then_live = self.walk_block(body);
        let then_env = self.replace_env(refinement.otherwise.apply(&pre));
        let else_live = self.walk_block(orelse);
        let else_env = self.env().clone();

        let branches: Vec<Environment> = [(then_live, then_env), (else_live, else_env)]
            .into_iter()
            .filter(|(live, _)| *live)
            .map(|(_, env)| env)
            .collect();
        trace!("merging {} live branch(es) of if at line {}", branches.len(), test.span.line);
        match merge_all(branches) {
            Some(merged) => {
                self.replace_env(merged);
                true
            }
            None => {
                self.replace_env(pre);
                false
            }
        }
    }

    /// Give every loop-assigned name a new identity for the loop body
    fn refresh_keys(&mut self, names: &BTreeSet<String>) {
        for name in names {
            if self.env().contains(name) {
                let key = self.fresh_key(name);
                if let Some(binding) = self.env_mut().get_mut(name) {
                    binding.canonical = Some(key);
                }
            }
        }
    }

    /// Environment after a loop, from the state before it, the end of the
    /// body and every `continue`
    fn loop_exit(pre: &Environment, body_end: Option<Environment>, state: &LoopState) -> Environment {
        let mut after = pre.clone();
        for env in body_end.iter().chain(&state.continues) {
            after = after.merge_loop(env);
        }
        after
    }

    /// State at the top of a loop body on any iteration: the state before
    /// the loop joined with a trial run of `body`
    fn loop_entry(&mut self, pre: &Environment, body: impl FnOnce(&mut Self) -> bool) -> Environment {
        if self.speculating {
            return pre.clone();
        }
        let trial = self.speculate(|walker| {
            walker.frame.loops.push(LoopState::default());
            let live = body(walker);
            let end = walker.replace_env(pre.clone());
            let state = walker.frame.loops.pop().unwrap_or_default();
            Self::loop_exit(pre, live.then_some(end), &state)
        });
        trace!("loop entry widened to {} name(s)", trial.names().count());
        self.replace_env(pre.clone());
        trial
    }

    /// Combine the normal loop exit with every `break`
    fn finish_loop(&mut self, pre: &Environment, normal_exit: Option<Environment>, state: LoopState) -> bool {
        let exits: Vec<Environment> = normal_exit
            .into_iter()
            .chain(state.breaks.iter().map(|env| env.restrict_to(pre)))
            .collect();
        match merge_all(exits) {
            Some(env) => {
                self.replace_env(env);
                true
            }
            None => {
                self.replace_env(pre.clone());
                false
            }
        }
    }

    fn walk_while(&mut self, test: &mut Expr, body: &mut [Stmt], orelse: &mut [Stmt]) -> bool {
        self.eval(test);
        let pre = self.env().clone();
        let names = assigned_names(body);
        let entry = self.loop_entry(&pre, |walker| {
            let narrowed = refine(test, walker.env(), &walker.classes).then.apply(walker.env());
            walker.replace_env(narrowed);
            walker.refresh_keys(&names);
            walker.walk_block(body)
        });

        let refinement = refine(test, &entry, &self.classes);
        self.replace_env(refinement.then.apply(&entry));
        self.refresh_keys(&names);
        self.frame.loops.push(LoopState::default());
        let body_live = self.walk_block(body);
        let body_end = self.env().clone();
        let state = self.frame.loops.pop().unwrap_or_default();

        let after = Self::loop_exit(&pre, body_live.then_some(body_end), &state);
        let infinite = matches!(test.kind, ExprKind::Bool(true));
        let normal_exit = if infinite {
            None
        } else {
            let exit = refine(test, &after, &self.classes).otherwise.apply(&after);
            self.replace_env(exit);
            if self.walk_block(orelse) {
                Some(self.env().clone())
            } else {
                None
            }
        };
        self.finish_loop(&pre, normal_exit, state)
    }

    fn walk_for(&mut self, target: &mut Expr, iter: &mut Expr, body: &mut [Stmt], orelse: &mut [Stmt]) -> bool {
        let iterable = self.eval(iter);
        let element = match self.iteration_element(&iterable.info, iter.span) {
            Ok(element) => element,
            Err(err) => {
                self.report(err);
                TypeSet::unknown()
            }
        };
        let pre = self.env().clone();

        let mut names = assigned_names(body);
        target_names(target, &mut names);
        let entry = self.loop_entry(&pre, |walker| {
            walker.refresh_keys(&names);
            walker.assign_target(target, Value::new(TypeInfo::from_set(element.clone())));
            walker.walk_block(body)
        });

        self.replace_env(entry);
        self.refresh_keys(&names);
        self.assign_target(target, Value::new(TypeInfo::from_set(element)));

        self.frame.loops.push(LoopState::default());
        let body_live = self.walk_block(body);
        let body_end = self.env().clone();
        let state = self.frame.loops.pop().unwrap_or_default();

        let after = Self::loop_exit(&pre, body_live.then_some(body_end), &state);
        self.replace_env(after);
        let normal_exit = if self.walk_block(orelse) {
            Some(self.env().clone())
        } else {
            None
        };
        self.finish_loop(&pre, normal_exit, state)
    }

    /// Classes named by a handler's type expression
    fn handler_classes(&mut self, typ: &mut Expr) -> Vec<String> {
        self.eval(typ);
        let items: Vec<&Expr> = match &typ.kind {
            ExprKind::Tuple(items) => items.iter().collect(),
            _ => vec![&*typ],
        };
        let mut classes = Vec::new();
        for item in items {
            let Some(tag) = item.ty.as_ref().and_then(|t| t.as_single()) else {
                continue;
            };
            let checked = match tag {
                TypeTag::Unknown => continue,
                TypeTag::Class(name) => self
                    .classes
                    .exceptions()
                    .check_handler_type(name, item.span)
                    .map(|_| self.classes.exceptions().canonical(name).to_string()),
                other => Err(Error::ExceptionTypeInvalid {
                    message: format!("catching {} which is not an exception class", other),
                    span: item.span,
                }),
            };
            match checked {
                Ok(name) => classes.push(name),
                Err(err) => self.report(err),
            }
        }
        classes
    }

    fn walk_try(&mut self, t: &mut TryStmt) -> bool {
        let pre = self.env().clone();
        let body_live = self.walk_block(&mut t.body);
        let body_end = self.env().clone();
        let handler_start = pre.merge_loop(&body_end);

        let mut clauses = Vec::with_capacity(t.handlers.len());
        let mut handler_ends = Vec::new();
        for handler in t.handlers.iter_mut() {
            self.replace_env(handler_start.clone());
            let classes = handler.typ.as_mut().map(|typ| self.handler_classes(typ));
            clauses.push(HandlerClause {
                classes: classes.clone(),
                span: handler.span,
            });

            if let Some(name) = &handler.name {
                let tags = classes
                    .unwrap_or_default()
                    .into_iter()
                    .map(TypeTag::Object)
                    .collect::<Vec<_>>();
                let info = if tags.is_empty() {
                    TypeInfo::unknown()
                } else {
                    TypeInfo::from_set(TypeSet::from_tags(tags))
                };
                let value = Value::pure(info, self.fresh_key(name));
                if let Err(err) = self.bind_name(name, value, BindingKind::Local, handler.span) {
                    self.report(err);
                }
            }

            self.frame.except_depth += 1;
            let live = self.walk_block(&mut handler.body);
            self.frame.except_depth -= 1;
            if let Some(name) = &handler.name {
                self.env_mut().remove(name);
            }
            if live {
                handler_ends.push(self.env().clone());
            }
        }
        for err in self.classes.exceptions().check_handler_order(&clauses) {
            self.report(err);
        }

        self.replace_env(body_end.clone());
        let else_live = self.walk_block(&mut t.orelse);
        let main_end = (body_live && else_live).then(|| self.env().clone());

        let after = match main_end {
            Some(env) => Some(handler_ends.iter().fold(env, |acc, h| acc.merge_loop(h))),
            None => merge_all(handler_ends.iter().map(|h| h.restrict_to(&pre)).collect()),
        };

        if t.finalbody.is_empty() {
            return match after {
                Some(env) => {
                    self.replace_env(env);
                    true
                }
                None => {
                    self.replace_env(pre);
                    false
                }
            };
        }

        let falls_through = after.is_some();
        let start = after.unwrap_or_else(|| pre.merge_loop(&body_end));
        self.replace_env(start);
        let final_live = self.walk_block(&mut t.finalbody);
        falls_through && final_live
    }

    fn walk_raise(&mut self, exc: Option<&mut Expr>, cause: Option<&mut Expr>, span: Span) {
        let result = match exc {
            Some(expr) => {
                let value = self.eval(expr);
                self.classes.exceptions().check_raise(&value.info, expr.span)
            }
            None => self
                .classes
                .exceptions()
                .check_bare_raise(self.frame.except_depth > 0, span),
        };
        if let Err(err) = result {
            self.report(err);
        }
        if let Some(cause) = cause {
            let value = self.eval(cause);
            let is_none = matches!(cause.kind, ExprKind::NoneLit);
            if let Err(err) = self
                .classes
                .exceptions()
                .check_cause(&value.info, is_none, cause.span)
            {
                self.report(err);
            }
        }
    }

    fn walk_delete(&mut self, target: &mut Expr) {
        match &mut target.kind {
            ExprKind::Name(name) => {
                let name = name.clone();
                self.eval(target);
                self.env_mut().remove(&name);
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items.iter_mut() {
                    self.walk_delete(item);
                }
            }
            _ => {
                self.eval(target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_source;
    use crate::semantic::DiagnosticKind;
    use pretty_assertions::assert_eq;

    fn run(source: &str) -> CheckOutcome {
        let mut module = parse_source(source, "t.py").unwrap();
        Walker::new("t.py", CheckOptions::default()).run(&mut module)
    }

    fn kinds(source: &str) -> Vec<DiagnosticKind> {
        run(source).diagnostics.iter().map(|d| d.kind()).collect()
    }

    #[test]
    fn test_if_without_else_does_not_bind() {
        let source = "def f(c: bool) -> int:\n    if c:\n        y = 1\n    return y\n";
        assert_eq!(kinds(source), vec![DiagnosticKind::UndefinedName]);
    }

    #[test]
    fn test_terminating_branch_excluded_from_merge() {
        let source = "def f(x: int | None) -> int:\n    if x is None:\n        return 0\n    return x + 1\n";
        assert!(run(source).ok);
    }

    #[test]
    fn test_try_bindings() {
        let source = "def f() -> int:\n    try:\n        a = int(\"1\")\n    except ValueError as e:\n        b = 2\n        a = 0\n    finally:\n        c = 3\n    return a + c\n";
        assert!(run(source).ok);

        let leaked = "def f() -> int:\n    try:\n        a = 1\n    except ValueError:\n        b = 2\n    return b\n";
        assert_eq!(kinds(leaked), vec![DiagnosticKind::UndefinedName]);

        let handler_name = "def f() -> None:\n    try:\n        pass\n    except ValueError as e:\n        pass\n    print(e)\n";
        assert_eq!(kinds(handler_name), vec![DiagnosticKind::UndefinedName]);
    }

    #[test]
    fn test_for_loop_target_does_not_leak() {
        let source = "def f(xs: list[int]) -> int:\n    total = 0\n    for x in xs:\n        total = total + x\n    return total\n";
        assert!(run(source).ok);
        let leaked = "def f(xs: list[int]) -> int:\n    for x in xs:\n        pass\n    return x\n";
        assert_eq!(kinds(leaked), vec![DiagnosticKind::UndefinedName]);
    }

    #[test]
    fn test_break_and_continue_outside_loop() {
        assert_eq!(
            kinds("def f() -> None:\n    break\n"),
            vec![DiagnosticKind::UnsupportedConstruct]
        );
        assert_eq!(kinds("return 1\n"), vec![DiagnosticKind::UnsupportedConstruct]);
    }

    #[test]
    fn test_annotated_local_keeps_declared_type() {
        let ok = "def f() -> float:\n    x: float = 1\n    x = 2\n    return x\n";
        assert!(run(ok).ok);
        let bad = "def f() -> None:\n    x: int = 1\n    x = \"a\"\n";
        assert_eq!(kinds(bad), vec![DiagnosticKind::TypeMismatch]);
    }

    #[test]
    fn test_flags_keyed_by_qualified_name() {
        let outcome = run(
            "def gen():\n    yield 1\n\nclass C:\n    def m(self) -> int:\n        def inner() -> int:\n            return 1\n        return inner()\n",
        );
        assert!(outcome.function_flags["gen"].is_generator);
        assert!(outcome.function_flags.contains_key("C.m"));
        assert!(outcome.function_flags.contains_key("C.m.inner"));
        assert_eq!(
            outcome.diagnostics.iter().map(|d| d.kind()).collect::<Vec<_>>(),
            vec![DiagnosticKind::UnsupportedConstruct]
        );
    }

    #[test]
    fn test_module_globals_visible_in_functions() {
        let source = "LIMIT = 10\n\ndef f(n: int) -> bool:\n    return n < LIMIT\n";
        assert!(run(source).ok);
        let before = "print(LATER)\nLATER = 1\n";
        assert_eq!(kinds(before), vec![DiagnosticKind::UndefinedName]);
    }

    #[test]
    fn test_loop_body_sees_later_iterations() {
        let rebound = "def f(n: int) -> int:\n    x = 1\n    while n:\n        y = x + 1\n        x = \"s\"\n    return 0\n";
        assert_eq!(kinds(rebound), vec![DiagnosticKind::TypeMismatch]);

        let in_for = "def f(xs: list[int]) -> int:\n    prev = 0\n    for x in xs:\n        d = prev - x\n        prev = None\n    return 0\n";
        assert_eq!(kinds(in_for), vec![DiagnosticKind::TypeMismatch]);

        let stable = "def f(n: int) -> int:\n    x = 1\n    while n:\n        y = x + 1\n        x = y\n    return x\n";
        assert!(run(stable).ok);
    }

    #[test]
    fn test_global_writes_reach_module_state() {
        let same_function = "x = 1\ndef f() -> int:\n    global x\n    x = \"s\"\n    return x + 1\n";
        assert_eq!(kinds(same_function), vec![DiagnosticKind::TypeMismatch]);

        let later_reader = "x = 1\ndef f() -> None:\n    global x\n    x = \"s\"\ndef g() -> int:\n    return x + 1\n";
        assert_eq!(kinds(later_reader), vec![DiagnosticKind::TypeMismatch]);

        let earlier_reader = "x = 1\ndef g() -> int:\n    return x + 1\ndef f() -> None:\n    global x\n    x = \"s\"\n";
        assert_eq!(kinds(earlier_reader), vec![DiagnosticKind::TypeMismatch]);

        let declared = "x: int = 1\ndef f() -> None:\n    global x\n    x = \"s\"\n";
        assert_eq!(kinds(declared), vec![DiagnosticKind::TypeMismatch]);
    }

    #[test]
    fn test_may_raise_annotations() {
        let mut module = parse_source("x = 1\ny = x // 2\n", "t.py").unwrap();
        Walker::new("t.py", CheckOptions::default()).run(&mut module);
        let flags: Vec<bool> = module.body.iter().map(|s| s.may_raise).collect();
        assert_eq!(flags, vec![false, true]);
    }
}
