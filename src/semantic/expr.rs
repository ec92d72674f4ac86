//! Expression evaluation
//!
//! Every evaluated expression is annotated with its possible types and, for
//! pure values, a canonical key that names its identity.

use super::call_binder::{self, ArgInfo};
use super::env::CallTarget;
use super::operators::{self, Index};
use super::refine::refine;
use super::scope::Resolution;
use super::walker::{Value, Walker};
use crate::frontend::ast::{BoolOp, Comprehension, Expr, ExprKind, Keyword, UnaryOp};
use crate::stdlib::builtins::BuiltinFunc;
use crate::types::{accepts, Signature, TypeInfo, TypeSet, TypeTag};
use crate::utils::{Error, Result, Span};
use log::trace;

/// What a call expression invokes
enum Callee {
    /// User function or method; `receiver` is passed as the first argument
    User {
        sig: Signature,
        receiver: Option<ArgInfo>,
        constructs: Option<String>,
    },
    Builtin {
        func: BuiltinFunc,
        receiver: Option<ArgInfo>,
    },
    /// User class without `__init__`
    Construct(String),
    /// Accepts any arguments
    Permissive(TypeInfo),
    /// Nothing is known; arguments are evaluated and the result is Unknown
    Opaque,
}

fn not_callable(info: &TypeInfo, span: Span) -> Error {
    Error::type_mismatch("call", "a callable", info, span)
}

impl Walker {
    /// Evaluate an expression, recording its type and key on the node
    pub(super) fn eval(&mut self, expr: &mut Expr) -> Value {
        let value = match self.eval_kind(expr) {
            Ok(value) => value,
            Err(err) => {
                self.report(err);
                Value::unknown()
            }
        };
        expr.ty = Some(value.info.set.clone());
        expr.canonical_key = value.key.clone();
        value
    }

    fn eval_kind(&mut self, expr: &mut Expr) -> Result<Value> {
        let span = expr.span;
        match &mut expr.kind {
            ExprKind::Name(name) => {
                let name = name.clone();
                self.read_name(&name, span)
            }
            ExprKind::Int(v) => Ok(Value::pure(TypeInfo::of(TypeTag::Int), format!("int:{}", v))),
            ExprKind::BigInt(digits) => Ok(Value::pure(TypeInfo::of(TypeTag::Int), format!("int:{}", digits))),
            ExprKind::Float(v) => Ok(Value::pure(TypeInfo::of(TypeTag::Float), format!("float:{:?}", v))),
            ExprKind::Str(s) => Ok(Value::pure(TypeInfo::of(TypeTag::Str), format!("str:{:?}", s))),
            ExprKind::Bytes(b) => Ok(Value::pure(TypeInfo::of(TypeTag::Bytes), format!("bytes:{:?}", b))),
            ExprKind::Bool(b) => Ok(Value::pure(TypeInfo::of(TypeTag::Bool), format!("bool:{}", b))),
            ExprKind::NoneLit => Ok(Value::pure(TypeInfo::none(), "none".to_string())),
            ExprKind::Ellipsis => Ok(Value::unknown()),
            ExprKind::List(items) => {
                let elem = self.eval_elements(items);
                Ok(Value::new(TypeInfo::list_of(elem)))
            }
            ExprKind::Set(items) => {
                let elem = self.eval_elements(items);
                Ok(Value::new(TypeInfo::set_of(elem)))
            }
            ExprKind::Tuple(items) => {
                let mut sets = Vec::with_capacity(items.len());
                for item in items.iter_mut() {
                    sets.push(self.eval(item).info.set);
                }
                Ok(Value::new(TypeInfo::tuple_of(sets)))
            }
            ExprKind::Dict(pairs) => {
                let mut key: Option<TypeSet> = None;
                let mut value: Option<TypeSet> = None;
                for (k, v) in pairs.iter_mut() {
                    let k = self.eval(k).info.set;
                    let v = self.eval(v).info.set;
                    key = Some(key.map_or(k.clone(), |acc| acc.join(&k)));
                    value = Some(value.map_or(v.clone(), |acc| acc.join(&v)));
                }
                Ok(Value::new(TypeInfo::dict_of(
                    key.unwrap_or_else(TypeSet::unknown),
                    value.unwrap_or_else(TypeSet::unknown),
                )))
            }
            ExprKind::BinOp { left, op, right } => {
                let l = self.eval(left);
                let r = self.eval(right);
                let info = operators::binary(*op, &l.info, &r.info, span)?;
                let key = match (l.key, r.key) {
                    (Some(a), Some(b)) => Some(format!("({} {} {})", a, op.symbol(), b)),
                    _ => None,
                };
                Ok(Value {
                    info,
                    key,
                    target: None,
                })
            }
            ExprKind::UnaryOp { op, operand } => {
                let v = self.eval(operand);
                let info = operators::unary(*op, &v.info, span)?;
                let key = v.key.map(|k| format!("({}{})", op.symbol(), k));
                Ok(Value {
                    info,
                    key,
                    target: None,
                })
            }
            ExprKind::BoolOp { op, values } => Ok(self.eval_bool_op(*op, values)),
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut previous = self.eval(left).info;
                let mut failure = None;
                for (op, comparator) in ops.iter().zip(comparators.iter_mut()) {
                    let current = self.eval(comparator).info;
                    if failure.is_none() {
                        failure = operators::compare(*op, &previous, &current, &self.classes, comparator.span).err();
                    }
                    previous = current;
                }
                match failure {
                    Some(err) => Err(err),
                    None => Ok(Value::new(TypeInfo::of(TypeTag::Bool))),
                }
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.eval(test);
                let pre = self.env().clone();
                let refinement = refine(test, &pre, &self.classes);
                let then = self.with_env(refinement.then.apply(&pre), |w| w.eval(body));
                let otherwise = self.with_env(refinement.otherwise.apply(&pre), |w| w.eval(orelse));
                let key = then.key.filter(|k| otherwise.key.as_ref() == Some(k));
                Ok(Value {
                    info: then.info.join(&otherwise.info),
                    key,
                    target: None,
                })
            }
            ExprKind::Call { func, args, keywords } => self.eval_call(func, args, keywords, span),
            ExprKind::Attribute { value, attr } => {
                let receiver = self.eval(value);
                self.read_attribute(&receiver, attr, span)
            }
            ExprKind::Subscript { value, index } => {
                let container = self.eval(value);
                if let ExprKind::Slice { lower, upper, step } = &mut index.kind {
                    for part in [lower, upper, step].into_iter().flatten() {
                        self.eval(part);
                    }
                    index.ty = Some(TypeSet::unknown());
                    let info = operators::subscript(&container.info, Index::Slice, &self.classes, span)?;
                    return Ok(Value::new(info));
                }
                let literal = literal_index(index);
                let index = self.eval(index);
                let info = operators::subscript(&container.info, Index::Item(&index.info, literal), &self.classes, span)?;
                Ok(Value::new(info))
            }
            ExprKind::Slice { .. } => Err(Error::unsupported("slice outside subscript", span)),
            ExprKind::ListComp { elt, generators } => {
                let elem = self.in_comprehension(generators, |w| w.eval(elt).info.set);
                Ok(Value::new(TypeInfo::list_of(elem)))
            }
            ExprKind::GeneratorExp { elt, generators } => {
                let elem = self.in_comprehension(generators, |w| w.eval(elt).info.set);
                Ok(Value::new(TypeInfo::list_of(elem)))
            }
            ExprKind::SetComp { elt, generators } => {
                let elem = self.in_comprehension(generators, |w| w.eval(elt).info.set);
                Ok(Value::new(TypeInfo::set_of(elem)))
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                let (k, v) = self.in_comprehension(generators, |w| {
                    let k = w.eval(key).info.set;
                    let v = w.eval(value).info.set;
                    (k, v)
                });
                Ok(Value::new(TypeInfo::dict_of(k, v)))
            }
            ExprKind::Lambda { .. } => Err(Error::unsupported("lambda", span)),
            ExprKind::Yield(value) => {
                if let Some(value) = value {
                    self.eval(value);
                }
                Err(Error::unsupported("generator ('yield')", span))
            }
            ExprKind::YieldFrom(value) => {
                self.eval(value);
                Err(Error::unsupported("generator ('yield from')", span))
            }
            ExprKind::Await(value) => {
                self.eval(value);
                Err(Error::unsupported("coroutine ('await')", span))
            }
            ExprKind::Starred(value) => {
                self.eval(value);
                Err(Error::unsupported("starred expression", span))
            }
        }
    }

    /// Join of the element types of a list or set display
    fn eval_elements(&mut self, items: &mut [Expr]) -> TypeSet {
        let mut elem: Option<TypeSet> = None;
        for item in items.iter_mut() {
            let set = self.eval(item).info.set;
            elem = Some(match elem {
                Some(acc) => acc.join(&set),
                None => set,
            });
        }
        elem.unwrap_or_else(TypeSet::unknown)
    }

    /// `a or b`, `a and b`: each operand runs where the previous ones did
    /// not decide the result
    fn eval_bool_op(&mut self, op: BoolOp, values: &mut [Expr]) -> Value {
        let saved = self.env().clone();
        let last = values.len().saturating_sub(1);
        let mut result: Option<TypeInfo> = None;
        for (i, value) in values.iter_mut().enumerate() {
            let evaluated = self.eval(value);
            let contribution = if i == last {
                evaluated.info
            } else {
                let refinement = refine(value, self.env(), &self.classes);
                let (decides, continues) = match op {
                    BoolOp::Or => (refinement.then, refinement.otherwise),
                    BoolOp::And => (refinement.otherwise, refinement.then),
                };
                let narrowed = value
                    .as_name()
                    .and_then(|name| decides.apply(self.env()).get(name).map(|b| b.info.clone()))
                    .unwrap_or(evaluated.info);
                let next = continues.apply(self.env());
                self.replace_env(next);
                narrowed
            };
            result = Some(match result {
                Some(acc) => acc.join(&contribution),
                None => contribution,
            });
        }
        self.replace_env(saved);
        Value::new(result.unwrap_or_else(TypeInfo::unknown))
    }

    /// Evaluate inside a comprehension scope; targets never leak outward
    fn in_comprehension<R>(&mut self, generators: &mut [Comprehension], body: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.env().clone();
        self.scopes.enter_comprehension();
        for generator in generators.iter_mut() {
            let iterable = self.eval(&mut generator.iter);
            let element = match self.iteration_element(&iterable.info, generator.iter.span) {
                Ok(element) => element,
                Err(err) => {
                    self.report(err);
                    TypeSet::unknown()
                }
            };
            self.assign_target(&mut generator.target, Value::new(TypeInfo::from_set(element)));
            for condition in generator.ifs.iter_mut() {
                self.eval(condition);
                let narrowed = refine(condition, self.env(), &self.classes).then.apply(self.env());
                self.replace_env(narrowed);
            }
        }
        let out = body(self);
        self.scopes.leave();
        self.replace_env(saved);
        out
    }

    // ==================== Attributes ====================

    fn read_attribute(&mut self, receiver: &Value, attr: &str, span: Span) -> Result<Value> {
        let info = &receiver.info;
        if info.contradicted {
            return Err(Error::type_mismatch(
                format!("attribute '{}'", attr),
                "a reachable value",
                info,
                span,
            ));
        }
        if info.is_unknown() {
            return Ok(Value::unknown());
        }
        let Some(tag) = info.single() else {
            return Err(Error::type_mismatch(
                format!("attribute '{}'", attr),
                "a single type",
                &info.set,
                span,
            ));
        };
        let unknown_attribute = |owner: String| Error::UnknownAttribute {
            owner,
            attr: attr.to_string(),
            span,
        };

        match tag {
            TypeTag::Module(module) => {
                if self.builtins.get(module, attr).is_some() {
                    Ok(Value::callable(CallTarget::Builtin(module.clone(), attr.to_string())))
                } else if let Some(constant) = self.builtins.module_constant(module, attr) {
                    Ok(Value::pure(constant.clone(), format!("{}.{}", module, attr)))
                } else {
                    Err(unknown_attribute(module.clone()))
                }
            }
            TypeTag::Object(class) if self.classes.contains(class) => {
                if let Some(field) = self.classes.find_field(class, attr) {
                    Ok(Value::new(field.clone()))
                } else if self.classes.find_method(class, attr).is_some() {
                    // bound methods are only resolved when called directly
                    Ok(Value::new(TypeInfo::of(TypeTag::Callable)))
                } else {
                    Err(unknown_attribute(class.clone()))
                }
            }
            TypeTag::Class(class) if self.classes.contains(class) => {
                if let Some(field) = self.classes.find_field(class, attr) {
                    Ok(Value::new(field.clone()))
                } else if let Some(method) = self.classes.find_method(class, attr) {
                    Ok(Value::callable(CallTarget::User(method.to_string())))
                } else {
                    Err(unknown_attribute(class.clone()))
                }
            }
            TypeTag::Object(_) | TypeTag::Class(_) | TypeTag::Callable | TypeTag::Unknown => Ok(Value::unknown()),
            builtin => {
                if self.builtins.method(builtin, attr).is_some() {
                    Ok(Value::new(TypeInfo::of(TypeTag::Callable)))
                } else {
                    Err(unknown_attribute(builtin.to_string()))
                }
            }
        }
    }

    /// Check `receiver.attr = value`
    pub(super) fn check_attribute_store(&self, receiver: &TypeInfo, attr: &str, value: &TypeInfo, span: Span) -> Result<()> {
        if receiver.contradicted {
            return Err(Error::type_mismatch(
                format!("attribute '{}'", attr),
                "a reachable value",
                receiver,
                span,
            ));
        }
        if receiver.is_unknown() {
            return Ok(());
        }
        let unknown_attribute = |owner: String| Error::UnknownAttribute {
            owner,
            attr: attr.to_string(),
            span,
        };
        match receiver.single() {
            Some(TypeTag::Object(class)) if self.classes.contains(class) => match self.classes.find_field(class, attr) {
                Some(field) if accepts(field, value, &self.classes) => Ok(()),
                Some(field) => Err(Error::type_mismatch(
                    format!("attribute '{}' of {}", attr, class),
                    field,
                    value,
                    span,
                )),
                None => Err(unknown_attribute(class.clone())),
            },
            Some(TypeTag::Object(_) | TypeTag::Callable | TypeTag::Class(_)) => Ok(()),
            Some(TypeTag::Module(module)) => Err(unknown_attribute(module.clone())),
            Some(other) => Err(unknown_attribute(other.to_string())),
            None => Err(Error::type_mismatch(
                format!("attribute '{}'", attr),
                "a single type",
                &receiver.set,
                span,
            )),
        }
    }

    // ==================== Calls ====================

    fn eval_call(&mut self, func: &mut Expr, args: &mut [Expr], keywords: &mut [Keyword], span: Span) -> Result<Value> {
        if func.as_name() == Some("super") && args.is_empty() && self.resolves_to_builtin("super", func.span) {
            func.ty = Some(TypeSet::single(TypeTag::Callable));
            return Ok(self.super_value());
        }

        let callee = match self.resolve_callee(func) {
            Ok(callee) => callee,
            Err(err) => {
                self.report(err);
                Callee::Opaque
            }
        };
        let (positional, named, unpacked) = self.eval_args(args, keywords);

        match callee {
            Callee::Opaque => Ok(Value::unknown()),
            Callee::Permissive(info) => Ok(Value::new(info)),
            Callee::Construct(class) => {
                if !unpacked && !(positional.is_empty() && named.is_empty()) {
                    return Err(Error::ArityMismatch {
                        callee: class,
                        message: "takes no arguments".to_string(),
                        span,
                    });
                }
                Ok(Value::new(TypeInfo::of(TypeTag::Object(class))))
            }
            Callee::User {
                sig,
                receiver,
                constructs,
            } => {
                let ret = match constructs {
                    Some(class) => TypeInfo::of(TypeTag::Object(class)),
                    None => sig.ret.clone(),
                };
                if unpacked {
                    return Ok(Value::new(ret));
                }
                let positional = with_receiver(receiver, positional);
                let bound = call_binder::bind(&sig, &positional, &named, &self.classes, span)?;
                let key = sig
                    .passthrough
                    .and_then(|i| bound.arg(i))
                    .and_then(|arg| arg.canonical.clone());
                trace!("call to {} at line {} returns {}", sig.name, span.line, ret);
                Ok(Value {
                    info: ret,
                    key,
                    target: None,
                })
            }
            Callee::Builtin { func, receiver } => {
                if unpacked {
                    return Ok(Value::new(func.returns.apply(|_| None)));
                }
                let positional = with_receiver(receiver, positional);
                let bound = call_binder::bind(&func.signature, &positional, &named, &self.classes, span)?;
                let info = func.returns.apply(|i| bound.arg(i).map(|arg| arg.info.clone()));
                Ok(Value::new(info))
            }
        }
    }

    fn resolves_to_builtin(&self, name: &str, span: Span) -> bool {
        matches!(
            self.scopes.resolve(self.scopes.current(), name, span),
            Ok(Resolution::Builtin)
        )
    }

    /// `super()` inside a method: an instance of the first user base class
    fn super_value(&self) -> Value {
        self.frame
            .class
            .as_ref()
            .and_then(|class| self.classes.get(class))
            .and_then(|info| info.bases.first())
            .filter(|base| self.classes.contains(base))
            .map(|base| Value::new(TypeInfo::of(TypeTag::Object(base.clone()))))
            .unwrap_or_else(Value::unknown)
    }

    /// Evaluate call arguments; the flag is set when `*` or `**` unpacking is used
    fn eval_args(&mut self, args: &mut [Expr], keywords: &mut [Keyword]) -> (Vec<ArgInfo>, Vec<(String, ArgInfo)>, bool) {
        let mut unpacked = false;
        let mut positional = Vec::with_capacity(args.len());
        for arg in args.iter_mut() {
            if let ExprKind::Starred(inner) = &mut arg.kind {
                unpacked = true;
                let value = self.eval(inner);
                arg.ty = Some(value.info.set);
                continue;
            }
            let value = self.eval(arg);
            positional.push(ArgInfo::new(value.info, arg.span, value.key));
        }

        let mut named = Vec::with_capacity(keywords.len());
        for keyword in keywords.iter_mut() {
            let value = self.eval(&mut keyword.value);
            match &keyword.name {
                Some(name) => named.push((name.clone(), ArgInfo::new(value.info, keyword.span, value.key))),
                None => unpacked = true,
            }
        }
        (positional, named, unpacked)
    }

    fn resolve_callee(&mut self, func: &mut Expr) -> Result<Callee> {
        if let ExprKind::Attribute { value, attr } = &mut func.kind {
            let receiver = self.eval(value);
            let attr = attr.clone();
            func.ty = Some(TypeSet::single(TypeTag::Callable));
            return self.method_callee(receiver, &attr, func.span);
        }
        let value = self.eval(func);
        self.value_callee(value, func.span)
    }

    /// Callee for calling an evaluated value
    fn value_callee(&self, value: Value, span: Span) -> Result<Callee> {
        match &value.target {
            Some(CallTarget::User(qualname)) => {
                return Ok(match self.signatures.get(qualname) {
                    Some(sig) => Callee::User {
                        sig: sig.clone(),
                        receiver: None,
                        constructs: None,
                    },
                    None => Callee::Opaque,
                })
            }
            Some(CallTarget::Builtin(module, name)) => {
                if let Some(func) = self.builtins.get(module, name) {
                    return Ok(Callee::Builtin {
                        func: func.clone(),
                        receiver: None,
                    });
                }
            }
            None => {}
        }

        let info = &value.info;
        if info.contradicted {
            return Err(not_callable(info, span));
        }
        if info.is_unknown() {
            return Ok(Callee::Opaque);
        }
        match info.single() {
            Some(TypeTag::Class(class)) => Ok(self.constructor(class)),
            Some(TypeTag::Object(class)) if self.classes.contains(class) => {
                match self.classes.find_method(class, "__call__").and_then(|q| self.signatures.get(q)) {
                    Some(sig) => Ok(Callee::User {
                        sig: sig.clone(),
                        receiver: Some(ArgInfo::new(info.clone(), span, value.key.clone())),
                        constructs: None,
                    }),
                    None => Err(not_callable(info, span)),
                }
            }
            Some(TypeTag::Callable) => Ok(Callee::Opaque),
            _ => Err(not_callable(info, span)),
        }
    }

    /// Callee for calling a class
    fn constructor(&self, class: &str) -> Callee {
        if self.classes.contains(class) {
            let init = self
                .classes
                .find_method(class, "__init__")
                .and_then(|q| self.signatures.get(q));
            return match init {
                Some(sig) => Callee::User {
                    sig: sig.clone(),
                    receiver: Some(ArgInfo::new(
                        TypeInfo::of(TypeTag::Object(class.to_string())),
                        Span::dummy(),
                        None,
                    )),
                    constructs: Some(class.to_string()),
                },
                None if self.classes.is_exception(class) => {
                    Callee::Permissive(TypeInfo::of(TypeTag::Object(class.to_string())))
                }
                None => Callee::Construct(class.to_string()),
            };
        }
        if self.classes.is_exception(class) {
            let canonical = self.classes.exceptions().canonical(class).to_string();
            return Callee::Permissive(TypeInfo::of(TypeTag::Object(canonical)));
        }
        Callee::Opaque
    }

    /// Callee for `receiver.attr(...)`
    fn method_callee(&self, receiver: Value, attr: &str, span: Span) -> Result<Callee> {
        let info = &receiver.info;
        if info.contradicted {
            return Err(Error::type_mismatch(
                format!("method '{}'", attr),
                "a reachable value",
                info,
                span,
            ));
        }
        if info.is_unknown() {
            return Ok(Callee::Opaque);
        }
        let Some(tag) = info.single() else {
            return Err(Error::type_mismatch(
                format!("method '{}'", attr),
                "a single type",
                &info.set,
                span,
            ));
        };
        let unknown_attribute = |owner: String| Error::UnknownAttribute {
            owner,
            attr: attr.to_string(),
            span,
        };
        let as_receiver = || Some(ArgInfo::new(info.clone(), span, receiver.key.clone()));

        match tag {
            TypeTag::Module(module) => match self.builtins.get(module, attr) {
                Some(func) => Ok(Callee::Builtin {
                    func: func.clone(),
                    receiver: None,
                }),
                None => match self.builtins.module_constant(module, attr) {
                    Some(constant) => Err(not_callable(constant, span)),
                    None => Err(unknown_attribute(module.clone())),
                },
            },
            TypeTag::Object(class) | TypeTag::Class(class) if self.classes.contains(class) => {
                let bound = matches!(tag, TypeTag::Object(_));
                if let Some(sig) = self
                    .classes
                    .find_method(class, attr)
                    .and_then(|q| self.signatures.get(q))
                {
                    return Ok(Callee::User {
                        sig: sig.clone(),
                        receiver: if bound { as_receiver() } else { None },
                        constructs: None,
                    });
                }
                match self.classes.find_field(class, attr) {
                    Some(field) => self.value_callee(Value::new(field.clone()), span),
                    None => Err(unknown_attribute(class.clone())),
                }
            }
            TypeTag::Class(name) => match TypeTag::from_builtin_name(name).and_then(|t| self.builtins.method(&t, attr)) {
                Some(func) => Ok(Callee::Builtin {
                    func: func.clone(),
                    receiver: None,
                }),
                None => Ok(Callee::Opaque),
            },
            TypeTag::Object(_) | TypeTag::Callable | TypeTag::Unknown => Ok(Callee::Opaque),
            builtin => match self.builtins.method(builtin, attr) {
                Some(func) => Ok(Callee::Builtin {
                    func: func.clone(),
                    receiver: as_receiver(),
                }),
                None => Err(unknown_attribute(builtin.to_string())),
            },
        }
    }
}

fn with_receiver(receiver: Option<ArgInfo>, mut positional: Vec<ArgInfo>) -> Vec<ArgInfo> {
    if let Some(receiver) = receiver {
        positional.insert(0, receiver);
    }
    positional
}

/// The integer value of a literal index such as `t[1]` or `t[-1]`
fn literal_index(index: &Expr) -> Option<i64> {
    match &index.kind {
        ExprKind::Int(v) => Some(*v),
        ExprKind::UnaryOp {
            op: UnaryOp::Neg,
            operand,
        } => match operand.kind {
            ExprKind::Int(v) => v.checked_neg(),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::frontend::ast::{Module, StmtKind};
    use crate::frontend::parse_source;
    use crate::semantic::{check, DiagnosticKind};
    use crate::types::{TypeSet, TypeTag};
    use pretty_assertions::assert_eq;

    fn checked(source: &str) -> (Module, Vec<DiagnosticKind>) {
        let mut module = parse_source(source, "t.py").unwrap();
        let outcome = check(&mut module);
        let kinds = outcome.diagnostics.iter().map(|d| d.kind()).collect();
        (module, kinds)
    }

    fn kinds(source: &str) -> Vec<DiagnosticKind> {
        checked(source).1
    }

    /// Type and key recorded on the value of the assignment at `index`
    fn assigned(module: &Module, index: usize) -> (Option<TypeSet>, Option<String>) {
        match &module.body[index].kind {
            StmtKind::Assign { value, .. } => (value.ty.clone(), value.canonical_key.clone()),
            other => panic!("not an assignment: {:?}", other),
        }
    }

    #[test]
    fn test_literal_and_operator_keys() {
        let (module, diagnostics) = checked("a = 5\nb = a + 1\nc = a + 1\n");
        assert_eq!(diagnostics, vec![]);
        assert_eq!(assigned(&module, 0).1.as_deref(), Some("int:5"));
        assert_eq!(assigned(&module, 1), assigned(&module, 2));
        assert_eq!(assigned(&module, 1).1.as_deref(), Some("(int:5 + int:1)"));
    }

    #[test]
    fn test_or_default_narrows_none() {
        let source = "def f(x: str | None) -> str:\n    y = x or \"\"\n    return y\n";
        assert_eq!(kinds(source), vec![]);
    }

    #[test]
    fn test_conditional_expression_joins_arms() {
        let (module, diagnostics) = checked("c = True\nv = 1 if c else \"a\"\n");
        assert_eq!(diagnostics, vec![]);
        assert_eq!(
            assigned(&module, 1).0,
            Some(TypeSet::from_tags([TypeTag::Int, TypeTag::Str]))
        );
    }

    #[test]
    fn test_comprehension_target_does_not_leak() {
        let source = "x = \"s\"\nys = [x * 2 for x in [1, 2]]\nz = x + \"t\"\n";
        assert_eq!(kinds(source), vec![]);
        assert_eq!(kinds("ys = [i for i in [1]]\nprint(i)\n"), vec![DiagnosticKind::UndefinedName]);
    }

    #[test]
    fn test_call_binding_through_alias() {
        let source = "def add(a: int, b: int) -> int:\n    return a + b\n\ng = add\nr = g(1, \"x\")\n";
        assert_eq!(kinds(source), vec![DiagnosticKind::TypeMismatch]);
    }

    #[test]
    fn test_passthrough_call_keeps_key() {
        let source = "def ident(v: int) -> int:\n    return v\n\na = 3\nb = ident(a)\n";
        let (module, diagnostics) = checked(source);
        assert_eq!(diagnostics, vec![]);
        assert_eq!(assigned(&module, 2).1.as_deref(), Some("int:3"));
    }

    #[test]
    fn test_methods_and_constructors() {
        let source = "\
class Point:
    def __init__(self, x: int, y: int) -> None:
        self.x = x
        self.y = y

    def norm(self) -> int:
        return self.x * self.x + self.y * self.y

p = Point(1, 2)
n = p.norm()
q = Point(1)
p.z = 3
";
        assert_eq!(
            kinds(source),
            vec![
                DiagnosticKind::UnexpectedOrMissingKeyword,
                DiagnosticKind::UnknownAttribute
            ]
        );
    }

    #[test]
    fn test_builtin_methods_and_modules() {
        let source = "import math\nwords = \"a b\".split()\nr = math.sqrt(2.0)\nbad = math.nope\n";
        assert_eq!(kinds(source), vec![DiagnosticKind::UnknownAttribute]);
        assert_eq!(kinds("x = \"s\".upper(1)\n"), vec![DiagnosticKind::ArityMismatch]);
    }

    #[test]
    fn test_rejected_and_unsupported_expressions() {
        assert_eq!(kinds("eval(\"1\")\n"), vec![DiagnosticKind::SecurityRejection]);
        assert_eq!(kinds("f = lambda v: v\n"), vec![DiagnosticKind::UnsupportedConstruct]);
    }

    #[test]
    fn test_super_resolves_base_methods() {
        let source = "\
class Base:
    def __init__(self, n: int) -> None:
        self.n = n

class Child(Base):
    def __init__(self, n: int) -> None:
        super().__init__(n)
";
        assert_eq!(kinds(source), vec![]);
    }
}
