//! Signature collection
//!
//! The first pass records every class, its fields and methods, and every
//! function signature before any body is walked, so that top-level
//! functions and classes may refer to each other in any order.

use super::exceptions::ExceptionHierarchy;
use super::refine::TypeNames;
use crate::frontend::ast::{
    BinOp, ClassDef, Expr, ExprKind, FunctionDef, Module, ParamKind, Stmt, StmtKind,
};
use crate::frontend::parse_source;
use crate::types::{SigParam, Signature, Subtyping, TypeInfo, TypeSet, TypeTag};
use crate::utils::{Error, Result, Span};
use log::debug;
use std::collections::{HashMap, HashSet};

/// Signatures keyed by qualified name (`f`, `Point.__init__`, `outer.inner`)
pub type Signatures = HashMap<String, Signature>;

/// A user-defined class
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub qualname: String,
    pub bases: Vec<String>,
    pub fields: HashMap<String, TypeInfo>,
    /// Method name to the qualified name of its signature
    pub methods: HashMap<String, String>,
    pub span: Span,
}

/// All known user classes plus the exception hierarchy
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    classes: HashMap<String, ClassInfo>,
    exceptions: ExceptionHierarchy,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn exceptions(&self) -> &ExceptionHierarchy {
        &self.exceptions
    }

    pub fn is_exception(&self, name: &str) -> bool {
        self.exceptions.is_exception(name)
    }

    /// The class followed by its bases, nearest first
    pub fn lineage(&self, name: &str) -> Vec<&ClassInfo> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = vec![name];
        while !queue.is_empty() {
            let current = queue.remove(0);
            if !seen.insert(current) {
                continue;
            }
            if let Some(info) = self.classes.get(current) {
                out.push(info);
                queue.extend(info.bases.iter().map(|b| b.as_str()));
            }
        }
        out
    }

    /// Qualified signature name of a method, searched through the bases
    pub fn find_method(&self, class: &str, method: &str) -> Option<&str> {
        self.lineage(class)
            .into_iter()
            .find_map(|c| c.methods.get(method).map(|q| q.as_str()))
    }

    pub fn find_field(&self, class: &str, field: &str) -> Option<&TypeInfo> {
        self.lineage(class)
            .into_iter()
            .find_map(|c| c.fields.get(field))
    }

    /// Register every user class that derives from an exception
    fn settle_exceptions(&mut self) {
        loop {
            let pending: Vec<(String, String)> = self
                .classes
                .values()
                .filter(|c| !self.exceptions.is_exception(&c.name))
                .filter_map(|c| {
                    c.bases
                        .iter()
                        .find(|b| self.exceptions.is_exception(b))
                        .map(|b| (c.name.clone(), b.clone()))
                })
                .collect();
            if pending.is_empty() {
                break;
            }
            for (name, base) in pending {
                self.exceptions.register(&name, &base);
            }
        }
    }
}

impl Subtyping for ClassTable {
    fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        if sub == sup {
            return true;
        }
        if self.lineage(sub).iter().any(|c| c.name == sup) {
            return true;
        }
        self.exceptions.is_exception(sub) && self.exceptions.is_subclass(sub, sup)
    }
}

impl TypeNames for ClassTable {
    fn instance_tag(&self, name: &str) -> Option<TypeTag> {
        if self.classes.contains_key(name) {
            Some(TypeTag::Object(name.to_string()))
        } else if self.exceptions.is_exception(name) {
            Some(TypeTag::Object(self.exceptions.canonical(name).to_string()))
        } else {
            TypeTag::from_builtin_name(name)
        }
    }
}

// ==================== Annotations ====================

fn unsupported_annotation(expr: &Expr) -> Error {
    Error::unsupported("unsupported type annotation", expr.span)
}

/// Resolve a type annotation
pub fn annotation_type(expr: &Expr, classes: &ClassTable) -> Result<TypeInfo> {
    match &expr.kind {
        ExprKind::NoneLit => Ok(TypeInfo::none()),
        ExprKind::Name(name) => named_type(name, classes, expr.span),
        ExprKind::Str(text) => {
            let parsed = parse_source(&format!("{}\n", text), "<annotation>")
                .map_err(|_| unsupported_annotation(expr))?;
            match parsed.body.first().map(|s| &s.kind) {
                Some(StmtKind::Expr(inner)) if parsed.body.len() == 1 => annotation_type(inner, classes)
                    .map_err(|err| relocate(err, expr.span)),
                _ => Err(unsupported_annotation(expr)),
            }
        }
        ExprKind::BinOp {
            left,
            op: BinOp::BitOr,
            right,
        } => Ok(annotation_type(left, classes)?.join(&annotation_type(right, classes)?)),
        ExprKind::Subscript { value, index } => {
            let Some(generic) = value.as_name() else {
                return Err(unsupported_annotation(expr));
            };
            generic_type(generic, index, classes, expr)
        }
        _ => Err(unsupported_annotation(expr)),
    }
}

/// Errors inside a string annotation point at the string itself
fn relocate(err: Error, span: Span) -> Error {
    match err {
        Error::UndefinedName { name, .. } => Error::UndefinedName { name, span },
        Error::UnsupportedConstruct { construct, .. } => Error::UnsupportedConstruct { construct, span },
        other => other,
    }
}

fn named_type(name: &str, classes: &ClassTable, span: Span) -> Result<TypeInfo> {
    let info = match name {
        "Any" | "object" => TypeInfo::unknown(),
        "list" | "List" => TypeInfo::list_of(TypeSet::unknown()),
        "set" | "Set" => TypeInfo::set_of(TypeSet::unknown()),
        "dict" | "Dict" => TypeInfo::dict_of(TypeSet::unknown(), TypeSet::unknown()),
        _ => match classes.instance_tag(name) {
            Some(tag) => TypeInfo::of(tag),
            None => {
                return Err(Error::UndefinedName {
                    name: name.to_string(),
                    span,
                })
            }
        },
    };
    Ok(info)
}

fn generic_type(generic: &str, index: &Expr, classes: &ClassTable, whole: &Expr) -> Result<TypeInfo> {
    let args: Vec<&Expr> = match &index.kind {
        ExprKind::Tuple(items) => items.iter().collect(),
        _ => vec![index],
    };
    match (generic, args.as_slice()) {
        ("list" | "List", [elem]) => Ok(TypeInfo::list_of(element_set(elem, classes)?)),
        ("set" | "Set", [elem]) => Ok(TypeInfo::set_of(element_set(elem, classes)?)),
        ("dict" | "Dict", [key, value]) => Ok(TypeInfo::dict_of(
            element_set(key, classes)?,
            element_set(value, classes)?,
        )),
        ("tuple" | "Tuple", [elem, rest]) if matches!(rest.kind, ExprKind::Ellipsis) => Ok(TypeInfo {
            elem: Some(element_set(elem, classes)?),
            ..TypeInfo::of(TypeTag::Tuple)
        }),
        ("tuple" | "Tuple", items) => Ok(TypeInfo::tuple_of(
            items.iter().map(|e| element_set(e, classes)).collect::<Result<Vec<_>>>()?,
        )),
        ("Optional", [inner]) => Ok(annotation_type(inner, classes)?.join(&TypeInfo::none())),
        ("Union", members) if !members.is_empty() => {
            let mut joined: Option<TypeInfo> = None;
            for member in members {
                let info = annotation_type(member, classes)?;
                joined = Some(match joined {
                    Some(acc) => acc.join(&info),
                    None => info,
                });
            }
            joined.ok_or_else(|| unsupported_annotation(whole))
        }
        _ => Err(unsupported_annotation(whole)),
    }
}

fn element_set(expr: &Expr, classes: &ClassTable) -> Result<TypeSet> {
    annotation_type(expr, classes).map(|t| t.set)
}

/// Type of a literal expression, used for fields and defaults
pub fn literal_type(expr: &Expr) -> Option<TypeInfo> {
    let info = match &expr.kind {
        ExprKind::Int(_) | ExprKind::BigInt(_) => TypeInfo::of(TypeTag::Int),
        ExprKind::Float(_) => TypeInfo::of(TypeTag::Float),
        ExprKind::Str(_) => TypeInfo::of(TypeTag::Str),
        ExprKind::Bytes(_) => TypeInfo::of(TypeTag::Bytes),
        ExprKind::Bool(_) => TypeInfo::of(TypeTag::Bool),
        ExprKind::NoneLit => TypeInfo::none(),
        ExprKind::UnaryOp { operand, .. } => {
            return literal_type(operand).filter(|t| t.single().is_some_and(|t| t.is_numeric()))
        }
        ExprKind::List(items) => TypeInfo::list_of(literal_elements(items)?),
        ExprKind::Set(items) => TypeInfo::set_of(literal_elements(items)?),
        ExprKind::Tuple(items) => TypeInfo::tuple_of(
            items
                .iter()
                .map(|e| literal_type(e).map(|t| t.set))
                .collect::<Option<Vec<_>>>()?,
        ),
        ExprKind::Dict(pairs) if pairs.is_empty() => TypeInfo::dict_of(TypeSet::unknown(), TypeSet::unknown()),
        _ => return None,
    };
    Some(info)
}

fn literal_elements(items: &[Expr]) -> Option<TypeSet> {
    let mut joined: Option<TypeSet> = None;
    for item in items {
        let set = literal_type(item)?.set;
        joined = Some(match joined {
            Some(acc) => acc.join(&set),
            None => set,
        });
    }
    Some(joined.unwrap_or_else(TypeSet::unknown))
}

// ==================== Signatures ====================

/// Index of the parameter a body of the form `return <param>` hands back
fn passthrough_index(def: &FunctionDef) -> Option<usize> {
    let body: &[Stmt] = match def.body.first().map(|s| &s.kind) {
        Some(StmtKind::Expr(Expr {
            kind: ExprKind::Str(_),
            ..
        })) => &def.body[1..],
        _ => &def.body,
    };
    let [Stmt {
        kind: StmtKind::Return(Some(value)),
        ..
    }] = body
    else {
        return None;
    };
    let name = value.as_name()?;
    def.params.iter().position(|p| {
        p.name == name && !matches!(p.kind, ParamKind::VarArgs | ParamKind::KwVarArgs)
    })
}

/// Build the signature of a function or method.
/// `owner` is the class when `def` is a method; its first parameter is the receiver.
pub fn function_signature(
    def: &FunctionDef,
    qualname: &str,
    owner: Option<&str>,
    classes: &ClassTable,
    strict: bool,
) -> (Signature, Vec<Error>) {
    let mut errors = Vec::new();
    let mut params = Vec::with_capacity(def.params.len());

    for (i, param) in def.params.iter().enumerate() {
        let is_receiver = i == 0 && owner.is_some() && param.kind != ParamKind::VarArgs;
        let ty = match (&param.annotation, owner) {
            (_, Some(class)) if is_receiver => TypeInfo::of(TypeTag::Object(class.to_string())),
            (Some(annotation), _) => annotation_type(annotation, classes).unwrap_or_else(|err| {
                errors.push(err);
                TypeInfo::unknown()
            }),
            (None, _) => {
                if strict {
                    errors.push(Error::unsupported(
                        format!("parameter '{}' of {}() has no type annotation", param.name, qualname),
                        param.span,
                    ));
                }
                TypeInfo::unknown()
            }
        };
        let default = param
            .default
            .as_ref()
            .map(|d| literal_type(d).unwrap_or_else(|| ty.clone()));
        params.push(SigParam {
            name: param.name.clone(),
            ty,
            default,
            kind: param.kind,
        });
    }

    let ret = match &def.returns {
        Some(annotation) => annotation_type(annotation, classes).unwrap_or_else(|err| {
            errors.push(err);
            TypeInfo::unknown()
        }),
        None => {
            if strict {
                errors.push(Error::unsupported(
                    format!("{}() has no return annotation", qualname),
                    def.span,
                ));
            }
            TypeInfo::unknown()
        }
    };

    let mut signature = Signature::new(qualname, params, ret);
    signature.passthrough = passthrough_index(def);
    (signature, errors)
}

// ==================== Classes ====================

/// Record a class and its bases. Members are collected separately so that
/// classes may name each other in annotations.
pub fn declare_class(classes: &mut ClassTable, class: &ClassDef, qualname: &str) -> Vec<Error> {
    let mut errors = Vec::new();
    let mut bases = Vec::new();
    for base in &class.bases {
        match base.as_name() {
            Some("object") => {}
            Some(name) => bases.push(name.to_string()),
            None => errors.push(Error::unsupported("class base that is not a plain name", base.span)),
        }
    }
    classes.classes.insert(
        class.name.clone(),
        ClassInfo {
            name: class.name.clone(),
            qualname: qualname.to_string(),
            bases,
            fields: HashMap::new(),
            methods: HashMap::new(),
            span: class.span,
        },
    );
    classes.settle_exceptions();
    errors
}

/// Collect the fields and method signatures of a declared class
pub fn collect_members(
    classes: &mut ClassTable,
    signatures: &mut Signatures,
    class: &ClassDef,
    strict: bool,
) -> Vec<Error> {
    let mut errors = Vec::new();
    let Some(qualname) = classes.get(&class.name).map(|c| c.qualname.clone()) else {
        return errors;
    };

    for base in classes.get(&class.name).map(|c| c.bases.clone()).unwrap_or_default() {
        if !classes.contains(&base) && !classes.is_exception(&base) {
            errors.push(Error::UndefinedName {
                name: base,
                span: class.span,
            });
        }
    }

    let mut fields: HashMap<String, TypeInfo> = HashMap::new();
    let mut methods = HashMap::new();
    for stmt in &class.body {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                let method_qual = format!("{}.{}", qualname, def.name);
                let (sig, errs) = function_signature(def, &method_qual, Some(&class.name), classes, strict);
                errors.extend(errs);
                collect_instance_fields(def, &sig, classes, &mut fields);
                signatures.insert(method_qual.clone(), sig);
                methods.insert(def.name.clone(), method_qual);
            }
            StmtKind::AnnAssign {
                target, annotation, ..
            } => {
                if let Some(name) = target.as_name() {
                    let info = annotation_type(annotation, classes).unwrap_or_else(|err| {
                        errors.push(err);
                        TypeInfo::unknown()
                    });
                    fields.insert(name.to_string(), info);
                }
            }
            StmtKind::Assign { targets, value } => {
                let info = literal_type(value).unwrap_or_else(TypeInfo::unknown);
                for name in targets.iter().filter_map(|t| t.as_name()) {
                    add_field(&mut fields, name, info.clone());
                }
            }
            _ => {}
        }
    }

    debug!(
        "collected class {} ({} fields, {} methods)",
        qualname,
        fields.len(),
        methods.len()
    );
    if let Some(info) = classes.classes.get_mut(&class.name) {
        info.fields = fields;
        info.methods = methods;
    }
    errors
}

fn add_field(fields: &mut HashMap<String, TypeInfo>, name: &str, info: TypeInfo) {
    let joined = match fields.get(name) {
        Some(existing) => existing.join(&info),
        None => info,
    };
    fields.insert(name.to_string(), joined);
}

/// Fields assigned through the receiver (`self.x = ...`) anywhere in a method
fn collect_instance_fields(
    def: &FunctionDef,
    sig: &Signature,
    classes: &ClassTable,
    fields: &mut HashMap<String, TypeInfo>,
) {
    let Some(receiver) = def.params.first().map(|p| p.name.as_str()) else {
        return;
    };
    let value_type = |value: &Expr| -> TypeInfo {
        if let Some(info) = literal_type(value) {
            return info;
        }
        value
            .as_name()
            .and_then(|n| sig.param_index(n))
            .filter(|&i| i > 0)
            .map(|i| sig.params[i].ty.clone())
            .unwrap_or_else(TypeInfo::unknown)
    };
    let field_of = |target: &Expr| -> Option<String> {
        match &target.kind {
            ExprKind::Attribute { value, attr } if value.as_name() == Some(receiver) => Some(attr.clone()),
            _ => None,
        }
    };

    let mut stack: Vec<&Stmt> = def.body.iter().collect();
    while let Some(stmt) = stack.pop() {
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                for field in targets.iter().filter_map(field_of) {
                    add_field(fields, &field, value_type(value));
                }
            }
            StmtKind::AnnAssign {
                target, annotation, ..
            } => {
                if let Some(field) = field_of(target) {
                    let info = annotation_type(annotation, classes).unwrap_or_else(|_| TypeInfo::unknown());
                    fields.insert(field, info);
                }
            }
            StmtKind::If { body, orelse, .. }
            | StmtKind::While { body, orelse, .. }
            | StmtKind::For { body, orelse, .. } => stack.extend(body.iter().chain(orelse)),
            StmtKind::Try(t) => {
                stack.extend(t.body.iter().chain(&t.orelse).chain(&t.finalbody));
                for handler in &t.handlers {
                    stack.extend(&handler.body);
                }
            }
            _ => {}
        }
    }
}

/// Result of the first pass over a module
pub struct Collected {
    pub classes: ClassTable,
    pub signatures: Signatures,
    pub errors: Vec<Error>,
}

/// Collect top-level classes and functions
pub fn collect_module(module: &Module, strict: bool) -> Collected {
    let mut classes = ClassTable::new();
    let mut signatures = Signatures::new();
    let mut errors = Vec::new();

    for stmt in &module.body {
        if let StmtKind::ClassDef(class) = &stmt.kind {
            errors.extend(declare_class(&mut classes, class, &class.name));
        }
    }
    for stmt in &module.body {
        match &stmt.kind {
            StmtKind::ClassDef(class) => {
                errors.extend(collect_members(&mut classes, &mut signatures, class, strict))
            }
            StmtKind::FunctionDef(def) => {
                let (sig, errs) = function_signature(def, &def.name, None, &classes, strict);
                errors.extend(errs);
                signatures.insert(def.name.clone(), sig);
            }
            _ => {}
        }
    }

    debug!(
        "collected {} signatures and {} classes in {}",
        signatures.len(),
        classes.classes.len(),
        module.file
    );
    Collected {
        classes,
        signatures,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn collect(source: &str) -> Collected {
        let module = parse_source(source, "t.py").unwrap();
        collect_module(&module, false)
    }

    fn annotation(source: &str, classes: &ClassTable) -> Result<TypeInfo> {
        let module = parse_source(&format!("x: {}\n", source), "t.py").unwrap();
        match &module.body[0].kind {
            StmtKind::AnnAssign { annotation, .. } => annotation_type(annotation, classes),
            other => panic!("expected annotated assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_annotations() {
        let classes = ClassTable::new();
        let optional = annotation("Optional[int]", &classes).unwrap();
        assert_eq!(optional.set, TypeSet::from_tags([TypeTag::Int, TypeTag::NoneType]));
        let union = annotation("int | str | None", &classes).unwrap();
        assert_eq!(union.set.len(), 3);
        assert_eq!(
            annotation("dict[str, list[int]]", &classes).unwrap().to_string(),
            "dict[str, list]"
        );
        let tuple = annotation("tuple[int, ...]", &classes).unwrap();
        assert_eq!(tuple.elem, Some(TypeSet::single(TypeTag::Int)));
        assert!(annotation("Any", &classes).unwrap().is_unknown());
        assert!(matches!(
            annotation("Missing", &classes),
            Err(Error::UndefinedName { .. })
        ));
    }

    #[test]
    fn test_signatures_and_passthrough() {
        let collected = collect(
            "def ident(a: int) -> int:\n    \"doc\"\n    return a\n\ndef f(a: int, /, b: int = 2, *rest: str) -> None:\n    pass\n",
        );
        assert!(collected.errors.is_empty());
        let ident = &collected.signatures["ident"];
        assert_eq!(ident.passthrough, Some(0));
        let f = &collected.signatures["f"];
        assert_eq!(f.passthrough, None);
        assert_eq!(f.params[0].kind, ParamKind::PositionalOnly);
        assert!(f.params[1].has_default());
        assert_eq!(f.params[2].ty, TypeInfo::of(TypeTag::Str));
        assert_eq!(f.ret, TypeInfo::none());
    }

    #[test]
    fn test_classes_fields_and_forward_references() {
        let collected = collect(
            "class Node:\n    def __init__(self, value: int, nxt: \"Optional[Node]\" = None):\n        self.value = value\n        self.next = nxt\n        self.seen = False\n\nclass Special(Node):\n    kind = \"special\"\n",
        );
        assert!(collected.errors.is_empty(), "{:?}", collected.errors);
        let classes = &collected.classes;
        assert_eq!(classes.find_field("Node", "value"), Some(&TypeInfo::of(TypeTag::Int)));
        assert_eq!(classes.find_field("Special", "seen"), Some(&TypeInfo::of(TypeTag::Bool)));
        assert_eq!(classes.find_method("Special", "__init__"), Some("Node.__init__"));
        assert!(classes.is_subclass("Special", "Node"));
        assert!(!classes.is_subclass("Node", "Special"));
        let init = &collected.signatures["Node.__init__"];
        assert_eq!(init.params[0].ty, TypeInfo::of(TypeTag::Object("Node".into())));
    }

    #[test]
    fn test_user_exceptions_registered() {
        let collected = collect("class AppError(Exception):\n    pass\n\nclass DbError(AppError):\n    pass\n");
        let classes = &collected.classes;
        assert!(classes.is_exception("DbError"));
        assert!(classes.is_subclass("DbError", "Exception"));
        assert_eq!(
            classes.instance_tag("DbError"),
            Some(TypeTag::Object("DbError".into()))
        );
    }

    #[test]
    fn test_strict_mode_requires_annotations() {
        let module = parse_source("def f(x):\n    return x\n", "t.py").unwrap();
        let collected = collect_module(&module, true);
        assert_eq!(collected.errors.len(), 2);
    }
}
