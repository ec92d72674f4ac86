//! Built-in Signature Registry
//!
//! Signatures of the built-in functions, methods of built-in types and the
//! supported standard modules, keyed by (module, attribute). Methods of
//! built-in types are keyed by (type name, method) and take the receiver as
//! their first parameter.

use crate::frontend::ast::ParamKind;
use crate::types::{SigParam, Signature, TypeInfo, TypeSet, TypeTag};
use std::collections::{HashMap, HashSet};

/// Version of the signature table; bump when an entry changes
pub const TABLE_VERSION: u32 = 1;

/// Names whose use is rejected because they evaluate or reflect dynamically
pub const REJECTED_NAMES: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "globals",
    "locals",
    "vars",
    "getattr",
    "setattr",
    "delattr",
];

/// Builtin type names usable as values (`int`, `list`, ...)
pub const TYPE_NAMES: &[&str] = &["int", "float", "bool", "str", "bytes", "list", "dict", "set", "tuple"];

/// How a built-in's result type follows from its arguments.
/// Indices refer to signature parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Returns {
    Fixed(TypeInfo),
    SameAs(usize),
    ElementOf(usize),
    /// Element of a container argument, otherwise the argument itself
    ElementOrSelf(usize),
    ListOf(usize),
    SetOf(usize),
    KeysOf(usize),
    ValuesOf(usize),
    /// `list[tuple]` of pairs (`items()`, `enumerate()`)
    PairsOf(usize),
    /// Dict value of `dict`, or the `default` argument's type (None when absent)
    ValueOrDefault { dict: usize, default: usize },
}

impl Returns {
    /// Compute the result type; `arg(i)` yields the type bound to parameter `i`
    pub fn apply(&self, arg: impl Fn(usize) -> Option<TypeInfo>) -> TypeInfo {
        let element = |i: usize| {
            arg(i)
                .map(|t| t.element())
                .unwrap_or_else(TypeSet::unknown)
        };
        match self {
            Returns::Fixed(info) => info.clone(),
            Returns::SameAs(i) => arg(*i).unwrap_or_else(TypeInfo::unknown),
            Returns::ElementOf(i) => TypeInfo::from_set(element(*i)),
            Returns::ElementOrSelf(i) => match arg(*i) {
                Some(info) if info.single().is_some_and(|t| t.is_container() || *t == TypeTag::Str) => {
                    TypeInfo::from_set(info.element())
                }
                Some(info) => info,
                None => TypeInfo::unknown(),
            },
            Returns::ListOf(i) => TypeInfo::list_of(element(*i)),
            Returns::SetOf(i) => TypeInfo::set_of(element(*i)),
            Returns::KeysOf(i) => TypeInfo::list_of(
                arg(*i)
                    .and_then(|t| t.key)
                    .unwrap_or_else(TypeSet::unknown),
            ),
            Returns::ValuesOf(i) => TypeInfo::list_of(
                arg(*i)
                    .and_then(|t| t.elem)
                    .unwrap_or_else(TypeSet::unknown),
            ),
            Returns::PairsOf(_) => TypeInfo::list_of(TypeSet::single(TypeTag::Tuple)),
            Returns::ValueOrDefault { dict, default } => {
                let value = arg(*dict)
                    .and_then(|t| t.elem)
                    .unwrap_or_else(TypeSet::unknown);
                let fallback = arg(*default)
                    .map(|t| t.set)
                    .unwrap_or_else(|| TypeSet::single(TypeTag::NoneType));
                TypeInfo::from_set(value.join(&fallback))
            }
        }
    }
}

/// Built-in function signature
#[derive(Debug, Clone)]
pub struct BuiltinFunc {
    pub module: String,
    pub name: String,
    pub signature: Signature,
    pub returns: Returns,
}

/// Registry of all built-in signatures
pub struct BuiltinRegistry {
    functions: HashMap<(String, String), BuiltinFunc>,
    constants: HashMap<(String, String), TypeInfo>,
    modules: HashSet<String>,
}

fn ty(tag: TypeTag) -> TypeInfo {
    TypeInfo::of(tag)
}

fn any() -> TypeInfo {
    TypeInfo::unknown()
}

fn p(name: &str, info: TypeInfo) -> SigParam {
    SigParam::required(name, info)
}

fn opt(name: &str, info: TypeInfo) -> SigParam {
    SigParam::optional(name, info)
}

fn kw(name: &str, info: TypeInfo) -> SigParam {
    SigParam::optional(name, info).with_kind(ParamKind::KeywordOnly)
}

fn receiver(tag: TypeTag) -> SigParam {
    SigParam::required("self", ty(tag)).with_kind(ParamKind::PositionalOnly)
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
            constants: HashMap::new(),
            modules: HashSet::new(),
        };
        registry.register_all();
        registry
    }

    fn register_all(&mut self) {
        self.register_functions();
        self.register_str_methods();
        self.register_list_methods();
        self.register_dict_methods();
        self.register_set_methods();
        self.register_math();
        self.register_random();
        self.register_time();
    }

    fn register(&mut self, module: &str, name: &str, params: Vec<SigParam>, returns: Returns) {
        let ret = match &returns {
            Returns::Fixed(info) => info.clone(),
            _ => TypeInfo::unknown(),
        };
        let display = if module == "builtins" {
            name.to_string()
        } else {
            format!("{}.{}", module, name)
        };
        self.functions.insert(
            (module.to_string(), name.to_string()),
            BuiltinFunc {
                module: module.to_string(),
                name: name.to_string(),
                signature: Signature::new(display, params, ret),
                returns,
            },
        );
    }

    fn constant(&mut self, module: &str, name: &str, info: TypeInfo) {
        self.constants
            .insert((module.to_string(), name.to_string()), info);
    }

    // ==================== builtins ====================

    fn register_functions(&mut self) {
        use Returns::*;
        use TypeTag::*;
        let b = "builtins";

        self.register(
            b,
            "print",
            vec![
                SigParam::var_args("values", any()),
                kw("sep", ty(Str)),
                kw("end", ty(Str)),
            ],
            Fixed(TypeInfo::none()),
        );
        self.register(b, "len", vec![p("obj", any())], Fixed(ty(Int)));
        self.register(
            b,
            "range",
            vec![p("start", ty(Int)), opt("stop", ty(Int)), opt("step", ty(Int))],
            Fixed(TypeInfo::list_of(TypeSet::single(Int))),
        );
        self.register(b, "abs", vec![p("x", ty(Float))], SameAs(0));
        for name in ["min", "max"] {
            self.register(
                b,
                name,
                vec![p("first", any()), SigParam::var_args("rest", any())],
                ElementOrSelf(0),
            );
        }
        self.register(b, "sum", vec![p("iterable", any()), opt("start", ty(Int))], ElementOf(0));
        self.register(b, "sorted", vec![p("iterable", any()), kw("reverse", ty(Bool))], ListOf(0));
        self.register(b, "reversed", vec![p("sequence", any())], ListOf(0));
        self.register(b, "enumerate", vec![p("iterable", any()), opt("start", ty(Int))], PairsOf(0));
        self.register(
            b,
            "zip",
            vec![SigParam::var_args("iterables", any())],
            Fixed(TypeInfo::list_of(TypeSet::single(Tuple))),
        );
        self.register(b, "isinstance", vec![p("obj", any()), p("classinfo", any())], Fixed(ty(Bool)));
        self.register(b, "int", vec![opt("x", any())], Fixed(ty(Int)));
        self.register(b, "float", vec![opt("x", any())], Fixed(ty(Float)));
        self.register(b, "str", vec![opt("object", any())], Fixed(ty(Str)));
        self.register(b, "bool", vec![opt("x", any())], Fixed(ty(Bool)));
        self.register(b, "bytes", vec![opt("source", any())], Fixed(ty(Bytes)));
        self.register(b, "list", vec![opt("iterable", any())], ListOf(0));
        self.register(b, "set", vec![opt("iterable", any())], SetOf(0));
        self.register(b, "tuple", vec![opt("iterable", any())], Fixed(ty(Tuple)));
        self.register(
            b,
            "dict",
            vec![SigParam::kw_var_args("kwargs", any())],
            Fixed(TypeInfo::dict_of(TypeSet::unknown(), TypeSet::unknown())),
        );
        self.register(b, "repr", vec![p("obj", any())], Fixed(ty(Str)));
        self.register(b, "input", vec![opt("prompt", ty(Str))], Fixed(ty(Str)));
        self.register(b, "round", vec![p("number", ty(Float)), opt("ndigits", ty(Int))], Fixed(ty(Int)));
        self.register(b, "ord", vec![p("c", ty(Str))], Fixed(ty(Int)));
        self.register(b, "chr", vec![p("i", ty(Int))], Fixed(ty(Str)));
        self.register(b, "any", vec![p("iterable", any())], Fixed(ty(Bool)));
        self.register(b, "all", vec![p("iterable", any())], Fixed(ty(Bool)));
        self.register(b, "hash", vec![p("obj", any())], Fixed(ty(Int)));
        self.register(b, "id", vec![p("obj", any())], Fixed(ty(Int)));
        self.register(
            b,
            "divmod",
            vec![p("a", ty(Float)), p("b", ty(Float))],
            Fixed(ty(Tuple)),
        );
        self.register(b, "pow", vec![p("base", ty(Float)), p("exp", ty(Float))], SameAs(0));
        self.register(b, "hex", vec![p("x", ty(Int))], Fixed(ty(Str)));
        self.register(b, "bin", vec![p("x", ty(Int))], Fixed(ty(Str)));
    }

    // ==================== Methods of built-in types ====================

    fn register_str_methods(&mut self) {
        use Returns::*;
        use TypeTag::*;
        let s = "str";
        let str_list = || TypeInfo::list_of(TypeSet::single(Str));

        for name in ["upper", "lower", "title", "capitalize", "casefold"] {
            self.register(s, name, vec![receiver(Str)], Fixed(ty(Str)));
        }
        for name in ["strip", "lstrip", "rstrip"] {
            self.register(s, name, vec![receiver(Str), opt("chars", ty(Str))], Fixed(ty(Str)));
        }
        for name in ["isdigit", "isalpha", "isalnum", "isspace", "isupper", "islower"] {
            self.register(s, name, vec![receiver(Str)], Fixed(ty(Bool)));
        }
        for name in ["startswith", "endswith"] {
            self.register(s, name, vec![receiver(Str), p("affix", ty(Str))], Fixed(ty(Bool)));
        }
        for name in ["find", "rfind", "index", "count"] {
            self.register(s, name, vec![receiver(Str), p("sub", ty(Str))], Fixed(ty(Int)));
        }
        self.register(
            s,
            "split",
            vec![
                receiver(Str),
                SigParam::optional("sep", TypeInfo::from_set(TypeSet::from_tags([Str, NoneType]))),
                opt("maxsplit", ty(Int)),
            ],
            Fixed(str_list()),
        );
        self.register(s, "splitlines", vec![receiver(Str)], Fixed(str_list()));
        self.register(s, "join", vec![receiver(Str), p("iterable", any())], Fixed(ty(Str)));
        self.register(
            s,
            "replace",
            vec![receiver(Str), p("old", ty(Str)), p("new", ty(Str)), opt("count", ty(Int))],
            Fixed(ty(Str)),
        );
        self.register(
            s,
            "format",
            vec![
                receiver(Str),
                SigParam::var_args("args", any()),
                SigParam::kw_var_args("kwargs", any()),
            ],
            Fixed(ty(Str)),
        );
        self.register(s, "encode", vec![receiver(Str), opt("encoding", ty(Str))], Fixed(ty(Bytes)));
        self.register("bytes", "decode", vec![receiver(Bytes), opt("encoding", ty(Str))], Fixed(ty(Str)));
    }

    fn register_list_methods(&mut self) {
        use Returns::*;
        use TypeTag::*;
        let l = "list";
        let none = || Fixed(TypeInfo::none());

        self.register(l, "append", vec![receiver(List), p("item", any())], none());
        self.register(l, "extend", vec![receiver(List), p("iterable", any())], none());
        self.register(l, "insert", vec![receiver(List), p("index", ty(Int)), p("item", any())], none());
        self.register(l, "remove", vec![receiver(List), p("value", any())], none());
        self.register(l, "pop", vec![receiver(List), opt("index", ty(Int))], ElementOf(0));
        self.register(l, "index", vec![receiver(List), p("value", any())], Fixed(ty(Int)));
        self.register(l, "count", vec![receiver(List), p("value", any())], Fixed(ty(Int)));
        self.register(l, "sort", vec![receiver(List), kw("reverse", ty(Bool))], none());
        self.register(l, "reverse", vec![receiver(List)], none());
        self.register(l, "clear", vec![receiver(List)], none());
        self.register(l, "copy", vec![receiver(List)], SameAs(0));
    }

    fn register_dict_methods(&mut self) {
        use Returns::*;
        use TypeTag::*;
        let d = "dict";

        for name in ["get", "pop", "setdefault"] {
            self.register(
                d,
                name,
                vec![receiver(Dict), p("key", any()), SigParam::optional("default", TypeInfo::none())],
                ValueOrDefault { dict: 0, default: 2 },
            );
        }
        self.register(d, "keys", vec![receiver(Dict)], KeysOf(0));
        self.register(d, "values", vec![receiver(Dict)], ValuesOf(0));
        self.register(d, "items", vec![receiver(Dict)], PairsOf(0));
        self.register(d, "update", vec![receiver(Dict), p("other", any())], Fixed(TypeInfo::none()));
        self.register(d, "clear", vec![receiver(Dict)], Fixed(TypeInfo::none()));
        self.register(d, "copy", vec![receiver(Dict)], SameAs(0));
    }

    fn register_set_methods(&mut self) {
        use Returns::*;
        use TypeTag::*;
        let s = "set";

        for name in ["add", "remove", "discard"] {
            self.register(s, name, vec![receiver(Set), p("item", any())], Fixed(TypeInfo::none()));
        }
        for name in ["union", "intersection", "difference"] {
            self.register(s, name, vec![receiver(Set), p("other", any())], SameAs(0));
        }
        for name in ["issubset", "issuperset", "isdisjoint"] {
            self.register(s, name, vec![receiver(Set), p("other", any())], Fixed(ty(Bool)));
        }
        self.register(s, "clear", vec![receiver(Set)], Fixed(TypeInfo::none()));
        self.register(s, "copy", vec![receiver(Set)], SameAs(0));
    }

    // ==================== Standard modules ====================

    fn register_math(&mut self) {
        use Returns::*;
        use TypeTag::*;
        let m = "math";
        self.modules.insert(m.to_string());

        for name in ["sqrt", "exp", "sin", "cos", "tan", "fabs", "log2", "log10"] {
            self.register(m, name, vec![p("x", ty(Float))], Fixed(ty(Float)));
        }
        for name in ["floor", "ceil", "trunc"] {
            self.register(m, name, vec![p("x", ty(Float))], Fixed(ty(Int)));
        }
        for name in ["isnan", "isinf", "isfinite"] {
            self.register(m, name, vec![p("x", ty(Float))], Fixed(ty(Bool)));
        }
        self.register(m, "log", vec![p("x", ty(Float)), opt("base", ty(Float))], Fixed(ty(Float)));
        self.register(m, "pow", vec![p("x", ty(Float)), p("y", ty(Float))], Fixed(ty(Float)));
        self.register(m, "hypot", vec![SigParam::var_args("coordinates", ty(Float))], Fixed(ty(Float)));
        self.register(m, "isqrt", vec![p("n", ty(Int))], Fixed(ty(Int)));
        self.register(m, "factorial", vec![p("n", ty(Int))], Fixed(ty(Int)));
        self.register(m, "gcd", vec![p("a", ty(Int)), p("b", ty(Int))], Fixed(ty(Int)));

        for name in ["pi", "e", "tau", "inf", "nan"] {
            self.constant(m, name, ty(Float));
        }
    }

    fn register_random(&mut self) {
        use Returns::*;
        use TypeTag::*;
        let r = "random";
        self.modules.insert(r.to_string());

        self.register(r, "random", vec![], Fixed(ty(Float)));
        self.register(r, "randint", vec![p("a", ty(Int)), p("b", ty(Int))], Fixed(ty(Int)));
        self.register(r, "uniform", vec![p("a", ty(Float)), p("b", ty(Float))], Fixed(ty(Float)));
        self.register(r, "choice", vec![p("seq", any())], ElementOf(0));
        self.register(r, "shuffle", vec![p("x", ty(List))], Fixed(TypeInfo::none()));
        self.register(r, "seed", vec![opt("a", any())], Fixed(TypeInfo::none()));
    }

    fn register_time(&mut self) {
        use Returns::*;
        use TypeTag::*;
        let t = "time";
        self.modules.insert(t.to_string());

        for name in ["time", "perf_counter", "monotonic"] {
            self.register(t, name, vec![], Fixed(ty(Float)));
        }
        self.register(t, "sleep", vec![p("secs", ty(Float))], Fixed(TypeInfo::none()));
    }

    // ==================== Queries ====================

    /// Look up `module.attr`; plain built-in functions live in module `builtins`
    pub fn get(&self, module: &str, attr: &str) -> Option<&BuiltinFunc> {
        self.functions.get(&(module.to_string(), attr.to_string()))
    }

    /// Method of a built-in type, keyed by the receiver's tag
    pub fn method(&self, receiver: &TypeTag, attr: &str) -> Option<&BuiltinFunc> {
        let type_name = receiver.builtin_name()?;
        self.get(type_name, attr)
    }

    /// Constant attribute of a module (`math.pi`)
    pub fn module_constant(&self, module: &str, name: &str) -> Option<&TypeInfo> {
        self.constants.get(&(module.to_string(), name.to_string()))
    }

    /// Whether `import name` is supported
    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains(name)
    }

    /// Whether `module` exports `attr` as a function or constant
    pub fn module_exports(&self, module: &str, attr: &str) -> bool {
        self.get(module, attr).is_some() || self.module_constant(module, attr).is_some()
    }

    /// Whether the name is rejected outright
    pub fn is_rejected(name: &str) -> bool {
        REJECTED_NAMES.contains(&name)
    }

    pub fn version(&self) -> u32 {
        TABLE_VERSION
    }

    /// Get all built-in functions
    pub fn all(&self) -> impl Iterator<Item = &BuiltinFunc> {
        self.functions.values()
    }
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lookup_by_module_and_attr() {
        let registry = BuiltinRegistry::new();
        let sqrt = registry.get("math", "sqrt").expect("math.sqrt registered");
        assert_eq!(sqrt.signature.name, "math.sqrt");
        assert_eq!(sqrt.signature.params.len(), 1);
        assert!(registry.get("math", "nope").is_none());
        assert!(registry.has_module("math"));
        assert!(!registry.has_module("os"));
        assert!(registry.module_exports("math", "pi"));
        assert_eq!(registry.version(), TABLE_VERSION);
    }

    #[test]
    fn test_methods_take_receiver_first() {
        let registry = BuiltinRegistry::new();
        let upper = registry.method(&TypeTag::Str, "upper").expect("str.upper registered");
        assert_eq!(upper.signature.params[0].name, "self");
        assert!(registry.method(&TypeTag::Int, "upper").is_none());
    }

    #[test]
    fn test_return_rules() {
        let ints = TypeInfo::list_of(TypeSet::single(TypeTag::Int));
        let arg = |i: usize| if i == 0 { Some(ints.clone()) } else { None };
        assert_eq!(Returns::ElementOf(0).apply(arg), TypeInfo::of(TypeTag::Int));
        assert_eq!(Returns::ElementOrSelf(0).apply(arg), TypeInfo::of(TypeTag::Int));

        let dict = TypeInfo::dict_of(TypeSet::single(TypeTag::Str), TypeSet::single(TypeTag::Int));
        let get = Returns::ValueOrDefault { dict: 0, default: 2 };
        let result = get.apply(|i| if i == 0 { Some(dict.clone()) } else { None });
        assert_eq!(
            result.set,
            TypeSet::from_tags([TypeTag::Int, TypeTag::NoneType])
        );
    }

    #[test]
    fn test_rejected_names() {
        assert!(BuiltinRegistry::is_rejected("eval"));
        assert!(BuiltinRegistry::is_rejected("__import__"));
        assert!(!BuiltinRegistry::is_rejected("print"));
    }
}
