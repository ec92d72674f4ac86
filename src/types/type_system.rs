//! Type lattice for Serpent
//!
//! A value's type at a program point is a [`TypeSet`]: the set of concrete
//! tags it may carry. Branch merges are set union and never fail; the
//! ambiguity is reported later, where a single concrete type is required.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

// ==================== Type Tags ====================

/// A concrete runtime category
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TypeTag {
    Int,
    Float,
    Bool,
    Str,
    Bytes,
    NoneType,
    List,
    Dict,
    Tuple,
    Set,
    /// Instance of a user or exception class
    Object(String),
    /// The class object itself (`int`, `ValueError`, a user class used as a value)
    Class(String),
    /// A function value
    Callable,
    /// An imported module
    Module(String),
    /// Poison: silences every check it reaches
    Unknown,
}

impl TypeTag {
    /// Map a builtin type name used in annotations or `isinstance` to its tag
    pub fn from_builtin_name(name: &str) -> Option<TypeTag> {
        let tag = match name {
            "int" => TypeTag::Int,
            "float" => TypeTag::Float,
            "bool" => TypeTag::Bool,
            "str" => TypeTag::Str,
            "bytes" => TypeTag::Bytes,
            "None" | "NoneType" => TypeTag::NoneType,
            "list" | "List" => TypeTag::List,
            "dict" | "Dict" => TypeTag::Dict,
            "tuple" | "Tuple" => TypeTag::Tuple,
            "set" | "Set" => TypeTag::Set,
            _ => return None,
        };
        Some(tag)
    }

    /// The builtin type name used to key method tables
    pub fn builtin_name(&self) -> Option<&'static str> {
        Some(match self {
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Bool => "bool",
            TypeTag::Str => "str",
            TypeTag::Bytes => "bytes",
            TypeTag::NoneType => "None",
            TypeTag::List => "list",
            TypeTag::Dict => "dict",
            TypeTag::Tuple => "tuple",
            TypeTag::Set => "set",
            _ => return None,
        })
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, TypeTag::Int | TypeTag::Float | TypeTag::Bool)
    }

    /// Containers that carry element information
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            TypeTag::List | TypeTag::Dict | TypeTag::Tuple | TypeTag::Set
        )
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Object(name) => write!(f, "{}", name),
            TypeTag::Class(name) => write!(f, "type[{}]", name),
            TypeTag::Callable => write!(f, "function"),
            TypeTag::Module(name) => write!(f, "module '{}'", name),
            TypeTag::Unknown => write!(f, "<unknown>"),
            other => write!(f, "{}", other.builtin_name().unwrap_or("?")),
        }
    }
}

// ==================== Type Sets ====================

/// A non-empty set of possible tags
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TypeSet(BTreeSet<TypeTag>);

impl TypeSet {
    pub fn single(tag: TypeTag) -> Self {
        Self::from_tags([tag])
    }

    pub fn unknown() -> Self {
        Self::single(TypeTag::Unknown)
    }

    /// Build a set; an empty input yields `{Unknown}` and Unknown absorbs everything
    pub fn from_tags(tags: impl IntoIterator<Item = TypeTag>) -> Self {
        let tags: BTreeSet<TypeTag> = tags.into_iter().collect();
        if tags.is_empty() || tags.contains(&TypeTag::Unknown) {
            let mut only = BTreeSet::new();
            only.insert(TypeTag::Unknown);
            return TypeSet(only);
        }
        TypeSet(tags)
    }

    /// Least upper bound: set union
    pub fn join(&self, other: &TypeSet) -> TypeSet {
        Self::from_tags(self.0.iter().chain(other.0.iter()).cloned())
    }

    /// Remove every tag matching `pred`; `None` when nothing would remain
    pub fn without(&self, pred: impl Fn(&TypeTag) -> bool) -> Option<TypeSet> {
        let rest: BTreeSet<TypeTag> = self.0.iter().filter(|t| !pred(t)).cloned().collect();
        if rest.is_empty() {
            None
        } else {
            Some(TypeSet(rest))
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.0.contains(&TypeTag::Unknown)
    }

    pub fn contains(&self, tag: &TypeTag) -> bool {
        self.0.contains(tag)
    }

    /// The only tag, when the set is a singleton
    pub fn as_single(&self) -> Option<&TypeTag> {
        if self.0.len() == 1 {
            self.0.iter().next()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeTag> {
        self.0.iter()
    }
}

impl fmt::Display for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", parts.join(" | "))
    }
}

/// Set union of two type sets
pub fn join(a: &TypeSet, b: &TypeSet) -> TypeSet {
    a.join(b)
}

/// `actual` may be used where exactly `required` is needed
pub fn compatible(required: &TypeTag, actual: &TypeSet) -> bool {
    if actual.is_unknown() || *required == TypeTag::Unknown {
        return true;
    }
    actual.as_single() == Some(required)
}

// ==================== Type Info ====================

/// A type set plus what is known about its contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub set: TypeSet,
    /// List/set element type, dict value type, homogeneous tuple element type
    pub elem: Option<TypeSet>,
    /// Dict key type
    pub key: Option<TypeSet>,
    /// Positional tuple item types
    pub items: Option<Vec<TypeSet>>,
    /// Narrowing removed every possibility on this path
    pub contradicted: bool,
}

impl TypeInfo {
    pub fn from_set(set: TypeSet) -> Self {
        Self {
            set,
            elem: None,
            key: None,
            items: None,
            contradicted: false,
        }
    }

    pub fn of(tag: TypeTag) -> Self {
        Self::from_set(TypeSet::single(tag))
    }

    pub fn unknown() -> Self {
        Self::of(TypeTag::Unknown)
    }

    pub fn none() -> Self {
        Self::of(TypeTag::NoneType)
    }

    pub fn list_of(elem: TypeSet) -> Self {
        Self {
            elem: Some(elem),
            ..Self::of(TypeTag::List)
        }
    }

    pub fn set_of(elem: TypeSet) -> Self {
        Self {
            elem: Some(elem),
            ..Self::of(TypeTag::Set)
        }
    }

    pub fn dict_of(key: TypeSet, value: TypeSet) -> Self {
        Self {
            key: Some(key),
            elem: Some(value),
            ..Self::of(TypeTag::Dict)
        }
    }

    pub fn tuple_of(items: Vec<TypeSet>) -> Self {
        let elem = items.iter().cloned().reduce(|a, b| a.join(&b));
        Self {
            elem,
            items: Some(items),
            ..Self::of(TypeTag::Tuple)
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.set.is_unknown()
    }

    /// The only tag, when exactly one is possible
    pub fn single(&self) -> Option<&TypeTag> {
        self.set.as_single()
    }

    /// Element type for iteration; Unknown when not tracked
    pub fn element(&self) -> TypeSet {
        match self.single() {
            Some(TypeTag::Str) => TypeSet::single(TypeTag::Str),
            Some(TypeTag::Bytes) => TypeSet::single(TypeTag::Int),
            Some(TypeTag::Dict) => self.key.clone().unwrap_or_else(TypeSet::unknown),
            _ => self.elem.clone().unwrap_or_else(TypeSet::unknown),
        }
    }

    /// Componentwise join
    pub fn join(&self, other: &TypeInfo) -> TypeInfo {
        let items = match (&self.items, &other.items) {
            (Some(a), Some(b)) if a.len() == b.len() => {
                Some(a.iter().zip(b).map(|(x, y)| x.join(y)).collect())
            }
            (Some(a), None) if !other.set.contains(&TypeTag::Tuple) => Some(a.clone()),
            (None, Some(b)) if !self.set.contains(&TypeTag::Tuple) => Some(b.clone()),
            _ => None,
        };
        TypeInfo {
            set: self.set.join(&other.set),
            elem: join_opt(&self.elem, &other.elem),
            key: join_opt(&self.key, &other.key),
            items,
            contradicted: self.contradicted && other.contradicted,
        }
    }

    /// Replace the set, dropping container details the new set cannot carry
    pub fn narrowed(&self, set: TypeSet, contradicted: bool) -> TypeInfo {
        let keeps_containers = set.iter().any(|t| t.is_container());
        TypeInfo {
            elem: self.elem.clone().filter(|_| keeps_containers),
            key: self.key.clone().filter(|_| keeps_containers),
            items: self.items.clone().filter(|_| set.contains(&TypeTag::Tuple)),
            set,
            contradicted,
        }
    }
}

fn join_opt(a: &Option<TypeSet>, b: &Option<TypeSet>) -> Option<TypeSet> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.join(b)),
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (None, None) => None,
    }
}

impl From<TypeSet> for TypeInfo {
    fn from(set: TypeSet) -> Self {
        TypeInfo::from_set(set)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .set
            .iter()
            .map(|tag| match (tag, &self.elem, &self.key, &self.items) {
                (TypeTag::Dict, Some(v), Some(k), _) => format!("dict[{}, {}]", k, v),
                (TypeTag::Tuple, _, _, Some(items)) => {
                    let items: Vec<String> = items.iter().map(|t| t.to_string()).collect();
                    format!("tuple[{}]", items.join(", "))
                }
                (TypeTag::List | TypeTag::Set, Some(e), _, _) => format!("{}[{}]", tag, e),
                _ => tag.to_string(),
            })
            .collect();
        write!(f, "{}", parts.join(" | "))?;
        if self.contradicted {
            write!(f, " (unreachable here)")?;
        }
        Ok(())
    }
}

// ==================== Subtyping ====================

/// Class relationships consulted by [`accepts`]
pub trait Subtyping {
    /// `sub` is `sup` or derives from it
    fn is_subclass(&self, sub: &str, sup: &str) -> bool;
}

/// Relation with no inheritance, for checks that involve no classes
pub struct NoSubclasses;

impl Subtyping for NoSubclasses {
    fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        sub == sup
    }
}

fn tag_accepts(declared: &TypeTag, actual: &TypeTag, rel: &dyn Subtyping) -> bool {
    match (declared, actual) {
        (d, a) if d == a => true,
        (TypeTag::Float, TypeTag::Int | TypeTag::Bool) => true,
        (TypeTag::Int, TypeTag::Bool) => true,
        (TypeTag::Object(sup), TypeTag::Object(sub)) => rel.is_subclass(sub, sup),
        (TypeTag::Class(sup), TypeTag::Class(sub)) => rel.is_subclass(sub, sup),
        _ => false,
    }
}

/// Every tag of `actual` is accepted by some tag of `declared`
pub fn set_accepts(declared: &TypeSet, actual: &TypeSet, rel: &dyn Subtyping) -> bool {
    if declared.is_unknown() || actual.is_unknown() {
        return true;
    }
    actual
        .iter()
        .all(|a| declared.iter().any(|d| tag_accepts(d, a, rel)))
}

/// A value of type `actual` may be stored where `declared` is expected
pub fn accepts(declared: &TypeInfo, actual: &TypeInfo, rel: &dyn Subtyping) -> bool {
    if declared.is_unknown() {
        return true;
    }
    if actual.contradicted {
        return false;
    }
    if !set_accepts(&declared.set, &actual.set, rel) {
        return false;
    }
    let part_accepts = |d: &Option<TypeSet>, a: &Option<TypeSet>| match (d, a) {
        (Some(d), Some(a)) => set_accepts(d, a, rel),
        _ => true,
    };
    if !part_accepts(&declared.elem, &actual.elem) || !part_accepts(&declared.key, &actual.key) {
        return false;
    }
    match (&declared.items, &actual.items) {
        (Some(d), Some(a)) => d.len() == a.len() && d.iter().zip(a).all(|(d, a)| set_accepts(d, a, rel)),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn set(tags: &[TypeTag]) -> TypeSet {
        TypeSet::from_tags(tags.iter().cloned())
    }

    #[test]
    fn test_never_empty() {
        assert_eq!(TypeSet::from_tags(Vec::new()), TypeSet::unknown());
        assert_eq!(set(&[TypeTag::Int, TypeTag::Unknown]), TypeSet::unknown());
        assert!(set(&[TypeTag::Int]).without(|t| *t == TypeTag::Int).is_none());
    }

    #[test]
    fn test_join_is_union() {
        let a = set(&[TypeTag::Int]);
        let b = set(&[TypeTag::Str, TypeTag::Int]);
        assert_eq!(join(&a, &b), join(&b, &a));
        assert_eq!(join(&a, &b).len(), 2);
        assert_eq!(join(&a, &a), a);
    }

    #[test]
    fn test_compatible_requires_singleton() {
        assert!(compatible(&TypeTag::Int, &set(&[TypeTag::Int])));
        assert!(!compatible(&TypeTag::Int, &set(&[TypeTag::Int, TypeTag::NoneType])));
        assert!(!compatible(&TypeTag::Int, &set(&[TypeTag::Str])));
        assert!(compatible(&TypeTag::Int, &TypeSet::unknown()));
    }

    #[test]
    fn test_accepts_numeric_widening_and_elements() {
        let rel = NoSubclasses;
        assert!(accepts(&TypeInfo::of(TypeTag::Float), &TypeInfo::of(TypeTag::Int), &rel));
        assert!(!accepts(&TypeInfo::of(TypeTag::Int), &TypeInfo::of(TypeTag::Float), &rel));

        let ints = TypeInfo::list_of(set(&[TypeTag::Int]));
        let strs = TypeInfo::list_of(set(&[TypeTag::Str]));
        let empty = TypeInfo::list_of(TypeSet::unknown());
        assert!(accepts(&ints, &ints, &rel));
        assert!(!accepts(&ints, &strs, &rel));
        assert!(accepts(&ints, &empty, &rel));

        let optional = TypeInfo::from_set(set(&[TypeTag::Int, TypeTag::NoneType]));
        assert!(accepts(&optional, &TypeInfo::none(), &rel));
        assert!(!accepts(&TypeInfo::of(TypeTag::Int), &optional, &rel));
    }

    #[test]
    fn test_contradicted_value_is_rejected() {
        let info = TypeInfo::of(TypeTag::Int).narrowed(set(&[TypeTag::Int]), true);
        assert!(!accepts(&TypeInfo::of(TypeTag::Int), &info, &NoSubclasses));
        assert!(accepts(&TypeInfo::unknown(), &info, &NoSubclasses));
    }

    #[test]
    fn test_display() {
        let info = TypeInfo::dict_of(set(&[TypeTag::Str]), set(&[TypeTag::Int]));
        assert_eq!(info.to_string(), "dict[str, int]");
        let optional = set(&[TypeTag::Str, TypeTag::NoneType]);
        assert_eq!(optional.to_string(), "str | None");
    }
}
