//! Flow-sensitive variable environments

use crate::types::TypeInfo;
use std::collections::HashMap;

/// What a called name refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// User function or method, by qualified name
    User(String),
    /// Built-in table entry (module, attribute)
    Builtin(String, String),
}

/// The facts known about one variable at a program point
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub info: TypeInfo,
    pub canonical: Option<String>,
    pub target: Option<CallTarget>,
}

impl Binding {
    pub fn new(info: TypeInfo, canonical: Option<String>) -> Self {
        Self {
            info,
            canonical,
            target: None,
        }
    }

    pub fn callable(info: TypeInfo, target: CallTarget) -> Self {
        Self {
            info,
            canonical: None,
            target: Some(target),
        }
    }

    /// Join two bindings reaching the same point
    pub fn join(&self, other: &Binding) -> Binding {
        Binding {
            info: self.info.join(&other.info),
            canonical: if self.canonical == other.canonical {
                self.canonical.clone()
            } else {
                None
            },
            target: if self.target == other.target {
                self.target.clone()
            } else {
                None
            },
        }
    }
}

/// Insertion-ordered mapping from identifier to binding
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    order: Vec<String>,
    entries: HashMap<String, Binding>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.entries.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Bind or rebind a name; rebinding keeps its original position
    pub fn bind(&mut self, name: &str, binding: Binding) {
        if self.entries.insert(name.to_string(), binding).is_none() {
            self.order.push(name.to_string());
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Binding> {
        let removed = self.entries.remove(name);
        if removed.is_some() {
            self.order.retain(|n| n != name);
        }
        removed
    }

    /// Names in binding order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.order
            .iter()
            .filter_map(|n| self.entries.get(n).map(|b| (n.as_str(), b)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Merge two branches: only names bound on both survive, types joined
    pub fn merge(&self, other: &Environment) -> Environment {
        let mut merged = Environment::new();
        for (name, binding) in self.iter() {
            if let Some(theirs) = other.get(name) {
                merged.bind(name, binding.join(theirs));
            }
        }
        merged
    }

    /// State after a loop: names bound before the loop, joined with the
    /// state at the end of the body (the body may run zero times)
    pub fn merge_loop(&self, body_end: &Environment) -> Environment {
        let mut merged = Environment::new();
        for (name, binding) in self.iter() {
            let joined = match body_end.get(name) {
                Some(theirs) => binding.join(theirs),
                None => binding.clone(),
            };
            merged.bind(name, joined);
        }
        merged
    }

    /// Bindings of `self` for the names `scope` also binds
    pub fn restrict_to(&self, scope: &Environment) -> Environment {
        let mut kept = Environment::new();
        for (name, binding) in self.iter() {
            if scope.contains(name) {
                kept.bind(name, binding.clone());
            }
        }
        kept
    }
}

/// Merge the environments of the branches that fall through;
/// `None` when every branch terminates
pub fn merge_all(branches: Vec<Environment>) -> Option<Environment> {
    branches.into_iter().reduce(|acc, env| acc.merge(&env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeSet, TypeTag};
    use pretty_assertions::assert_eq;

    fn int() -> Binding {
        Binding::new(TypeInfo::of(TypeTag::Int), Some("k".into()))
    }

    fn string() -> Binding {
        Binding::new(TypeInfo::of(TypeTag::Str), None)
    }

    #[test]
    fn test_bind_preserves_order() {
        let mut env = Environment::new();
        env.bind("b", int());
        env.bind("a", int());
        env.bind("b", string());
        let names: Vec<&str> = env.names().collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(env.get("b"), Some(&string()));
    }

    #[test]
    fn test_merge_intersects_and_joins() {
        let mut left = Environment::new();
        left.bind("x", int());
        left.bind("only_left", int());
        let mut right = Environment::new();
        right.bind("x", string());

        let merged = left.merge(&right);
        assert_eq!(merged.len(), 1);
        let x = merged.get("x").expect("x survives");
        assert_eq!(x.info.set, TypeSet::from_tags([TypeTag::Int, TypeTag::Str]));
        assert_eq!(x.canonical, None);
    }

    #[test]
    fn test_merge_loop_drops_body_only_names() {
        let mut before = Environment::new();
        before.bind("n", int());
        let mut body = before.clone();
        body.bind("z", int());
        body.bind("n", string());

        let after = before.merge_loop(&body);
        assert!(!after.contains("z"));
        assert_eq!(after.get("n").map(|b| b.info.set.len()), Some(2));
    }

    #[test]
    fn test_merge_all_of_nothing() {
        assert!(merge_all(Vec::new()).is_none());
    }
}
