//! Condition refinement
//!
//! A condition yields two partial environment updates: one holding where it
//! is true and one where it is false. Updates only ever narrow; a narrowing
//! that would leave no possible type keeps the set and marks the binding
//! contradicted instead.

use super::env::Environment;
use crate::frontend::ast::{BoolOp, CmpOp, Expr, ExprKind, UnaryOp};
use crate::types::{Subtyping, TypeSet, TypeTag};
use log::trace;
use std::collections::BTreeMap;

/// Resolves the type names accepted by `isinstance`
pub trait TypeNames: Subtyping {
    /// The instance tag for a class name (`int` -> Int, `Point` -> Object)
    fn instance_tag(&self, name: &str) -> Option<TypeTag>;
}

/// The narrowed facts for one variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Narrowed {
    pub set: TypeSet,
    pub contradicted: bool,
}

impl Narrowed {
    /// A path that is already dead stays dead
    fn or_contradicted(mut self, contradicted: bool) -> Self {
        self.contradicted |= contradicted;
        self
    }
}

/// A partial environment update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta(BTreeMap<String, Narrowed>);

impl Delta {
    pub fn identity() -> Self {
        Self::default()
    }

    fn single(name: &str, narrowed: Narrowed) -> Self {
        let mut map = BTreeMap::new();
        map.insert(name.to_string(), narrowed);
        Delta(map)
    }

    pub fn is_identity(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Narrowed> {
        self.0.get(name)
    }

    /// Apply `self`, then `later`
    pub fn compose(&self, later: &Delta) -> Delta {
        let mut map = self.0.clone();
        for (name, narrowed) in &later.0 {
            let earlier = map.get(name).is_some_and(|n| n.contradicted);
            map.insert(name.clone(), narrowed.clone().or_contradicted(earlier));
        }
        Delta(map)
    }

    /// Facts holding on either of two paths, over the names both narrow
    pub fn union(&self, other: &Delta) -> Delta {
        let map = self
            .0
            .iter()
            .filter_map(|(name, a)| {
                other.0.get(name).map(|b| {
                    let narrowed = Narrowed {
                        set: a.set.join(&b.set),
                        contradicted: a.contradicted && b.contradicted,
                    };
                    (name.clone(), narrowed)
                })
            })
            .collect();
        Delta(map)
    }

    /// The environment with every narrowed binding replaced
    pub fn apply(&self, env: &Environment) -> Environment {
        let mut out = env.clone();
        for (name, narrowed) in &self.0 {
            if let Some(binding) = out.get_mut(name) {
                let contradicted = narrowed.contradicted || binding.info.contradicted;
                binding.info = binding.info.narrowed(narrowed.set.clone(), contradicted);
            }
        }
        out
    }
}

/// Updates for the true and false outcomes of a condition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Refinement {
    pub then: Delta,
    pub otherwise: Delta,
}

impl Refinement {
    fn swap(self) -> Self {
        Refinement {
            then: self.otherwise,
            otherwise: self.then,
        }
    }
}

/// Derive the refinement of `cond` evaluated in `env`
pub fn refine(cond: &Expr, env: &Environment, names: &dyn TypeNames) -> Refinement {
    let refinement = match &cond.kind {
        ExprKind::UnaryOp {
            op: UnaryOp::Not,
            operand,
        } => refine(operand, env, names).swap(),
        ExprKind::BoolOp { op, values } => refine_bool_op(*op, values, env, names),
        ExprKind::Call { func, args, keywords }
            if func.as_name() == Some("isinstance") && args.len() == 2 && keywords.is_empty() =>
        {
            refine_isinstance(&args[0], &args[1], env, names)
        }
        ExprKind::Compare {
            left,
            ops,
            comparators,
        } if ops.len() == 1 => refine_none_check(left, ops[0], &comparators[0], env),
        ExprKind::Name(name) => refine_truthiness(name, env),
        _ => Refinement::default(),
    };
    if !refinement.then.is_identity() || !refinement.otherwise.is_identity() {
        trace!("refined condition at {}:{}: {:?}", cond.span.line, cond.span.col, refinement);
    }
    refinement
}

fn refine_bool_op(op: BoolOp, values: &[Expr], env: &Environment, names: &dyn TypeNames) -> Refinement {
    let mut iter = values.iter();
    let Some(first) = iter.next() else {
        return Refinement::default();
    };
    let mut acc = refine(first, env, names);
    for value in iter {
        match op {
            BoolOp::And => {
                let narrowed = acc.then.apply(env);
                let next = refine(value, &narrowed, names);
                acc = Refinement {
                    then: acc.then.compose(&next.then),
                    otherwise: acc.otherwise.union(&next.otherwise),
                };
            }
            BoolOp::Or => {
                let narrowed = acc.otherwise.apply(env);
                let next = refine(value, &narrowed, names);
                acc = Refinement {
                    then: acc.then.union(&next.then),
                    otherwise: acc.otherwise.compose(&next.otherwise),
                };
            }
        }
    }
    acc
}

/// Narrow `current` by removing tags; an emptied set is kept and contradicted
fn subtract(current: &TypeSet, pred: impl Fn(&TypeTag) -> bool) -> Narrowed {
    match current.without(pred) {
        Some(set) => Narrowed {
            set,
            contradicted: false,
        },
        None => Narrowed {
            set: current.clone(),
            contradicted: true,
        },
    }
}

fn is_instance_of(tag: &TypeTag, class: &TypeTag, names: &dyn TypeNames) -> bool {
    match (tag, class) {
        (a, b) if a == b => true,
        (TypeTag::Bool, TypeTag::Int) => true,
        (TypeTag::Object(sub), TypeTag::Object(sup)) => names.is_subclass(sub, sup),
        _ => false,
    }
}

fn class_tags(classes: &Expr, names: &dyn TypeNames) -> Option<Vec<TypeTag>> {
    match &classes.kind {
        ExprKind::Name(name) => names.instance_tag(name).map(|t| vec![t]),
        ExprKind::Tuple(items) => items
            .iter()
            .map(|item| item.as_name().and_then(|n| names.instance_tag(n)))
            .collect(),
        _ => None,
    }
}

fn refine_isinstance(subject: &Expr, classes: &Expr, env: &Environment, names: &dyn TypeNames) -> Refinement {
    let (Some(var), Some(tags)) = (subject.as_name(), class_tags(classes, names)) else {
        return Refinement::default();
    };
    let Some(binding) = env.get(var) else {
        return Refinement::default();
    };
    let current = &binding.info.set;
    if current.is_unknown() {
        let then = Narrowed {
            set: TypeSet::from_tags(tags),
            contradicted: binding.info.contradicted,
        };
        return Refinement {
            then: Delta::single(var, then),
            otherwise: Delta::identity(),
        };
    }

    let dead = binding.info.contradicted;
    let matches = |t: &TypeTag| tags.iter().any(|class| is_instance_of(t, class, names));
    let then = match current.without(|t| !matches(t)) {
        Some(set) => Narrowed {
            set,
            contradicted: false,
        },
        None => Narrowed {
            set: TypeSet::from_tags(tags.iter().cloned()),
            contradicted: false,
        },
    };
    Refinement {
        then: Delta::single(var, then.or_contradicted(dead)),
        otherwise: Delta::single(var, subtract(current, matches).or_contradicted(dead)),
    }
}

fn refine_none_check(left: &Expr, op: CmpOp, right: &Expr, env: &Environment) -> Refinement {
    let is_none = |e: &Expr| matches!(e.kind, ExprKind::NoneLit);
    let var = match (left.as_name(), right.as_name()) {
        (Some(name), _) if is_none(right) => name,
        (_, Some(name)) if is_none(left) => name,
        _ => return Refinement::default(),
    };
    let Some(binding) = env.get(var) else {
        return Refinement::default();
    };
    let current = &binding.info.set;
    if current.is_unknown() {
        return Refinement::default();
    }

    let only_none = if current.contains(&TypeTag::NoneType) {
        Narrowed {
            set: TypeSet::single(TypeTag::NoneType),
            contradicted: false,
        }
    } else {
        Narrowed {
            set: current.clone(),
            contradicted: true,
        }
    };
    let not_none = subtract(current, |t| *t == TypeTag::NoneType);

    let dead = binding.info.contradicted;
    let equal = Refinement {
        then: Delta::single(var, only_none.or_contradicted(dead)),
        otherwise: Delta::single(var, not_none.or_contradicted(dead)),
    };
    match op {
        CmpOp::Is | CmpOp::Eq => equal,
        CmpOp::IsNot | CmpOp::NotEq => equal.swap(),
        _ => Refinement::default(),
    }
}

fn refine_truthiness(name: &str, env: &Environment) -> Refinement {
    match env.get(name) {
        Some(binding) if !binding.info.is_unknown() && binding.info.set.contains(&TypeTag::NoneType) => {
            Refinement {
                then: Delta::single(
                    name,
                    subtract(&binding.info.set, |t| *t == TypeTag::NoneType)
                        .or_contradicted(binding.info.contradicted),
                ),
                otherwise: Delta::identity(),
            }
        }
        _ => Refinement::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::{Expr, StmtKind};
    use crate::frontend::parse_source;
    use crate::semantic::env::Binding;
    use crate::types::TypeInfo;
    use pretty_assertions::assert_eq;

    struct Classes;

    impl Subtyping for Classes {
        fn is_subclass(&self, sub: &str, sup: &str) -> bool {
            sub == sup || (sub == "Dog" && sup == "Animal")
        }
    }

    impl TypeNames for Classes {
        fn instance_tag(&self, name: &str) -> Option<TypeTag> {
            match name {
                "Dog" | "Animal" | "Cat" => Some(TypeTag::Object(name.to_string())),
                other => TypeTag::from_builtin_name(other),
            }
        }
    }

    fn condition(source: &str) -> Expr {
        let module = parse_source(&format!("{}\n", source), "t.py").unwrap();
        match module.body.into_iter().next().map(|s| s.kind) {
            Some(StmtKind::Expr(expr)) => expr,
            other => panic!("expected expression, got {:?}", other),
        }
    }

    fn env_with(name: &str, tags: &[TypeTag]) -> Environment {
        let mut env = Environment::new();
        let info = TypeInfo::from_set(TypeSet::from_tags(tags.iter().cloned()));
        env.bind(name, Binding::new(info, None));
        env
    }

    fn set(tags: &[TypeTag]) -> TypeSet {
        TypeSet::from_tags(tags.iter().cloned())
    }

    #[test]
    fn test_is_none_both_orders() {
        let env = env_with("x", &[TypeTag::Int, TypeTag::NoneType]);
        for source in ["x is None", "None is x", "x == None"] {
            let r = refine(&condition(source), &env, &Classes);
            assert_eq!(r.then.get("x").map(|n| n.set.clone()), Some(set(&[TypeTag::NoneType])));
            assert_eq!(r.otherwise.get("x").map(|n| n.set.clone()), Some(set(&[TypeTag::Int])));
        }
        let r = refine(&condition("x is not None"), &env, &Classes);
        assert_eq!(r.then.get("x").map(|n| n.set.clone()), Some(set(&[TypeTag::Int])));
    }

    #[test]
    fn test_isinstance_with_subclasses() {
        let env = env_with(
            "pet",
            &[TypeTag::Object("Dog".into()), TypeTag::Object("Cat".into())],
        );
        let r = refine(&condition("isinstance(pet, Animal)"), &env, &Classes);
        assert_eq!(
            r.then.get("pet").map(|n| n.set.clone()),
            Some(set(&[TypeTag::Object("Dog".into())]))
        );
        assert_eq!(
            r.otherwise.get("pet").map(|n| n.set.clone()),
            Some(set(&[TypeTag::Object("Cat".into())]))
        );
    }

    #[test]
    fn test_emptied_else_is_contradicted() {
        let env = env_with("x", &[TypeTag::Int]);
        let r = refine(&condition("not isinstance(x, int)"), &env, &Classes);
        let dead = r.then.get("x").expect("x narrowed");
        assert!(dead.contradicted);
        assert_eq!(dead.set, set(&[TypeTag::Int]));
        let after = r.then.apply(&env);
        assert!(after.get("x").map(|b| b.info.contradicted).unwrap_or(false));
    }

    #[test]
    fn test_contradiction_survives_and() {
        let env = env_with("x", &[TypeTag::Int]);
        let r = refine(&condition("not isinstance(x, int) and x is not None"), &env, &Classes);
        let dead = r.then.get("x").expect("x narrowed");
        assert!(dead.contradicted);
        let after = r.then.apply(&env);
        assert!(after.get("x").map(|b| b.info.contradicted).unwrap_or(false));

        let r = refine(&condition("isinstance(x, int) or x is None"), &env, &Classes);
        assert!(r.otherwise.get("x").is_some_and(|n| n.contradicted));
    }

    #[test]
    fn test_and_or_composition() {
        let mut env = env_with("a", &[TypeTag::Int, TypeTag::NoneType]);
        env.bind(
            "b",
            Binding::new(TypeInfo::from_set(set(&[TypeTag::Str, TypeTag::NoneType])), None),
        );

        let both = refine(&condition("a is not None and b is not None"), &env, &Classes);
        assert_eq!(both.then.get("a").map(|n| n.set.clone()), Some(set(&[TypeTag::Int])));
        assert_eq!(both.then.get("b").map(|n| n.set.clone()), Some(set(&[TypeTag::Str])));
        assert!(both.otherwise.is_identity());

        let either = refine(&condition("a is None or b is None"), &env, &Classes);
        assert_eq!(either.otherwise.get("a").map(|n| n.set.clone()), Some(set(&[TypeTag::Int])));
        assert_eq!(either.otherwise.get("b").map(|n| n.set.clone()), Some(set(&[TypeTag::Str])));
    }

    #[test]
    fn test_truthiness_and_unsupported() {
        let env = env_with("x", &[TypeTag::Str, TypeTag::NoneType]);
        let r = refine(&condition("x"), &env, &Classes);
        assert_eq!(r.then.get("x").map(|n| n.set.clone()), Some(set(&[TypeTag::Str])));
        assert!(r.otherwise.is_identity());
        assert_eq!(refine(&condition("len(x) > 2"), &env, &Classes), Refinement::default());
    }
}
