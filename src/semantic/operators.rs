//! Operator typing over concrete type tags

use crate::frontend::ast::{BinOp, CmpOp, UnaryOp};
use crate::types::{set_accepts, Subtyping, TypeInfo, TypeSet, TypeTag};
use crate::utils::{Error, Result, Span};

/// How a subscript selects from its container
pub enum Index<'a> {
    /// `value[i]`; the literal integer index when known
    Item(&'a TypeInfo, Option<i64>),
    /// `value[a:b:c]`
    Slice,
}

/// The single tag an operand must have; `Ok(None)` when it is Unknown
fn concrete<'a>(info: &'a TypeInfo, context: &str, span: Span) -> Result<Option<&'a TypeTag>> {
    if info.contradicted {
        return Err(Error::type_mismatch(context, "a reachable value", info, span));
    }
    if info.is_unknown() {
        return Ok(None);
    }
    match info.single() {
        Some(tag) => Ok(Some(tag)),
        None => Err(Error::type_mismatch(context, "a single concrete type", &info.set, span)),
    }
}

fn int_like(tag: &TypeTag) -> bool {
    matches!(tag, TypeTag::Int | TypeTag::Bool)
}

fn numeric_result(l: &TypeTag, r: &TypeTag) -> TypeInfo {
    if *l == TypeTag::Float || *r == TypeTag::Float {
        TypeInfo::of(TypeTag::Float)
    } else {
        TypeInfo::of(TypeTag::Int)
    }
}

fn join_elements(l: &TypeInfo, r: &TypeInfo) -> TypeInfo {
    let mut joined = l.join(r);
    joined.items = None;
    joined
}

/// Result type of `left op right`
pub fn binary(op: BinOp, left: &TypeInfo, right: &TypeInfo, span: Span) -> Result<TypeInfo> {
    let sym = op.symbol();
    let l = concrete(left, &format!("left operand of '{}'", sym), span)?;
    let r = concrete(right, &format!("right operand of '{}'", sym), span)?;
    let (Some(l), Some(r)) = (l, r) else {
        return Ok(TypeInfo::unknown());
    };

    use TypeTag::*;
    let result = match (op, l, r) {
        (BinOp::Div, a, b) if a.is_numeric() && b.is_numeric() => Some(TypeInfo::of(Float)),
        (
            BinOp::Add | BinOp::Sub | BinOp::Mult | BinOp::FloorDiv | BinOp::Mod | BinOp::Pow,
            a,
            b,
        ) if a.is_numeric() && b.is_numeric() => Some(numeric_result(a, b)),

        (BinOp::Add, Str, Str) => Some(TypeInfo::of(Str)),
        (BinOp::Add, Bytes, Bytes) => Some(TypeInfo::of(Bytes)),
        (BinOp::Add, List, List) => Some(join_elements(left, right)),
        (BinOp::Add, Tuple, Tuple) => Some(match (&left.items, &right.items) {
            (Some(a), Some(b)) => TypeInfo::tuple_of(a.iter().chain(b).cloned().collect()),
            _ => join_elements(left, right),
        }),

        (BinOp::Mult, Str | Bytes | List | Tuple, n) if int_like(n) => {
            let mut repeated = left.clone();
            repeated.items = None;
            Some(repeated)
        }
        (BinOp::Mult, n, Str | Bytes | List | Tuple) if int_like(n) => {
            let mut repeated = right.clone();
            repeated.items = None;
            Some(repeated)
        }
        (BinOp::Mod, Str, _) => Some(TypeInfo::of(Str)),

        (BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor, Bool, Bool) => Some(TypeInfo::of(Bool)),
        (BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::LShift | BinOp::RShift, a, b)
            if int_like(a) && int_like(b) =>
        {
            Some(TypeInfo::of(Int))
        }
        (BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Sub, Set, Set) => {
            Some(join_elements(left, right))
        }
        (BinOp::BitOr, Dict, Dict) => Some(join_elements(left, right)),
        _ => None,
    };

    result.ok_or_else(|| {
        Error::type_mismatch(
            format!("unsupported operand types for '{}'", sym),
            "compatible operands",
            format!("{} and {}", left, right),
            span,
        )
    })
}

/// Result type of a unary operation
pub fn unary(op: UnaryOp, operand: &TypeInfo, span: Span) -> Result<TypeInfo> {
    if op == UnaryOp::Not {
        return Ok(TypeInfo::of(TypeTag::Bool));
    }
    let context = format!("operand of unary '{}'", op.symbol());
    let Some(tag) = concrete(operand, &context, span)? else {
        return Ok(TypeInfo::unknown());
    };
    match (op, tag) {
        (UnaryOp::Neg | UnaryOp::Pos, TypeTag::Float) => Ok(TypeInfo::of(TypeTag::Float)),
        (UnaryOp::Neg | UnaryOp::Pos | UnaryOp::Invert, t) if int_like(t) => {
            Ok(TypeInfo::of(TypeTag::Int))
        }
        _ => Err(Error::type_mismatch(context, "a number", operand, span)),
    }
}

fn orderable(l: &TypeTag, r: &TypeTag) -> bool {
    use TypeTag::*;
    (l.is_numeric() && r.is_numeric())
        || matches!(
            (l, r),
            (Str, Str) | (Bytes, Bytes) | (List, List) | (Tuple, Tuple) | (Set, Set)
        )
}

/// Result type of a single comparison `left op right`
pub fn compare(
    op: CmpOp,
    left: &TypeInfo,
    right: &TypeInfo,
    rel: &dyn Subtyping,
    span: Span,
) -> Result<TypeInfo> {
    let sym = op.symbol();
    match op {
        CmpOp::Eq | CmpOp::NotEq | CmpOp::Is | CmpOp::IsNot => {}
        CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
            let l = concrete(left, &format!("left operand of '{}'", sym), span)?;
            let r = concrete(right, &format!("right operand of '{}'", sym), span)?;
            if let (Some(l), Some(r)) = (l, r) {
                if !orderable(l, r) {
                    return Err(Error::type_mismatch(
                        format!("'{}' not supported", sym),
                        "comparable operands",
                        format!("{} and {}", left, right),
                        span,
                    ));
                }
            }
        }
        CmpOp::In | CmpOp::NotIn => {
            let context = format!("right operand of '{}'", sym);
            if let Some(container) = concrete(right, &context, span)? {
                check_membership(container, left, right, rel, &context, span)?;
            }
        }
    }
    Ok(TypeInfo::of(TypeTag::Bool))
}

fn check_membership(
    container: &TypeTag,
    needle: &TypeInfo,
    haystack: &TypeInfo,
    rel: &dyn Subtyping,
    context: &str,
    span: Span,
) -> Result<()> {
    let element = match container {
        TypeTag::Str => TypeSet::single(TypeTag::Str),
        TypeTag::Bytes => TypeSet::from_tags([TypeTag::Bytes, TypeTag::Int]),
        TypeTag::List | TypeTag::Set | TypeTag::Tuple | TypeTag::Dict => haystack.element(),
        _ => return Err(Error::type_mismatch(context, "a container", haystack, span)),
    };
    if set_accepts(&element, &needle.set, rel) {
        Ok(())
    } else {
        Err(Error::type_mismatch(
            format!("membership test in {}", haystack),
            element,
            &needle.set,
            span,
        ))
    }
}

/// Result type of `value[index]`
pub fn subscript(value: &TypeInfo, index: Index<'_>, rel: &dyn Subtyping, span: Span) -> Result<TypeInfo> {
    let Some(container) = concrete(value, "subscripted value", span)? else {
        return Ok(TypeInfo::unknown());
    };

    let index = match index {
        Index::Slice => {
            return match container {
                TypeTag::List | TypeTag::Str | TypeTag::Bytes => Ok(value.clone()),
                TypeTag::Tuple => Ok(TypeInfo {
                    items: None,
                    ..value.clone()
                }),
                _ => Err(Error::type_mismatch("slice of", "a sequence", value, span)),
            };
        }
        Index::Item(index, literal) => (index, literal),
    };

    match container {
        TypeTag::Dict => {
            let key = value.key.clone().unwrap_or_else(TypeSet::unknown);
            if !set_accepts(&key, &index.0.set, rel) {
                return Err(Error::type_mismatch("dict key", key, &index.0.set, span));
            }
            Ok(TypeInfo::from_set(value.elem.clone().unwrap_or_else(TypeSet::unknown)))
        }
        TypeTag::List | TypeTag::Tuple | TypeTag::Str | TypeTag::Bytes => {
            if let Some(tag) = concrete(index.0, "sequence index", span)? {
                if !int_like(tag) {
                    return Err(Error::type_mismatch("sequence index", "int", tag, span));
                }
            }
            Ok(match container {
                TypeTag::Str => TypeInfo::of(TypeTag::Str),
                TypeTag::Bytes => TypeInfo::of(TypeTag::Int),
                TypeTag::Tuple => match (&value.items, index.1) {
                    (Some(items), Some(i)) => {
                        let len = items.len() as i64;
                        let at = if i < 0 { len + i } else { i };
                        if (0..len).contains(&at) {
                            TypeInfo::from_set(items[at as usize].clone())
                        } else {
                            return Err(Error::type_mismatch(
                                "tuple index",
                                format!("an index below {}", len),
                                i,
                                span,
                            ));
                        }
                    }
                    _ => TypeInfo::from_set(value.element()),
                },
                _ => TypeInfo::from_set(value.element()),
            })
        }
        _ => Err(Error::type_mismatch("subscripted value", "a subscriptable container", value, span)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NoSubclasses;
    use pretty_assertions::assert_eq;

    fn int() -> TypeInfo {
        TypeInfo::of(TypeTag::Int)
    }

    fn sp() -> Span {
        Span::dummy()
    }

    #[test]
    fn test_arithmetic() {
        let float = TypeInfo::of(TypeTag::Float);
        assert_eq!(binary(BinOp::Add, &int(), &int(), sp()).unwrap(), int());
        assert_eq!(binary(BinOp::Div, &int(), &int(), sp()).unwrap(), float);
        assert_eq!(binary(BinOp::Add, &int(), &float, sp()).unwrap(), float);
        let s = TypeInfo::of(TypeTag::Str);
        assert_eq!(binary(BinOp::Mult, &s, &int(), sp()).unwrap(), s);
        assert!(binary(BinOp::Add, &s, &int(), sp()).is_err());
    }

    #[test]
    fn test_ambiguous_operand_rejected() {
        let optional = TypeInfo::from_set(TypeSet::from_tags([TypeTag::Int, TypeTag::NoneType]));
        let err = binary(BinOp::Add, &optional, &int(), sp()).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert_eq!(
            binary(BinOp::Add, &TypeInfo::unknown(), &int(), sp()).unwrap(),
            TypeInfo::unknown()
        );
    }

    #[test]
    fn test_contradicted_operand_rejected() {
        let dead = int().narrowed(TypeSet::single(TypeTag::Int), true);
        assert!(binary(BinOp::Add, &dead, &int(), sp()).is_err());
        assert!(unary(UnaryOp::Neg, &dead, sp()).is_err());
    }

    #[test]
    fn test_comparisons() {
        let s = TypeInfo::of(TypeTag::Str);
        let rel = NoSubclasses;
        assert!(compare(CmpOp::Eq, &s, &int(), &rel, sp()).is_ok());
        assert!(compare(CmpOp::Lt, &s, &int(), &rel, sp()).is_err());
        let ints = TypeInfo::list_of(TypeSet::single(TypeTag::Int));
        assert!(compare(CmpOp::In, &int(), &ints, &rel, sp()).is_ok());
        assert!(compare(CmpOp::In, &s, &ints, &rel, sp()).is_err());
    }

    #[test]
    fn test_subscripts() {
        let rel = NoSubclasses;
        let ints = TypeInfo::list_of(TypeSet::single(TypeTag::Int));
        assert_eq!(subscript(&ints, Index::Item(&int(), Some(0)), &rel, sp()).unwrap(), int());
        assert_eq!(subscript(&ints, Index::Slice, &rel, sp()).unwrap(), ints);

        let pair = TypeInfo::tuple_of(vec![TypeSet::single(TypeTag::Str), TypeSet::single(TypeTag::Int)]);
        assert_eq!(
            subscript(&pair, Index::Item(&int(), Some(0)), &rel, sp()).unwrap(),
            TypeInfo::of(TypeTag::Str)
        );
        assert!(subscript(&pair, Index::Item(&int(), Some(5)), &rel, sp()).is_err());

        let scores = TypeInfo::dict_of(TypeSet::single(TypeTag::Str), TypeSet::single(TypeTag::Int));
        assert!(subscript(&scores, Index::Item(&int(), None), &rel, sp()).is_err());
        assert!(subscript(&int(), Index::Item(&int(), None), &rel, sp()).is_err());
    }
}
