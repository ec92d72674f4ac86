//! Call-site binding of arguments to a signature

use crate::frontend::ast::ParamKind;
use crate::types::{accepts, Signature, Subtyping, TypeInfo};
use crate::utils::{Error, Result, Span};

/// An evaluated argument
#[derive(Debug, Clone, PartialEq)]
pub struct ArgInfo {
    pub info: TypeInfo,
    pub span: Span,
    pub canonical: Option<String>,
}

impl ArgInfo {
    pub fn new(info: TypeInfo, span: Span, canonical: Option<String>) -> Self {
        Self {
            info,
            span,
            canonical,
        }
    }
}

/// What a parameter received
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Arg(ArgInfo),
    Default,
    /// Extra positional arguments collected by `*args`
    Spread(Vec<ArgInfo>),
    /// Extra keyword arguments collected by `**kwargs`
    KwSpread(Vec<(String, ArgInfo)>),
}

/// One entry per signature parameter, in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct BoundArgs {
    pub slots: Vec<Bound>,
}

impl BoundArgs {
    /// The argument explicitly passed for parameter `index`
    pub fn arg(&self, index: usize) -> Option<&ArgInfo> {
        match self.slots.get(index) {
            Some(Bound::Arg(arg)) => Some(arg),
            _ => None,
        }
    }
}

fn keyword_error(sig: &Signature, message: String, span: Span) -> Error {
    Error::UnexpectedOrMissingKeyword {
        callee: sig.name.clone(),
        message,
        span,
    }
}

/// Match positional and keyword arguments against `sig` and type-check them
pub fn bind(
    sig: &Signature,
    positional: &[ArgInfo],
    keywords: &[(String, ArgInfo)],
    rel: &dyn Subtyping,
    span: Span,
) -> Result<BoundArgs> {
    let mut slots: Vec<Option<Bound>> = vec![None; sig.params.len()];
    let var_args = sig.var_args_index();
    let kw_var_args = sig.kw_var_args_index();

    // (1) positional arguments, left to right
    let positional_slots: Vec<usize> = sig
        .params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_positional())
        .map(|(i, _)| i)
        .collect();
    let mut spread = Vec::new();
    for (n, arg) in positional.iter().enumerate() {
        match positional_slots.get(n) {
            Some(&slot) => slots[slot] = Some(Bound::Arg(arg.clone())),
            None if var_args.is_some() => spread.push(arg.clone()),
            None => {
                return Err(Error::ArityMismatch {
                    callee: sig.name.clone(),
                    message: format!(
                        "takes {} positional argument{} but {} {} given",
                        positional_slots.len(),
                        if positional_slots.len() == 1 { "" } else { "s" },
                        positional.len(),
                        if positional.len() == 1 { "was" } else { "were" },
                    ),
                    span: arg.span,
                })
            }
        }
    }
    if let Some(slot) = var_args {
        slots[slot] = Some(Bound::Spread(spread));
    }

    // (2) keyword arguments by name
    let mut extra_keywords = Vec::new();
    for (name, arg) in keywords {
        match sig.param_index(name) {
            Some(i) if sig.params[i].accepts_keyword() => {
                if slots[i].is_some() {
                    return Err(keyword_error(
                        sig,
                        format!("got multiple values for argument '{}'", name),
                        arg.span,
                    ));
                }
                slots[i] = Some(Bound::Arg(arg.clone()));
            }
            Some(i) if sig.params[i].kind == ParamKind::PositionalOnly && kw_var_args.is_none() => {
                return Err(keyword_error(
                    sig,
                    format!(
                        "got some positional-only arguments passed as keyword arguments: '{}'",
                        name
                    ),
                    arg.span,
                ));
            }
            _ if kw_var_args.is_some() => extra_keywords.push((name.clone(), arg.clone())),
            _ => {
                return Err(keyword_error(
                    sig,
                    format!("got an unexpected keyword argument '{}'", name),
                    arg.span,
                ))
            }
        }
    }
    if let Some(slot) = kw_var_args {
        slots[slot] = Some(Bound::KwSpread(extra_keywords));
    }

    // (3) defaults, (4) missing arguments
    let mut missing = Vec::new();
    let slots: Vec<Bound> = slots
        .into_iter()
        .zip(&sig.params)
        .map(|(slot, param)| match slot {
            Some(bound) => bound,
            None if param.has_default() => Bound::Default,
            None => {
                missing.push(format!("'{}'", param.name));
                Bound::Default
            }
        })
        .collect();
    if !missing.is_empty() {
        return Err(keyword_error(
            sig,
            format!(
                "missing {} required argument{}: {}",
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                missing.join(", ")
            ),
            span,
        ));
    }

    // (5) argument types
    for (bound, param) in slots.iter().zip(&sig.params) {
        let check = |arg: &ArgInfo| -> Result<()> {
            if accepts(&param.ty, &arg.info, rel) {
                Ok(())
            } else {
                Err(Error::type_mismatch(
                    format!("argument '{}' of {}()", param.name, sig.name),
                    &param.ty,
                    &arg.info,
                    arg.span,
                ))
            }
        };
        match bound {
            Bound::Arg(arg) => check(arg)?,
            Bound::Spread(args) => args.iter().try_for_each(check)?,
            Bound::KwSpread(args) => args.iter().try_for_each(|(_, arg)| check(arg))?,
            Bound::Default => {}
        }
    }

    Ok(BoundArgs { slots })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NoSubclasses, SigParam, TypeTag};
    use pretty_assertions::assert_eq;

    fn int_arg() -> ArgInfo {
        ArgInfo::new(TypeInfo::of(TypeTag::Int), Span::dummy(), None)
    }

    fn str_arg() -> ArgInfo {
        ArgInfo::new(TypeInfo::of(TypeTag::Str), Span::dummy(), None)
    }

    /// `def f(a: int, /, b: int) -> int`
    fn positional_only() -> Signature {
        Signature::new(
            "f",
            vec![
                SigParam::required("a", TypeInfo::of(TypeTag::Int)).with_kind(ParamKind::PositionalOnly),
                SigParam::required("b", TypeInfo::of(TypeTag::Int)),
            ],
            TypeInfo::of(TypeTag::Int),
        )
    }

    fn call(sig: &Signature, positional: Vec<ArgInfo>, keywords: Vec<(&str, ArgInfo)>) -> Result<BoundArgs> {
        let keywords: Vec<(String, ArgInfo)> =
            keywords.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        bind(sig, &positional, &keywords, &NoSubclasses, Span::dummy())
    }

    #[test]
    fn test_positional_only_rejects_keyword() {
        let sig = positional_only();
        let err = call(&sig, vec![], vec![("a", int_arg()), ("b", int_arg())]).unwrap_err();
        assert!(matches!(err, Error::UnexpectedOrMissingKeyword { .. }));
        let bound = call(&sig, vec![int_arg()], vec![("b", int_arg())]).unwrap();
        assert_eq!(bound.arg(0), Some(&int_arg()));
        assert_eq!(bound.arg(1), Some(&int_arg()));
    }

    #[test]
    fn test_arity_and_keyword_errors() {
        let sig = positional_only();
        assert!(matches!(
            call(&sig, vec![int_arg(), int_arg(), int_arg()], vec![]),
            Err(Error::ArityMismatch { .. })
        ));
        let err = call(&sig, vec![int_arg(), int_arg()], vec![("b", int_arg())]).unwrap_err();
        assert_eq!(err.to_string(), "f() got multiple values for argument 'b'");
        let err = call(&sig, vec![int_arg()], vec![]).unwrap_err();
        assert_eq!(err.to_string(), "f() missing 1 required argument: 'b'");
        let err = call(&sig, vec![int_arg(), int_arg()], vec![("c", int_arg())]).unwrap_err();
        assert_eq!(err.to_string(), "f() got an unexpected keyword argument 'c'");
    }

    #[test]
    fn test_spread_and_defaults() {
        let sig = Signature::new(
            "g",
            vec![
                SigParam::required("x", TypeInfo::of(TypeTag::Int)),
                SigParam::var_args("rest", TypeInfo::of(TypeTag::Int)),
                SigParam::optional("sep", TypeInfo::of(TypeTag::Str)).with_kind(ParamKind::KeywordOnly),
                SigParam::kw_var_args("extra", TypeInfo::unknown()),
            ],
            TypeInfo::none(),
        );
        let bound = call(&sig, vec![int_arg(), int_arg(), int_arg()], vec![("flag", str_arg())]).unwrap();
        assert_eq!(bound.slots[1], Bound::Spread(vec![int_arg(), int_arg()]));
        assert_eq!(bound.slots[2], Bound::Default);
        assert_eq!(bound.slots[3], Bound::KwSpread(vec![("flag".to_string(), str_arg())]));

        assert!(matches!(
            call(&sig, vec![int_arg(), str_arg()], vec![]),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_argument_type_mismatch() {
        let sig = positional_only();
        let err = call(&sig, vec![str_arg()], vec![("b", int_arg())]).unwrap_err();
        assert_eq!(err.to_string(), "argument 'a' of f(): expected int, got str");
    }
}
