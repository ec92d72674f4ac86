//! Function signatures shared by user functions and built-ins

use crate::frontend::ast::ParamKind;
use crate::types::TypeInfo;

/// One declared parameter
#[derive(Debug, Clone, PartialEq)]
pub struct SigParam {
    pub name: String,
    pub ty: TypeInfo,
    /// Type of the default value, when there is one
    pub default: Option<TypeInfo>,
    pub kind: ParamKind,
}

impl SigParam {
    pub fn required(name: &str, ty: TypeInfo) -> Self {
        Self {
            name: name.to_string(),
            ty,
            default: None,
            kind: ParamKind::Positional,
        }
    }

    pub fn optional(name: &str, ty: TypeInfo) -> Self {
        Self {
            default: Some(ty.clone()),
            ..Self::required(name, ty)
        }
    }

    pub fn var_args(name: &str, ty: TypeInfo) -> Self {
        Self {
            kind: ParamKind::VarArgs,
            ..Self::required(name, ty)
        }
    }

    pub fn kw_var_args(name: &str, ty: TypeInfo) -> Self {
        Self {
            kind: ParamKind::KwVarArgs,
            ..Self::required(name, ty)
        }
    }

    pub fn with_kind(mut self, kind: ParamKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Can be filled by a positional argument
    pub fn is_positional(&self) -> bool {
        matches!(self.kind, ParamKind::Positional | ParamKind::PositionalOnly)
    }

    /// Can be filled by a keyword argument naming it
    pub fn accepts_keyword(&self) -> bool {
        matches!(self.kind, ParamKind::Positional | ParamKind::KeywordOnly)
    }
}

/// A callable's parameter list and declared result
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// Name used in diagnostics (`f`, `Point.__init__`, `math.sqrt`)
    pub name: String,
    pub params: Vec<SigParam>,
    pub ret: TypeInfo,
    /// Index of the parameter the body returns unchanged (`return <param>`)
    pub passthrough: Option<usize>,
}

impl Signature {
    pub fn new(name: impl Into<String>, params: Vec<SigParam>, ret: TypeInfo) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            passthrough: None,
        }
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    pub fn var_args_index(&self) -> Option<usize> {
        self.params.iter().position(|p| p.kind == ParamKind::VarArgs)
    }

    pub fn kw_var_args_index(&self) -> Option<usize> {
        self.params.iter().position(|p| p.kind == ParamKind::KwVarArgs)
    }
}
