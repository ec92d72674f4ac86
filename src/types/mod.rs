//! Type representation

pub mod signature;
pub mod type_system;

pub use signature::{SigParam, Signature};
pub use type_system::{
    accepts, compatible, join, set_accepts, NoSubclasses, Subtyping, TypeInfo, TypeSet, TypeTag,
};
