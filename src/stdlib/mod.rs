//! Standard library signatures

pub mod builtins;

pub use builtins::{BuiltinFunc, BuiltinRegistry, Returns, TABLE_VERSION};
