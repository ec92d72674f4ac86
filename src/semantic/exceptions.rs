//! Exception hierarchy and raise/except checks

use crate::types::{TypeInfo, TypeTag};
use crate::utils::{Error, Result, Span};
use std::collections::HashMap;

/// Built-in exception classes as (name, parent)
const BUILTIN_EXCEPTIONS: &[(&str, Option<&str>)] = &[
    ("BaseException", None),
    ("Exception", Some("BaseException")),
    ("SystemExit", Some("BaseException")),
    ("KeyboardInterrupt", Some("BaseException")),
    ("GeneratorExit", Some("BaseException")),
    ("ArithmeticError", Some("Exception")),
    ("ZeroDivisionError", Some("ArithmeticError")),
    ("OverflowError", Some("ArithmeticError")),
    ("FloatingPointError", Some("ArithmeticError")),
    ("LookupError", Some("Exception")),
    ("IndexError", Some("LookupError")),
    ("KeyError", Some("LookupError")),
    ("ValueError", Some("Exception")),
    ("UnicodeError", Some("ValueError")),
    ("OSError", Some("Exception")),
    ("FileNotFoundError", Some("OSError")),
    ("FileExistsError", Some("OSError")),
    ("PermissionError", Some("OSError")),
    ("TimeoutError", Some("OSError")),
    ("IsADirectoryError", Some("OSError")),
    ("NotADirectoryError", Some("OSError")),
    ("ConnectionError", Some("OSError")),
    ("RuntimeError", Some("Exception")),
    ("NotImplementedError", Some("RuntimeError")),
    ("RecursionError", Some("RuntimeError")),
    ("NameError", Some("Exception")),
    ("UnboundLocalError", Some("NameError")),
    ("ImportError", Some("Exception")),
    ("ModuleNotFoundError", Some("ImportError")),
    ("TypeError", Some("Exception")),
    ("AttributeError", Some("Exception")),
    ("AssertionError", Some("Exception")),
    ("StopIteration", Some("Exception")),
    ("EOFError", Some("Exception")),
    ("MemoryError", Some("Exception")),
    ("BufferError", Some("Exception")),
];

const ALIASES: &[(&str, &str)] = &[("IOError", "OSError"), ("EnvironmentError", "OSError")];

/// One `except` clause: the classes it catches, or `None` for a bare `except:`
#[derive(Debug, Clone)]
pub struct HandlerClause {
    pub classes: Option<Vec<String>>,
    pub span: Span,
}

/// Registered exception classes, built-in and user-defined
#[derive(Debug, Clone)]
pub struct ExceptionHierarchy {
    parents: HashMap<String, Option<String>>,
    aliases: HashMap<String, String>,
}

impl ExceptionHierarchy {
    pub fn new() -> Self {
        let parents = BUILTIN_EXCEPTIONS
            .iter()
            .map(|(name, parent)| (name.to_string(), parent.map(str::to_string)))
            .collect();
        let aliases = ALIASES
            .iter()
            .map(|(alias, target)| (alias.to_string(), target.to_string()))
            .collect();
        Self { parents, aliases }
    }

    /// Register a user class deriving from an exception class.
    /// Returns false when `parent` is not an exception.
    pub fn register(&mut self, name: &str, parent: &str) -> bool {
        if !self.is_exception(parent) {
            return false;
        }
        let parent = self.canonical(parent).to_string();
        self.parents.insert(name.to_string(), Some(parent));
        true
    }

    /// Resolve an alias to the class it names
    pub fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(|s| s.as_str()).unwrap_or(name)
    }

    pub fn is_exception(&self, name: &str) -> bool {
        self.parents.contains_key(self.canonical(name))
    }

    /// Built-in exception names and aliases, for name resolution
    pub fn builtin_names(&self) -> impl Iterator<Item = &str> {
        BUILTIN_EXCEPTIONS
            .iter()
            .map(|(name, _)| *name)
            .chain(ALIASES.iter().map(|(alias, _)| *alias))
    }

    /// `sub` is `sup`, an alias of it, or derives from it
    pub fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        let sup = self.canonical(sup);
        let mut current = Some(self.canonical(sub));
        while let Some(name) = current {
            if name == sup {
                return true;
            }
            current = self.parents.get(name).and_then(|p| p.as_deref());
        }
        false
    }

    fn exception_tag(&self, tag: &TypeTag) -> bool {
        match tag {
            TypeTag::Object(name) | TypeTag::Class(name) => self.is_exception(name),
            TypeTag::Unknown => true,
            _ => false,
        }
    }

    /// `raise <exc>`: an exception class or instance
    pub fn check_raise(&self, exc: &TypeInfo, span: Span) -> Result<()> {
        if exc.set.iter().all(|t| self.exception_tag(t)) {
            Ok(())
        } else {
            Err(Error::ExceptionTypeInvalid {
                message: format!("exceptions must derive from BaseException, got {}", exc.set),
                span,
            })
        }
    }

    /// `raise ... from <cause>`: an exception or the literal `None`
    pub fn check_cause(&self, cause: &TypeInfo, is_none_literal: bool, span: Span) -> Result<()> {
        if is_none_literal || cause.set.iter().all(|t| self.exception_tag(t)) {
            Ok(())
        } else {
            Err(Error::ExceptionTypeInvalid {
                message: format!(
                    "exception causes must derive from BaseException or be None, got {}",
                    cause.set
                ),
                span,
            })
        }
    }

    /// Whether `name` may appear as a handler type
    pub fn check_handler_type(&self, name: &str, span: Span) -> Result<()> {
        if self.is_exception(name) {
            Ok(())
        } else {
            Err(Error::ExceptionTypeInvalid {
                message: format!("catching '{}' which does not derive from BaseException", name),
                span,
            })
        }
    }

    /// Every handler after one catching the same class or a base of it is dead
    pub fn check_handler_order(&self, handlers: &[HandlerClause]) -> Vec<Error> {
        let mut errors = Vec::new();
        let mut earlier: Vec<&str> = Vec::new();
        let mut bare_seen = false;

        for handler in handlers {
            let Some(classes) = &handler.classes else {
                if bare_seen {
                    errors.push(Error::ExceptionHandlerShadowed {
                        handler: "except:".into(),
                        earlier: "except:".into(),
                        span: handler.span,
                    });
                }
                bare_seen = true;
                continue;
            };
            for class in classes {
                let shadowing = if bare_seen {
                    Some("except:")
                } else {
                    earlier
                        .iter()
                        .copied()
                        .find(|prev| self.is_subclass(class, prev))
                };
                if let Some(prev) = shadowing {
                    errors.push(Error::ExceptionHandlerShadowed {
                        handler: class.clone(),
                        earlier: prev.to_string(),
                        span: handler.span,
                    });
                }
            }
            earlier.extend(classes.iter().map(|c| c.as_str()));
        }
        errors
    }

    /// Bare `raise` re-raises the exception being handled
    pub fn check_bare_raise(&self, in_except: bool, span: Span) -> Result<()> {
        if in_except {
            Ok(())
        } else {
            Err(Error::ExceptionTypeInvalid {
                message: "bare 'raise' outside an except block".into(),
                span,
            })
        }
    }
}

impl Default for ExceptionHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(classes: &[&str]) -> HandlerClause {
        HandlerClause {
            classes: Some(classes.iter().map(|c| c.to_string()).collect()),
            span: Span::dummy(),
        }
    }

    #[test]
    fn test_subclass_chain_and_aliases() {
        let hierarchy = ExceptionHierarchy::new();
        assert!(hierarchy.is_subclass("ZeroDivisionError", "ArithmeticError"));
        assert!(hierarchy.is_subclass("ZeroDivisionError", "BaseException"));
        assert!(!hierarchy.is_subclass("KeyError", "ValueError"));
        assert!(hierarchy.is_subclass("IOError", "OSError"));
        assert!(hierarchy.is_subclass("FileNotFoundError", "EnvironmentError"));
    }

    #[test]
    fn test_user_exceptions() {
        let mut hierarchy = ExceptionHierarchy::new();
        assert!(hierarchy.register("ConfigError", "ValueError"));
        assert!(hierarchy.register("MissingKey", "ConfigError"));
        assert!(!hierarchy.register("Plain", "object"));
        assert!(hierarchy.is_subclass("MissingKey", "Exception"));
        assert!(!hierarchy.is_exception("Plain"));
    }

    #[test]
    fn test_handler_order() {
        let hierarchy = ExceptionHierarchy::new();
        let shadowed = hierarchy.check_handler_order(&[clause(&["Exception"]), clause(&["ValueError"])]);
        assert_eq!(shadowed.len(), 1);
        assert!(hierarchy
            .check_handler_order(&[clause(&["ValueError"]), clause(&["Exception"])])
            .is_empty());

        let aliased = hierarchy.check_handler_order(&[clause(&["OSError"]), clause(&["IOError"])]);
        assert_eq!(aliased.len(), 1);

        let after_bare = hierarchy.check_handler_order(&[
            HandlerClause {
                classes: None,
                span: Span::dummy(),
            },
            clause(&["KeyError"]),
        ]);
        assert!(matches!(
            after_bare.as_slice(),
            [Error::ExceptionHandlerShadowed { .. }]
        ));
    }

    #[test]
    fn test_raise_checks() {
        let hierarchy = ExceptionHierarchy::new();
        let span = Span::dummy();
        assert!(hierarchy
            .check_raise(&TypeInfo::of(TypeTag::Class("ValueError".into())), span)
            .is_ok());
        assert!(hierarchy
            .check_raise(&TypeInfo::of(TypeTag::Object("KeyError".into())), span)
            .is_ok());
        assert!(hierarchy.check_raise(&TypeInfo::of(TypeTag::Int), span).is_err());
        assert!(hierarchy.check_cause(&TypeInfo::none(), true, span).is_ok());
        assert!(hierarchy.check_cause(&TypeInfo::of(TypeTag::Str), false, span).is_err());
        assert!(hierarchy.check_bare_raise(false, span).is_err());
        assert!(hierarchy.check_bare_raise(true, span).is_ok());
    }
}
