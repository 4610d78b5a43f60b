//! Process-wide type registry for managed objects.
//!
//! Each managed type registers its class name once, behind its own
//! `OnceLock`, and receives a small integer id. Generic entry points take
//! `&dyn Object` and compare ids before downcasting, so passing the wrong
//! kind of object is a checked no-op instead of a crash.

use std::any::Any;
use std::fmt;

use crate::spinlock::SpinLock;

/// Registered type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Id that no registered type ever receives.
pub const NOT_A_TYPE_ID: TypeId = TypeId(0);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

// Index i holds the class name of TypeId(i + 1).
static REGISTRY: SpinLock<Vec<&'static str>> = SpinLock::new(Vec::new());

/// Register a class name and return its fresh id.
///
/// Callers gate this behind a `OnceLock`; registering the same name twice
/// yields two distinct ids.
pub fn register_type(name: &'static str) -> TypeId {
    let mut registry = REGISTRY.lock();
    registry.push(name);
    TypeId(registry.len() as u32)
}

/// Class name for a registered id.
pub fn type_name(id: TypeId) -> Option<&'static str> {
    let idx = (id.0 as usize).checked_sub(1)?;
    REGISTRY.lock().get(idx).copied()
}

/// A reference-counted runtime object.
pub trait Object: Any + Send + Sync {
    /// Registered id of the concrete type.
    fn object_type_id(&self) -> TypeId;

    fn as_any(&self) -> &dyn Any;

    /// Human-readable description.
    fn describe(&self) -> String {
        let name = type_name(self.object_type_id()).unwrap_or("<unregistered>");
        format!("<{} {:p}>", name, self.as_any() as *const dyn Any as *const ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget(TypeId);

    impl Object for Widget {
        fn object_type_id(&self) -> TypeId {
            self.0
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_register_distinct_ids() {
        let a = register_type("WidgetA");
        let b = register_type("WidgetB");
        assert_ne!(a, b);
        assert_ne!(a, NOT_A_TYPE_ID);
        assert_eq!(type_name(a), Some("WidgetA"));
        assert_eq!(type_name(b), Some("WidgetB"));
    }

    #[test]
    fn test_unknown_ids() {
        assert_eq!(type_name(NOT_A_TYPE_ID), None);
        assert_eq!(type_name(TypeId(u32::MAX)), None);
    }

    #[test]
    fn test_describe_uses_registered_name() {
        let id = register_type("Widget");
        let widget = Widget(id);
        let desc = widget.describe();
        assert!(desc.starts_with("<Widget 0x"), "{}", desc);
        assert!(!desc.contains("metadata"), "{}", desc);
    }
}
