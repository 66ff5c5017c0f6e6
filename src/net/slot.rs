//! Opaque per-object storage for application bookkeeping.

use std::any::Any;
use std::fmt;
use std::sync::Mutex;

/// A type-erased, thread-safe slot.
///
/// The engine never reads it; applications use it to attach their own state
/// to an engine, listener or connection.
#[derive(Default)]
pub struct UserData {
    value: Mutex<Option<Box<dyn Any + Send + Sync>>>,
}

impl UserData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous one.
    pub fn set<T: Any + Send + Sync>(&self, value: T) {
        *self.lock() = Some(Box::new(value));
    }

    /// Get a clone of the stored value if it is a `T`.
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.lock()
            .as_ref()
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Remove and return the stored value if it is a `T`.
    ///
    /// A value of another type is left in place.
    pub fn take<T: Any>(&self) -> Option<T> {
        let mut guard = self.lock();
        match guard.take() {
            Some(boxed) => match boxed.downcast::<T>() {
                Ok(v) => Some(*v),
                Err(other) => {
                    *guard = Some(other);
                    None
                }
            },
            None => None,
        }
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    pub fn is_set(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Box<dyn Any + Send + Sync>>> {
        // A poisoned slot still holds a valid value.
        self.value.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for UserData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserData")
            .field("is_set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_take() {
        let slot = UserData::new();
        assert!(!slot.is_set());

        slot.set(String::from("session-7"));
        assert_eq!(slot.get::<String>().as_deref(), Some("session-7"));
        assert_eq!(slot.get::<u32>(), None);

        assert_eq!(slot.take::<u32>(), None);
        assert!(slot.is_set());

        assert_eq!(slot.take::<String>().as_deref(), Some("session-7"));
        assert!(!slot.is_set());
    }

    #[test]
    fn clear_empties_slot() {
        let slot = UserData::new();
        slot.set(42u64);
        slot.clear();
        assert_eq!(slot.get::<u64>(), None);
    }
}
