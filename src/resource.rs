//! Host-owned resource tables.
//!
//! A guest cannot hold host objects directly, so it holds integer handles
//! instead. Every [`ResourceManager`] maps handles to values of one type.
//! Handles come from a single process-wide counter, so a handle is never
//! valid in two tables and is never reused once released.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::abi::{CanonicalAbiError, TypeShape, Value, WitType};
use crate::logging::{debug, trace};

static NEXT_HANDLE: AtomicU32 = AtomicU32::new(1);

/// Errors from misusing a handle table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Handle 0 is never valid.
    #[error("Resource handle 0 is reserved")]
    ZeroHandle,

    /// A fresh handle already maps to a value in this table.
    #[error("Resource handle {0} is already in use")]
    HandleInUse(u32),

    /// `set` targeted a handle the counter has already handed out, whether or
    /// not it is still live.
    #[error("Resource handle {0} was already issued")]
    HandleIssued(u32),

    /// The process ran out of 32-bit handles.
    #[error("Resource handles exhausted")]
    Exhausted,
}

type Destructor<T> = Box<dyn Fn(u32, T) + Send + Sync>;

/// A concurrent handle table owning values of type `T`.
///
/// `remove` and `close_all` hand each value to the configured destructor.
/// `pop` gives the value back to the caller instead. The destructor runs after
/// the table lock is released, but it must not call back into its own table.
pub struct ResourceManager<T> {
    entries: RwLock<HashMap<u32, T>>,
    destructor: Option<Destructor<T>>,
}

impl<T> Default for ResourceManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ResourceManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceManager")
            .field("len", &self.len())
            .field("destructor", &self.destructor.is_some())
            .finish()
    }
}

impl<T> ResourceManager<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            destructor: None,
        }
    }

    /// A table that calls `destructor` for every value released by
    /// [`remove`](Self::remove) or [`close_all`](Self::close_all).
    pub fn with_destructor(destructor: impl Fn(u32, T) + Send + Sync + 'static) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            destructor: Some(Box::new(destructor)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<u32, T>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<u32, T>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` under a fresh handle.
    pub fn add(&self, value: T) -> Result<u32, ResourceError> {
        let handle = NEXT_HANDLE
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |h| h.checked_add(1))
            .map_err(|_| ResourceError::Exhausted)?;
        self.insert_claimed(handle, value)?;
        trace!(handle, "resource added");
        Ok(handle)
    }

    /// Store `value` under an explicit handle, for pre-opened resources.
    ///
    /// The handle must not have been issued yet by any table. On success the
    /// counter moves past it, so [`add`](Self::add) never hands out `handle`
    /// or anything below it.
    pub fn set(&self, handle: u32, value: T) -> Result<(), ResourceError> {
        if handle == 0 {
            return Err(ResourceError::ZeroHandle);
        }
        NEXT_HANDLE
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                if handle < next {
                    None
                } else {
                    handle.checked_add(1)
                }
            })
            .map_err(|next| {
                if handle < next {
                    ResourceError::HandleIssued(handle)
                } else {
                    ResourceError::Exhausted
                }
            })?;
        self.insert_claimed(handle, value)?;
        debug!(handle, "resource set");
        Ok(())
    }

    /// Insert under a handle this call just claimed from the counter.
    fn insert_claimed(&self, handle: u32, value: T) -> Result<(), ResourceError> {
        match self.write().entry(handle) {
            Entry::Occupied(_) => Err(ResourceError::HandleInUse(handle)),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    /// A copy of the value behind `handle`.
    pub fn get(&self, handle: u32) -> Option<T>
    where
        T: Clone,
    {
        self.read().get(&handle).cloned()
    }

    /// Run `f` on the value behind `handle` under the read lock.
    pub fn with<R>(&self, handle: u32, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.read().get(&handle).map(f)
    }

    /// Release `handle` and run the destructor on its value.
    ///
    /// Returns `false` if the handle was not in this table.
    pub fn remove(&self, handle: u32) -> bool {
        let removed = self.write().remove(&handle);
        match removed {
            Some(value) => {
                if let Some(destructor) = &self.destructor {
                    destructor(handle, value);
                }
                trace!(handle, "resource removed");
                true
            }
            None => false,
        }
    }

    /// Release `handle` and give its value back without destroying it.
    pub fn pop(&self, handle: u32) -> Option<T> {
        self.write().remove(&handle)
    }

    /// Visit every entry until `f` returns `false`. Order is unspecified.
    pub fn range(&self, mut f: impl FnMut(u32, &T) -> bool) {
        for (handle, value) in self.read().iter() {
            if !f(*handle, value) {
                break;
            }
        }
    }

    /// Release every handle, running the destructor on each value.
    pub fn close_all(&self) {
        let drained: Vec<(u32, T)> = self.write().drain().collect();
        debug!(count = drained.len(), "closing resources");
        if let Some(destructor) = &self.destructor {
            for (handle, value) in drained {
                destructor(handle, value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// A handle to a resource of type `T`, as seen by typed host functions.
///
/// Crosses the boundary with the `handle` shape. The value itself lives in a
/// [`ResourceManager<T>`].
pub struct Resource<T> {
    handle: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Resource<T> {
    pub fn new(handle: u32) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Resource<T> {}

impl<T> PartialEq for Resource<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl<T> Eq for Resource<T> {}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Resource").field(&self.handle).finish()
    }
}

impl<T: 'static> WitType for Resource<T> {
    fn shape() -> TypeShape {
        TypeShape::Handle
    }

    fn into_value(self) -> Value {
        Value::Handle(self.handle)
    }

    fn from_value(value: Value) -> Result<Self, CanonicalAbiError> {
        match value {
            Value::Handle(handle) => Ok(Self::new(handle)),
            other => Err(CanonicalAbiError::mismatch("handle", other.kind_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;

    #[test]
    fn handles_are_unique_across_tables() {
        let a = ResourceManager::new();
        let b = ResourceManager::new();
        let h1 = a.add("x").unwrap();
        let h2 = b.add("y").unwrap();
        assert_ne!(h1, 0);
        assert_ne!(h1, h2);
        assert_eq!(a.get(h2), None);
        assert_eq!(b.get(h2), Some("y"));
    }

    #[test]
    fn remove_runs_destructor_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let table = ResourceManager::with_destructor(move |h, v: String| {
            log.lock().unwrap().push((h, v));
        });

        let h = table.add("file".to_string()).unwrap();
        assert_eq!(table.get(h).as_deref(), Some("file"));
        assert!(table.remove(h));
        assert!(!table.remove(h));
        assert_eq!(table.get(h), None);
        assert_eq!(*seen.lock().unwrap(), vec![(h, "file".to_string())]);
    }

    #[test]
    fn pop_skips_destructor() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let table = ResourceManager::with_destructor(move |_, _: u8| {
            *counter.lock().unwrap() += 1;
        });

        let h = table.add(7).unwrap();
        assert_eq!(table.pop(h), Some(7));
        assert_eq!(table.pop(h), None);
        assert_eq!(table.get(h), None);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn set_rejects_zero_and_duplicates() {
        let table = ResourceManager::new();
        assert_eq!(table.set(0, 1), Err(ResourceError::ZeroHandle));

        let fixed = 1_000_000;
        table.set(fixed, 1).unwrap();
        assert_eq!(table.set(fixed, 2), Err(ResourceError::HandleIssued(fixed)));
        assert_eq!(table.get(fixed), Some(1));

        let next = table.add(3).unwrap();
        assert!(next > fixed);
        assert_eq!(table.set(fixed - 1, 4), Err(ResourceError::HandleIssued(fixed - 1)));
        assert_eq!(table.get(fixed - 1), None);
    }

    #[test]
    fn released_handles_are_never_set_again() {
        let table = ResourceManager::new();
        let h = table.add("first").unwrap();
        assert!(table.remove(h));
        assert_eq!(table.set(h, "second"), Err(ResourceError::HandleIssued(h)));
        assert_eq!(table.get(h), None);

        let popped = table.add("third").unwrap();
        assert_eq!(table.pop(popped), Some("third"));
        assert_eq!(
            table.set(popped, "fourth"),
            Err(ResourceError::HandleIssued(popped))
        );
    }

    #[test]
    fn set_cannot_claim_a_handle_live_elsewhere() {
        let a = ResourceManager::new();
        let b = ResourceManager::new();
        let h = a.add(1).unwrap();

        assert_eq!(b.set(h, 2), Err(ResourceError::HandleIssued(h)));
        assert_eq!(a.get(h), Some(1));
        assert_eq!(b.get(h), None);
    }

    #[test]
    fn close_all_destroys_everything() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let table = ResourceManager::with_destructor(move |_, _: u8| {
            *counter.lock().unwrap() += 1;
        });
        for v in 0..4 {
            table.add(v).unwrap();
        }
        assert_eq!(table.len(), 4);
        table.close_all();
        assert!(table.is_empty());
        assert_eq!(*calls.lock().unwrap(), 4);
    }

    #[test]
    fn range_stops_early() {
        let table = ResourceManager::new();
        for v in 0..5 {
            table.add(v).unwrap();
        }
        let mut visited = 0;
        table.range(|_, _| {
            visited += 1;
            visited < 2
        });
        assert_eq!(visited, 2);
    }

    #[test]
    fn with_borrows_value() {
        let table = ResourceManager::new();
        let h = table.add(vec![1u8, 2, 3]).unwrap();
        assert_eq!(table.with(h, Vec::len), Some(3));
        assert_eq!(table.with(h + 1_000_000_000, Vec::len), None);
    }

    #[test]
    fn typed_handle_uses_handle_shape() {
        struct File;
        let r: Resource<File> = Resource::new(9);
        assert_eq!(<Resource<File>>::shape(), TypeShape::Handle);
        assert_eq!(r.into_value(), Value::Handle(9));
        assert_eq!(
            Resource::<File>::from_value(Value::Handle(4)).unwrap().handle(),
            4
        );
        assert!(Resource::<File>::from_value(Value::U32(4)).is_err());
    }
}
