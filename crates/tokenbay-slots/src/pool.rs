//! Handle-keyed object container.
//!
//! Each virtual slot owns one [`ObjectPool`] for the objects clients create
//! on its token. The pool lives as long as the slot: it is drained when the
//! token goes away and reused for the next one, so handles keep increasing
//! across drains and a stale handle from an earlier token never resolves to a
//! new object.

use std::collections::BTreeMap;
use std::fmt;

/// Handle of an object in an [`ObjectPool`]. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Handle-keyed container with ordered iteration.
#[derive(Debug)]
pub struct ObjectPool<T> {
    next_handle: u64,
    objects: BTreeMap<ObjectHandle, T>,
}

impl<T> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObjectPool<T> {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            objects: BTreeMap::new(),
        }
    }

    /// Store an object and return its new handle.
    pub fn insert(&mut self, object: T) -> ObjectHandle {
        let handle = ObjectHandle(self.next_handle);
        self.next_handle += 1;
        self.objects.insert(handle, object);
        handle
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&T> {
        self.objects.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut T> {
        self.objects.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: ObjectHandle) -> Option<T> {
        self.objects.remove(&handle)
    }

    /// Remove and return the object with the lowest handle.
    pub fn find_and_delete(&mut self) -> Option<(ObjectHandle, T)> {
        self.objects.pop_first()
    }

    /// Remove every object, passing each one to `release`.
    ///
    /// Returns the number of objects drained. The pool is empty afterwards
    /// whatever `release` does with the objects.
    pub fn drain_with(&mut self, mut release: impl FnMut(ObjectHandle, T)) -> usize {
        let mut drained = 0;
        while let Some((handle, object)) = self.find_and_delete() {
            release(handle, object);
            drained += 1;
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = ObjectHandle> + '_ {
        self.objects.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectHandle, &T)> {
        self.objects.iter().map(|(handle, object)| (*handle, object))
    }
}
