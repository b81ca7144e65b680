use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use crate::entry::{Payload, ResourceEntry};
use crate::file_loader::TimeStamp;
use crate::identifier::Identifier;
use crate::resource::Resource;

/// A storable reference to a cache entry of type `T`.
///
/// Holding a handle keeps the entry alive but does not keep the resource
/// loaded; use [`ResourceCache::access_handle`](crate::ResourceCache::access_handle)
/// to get at the data.
pub struct ResourceHandle<T: Resource> {
    pub(crate) entry: Arc<ResourceEntry>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Resource> ResourceHandle<T> {
    pub(crate) fn new(entry: Arc<ResourceEntry>) -> Self {
        Self {
            entry,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.entry.id
    }

    pub fn is_loaded(&self) -> bool {
        self.entry.is_loaded()
    }

    /// Number of live access guards for this resource.
    pub fn ref_count(&self) -> usize {
        self.entry.ref_count()
    }
}

impl<T: Resource> Clone for ResourceHandle<T> {
    fn clone(&self) -> Self {
        Self::new(self.entry.clone())
    }
}

impl<T: Resource> PartialEq for ResourceHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl<T: Resource> Eq for ResourceHandle<T> {}

impl<T: Resource> fmt::Debug for ResourceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceHandle")
            .field(&T::TYPE_ID)
            .field(&self.entry.id)
            .finish()
    }
}

impl<T: Resource> ResourceHandle<T> {
    pub fn untyped(&self) -> UntypedResourceHandle {
        UntypedResourceHandle {
            entry: self.entry.clone(),
        }
    }
}

/// A resource handle with the resource type erased, as passed to reload
/// observers.
#[derive(Clone)]
pub struct UntypedResourceHandle {
    pub(crate) entry: Arc<ResourceEntry>,
}

impl UntypedResourceHandle {
    pub fn id(&self) -> &Identifier {
        &self.entry.id
    }

    /// The `TYPE_ID` of the resource type the entry was created for.
    pub fn type_id(&self) -> &'static str {
        self.entry.type_name
    }

    pub fn is_loaded(&self) -> bool {
        self.entry.is_loaded()
    }

    /// Recover the typed handle, if the entry holds a `T`.
    pub fn typed<T: Resource>(&self) -> Option<ResourceHandle<T>> {
        (self.entry.rust_type == TypeId::of::<T>()).then(|| ResourceHandle::new(self.entry.clone()))
    }
}

impl PartialEq for UntypedResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl Eq for UntypedResourceHandle {}

impl fmt::Debug for UntypedResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UntypedResourceHandle")
            .field(&self.entry.type_name)
            .field(&self.entry.id)
            .finish()
    }
}

/// Scoped access to a loaded resource.
///
/// While a guard is alive the resource counts as in use and cannot be
/// unloaded. A guard keeps the version it was created with: `refresh` may
/// reload the resource meanwhile, and the next access sees the new version.
/// Dropping the guard releases the reference.
pub struct ResourceAccessGuard<T: Resource> {
    entry: Arc<ResourceEntry>,
    payload: Payload,
    time_stamp: TimeStamp,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Resource> ResourceAccessGuard<T> {
    /// Must be called with the entry's lock held, so that the reference is
    /// counted before an unload can inspect it.
    pub(crate) fn new(
        entry: Arc<ResourceEntry>,
        payload: Payload,
        time_stamp: TimeStamp,
        tick: u64,
    ) -> Self {
        assert!(
            payload.as_any().is::<T>(),
            "resource entry holds a payload of another type"
        );
        entry.acquire_ref(tick);
        Self {
            entry,
            payload,
            time_stamp,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.entry.id
    }

    /// Time stamp of the file the resource was loaded from.
    pub fn time_stamp(&self) -> TimeStamp {
        self.time_stamp
    }

    pub fn handle(&self) -> ResourceHandle<T> {
        ResourceHandle::new(self.entry.clone())
    }
}

impl<T: Resource> Deref for ResourceAccessGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.payload
            .as_any()
            .downcast_ref::<T>()
            .expect("payload type checked on creation")
    }
}

impl<T: Resource> Drop for ResourceAccessGuard<T> {
    fn drop(&mut self) {
        self.entry.release_ref();
    }
}

impl<T: Resource + fmt::Debug> fmt::Debug for ResourceAccessGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceAccessGuard")
            .field("id", &self.entry.id)
            .field("resource", &**self)
            .finish()
    }
}
