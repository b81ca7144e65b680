//! Per-resource cache entries.
//!
//! Every entry owns its own reader/writer lock, so loading one resource never
//! blocks lookups of another. The lock guards the current payload, which is
//! shared through an `Arc`: access guards take a snapshot under a short read
//! lock and never hold the lock themselves. Loads take the upgradable lock,
//! which admits at most one loader per entry at a time.

use std::any::TypeId;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::LoadResourceError;
use crate::file_loader::TimeStamp;
use crate::identifier::Identifier;
use crate::resource::{Dependency, ErasedResource, LoadingInput, Resource};

pub(crate) type Payload = Arc<dyn ErasedResource>;

pub(crate) type LoadFn = fn(&LoadingInput<'_>) -> Result<Payload, LoadResourceError>;

fn load_erased<T: Resource>(input: &LoadingInput<'_>) -> Result<Payload, LoadResourceError> {
    T::load(input).map(|resource| Arc::new(resource) as Payload)
}

/// The lock-protected part of an entry.
#[derive(Default)]
pub(crate) struct EntrySlot {
    pub payload: Option<Payload>,
    /// Time stamp of the file the payload was loaded from.
    pub time_stamp: TimeStamp,
    pub dependencies: Vec<Dependency>,
}

pub(crate) struct ResourceEntry {
    pub id: Identifier,
    pub type_name: &'static str,
    pub rust_type: TypeId,
    pub load_fn: LoadFn,
    pub slot: RwLock<EntrySlot>,
    ref_count: AtomicUsize,
    last_access: AtomicU64,
    loaded: AtomicBool,
}

impl ResourceEntry {
    pub fn new<T: Resource>(id: Identifier) -> Self {
        Self {
            id,
            type_name: T::TYPE_ID,
            rust_type: TypeId::of::<T>(),
            load_fn: load_erased::<T>,
            slot: RwLock::new(EntrySlot::default()),
            ref_count: AtomicUsize::new(0),
            last_access: AtomicU64::new(0),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Must be called with the slot write lock held.
    pub fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::Release);
    }

    pub fn acquire_ref(&self, tick: u64) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
        self.last_access.fetch_max(tick, Ordering::Relaxed);
    }

    pub fn release_ref(&self) {
        let previous = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "resource ref count underflow");
    }
}

impl fmt::Debug for ResourceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceEntry")
            .field("id", &self.id)
            .field("type", &self.type_name)
            .field("ref_count", &self.ref_count())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Loading stack
// ---------------------------------------------------------------------------

thread_local! {
    static LOADING: RefCell<Vec<Identifier>> = const { RefCell::new(Vec::new()) };
}

/// Whether the current thread is already inside the loader of `id`.
pub(crate) fn is_loading(id: &Identifier) -> bool {
    LOADING.with(|stack| stack.borrow().contains(id))
}

/// Marks `id` as being loaded on this thread until dropped.
pub(crate) struct LoadingScope;

impl LoadingScope {
    pub fn enter(id: &Identifier) -> Self {
        LOADING.with(|stack| stack.borrow_mut().push(id.clone()));
        LoadingScope
    }
}

impl Drop for LoadingScope {
    fn drop(&mut self) {
        LOADING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
