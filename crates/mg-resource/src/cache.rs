//! The resource cache.
//!
//! The cache keeps a sorted index of every file its loaders can supply. Index
//! records create their [`ResourceEntry`] lazily, the first time a resource of
//! that name is requested. Entries are loaded on first access, reloaded in
//! place by [`ResourceCache::refresh`] when their file or one of their
//! dependencies changes, and evicted least-recently-used first by
//! [`ResourceCache::unload_unused`].
//!
//! # Locking
//!
//! * The index lock is held only while looking up or rebuilding the index,
//!   never across a load.
//! * Each entry has its own lock, held exclusively for the duration of a
//!   load. Access guards take a snapshot of the payload and release the lock
//!   immediately.
//! * `refresh` waits for busy entries. `unload_unused` only *tries* to lock
//!   entries (bounded by [`ResourceCacheConfig::lock_timeout`]) and skips
//!   entries that are busy.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use mg_memory::SharedHeap;
use parking_lot::{RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};

use crate::entry::{is_loading, EntrySlot, LoadingScope, ResourceEntry};
use crate::error::ResourceError;
use crate::file_loader::{FileLoader, TimeStamp};
use crate::handle::{ResourceAccessGuard, ResourceHandle, UntypedResourceHandle};
use crate::identifier::Identifier;
use crate::resource::{LoadingInput, Resource};

// ---------------------------------------------------------------------------
// Configuration and notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ResourceCacheConfig {
    /// Size of the shared heap resources can allocate bulk data from.
    pub heap_bytes: usize,
    /// How long `unload_unused` waits for a busy entry.
    pub lock_timeout: Duration,
}

impl Default for ResourceCacheConfig {
    fn default() -> Self {
        Self {
            heap_bytes: 16 * 1024 * 1024,
            lock_timeout: Duration::from_millis(100),
        }
    }
}

/// Sent to reload observers once per successful reload during `refresh`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangedEvent {
    pub resource: UntypedResourceHandle,
    pub type_id: &'static str,
    pub time_stamp: TimeStamp,
}

type ReloadObserver = Box<dyn Fn(&FileChangedEvent) + Send + Sync>;

// ---------------------------------------------------------------------------
// File index
// ---------------------------------------------------------------------------

struct FileRecord {
    name: Identifier,
    time_stamp: TimeStamp,
    loader: usize,
    entry: OnceLock<Arc<ResourceEntry>>,
}

fn find_record<'a>(index: &'a [FileRecord], id: &str) -> Option<&'a FileRecord> {
    index
        .binary_search_by(|record| record.name.as_str().cmp(id))
        .ok()
        .map(|i| &index[i])
}

// ---------------------------------------------------------------------------
// ResourceCache
// ---------------------------------------------------------------------------

pub struct ResourceCache {
    loaders: Vec<Arc<dyn FileLoader>>,
    index: RwLock<Vec<FileRecord>>,
    observers: RwLock<Vec<ReloadObserver>>,
    heap: SharedHeap,
    access_tick: AtomicU64,
    config: ResourceCacheConfig,
}

impl ResourceCache {
    /// Create a cache over `loaders` and index their files.
    pub fn new(loaders: Vec<Box<dyn FileLoader>>, config: ResourceCacheConfig) -> Self {
        let cache = Self {
            loaders: loaders.into_iter().map(Arc::from).collect(),
            index: RwLock::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
            heap: SharedHeap::new(config.heap_bytes),
            access_tick: AtomicU64::new(0),
            config,
        };
        cache.rebuild_index();
        cache
    }

    pub fn config(&self) -> &ResourceCacheConfig {
        &self.config
    }

    pub fn file_loaders(&self) -> &[Arc<dyn FileLoader>] {
        &self.loaders
    }

    /// Heap shared by all resources of this cache.
    pub fn heap(&self) -> &SharedHeap {
        &self.heap
    }

    /// Number of files in the index.
    pub fn num_files(&self) -> usize {
        self.index.read().len()
    }

    pub fn file_exists(&self, id: &str) -> bool {
        find_record(&self.index.read(), id).is_some()
    }

    /// Time stamp of the indexed file `id`.
    pub fn file_time_stamp(&self, id: &str) -> Result<TimeStamp, ResourceError> {
        find_record(&self.index.read(), id)
            .map(|record| record.time_stamp)
            .ok_or_else(|| ResourceError::NotFound {
                resource: Identifier::from(id),
            })
    }

    /// Whether `id` is currently loaded.
    pub fn is_cached(&self, id: &str) -> bool {
        find_record(&self.index.read(), id)
            .and_then(|record| record.entry.get())
            .is_some_and(|entry| entry.is_loaded())
    }

    /// Get a storable handle to the resource `id`, loading it first if
    /// `load_immediately` is set.
    pub fn resource_handle<T: Resource>(
        &self,
        id: impl Into<Identifier>,
        load_immediately: bool,
    ) -> Result<ResourceHandle<T>, ResourceError> {
        let entry = self.entry_for::<T>(&id.into())?;
        let handle = ResourceHandle::new(entry);
        if load_immediately {
            drop(self.access_handle(&handle)?);
        }
        Ok(handle)
    }

    /// Access the resource `id`, loading it if necessary.
    pub fn access<T: Resource>(
        &self,
        id: impl Into<Identifier>,
    ) -> Result<ResourceAccessGuard<T>, ResourceError> {
        let handle = self.resource_handle::<T>(id, false)?;
        self.access_handle(&handle)
    }

    /// Access the resource behind `handle`, loading it if necessary.
    pub fn access_handle<T: Resource>(
        &self,
        handle: &ResourceHandle<T>,
    ) -> Result<ResourceAccessGuard<T>, ResourceError> {
        self.acquire(&handle.entry)
    }

    /// Register a callback invoked for each resource reloaded by `refresh`.
    pub fn add_reload_observer(&self, observer: impl Fn(&FileChangedEvent) + Send + Sync + 'static) {
        self.observers.write().push(Box::new(observer));
    }

    fn entry_for<T: Resource>(&self, id: &Identifier) -> Result<Arc<ResourceEntry>, ResourceError> {
        let index = self.index.read();
        let Some(record) = find_record(&index, id) else {
            tracing::error!(resource = %id, "resource not found");
            return Err(ResourceError::NotFound { resource: id.clone() });
        };

        let entry = record
            .entry
            .get_or_init(|| Arc::new(ResourceEntry::new::<T>(record.name.clone())));
        if entry.rust_type != TypeId::of::<T>() {
            return Err(ResourceError::WrongType {
                resource: id.clone(),
                expected: T::TYPE_ID,
                actual: entry.type_name,
            });
        }
        Ok(entry.clone())
    }

    /// Create a guard for the current payload of `entry`, loading it first if
    /// it is not loaded.
    fn acquire<T: Resource>(
        &self,
        entry: &Arc<ResourceEntry>,
    ) -> Result<ResourceAccessGuard<T>, ResourceError> {
        if is_loading(&entry.id) {
            tracing::error!(resource = %entry.id, "dependency cycle");
            return Err(ResourceError::DependencyCycle {
                resource: entry.id.clone(),
            });
        }

        // Runs under the entry lock so an unload never sees a stale ref count.
        let guard_for = |slot: &EntrySlot| {
            slot.payload.clone().map(|payload| {
                let tick = self.access_tick.fetch_add(1, Ordering::Relaxed) + 1;
                ResourceAccessGuard::<T>::new(entry.clone(), payload, slot.time_stamp, tick)
            })
        };

        if let Some(guard) = guard_for(&*entry.slot.read()) {
            return Ok(guard);
        }

        let slot = entry.slot.upgradable_read();
        if let Some(guard) = guard_for(&*slot) {
            return Ok(guard);
        }

        let mut slot = RwLockUpgradableReadGuard::upgrade(slot);
        self.load_into(entry, &mut slot)?;
        let slot = RwLockWriteGuard::downgrade(slot);
        Ok(guard_for(&*slot).expect("payload present after a successful load"))
    }

    /// Run the entry's loader and replace the slot contents on success. On
    /// failure the slot is left untouched.
    fn load_into(&self, entry: &ResourceEntry, slot: &mut EntrySlot) -> Result<(), ResourceError> {
        let Some((loader, time_stamp)) = self.source_of(&entry.id) else {
            tracing::error!(resource = %entry.id, "resource not found");
            return Err(ResourceError::NotFound {
                resource: entry.id.clone(),
            });
        };

        let data = loader.load_file(&entry.id).map_err(|source| {
            tracing::error!(resource = %entry.id, loader = loader.name(), error = %source, "failed to read resource file");
            ResourceError::Io {
                resource: entry.id.clone(),
                source,
            }
        })?;

        let _scope = LoadingScope::enter(&entry.id);
        let input = LoadingInput::new(&entry.id, data, self);
        let payload = (entry.load_fn)(&input).map_err(|source| {
            tracing::error!(resource = %entry.id, type_id = entry.type_name, error = %source, "failed to load resource");
            ResourceError::LoadFailed {
                resource: entry.id.clone(),
                type_id: entry.type_name,
                source,
            }
        })?;

        slot.payload = Some(payload);
        slot.time_stamp = time_stamp;
        slot.dependencies = input.into_dependencies();
        entry.set_loaded(true);
        tracing::debug!(
            resource = %entry.id,
            type_id = entry.type_name,
            dependencies = slot.dependencies.len(),
            "loaded resource"
        );
        Ok(())
    }

    fn source_of(&self, id: &Identifier) -> Option<(Arc<dyn FileLoader>, TimeStamp)> {
        let index = self.index.read();
        let record = find_record(&index, id)?;
        Some((self.loaders[record.loader].clone(), record.time_stamp))
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// Rebuild the file index and reload every loaded resource whose file or
    /// dependencies changed. Returns the number of resources reloaded.
    ///
    /// A resource that fails to reload keeps its previous contents. Resources
    /// held by an access guard are reloaded too; the guard keeps the version
    /// it was created with.
    pub fn refresh(&self) -> usize {
        self.rebuild_index();

        let loaded: Vec<Arc<ResourceEntry>> = self
            .index
            .read()
            .iter()
            .filter_map(|record| record.entry.get())
            .filter(|entry| entry.is_loaded())
            .cloned()
            .collect();

        let mut stale: HashMap<Identifier, (Arc<ResourceEntry>, Vec<Identifier>)> = HashMap::new();
        for entry in loaded {
            let slot = entry.slot.read();
            let Some(payload) = slot.payload.as_deref() else {
                continue;
            };
            if !payload.should_reload_on_file_change() || !self.is_stale(&entry.id, &slot) {
                continue;
            }
            let dependencies = slot.dependencies.iter().map(|d| d.id.clone()).collect();
            drop(slot);
            stale.insert(entry.id.clone(), (entry, dependencies));
        }

        let mut events = Vec::new();
        for entry in dependencies_first(stale) {
            let mut slot = entry.slot.write();
            // Another thread may have reloaded it since the check above.
            if slot.payload.is_none() || !self.is_stale(&entry.id, &slot) {
                continue;
            }
            if self.load_into(&entry, &mut slot).is_err() {
                tracing::error!(resource = %entry.id, "reload failed, keeping previous version");
                continue;
            }
            tracing::info!(resource = %entry.id, type_id = entry.type_name, "reloaded resource");
            events.push(FileChangedEvent {
                resource: UntypedResourceHandle {
                    entry: entry.clone(),
                },
                type_id: entry.type_name,
                time_stamp: slot.time_stamp,
            });
        }

        let observers = self.observers.read();
        for event in &events {
            for observer in observers.iter() {
                observer(event);
            }
        }
        events.len()
    }

    fn is_stale(&self, id: &Identifier, slot: &EntrySlot) -> bool {
        let Ok(current) = self.file_time_stamp(id) else {
            return false;
        };
        if current > slot.time_stamp {
            return true;
        }
        slot.dependencies.iter().any(|dependency| {
            match self.file_time_stamp(&dependency.id) {
                Ok(current) => current > dependency.time_stamp,
                Err(_) => {
                    tracing::warn!(resource = %id, dependency = %dependency.id, "dependency no longer exists");
                    false
                }
            }
        })
    }

    fn rebuild_index(&self) {
        let mut merged: BTreeMap<Identifier, (TimeStamp, usize)> = BTreeMap::new();
        for (loader_index, loader) in self.loaders.iter().enumerate() {
            let files = match loader.available_files() {
                Ok(files) => files,
                Err(e) => {
                    tracing::error!(loader = loader.name(), error = %e, "failed to list files");
                    continue;
                }
            };
            for file in files {
                let candidate = (file.time_stamp, loader_index);
                merged
                    .entry(file.name)
                    .and_modify(|existing| {
                        if candidate.0 > existing.0 {
                            *existing = candidate;
                        }
                    })
                    .or_insert(candidate);
            }
        }

        let mut index = self.index.write();
        let mut previous = mem::take(&mut *index).into_iter().peekable();
        let mut added = 0usize;
        let mut removed = 0usize;
        let mut rebuilt = Vec::with_capacity(merged.len());

        for (name, (time_stamp, loader)) in merged {
            while previous.next_if(|old| old.name < name).is_some() {
                removed += 1;
            }
            let entry = match previous.next_if(|old| old.name == name) {
                Some(old) => old.entry,
                None => {
                    added += 1;
                    OnceLock::new()
                }
            };
            rebuilt.push(FileRecord {
                name,
                time_stamp,
                loader,
                entry,
            });
        }
        removed += previous.count();

        *index = rebuilt;
        tracing::debug!(files = index.len(), added, removed, "rebuilt file index");
    }

    // -----------------------------------------------------------------------
    // Eviction
    // -----------------------------------------------------------------------

    /// Unload the least recently used resource that is not currently
    /// accessed, or every such resource if `unload_all` is set. Returns
    /// whether anything was unloaded.
    pub fn unload_unused(&self, unload_all: bool) -> bool {
        let mut candidates: Vec<Arc<ResourceEntry>> = self
            .index
            .read()
            .iter()
            .filter_map(|record| record.entry.get())
            .filter(|entry| entry.is_loaded() && entry.ref_count() == 0)
            .cloned()
            .collect();
        candidates.sort_by_key(|entry| entry.last_access());

        let mut unloaded_any = false;
        for entry in candidates {
            let Some(mut slot) = entry.slot.try_write_for(self.config.lock_timeout) else {
                tracing::warn!(resource = %entry.id, "resource busy, not unloading");
                continue;
            };
            if slot.payload.is_none() || entry.ref_count() != 0 {
                continue;
            }
            let payload = slot.payload.take();
            slot.dependencies.clear();
            entry.set_loaded(false);
            drop(slot);
            drop(payload);

            tracing::debug!(resource = %entry.id, "unloaded resource");
            unloaded_any = true;
            if !unload_all {
                break;
            }
        }
        unloaded_any
    }
}

/// Order `stale` so that every entry comes after the stale entries it
/// depends on.
fn dependencies_first(
    mut stale: HashMap<Identifier, (Arc<ResourceEntry>, Vec<Identifier>)>,
) -> Vec<Arc<ResourceEntry>> {
    fn visit(
        id: &Identifier,
        stale: &mut HashMap<Identifier, (Arc<ResourceEntry>, Vec<Identifier>)>,
        visited: &mut HashSet<Identifier>,
        order: &mut Vec<Arc<ResourceEntry>>,
    ) {
        if !visited.insert(id.clone()) {
            return;
        }
        let Some((entry, dependencies)) = stale.remove(id) else {
            return;
        };
        for dependency in &dependencies {
            visit(dependency, stale, visited, order);
        }
        order.push(entry);
    }

    let mut ids: Vec<Identifier> = stale.keys().cloned().collect();
    ids.sort();
    let mut visited = HashSet::new();
    let mut order = Vec::with_capacity(ids.len());
    for id in &ids {
        visit(id, &mut stale, &mut visited, &mut order);
    }
    order
}

impl fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loaders: Vec<&str> = self.loaders.iter().map(|l| l.name()).collect();
        f.debug_struct("ResourceCache")
            .field("loaders", &loaders)
            .field("files", &self.index.read().len())
            .field("heap", &self.heap)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
