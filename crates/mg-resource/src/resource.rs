//! The [`Resource`] trait and the input handed to resource loaders.

use std::any::Any;
use std::cell::RefCell;

use mg_memory::SharedHeap;

use crate::cache::ResourceCache;
use crate::error::{LoadResourceError, ResourceError};
use crate::file_loader::TimeStamp;
use crate::handle::ResourceHandle;
use crate::identifier::Identifier;

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// A type that can be loaded from a file by the [`ResourceCache`].
///
/// `load` is called once per load or reload. It receives the raw file bytes
/// and may pull in other resources through
/// [`LoadingInput::load_dependency`]; those dependencies are tracked so a
/// change to any of them triggers a reload of this resource.
///
/// # Example
///
/// ```
/// use mg_resource::prelude::*;
///
/// struct Greeting(String);
///
/// impl Resource for Greeting {
///     const TYPE_ID: &'static str = "greeting";
///
///     fn load(input: &LoadingInput<'_>) -> Result<Self, LoadResourceError> {
///         Ok(Greeting(format!("hello, {}", input.resource_data_as_text()?)))
///     }
/// }
///
/// let files = MemoryFileLoader::new("mem");
/// files.insert("name.txt", "world", TimeStamp(1));
/// let cache = ResourceCache::new(vec![Box::new(files)], ResourceCacheConfig::default());
///
/// let greeting = cache.access::<Greeting>("name.txt").unwrap();
/// assert_eq!(greeting.0, "hello, world");
/// ```
pub trait Resource: Send + Sync + Sized + 'static {
    /// Stable name of the resource type, used in logs and notifications.
    const TYPE_ID: &'static str;

    fn load(input: &LoadingInput<'_>) -> Result<Self, LoadResourceError>;

    /// Whether `refresh` should reload this resource when its file (or a
    /// dependency) changes.
    fn should_reload_on_file_change(&self) -> bool {
        true
    }
}

/// Object-safe view of a loaded resource, stored in cache entries.
pub(crate) trait ErasedResource: Send + Sync {
    fn should_reload_on_file_change(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Resource> ErasedResource for T {
    fn should_reload_on_file_change(&self) -> bool {
        Resource::should_reload_on_file_change(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// LoadingInput
// ---------------------------------------------------------------------------

/// A resource the loaded resource depends on, with the dependency's file
/// time stamp at the moment it was pulled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub id: Identifier,
    pub time_stamp: TimeStamp,
}

/// Everything a [`Resource::load`] implementation gets to work with.
pub struct LoadingInput<'a> {
    id: &'a Identifier,
    data: Vec<u8>,
    cache: &'a ResourceCache,
    dependencies: RefCell<Vec<Dependency>>,
}

impl<'a> LoadingInput<'a> {
    pub(crate) fn new(id: &'a Identifier, data: Vec<u8>, cache: &'a ResourceCache) -> Self {
        Self {
            id,
            data,
            cache,
            dependencies: RefCell::new(Vec::new()),
        }
    }

    /// Name of the resource being loaded.
    pub fn id(&self) -> &Identifier {
        self.id
    }

    /// Raw contents of the resource file.
    pub fn resource_data(&self) -> &[u8] {
        &self.data
    }

    /// Contents of the resource file as UTF-8 text.
    pub fn resource_data_as_text(&self) -> Result<&str, LoadResourceError> {
        std::str::from_utf8(&self.data).map_err(|e| {
            LoadResourceError::data_error(format!("'{}' is not valid UTF-8: {e}", self.id))
        })
    }

    /// Load another resource this one depends on and record the dependency.
    pub fn load_dependency<D: Resource>(
        &self,
        id: impl Into<Identifier>,
    ) -> Result<ResourceHandle<D>, LoadResourceError> {
        let id = id.into();
        let Ok(time_stamp) = self.cache.file_time_stamp(&id) else {
            return Err(LoadResourceError::DependencyNotFound { dependency: id });
        };

        let handle = self.cache.resource_handle::<D>(&id, true).map_err(|e| match e {
            ResourceError::NotFound { .. } => LoadResourceError::DependencyNotFound {
                dependency: id.clone(),
            },
            other => LoadResourceError::DependencyFailed {
                dependency: id.clone(),
                reason: other.to_string(),
            },
        })?;

        self.dependencies.borrow_mut().push(Dependency { id, time_stamp });
        Ok(handle)
    }

    /// The cache's shared heap, for resources that keep bulk data there.
    pub fn heap(&self) -> &SharedHeap {
        self.cache.heap()
    }

    pub fn cache(&self) -> &ResourceCache {
        self.cache
    }

    pub(crate) fn into_dependencies(self) -> Vec<Dependency> {
        self.dependencies.into_inner()
    }
}
