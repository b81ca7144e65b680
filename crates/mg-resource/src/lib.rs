//! Magnum resources -- a hot-reloading resource cache.
//!
//! A [`ResourceCache`] indexes the files offered by one or more
//! [`FileLoader`]s and turns them into typed [`Resource`]s on demand:
//!
//! - **Loading**: the first [`access`](ResourceCache::access) of a resource
//!   runs its loader; concurrent accesses wait for that single load.
//! - **Hot reload**: [`refresh`](ResourceCache::refresh) rescans the loaders
//!   and reloads resources whose files (or dependencies) changed.
//! - **Eviction**: [`unload_unused`](ResourceCache::unload_unused) drops the
//!   least recently used resources nobody currently holds.
//!
//! # Quick Start
//!
//! ```
//! use mg_resource::prelude::*;
//!
//! let files = MemoryFileLoader::new("embedded");
//! files.insert("readme.txt", "hello", TimeStamp(1));
//!
//! let cache = ResourceCache::new(vec![Box::new(files)], ResourceCacheConfig::default());
//! {
//!     let text = cache.access::<TextResource>("readme.txt").unwrap();
//!     assert_eq!(text.text(), "hello");
//! }
//! assert!(cache.unload_unused(false));
//! ```

#![deny(unsafe_code)]

pub mod cache;
mod entry;
pub mod error;
pub mod file_loader;
pub mod handle;
pub mod identifier;
pub mod resource;
pub mod resources;

pub use cache::{FileChangedEvent, ResourceCache, ResourceCacheConfig};
pub use error::{LoadResourceError, ResourceError};
pub use file_loader::{DirectoryLoader, FileInfo, FileLoader, MemoryFileLoader, TimeStamp};
pub use handle::{ResourceAccessGuard, ResourceHandle, UntypedResourceHandle};
pub use identifier::Identifier;
pub use resource::{Dependency, LoadingInput, Resource};
pub use resources::{RawResource, TextResource};

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::cache::{FileChangedEvent, ResourceCache, ResourceCacheConfig};
    pub use crate::error::{LoadResourceError, ResourceError};
    pub use crate::file_loader::{DirectoryLoader, FileInfo, FileLoader, MemoryFileLoader, TimeStamp};
    pub use crate::handle::{ResourceAccessGuard, ResourceHandle, UntypedResourceHandle};
    pub use crate::identifier::Identifier;
    pub use crate::resource::{LoadingInput, Resource};
    pub use crate::resources::{RawResource, TextResource};
}
