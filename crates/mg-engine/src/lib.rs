//! Magnum engine -- the runtime context around the ECS and the resource
//! cache.
//!
//! This crate wires [`mg_ecs`], [`mg_resource`] and [`mg_memory`] together
//! behind an [`Engine`] configured from JSON, and provides the worker
//! [`ThreadPool`] used for bulk jobs such as resource preloading.
//!
//! # Quick Start
//!
//! ```
//! use mg_engine::prelude::*;
//!
//! let files = MemoryFileLoader::new("embedded");
//! files.insert("level.txt", "first level", TimeStamp(1));
//!
//! let config = EngineConfig { worker_threads: 2, ..Default::default() };
//! let mut engine = Engine::with_loaders(config, vec![Box::new(files)]).unwrap();
//!
//! let player = engine.entities_mut().create_entity();
//! engine.entities_mut().add_component(player, 100u32);
//!
//! assert_eq!(engine.preload::<TextResource>(["level.txt"]), 1);
//! assert_eq!(engine.refresh_resources(), 0);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod logging;
pub mod thread_pool;

pub use config::EngineConfig;
pub use engine::Engine;
pub use thread_pool::{JobHandle, JobPanicked, ThreadPool};

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the ECS crate for convenience.
pub use mg_ecs;

/// Re-export the memory crate for convenience.
pub use mg_memory;

/// Re-export the resource crate for convenience.
pub use mg_resource;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use mg_ecs::prelude::*;
    pub use mg_memory::prelude::*;
    pub use mg_resource::prelude::*;

    pub use crate::config::EngineConfig;
    pub use crate::engine::Engine;
    pub use crate::thread_pool::{JobHandle, JobPanicked, ThreadPool};
}
