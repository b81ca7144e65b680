//! The engine context tying the core subsystems together.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use mg_ecs::EntityCollection;
use mg_resource::{DirectoryLoader, FileLoader, Identifier, Resource, ResourceCache};

use crate::config::EngineConfig;
use crate::logging;
use crate::thread_pool::ThreadPool;

/// Owns the entity collection, the resource cache and the worker pool.
///
/// The entity collection is not internally synchronised; mutate it from one
/// thread at a time. The resource cache is shared with pool jobs.
pub struct Engine {
    config: EngineConfig,
    entities: EntityCollection,
    resources: Arc<ResourceCache>,
    pool: ThreadPool,
}

impl Engine {
    /// Build an engine whose resources come from the configured asset
    /// directories.
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        Self::with_loaders(config, Vec::new())
    }

    /// Like [`Engine::new`], with `extra_loaders` consulted alongside the
    /// asset directories.
    pub fn with_loaders(
        config: EngineConfig,
        extra_loaders: Vec<Box<dyn FileLoader>>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let mut loaders: Vec<Box<dyn FileLoader>> = Vec::new();
        for dir in &config.asset_directories {
            if !dir.is_dir() {
                tracing::warn!(directory = %dir.display(), "asset directory does not exist");
            }
            loaders.push(Box::new(DirectoryLoader::new(dir)));
        }
        loaders.extend(extra_loaders);

        let resources = Arc::new(ResourceCache::new(loaders, config.resource_cache_config()));
        let pool = ThreadPool::new(config.worker_threads).context("failed to start worker threads")?;
        let entities = EntityCollection::new(config.entity_capacity);

        tracing::info!(
            workers = pool.size(),
            entity_capacity = config.entity_capacity,
            files = resources.num_files(),
            "engine started"
        );

        Ok(Self {
            config,
            entities,
            resources,
            pool,
        })
    }

    /// Read a JSON config file, set up logging from it and start the engine.
    pub fn from_config_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config = EngineConfig::load(path)?;
        logging::init(&config.log_filter);
        Self::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn entities(&self) -> &EntityCollection {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut EntityCollection {
        &mut self.entities
    }

    pub fn resources(&self) -> &Arc<ResourceCache> {
        &self.resources
    }

    pub fn thread_pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Pick up changed resource files. Returns the number of resources
    /// reloaded.
    pub fn refresh_resources(&self) -> usize {
        let reloaded = self.resources.refresh();
        if self.config.unload_all_unused_on_refresh {
            self.resources.unload_unused(true);
        }
        reloaded
    }

    /// Load `ids` as `T` on the worker pool. Returns how many loaded
    /// successfully; failures are logged by the cache.
    ///
    /// An entry's type is fixed by its first request, so preload each file
    /// as the type it will later be accessed as.
    pub fn preload<T: Resource>(&self, ids: impl IntoIterator<Item = impl Into<Identifier>>) -> usize {
        let ids: Vec<Identifier> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return 0;
        }

        let requested = ids.len();
        let chunk_size = ids.len().div_ceil(self.pool.size()).max(1);
        let cache = Arc::clone(&self.resources);
        let results = self.pool.parallel_for(ids, chunk_size, move |id| {
            cache.resource_handle::<T>(id, true).is_ok()
        });

        match results {
            Ok(results) => {
                let loaded = results.into_iter().filter(|&loaded| loaded).count();
                tracing::info!(requested, loaded, type_id = T::TYPE_ID, "preloaded resources");
                loaded
            }
            Err(e) => {
                tracing::error!(error = %e, "preload job failed");
                0
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("entities", &self.entities.num_entities())
            .field("resources", &self.resources)
            .field("pool", &self.pool)
            .finish()
    }
}
