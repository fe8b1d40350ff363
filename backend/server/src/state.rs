use std::sync::Arc;

use super::{
    cache::TtlCache,
    config::{Config, StoreBackend},
    location::{IpApiResolver, LocationResolver, NoLookups},
    store::{FeedbackStore, MemoryStore, RedisStore, StoreError},
    submission::{SubmissionWriter, WriterConfig},
};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn FeedbackStore>,
    pub writer: SubmissionWriter,
    pub locator: Arc<dyn LocationResolver>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>, StoreError> {
        let store: Arc<dyn FeedbackStore> = match config.store_backend {
            StoreBackend::Redis => Arc::new(RedisStore::connect(&config.redis_url).await?),
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };

        let locator: Arc<dyn LocationResolver> = if config.location_lookups {
            Arc::new(IpApiResolver::new(TtlCache::new(
                config.location_cache_ttl,
                config.location_cache_capacity,
            )))
        } else {
            Arc::new(NoLookups)
        };

        Self::from_parts(config, store, locator).await
    }

    /// Builds the state around an existing store; probes it once for atomic support.
    pub async fn from_parts(
        config: Config,
        store: Arc<dyn FeedbackStore>,
        locator: Arc<dyn LocationResolver>,
    ) -> Result<Arc<Self>, StoreError> {
        let writer_config = WriterConfig {
            attempts: config.atomic_retries,
            store_timeout: config.store_timeout,
        };
        let writer =
            SubmissionWriter::connect(store.clone(), config.atomic_writes, writer_config).await?;

        Ok(Arc::new(Self {
            config,
            store,
            writer,
            locator,
        }))
    }
}
