//! # libris-cache
//!
//! Two-tier cache for the Libris library service.
//!
//! - L1: [`LocalCache`], per-owner projections held in process.
//! - L2: [`RemoteCacheClient`] over a [`RemoteTier`] (Redis in production,
//!   [`MemoryTier`] in tests), supervised by a [`HealthMonitor`].
//!
//! Reads go through [`CacheAsideOrchestrator::get_or_compute`]. Writes commit
//! in the store first; the committed `(item, owner)` pairs then reach
//! [`CacheInvalidationCoordinator::invalidate`], which clears L1 before L2.
//!
//! ## Wiring
//!
//! ```ignore
//! let config = libris_cache::config::loader::load_config(None)?;
//! let client = Arc::new(RemoteCacheClient::connect(&config)?);
//! let monitor = HealthMonitor::new(client.clone(), &config.health, &config.pool);
//! let handle = monitor.start()?;
//!
//! let keys = KeySpace::new(config.keys.domain_prefix.clone());
//! let local = Arc::new(LocalCache::<LibraryOverview>::from_config(&config.local));
//! let coordinator = Arc::new(CacheInvalidationCoordinator::new(keys.clone(), local, client.clone()));
//! let store = TrackedStore::new(inner_store, coordinator.clone());
//! let reads = CacheAsideOrchestrator::new(
//!     keys,
//!     client,
//!     monitor.reporter(),
//!     config.ttl.clone(),
//!     coordinator.generations(),
//! );
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod invalidation;
pub mod keys;
pub mod local;
pub mod metrics;
pub mod observability;
pub mod orchestrator;
pub mod remote;
pub mod window;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult, ErrorCategory};
pub use health::{HealthMetrics, HealthMonitor, HealthReporter, HealthStatus, MonitorHandle, MonitorState};
pub use invalidation::{CacheInvalidationCoordinator, InvalidationGenerations, InvalidationReport};
pub use keys::{CacheKey, EntityType, KeySpace, ReadTarget, validate_key_set};
pub use local::{LocalCache, LocalCacheStats, LocalTier};
pub use observability::{apply_logging_level, init_tracing, init_tracing_with_level, shutdown_tracing};
pub use orchestrator::{CacheAsideOrchestrator, Fetched, Source};
pub use remote::{
    ClientOptions, ClientStats, ClientStatus, MemoryTier, PoolStats, RedisTier, RemoteCacheClient,
    RemoteTier,
};
pub use window::TimeWindow;
