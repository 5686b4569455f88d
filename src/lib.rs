//! # swr-kit
//!
//! A stale-while-revalidate read-through cache controller for slow,
//! rate-limited upstreams.
//!
//! ## Features
//!
//! - **Never blocks on a stale hit:** queueable resources are served from the
//!   store and refreshed by background workers
//! - **At most one pending refresh per fingerprint:** dedup markers are created
//!   with an atomic set-if-absent on the shared store
//! - **Availability over freshness:** a stored body stays servable as a fallback
//!   for as long as upstream keeps failing
//! - **Negative-result cache:** definitive not-founds are answered with a fixed
//!   404 without contacting upstream again
//! - **Backend Agnostic:** in-memory and Redis backends, with an optional
//!   process-local micro-cache in front
//!
//! ## Quick Start
//!
//! ```ignore
//! use swr_kit::{CacheConfig, CacheService, RefreshDispatcher, RefreshQueue, Request};
//! use swr_kit::backend::InMemoryBackend;
//! use swr_kit::upstream::JsonSerializer;
//!
//! // 1. Read configuration once at startup
//! let config = CacheConfig::from_env()?;
//!
//! // 2. Inject store, upstream, serializer and queue
//! let dispatcher = RefreshDispatcher::from_config(
//!     InMemoryBackend::new(),
//!     my_upstream,
//!     JsonSerializer,
//!     RefreshQueue::new(),
//!     &config,
//! );
//!
//! // 3. Wrap in a service and start the refresh workers
//! let service = CacheService::from_config(dispatcher, &config);
//! let workers = service.spawn_workers(config.queue_workers);
//!
//! // 4. Serve requests - CacheService is Clone for sharing across handlers
//! let response = service.serve(&Request::new("anime", "/anime/1")).await?;
//! assert_eq!(response.status, 200);
//!
//! // 5. Drain the queue on shutdown
//! service.shutdown(workers).await;
//! ```

#[macro_use]
extern crate log;

pub mod assembler;
pub mod backend;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fingerprint;
pub mod key;
pub mod negative;
pub mod observability;
pub mod policy;
pub mod queue;
pub mod refresh;
pub mod serialization;
pub mod service;
pub mod store;
pub mod strategy;
pub mod upstream;
pub mod worker;

// Re-exports for convenience
pub use assembler::{AssembledResponse, ResponseAssembler};
pub use backend::CacheBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use dispatcher::{Dispatched, RefreshDispatcher, ServedBody};
pub use error::{Error, FetchError, Result};
pub use fingerprint::{Fingerprint, FingerprintResolver, Request};
pub use policy::{PolicyTable, Priority, ResourcePolicy};
pub use queue::{RefreshJob, RefreshQueue};
pub use service::CacheService;
pub use strategy::CacheDecision;
pub use upstream::{CommitHook, ResponseSerializer, Upstream};
pub use worker::RefreshWorker;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
