//! Fingerprint-keyed result cache.
//!
//! - **Key** (`key`): deterministic [`Fingerprint`] derivation from a namespace
//!   and the canonical JSON form of the identifying fields.
//! - **Store** (`store`): [`ResultCache`], a TTL cache with FIFO capacity
//!   eviction, optional durable backing and per-key single-flight.
//!
//! # Example
//!
//! ```ignore
//! use digest_forge::cache::{CacheConfig, ResultCache};
//! use std::time::Duration;
//!
//! let cache: ResultCache<String> = ResultCache::with_config(
//!     CacheConfig::new(500)
//!         .with_ttl(Duration::from_secs(1800))
//!         .with_persistence("data/cache"),
//! );
//! let key = ResultCache::<String>::generate_key("analysis", &item_fields)?;
//! let value = cache.wrap(key.as_str(), None, || compute()).await?;
//! ```

pub mod key;
pub mod store;

pub use key::Fingerprint;
pub use store::{CacheConfig, CacheStats, KeyGuard, ResultCache, SharedResultCache};
