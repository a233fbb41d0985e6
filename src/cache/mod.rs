//! Multi-tier response cache.
//!
//! Responses are grouped into named generations, one per tier and version
//! (`static-v1`, `dynamic-v1`, `api-v1`). Generations are created lazily and
//! removed whole when a newer version activates; there is no per-entry
//! eviction inside a generation.

mod storage;
mod tiers;
mod traits;

pub use storage::SqliteStorage;
pub use tiers::CacheTiers;
pub use traits::{CacheStore, CacheTier, Fingerprint};
