//! Generic caching layer for paginated read results.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Keeps a fast in-memory TTL tier in front of a serialized key-value tier
//! - Reads through an injectable clock so TTL boundaries are deterministic
//! - Treats every storage failure as a cache miss, never as a fetch failure
//! - Invalidates by key prefix across both tiers, synchronously

pub mod clock;
mod layer;
mod memory;
pub mod storage;
mod traits;

pub use clock::{Clock, SystemClock};
pub use layer::CacheLayer;
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};
pub use traits::{CacheResult, CacheSource, QueryKey};
