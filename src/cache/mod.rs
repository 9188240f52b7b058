//! Bounded response cache with TTL and stale-while-revalidate support.

mod stats;
mod store;

pub use stats::CacheStats;
pub use store::{CacheLookup, CacheStore};
