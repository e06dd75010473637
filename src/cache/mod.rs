// ============================================================================
// Item Cache
// ============================================================================
//
// Bounded, TTL-based cache of formatted item values keyed by `domain+item`.
// Expiry is lazy on read; physical pruning happens only on `put`, so no timer
// thread is needed.
//
// ============================================================================

pub mod item_cache;

pub use item_cache::{CacheConfig, CacheStats, ItemCache};
