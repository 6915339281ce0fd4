pub mod cache_entries;

pub use cache_entries::{CacheUsage, EvictionBounds};
