pub mod entry;
pub mod error;

pub use entry::{CacheEntry, CachePriority, Metadata};
pub use error::{CacheError, Result};
