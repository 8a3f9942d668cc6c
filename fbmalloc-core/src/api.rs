//! The API of fbmalloc-core.

mod configuration;
mod description;
mod error;
mod heap;
mod platform;
mod thread;

pub use configuration::{CacheOptions, Configuration, Properties};
pub use description::{BucketIndex, CacheStatistics, MAX_BUCKETS, MIN_ALIGNMENT, PowerOf2, Warmup};
pub use error::Error;
pub use heap::Heap;
pub use platform::Platform;
pub use thread::ThreadCache;
