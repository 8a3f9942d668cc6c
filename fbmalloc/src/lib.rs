#![deny(missing_docs)]

//! A fixed-bucket, thread-caching memory allocator library.
//!
//! The type `Allocator` serves allocations of up to `16 * bucket_count` bytes from a single region reserved upfront,
//! split in up to 64 buckets of equally sized slots. Each thread allocates from a private cache of slots, refilled
//! from and flushed to the shared buckets in batches.
//!
//! #   Warning
//!
//! This allocator is not suitable for all applications: requests larger than the allocation limit are rejected, and
//! so are requests for which the bucket has run dry. There is no fallback.

mod allocator;
mod configuration;
mod platform;
mod registry;

pub use allocator::Allocator;
pub use configuration::{AllocatorBuilder, Configuration};
pub use fbmalloc_core::{BucketIndex, CacheOptions, CacheStatistics, Error, Properties, Warmup};

use platform::SystemPlatform;
