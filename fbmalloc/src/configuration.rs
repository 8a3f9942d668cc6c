//! Configuration of an Allocator.

use fbmalloc_core::{self, CacheOptions, Error, Properties};

use crate::Allocator;

/// Configuration
///
/// The shape of the heap, and the options of the thread caches created implicitly on first allocation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Configuration {
    /// Number of buckets, between 1 and 64; the allocation limit is `16 * bucket_count`.
    pub bucket_count: usize,
    /// Number of bytes spanned by each bucket.
    pub bucket_size: usize,
    /// Options of the thread caches created implicitly.
    pub default_cache: CacheOptions,
}

impl Configuration {
    /// Creates an instance, with the default cache options.
    pub fn new(bucket_count: usize, bucket_size: usize) -> Self {
        Self { bucket_count, bucket_size, default_cache: CacheOptions::default() }
    }

    /// Returns the configuration of the heap.
    pub fn heap(&self) -> fbmalloc_core::Configuration {
        fbmalloc_core::Configuration::new(self.bucket_count, self.bucket_size)
    }

    /// Validates the configuration, returning the derived properties of the heap.
    pub fn properties(&self) -> Result<Properties, Error> {
        self.default_cache.validate()?;
        self.heap().properties()
    }
}

impl Default for Configuration {
    //  64 buckets of 1 MB: allocations of up to 1 KB.
    fn default() -> Self { Self::new(64, 1024 * 1024) }
}

/// AllocatorBuilder
///
/// A fluent builder for `Allocator`.
///
/// #   Example
///
/// ```
/// use fbmalloc::{Allocator, CacheOptions, Warmup};
///
/// let allocator = Allocator::builder()
///     .buckets(4)
///     .bucket_size(4096)
///     .default_cache(CacheOptions::new(16, Warmup::Warm))
///     .build()
///     .unwrap();
///
/// assert_eq!(64, allocator.allocation_limit());
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct AllocatorBuilder {
    configuration: Configuration,
}

impl AllocatorBuilder {
    /// Creates an instance, with the default configuration.
    pub fn new() -> Self { Self::default() }

    /// Sets the number of buckets.
    pub fn buckets(mut self, bucket_count: usize) -> Self {
        self.configuration.bucket_count = bucket_count;
        self
    }

    /// Sets the number of bytes spanned by each bucket.
    pub fn bucket_size(mut self, bucket_size: usize) -> Self {
        self.configuration.bucket_size = bucket_size;
        self
    }

    /// Sets the options of the thread caches created implicitly.
    pub fn default_cache(mut self, options: CacheOptions) -> Self {
        self.configuration.default_cache = options;
        self
    }

    /// Returns the configuration built so far.
    pub fn configuration(&self) -> Configuration { self.configuration }

    /// Creates the allocator.
    ///
    /// #   Errors
    ///
    /// See `Allocator::new`.
    pub fn build(self) -> Result<Allocator, Error> { Allocator::new(self.configuration) }
}

#[cfg(test)]
mod tests {

use fbmalloc_core::Warmup;

use super::*;

#[test]
fn configuration_default() {
    let configuration = Configuration::default();

    assert_eq!(64, configuration.bucket_count);
    assert_eq!(CacheOptions::new(64, Warmup::Cold), configuration.default_cache);

    let properties = configuration.properties().unwrap();
    assert_eq!(1024, properties.allocation_limit());
}

#[test]
fn configuration_properties_invalid() {
    assert_eq!(Err(Error::InvalidBucketCount(65)), Configuration::new(65, 4096).properties());

    let mut configuration = Configuration::new(4, 4096);
    configuration.default_cache.size = 0;

    assert_eq!(Err(Error::InvalidCacheSize(0)), configuration.properties());
}

#[test]
fn builder_configuration() {
    let builder = AllocatorBuilder::new()
        .buckets(8)
        .bucket_size(8192)
        .default_cache(CacheOptions::new(32, Warmup::Hot));

    let expected = Configuration { bucket_count: 8, bucket_size: 8192, default_cache: CacheOptions::new(32, Warmup::Hot) };
    assert_eq!(expected, builder.configuration());
}

} // mod tests
