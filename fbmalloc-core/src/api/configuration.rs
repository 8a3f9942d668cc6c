//! The configuration of fbmalloc-core.
//!
//! A `Configuration` is the raw description a `Heap` is created from: how many buckets, and how many bytes each of
//! them spans. It is validated once, into `Properties`, from which all derived quantities are computed.
//!
//! A `CacheOptions` is the raw description a `ThreadCache` is created from.

use core::alloc::Layout;

use super::{BucketIndex, Error, MAX_BUCKETS, MIN_ALIGNMENT, PowerOf2, Warmup};

/// Configuration
///
/// The number of buckets, and the number of bytes spanned by each bucket.
///
/// Bucket `i` serves slots of `16 * (i + 1)` bytes, hence the allocation limit is `16 * bucket_count`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Configuration {
    /// Number of buckets, between 1 and `MAX_BUCKETS`.
    pub bucket_count: usize,
    /// Number of bytes spanned by each bucket; rounded up to the maximum alignment.
    pub bucket_size: usize,
}

impl Configuration {
    /// Creates an instance.
    pub const fn new(bucket_count: usize, bucket_size: usize) -> Self { Self { bucket_count, bucket_size } }

    /// Validates the configuration, and computes the derived properties.
    ///
    /// #   Errors
    ///
    /// -   `InvalidBucketCount` if `bucket_count` is 0 or greater than `MAX_BUCKETS`.
    /// -   `InvalidBucketSize` if `bucket_size` is 0, or if the region cannot be described or indexed.
    pub fn properties(&self) -> Result<Properties, Error> {
        if self.bucket_count == 0 || self.bucket_count > MAX_BUCKETS {
            return Err(Error::InvalidBucketCount(self.bucket_count));
        }

        let invalid_size = Error::InvalidBucketSize(self.bucket_size);

        if self.bucket_size == 0 {
            return Err(invalid_size);
        }

        let allocation_limit = MIN_ALIGNMENT.value() * self.bucket_count;
        let max_alignment = PowerOf2::at_least(allocation_limit).ok_or(invalid_size)?;

        let bucket_size = max_alignment.checked_round_up(self.bucket_size).ok_or(invalid_size)?;
        let region_size = bucket_size.checked_mul(self.bucket_count).ok_or(invalid_size)?;

        let region_layout = Layout::from_size_align(region_size, max_alignment.value())
            .map_err(|_| invalid_size)?;

        //  Slots are indexed by u32, with u32::MAX reserved to mark the end of a free-list. The first bucket has the
        //  most slots.
        if bucket_size / MIN_ALIGNMENT >= u32::MAX as usize {
            return Err(invalid_size);
        }

        Ok(Properties { bucket_count: self.bucket_count, bucket_size, allocation_limit, max_alignment, region_layout })
    }
}

/// Properties
///
/// The derived properties of a valid Configuration.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Properties {
    bucket_count: usize,
    bucket_size: usize,
    allocation_limit: usize,
    max_alignment: PowerOf2,
    region_layout: Layout,
}

impl Properties {
    /// Returns the number of buckets.
    pub fn bucket_count(&self) -> usize { self.bucket_count }

    /// Returns the number of bytes spanned by each bucket, a multiple of the maximum alignment.
    pub fn bucket_size(&self) -> usize { self.bucket_size }

    /// Returns the largest size which can be allocated.
    pub fn allocation_limit(&self) -> usize { self.allocation_limit }

    /// Returns the largest alignment which can be requested.
    ///
    /// The region is aligned on this value, and so is the start of each bucket.
    pub fn max_alignment(&self) -> PowerOf2 { self.max_alignment }

    /// Returns the layout of the whole region, all buckets included.
    pub fn region_layout(&self) -> Layout { self.region_layout }

    /// Returns the number of slots of the bucket.
    ///
    /// Assumes the bucket is part of this configuration.
    pub fn capacity(&self, bucket: BucketIndex) -> usize {
        debug_assert!(bucket.value() < self.bucket_count);

        self.bucket_size / bucket.slot_size()
    }

    /// Returns the effective alignment of a request: 0 stands for the natural alignment, and alignments below the
    /// natural alignment are raised to it.
    ///
    /// Returns None if `alignment` is neither 0 nor a power of 2.
    pub fn effective_alignment(alignment: usize) -> Option<PowerOf2> {
        if alignment <= MIN_ALIGNMENT.value() {
            return if alignment == 0 || alignment.is_power_of_two() { Some(MIN_ALIGNMENT) } else { None };
        }

        PowerOf2::new(alignment)
    }

    /// Returns the bucket serving allocations of `size` bytes, aligned on `alignment`.
    ///
    /// #   Errors
    ///
    /// -   `InvalidSize` if `size` is 0, or greater than the allocation limit.
    /// -   `InvalidAlignment` if `alignment` is not a power of 2, or if no bucket of this configuration honours it.
    pub fn bucket_for(&self, size: usize, alignment: usize) -> Result<BucketIndex, Error> {
        if size == 0 || size > self.allocation_limit {
            return Err(Error::InvalidSize { size, limit: self.allocation_limit });
        }

        let invalid_alignment = Error::InvalidAlignment { size, alignment };

        let effective = Self::effective_alignment(alignment).ok_or(invalid_alignment)?;

        if effective > self.max_alignment {
            return Err(invalid_alignment);
        }

        match BucketIndex::from_layout(size, effective) {
            Some(bucket) if bucket.value() < self.bucket_count => Ok(bucket),
            _ => Err(invalid_alignment),
        }
    }
}

/// CacheOptions
///
/// The options of a thread cache.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct CacheOptions {
    /// Maximum number of slots kept in the stock of each bucket.
    pub size: usize,
    /// How much of each stock is filled on creation.
    pub warmup: Warmup,
}

impl CacheOptions {
    /// Creates an instance.
    pub const fn new(size: usize, warmup: Warmup) -> Self { Self { size, warmup } }

    /// Validates the options.
    ///
    /// #   Errors
    ///
    /// -   `InvalidCacheSize` if `size` is 0, or does not fit in 32 bits.
    pub fn validate(&self) -> Result<(), Error> {
        if self.size == 0 || self.size > u32::MAX as usize {
            return Err(Error::InvalidCacheSize(self.size));
        }

        Ok(())
    }

    /// Returns the number of slots exchanged with a bucket in a single refill or flush.
    pub fn batch(&self) -> usize { core::cmp::max(1, self.size / 2) }
}

impl Default for CacheOptions {
    fn default() -> Self { Self { size: 64, warmup: Warmup::Cold } }
}

// mod tests
