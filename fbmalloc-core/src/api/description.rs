//! Description of the buckets, and of the allocations they serve.

pub use crate::utils::PowerOf2;

/// The natural alignment of every slot, and the step between two consecutive slot sizes.
//  Safety:
//  -   16 is a power of 2.
pub const MIN_ALIGNMENT: PowerOf2 = unsafe { PowerOf2::new_unchecked(16) };

/// The maximum number of buckets a `Heap` may contain.
pub const MAX_BUCKETS: usize = 64;

/// BucketIndex
///
/// The index of a bucket; guaranteed to be less than `MAX_BUCKETS`.
///
/// Slot sizes grow linearly: bucket `i` serves slots of `16 * (i + 1)` bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BucketIndex(u8);

impl BucketIndex {
    /// Creates a new instance, if `value` is less than `MAX_BUCKETS`.
    pub const fn new(value: usize) -> Option<Self> {
        if value < MAX_BUCKETS { Some(Self(value as u8)) } else { None }
    }

    /// Returns the smallest bucket whose slots hold `size` bytes aligned on `alignment`.
    ///
    /// Alignments stronger than `MIN_ALIGNMENT` escalate to the first bucket whose slot size is a multiple of the
    /// alignment, as such slots are all aligned on it.
    ///
    /// Returns None if `size` is 0, or if no bucket of a maximal heap would fit.
    pub fn from_layout(size: usize, alignment: PowerOf2) -> Option<Self> {
        if size == 0 {
            return None;
        }

        //  Number of 16 bytes granules, computed without overflow.
        let granules = (size - 1) / MIN_ALIGNMENT + 1;

        //  Slot sizes must be a multiple of this number of granules.
        let step = alignment.value() / MIN_ALIGNMENT;

        if granules > MAX_BUCKETS || step > MAX_BUCKETS {
            return None;
        }

        let granules = match PowerOf2::new(step) {
            Some(step) => step.round_up(granules),
            None => granules,
        };

        Self::new(granules - 1)
    }

    /// Returns the underlying value.
    pub const fn value(&self) -> usize { self.0 as usize }

    /// Returns the size of the slots of this bucket.
    pub const fn slot_size(&self) -> usize { MIN_ALIGNMENT.value() * (self.0 as usize + 1) }

    /// Returns the alignment guaranteed for the slots of this bucket.
    ///
    /// This is the largest power of 2 dividing the slot size, assuming a suitably aligned region.
    pub const fn slot_alignment(&self) -> PowerOf2 {
        let size = self.slot_size();

        //  Safety:
        //  -   `size` is not 0, hence isolating its lowest bit yields a power of 2.
        unsafe { PowerOf2::new_unchecked(size & size.wrapping_neg()) }
    }
}

/// Warmup
///
/// How much of a thread cache stock is filled when it is created.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Warmup {
    /// The stock starts empty; the first allocation in each bucket pays for the refill.
    Cold = 0,
    /// The stock is filled to half its capacity.
    Warm = 1,
    /// The stock is filled to its full capacity.
    Hot = 2,
}

impl Warmup {
    /// Converts from the raw value used across FFI boundaries.
    pub const fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(Warmup::Cold),
            1 => Some(Warmup::Warm),
            2 => Some(Warmup::Hot),
            _ => None,
        }
    }

    /// Returns the number of slots to pre-fill a stock of `capacity` with.
    pub const fn target(&self, capacity: usize) -> usize {
        match self {
            Warmup::Cold => 0,
            Warmup::Warm => capacity / 2,
            Warmup::Hot => capacity,
        }
    }
}

impl Default for Warmup {
    fn default() -> Self { Warmup::Cold }
}

/// CacheStatistics
///
/// Counters maintained by a thread cache, over its lifetime.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Hash)]
pub struct CacheStatistics {
    /// Allocations served from the private stock, without touching the bucket.
    pub hits: u64,
    /// Batches acquired from a bucket to refill an empty stock.
    pub refills: u64,
    /// Batches released to a bucket to make room in a full stock.
    pub flushes: u64,
    /// Allocations which failed as both the stock and the bucket were empty.
    pub exhausted: u64,
}

// mod tests
