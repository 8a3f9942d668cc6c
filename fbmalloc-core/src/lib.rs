#![cfg_attr(not(test), no_std)]

#![deny(missing_docs)]

//! Building blocks for a fixed-bucket, thread-caching allocator.
//!
//! fbmalloc-core carves a single pre-reserved region into up to 64 buckets of equally sized slots, and serves
//! allocations from them through thread caches. It contains:
//!
//! -   A platform trait, used to reserve the region (and the bookkeeping memory) from the OS, or anywhere else.
//! -   The `Heap`, owning the buckets and their lock-free global free-lists.
//! -   The `ThreadCache`, a single-threaded front-end keeping a private stock of slots per bucket.
//!
//! Arranging for each thread to find its `ThreadCache` is left to the user.

mod api;
mod internals;
mod utils;

pub use api::*;
