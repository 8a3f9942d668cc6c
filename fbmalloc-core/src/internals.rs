//! The internals of fbmalloc-core.
//!
//! The internals provide all the heavy-lifting.

pub mod bucket;
pub mod free_list;
pub mod live_map;
pub mod slots;
pub mod stock;
pub mod thread_local;

#[cfg(test)]
pub mod test;
