#![deny(missing_docs)]

//! Test helpers for fbmalloc.
//!
//! This crate is not intended for external use; it is only published so that it can be used as a dev-dependency.

mod lockstep;

pub use lockstep::{Lockstep, LockstepBuilder};
