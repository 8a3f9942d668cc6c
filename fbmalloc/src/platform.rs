//! Abstraction over OS differences.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub(crate) use unix::SystemPlatform;

#[cfg(not(unix))]
mod fallback;

#[cfg(not(unix))]
pub(crate) use fallback::SystemPlatform;
