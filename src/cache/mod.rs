//! Request correlation.
//!
//! [`CorrelationCache`] remembers which channel each in-flight request came from so
//! that broadcast status messages can be reclassified by their parent id. It is the
//! only place where request ids are retained; it is cleared when the kernel restarts.

mod correlation;
mod entry;

pub use correlation::{CacheKey, CorrelationCache};
pub use entry::{CacheEntry, Direction};
