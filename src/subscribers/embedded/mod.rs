//! # Built-in subscribers
//!
//! Small, self-contained implementations useful for demos.
//!
//! - [`LogWriter`]: traces every routed message (demo/debug).

mod log;

pub use log::LogWriter;
