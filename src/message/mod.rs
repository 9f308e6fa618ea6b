//! Kernel message model.
//!
//! ## Contents
//! - [`Channel`] the five logical channels
//! - [`Envelope`], [`Header`] deframed message (structured header/parent/metadata, opaque content)
//! - [`Session`] builds messages the bridge originates
//! - [`Request`] operation → channel-role table for outbound traffic

mod channel;
mod envelope;
mod request;
mod session;

pub use channel::Channel;
pub use envelope::{Envelope, Header, UNIT_OF_WORK_KEY};
pub use request::Request;
pub use session::{Session, PROTOCOL_VERSION};
