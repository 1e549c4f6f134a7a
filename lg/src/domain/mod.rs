//! Domain types for loadgate
//!
//! Load requests as produced upstream, the envelopes emitted once a job is
//! submitted, and the transport-neutral message record they travel in.

mod message;
mod request;

pub use message::{Message, UNIQUE_MESSAGE_ID};
pub use request::{LoadRequest, LoadRequestAttributes, LoadRequestPayload, LoaderEnvelope, LoaderEnvelopeAttributes};
