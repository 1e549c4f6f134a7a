//! Request routing
//!
//! Every inbound message ends up on exactly one of three channels:
//! submitted, retry (back through the transport for another cycle), or
//! dead-letter (retry cycles used up, or the payload is unreadable).

mod engine;
mod route;
mod tracker;

pub use engine::{RequestRouter, RouteStage};
pub use route::{Channel, OutputReceivers, Outputs, Route};
pub use tracker::{Eligibility, RetryCycleTracker};
