//! Message pipeline
//!
//! Stands in for the message transport: reads inbound records as JSON lines,
//! runs one worker per message through the router, and writes each of the
//! three output channels to its own JSON-lines file.

mod runner;
mod sink;
mod source;

pub use runner::{Pipeline, PipelineSummary, process_files};
pub use sink::{DEAD_LETTER_FILE, RETRY_FILE, SUBMITTED_FILE, write_dead_letters, write_messages};
pub use source::{open_input, read_messages};
