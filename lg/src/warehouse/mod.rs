//! Warehouse backend client
//!
//! The admission controller needs exactly two things from the warehouse:
//! the list of jobs currently running, and a way to start one more load job.

mod bigquery;
pub mod client;
mod error;
mod types;

pub use bigquery::BigQueryClient;
pub use client::WarehouseClient;
pub use error::WarehouseError;
pub use types::{JobHandle, LoadJobSpec, SchemaUpdateOption, SourceFormat, TableRef, WriteDisposition};
