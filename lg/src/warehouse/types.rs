//! Warehouse job and table types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fully qualified destination table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(project: &str, dataset: &str, table: &str) -> Self {
        Self {
            project_id: project.to_string(),
            dataset_id: dataset.to_string(),
            table_id: table.to_string(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// A job known to the warehouse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub project_id: String,
    pub location: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

impl JobHandle {
    /// `project:location.job_id`, or `project:job_id` without a location
    pub fn qualified_id(&self) -> String {
        match &self.location {
            Some(location) => format!("{}:{}.{}", self.project_id, location, self.job_id),
            None => format!("{}:{}", self.project_id, self.job_id),
        }
    }

    /// Creation time as Unix ms, 0 when the warehouse did not report one
    pub fn created_millis(&self) -> i64 {
        self.created.map(|t| t.timestamp_millis()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    WriteAppend,
    WriteTruncate,
    WriteEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceFormat {
    Avro,
    Parquet,
    NewlineDelimitedJson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaUpdateOption {
    AllowFieldAddition,
    AllowFieldRelaxation,
}

/// Everything needed to ask the warehouse for one load job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJobSpec {
    pub destination: TableRef,
    pub source_uri: String,
    pub source_format: SourceFormat,
    pub use_logical_types: bool,
    pub write_disposition: WriteDisposition,
    pub schema_update_options: Vec<SchemaUpdateOption>,
}

impl LoadJobSpec {
    /// The fixed configuration every submitted load uses: append-only Avro
    /// with logical types, allowing new and relaxed fields.
    pub fn append_avro(destination: TableRef, source_uri: impl Into<String>) -> Self {
        Self {
            destination,
            source_uri: source_uri.into(),
            source_format: SourceFormat::Avro,
            use_logical_types: true,
            write_disposition: WriteDisposition::WriteAppend,
            schema_update_options: vec![
                SchemaUpdateOption::AllowFieldAddition,
                SchemaUpdateOption::AllowFieldRelaxation,
            ],
        }
    }
}
