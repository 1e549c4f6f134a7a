//! Load requests and submitted-job envelopes
//!
//! Field names follow the JSON the upstream producer already emits, so
//! requests survive a round trip through the retry channel untouched apart
//! from the attempt counter. Unknown fields are carried along in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::warehouse::{JobHandle, TableRef};

/// One unit of work: load the files under a source prefix into a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    pub load_request_payload: LoadRequestPayload,

    #[serde(default)]
    pub load_request_attributes: LoadRequestAttributes,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where the data lives and where it goes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequestPayload {
    /// Source data location (URI, may contain a wildcard)
    pub bundle_prefix_path: String,

    /// Destination dataset
    pub bundle_dataset: String,

    /// Destination table
    pub bundle_table: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Retry bookkeeping carried inside the request itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequestAttributes {
    /// Number of external retry cycles consumed so far; absent means 0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_job_submission_attempts: Option<u32>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LoadRequest {
    /// Create a fresh request that has never been attempted
    pub fn new(
        source_uri: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            load_request_payload: LoadRequestPayload {
                bundle_prefix_path: source_uri.into(),
                bundle_dataset: dataset.into(),
                bundle_table: table.into(),
                extra: Map::new(),
            },
            load_request_attributes: LoadRequestAttributes::default(),
            extra: Map::new(),
        }
    }

    /// Parse a request from a message payload
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        debug!(len = data.len(), "LoadRequest::from_json: called");
        serde_json::from_str(data)
    }

    /// Serialize for re-queue or dead-lettering
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Submission attempts so far, defaulting to 0 when unset
    pub fn submission_attempts(&self) -> u32 {
        self.load_request_attributes.load_job_submission_attempts.unwrap_or(0)
    }

    /// Builder-style setter for the attempt counter
    pub fn with_submission_attempts(mut self, attempts: u32) -> Self {
        self.load_request_attributes.load_job_submission_attempts = Some(attempts);
        self
    }

    /// Source data location
    pub fn source_uri(&self) -> &str {
        &self.load_request_payload.bundle_prefix_path
    }

    /// Destination table within the given project
    pub fn destination(&self, project: &str) -> TableRef {
        TableRef::new(
            project,
            &self.load_request_payload.bundle_dataset,
            &self.load_request_payload.bundle_table,
        )
    }
}

/// Emitted on the submitted channel: the request plus the job it became
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderEnvelope {
    pub load_request: LoadRequest,
    pub loader_envelope_attributes: LoaderEnvelopeAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderEnvelopeAttributes {
    pub job_id: String,

    /// Job creation time, Unix ms
    pub job_created_timestamp: i64,
}

impl LoaderEnvelope {
    /// Wrap a request with the handle of the job submitted for it
    pub fn new(load_request: LoadRequest, job: &JobHandle) -> Self {
        debug!(job_id = %job.job_id, "LoaderEnvelope::new: called");
        Self {
            load_request,
            loader_envelope_attributes: LoaderEnvelopeAttributes {
                job_id: job.qualified_id(),
                job_created_timestamp: job.created_millis(),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
