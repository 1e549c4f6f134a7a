//! WarehouseClient trait definition

use async_trait::async_trait;

use super::{JobHandle, LoadJobSpec, WarehouseError};

/// The two warehouse operations the admission controller depends on
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// List every job in the running state, across all submitting identities
    ///
    /// Implementations must drain all pages before returning; a partial
    /// listing is an error, never a smaller result.
    async fn list_running_jobs(&self) -> Result<Vec<JobHandle>, WarehouseError>;

    /// Start one load job
    async fn create_load_job(&self, spec: &LoadJobSpec) -> Result<JobHandle, WarehouseError>;
}
