use fleet_core::CoreError;
use fleet_eisenbahn::EisenbahnError;
use fleet_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("scheduler config error: {0}")]
    Config(String),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("messaging error: {0}")]
    Eisenbahn(#[from] EisenbahnError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("job record error: {0}")]
    Record(#[from] serde_json::Error),
}
