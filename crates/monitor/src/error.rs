//! Monitor errors

use alerting::StateError;
use dispatcher::DispatchError;
use event_fusion::FusionError;
use storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Fusion error: {0}")]
    Fusion(#[from] FusionError),

    #[error("State machine error: {0}")]
    State(#[from] StateError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Invalid monitor config: {0}")]
    Config(String),
}
