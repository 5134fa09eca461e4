use shopdesk_core::{CoreError, TransportError};
use shopdesk_storage::StorageError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("mutation already in flight: {0}")]
    MutationInFlight(String),

    #[error("no overlay for {0}")]
    NoOverlay(String),
}
