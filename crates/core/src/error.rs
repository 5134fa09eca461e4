use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid mutation transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
}
