use serde::{Deserialize, Serialize};

use crate::wire::TransportError;

/// Why a mutation failed, from the point of view of recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Someone else modified the entity; our version token is stale.
    StaleVersion,
    /// The entity was deleted concurrently.
    NotFound,
    /// Anything else: server error, network failure, validation.
    Generic,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaleVersion => "stale_version",
            Self::NotFound => "not_found",
            Self::Generic => "generic",
        }
    }
}

/// What the presentation layer should do after a failed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryAction {
    /// Pull the authoritative list again.
    RefetchList,
    /// Close any open edit dialog for the entity.
    CloseEditContext { refetch: bool },
    /// Keep the reverted value; the user may try again later.
    OfferRetry,
}

impl RecoveryAction {
    pub fn refetches(&self) -> bool {
        match self {
            Self::RefetchList => true,
            Self::CloseEditContext { refetch } => *refetch,
            Self::OfferRetry => false,
        }
    }
}

/// Classify a failure from its HTTP status and message.
pub fn classify(status: Option<u16>, message: Option<&str>) -> ConflictKind {
    let mentions_version = message.is_some_and(|m| m.to_lowercase().contains("version"));
    match status {
        Some(409) => ConflictKind::StaleVersion,
        _ if mentions_version => ConflictKind::StaleVersion,
        Some(404) => ConflictKind::NotFound,
        _ => ConflictKind::Generic,
    }
}

/// Only text the server sent is inspected for "version".
pub fn classify_error(error: &TransportError) -> ConflictKind {
    classify(error.status(), error.message())
}

/// Recovery for a classified failure. `refetch_on_not_found` controls
/// whether a deleted entity also triggers a list refresh.
pub fn recovery_for(kind: ConflictKind, refetch_on_not_found: bool) -> RecoveryAction {
    match kind {
        ConflictKind::StaleVersion => RecoveryAction::RefetchList,
        ConflictKind::NotFound => RecoveryAction::CloseEditContext {
            refetch: refetch_on_not_found,
        },
        ConflictKind::Generic => RecoveryAction::OfferRetry,
    }
}
