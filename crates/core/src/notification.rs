use crate::classify::{ConflictKind, RecoveryAction};
use crate::ids::{MutationId, NotificationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationStatus {
    Pending,
    Success,
    Error,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// A transient banner for the presentation layer. A settlement notification
/// shares its `mutation_id` with the pending one it replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub mutation_id: Option<MutationId>,
    pub status: NotificationStatus,
    pub title: String,
    pub message: String,
    pub conflict: Option<ConflictKind>,
    pub recovery: Option<RecoveryAction>,
}

impl Notification {
    pub fn pending(mutation_id: MutationId, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: NotificationId::new(),
            mutation_id: Some(mutation_id),
            status: NotificationStatus::Pending,
            title: title.into(),
            message: message.into(),
            conflict: None,
            recovery: None,
        }
    }

    pub fn success(mutation_id: MutationId, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: NotificationStatus::Success,
            ..Self::pending(mutation_id, title, message)
        }
    }

    pub fn error(
        mutation_id: Option<MutationId>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            mutation_id,
            status: NotificationStatus::Error,
            title: title.into(),
            message: message.into(),
            conflict: None,
            recovery: None,
        }
    }

    pub fn with_conflict(mut self, conflict: ConflictKind, recovery: RecoveryAction) -> Self {
        self.conflict = Some(conflict);
        self.recovery = Some(recovery);
        self
    }
}

/// Receiver of mutation notifications. Called synchronously from the
/// coordinator with no store borrow held.
pub trait NotificationSink {
    fn notify(&self, notification: &Notification);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_shares_mutation_id_with_pending() {
        let mutation_id = MutationId::new();
        let pending = Notification::pending(mutation_id, "Updating", "...");
        let done = Notification::success(mutation_id, "Updated", "done");
        assert_eq!(pending.mutation_id, done.mutation_id);
        assert_ne!(pending.id, done.id);
        assert_eq!(done.status, NotificationStatus::Success);
    }
}
