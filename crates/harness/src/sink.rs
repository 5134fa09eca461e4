use std::cell::RefCell;

use shopdesk_core::{ConflictKind, Notification, NotificationSink, NotificationStatus};

/// Keeps every notification so tests can assert on what the user saw.
#[derive(Debug, Default)]
pub struct RecordingSink {
    seen: RefCell<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.seen.borrow().clone()
    }

    pub fn last(&self) -> Option<Notification> {
        self.seen.borrow().last().cloned()
    }

    pub fn statuses(&self) -> Vec<NotificationStatus> {
        self.seen.borrow().iter().map(|n| n.status).collect()
    }

    pub fn errors(&self) -> Vec<Notification> {
        self.seen
            .borrow()
            .iter()
            .filter(|n| n.status == NotificationStatus::Error)
            .cloned()
            .collect()
    }

    pub fn conflicts(&self) -> Vec<ConflictKind> {
        self.seen.borrow().iter().filter_map(|n| n.conflict).collect()
    }

    pub fn clear(&self) {
        self.seen.borrow_mut().clear();
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: &Notification) {
        self.seen.borrow_mut().push(notification.clone());
    }
}
