pub mod classify;
pub mod endpoints;
pub mod entity;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod intent;
pub mod mutation;
pub mod notification;
pub mod wire;

pub use classify::{classify, classify_error, recovery_for, ConflictKind, RecoveryAction};
pub use entity::{Entity, EntityPatch, Fields, OrderStatus, UserRole};
pub use error::CoreError;
pub use field_value::FieldValue;
pub use ids::*;
pub use intent::MutationIntent;
pub use notification::{Notification, NotificationSink, NotificationStatus};
pub use wire::{Method, Request, Response, TransportError};
