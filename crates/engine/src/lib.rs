pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod messages;
pub mod overlay;
pub mod store;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use coordinator::{LogSink, MutationCoordinator, MutationOutcome, SkipReason};
pub use error::EngineError;
pub use logging::LogFormat;
pub use overlay::{OverlayEntry, OverlayManager};
pub use store::{EntityStore, SharedStore};
pub use transport::{HttpTransport, Transport};
