pub mod backend;
pub mod client;
pub mod gate;
pub mod sink;

pub use backend::FakeBackend;
pub use client::{order, product, status_fields, user, Gated, TestClient};
pub use gate::GatedTransport;
pub use sink::RecordingSink;
