//! Streaming response pipeline: wire events and the per-request coordinator.

pub mod coordinator;
pub mod event;

pub use coordinator::{EventStream, StreamCoordinator, StreamState};
pub use event::StreamEvent;
