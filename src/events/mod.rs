//! Event publication
//!
//! Republishes engine notifications as named attribute change events
//! that the outside world can consume.

mod publisher;

pub use publisher::{DeviceEvent, EventPublisher};
