//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT listener for raw count events
//! - `journal` - durable JSONL log of raw readings
//! - `http` - read API (current status, health, metrics)

pub mod http;
pub mod journal;
pub mod mqtt;

// Re-export commonly used types
pub use http::{start_api_server, ApiContext};
pub use journal::Journal;
pub use mqtt::start_count_listener;
