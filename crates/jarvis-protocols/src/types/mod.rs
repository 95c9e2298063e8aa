//! Common types used across the Jarvis kernel.

mod priority;
mod version;

pub use priority::*;
pub use version::*;

/// Metadata map type.
pub type Metadata = std::collections::HashMap<String, serde_json::Value>;
