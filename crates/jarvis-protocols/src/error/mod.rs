//! Error types for the Jarvis protocol layer.

mod capability;
mod kind;
mod plugin;

pub use capability::*;
pub use kind::*;
pub use plugin::*;
