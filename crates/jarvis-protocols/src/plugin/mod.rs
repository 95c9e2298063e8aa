//! Plugin protocol definitions.
//!
//! Plugins implement a fixed lifecycle contract and only ever see the
//! capability-scoped [`PluginContext`] handed to them at initialization.

mod context;
mod manifest;
mod permission;
mod state;
mod traits;

pub use context::*;
pub use manifest::*;
pub use permission::*;
pub use state::*;
pub use traits::*;
