//! Error classification shared by every kernel component.

use serde::{Deserialize, Serialize};

/// Coarse classification of kernel errors.
///
/// Each component error type maps its variants onto one of these kinds so
/// callers can branch on the failure class without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input rejected before any side effect.
    Validation,
    /// Ungranted capability call.
    Permission,
    /// Quota or rate limit exceeded; retry later.
    Admission,
    /// Hook, task or request exceeded its time bound.
    Timeout,
    /// Task or plugin code failed.
    Execution,
    /// Connectivity failure.
    Network,
    /// Referenced entity does not exist.
    NotFound,
    /// Operation not permitted in the current state.
    State,
    /// Component shut down or otherwise unavailable.
    Unavailable,
}

impl ErrorKind {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Admission | ErrorKind::Timeout | ErrorKind::Network
        )
    }
}
