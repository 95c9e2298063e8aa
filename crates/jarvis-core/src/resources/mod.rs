//! Resource manager: per-tenant quotas, usage tracking and admission control.

mod manager;
mod quota;

pub use manager::{RESOURCE_WARNING_CHANNEL, ResourceManager, TaskPermit};
pub use quota::{Admission, AdmissionDenial, ResourceQuota, ResourceStats, TenantUsage};
