//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::{Config, QuotaConfig};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Convert into an error when any validation error was recorded.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        if self.is_valid() {
            return Ok(self.warnings);
        }
        let summary = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(ConfigError::Validation {
            count: self.errors.len(),
            summary,
        })
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_kernel(config, &mut result);
        Self::validate_bus(config, &mut result);
        Self::validate_resources(config, &mut result);
        Self::validate_pool(config, &mut result);
        Self::validate_plugins(config, &mut result);
        Self::validate_queue(config, &mut result);

        Ok(result)
    }

    fn validate_kernel(config: &Config, result: &mut ValidationResult) {
        let version = &config.kernel.engine_version;
        let valid = version
            .split_once('.')
            .is_some_and(|(major, minor)| major.parse::<u32>().is_ok() && minor.parse::<u32>().is_ok());
        if !valid {
            result.add_error(ValidationError::new(
                "kernel.engine_version",
                format!("'{}' is not of the form major.minor", version),
            ));
        }

        if config.kernel.shutdown_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "kernel.shutdown_timeout_ms",
                "shutdown_timeout_ms must be greater than 0",
            ));
        }
    }

    fn validate_bus(config: &Config, result: &mut ValidationResult) {
        if config.bus.history_limit == 0 {
            result.add_warning(ValidationWarning::new(
                "bus.history_limit",
                "history_limit is 0, event history is disabled",
            ));
        }

        if config.bus.request_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "bus.request_timeout_ms",
                "request_timeout_ms must be greater than 0",
            ));
        }
    }

    fn validate_resources(config: &Config, result: &mut ValidationResult) {
        let r = &config.resources;

        if r.window_secs == 0 {
            result.add_error(ValidationError::new(
                "resources.window_secs",
                "window_secs must be greater than 0",
            ));
        }

        let in_range = |v: f64| v > 0.0 && v <= 1.0;
        if !in_range(r.memory_warning_ratio) {
            result.add_error(ValidationError::new(
                "resources.memory_warning_ratio",
                "memory_warning_ratio must be in (0, 1]",
            ));
        }
        if !in_range(r.memory_critical_ratio) {
            result.add_error(ValidationError::new(
                "resources.memory_critical_ratio",
                "memory_critical_ratio must be in (0, 1]",
            ));
        }
        if r.memory_warning_ratio >= r.memory_critical_ratio {
            result.add_warning(ValidationWarning::new(
                "resources.memory_warning_ratio",
                "warning threshold is not below the critical threshold",
            ));
        }

        Self::validate_quota("resources.default_quota", &r.default_quota, result);
    }

    fn validate_quota(path: &str, quota: &QuotaConfig, result: &mut ValidationResult) {
        let fields = [
            ("max_memory_mb", quota.max_memory_mb),
            ("max_cpu_percent", quota.max_cpu_percent as u64),
            ("max_concurrent_tasks", quota.max_concurrent_tasks as u64),
            ("max_requests_per_minute", quota.max_requests_per_minute as u64),
        ];
        for (name, value) in fields {
            if value == 0 {
                result.add_error(ValidationError::new(
                    format!("{}.{}", path, name),
                    format!("{} must be greater than 0", name),
                ));
            }
        }

        if quota.max_cpu_percent > 100 {
            result.add_error(ValidationError::new(
                format!("{}.max_cpu_percent", path),
                "max_cpu_percent cannot exceed 100",
            ));
        }
    }

    fn validate_pool(config: &Config, result: &mut ValidationResult) {
        let pool = &config.pool;

        if pool.max_workers == 0 {
            result.add_error(ValidationError::new(
                "pool.max_workers",
                "max_workers must be greater than 0",
            ));
        }

        if pool.min_workers > pool.max_workers {
            result.add_error(ValidationError::new(
                "pool.min_workers",
                "min_workers cannot exceed max_workers",
            ));
        }

        if pool.default_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "pool.default_timeout_ms",
                "default_timeout_ms must be greater than 0",
            ));
        }

        if pool.max_workers > 64 {
            result.add_warning(ValidationWarning::new(
                "pool.max_workers",
                "max_workers is very high (>64), each worker is an OS thread",
            ));
        }
    }

    fn validate_plugins(config: &Config, result: &mut ValidationResult) {
        if config.plugins.hook_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "plugins.hook_timeout_ms",
                "hook_timeout_ms must be greater than 0",
            ));
        }

        if config.plugins.capability_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "plugins.capability_timeout_ms",
                "capability_timeout_ms must be greater than 0",
            ));
        }
    }

    fn validate_queue(config: &Config, result: &mut ValidationResult) {
        let q = &config.queue;

        if q.max_concurrency == 0 {
            result.add_error(ValidationError::new(
                "queue.max_concurrency",
                "max_concurrency must be greater than 0",
            ));
        }

        if q.dispatch_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "queue.dispatch_interval_ms",
                "dispatch_interval_ms must be greater than 0",
            ));
        }

        if q.multiplier < 1.0 {
            result.add_error(ValidationError::new(
                "queue.multiplier",
                "multiplier must be at least 1.0",
            ));
        }

        if q.base_delay_ms > q.max_delay_ms {
            result.add_error(ValidationError::new(
                "queue.base_delay_ms",
                "base_delay_ms cannot exceed max_delay_ms",
            ));
        }

        if !(0.0..1.0).contains(&q.jitter) {
            result.add_error(ValidationError::new(
                "queue.jitter",
                "jitter must be in [0, 1)",
            ));
        }

        if q.default_max_retries == 0 {
            result.add_warning(ValidationWarning::new(
                "queue.default_max_retries",
                "default_max_retries is 0, failed operations are never retried",
            ));
        }

        if !q.persistent {
            result.add_warning(ValidationWarning::new(
                "queue.persistent",
                "queue is memory-backed, queued operations are lost on restart",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
