//! Built-in job catalogue.
//!
//! Jobs are plain functions of their payload. They run inside worker
//! threads, so they may block.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::time::Duration;

use crate::error::PoolError;

/// Largest `n` whose Fibonacci number fits in a `u64`.
pub const MAX_FIBONACCI: u32 = 93;

/// Longest `sleep` a job may request.
pub const MAX_SLEEP_MS: u64 = 60_000;

/// Typed job with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Job {
    /// Sort numbers or strings ascending.
    Sort(Vec<Value>),
    /// Cosine similarity of two vectors.
    Similarity { a: Vec<f64>, b: Vec<f64> },
    /// Lowercase word tokens.
    Tokenize { text: String },
    Fibonacci { n: u32 },
    /// Block the worker for `ms` milliseconds.
    Sleep { ms: u64 },
    /// Always fails with `message`.
    Fail { message: String },
}

/// Result of a typed job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutput {
    Sorted(Vec<Value>),
    Similarity(f64),
    Tokens(Vec<String>),
    Fibonacci(u64),
    Slept(u64),
}

impl Job {
    pub const KINDS: [&'static str; 6] = ["sort", "similarity", "tokenize", "fibonacci", "sleep", "fail"];

    pub fn kind(&self) -> &'static str {
        match self {
            Job::Sort(_) => "sort",
            Job::Similarity { .. } => "similarity",
            Job::Tokenize { .. } => "tokenize",
            Job::Fibonacci { .. } => "fibonacci",
            Job::Sleep { .. } => "sleep",
            Job::Fail { .. } => "fail",
        }
    }

    /// Payload as routed through the pool.
    pub fn payload(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("payload").map(Value::take))
            .unwrap_or(Value::Null)
    }

    /// Decode an untyped `(kind, payload)` pair.
    pub fn decode(kind: &str, payload: &Value) -> Result<Self, PoolError> {
        if !Self::KINDS.contains(&kind) {
            return Err(PoolError::UnknownJob(kind.to_string()));
        }
        let job: Job = serde_json::from_value(json!({ "kind": kind, "payload": payload }))
            .map_err(|e| PoolError::invalid_payload(kind, e.to_string()))?;
        if let Job::Sleep { ms } = job {
            if ms > MAX_SLEEP_MS {
                return Err(PoolError::invalid_payload(
                    kind,
                    format!("ms must be at most {}, got {}", MAX_SLEEP_MS, ms),
                ));
            }
        }
        Ok(job)
    }

    /// Run the job on the current thread.
    pub fn run(self) -> Result<JobOutput, PoolError> {
        match self {
            Job::Sort(values) => sort_values(values).map(JobOutput::Sorted),
            Job::Similarity { a, b } => cosine_similarity(&a, &b).map(JobOutput::Similarity),
            Job::Tokenize { text } => Ok(JobOutput::Tokens(tokenize(&text))),
            Job::Fibonacci { n } => fibonacci(n).map(JobOutput::Fibonacci),
            Job::Sleep { ms } => {
                std::thread::sleep(Duration::from_millis(ms));
                Ok(JobOutput::Slept(ms))
            }
            Job::Fail { message } => Err(PoolError::Execution(message)),
        }
    }
}

impl JobOutput {
    pub fn to_value(&self) -> Value {
        match self {
            JobOutput::Sorted(values) => Value::Array(values.clone()),
            JobOutput::Similarity(score) => json!(score),
            JobOutput::Tokens(tokens) => json!(tokens),
            JobOutput::Fibonacci(n) => json!(n),
            JobOutput::Slept(ms) => json!(ms),
        }
    }

    /// Decode the value a worker returned for a job of `kind`.
    pub fn from_value(kind: &str, value: Value) -> Result<Self, PoolError> {
        let bad = |what: &str| PoolError::Execution(format!("{} job returned {}", kind, what));
        match kind {
            "sort" => match value {
                Value::Array(values) => Ok(JobOutput::Sorted(values)),
                _ => Err(bad("a non-array")),
            },
            "similarity" => value
                .as_f64()
                .map(JobOutput::Similarity)
                .ok_or_else(|| bad("a non-number")),
            "tokenize" => serde_json::from_value(value)
                .map(JobOutput::Tokens)
                .map_err(|_| bad("non-string tokens")),
            "fibonacci" => value
                .as_u64()
                .map(JobOutput::Fibonacci)
                .ok_or_else(|| bad("a non-integer")),
            "sleep" => value
                .as_u64()
                .map(JobOutput::Slept)
                .ok_or_else(|| bad("a non-integer")),
            other => Err(PoolError::UnknownJob(other.to_string())),
        }
    }
}

fn sort_values(mut values: Vec<Value>) -> Result<Vec<Value>, PoolError> {
    if values.iter().all(Value::is_number) {
        values.sort_by(|a, b| {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        });
        Ok(values)
    } else if values.iter().all(Value::is_string) {
        values.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        Ok(values)
    } else {
        Err(PoolError::invalid_payload(
            "sort",
            "expected an array of numbers or an array of strings",
        ))
    }
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64, PoolError> {
    if a.len() != b.len() {
        return Err(PoolError::invalid_payload(
            "similarity",
            format!("vector lengths differ ({} vs {})", a.len(), b.len()),
        ));
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a * norm_b))
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn fibonacci(n: u32) -> Result<u64, PoolError> {
    if n > MAX_FIBONACCI {
        return Err(PoolError::invalid_payload(
            "fibonacci",
            format!("n must be at most {}", MAX_FIBONACCI),
        ));
    }
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        let next = a + b;
        a = b;
        b = next;
    }
    Ok(a)
}
