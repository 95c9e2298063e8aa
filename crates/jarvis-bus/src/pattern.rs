//! Channel pattern matching.
//!
//! Channels are dot-delimited (`plugin.load`). A pattern is either an exact
//! channel name, a prefix ending in a `*` segment (`plugin.*`), or a bare
//! `*` matching everything. The trailing `*` is the only wildcard.

use std::fmt;

use crate::error::BusError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPattern {
    /// Matches every channel.
    All,
    /// Matches one channel.
    Exact(String),
    /// Matches channels under a prefix. Stored with its trailing dot.
    Prefix(String),
}

impl ChannelPattern {
    /// Parse and validate a subscription pattern.
    pub fn parse(pattern: &str) -> Result<Self, BusError> {
        let invalid = |reason: &str| BusError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.is_empty() {
            return Err(invalid("pattern is empty"));
        }
        if pattern == "*" {
            return Ok(ChannelPattern::All);
        }

        let segments: Vec<&str> = pattern.split('.').collect();
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }
            if segment.contains('*') && (i != last || *segment != "*") {
                return Err(invalid("'*' is only allowed as the final segment"));
            }
        }

        match pattern.strip_suffix('*') {
            Some(prefix) => Ok(ChannelPattern::Prefix(prefix.to_string())),
            None => Ok(ChannelPattern::Exact(pattern.to_string())),
        }
    }

    pub fn matches(&self, channel: &str) -> bool {
        match self {
            ChannelPattern::All => true,
            ChannelPattern::Exact(name) => name == channel,
            ChannelPattern::Prefix(prefix) => channel.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for ChannelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelPattern::All => f.write_str("*"),
            ChannelPattern::Exact(name) => f.write_str(name),
            ChannelPattern::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}

/// Validate a channel name used for publishing.
pub(crate) fn validate_channel(channel: &str) -> Result<(), BusError> {
    let invalid = |reason: &str| BusError::InvalidChannel {
        channel: channel.to_string(),
        reason: reason.to_string(),
    };
    if channel.is_empty() {
        return Err(invalid("channel is empty"));
    }
    if channel.contains('*') {
        return Err(invalid("wildcards are not allowed in published channels"));
    }
    if channel.split('.').any(str::is_empty) {
        return Err(invalid("empty segment"));
    }
    Ok(())
}
