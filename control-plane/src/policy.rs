//! Policy wire format and schema validation.
//!
//! This mirrors the canonical JSON shape the sidecar compiles
//! (`metadata.name` + `spec.selector` + `spec.rules[]`), but the control
//! plane never compiles regexes into live matchers - it only validates that
//! they compile, then stores and re-serializes the policy as-is. Compilation
//! into a runtime matcher is the sidecar's job.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Policy {
    pub metadata: PolicyMetadata,
    pub spec: PolicySpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyMetadata {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicySpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<ServiceSelector>,
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSelector {
    #[serde(default = "wildcard")]
    pub service: String,
    #[serde(default = "wildcard")]
    pub namespace: String,
}

fn wildcard() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleSpec {
    #[serde(rename = "match", default)]
    pub match_condition: MatchCondition,
    pub fault: Fault,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchCondition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<HeaderMatcher>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StringMatcher {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderMatcher {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fault {
    #[serde(default = "full_percentage")]
    pub percentage: u32,
    #[serde(default)]
    pub start_delay_ms: u64,
    #[serde(default)]
    pub duration_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort: Option<AbortAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<DelayAction>,
}

fn full_percentage() -> u32 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbortAction {
    pub http_status: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelayAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_delay_ms: Option<u64>,
    // Legacy alias, accepted on input but never re-emitted once normalized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_delay: Option<String>,
}

#[derive(Debug)]
pub enum ValidationError {
    EmptyName,
    PercentageOutOfRange(u32),
    HttpStatusOutOfRange(u32),
    NoFaultAction,
    BadRegex { field: String, source: regex::Error },
    UnresolvableDelay,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyName => write!(f, "metadata.name must not be empty"),
            ValidationError::PercentageOutOfRange(p) => {
                write!(f, "fault.percentage {} is out of range 0-100", p)
            }
            ValidationError::HttpStatusOutOfRange(s) => {
                write!(f, "abort.http_status {} is out of range 400-599", s)
            }
            ValidationError::NoFaultAction => {
                write!(f, "fault must specify at least one of abort or delay")
            }
            ValidationError::BadRegex { field, source } => {
                write!(f, "{} does not compile as a regex: {}", field, source)
            }
            ValidationError::UnresolvableDelay => {
                write!(f, "delay has neither fixed_delay_ms nor a parseable legacy fixed_delay")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl Policy {
    /// Structural validation at the control-plane boundary: schema ranges and
    /// regex compilability. This is intentionally stricter than the
    /// sidecar's per-rule compiler, which drops bad rules silently - here a
    /// bad rule fails the whole write with a 400.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.metadata.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        for rule in &self.spec.rules {
            rule.validate()?;
        }
        Ok(())
    }
}

impl RuleSpec {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.fault.percentage > 100 {
            return Err(ValidationError::PercentageOutOfRange(self.fault.percentage));
        }
        if self.fault.abort.is_none() && self.fault.delay.is_none() {
            return Err(ValidationError::NoFaultAction);
        }
        if let Some(abort) = &self.fault.abort {
            if !(400..=599).contains(&abort.http_status) {
                return Err(ValidationError::HttpStatusOutOfRange(abort.http_status));
            }
        }
        if let Some(delay) = &self.fault.delay {
            if delay.fixed_delay_ms.is_none() && delay.fixed_delay.is_none() {
                return Err(ValidationError::UnresolvableDelay);
            }
            if let Some(legacy) = &delay.fixed_delay {
                if parse_legacy_delay(legacy).is_none() {
                    return Err(ValidationError::UnresolvableDelay);
                }
            }
        }
        self.match_condition.validate()?;
        Ok(())
    }
}

impl MatchCondition {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(path) = &self.path {
            path.validate("match.path")?;
        }
        if let Some(method) = &self.method {
            method.validate("match.method")?;
        }
        if let Some(headers) = &self.headers {
            for header in headers {
                header.validate()?;
            }
        }
        Ok(())
    }
}

impl StringMatcher {
    fn validate(&self, field: &str) -> Result<(), ValidationError> {
        if let Some(pattern) = &self.regex {
            Regex::new(pattern).map_err(|source| ValidationError::BadRegex {
                field: field.to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

impl HeaderMatcher {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(pattern) = &self.regex {
            Regex::new(pattern).map_err(|source| ValidationError::BadRegex {
                field: format!("match.headers[{}].regex", self.name),
                source,
            })?;
        }
        Ok(())
    }
}

/// Resolves the legacy `"<n><unit>"` delay alias (unit in {ms, s, m}) into
/// milliseconds, clamped to [`MAX_DELAY_MS`]. Returns `None` if the string
/// doesn't parse.
pub fn parse_legacy_delay(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let (digits, unit) = if let Some(d) = raw.strip_suffix("ms") {
        (d, 1u64)
    } else if let Some(d) = raw.strip_suffix('s') {
        (d, 1_000u64)
    } else if let Some(d) = raw.strip_suffix('m') {
        (d, 60_000u64)
    } else {
        return None;
    };
    let n: u64 = digits.trim().parse().ok()?;
    Some(n.saturating_mul(unit).min(MAX_DELAY_MS))
}
