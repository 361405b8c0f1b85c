use regex::Regex;
use serde::{Deserialize, Deserializer};

pub use crate::identity::ServiceSelector;

/// Maximum `fixed_delay_ms` honored by the executor; larger values are clamped.
pub const MAX_DELAY_MS: u64 = 30_000;

/// Top-level response from the control plane's `/v1/policies` endpoint: a
/// bare array of policies wrapped in an object (mirrors the list endpoint's
/// JSON body, not the wire array form used for distribution snapshots).
#[derive(Debug, Clone, Deserialize)]
pub struct PoliciesResponse {
    pub policies: Vec<PolicyWrapper>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyWrapper {
    pub metadata: PolicyMetadata,
    pub spec: PolicySpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyMetadata {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicySpec {
    #[serde(default)]
    pub selector: Option<ServiceSelector>,
    pub rules: Vec<RuleSpec>,
}

impl PolicySpec {
    pub fn effective_selector(&self) -> ServiceSelector {
        self.selector.clone().unwrap_or_else(ServiceSelector::wildcard)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    #[serde(rename = "match")]
    pub match_condition: MatchCondition,
    pub fault: Fault,
}

/// The compiled form the plugin runtime holds. Pure, side-effect-free output
/// of [`CompiledRuleSet::from_policies_response`]: the same input bytes
/// always produce the same version stamp and rule list.
#[derive(Debug, Clone)]
pub struct CompiledRuleSet {
    pub version: String,
    pub rules: Vec<CompiledRule>,
}

impl PartialEq for CompiledRuleSet {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
    }
}

/// A flattened, compiled rule. Carries its owning policy's selector and
/// creation timestamp so the matcher can apply the selector and expiration
/// filters without reaching back into the policy document.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub selector: ServiceSelector,
    pub match_condition: MatchCondition,
    pub fault: Fault,
    pub creation_time_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchCondition {
    pub path: Option<PathMatcher>,
    pub method: Option<StringMatcher>,
    pub headers: Option<Vec<HeaderMatcher>>,
}

#[derive(Debug, Clone)]
pub struct PathMatcher {
    pub prefix: Option<String>,
    pub exact: Option<String>,
    pub regex: Option<String>,
    pub compiled_regex: Option<Regex>,
}

#[derive(Debug, Clone)]
pub struct StringMatcher {
    pub exact: Option<String>,
    pub prefix: Option<String>,
    pub regex: Option<String>,
    pub compiled_regex: Option<Regex>,
}

#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    pub name: String,
    pub exact: Option<String>,
    pub prefix: Option<String>,
    pub regex: Option<String>,
    pub compiled_regex: Option<Regex>,
}

/// Returns `true` if this predicate named a regex that failed to compile.
/// A rule carrying such a predicate is dropped at validation time rather
/// than silently treated as a wildcard.
trait RegexHealth {
    fn regex_ok(&self) -> bool;
}

impl RegexHealth for PathMatcher {
    fn regex_ok(&self) -> bool {
        self.regex.is_none() || self.compiled_regex.is_some()
    }
}
impl RegexHealth for StringMatcher {
    fn regex_ok(&self) -> bool {
        self.regex.is_none() || self.compiled_regex.is_some()
    }
}
impl RegexHealth for HeaderMatcher {
    fn regex_ok(&self) -> bool {
        self.regex.is_none() || self.compiled_regex.is_some()
    }
}

fn default_percentage() -> u32 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct Fault {
    pub abort: Option<AbortAction>,
    pub delay: Option<DelayAction>,
    #[serde(default = "default_percentage")]
    pub percentage: u32,
    #[serde(default)]
    pub start_delay_ms: u32,
    #[serde(default)]
    pub duration_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbortAction {
    pub http_status: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DelayAction {
    /// Canonical field: milliseconds, as emitted by the control plane.
    #[serde(default)]
    pub fixed_delay_ms: Option<u32>,
    /// Legacy alias: `"<n><unit>"` with unit in `ms`/`s`/`m`. Accepted on
    /// input, never emitted.
    #[serde(default)]
    pub fixed_delay: Option<String>,
    #[serde(skip)]
    pub parsed_duration_ms: Option<u64>,
}

impl<'de> Deserialize<'de> for PathMatcher {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            prefix: Option<String>,
            exact: Option<String>,
            regex: Option<String>,
        }
        let helper = Helper::deserialize(deserializer)?;
        let compiled_regex = compile_regex(helper.regex.as_deref());
        Ok(PathMatcher {
            prefix: helper.prefix,
            exact: helper.exact,
            regex: helper.regex,
            compiled_regex,
        })
    }
}

impl<'de> Deserialize<'de> for StringMatcher {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            exact: Option<String>,
            prefix: Option<String>,
            regex: Option<String>,
        }
        let helper = Helper::deserialize(deserializer)?;
        let compiled_regex = compile_regex(helper.regex.as_deref());
        Ok(StringMatcher {
            exact: helper.exact,
            prefix: helper.prefix,
            regex: helper.regex,
            compiled_regex,
        })
    }
}

impl<'de> Deserialize<'de> for HeaderMatcher {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            name: String,
            exact: Option<String>,
            prefix: Option<String>,
            regex: Option<String>,
        }
        let helper = Helper::deserialize(deserializer)?;
        let compiled_regex = compile_regex(helper.regex.as_deref());
        Ok(HeaderMatcher {
            name: helper.name,
            exact: helper.exact,
            prefix: helper.prefix,
            regex: helper.regex,
            compiled_regex,
        })
    }
}

fn compile_regex(pattern: Option<&str>) -> Option<Regex> {
    let pattern = pattern?;
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            log::warn!("failed to compile regex '{}': {}", pattern, e);
            None
        }
    }
}

/// Parse the legacy `"<n><unit>"` delay alias into milliseconds.
fn parse_legacy_delay(duration_str: &str) -> Option<u64> {
    let s = duration_str.trim().to_lowercase();
    if let Some(n) = s.strip_suffix("ms") {
        return n.parse::<u64>().ok();
    }
    if let Some(n) = s.strip_suffix('s') {
        return n.parse::<u64>().ok().map(|v| v * 1000);
    }
    if let Some(n) = s.strip_suffix('m') {
        return n.parse::<u64>().ok().map(|v| v * 60 * 1000);
    }
    s.parse::<u64>().ok()
}

/// Resolve a [`DelayAction`]'s effective duration (canonical field takes
/// priority over the legacy alias) and clamp it to [`MAX_DELAY_MS`].
fn resolve_delay_ms(delay: &DelayAction, rule_name: &str) -> Option<u64> {
    let raw = if let Some(ms) = delay.fixed_delay_ms {
        Some(ms as u64)
    } else if let Some(ref legacy) = delay.fixed_delay {
        let parsed = parse_legacy_delay(legacy);
        if parsed.is_none() {
            log::warn!(
                "rule '{}': could not parse legacy fixed_delay '{}'",
                rule_name,
                legacy
            );
        }
        parsed
    } else {
        None
    };

    raw.map(|ms| {
        if ms > MAX_DELAY_MS {
            log::warn!(
                "rule '{}': fixed_delay_ms {} exceeds cap, clamping to {}",
                rule_name,
                ms,
                MAX_DELAY_MS
            );
            MAX_DELAY_MS
        } else {
            ms
        }
    })
}

/// Validates a single rule and compiles it, or reports why it was dropped.
/// Per §4.1 step 2, an invalid rule is dropped with a warning; it never
/// aborts compilation of the rest of the document.
fn compile_rule(
    policy_name: &str,
    selector: ServiceSelector,
    creation_time_ms: u64,
    mut spec: RuleSpec,
) -> Result<CompiledRule, String> {
    let cond = &spec.match_condition;
    if let Some(ref m) = cond.path {
        if !m.regex_ok() {
            return Err("path matcher has an uncompilable regex".to_string());
        }
    }
    if let Some(ref m) = cond.method {
        if !m.regex_ok() {
            return Err("method matcher has an uncompilable regex".to_string());
        }
    }
    if let Some(ref headers) = cond.headers {
        for h in headers {
            if !h.regex_ok() {
                return Err(format!("header matcher '{}' has an uncompilable regex", h.name));
            }
        }
    }

    if spec.fault.percentage > 100 {
        return Err(format!("percentage {} out of range [0,100]", spec.fault.percentage));
    }

    if spec.fault.abort.is_none() && spec.fault.delay.is_none() {
        return Err("fault has neither abort nor delay".to_string());
    }

    if let Some(ref abort) = spec.fault.abort {
        if !(400..=599).contains(&abort.http_status) {
            return Err(format!("http_status {} out of range [400,599]", abort.http_status));
        }
    }

    if let Some(ref mut delay) = spec.fault.delay {
        match resolve_delay_ms(delay, policy_name) {
            Some(ms) => delay.parsed_duration_ms = Some(ms),
            None => return Err("delay action has neither fixed_delay_ms nor a parseable legacy fixed_delay".to_string()),
        }
    }

    Ok(CompiledRule {
        name: policy_name.to_string(),
        selector,
        match_condition: spec.match_condition,
        fault: spec.fault,
        creation_time_ms,
    })
}

/// A monotonic version stamp derived from the canonical input bytes: the
/// same policy list always hashes to the same stamp, satisfying the
/// "compilation is deterministic" guarantee without any shared counter.
fn version_stamp(bytes: &[u8]) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

impl CompiledRuleSet {
    /// Parses a bare ruleset document (no policy wrapper). Used by tests and
    /// tooling that want to exercise the compiler directly.
    #[allow(dead_code)]
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct BareRuleSet {
            rules: Vec<BareRule>,
        }
        #[derive(Deserialize)]
        struct BareRule {
            name: String,
            #[serde(rename = "match")]
            match_condition: MatchCondition,
            fault: Fault,
        }

        let bare: BareRuleSet = serde_json::from_slice(bytes)?;
        let mut rules = Vec::new();
        for r in bare.rules {
            let spec = RuleSpec {
                match_condition: r.match_condition,
                fault: r.fault,
            };
            match compile_rule(&r.name, ServiceSelector::wildcard(), 0, spec) {
                Ok(compiled) => rules.push(compiled),
                Err(reason) => log::warn!("dropping rule '{}': {}", r.name, reason),
            }
        }
        Ok(CompiledRuleSet {
            version: version_stamp(bytes),
            rules,
        })
    }

    /// Compiles the control plane's `/v1/policies` response into a
    /// [`CompiledRuleSet`]. Pure: the selector filter is *not* applied here
    /// (that is the matcher's job, §4.2 step 1) — every rule from every
    /// policy is retained, tagged with its owning selector, so the same
    /// compiled set is valid for any sidecar identity.
    pub fn from_policies_response(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let response: PoliciesResponse = serde_json::from_slice(bytes)?;
        let creation_time_ms = crate::time_control::get_current_time_ms();

        let mut rules = Vec::new();
        let mut dropped = 0usize;
        let mut total = 0usize;

        for policy in response.policies {
            let selector = policy.spec.effective_selector();
            for rule_spec in policy.spec.rules {
                total += 1;
                match compile_rule(&policy.metadata.name, selector.clone(), creation_time_ms, rule_spec) {
                    Ok(rule) => rules.push(rule),
                    Err(reason) => {
                        dropped += 1;
                        log::warn!("dropping rule from policy '{}': {}", policy.metadata.name, reason);
                    }
                }
            }
        }

        if dropped > 0 {
            log::warn!("compiled {} rules, dropped {} of {}", rules.len(), dropped, total);
        } else {
            log::debug!("compiled {} rules", rules.len());
        }

        Ok(CompiledRuleSet {
            version: version_stamp(bytes),
            rules,
        })
    }
}
