use crate::config::{CompiledRule, HeaderMatcher, MatchCondition, PathMatcher, StringMatcher};
use crate::identity::EnvoyIdentity;
use proxy_wasm::traits::HttpContext;
use std::collections::HashMap;

/// Extracted request information for matching. Built once per request.
#[derive(Debug)]
pub struct RequestInfo {
    pub path: String,
    pub method: String,
    pub headers: HashMap<String, String>,
}

impl RequestInfo {
    /// Extracts the request's `:path`, `:method`, and full header set from
    /// the host. Header names are lowercased on the way in so lookups stay
    /// case-insensitive without re-normalizing on every match attempt; a
    /// header repeated by the client collapses to its last value.
    pub fn from_http_context(http_context: &dyn HttpContext) -> Self {
        let path = http_context
            .get_http_request_header(":path")
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| {
                log::debug!("path header missing or empty, using default '/'");
                "/".to_string()
            });

        let method = http_context
            .get_http_request_header(":method")
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                log::debug!("method header missing or empty, using default 'GET'");
                "GET".to_string()
            });

        let headers = http_context
            .get_http_request_headers()
            .into_iter()
            .map(|(name, value)| (name.to_lowercase(), value))
            .collect();

        RequestInfo { path, method, headers }
    }
}

/// Returns the first rule (in document order) that matches this request for
/// this sidecar identity, applying the steps in order: selector, expiration,
/// predicates, probability. A rule whose predicates match but whose
/// probability draw misses ends the search — it does not fall through to
/// the next rule, matching the "at most one fault per request" invariant.
pub fn find_first_match<'a>(
    request: &RequestInfo,
    rules: &'a [CompiledRule],
    now_ms: u64,
    identity: &EnvoyIdentity,
) -> Option<&'a CompiledRule> {
    for rule in rules {
        if !identity.matches_selector(&rule.selector) {
            continue;
        }
        if is_expired(rule, now_ms) {
            continue;
        }
        if is_match(&rule.match_condition, request) {
            return Some(rule);
        }
    }
    None
}

/// A rule outlives its `duration_seconds` window the instant `now` is
/// strictly past `creation_time_ms + duration_seconds * 1000`; equality is
/// still within the window. `duration_seconds == 0` means "no expiration".
pub fn is_expired(rule: &CompiledRule, now_ms: u64) -> bool {
    if rule.fault.duration_seconds == 0 {
        return false;
    }
    let validity_window_ms = rule.fault.duration_seconds as u64 * 1000;
    let age_ms = now_ms.saturating_sub(rule.creation_time_ms);
    age_ms > validity_window_ms
}

pub fn is_match(condition: &MatchCondition, request: &RequestInfo) -> bool {
    if let Some(ref path_matcher) = condition.path {
        if !match_path(path_matcher, &request.path) {
            return false;
        }
    }
    if let Some(ref method_matcher) = condition.method {
        if !match_string(method_matcher, &request.method) {
            return false;
        }
    }
    if let Some(ref header_matchers) = condition.headers {
        for header_matcher in header_matchers {
            if !match_header(header_matcher, &request.headers) {
                return false;
            }
        }
    }
    true
}

fn match_path(matcher: &PathMatcher, path: &str) -> bool {
    if let Some(ref exact) = matcher.exact {
        return path == exact;
    }
    if let Some(ref prefix) = matcher.prefix {
        return path.starts_with(prefix.as_str());
    }
    if let Some(ref regex) = matcher.compiled_regex {
        return regex.is_match(path);
    }
    true
}

fn match_string(matcher: &StringMatcher, value: &str) -> bool {
    if let Some(ref exact) = matcher.exact {
        return value == exact;
    }
    if let Some(ref prefix) = matcher.prefix {
        return value.starts_with(prefix.as_str());
    }
    if let Some(ref regex) = matcher.compiled_regex {
        return regex.is_match(value);
    }
    true
}

fn match_header(matcher: &HeaderMatcher, headers: &HashMap<String, String>) -> bool {
    let name = matcher.name.to_lowercase();
    let Some(value) = headers.get(&name) else {
        return false;
    };
    if let Some(ref exact) = matcher.exact {
        return value == exact;
    }
    if let Some(ref prefix) = matcher.prefix {
        return value.starts_with(prefix.as_str());
    }
    if let Some(ref regex) = matcher.compiled_regex {
        return regex.is_match(value);
    }
    true
}
