//! Fault execution: turns a matched rule into an HTTP effect.
//!
//! The only non-blocking wait primitive proxy-wasm gives a single-threaded
//! wasm guest is `dispatch_http_call` to a synthetic upstream with the
//! desired timeout — the host calls back into `on_http_call_response` when
//! that timeout elapses, without ever blocking the worker thread. Both
//! `start_delay_ms` and `delay.fixed_delay_ms` ride this mechanism; there is
//! exactly one implementation of it, below.

use crate::config::{AbortAction, Fault};
use crate::metrics::FaultInjectionMetrics;
use proxy_wasm::traits::HttpContext;
use proxy_wasm::types::Action;
use std::cell::Cell;
use std::time::Duration;

/// Cluster name the host must route to a local, always-fast responder (or
/// simply time out after the requested duration — either way the sidecar
/// only cares about the elapsed time, never the response body).
const DELAY_CLUSTER: &str = "hfi_delay_cluster";

#[derive(Debug, Clone, Copy)]
pub struct MetricsIds {
    pub aborts_total: Option<u32>,
    pub delays_total: Option<u32>,
    pub delay_duration_histogram: Option<u32>,
}

/// What the plugin runtime must remember between the header hook returning
/// `Action::Pause` and the matching `on_http_call_response` callback.
#[derive(Debug, Clone)]
pub enum PendingAction {
    /// Waiting out `start_delay_ms` before the fault itself is applied.
    WaitingStart { fault: Fault, rule_name: String },
    /// Waiting out `delay.fixed_delay_ms`. If `abort_after` is set, the
    /// fault carried both a delay and an abort ("abort-wins": the delay
    /// elapses, then the abort response is sent).
    WaitingDelay {
        rule_name: String,
        delay_ms: u64,
        abort_after: Option<AbortAction>,
    },
}

/// Entry point from `on_http_request_headers`: begin applying `fault`.
/// Returns the action to hand back to the host and, if the fault isn't
/// fully resolved yet, the state to carry into the next callback.
pub fn enter(
    fault: &Fault,
    rule_name: &str,
    http_context: &dyn HttpContext,
    metrics: MetricsIds,
    collector: &FaultInjectionMetrics,
) -> (Action, Option<PendingAction>) {
    if fault.start_delay_ms > 0 {
        match dispatch_timer(http_context, fault.start_delay_ms as u64) {
            Ok(()) => (
                Action::Pause,
                Some(PendingAction::WaitingStart {
                    fault: fault.clone(),
                    rule_name: rule_name.to_string(),
                }),
            ),
            Err(()) => apply(fault, rule_name, http_context, metrics, collector),
        }
    } else {
        apply(fault, rule_name, http_context, metrics, collector)
    }
}

/// Entry point from `on_http_call_response`: the previously dispatched timer
/// fired. Resumes or terminates the request as appropriate; returns further
/// pending state if another wait is still in flight (the start-delay, having
/// just elapsed, may itself kick off a delay-then-abort wait).
pub fn resume(
    pending: PendingAction,
    http_context: &dyn HttpContext,
    metrics: MetricsIds,
    collector: &FaultInjectionMetrics,
) -> Option<PendingAction> {
    match pending {
        PendingAction::WaitingStart { fault, rule_name } => {
            let (action, next) = apply(&fault, &rule_name, http_context, metrics, collector);
            if next.is_none() && matches!(action, Action::Continue) {
                http_context.resume_http_request();
            }
            next
        }
        PendingAction::WaitingDelay { abort_after: Some(abort), .. } => {
            send_abort(&abort, http_context, metrics, collector);
            None
        }
        PendingAction::WaitingDelay { delay_ms, abort_after: None, .. } => {
            record_delay_completion(delay_ms, metrics, collector);
            http_context.resume_http_request();
            None
        }
    }
}

/// Applies a fault that is not (or no longer) waiting on `start_delay_ms`.
fn apply(
    fault: &Fault,
    rule_name: &str,
    http_context: &dyn HttpContext,
    metrics: MetricsIds,
    collector: &FaultInjectionMetrics,
) -> (Action, Option<PendingAction>) {
    match (&fault.abort, &fault.delay) {
        (Some(abort), Some(delay)) => {
            let delay_ms = delay.parsed_duration_ms.unwrap_or(0);
            match dispatch_timer(http_context, delay_ms) {
                Ok(()) => (
                    Action::Pause,
                    Some(PendingAction::WaitingDelay {
                        rule_name: rule_name.to_string(),
                        delay_ms,
                        abort_after: Some(abort.clone()),
                    }),
                ),
                Err(()) => (send_abort(abort, http_context, metrics, collector), None),
            }
        }
        (Some(abort), None) => (send_abort(abort, http_context, metrics, collector), None),
        (None, Some(delay)) => {
            let delay_ms = delay.parsed_duration_ms.unwrap_or(0);
            match dispatch_timer(http_context, delay_ms) {
                Ok(()) => (
                    Action::Pause,
                    Some(PendingAction::WaitingDelay {
                        rule_name: rule_name.to_string(),
                        delay_ms,
                        abort_after: None,
                    }),
                ),
                Err(()) => (Action::Continue, None),
            }
        }
        (None, None) => (Action::Continue, None),
    }
}

fn dispatch_timer(http_context: &dyn HttpContext, duration_ms: u64) -> Result<(), ()> {
    http_context
        .dispatch_http_call(
            DELAY_CLUSTER,
            vec![(":method", "GET"), (":path", "/delay"), (":authority", "delay.local")],
            None,
            vec![],
            Duration::from_millis(duration_ms),
        )
        .map(|_token| ())
        .map_err(|e| {
            log::warn!("failed to dispatch delay timer: {:?}", e);
        })
}

fn send_abort(
    abort: &AbortAction,
    http_context: &dyn HttpContext,
    metrics: MetricsIds,
    collector: &FaultInjectionMetrics,
) -> Action {
    collector.record_abort_fault();
    if let Some(id) = metrics.aborts_total {
        increment_counter(id, 1);
    }
    http_context.send_http_response(abort.http_status, vec![("x-fault-injected", "abort")], None);
    Action::Pause
}

fn record_delay_completion(delay_ms: u64, metrics: MetricsIds, collector: &FaultInjectionMetrics) {
    collector.record_delay_fault(delay_ms);
    if let Some(id) = metrics.delays_total {
        increment_counter(id, 1);
    }
    if let Some(id) = metrics.delay_duration_histogram {
        record_histogram(id, delay_ms);
    }
}

fn increment_counter(metric_id: u32, offset: i64) {
    if let Err(e) = proxy_wasm::hostcalls::increment_metric(metric_id, offset) {
        log::warn!("failed to increment metric {}: {:?}", metric_id, e);
    }
}

fn record_histogram(metric_id: u32, value: u64) {
    if let Err(e) = proxy_wasm::hostcalls::record_metric(metric_id, value) {
        log::warn!("failed to record metric {}: {:?}", metric_id, e);
    }
}

thread_local! {
    static RNG_STATE: Cell<u64> = Cell::new(seed());
}

fn seed() -> u64 {
    let now = crate::time_control::get_current_time_ms();
    if now == 0 {
        88172645463325252
    } else {
        now.wrapping_mul(2685821657736338717).max(1)
    }
}

/// Draws a uniform integer in `[0, 100)` using a thread-local xorshift64*
/// generator with rejection sampling, so every value 0..100 is equally
/// likely despite 2^64 not being a multiple of 100. A rule with
/// `percentage == 100` must fire on every matching request, which requires
/// the draw to never land on 100 itself.
pub fn generate_random_percentage() -> u32 {
    RNG_STATE.with(|state| loop {
        let mut x = state.get();
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        state.set(x);
        let candidate = x.wrapping_mul(0x2545F4914F6CDD1D) >> 56;
        if candidate < 100 {
            return candidate as u32;
        }
    })
}
