//! Fault injection metrics.
//!
//! In-process counters for introspection and testing without a live proxy
//! host: rule match counts, fault counts by kind, delay duration totals,
//! and error/expiry counts. Distinct from the host metric IDs registered in
//! `lib.rs` (which feed the proxy's own telemetry pipeline) — this struct is
//! ambient engineering that works the same whether or not a host is present.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct FaultInjectionMetrics {
    pub rules_matched_total: Arc<AtomicU64>,
    pub faults_injected_total: Arc<AtomicU64>,
    pub aborts_total: Arc<AtomicU64>,
    pub delays_total: Arc<AtomicU64>,
    pub delay_duration_total_ms: Arc<AtomicU64>,
    /// Number of delay faults recorded, for computing the average delay.
    pub delay_count: Arc<AtomicU64>,
    pub requests_total: Arc<AtomicU64>,
    pub injection_errors_total: Arc<AtomicU64>,
    /// Requests where the executor was still waiting out a timer.
    pub time_control_wait_count: Arc<AtomicU64>,
    /// Requests where a matched rule had already expired.
    pub rule_expired_count: Arc<AtomicU64>,
}

impl FaultInjectionMetrics {
    pub fn new() -> Self {
        Self {
            rules_matched_total: Arc::new(AtomicU64::new(0)),
            faults_injected_total: Arc::new(AtomicU64::new(0)),
            aborts_total: Arc::new(AtomicU64::new(0)),
            delays_total: Arc::new(AtomicU64::new(0)),
            delay_duration_total_ms: Arc::new(AtomicU64::new(0)),
            delay_count: Arc::new(AtomicU64::new(0)),
            requests_total: Arc::new(AtomicU64::new(0)),
            injection_errors_total: Arc::new(AtomicU64::new(0)),
            time_control_wait_count: Arc::new(AtomicU64::new(0)),
            rule_expired_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_rule_matched(&self) {
        self.rules_matched_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fault_injected(&self) {
        self.faults_injected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort_fault(&self) {
        self.aborts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delay_fault(&self, delay_ms: u64) {
        self.delays_total.fetch_add(1, Ordering::Relaxed);
        self.delay_duration_total_ms.fetch_add(delay_ms, Ordering::Relaxed);
        self.delay_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_injection_error(&self) {
        self.injection_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_time_control_wait(&self) {
        self.time_control_wait_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rule_expired(&self) {
        self.rule_expired_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_rules_matched(&self) -> u64 {
        self.rules_matched_total.load(Ordering::Relaxed)
    }

    pub fn get_faults_injected(&self) -> u64 {
        self.faults_injected_total.load(Ordering::Relaxed)
    }

    pub fn get_aborts(&self) -> u64 {
        self.aborts_total.load(Ordering::Relaxed)
    }

    pub fn get_delays(&self) -> u64 {
        self.delays_total.load(Ordering::Relaxed)
    }

    pub fn get_average_delay_ms(&self) -> f64 {
        let total = self.delay_duration_total_ms.load(Ordering::Relaxed);
        let count = self.delay_count.load(Ordering::Relaxed);

        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    pub fn get_requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn get_injection_errors(&self) -> u64 {
        self.injection_errors_total.load(Ordering::Relaxed)
    }

    pub fn get_time_control_wait_count(&self) -> u64 {
        self.time_control_wait_count.load(Ordering::Relaxed)
    }

    pub fn get_rule_expired_count(&self) -> u64 {
        self.rule_expired_count.load(Ordering::Relaxed)
    }

    pub fn get_injection_rate(&self) -> f64 {
        let total = self.requests_total.load(Ordering::Relaxed);
        let injected = self.faults_injected_total.load(Ordering::Relaxed);

        if total == 0 {
            0.0
        } else {
            (injected as f64 / total as f64) * 100.0
        }
    }

    pub fn get_error_rate(&self) -> f64 {
        let total = self.requests_total.load(Ordering::Relaxed);
        let errors = self.injection_errors_total.load(Ordering::Relaxed);

        if total == 0 {
            0.0
        } else {
            (errors as f64 / total as f64) * 100.0
        }
    }

    pub fn reset(&self) {
        self.rules_matched_total.store(0, Ordering::Relaxed);
        self.faults_injected_total.store(0, Ordering::Relaxed);
        self.aborts_total.store(0, Ordering::Relaxed);
        self.delays_total.store(0, Ordering::Relaxed);
        self.delay_duration_total_ms.store(0, Ordering::Relaxed);
        self.delay_count.store(0, Ordering::Relaxed);
        self.requests_total.store(0, Ordering::Relaxed);
        self.injection_errors_total.store(0, Ordering::Relaxed);
        self.time_control_wait_count.store(0, Ordering::Relaxed);
        self.rule_expired_count.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rules_matched: self.get_rules_matched(),
            faults_injected: self.get_faults_injected(),
            aborts: self.get_aborts(),
            delays: self.get_delays(),
            average_delay_ms: self.get_average_delay_ms(),
            requests_total: self.get_requests_total(),
            injection_errors: self.get_injection_errors(),
            time_control_wait_count: self.get_time_control_wait_count(),
            rule_expired_count: self.get_rule_expired_count(),
            injection_rate_percent: self.get_injection_rate(),
            error_rate_percent: self.get_error_rate(),
        }
    }
}

impl Default for FaultInjectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub rules_matched: u64,
    pub faults_injected: u64,
    pub aborts: u64,
    pub delays: u64,
    pub average_delay_ms: f64,
    pub requests_total: u64,
    pub injection_errors: u64,
    pub time_control_wait_count: u64,
    pub rule_expired_count: u64,
    pub injection_rate_percent: f64,
    pub error_rate_percent: f64,
}

impl MetricsSnapshot {
    pub fn report(&self) -> String {
        format!(
            "=== Fault Injection Metrics Report ===\n\
             Rules Matched:              {}\n\
             Faults Injected:            {}\n\
             ├─ Aborts:                  {}\n\
             ├─ Delays:                  {}\n\
             └─ Average Delay:           {:.2} ms\n\
             Total Requests:             {}\n\
             Injection Rate:             {:.2}%\n\
             Injection Errors:           {}\n\
             Error Rate:                 {:.2}%\n\
             Time Control Wait Count:    {}\n\
             Rule Expired Count:         {}",
            self.rules_matched,
            self.faults_injected,
            self.aborts,
            self.delays,
            self.average_delay_ms,
            self.requests_total,
            self.injection_rate_percent,
            self.injection_errors,
            self.error_rate_percent,
            self.time_control_wait_count,
            self.rule_expired_count,
        )
    }
}
