use log::{debug, error, info, warn};
use proxy_wasm::traits::{Context, HttpContext, RootContext};
use proxy_wasm::types::{Action, LogLevel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod config;
mod executor;
mod identity;
mod matcher;
mod metrics;
mod panic_safety;
mod reconnect;
mod time_control;

use config::CompiledRuleSet;
use executor::{MetricsIds, PendingAction};
use identity::EnvoyIdentity;
use matcher::{find_first_match, RequestInfo};
use metrics::FaultInjectionMetrics;
use panic_safety::{safe_execute, setup_panic_hook};
use reconnect::ReconnectManager;

const CONTROL_PLANE_CLUSTER: &str = "hfi_control_plane";

#[cfg(not(test))]
#[no_mangle]
pub fn _start() {
    setup_panic_hook();
    proxy_wasm::set_log_level(LogLevel::Info);

    proxy_wasm::set_root_context(|_| -> Box<dyn RootContext> {
        Box::new(PluginRootContext {
            control_plane_address: String::new(),
            current_rules: Arc::new(Mutex::new(None)),
            identity: EnvoyIdentity::default(),
            reconnect_manager: Arc::new(Mutex::new(ReconnectManager::new())),
            config_call_id: None,
            metrics: MetricsIds { aborts_total: None, delays_total: None, delay_duration_histogram: None },
            collector: FaultInjectionMetrics::new(),
        })
    });
}

struct PluginRootContext {
    control_plane_address: String,
    current_rules: Arc<Mutex<Option<CompiledRuleSet>>>,
    identity: EnvoyIdentity,
    reconnect_manager: Arc<Mutex<ReconnectManager>>,
    config_call_id: Option<u32>,
    metrics: MetricsIds,
    collector: FaultInjectionMetrics,
}

impl PluginRootContext {
    fn define_metrics(&mut self) {
        match proxy_wasm::hostcalls::define_metric(proxy_wasm::types::MetricType::Counter, "faults_aborts_total") {
            Ok(id) => {
                debug!("defined faults_aborts_total metric with id {}", id);
                self.metrics.aborts_total = Some(id);
            }
            Err(e) => warn!("failed to define faults_aborts_total metric: {:?}", e),
        }

        match proxy_wasm::hostcalls::define_metric(proxy_wasm::types::MetricType::Counter, "faults_delays_total") {
            Ok(id) => {
                debug!("defined faults_delays_total metric with id {}", id);
                self.metrics.delays_total = Some(id);
            }
            Err(e) => warn!("failed to define faults_delays_total metric: {:?}", e),
        }

        match proxy_wasm::hostcalls::define_metric(
            proxy_wasm::types::MetricType::Histogram,
            "faults_delay_duration_milliseconds",
        ) {
            Ok(id) => {
                debug!("defined faults_delay_duration_milliseconds metric with id {}", id);
                self.metrics.delay_duration_histogram = Some(id);
            }
            Err(e) => warn!("failed to define faults_delay_duration_milliseconds metric: {:?}", e),
        }
    }

    fn dispatch_config_request(&mut self) {
        if let Ok(manager) = self.reconnect_manager.lock() {
            if manager.is_reconnecting() {
                debug!("skipping config request - reconnection in progress");
                return;
            }
        } else {
            error!("failed to acquire lock on reconnect manager");
            return;
        }

        debug!("dispatching HTTP call to control plane: {}", self.control_plane_address);

        let result = safe_execute("dispatch_http_call", || {
            self.dispatch_http_call(
                CONTROL_PLANE_CLUSTER,
                vec![
                    (":method", "GET"),
                    (":path", "/v1/policies"),
                    (":authority", &self.control_plane_address),
                    ("accept", "application/json"),
                ],
                None,
                vec![],
                Duration::from_secs(10),
            )
        });

        match result {
            Some(Ok(call_id)) => {
                info!("HTTP call dispatched successfully with id {}", call_id);
                self.config_call_id = Some(call_id);
            }
            Some(Err(e)) => {
                warn!("failed to dispatch HTTP call: {:?}", e);
                self.handle_config_failure();
            }
            None => {
                error!("panic occurred during HTTP call dispatch");
                self.handle_config_failure();
            }
        }
    }

    fn handle_config_success(&mut self) {
        if let Ok(mut manager) = self.reconnect_manager.lock() {
            manager.on_success();
        }
        self.config_call_id = None;
        self.set_tick_period(Duration::from_secs(30));
    }

    fn handle_config_failure(&mut self) {
        if let Ok(mut manager) = self.reconnect_manager.lock() {
            if let Some(delay) = manager.on_failure() {
                info!("scheduling reconnect attempt in {:?}", delay);
                self.set_tick_period(delay);
            } else {
                error!("max reconnection attempts reached, giving up");
            }
        } else {
            error!("failed to acquire lock on reconnect manager");
        }
    }
}

impl Context for PluginRootContext {
    fn on_http_call_response(&mut self, _token_id: u32, _num_headers: usize, body_size: usize, _num_trailers: usize) {
        let response_status = self
            .get_http_call_response_header(":status")
            .and_then(|status| status.parse::<u16>().ok())
            .unwrap_or(500);

        info!("received HTTP response - status: {}, body size: {}", response_status, body_size);

        if !(200..300).contains(&response_status) {
            warn!("received non-success status code: {}", response_status);
            self.handle_config_failure();
            return;
        }

        let result = safe_execute("process_config_response", || {
            let Some(body) = self.get_http_call_response_body(0, body_size) else {
                warn!("failed to get response body from control plane");
                return false;
            };

            match CompiledRuleSet::from_policies_response(&body) {
                Ok(ruleset) => {
                    info!("successfully compiled {} rules from control plane", ruleset.rules.len());
                    if let Ok(mut rules) = self.current_rules.lock() {
                        *rules = Some(ruleset);
                    } else {
                        warn!("failed to acquire lock for rules update");
                    }
                    true
                }
                Err(e) => {
                    warn!("failed to parse configuration from control plane: {}", e);
                    false
                }
            }
        });

        match result {
            Some(true) => self.handle_config_success(),
            Some(false) => {
                warn!("config parsing failed, treating as failure");
                self.handle_config_failure();
            }
            None => {
                error!("panic occurred during config response processing");
                self.handle_config_failure();
            }
        }
    }
}

impl RootContext for PluginRootContext {
    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        info!("plugin configured");

        self.define_metrics();
        self.identity = EnvoyIdentity::from_envoy_metadata();

        self.control_plane_address = self
            .get_plugin_configuration()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                info!("no plugin configuration found, using default control plane address");
                "control-plane:8080".to_string()
            });
        info!("control plane address: {}", self.control_plane_address);

        self.set_tick_period(Duration::from_secs(1));
        true
    }

    fn on_tick(&mut self) {
        debug!("tick event received");
        self.dispatch_config_request();
    }

    fn create_http_context(&self, context_id: u32) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(PluginHttpContext {
            context_id,
            rules: self.current_rules.clone(),
            identity: self.identity.clone(),
            metrics: self.metrics,
            collector: self.collector.clone(),
            pending_action: None,
        }))
    }

    fn get_type(&self) -> Option<proxy_wasm::types::ContextType> {
        Some(proxy_wasm::types::ContextType::HttpContext)
    }
}

struct PluginHttpContext {
    context_id: u32,
    rules: Arc<Mutex<Option<CompiledRuleSet>>>,
    identity: EnvoyIdentity,
    metrics: MetricsIds,
    collector: FaultInjectionMetrics,
    pending_action: Option<PendingAction>,
}

impl Context for PluginHttpContext {
    fn on_http_call_response(&mut self, _token_id: u32, _num_headers: usize, _body_size: usize, _num_trailers: usize) {
        let Some(pending) = self.pending_action.take() else {
            warn!("unexpected http_call_response for context {} with no pending action", self.context_id);
            self.resume_http_request();
            return;
        };

        let context_id = self.context_id;
        let result = safe_execute("executor_resume", || executor::resume(pending, self, self.metrics, &self.collector));

        match result {
            Some(next_pending) => self.pending_action = next_pending,
            None => {
                error!(
                    "panic occurred while resuming pending fault action for context {}; resuming request to fail open",
                    context_id
                );
                self.resume_http_request();
            }
        }
    }
}

impl HttpContext for PluginHttpContext {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        let context_id = self.context_id;

        let result = safe_execute("on_http_request_headers", || {
            self.collector.record_request();
            debug!("handling request headers for context {}", self.context_id);

            let rules_guard = match self.rules.lock() {
                Ok(guard) => guard,
                Err(e) => {
                    warn!("failed to acquire lock for rules: {:?}, allowing request to continue", e);
                    return (Action::Continue, None);
                }
            };

            let Some(ruleset) = rules_guard.as_ref() else {
                debug!("no rules configured, allowing request to continue");
                return (Action::Continue, None);
            };

            let request_info = RequestInfo::from_http_context(self);
            let now_ms = time_control::get_current_time_ms();

            let Some(matched_rule) = find_first_match(&request_info, &ruleset.rules, now_ms, &self.identity) else {
                debug!("no rule matched for {} {}", request_info.method, request_info.path);
                return (Action::Continue, None);
            };

            self.collector.record_rule_matched();

            let random_value = executor::generate_random_percentage();
            if random_value >= matched_rule.fault.percentage {
                debug!(
                    "fault not triggered due to percentage (random: {}, threshold: {})",
                    random_value, matched_rule.fault.percentage
                );
                return (Action::Continue, None);
            }

            self.collector.record_fault_injected();
            info!(
                "injecting fault from rule '{}' for context {} ({} {})",
                matched_rule.name, self.context_id, request_info.method, request_info.path
            );

            executor::enter(&matched_rule.fault, &matched_rule.name, self, self.metrics, &self.collector)
        });

        match result {
            Some((action, pending)) => {
                self.pending_action = pending;
                action
            }
            None => {
                error!(
                    "panic occurred while evaluating fault rules for context {}; allowing request to continue",
                    context_id
                );
                Action::Continue
            }
        }
    }

    fn on_http_response_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }
}
