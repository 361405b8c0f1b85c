use log::error;
use std::panic;

/// Installs a global panic hook that logs through both `log` and the host's
/// own log sink, so a panic is visible in Envoy's logs even if the plugin's
/// usual logger isn't wired up yet.
pub fn setup_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic payload".to_string()
        };

        let location = if let Some(location) = panic_info.location() {
            format!("{}:{}:{}", location.file(), location.line(), location.column())
        } else {
            "Unknown location".to_string()
        };

        error!(
            "PANIC occurred in WASM plugin - Payload: '{}', Location: {}",
            payload, location
        );

        proxy_wasm::hostcalls::log(
            proxy_wasm::types::LogLevel::Critical,
            &format!(
                "[WASM PANIC] Payload: '{}', Location: {}",
                payload, location
            ),
        ).unwrap_or(());
    }));

    log::info!("global panic hook has been set up for WASM plugin safety");
}

/// Runs `f` inside `catch_unwind`, logging and returning `None` instead of
/// unwinding past the host callback boundary. Every `on_*` entry point in
/// `lib.rs` is wrapped in this so a bug in one request's fault evaluation
/// can't take down the whole worker.
pub fn safe_execute<F, R>(operation_name: &str, f: F) -> Option<R>
where
    F: FnOnce() -> R + panic::UnwindSafe,
{
    match panic::catch_unwind(f) {
        Ok(result) => Some(result),
        Err(panic_payload) => {
            let payload_str = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic payload".to_string()
            };

            error!(
                "Caught panic in operation '{}': {}",
                operation_name, payload_str
            );

            proxy_wasm::hostcalls::log(
                proxy_wasm::types::LogLevel::Error,
                &format!(
                    "[WASM SAFE_EXECUTE] Panic caught in '{}': {}",
                    operation_name, payload_str
                ),
            ).unwrap_or(());

            None
        }
    }
}
