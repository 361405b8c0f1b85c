//! Host clock access.
//!
//! `std::time::SystemTime::now()` panics on `wasm32-unknown-unknown` (no
//! clock syscall in the sandbox); the host provides time through the
//! `proxy_wasm` ABI instead. Every timestamp in this crate — rule
//! `creation_time_ms`, expiration checks — goes through
//! [`get_current_time_ms`] rather than the standard library clock.

use std::time::UNIX_EPOCH;

/// Current time in milliseconds since the Unix epoch, as reported by the
/// host. Falls back to 0 if the host call fails (fail-open: a rule's
/// expiration check against a 0 "now" degrades to "not yet expired" rather
/// than panicking).
pub fn get_current_time_ms() -> u64 {
    match proxy_wasm::hostcalls::get_current_time() {
        Ok(time) => time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0),
        Err(e) => {
            log::warn!("failed to read host clock: {:?}", e);
            0
        }
    }
}

/// Milliseconds elapsed since `since_ms`, saturating at 0 if the clock
/// appears to have gone backwards.
pub fn elapsed_ms_since(since_ms: u64) -> u64 {
    get_current_time_ms().saturating_sub(since_ms)
}
