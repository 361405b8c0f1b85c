use log::{debug, warn, error};
use std::time::Duration;

/// Error classification for reconnection strategy (M2 improvement)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Temporary/retryable errors: timeouts, network issues, 5xx
    Temporary,
    /// Permanent/non-retryable errors: 4xx client errors
    Permanent,
    /// Unknown error type
    Unknown,
}

impl ErrorType {
    /// Classify HTTP status code into error type
    pub fn from_status_code(status: u32) -> Self {
        match status {
            // 5xx server errors and timeouts are retryable
            500..=599 => ErrorType::Temporary,
            // 4xx client errors are generally not retryable
            400..=499 => ErrorType::Permanent,
            // Success and redirects
            _ => ErrorType::Unknown,
        }
    }
}

/// Exponential-backoff reconnection state for the control-plane poll loop.
pub struct ReconnectManager {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub current_delay: Duration,
    pub is_reconnecting: bool,
}

impl ReconnectManager {
    /// 100ms initial delay, doubling, capped at 5 minutes, 10 attempts.
    pub fn new() -> Self {
        Self {
            attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(300),
            max_attempts: 10,
            current_delay: Duration::from_millis(100),
            is_reconnecting: false,
        }
    }

    /// Builds a manager with a caller-supplied envelope, for tests that want
    /// to exercise backoff on a faster or slower clock than the defaults.
    pub fn with_config(
        initial_delay: Duration,
        max_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            attempts: 0,
            initial_delay,
            max_delay,
            max_attempts,
            current_delay: initial_delay,
            is_reconnecting: false,
        }
    }

    /// Records a connection failure and computes the next backoff delay.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.on_failure_with_error_type(ErrorType::Temporary)
    }

    /// Like [`on_failure`], but a permanent (4xx) error gives up after far
    /// fewer attempts since retrying won't change a client-error response.
    pub fn on_failure_with_error_type(&mut self, error_type: ErrorType) -> Option<Duration> {
        self.attempts += 1;

        let max_attempts = match error_type {
            ErrorType::Permanent => {
                warn!("permanent error detected (4xx), reducing max attempts");
                std::cmp::min(self.max_attempts, 2)
            }
            ErrorType::Temporary => self.max_attempts,
            ErrorType::Unknown => self.max_attempts,
        };
        
        if self.attempts > max_attempts {
            error!(
                "max reconnection attempts reached: {}/{} (error type: {:?})",
                self.attempts, max_attempts, error_type
            );
            return None;
        }

        let exponential_delay = self
            .initial_delay
            .checked_mul(2_u32.checked_pow(self.attempts.saturating_sub(1)).unwrap_or(1))
            .unwrap_or(self.max_delay);

        self.current_delay = std::cmp::min(exponential_delay, self.max_delay);
        self.is_reconnecting = true;

        warn!(
            "connection failed ({:?}), scheduling reconnect attempt {}/{} in {:?}",
            error_type, self.attempts, max_attempts, self.current_delay
        );

        Some(self.current_delay)
    }

    pub fn on_success(&mut self) {
        if self.attempts > 0 {
            debug!("reconnection successful after {} attempts", self.attempts);
        }

        self.attempts = 0;
        self.current_delay = self.initial_delay;
        self.is_reconnecting = false;
    }

    pub fn should_reconnect(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn get_current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn is_reconnecting(&self) -> bool {
        self.is_reconnecting
    }

    pub fn get_attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for ReconnectManager {
    fn default() -> Self {
        Self::new()
    }
}
