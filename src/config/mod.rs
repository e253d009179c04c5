//! Execution limits loaded from the environment.
//!
//! Every knob has a safe default so the engine runs without any setup.
//! Values that fail to parse are ignored in favor of the default.

use std::time::Duration;

/// 10 MiB. Responses larger than this abort the step with `BodyTooLarge`.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Connection establishment timeout.
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 5_000;

/// Whole-request timeout applied when a step declares no `@max-duration`.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// HTTP and flow-level limits for one runner instance.
#[derive(Debug, Clone)]
pub struct HttpLimits {
    /// Cap on the number of response body bytes read per attempt.
    pub max_body_bytes: usize,

    /// TCP/TLS dial timeout for the shared client.
    pub dial_timeout: Duration,

    /// Default per-attempt deadline; a step `@max-duration` overrides it.
    pub request_timeout: Duration,

    /// Optional cap on a whole flow run. When exceeded the abort signal is
    /// raised after the step in flight completes.
    pub flow_max_duration: Option<Duration>,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            dial_timeout: Duration::from_millis(DEFAULT_DIAL_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            flow_max_duration: None,
        }
    }
}

impl HttpLimits {
    /// Loads limits from the process environment.
    ///
    /// Variables read:
    /// - `KEST_HTTP_MAX_BODY_BYTES`
    /// - `KEST_HTTP_DIAL_TIMEOUT_MS`
    /// - `KEST_HTTP_REQUEST_TIMEOUT_MS`
    /// - `KEST_FLOW_MAX_DURATION_MS`
    pub fn from_env() -> Self {
        let mut limits = Self::default();

        if let Some(n) = read_env::<usize>("KEST_HTTP_MAX_BODY_BYTES") {
            limits.max_body_bytes = n;
        }
        if let Some(n) = read_env::<u64>("KEST_HTTP_DIAL_TIMEOUT_MS") {
            limits.dial_timeout = Duration::from_millis(n);
        }
        if let Some(n) = read_env::<u64>("KEST_HTTP_REQUEST_TIMEOUT_MS") {
            limits.request_timeout = Duration::from_millis(n);
        }
        if let Some(n) = read_env::<u64>("KEST_FLOW_MAX_DURATION_MS") {
            limits.flow_max_duration = Some(Duration::from_millis(n));
        }

        limits
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "ignoring unparseable limit override");
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let limits = HttpLimits::default();
        assert_eq!(limits.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(limits.dial_timeout, Duration::from_secs(5));
        assert_eq!(limits.request_timeout, Duration::from_secs(30));
        assert!(limits.flow_max_duration.is_none());
    }

    #[test]
    fn env_overrides_are_applied() {
        std::env::set_var("KEST_HTTP_MAX_BODY_BYTES", "2048");
        std::env::set_var("KEST_FLOW_MAX_DURATION_MS", "60000");
        let limits = HttpLimits::from_env();
        assert_eq!(limits.max_body_bytes, 2048);
        assert_eq!(limits.flow_max_duration, Some(Duration::from_secs(60)));
        std::env::remove_var("KEST_HTTP_MAX_BODY_BYTES");
        std::env::remove_var("KEST_FLOW_MAX_DURATION_MS");
    }

    #[test]
    fn unparseable_override_falls_back_to_default() {
        std::env::set_var("KEST_HTTP_DIAL_TIMEOUT_MS", "not-a-number");
        let limits = HttpLimits::from_env();
        assert_eq!(limits.dial_timeout, Duration::from_secs(5));
        std::env::remove_var("KEST_HTTP_DIAL_TIMEOUT_MS");
    }
}
