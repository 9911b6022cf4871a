use std::time::Duration;

use crate::retry::RetryPolicy;

/// Configures HTTP timeout and retry behavior.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Base retry backoff in milliseconds (exponential strategy).
    pub retry_backoff_ms: u64,
    /// Upper bound for a single computed backoff in milliseconds.
    pub retry_max_backoff_ms: u64,
    /// Adds up to 10% random delay to computed backoffs.
    pub jitter: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 3,
            retry_backoff_ms: 1_000,
            retry_max_backoff_ms: 30_000,
            jitter: true,
        }
    }
}

impl ClientOptions {
    /// Loads options from `{prefix}_HTTP_*` environment variables.
    ///
    /// See [`ClientOptions::from_lookup`] for the variables read.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Loads options through `lookup`, falling back to defaults for missing
    /// or unparseable values.
    ///
    /// Reads:
    /// - `{prefix}_HTTP_TIMEOUT_SECONDS`
    /// - `{prefix}_HTTP_MAX_RETRIES` (negative values clamp to 0)
    /// - `{prefix}_HTTP_RETRY_BASE_DELAY_SECONDS`
    /// - `{prefix}_HTTP_RETRY_MAX_DELAY_SECONDS`
    ///
    /// Second values may be fractional.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |suffix: &str| {
            lookup(&format!("{prefix}_HTTP_{suffix}"))
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let max_retries = read("MAX_RETRIES")
            .and_then(|value| value.parse::<i64>().ok())
            .map(|value| u32::try_from(value.max(0)).unwrap_or(u32::MAX))
            .unwrap_or(defaults.max_retries);

        Self {
            timeout_ms: read("TIMEOUT_SECONDS")
                .and_then(|value| seconds_to_ms(&value))
                .unwrap_or(defaults.timeout_ms),
            max_retries,
            retry_backoff_ms: read("RETRY_BASE_DELAY_SECONDS")
                .and_then(|value| seconds_to_ms(&value))
                .unwrap_or(defaults.retry_backoff_ms),
            retry_max_backoff_ms: read("RETRY_MAX_DELAY_SECONDS")
                .and_then(|value| seconds_to_ms(&value))
                .unwrap_or(defaults.retry_max_backoff_ms),
            jitter: defaults.jitter,
        }
    }

    /// Request timeout; zero falls back to 30 seconds.
    pub fn timeout(&self) -> Duration {
        if self.timeout_ms == 0 {
            Duration::from_millis(Self::default().timeout_ms)
        } else {
            Duration::from_millis(self.timeout_ms)
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_backoff_ms),
            Duration::from_millis(self.retry_max_backoff_ms),
        )
        .with_jitter(self.jitter)
    }
}

fn seconds_to_ms(value: &str) -> Option<u64> {
    let seconds = value.parse::<f64>().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some((seconds * 1_000.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use super::ClientOptions;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn missing_variables_use_defaults() {
        let options = ClientOptions::from_lookup("CLOUDFLARE", lookup(&[]));
        assert_eq!(options, ClientOptions::default());
    }

    #[test]
    fn reads_prefixed_variables() {
        let options = ClientOptions::from_lookup(
            "CLOUDFLARE",
            lookup(&[
                ("CLOUDFLARE_HTTP_TIMEOUT_SECONDS", "5"),
                ("CLOUDFLARE_HTTP_MAX_RETRIES", "6"),
                ("CLOUDFLARE_HTTP_RETRY_BASE_DELAY_SECONDS", "0.25"),
                ("CLOUDFLARE_HTTP_RETRY_MAX_DELAY_SECONDS", "10"),
            ]),
        );
        assert_eq!(options.timeout_ms, 5_000);
        assert_eq!(options.max_retries, 6);
        assert_eq!(options.retry_backoff_ms, 250);
        assert_eq!(options.retry_max_backoff_ms, 10_000);

        let policy = options.retry_policy();
        assert_eq!(policy.max_retries(), 6);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
    }

    #[test]
    fn negative_retries_clamp_and_garbage_falls_back() {
        let options = ClientOptions::from_lookup(
            "VAULT",
            lookup(&[
                ("VAULT_HTTP_MAX_RETRIES", "-4"),
                ("VAULT_HTTP_TIMEOUT_SECONDS", "soon"),
                ("VAULT_HTTP_RETRY_BASE_DELAY_SECONDS", "-1"),
            ]),
        );
        assert_eq!(options.max_retries, 0);
        assert_eq!(options.timeout_ms, 30_000);
        assert_eq!(options.retry_backoff_ms, 1_000);
    }

    #[test]
    fn zero_timeout_falls_back() {
        let options = ClientOptions {
            timeout_ms: 0,
            ..ClientOptions::default()
        };
        assert_eq!(options.timeout(), Duration::from_secs(30));
    }
}
