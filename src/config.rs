//! Runtime configuration for the auditor.
//!
//! Everything is loaded from environment variables so the binary can
//! run unconfigured in CI (the shell refuses `run` without an API key
//! but all offline commands still work).

/// Default Claude model used for reviewer calls.
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Per-call timeout. Audits are long prompts; 90s matches the upstream
/// review session budget.
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 90;

/// Retries per reviewer call before the reviewer is declared
/// unavailable.
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Base delay for exponential backoff between retries.
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Concurrent reviewer call slots. The external API is the shared,
/// rate-limited resource; everything else is immutable snapshots.
const DEFAULT_MAX_CONCURRENT_REVIEWS: usize = 3;

/// Auditor configuration.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Anthropic API key. `None` means reviews cannot run; offline
    /// commands (add/list/clear) still can.
    pub api_key: Option<String>,
    /// Model to use for all reviewer calls.
    pub model: String,
    /// Per-call timeout in seconds.
    pub call_timeout_secs: u64,
    /// Retries per call before giving up.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds (doubles per attempt).
    pub backoff_base_ms: u64,
    /// Maximum reviewer calls in flight at once.
    pub max_concurrent_reviews: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.into(),
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            max_concurrent_reviews: DEFAULT_MAX_CONCURRENT_REVIEWS,
        }
    }
}

impl AuditConfig {
    /// Load configuration from environment variables.
    ///
    /// - `ANTHROPIC_API_KEY` — reviewer transport credential
    /// - `CLAUDE_MODEL` — model override
    /// - `MEDAUDIT_MAX_CONCURRENT` — reviewer slot limit
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            model: std::env::var("CLAUDE_MODEL").unwrap_or_else(|_| defaults.model.clone()),
            max_concurrent_reviews: std::env::var("MEDAUDIT_MAX_CONCURRENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_concurrent_reviews),
            ..defaults
        }
    }

    /// Backoff delay for a given (zero-based) retry attempt.
    pub fn backoff_delay(&self, attempt: u32) -> std::time::Duration {
        std::time::Duration::from_millis(self.backoff_base_ms << attempt.min(6))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AuditConfig::default();
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert!(cfg.max_concurrent_reviews > 0);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let cfg = AuditConfig::default();
        assert_eq!(cfg.backoff_delay(0).as_millis(), 500);
        assert_eq!(cfg.backoff_delay(1).as_millis(), 1000);
        assert_eq!(cfg.backoff_delay(2).as_millis(), 2000);
    }

    #[test]
    fn backoff_is_capped() {
        let cfg = AuditConfig::default();
        // Shift saturates at 6 so a pathological retry count cannot
        // overflow the delay.
        assert_eq!(cfg.backoff_delay(60), cfg.backoff_delay(6));
    }
}
