//! Challenge resolver settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeConfig {
    /// Challenges answered per request before giving up as a loop.
    #[serde(default = "default_challenges_to_solve")]
    pub challenges_to_solve: u32,

    /// Upper bound on the wait a challenge page may ask for.
    #[serde(default = "default_max_challenge_delay_ms")]
    pub max_challenge_delay_ms: u64,

    #[serde(default = "default_sandbox_timeout_ms")]
    pub sandbox_timeout_ms: u64,

    /// Retries after HTTP 429 before surfacing a request error.
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Replace `data-cfemail` placeholders with the plain addresses.
    #[serde(default)]
    pub decode_emails: bool,

    /// Re-fetch failed GET requests through the headless browser.
    #[serde(default = "default_browser_fallback")]
    pub browser_fallback: bool,
}

fn default_challenges_to_solve() -> u32 {
    3
}

fn default_max_challenge_delay_ms() -> u64 {
    30_000
}

fn default_sandbox_timeout_ms() -> u64 {
    5_000
}

fn default_max_rate_limit_retries() -> u32 {
    3
}

fn default_browser_fallback() -> bool {
    true
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            challenges_to_solve: default_challenges_to_solve(),
            max_challenge_delay_ms: default_max_challenge_delay_ms(),
            sandbox_timeout_ms: default_sandbox_timeout_ms(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            decode_emails: false,
            browser_fallback: default_browser_fallback(),
        }
    }
}

impl ChallengeConfig {
    pub fn max_challenge_delay(&self) -> Duration {
        Duration::from_millis(self.max_challenge_delay_ms)
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_millis(self.sandbox_timeout_ms)
    }
}
