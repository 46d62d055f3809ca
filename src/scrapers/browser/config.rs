//! `[browser]` section of the config file.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserEngineConfig {
    pub headless: bool,
    /// Passed to Chrome as `--proxy-server`.
    pub proxy: Option<String>,
    pub page_timeout_secs: u64,
    /// How long challenge pages get to resubmit themselves once loaded.
    pub settle_ms: u64,
    /// Chrome binary to launch; searched for on `PATH` when unset.
    pub executable: Option<PathBuf>,
    pub extra_args: Vec<String>,
    /// DevTools endpoint of an already running browser (`ws://` or `http://`).
    /// Nothing is launched when this is set.
    pub devtools_url: Option<String>,
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            headless: true,
            proxy: None,
            page_timeout_secs: 30,
            settle_ms: 6_000,
            executable: None,
            extra_args: Vec::new(),
            devtools_url: None,
        }
    }
}

impl BrowserEngineConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}
