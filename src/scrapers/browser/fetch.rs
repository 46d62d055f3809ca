//! chromiumoxide-backed fallback fetcher.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::handler::{Handler, HandlerConfig};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info};

use super::{copy_cookies_into, BrowserCookie, BrowserEngineConfig, BrowserFallback};
use crate::scrapers::error::{RequestSummary, ScrapeError};
use crate::scrapers::http_client::{CookieJar, HttpResponse};

const BINARY_NAMES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
];

const BUNDLE_PATHS: &[&str] = &[
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
];

const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--no-first-run",
    "--no-sandbox",
];

#[derive(Deserialize)]
struct DevtoolsVersion {
    #[serde(rename = "webSocketDebuggerUrl")]
    ws_url: String,
}

/// What a finished page load left behind.
struct LoadedPage {
    url: String,
    html: String,
    cookies: Vec<BrowserCookie>,
}

/// One browser, started on first use and shared by every fallback fetch.
pub struct BrowserFetcher {
    config: BrowserEngineConfig,
    browser: Mutex<Option<Browser>>,
}

impl BrowserFetcher {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self {
            config,
            browser: Mutex::new(None),
        }
    }

    async fn start(&self) -> Result<Browser> {
        let (browser, handler) = match &self.config.devtools_url {
            Some(endpoint) => {
                let ws_url = websocket_endpoint(endpoint).await?;
                info!(endpoint = %ws_url, "Attaching to running browser");
                let handler_config = HandlerConfig {
                    request_timeout: self.config.page_timeout(),
                    ..Default::default()
                };
                Browser::connect_with_config(ws_url, handler_config)
                    .await
                    .context("Failed to attach to browser")?
            }
            None => {
                let executable = locate_executable(&self.config)?;
                info!(
                    executable = %executable.display(),
                    headless = self.config.headless,
                    "Launching browser"
                );
                Browser::launch(self.launch_config(executable)?)
                    .await
                    .context("Failed to launch browser")?
            }
        };
        tokio::spawn(drive(handler));
        Ok(browser)
    }

    fn launch_config(&self, executable: PathBuf) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .chrome_executable(executable)
            .request_timeout(self.config.page_timeout());
        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(proxy) = &self.config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        for arg in LAUNCH_ARGS
            .iter()
            .copied()
            .chain(self.config.extra_args.iter().map(String::as_str))
        {
            builder = builder.arg(arg);
        }
        builder.build().map_err(|e| anyhow!(e))
    }

    async fn load(&self, page: &Page, url: &str) -> Result<LoadedPage> {
        let limit = self.config.page_timeout();
        timeout(limit, page.goto(url))
            .await
            .map_err(|_| anyhow!("navigation to {} exceeded {:?}", url, limit))?
            .with_context(|| format!("navigation to {} failed", url))?;

        wait_until_complete(page, limit).await;
        // Challenge pages submit their answer on a timer.
        sleep(self.config.settle()).await;

        let url = page.url().await?.unwrap_or_else(|| url.to_string());
        let html = page.content().await?;
        let cookies = page
            .get_cookies()
            .await?
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect();
        Ok(LoadedPage { url, html, cookies })
    }
}

#[async_trait]
impl BrowserFallback for BrowserFetcher {
    async fn fetch(&self, url: &str, jar: &CookieJar) -> Result<HttpResponse, ScrapeError> {
        let summary = RequestSummary {
            method: "GET".to_string(),
            url: url.to_string(),
        };
        let failed =
            |e: anyhow::Error| ScrapeError::request_failed(format!("browser: {:#}", e), summary.clone());

        let _session = jar.lock_session().await;
        let mut slot = self.browser.lock().await;
        let browser = match slot.take() {
            Some(browser) => browser,
            None => self.start().await.map_err(failed)?,
        };
        let browser = slot.insert(browser);

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| failed(e.into()))?;
        let loaded = self.load(&page, url).await;
        if let Err(e) = page.close().await {
            debug!(url, "Closing page failed: {}", e);
        }
        let loaded = loaded.map_err(failed)?;

        debug!(url, final_url = %loaded.url, cookies = loaded.cookies.len(), "Browser fetch finished");
        copy_cookies_into(jar, &loaded.cookies);
        Ok(HttpResponse::new(200, loaded.url, loaded.html).with_header("content-type", "text/html"))
    }
}

async fn drive(mut handler: Handler) {
    while let Some(event) = handler.next().await {
        if event.is_err() {
            break;
        }
    }
}

/// Poll `document.readyState` until the load event fired or `limit` passed.
async fn wait_until_complete(page: &Page, limit: Duration) {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        let state = page
            .evaluate("document.readyState")
            .await
            .ok()
            .and_then(|r| r.into_value::<String>().ok());
        if state.as_deref() == Some("complete") {
            return;
        }
        sleep(Duration::from_millis(250)).await;
    }
    debug!("Page never reached readyState=complete");
}

/// Accept either a websocket URL or the HTTP DevTools root of a browser.
async fn websocket_endpoint(endpoint: &str) -> Result<String> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Ok(endpoint.to_string());
    }
    let version_url = format!("{}/json/version", endpoint.trim_end_matches('/'));
    let version: DevtoolsVersion = reqwest::get(&version_url)
        .await
        .with_context(|| format!("DevTools endpoint {} unreachable", version_url))?
        .json()
        .await
        .context("Unexpected DevTools version payload")?;
    Ok(version.ws_url)
}

fn locate_executable(config: &BrowserEngineConfig) -> Result<PathBuf> {
    if let Some(path) = &config.executable {
        return Ok(path.clone());
    }
    let search_path = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&search_path)
        .flat_map(|dir| BINARY_NAMES.iter().map(move |name| dir.join(name)))
        .chain(BUNDLE_PATHS.iter().map(PathBuf::from))
        .find(|p| p.is_file())
        .ok_or_else(|| anyhow!("no Chrome or Chromium binary found; set browser.executable or browser.devtools_url"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_executable_wins() {
        let config = BrowserEngineConfig {
            executable: Some(PathBuf::from("/opt/chromium/chrome")),
            ..Default::default()
        };
        assert_eq!(
            locate_executable(&config).unwrap(),
            PathBuf::from("/opt/chromium/chrome")
        );
    }

    #[tokio::test]
    async fn test_websocket_endpoint_passthrough() {
        let ws = "ws://127.0.0.1:9222/devtools/browser/abc";
        assert_eq!(websocket_endpoint(ws).await.unwrap(), ws);
    }
}
