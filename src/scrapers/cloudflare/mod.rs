//! Anti-bot challenge resolution.
//!
//! [`ChallengeResolver`] wraps a [`Transport`] and answers the challenge
//! pages served in front of protected sites: the JavaScript arithmetic
//! check, the cookie-setting redirect script and HTTP 429 back-off. Captcha
//! pages and Cloudflare error pages are surfaced as typed errors. GET
//! requests that still fail can be retried through a headless browser.

mod codes;
mod config;
mod detect;
mod email;
mod iuam;
mod redirect;
mod retry;

pub use codes::error_reason;
pub use config::ChallengeConfig;
pub use detect::{classify, is_protected, Challenge};
pub use email::decode_emails;
pub use retry::parse_retry_after;

use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::browser::BrowserFallback;
use super::error::{ErrorKind, ScrapeError};
use super::http_client::{CookieJar, HttpResponse, RequestConfig, Transport};
use super::sandbox::{Sandbox, SandboxOutput, StubEnv};

const ANSWER_ELEMENT: &str = "jschl-answer";

/// Sends requests and solves whatever challenges come back.
pub struct ChallengeResolver {
    transport: Arc<dyn Transport>,
    config: ChallengeConfig,
    sandbox: Sandbox,
    browser: Option<Arc<dyn BrowserFallback>>,
}

impl ChallengeResolver {
    pub fn new(transport: Arc<dyn Transport>, config: ChallengeConfig) -> Self {
        let sandbox = Sandbox::new(config.sandbox_timeout());
        Self {
            transport,
            config,
            sandbox,
            browser: None,
        }
    }

    pub fn with_browser(mut self, browser: Arc<dyn BrowserFallback>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn config(&self) -> &ChallengeConfig {
        &self.config
    }

    pub fn cookie_jar(&self) -> Arc<CookieJar> {
        self.transport.cookie_jar()
    }

    /// Issue `request`, solving challenges on the way.
    pub async fn request(&self, request: RequestConfig) -> Result<HttpResponse, ScrapeError> {
        let err = match self.resolve(&request).await {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };
        let Some(browser) = self.fallback_for(&request, &err) else {
            return Err(err);
        };

        warn!(url = %request.url, kind = %err.kind(), "Challenge not solved, retrying in browser");
        let jar = self.transport.cookie_jar();
        match browser.fetch(&request.url, &jar).await {
            Ok(response) => self.finish(&request, response),
            Err(fallback_err) => {
                warn!(url = %request.url, error = %fallback_err, "Browser fallback failed");
                Err(err)
            }
        }
    }

    fn fallback_for(
        &self,
        request: &RequestConfig,
        err: &ScrapeError,
    ) -> Option<&Arc<dyn BrowserFallback>> {
        if !self.config.browser_fallback || request.method != Method::GET {
            return None;
        }
        if !matches!(err.kind(), ErrorKind::Cloudflare | ErrorKind::Parser) {
            return None;
        }
        self.browser.as_ref()
    }

    async fn resolve(&self, original: &RequestConfig) -> Result<HttpResponse, ScrapeError> {
        let jar = self.transport.cookie_jar();
        // Held while answering so concurrent challenges on the same jar do
        // not overwrite each other's clearance cookies.
        let mut session = None;
        let mut remaining = self.config.challenges_to_solve;
        let mut rate_limit_retries = 0u32;
        let mut next = original.clone();

        loop {
            let response = self.transport.send(&next).await?;

            if response.status == 429 {
                if rate_limit_retries >= self.config.max_rate_limit_retries {
                    return Err(ScrapeError::Request {
                        cause: format!("still rate limited after {} retries", rate_limit_retries),
                        request: next.summary(),
                        response: Some(response.summary()),
                    });
                }
                let Some(wait) = response
                    .header("retry-after")
                    .and_then(|v| parse_retry_after(v, Utc::now()))
                else {
                    warn!(url = %next.url, "Rate limited without a usable Retry-After header");
                    return Err(ScrapeError::Request {
                        cause: "rate limited".to_string(),
                        request: next.summary(),
                        response: Some(response.summary()),
                    });
                };
                rate_limit_retries += 1;
                debug!(url = %next.url, wait_ms = wait.as_millis() as u64, "Rate limited, backing off");
                tokio::time::sleep(wait).await;
                continue;
            }

            if !is_protected(&response) {
                return self.finish(original, response);
            }

            let body = response.text();
            let challenge = classify(&response, &body);
            match challenge {
                Challenge::Direct => return self.finish(original, response),
                Challenge::Captcha => {
                    return Err(ScrapeError::Captcha {
                        request: next.summary(),
                        response: response.summary(),
                    })
                }
                Challenge::Error(code) => {
                    return Err(ScrapeError::cloudflare_code(
                        code,
                        next.summary(),
                        Some(response.summary()),
                    ))
                }
                Challenge::Iuam | Challenge::Redirect => {}
            }

            if remaining == 0 {
                return Err(ScrapeError::cloudflare(
                    "Cloudflare challenge loop",
                    next.summary(),
                    Some(response.summary()),
                ));
            }
            remaining -= 1;
            if session.is_none() {
                session = Some(jar.lock_session().await);
            }

            let page_url = Url::parse(&response.url).map_err(|e| {
                ScrapeError::parser(
                    format!("bad response url: {}", e),
                    next.summary(),
                    Some(response.summary()),
                )
            })?;

            next = if challenge == Challenge::Iuam {
                self.answer_iuam(original, &next, &response, &page_url, body)
                    .await?
            } else {
                self.follow_redirect(&jar, &next, &response, &page_url, &body)
                    .await?;
                original.clone()
            };
        }
    }

    async fn answer_iuam(
        &self,
        original: &RequestConfig,
        sent: &RequestConfig,
        response: &HttpResponse,
        page_url: &Url,
        body: String,
    ) -> Result<RequestConfig, ScrapeError> {
        let started = Instant::now();
        let parser_error =
            |cause: String| ScrapeError::parser(cause, sent.summary(), Some(response.summary()));

        let challenge =
            iuam::extract(&body, self.config.max_challenge_delay()).map_err(parser_error)?;
        let env = StubEnv::new(page_url, body);
        let output = self
            .run_script(challenge.script.clone(), env)
            .await
            .map_err(parser_error)?;
        let answer = output
            .element_value(ANSWER_ELEMENT)
            .unwrap_or(output.value.as_str())
            .to_string();
        let submission = challenge
            .form
            .submission(page_url, &answer, original)
            .map_err(parser_error)?;

        info!(
            url = %sent.url,
            delay_ms = challenge.delay.as_millis() as u64,
            "Answering JavaScript challenge"
        );
        tokio::time::sleep(challenge.delay.saturating_sub(started.elapsed())).await;
        Ok(submission)
    }

    async fn follow_redirect(
        &self,
        jar: &CookieJar,
        sent: &RequestConfig,
        response: &HttpResponse,
        page_url: &Url,
        body: &str,
    ) -> Result<(), ScrapeError> {
        let parser_error =
            |cause: String| ScrapeError::parser(cause, sent.summary(), Some(response.summary()));

        let script = redirect::extract_script(body).map_err(parser_error)?;
        let output = self
            .run_script(script, StubEnv::new(page_url, body))
            .await
            .map_err(parser_error)?;
        if output.cookies.is_empty() {
            return Err(parser_error("redirect script set no cookie".to_string()));
        }
        for raw in &output.cookies {
            if !jar.set(raw, page_url) {
                warn!(url = %page_url, cookie = %raw, "Ignoring unusable challenge cookie");
            }
        }
        info!(url = %sent.url, cookies = output.cookies.len(), "Followed redirect challenge");
        Ok(())
    }

    /// Evaluate a challenge script off the async runtime.
    async fn run_script(&self, script: String, env: StubEnv) -> Result<SandboxOutput, String> {
        let sandbox = self.sandbox.clone();
        tokio::task::spawn_blocking(move || sandbox.evaluate(&script, &env))
            .await
            .map_err(|e| format!("challenge evaluation aborted: {}", e))?
            .map_err(|e| format!("challenge script failed: {}", e))
    }

    fn finish(
        &self,
        request: &RequestConfig,
        mut response: HttpResponse,
    ) -> Result<HttpResponse, ScrapeError> {
        if self.config.decode_emails && response.is_html() {
            response.body = decode_emails(&response.text()).into_bytes();
        }
        if request.fail_on_status && !response.is_success() {
            return Err(ScrapeError::StatusCode {
                request: request.summary(),
                response: response.summary(),
            });
        }
        Ok(response)
    }
}
