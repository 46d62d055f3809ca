//! Request layer: request description, transport trait and the reqwest client.

mod cookies;
mod response;
mod user_agent;

pub use cookies::{Cookie, CookieJar};
pub use response::HttpResponse;
pub use user_agent::UserAgent;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::debug;

use super::error::{RequestSummary, ScrapeError};
use super::request_queue::RequestQueue;

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
    Text(String),
}

/// How the caller intends to read the body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    #[default]
    Text,
    Json,
    Bytes,
}

/// Everything needed to issue one request.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub response_type: ResponseType,
    /// Turn non-2xx responses into `StatusCode` errors.
    pub fail_on_status: bool,
}

impl RequestConfig {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            response_type: ResponseType::Text,
            fail_on_status: true,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        let mut config = Self::new(Method::POST, url);
        config.body = Some(RequestBody::Form(form));
        config
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            method: self.method.to_string(),
            url: self.url.clone(),
        }
    }
}

/// Issues requests and owns the session cookie jar.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestConfig) -> Result<HttpResponse, ScrapeError>;

    fn cookie_jar(&self) -> Arc<CookieJar>;
}

/// reqwest-backed transport with per-host queueing.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    jar: Arc<CookieJar>,
    queue: RequestQueue,
}

impl HttpClient {
    /// `user_agent` is the raw `http.user_agent` config value, see [`UserAgent`].
    pub fn new(timeout: Duration, user_agent: Option<&str>, queue: RequestQueue) -> Self {
        let jar = Arc::new(CookieJar::new());
        let client = Client::builder()
            .user_agent(UserAgent::from_config(user_agent).header_value())
            .timeout(timeout)
            .cookie_provider(jar.clone())
            .gzip(true)
            .brotli(true)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, jar, queue }
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(&self, request: &RequestConfig) -> Result<HttpResponse, ScrapeError> {
        let ticket = self.queue.acquire(&request.url).await;

        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        match &request.body {
            Some(RequestBody::Form(pairs)) => builder = builder.form(pairs),
            Some(RequestBody::Text(text)) => builder = builder.body(text.clone()),
            None => {}
        }

        let start = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| ScrapeError::request_failed(e.to_string(), request.summary()))?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .and_modify(|existing: &mut String| {
                        existing.push_str(", ");
                        existing.push_str(v);
                    })
                    .or_insert_with(|| v.to_string());
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| ScrapeError::request_failed(e.to_string(), request.summary()))?
            .to_vec();

        self.queue.report(&ticket, status).await;
        debug!(
            method = %request.method,
            url = %request.url,
            status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request finished"
        );

        Ok(HttpResponse {
            status,
            url,
            headers,
            body,
        })
    }

    fn cookie_jar(&self) -> Arc<CookieJar> {
        self.jar.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_header_replaces() {
        let config = RequestConfig::get("https://example.com")
            .with_header("Referer", "a")
            .with_header("referer", "b");
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.header("REFERER"), Some("b"));
    }

    #[test]
    fn test_summary() {
        let config = RequestConfig::post_form("https://example.com/x", vec![]);
        let summary = config.summary();
        assert_eq!(summary.method, "POST");
        assert_eq!(summary.url, "https://example.com/x");
    }
}
