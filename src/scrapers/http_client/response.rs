//! HTTP response wrapper.

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use super::RequestConfig;
use crate::scrapers::error::{excerpt, ResponseSummary, ScrapeError};

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            url: url.into(),
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Check if the response is successful.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Get the Content-Type header.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_html(&self) -> bool {
        self.content_type()
            .map_or(false, |ct| ct.to_ascii_lowercase().contains("text/html"))
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self, request: &RequestConfig) -> Result<T, ScrapeError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ScrapeError::transform(
                format!("invalid JSON: {}", e),
                request.summary(),
                Some(self.summary()),
            )
        })
    }

    pub fn summary(&self) -> ResponseSummary {
        ResponseSummary {
            status: self.status,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body_excerpt: excerpt(&self.text()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = HttpResponse::new(200, "https://example.com", "ok")
            .with_header("Content-Type", "text/html; charset=utf-8");
        assert_eq!(response.header("CONTENT-TYPE"), Some("text/html; charset=utf-8"));
        assert!(response.is_html());
        assert!(response.is_success());
    }

    #[test]
    fn test_json_failure_is_transform_error() {
        let request = RequestConfig::get("https://example.com/api");
        let response = HttpResponse::new(200, "https://example.com/api", "not json");
        let err = response.json::<serde_json::Value>(&request).unwrap_err();
        assert_eq!(err.kind(), crate::scrapers::error::ErrorKind::Transform);
    }
}
