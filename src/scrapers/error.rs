//! Errors surfaced by the request layer and the challenge resolver.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of scrape error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Request,
    Captcha,
    Cloudflare,
    Parser,
    StatusCode,
    Transform,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Captcha => "captcha",
            Self::Cloudflare => "cloudflare",
            Self::Parser => "parser",
            Self::StatusCode => "status_code",
            Self::Transform => "transform",
        }
    }

    /// Whether the error means the toc source itself is broken.
    pub fn invalidates_source(&self) -> bool {
        matches!(self, Self::Parser | Self::Cloudflare)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    pub method: String,
    pub url: String,
}

/// The response that came back, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSummary {
    pub status: u16,
    pub url: String,
    pub headers: HashMap<String, String>,
    /// First few hundred characters of the body.
    pub body_excerpt: String,
}

const EXCERPT_CHARS: usize = 512;

pub(crate) fn excerpt(body: &str) -> String {
    body.chars().take(EXCERPT_CHARS).collect()
}

#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    #[error("request to {} failed: {cause}", .request.url)]
    Request {
        cause: String,
        request: RequestSummary,
        response: Option<ResponseSummary>,
    },

    #[error("captcha challenge at {}", .request.url)]
    Captcha {
        request: RequestSummary,
        response: ResponseSummary,
    },

    #[error("cloudflare error{} at {}: {reason}", .code.map(|c| format!(" {}", c)).unwrap_or_default(), .request.url)]
    Cloudflare {
        code: Option<u16>,
        reason: String,
        request: RequestSummary,
        response: Option<ResponseSummary>,
    },

    #[error("parser error at {}: {cause} (the site layout probably changed, please report this)", .request.url)]
    Parser {
        cause: String,
        request: RequestSummary,
        response: Option<ResponseSummary>,
    },

    #[error("unexpected status {} from {}", .response.status, .request.url)]
    StatusCode {
        request: RequestSummary,
        response: ResponseSummary,
    },

    #[error("failed to transform response from {}: {cause}", .request.url)]
    Transform {
        cause: String,
        request: RequestSummary,
        response: Option<ResponseSummary>,
    },
}

impl ScrapeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Request { .. } => ErrorKind::Request,
            Self::Captcha { .. } => ErrorKind::Captcha,
            Self::Cloudflare { .. } => ErrorKind::Cloudflare,
            Self::Parser { .. } => ErrorKind::Parser,
            Self::StatusCode { .. } => ErrorKind::StatusCode,
            Self::Transform { .. } => ErrorKind::Transform,
        }
    }

    pub fn request(&self) -> &RequestSummary {
        match self {
            Self::Request { request, .. }
            | Self::Captcha { request, .. }
            | Self::Cloudflare { request, .. }
            | Self::Parser { request, .. }
            | Self::StatusCode { request, .. }
            | Self::Transform { request, .. } => request,
        }
    }

    pub fn response(&self) -> Option<&ResponseSummary> {
        match self {
            Self::Captcha { response, .. } | Self::StatusCode { response, .. } => Some(response),
            Self::Request { response, .. }
            | Self::Cloudflare { response, .. }
            | Self::Parser { response, .. }
            | Self::Transform { response, .. } => response.as_ref(),
        }
    }

    pub fn request_failed(cause: impl Into<String>, request: RequestSummary) -> Self {
        Self::Request {
            cause: cause.into(),
            request,
            response: None,
        }
    }

    pub fn parser(
        cause: impl Into<String>,
        request: RequestSummary,
        response: Option<ResponseSummary>,
    ) -> Self {
        Self::Parser {
            cause: cause.into(),
            request,
            response,
        }
    }

    /// Cloudflare error with the reason looked up from its code.
    pub fn cloudflare_code(
        code: u16,
        request: RequestSummary,
        response: Option<ResponseSummary>,
    ) -> Self {
        Self::Cloudflare {
            code: Some(code),
            reason: super::cloudflare::error_reason(code)
                .unwrap_or("Unknown error")
                .to_string(),
            request,
            response,
        }
    }

    pub fn cloudflare(
        reason: impl Into<String>,
        request: RequestSummary,
        response: Option<ResponseSummary>,
    ) -> Self {
        Self::Cloudflare {
            code: None,
            reason: reason.into(),
            request,
            response,
        }
    }

    pub fn transform(
        cause: impl Into<String>,
        request: RequestSummary,
        response: Option<ResponseSummary>,
    ) -> Self {
        Self::Transform {
            cause: cause.into(),
            request,
            response,
        }
    }
}
