//! Headless browser fallback for pages the challenge resolver cannot solve.
//!
//! The browser runs the page's real JavaScript. Whatever cookies it ends up
//! holding replace the contents of the shared jar, so plain HTTP requests
//! made afterwards look like the same session.

mod config;
#[cfg(feature = "browser")]
mod fetch;

pub use config::BrowserEngineConfig;
#[cfg(feature = "browser")]
pub use fetch::BrowserFetcher;

use async_trait::async_trait;

use super::error::{RequestSummary, ScrapeError};
use super::http_client::{Cookie, CookieJar, HttpResponse};

/// Re-fetches a URL through a real browser.
#[async_trait]
pub trait BrowserFallback: Send + Sync {
    /// Load `url` and return the rendered page. On success `jar` holds
    /// exactly the cookies the browser saw.
    async fn fetch(&self, url: &str, jar: &CookieJar) -> Result<HttpResponse, ScrapeError>;
}

/// Cookie observed by the browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
}

/// Replace the jar contents with the browser's cookies.
pub fn copy_cookies_into(jar: &CookieJar, cookies: &[BrowserCookie]) {
    jar.clear();
    for c in cookies {
        jar.insert(Cookie {
            name: c.name.clone(),
            value: c.value.clone(),
            domain: c.domain.trim_start_matches('.').to_ascii_lowercase(),
            include_subdomains: c.domain.starts_with('.'),
            path: if c.path.is_empty() {
                "/".to_string()
            } else {
                c.path.clone()
            },
            secure: c.secure,
            http_only: c.http_only,
            expires: None,
        });
    }
}

// Without the `browser` feature every fallback attempt fails.
#[cfg(not(feature = "browser"))]
pub struct BrowserFetcher;

#[cfg(not(feature = "browser"))]
impl BrowserFetcher {
    pub fn new(_config: BrowserEngineConfig) -> Self {
        Self
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl BrowserFallback for BrowserFetcher {
    async fn fetch(&self, url: &str, _jar: &CookieJar) -> Result<HttpResponse, ScrapeError> {
        Err(ScrapeError::request_failed(
            "tocwatch was built without the `browser` feature",
            RequestSummary {
                method: "GET".to_string(),
                url: url.to_string(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn test_copy_cookies_replaces_jar() {
        let jar = CookieJar::new();
        let u = Url::parse("https://www.example.com/").unwrap();
        jar.set("stale=1", &u);

        copy_cookies_into(
            &jar,
            &[BrowserCookie {
                name: "cf_clearance".to_string(),
                value: "abc".to_string(),
                domain: ".example.com".to_string(),
                path: "/".to_string(),
                secure: true,
                http_only: true,
            }],
        );

        let all = jar.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "cf_clearance");
        assert_eq!(jar.header_for(&u), Some("cf_clearance=abc".to_string()));
    }
}
