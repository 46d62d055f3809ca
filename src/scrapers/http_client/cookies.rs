//! Shared cookie jar.
//!
//! reqwest's own jar can neither be listed nor cleared, and the browser
//! fallback needs both, so this one implements `CookieStore` directly.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use cookie::Cookie as RawCookie;
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use url::Url;

/// A stored cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lowercase host, without a leading dot.
    pub domain: String,
    /// Whether subdomains of `domain` match too.
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub expires: Option<DateTime<Utc>>,
}

impl Cookie {
    /// Parse a `Set-Cookie` header value received from `url`.
    ///
    /// Attribute and date syntax is left to the `cookie` crate, which also
    /// reads the `Sat, 18-Oct-25 10:30:00 GMT` form challenge origins send.
    pub fn parse(raw: &str, url: &Url) -> Option<Self> {
        let parsed = RawCookie::parse(raw).ok()?;
        if parsed.name().is_empty() {
            return None;
        }
        let host = url.host_str()?.to_ascii_lowercase();

        let (domain, include_subdomains) = match parsed.domain().filter(|d| !d.is_empty()) {
            Some(domain) => {
                let domain = domain.to_ascii_lowercase();
                // A site may only scope cookies to itself or a parent domain.
                if host != domain && !host.ends_with(&format!(".{}", domain)) {
                    return None;
                }
                (domain, true)
            }
            None => (host, false),
        };

        // Max-Age wins over Expires.
        let expires = match parsed.max_age() {
            Some(max_age) => Some(Utc::now() + Duration::seconds(max_age.whole_seconds())),
            None => parsed
                .expires_datetime()
                .and_then(|at| DateTime::from_timestamp(at.unix_timestamp(), 0)),
        };

        Some(Cookie {
            name: parsed.name().to_string(),
            value: parsed.value_trimmed().to_string(),
            domain,
            include_subdomains,
            path: parsed
                .path()
                .filter(|p| p.starts_with('/'))
                .map_or_else(|| default_path(url), str::to_string),
            secure: parsed.secure().unwrap_or(false),
            http_only: parsed.http_only().unwrap_or(false),
            expires,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map_or(false, |exp| exp <= now)
    }

    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let domain_ok = host == self.domain
            || (self.include_subdomains && host.ends_with(&format!(".{}", self.domain)));
        let path_ok = path_matches(url.path(), &self.path);
        let scheme_ok = !self.secure || url.scheme() == "https";
        domain_ok && path_ok && scheme_ok
    }

    fn same_slot(&self, other: &Cookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }
}

fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/')
                || request_path[cookie_path.len()..].starts_with('/')))
}

/// Cookie jar shared by the HTTP client, the challenge resolver and the
/// browser fallback.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Mutex<Vec<Cookie>>,
    session: AsyncMutex<()>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a cookie, replacing one with the same name, domain and path.
    pub fn insert(&self, cookie: Cookie) {
        let mut cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        cookies.retain(|c| !c.same_slot(&cookie));
        if !cookie.is_expired(Utc::now()) {
            cookies.push(cookie);
        }
    }

    /// Parse and store a `Set-Cookie` style string. Returns false if it was rejected.
    pub fn set(&self, raw: &str, url: &Url) -> bool {
        match Cookie::parse(raw, url) {
            Some(cookie) => {
                self.insert(cookie);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// All live cookies.
    pub fn all(&self) -> Vec<Cookie> {
        let now = Utc::now();
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| !c.is_expired(now))
            .cloned()
            .collect()
    }

    /// `Cookie` header value for a request to `url`.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let now = Utc::now();
        let cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        let pairs: Vec<String> = cookies
            .iter()
            .filter(|c| !c.is_expired(now) && c.matches(url))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    /// Hold exclusive use of the jar's session while a challenge or browser
    /// flow rewrites it.
    pub async fn lock_session(&self) -> MutexGuard<'_, ()> {
        self.session.lock().await
    }
}

impl CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        for header in cookie_headers {
            if let Ok(raw) = header.to_str() {
                self.set(raw, url);
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.header_for(url)
            .and_then(|value| HeaderValue::from_str(&value).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_set_and_match() {
        let jar = CookieJar::new();
        assert!(jar.set("cf_clearance=abc; Path=/; HttpOnly", &url("https://example.com/a/b")));
        assert_eq!(
            jar.header_for(&url("https://example.com/other")),
            Some("cf_clearance=abc".to_string())
        );
        assert_eq!(jar.header_for(&url("https://other.com/")), None);
    }

    #[test]
    fn test_domain_attribute_covers_subdomains() {
        let jar = CookieJar::new();
        jar.set("a=1; Domain=.example.com", &url("https://www.example.com/"));
        assert!(jar.header_for(&url("https://cdn.example.com/")).is_some());

        assert!(!jar.set("b=2; Domain=evil.com", &url("https://www.example.com/")));
    }

    #[test]
    fn test_replace_and_expire() {
        let jar = CookieJar::new();
        let u = url("https://example.com/");
        jar.set("a=1", &u);
        jar.set("a=2", &u);
        assert_eq!(jar.all().len(), 1);
        assert_eq!(jar.header_for(&u), Some("a=2".to_string()));

        jar.set("a=3; Max-Age=0", &u);
        assert!(jar.all().is_empty());
    }

    #[test]
    fn test_expires_dash_format() {
        let u = url("https://example.com/");
        let cookie = Cookie::parse(
            "cf_clearance=abc; Expires=Sat, 18-Oct-25 10:30:00 GMT; Path=/; HttpOnly",
            &u,
        )
        .unwrap();
        assert_eq!(
            cookie.expires.map(|e| e.to_rfc3339()),
            Some("2025-10-18T10:30:00+00:00".to_string())
        );
        assert!(cookie.http_only);

        let cookie = Cookie::parse("__cf_bm=x; expires=Thu, 01 Jan 1970 00:00:01 GMT", &u).unwrap();
        assert!(cookie.is_expired(Utc::now()));
    }

    #[test]
    fn test_secure_cookie_needs_https() {
        let jar = CookieJar::new();
        jar.set("s=1; Secure", &url("https://example.com/"));
        assert!(jar.header_for(&url("http://example.com/")).is_none());
    }

    #[test]
    fn test_clear() {
        let jar = CookieJar::new();
        jar.set("a=1", &url("https://example.com/"));
        jar.clear();
        assert!(jar.all().is_empty());
    }
}
