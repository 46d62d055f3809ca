//! Response classification.

use std::sync::OnceLock;

use regex::Regex;

use crate::scrapers::http_client::HttpResponse;

/// What kind of page came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Challenge {
    /// Not a challenge; hand the response to the caller.
    Direct,
    /// JavaScript arithmetic challenge ("I'm Under Attack" mode).
    Iuam,
    /// Cookie-setting redirect script.
    Redirect,
    Captcha,
    /// Cloudflare error page or an empty error response, with its code.
    Error(u16),
}

fn server_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(cloudflare|sucuri)").expect("valid regex"))
}

fn captcha_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)cdn-cgi/l/chk_captcha").expect("valid regex"))
}

fn error_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<\w+\s+class="cf-error-code">(.*)</\w+>"#).expect("valid regex")
    })
}

/// Whether the response comes from a recognised anti-bot front and is HTML.
pub fn is_protected(response: &HttpResponse) -> bool {
    let origin = response
        .header("server")
        .map_or(false, |s| server_regex().is_match(s.trim()))
        || response.header("x-sucuri-id").is_some()
        || response.header("x-sucuri-cache").is_some();
    origin && response.is_html()
}

/// Classify a protected response.
///
/// Terminal markers win over challenges: a captcha page served with 503 is a
/// captcha, not an arithmetic challenge.
pub fn classify(response: &HttpResponse, body: &str) -> Challenge {
    if response.status >= 400 && body.trim().is_empty() {
        return Challenge::Error(response.status);
    }
    if body.contains("why_captcha") || captcha_regex().is_match(body) {
        return Challenge::Captcha;
    }
    if let Some(code) = error_code_regex()
        .captures(body)
        .and_then(|c| c[1].trim().parse::<u16>().ok())
    {
        return Challenge::Error(code);
    }
    if body.contains("You are being redirected") || body.contains("sucuri_cloudproxy_js") {
        return Challenge::Redirect;
    }
    if body.contains("jschl-answer") || body.contains("jschl_answer") || response.status == 503 {
        return Challenge::Iuam;
    }
    Challenge::Direct
}
