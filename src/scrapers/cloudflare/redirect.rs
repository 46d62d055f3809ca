//! Cookie-setting redirect challenge.

use std::sync::OnceLock;

use base64::Engine;
use regex::Regex;

fn payload_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"S='([^']+)'").expect("valid regex"))
}

/// Decode the base64 script embedded in a redirect challenge page.
pub fn extract_script(body: &str) -> Result<String, String> {
    let encoded = payload_regex()
        .captures(body)
        .map(|c| c[1].to_string())
        .ok_or_else(|| "redirect payload not found".to_string())?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("redirect payload is not base64: {}", e))?;
    String::from_utf8(bytes).map_err(|_| "redirect payload is not UTF-8".to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// `document.cookie='sucuri_cloudproxy_uuid_0=abc123;path=/;max-age=86400';location.reload();`
    pub(crate) const REDIRECT_PAGE: &str = "<html><head><title>You are being redirected...</title>\
        <script>var s={},u,c,U,r,i,l=0,a,e=eval,w=String.fromCharCode,sucuri_cloudproxy_js='',\
        S='ZG9jdW1lbnQuY29va2llPSdzdWN1cmlfY2xvdWRwcm94eV91dWlkXzA9YWJjMTIzO3BhdGg9LzttYXgtYWdlPTg2NDAwJztsb2NhdGlvbi5yZWxvYWQoKTs=';\
        L=S.length;</script></head></html>";

    #[test]
    fn test_extract_script() {
        let script = extract_script(REDIRECT_PAGE).unwrap();
        assert_eq!(
            script,
            "document.cookie='sucuri_cloudproxy_uuid_0=abc123;path=/;max-age=86400';location.reload();"
        );
    }

    #[test]
    fn test_missing_payload() {
        assert!(extract_script("<html>You are being redirected</html>").is_err());
    }
}
