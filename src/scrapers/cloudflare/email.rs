//! Cloudflare e-mail address obfuscation.
//!
//! Protected pages replace addresses with `data-cfemail` elements holding a
//! hex string: the first byte is an XOR key for the remaining bytes.

use std::sync::OnceLock;

use regex::{Captures, Regex};

fn element_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"<(?:a|span)\b[^>]*\bdata-cfemail="([0-9a-fA-F]+)"[^>]*>[^<]*</(?:a|span)>"#,
        )
        .expect("valid regex")
    })
}

/// Decode one `data-cfemail` value.
pub fn decode(hex: &str) -> Option<String> {
    if !hex.is_ascii() || hex.len() < 2 || hex.len() % 2 != 0 {
        return None;
    }
    let bytes: Vec<u8> = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
        .collect::<Result<_, _>>()
        .ok()?;
    let key = bytes[0];
    String::from_utf8(bytes[1..].iter().map(|b| b ^ key).collect()).ok()
}

/// Replace every obfuscated address in `body` with its plain text.
pub fn decode_emails(body: &str) -> String {
    element_regex()
        .replace_all(body, |caps: &Captures| {
            decode(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(key: u8, email: &str) -> String {
        std::iter::once(key)
            .chain(email.bytes().map(|b| b ^ key))
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode(&encode(0x42, "a@b.c")), Some("a@b.c".to_string()));
        assert_eq!(decode("4"), None);
        assert_eq!(decode("zz00"), None);
    }

    #[test]
    fn test_decode_emails_in_body() {
        let body = format!(
            r#"<p>Contact <a href="/cdn-cgi/l/email-protection" class="__cf_email__" data-cfemail="{}">[email&#160;protected]</a> now</p>"#,
            encode(0x13, "author@example.com")
        );
        assert_eq!(
            decode_emails(&body),
            "<p>Contact author@example.com now</p>"
        );
    }
}
