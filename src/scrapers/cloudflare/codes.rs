//! Cloudflare error codes and their meaning.

/// Human readable reason for a Cloudflare error code.
pub fn error_reason(code: u16) -> Option<&'static str> {
    let reason = match code {
        520 => "Web server is returning an unknown error",
        521 => "Web server is down",
        522 => "Connection timed out",
        523 => "Origin is unreachable",
        524 => "A timeout occurred",
        525 => "SSL handshake failed",
        526 => "Invalid SSL certificate",
        527 => "Railgun listener to origin error",
        530 => "Origin DNS error",
        1000 => "DNS points to prohibited IP",
        1001 => "DNS resolution error",
        1002 => "Restricted or DNS points to prohibited IP",
        1003 => "Access Denied: Direct IP Access Not Allowed",
        1004 => "Host Not Configured to Serve Web Traffic",
        1005 => "Access Denied: Autonomous System Number (ASN) Blocked",
        1006..=1008 => "Access Denied: Your IP address has been banned",
        1010 => "The owner of this website has banned your access based on your browser's signature",
        1011 => "Access Denied (Hotlinking Denied)",
        1012 => "Access Denied",
        1013 => "HTTP hostname and TLS SNI hostname mismatch",
        1014 => "CNAME Cross-User Banned",
        1015 => "You are being rate limited",
        1016 => "Origin DNS error",
        1018 => "Domain is misconfigured",
        1019 => "Compute server error",
        1020 => "Access Denied (Custom Firewall Rules)",
        _ => return None,
    };
    Some(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banned_range() {
        for code in 1006..=1008 {
            assert_eq!(
                error_reason(code),
                Some("Access Denied: Your IP address has been banned")
            );
        }
        assert_eq!(error_reason(1009), None);
        assert_eq!(error_reason(404), None);
    }
}
