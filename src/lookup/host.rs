use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ApiError;

lazy_static! {
    // RFC 1035 labels with a 2-6 character alphabetic TLD.
    static ref HOSTNAME_RE: Regex =
        Regex::new(r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,6}$")
            .unwrap();
}

/// Accepts IP literals and well-formed hostnames; rejects anything that could
/// smuggle shell metacharacters or option flags into downstream tooling.
pub fn is_valid_host(host: &str) -> bool {
    if host.is_empty() || host.starts_with('-') {
        return false;
    }
    if host.chars().any(|c| ";|&`$()<>".contains(c)) {
        return false;
    }
    if host.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }
    HOSTNAME_RE.is_match(host)
}

pub fn validate_host(host: &str) -> Result<(), ApiError> {
    if is_valid_host(host) {
        Ok(())
    } else {
        Err(ApiError::Validation("invalid or malicious host".into()))
    }
}

pub fn validate_port(port: u16) -> Result<(), ApiError> {
    if port == 0 {
        return Err(ApiError::Validation(
            "port must be between 1 and 65535".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_hostnames_and_ips() {
        assert!(is_valid_host("example.com"));
        assert!(is_valid_host("sub.domain.example.co.uk"));
        assert!(is_valid_host("192.168.1.1"));
        assert!(is_valid_host("2001:db8::1"));
    }

    #[test]
    fn rejects_metacharacters() {
        assert!(!is_valid_host("example.com;rm"));
        assert!(!is_valid_host("a|b.com"));
        assert!(!is_valid_host("`evil`.com"));
        assert!(!is_valid_host("$(cmd).com"));
    }

    #[test]
    fn rejects_flag_like_and_malformed_input() {
        assert!(!is_valid_host(""));
        assert!(!is_valid_host("-rf.example.com"));
        assert!(!is_valid_host("no-tld"));
        assert!(!is_valid_host("ends.with.digit.123"));
        assert!(!is_valid_host("double..dot.com"));
    }

    #[test]
    fn port_zero_is_invalid() {
        assert!(validate_port(0).is_err());
        assert!(validate_port(1).is_ok());
        assert!(validate_port(65535).is_ok());
    }
}
