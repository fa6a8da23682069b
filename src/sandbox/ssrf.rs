//! SSRF hardening for the extension sandbox. An allow-listed pattern match
//! is a statement about the extension's *intent*; this module re-validates
//! the actual network destination, including every redirect hop, before a
//! request is allowed to leave the process.

use std::net::IpAddr;
use std::time::Duration;

pub const MAX_RESPONSE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_REDIRECTS: usize = 5;

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[').and_then(|s| s.strip_suffix(']')).unwrap_or(host)
}

fn canonicalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// True if `host` resolves (syntactically, or by well-known TLD) to a
/// loopback/private/link-local destination.
pub fn is_private_host(host: &str) -> bool {
    let host = strip_brackets(host);

    if host == "localhost" || host == "host.docker.internal" {
        return true;
    }

    if let Ok(raw_ip) = host.parse::<IpAddr>() {
        let ip = canonicalize_ip(raw_ip);
        return match ip {
            IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
            IpAddr::V6(v6) => {
                v6.is_loopback()
                    || v6.segments()[0] == 0xfe80
                    || v6.segments()[0] & 0xfe00 == 0xfc00
            }
        };
    }

    host.ends_with(".local") || host.ends_with(".internal")
}

/// True if `host` is a known cloud-metadata endpoint.
pub fn is_metadata_host(host: &str) -> bool {
    let host = strip_brackets(host);

    if matches!(host, "169.254.169.254" | "metadata.google.internal" | "100.100.100.200")
        || host.starts_with("fd00:")
    {
        return true;
    }

    if let Ok(raw_ip) = host.parse::<IpAddr>() {
        if let IpAddr::V4(v4) = canonicalize_ip(raw_ip) {
            let octets = v4.octets();
            if octets == [169, 254, 169, 254] || octets == [100, 100, 100, 200] {
                return true;
            }
        }
    }

    false
}

/// Build a `reqwest::Client` whose redirect policy re-validates every hop
/// against the metadata/anti-relay rules, regardless of the policy applied
/// to the initial URL (an open redirect must not become an SSRF bypass).
pub fn build_client(own_http_port: u16, timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::custom(move |attempt| {
            let url = attempt.url();
            if let Some(host) = url.host_str() {
                if is_metadata_host(host) {
                    return attempt.error("redirect to metadata endpoint blocked");
                }
                if let Some(port) = url.port_or_known_default() {
                    if is_private_host(host) && port == own_http_port {
                        return attempt.error("redirect to own HTTP listener blocked (anti-relay)");
                    }
                }
            }
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.stop()
            } else {
                attempt.follow()
            }
        }))
        .build()
}

/// Reject a target before it ever reaches the allow-list matcher: wrong
/// scheme, metadata endpoint, or a relay attempt back at our own listener.
pub fn pre_flight_check(url: &url::Url, own_http_port: u16) -> Result<(), String> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    let host = url.host_str().ok_or_else(|| "URL has no host".to_string())?;
    if is_metadata_host(host) {
        return Err("target resolves to a cloud metadata endpoint".to_string());
    }
    if let Some(port) = url.port_or_known_default() {
        if is_private_host(host) && port == own_http_port {
            return Err("target resolves to this server's own HTTP listener".to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_and_private_ranges_are_private() {
        assert!(is_private_host("127.0.0.1"));
        assert!(is_private_host("10.0.0.5"));
        assert!(is_private_host("192.168.1.1"));
        assert!(is_private_host("localhost"));
        assert!(!is_private_host("8.8.8.8"));
        assert!(!is_private_host("api.example.com"));
    }

    #[test]
    fn metadata_hosts_detected() {
        assert!(is_metadata_host("169.254.169.254"));
        assert!(is_metadata_host("metadata.google.internal"));
        assert!(is_metadata_host("100.100.100.200"));
        assert!(!is_metadata_host("example.com"));
    }

    #[test]
    fn preflight_blocks_metadata_and_relay() {
        let meta = url::Url::parse("http://169.254.169.254/latest/meta-data").unwrap();
        assert!(pre_flight_check(&meta, 8787).is_err());

        let relay = url::Url::parse("http://127.0.0.1:8787/api/traces").unwrap();
        assert!(pre_flight_check(&relay, 8787).is_err());

        let ok = url::Url::parse("https://api.example.com/v1").unwrap();
        assert!(pre_flight_check(&ok, 8787).is_ok());
    }
}
