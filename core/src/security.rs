use std::net::{IpAddr, Ipv6Addr};
use url::Url;

/// Validates that `url` is safe to issue an outbound request to: the scheme
/// must be http/https (http gated behind `allow_http`), and the resolved
/// address must not be loopback, link-local, or private unless
/// `allow_private_ips` is set. Any parse or resolution failure is treated as
/// unsafe. `allow_private_ips` is a global bypass intended only for local
/// development and tests.
pub async fn is_safe_url(url: &str, allow_http: bool, allow_private_ips: bool) -> bool {
    if allow_private_ips {
        return true;
    }

    let Ok(parsed) = Url::parse(url) else {
        return false;
    };

    match parsed.scheme() {
        "https" => {}
        "http" if allow_http => {}
        _ => return false,
    }

    let Some(host) = parsed.host_str() else {
        return false;
    };

    let port = parsed.port_or_known_default().unwrap_or(443);
    let lookup_target = format!("{host}:{port}");

    match tokio::net::lookup_host(&lookup_target).await {
        Ok(addrs) => {
            let addrs: Vec<IpAddr> = addrs.map(|s| s.ip()).collect();
            if addrs.is_empty() {
                return false;
            }
            addrs.iter().all(|ip| !is_disallowed(ip))
        }
        Err(_) => false,
    }
}

fn is_disallowed(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || is_unique_local_v6(v6) || is_link_local_v6(v6)
        }
    }
}

/// `Ipv6Addr::is_unique_local` is not yet stable; fc00::/7 covers it.
fn is_unique_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

/// fe80::/10.
fn is_link_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        assert!(!is_safe_url("ftp://example.com/x", true, false).await);
    }

    #[tokio::test]
    async fn rejects_http_unless_allowed() {
        assert!(!is_safe_url("http://example.com/x", false, false).await);
    }

    #[tokio::test]
    async fn rejects_loopback_literal() {
        assert!(!is_safe_url("http://127.0.0.1/x", true, false).await);
    }

    #[tokio::test]
    async fn rejects_private_literal() {
        assert!(!is_safe_url("http://10.0.0.5/cb", true, false).await);
        assert!(!is_safe_url("http://192.168.1.5/cb", true, false).await);
    }

    #[tokio::test]
    async fn bypass_flag_short_circuits() {
        assert!(is_safe_url("http://10.0.0.5/cb", false, true).await);
    }

    #[test]
    fn disallows_ipv6_unique_local_and_link_local() {
        assert!(is_disallowed(&IpAddr::V6("fc00::1".parse().unwrap())));
        assert!(is_disallowed(&IpAddr::V6("fe80::1".parse().unwrap())));
        assert!(!is_disallowed(&IpAddr::V6(
            "2001:4860:4860::8888".parse().unwrap()
        )));
    }
}
