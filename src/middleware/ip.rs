//! Client IP resolution shared by the request identifier and the rate limiter.
//!
//! # Resolution Order
//!
//! 1. `X-Forwarded-For` (first hop), then `X-Real-IP`, but only when the
//!    socket peer is a trusted proxy, or when no trusted proxies are configured
//! 2. The socket peer address (`ConnectInfo<SocketAddr>`)
//! 3. [`UNKNOWN_IP`]
//!
//! # IP Spoofing
//!
//! With an empty trusted proxy list every forwarding header is believed, so a
//! client reaching the service directly can pick its own rate-limit key.
//! Production deployments behind a load balancer should set `TRUSTED_PROXIES`
//! to the balancer's network so forwarded values from anywhere else are ignored.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Fallback when no client IP can be determined.
///
/// All such requests share one rate-limit counter.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse `"10.0.0.0/8"`, `"::1/128"` or a bare address (implicit /32, /128).
    pub fn parse(cidr: &str) -> Option<Self> {
        let (addr, prefix) = match cidr.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr.trim(), None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Proxies whose forwarding headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether forwarding headers from `peer` should be believed.
    ///
    /// Always true when no ranges are configured. An unknown peer is only
    /// trusted in that case.
    pub fn trusts(&self, peer: Option<IpAddr>) -> bool {
        if self.ranges.is_empty() {
            return true;
        }
        peer.is_some_and(|ip| self.ranges.iter().any(|r| r.contains(&ip)))
    }
}

// =============================================================================
// Header Extraction
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForwardedIp<'a> {
    Xff(&'a str),
    RealIp(&'a str),
    None,
}

fn forwarded_ip<B>(req: &Request<B>) -> ForwardedIp<'_> {
    // "client, proxy1, proxy2": the first entry is the original client
    if let Some(value) = req.headers().get("x-forwarded-for")
        && let Ok(value) = value.to_str()
        && let Some(first) = value.split(',').next().map(str::trim)
        && !first.is_empty()
    {
        return ForwardedIp::Xff(first);
    }

    if let Some(value) = req.headers().get("x-real-ip")
        && let Ok(value) = value.to_str()
        && !value.trim().is_empty()
    {
        return ForwardedIp::RealIp(value.trim());
    }

    ForwardedIp::None
}

fn peer_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

// =============================================================================
// Public API
// =============================================================================

/// Resolve the client IP for `req`.
///
/// Returns `Cow::Borrowed(UNKNOWN_IP)` without allocating when nothing is known.
pub fn client_ip<B>(req: &Request<B>, trusted: &TrustedProxyConfig) -> Cow<'static, str> {
    let peer = peer_ip(req);

    match forwarded_ip(req) {
        ForwardedIp::Xff(ip) | ForwardedIp::RealIp(ip) if trusted.trusts(peer) => {
            Cow::Owned(ip.to_string())
        }
        ForwardedIp::Xff(ip) | ForwardedIp::RealIp(ip) => {
            debug!(
                forwarded = %ip,
                peer = ?peer,
                "Ignoring forwarding header from untrusted peer"
            );
            peer.map_or(Cow::Borrowed(UNKNOWN_IP), |p| Cow::Owned(p.to_string()))
        }
        ForwardedIp::None => {
            peer.map_or(Cow::Borrowed(UNKNOWN_IP), |p| Cow::Owned(p.to_string()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn with_peer(mut req: Request<Body>, peer: &str) -> Request<Body> {
        let addr: SocketAddr = peer.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    fn open() -> TrustedProxyConfig {
        TrustedProxyConfig::default()
    }

    #[test]
    fn test_xff_first_hop() {
        let req = Request::builder()
            .header("x-forwarded-for", "  192.168.1.1  , 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_ip(&req, &open()), "192.168.1.1");
    }

    #[test]
    fn test_real_ip_fallback() {
        let req = Request::builder()
            .header("x-real-ip", "::1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_ip(&req, &open()), "::1");
    }

    #[test]
    fn test_xff_priority_over_real_ip() {
        let req = Request::builder()
            .header("x-forwarded-for", "10.0.0.1")
            .header("x-real-ip", "192.168.1.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_ip(&req, &open()), "10.0.0.1");
    }

    #[test]
    fn test_empty_xff_falls_through_to_real_ip() {
        let req = Request::builder()
            .header("x-forwarded-for", "   ")
            .header("x-real-ip", "192.168.1.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_ip(&req, &open()), "192.168.1.1");
    }

    #[test]
    fn test_peer_address_without_headers() {
        let req = with_peer(Request::builder().body(Body::empty()).unwrap(), "1.2.3.4:5555");
        assert_eq!(client_ip(&req, &open()), "1.2.3.4");
    }

    #[test]
    fn test_unknown_is_borrowed() {
        let req = Request::builder().body(Body::empty()).unwrap();
        let ip = client_ip(&req, &open());
        assert_eq!(ip, UNKNOWN_IP);
        assert!(matches!(ip, Cow::Borrowed(_)));
    }

    #[test]
    fn test_untrusted_peer_headers_ignored() {
        let trusted = TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]);
        let req = with_peer(
            Request::builder()
                .header("x-forwarded-for", "6.6.6.6")
                .body(Body::empty())
                .unwrap(),
            "203.0.113.9:40000",
        );

        assert_eq!(client_ip(&req, &trusted), "203.0.113.9");
    }

    #[test]
    fn test_trusted_peer_headers_used() {
        let trusted = TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]);
        let req = with_peer(
            Request::builder()
                .header("x-forwarded-for", "198.51.100.7, 10.0.0.2")
                .body(Body::empty())
                .unwrap(),
            "10.0.0.2:40000",
        );

        assert_eq!(client_ip(&req, &trusted), "198.51.100.7");
    }

    #[test]
    fn test_trusted_list_without_peer_is_unknown() {
        let trusted = TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]);
        let req = Request::builder()
            .header("x-forwarded-for", "6.6.6.6")
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_ip(&req, &trusted), UNKNOWN_IP);
    }

    // ==========================================================================
    // CIDR Range Tests
    // ==========================================================================

    #[test]
    fn test_cidr_parse() {
        assert_eq!(CidrRange::parse("10.0.0.0/8").unwrap().prefix_len, 8);
        assert_eq!(CidrRange::parse("::1/128").unwrap().prefix_len, 128);
        assert_eq!(CidrRange::parse("192.168.1.1").unwrap().prefix_len, 32);
        assert!(CidrRange::parse("not-an-ip").is_none());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
    }

    #[test]
    fn test_cidr_contains() {
        let cidr = CidrRange::parse("192.168.1.0/24").unwrap();
        assert!(cidr.contains(&"192.168.1.254".parse().unwrap()));
        assert!(!cidr.contains(&"192.168.2.1".parse().unwrap()));
        assert!(!cidr.contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn test_cidr_zero_prefix_matches_all() {
        let cidr = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(cidr.contains(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_invalid_cidrs_are_skipped() {
        let config = TrustedProxyConfig::new(&["bogus".to_string()]);
        assert!(!config.is_enabled());
    }
}
