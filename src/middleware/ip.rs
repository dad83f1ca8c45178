//! Client identity resolution.
//!
//! Every request gets a non-empty identity string. It keys the sliding-window
//! limiter and tags audit records.
//!
//! # Precedence
//!
//! 1. First entry of `X-Forwarded-For`, if non-empty after trimming
//! 2. `X-Real-IP`, if non-empty after trimming
//! 3. Transport peer IP from `ConnectInfo<SocketAddr>` (port dropped so the
//!    identity survives reconnects)
//! 4. [`UNKNOWN_IP`]
//!
//! # Spoofing
//!
//! Forwarding headers are client-controlled. With `TRUSTED_PROXIES` configured,
//! headers are only honoured when the peer address falls inside one of the
//! trusted CIDR ranges; otherwise the peer address itself is the identity.
//! When the peer address is unknown (tests, in-process calls) the headers are
//! used as-is.
//!
//! ```text
//!  peer ∈ trusted?  ──yes──▶  XFF ─▶ X-Real-IP ─▶ peer ─▶ "unknown"
//!        │
//!        no ───────────────▶  peer
//! ```

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Identity shared by every request whose origin cannot be determined.
///
/// All such requests are rate limited together. A high volume of
/// `"unknown"` traffic usually means a misconfigured proxy.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// A parsed CIDR block such as `10.0.0.0/8` or `::1/128`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation. A bare address is treated as a single-host block.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|&p| p <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                u32::from(net) & mask == u32::from(*addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                u128::from(net) & mask == u128::from(*addr) & mask
            }
            _ => false,
        }
    }
}

/// Set of reverse-proxy ranges whose forwarding headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether `ip` may supply forwarding headers. Everything is trusted when
    /// no ranges are configured.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Identity Resolution
// =============================================================================

/// Where a resolved identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source<'a> {
    ForwardedFor(&'a str),
    RealIp(&'a str),
    None,
}

fn header_source<B>(req: &Request<B>) -> Source<'_> {
    if let Some(value) = req.headers().get("x-forwarded-for")
        && let Ok(value) = value.to_str()
        && let Some(first) = value.split(',').next().map(str::trim)
        && !first.is_empty()
    {
        return Source::ForwardedFor(first);
    }

    if let Some(value) = req.headers().get("x-real-ip")
        && let Ok(value) = value.to_str()
        && !value.trim().is_empty()
    {
        return Source::RealIp(value.trim());
    }

    Source::None
}

/// Transport peer IP, if the server was started with connect info.
pub fn peer_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Derive the identity for `req`. Never returns an empty string.
pub fn resolve_client_identity<B>(
    req: &Request<B>,
    trusted_proxies: &TrustedProxyConfig,
) -> Cow<'static, str> {
    let peer = peer_ip(req);

    if let Some(ip) = peer
        && !trusted_proxies.is_trusted(&ip)
    {
        if !matches!(header_source(req), Source::None) {
            debug!(peer = %ip, "Ignoring forwarding headers from untrusted peer");
        }
        return Cow::Owned(ip.to_string());
    }

    match header_source(req) {
        Source::ForwardedFor(ip) | Source::RealIp(ip) => Cow::Owned(ip.to_string()),
        Source::None => match peer {
            Some(ip) => Cow::Owned(ip.to_string()),
            None => Cow::Borrowed(UNKNOWN_IP),
        },
    }
}
