//! Outbound request guard.
//!
//! Every URL the scanner fetches, redirects included, goes through
//! [`SsrfGuard::validate_and_resolve`]. The address it returns is the one the
//! transport connects to, so a hostname cannot resolve to a public address
//! during validation and a private one during the request.

use async_trait::async_trait;
use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use url::{Host, Url};

/// Reasons a URL may not be fetched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SsrfError {
    /// The URL does not parse or has no host.
    #[error("Invalid URL host: {0}")]
    InvalidUrl(String),

    /// Only `http` and `https` are fetched.
    #[error("Only HTTP(S) URLs are allowed, got '{0}'")]
    UnsupportedScheme(String),

    /// DNS lookup failed or returned nothing.
    #[error("Unable to resolve host {host}: {reason}")]
    Resolution {
        /// Host that was looked up
        host: String,
        /// Resolver message
        reason: String,
    },

    /// The host is, or resolves to, a private or reserved address.
    #[error("Resolved IP {ip} for {host} is private or reserved")]
    PrivateAddress {
        /// Host that was checked
        host: String,
        /// Offending address
        ip: IpAddr,
    },
}

/// A validated destination with the address to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Host name as it appears in the URL (used for TLS and `Host:`)
    pub host: String,
    /// Explicit or scheme-default port
    pub port: u16,
    /// Address the connection must be pinned to
    pub ip: IpAddr,
}

impl ResolvedTarget {
    /// Socket address to pin the connection to.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Hostname lookup.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolve `host` to its addresses.
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

static BLOCKED_RANGES: LazyLock<Vec<IpNet>> = LazyLock::new(|| {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.0.0.0/24",
        "192.0.2.0/24",
        "192.168.0.0/16",
        "198.18.0.0/15",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "224.0.0.0/4",
        "240.0.0.0/4",
        "::/128",
        "::1/128",
        "64:ff9b::/96",
        "100::/64",
        "2001:db8::/32",
        "fc00::/7",
        "fe80::/10",
        "ff00::/8",
    ]
    .into_iter()
    .filter_map(|cidr| cidr.parse().ok())
    .collect()
});

/// Whether `ip` is loopback, link-local, private or otherwise reserved.
///
/// IPv4-mapped IPv6 addresses are judged by their IPv4 form.
#[must_use]
pub fn is_private_or_reserved(ip: IpAddr) -> bool {
    let ip = match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        v4 @ IpAddr::V4(_) => v4,
    };
    BLOCKED_RANGES.iter().any(|net| net.contains(&ip))
}

/// Validates outbound URLs and pins them to a vetted address.
#[derive(Clone)]
pub struct SsrfGuard {
    resolver: Arc<dyn HostResolver>,
    allow_private_network: bool,
}

impl std::fmt::Debug for SsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsrfGuard")
            .field("allow_private_network", &self.allow_private_network)
            .finish_non_exhaustive()
    }
}

impl SsrfGuard {
    /// Guard using the system resolver.
    #[must_use]
    pub fn new(allow_private_network: bool) -> Self {
        Self::with_resolver(Arc::new(SystemResolver), allow_private_network)
    }

    /// Guard using a custom resolver.
    #[must_use]
    pub fn with_resolver(resolver: Arc<dyn HostResolver>, allow_private_network: bool) -> Self {
        Self {
            resolver,
            allow_private_network,
        }
    }

    /// Check `url` and pick the address to connect to.
    ///
    /// Unless private networks are allowed, the URL is rejected if any
    /// address its host resolves to is private or reserved.
    ///
    /// # Errors
    /// Returns an [`SsrfError`] describing why the URL may not be fetched.
    pub async fn validate_and_resolve(&self, url: &str) -> Result<ResolvedTarget, SsrfError> {
        let parsed = Url::parse(url).map_err(|e| SsrfError::InvalidUrl(format!("{url}: {e}")))?;

        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(SsrfError::UnsupportedScheme(scheme.to_string()));
        }

        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| SsrfError::InvalidUrl(url.to_string()))?;

        let (host, addresses) = match parsed.host() {
            Some(Host::Ipv4(v4)) => (v4.to_string(), vec![IpAddr::V4(v4)]),
            Some(Host::Ipv6(v6)) => (v6.to_string(), vec![IpAddr::V6(v6)]),
            Some(Host::Domain(domain)) if !domain.is_empty() => {
                let addresses = self.resolver.resolve(domain, port).await.map_err(|e| {
                    SsrfError::Resolution {
                        host: domain.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                (domain.to_string(), addresses)
            }
            _ => return Err(SsrfError::InvalidUrl(url.to_string())),
        };

        let Some(&ip) = addresses.first() else {
            return Err(SsrfError::Resolution {
                host,
                reason: "no addresses returned".to_string(),
            });
        };

        if !self.allow_private_network {
            if let Some(&blocked) = addresses.iter().find(|ip| is_private_or_reserved(**ip)) {
                tracing::warn!(host = %host, ip = %blocked, "blocked private or reserved destination");
                return Err(SsrfError::PrivateAddress { host, ip: blocked });
            }
        }

        Ok(ResolvedTarget { host, port, ip })
    }
}
