use std::fmt;
use url::{Host, Url};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum OriginError {
    #[error("malformed origin URI '{uri}': {reason}")]
    Malformed { uri: String, reason: String },
}

/// `scheme://fqdn[:port]` of a stored origin row. Bare IPv6 addresses are bracketed.
pub fn origin_uri(protocol: &str, fqdn: &str, port: Option<u16>) -> String {
    let host = if fqdn.contains(':') && !fqdn.starts_with('[') {
        format!("[{fqdn}]")
    } else {
        fqdn.to_string()
    };
    match port {
        Some(port) => format!("{protocol}://{host}:{port}"),
        None => format!("{protocol}://{host}"),
    }
}

/// Scheme, host and port of a delivery service's primary origin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginUri {
    pub scheme: String,
    /// Normalized host, IPv6 addresses without brackets.
    pub host: String,
    /// `None` only for schemes without a known default port.
    pub port: Option<u16>,
}

impl OriginUri {
    /// Parses `scheme://fqdn[:port]`, defaulting the port from the scheme when absent.
    pub fn parse(uri: &str) -> Result<Self, OriginError> {
        let malformed = |reason: &str| OriginError::Malformed {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(uri).map_err(|e| malformed(&e.to_string()))?;
        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(malformed("no host")),
        };

        Ok(Self::with_default_port(url.scheme(), host, url.port()))
    }

    /// Parses a stored origin row the same way as a delivery service's origin URI, so both
    /// produce the same [`OriginUri::authority`].
    pub fn from_parts(protocol: &str, fqdn: &str, port: Option<u16>) -> Result<Self, OriginError> {
        Self::parse(&origin_uri(protocol, fqdn, port))
    }

    fn with_default_port(scheme: &str, host: String, port: Option<u16>) -> Self {
        let port = port.or_else(|| match scheme {
            "http" => Some(80),
            "https" => Some(443),
            _ => {
                tracing::warn!(
                    scheme,
                    host = %host,
                    "origin has unknown scheme and no port, using as-is"
                );
                None
            }
        });

        OriginUri {
            scheme: scheme.to_string(),
            host,
            port,
        }
    }

    /// `host:port`, or just the host when the port is unknown.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match self.port {
            Some(port) => format!("{host}:{port}"),
            None => host,
        }
    }
}

impl fmt::Display for OriginUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}
