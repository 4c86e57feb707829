//! Scheme-qualified socket addresses (`tcp://host:port`).

use std::fmt;
use std::str::FromStr;

use crate::error::{RelayError, Result};

/// The only transport scheme the relay speaks.
pub const TCP_SCHEME: &str = "tcp";

/// A parsed `tcp://host:port` address.
///
/// A host of `*` (or an empty host) means "all interfaces" when listening.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parse an address, rejecting any scheme other than `tcp`.
    ///
    /// # Example
    ///
    /// ```
    /// use wrp_relay::transport::Endpoint;
    ///
    /// let ep = Endpoint::parse("tcp://127.0.0.1:6666").unwrap();
    /// assert_eq!(ep.port(), 6666);
    /// assert!(Endpoint::parse("ipc:///tmp/hub.sock").is_err());
    /// ```
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| RelayError::InvalidAddress(format!("missing scheme in {url:?}")))?;

        if scheme != TCP_SCHEME {
            return Err(RelayError::InvalidScheme(scheme.to_string()));
        }

        let rest = rest.trim_end_matches('/');
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| RelayError::InvalidAddress(format!("missing port in {url:?}")))?;

        let port = port
            .parse::<u16>()
            .map_err(|_| RelayError::InvalidAddress(format!("bad port in {url:?}")))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.contains('/') {
            return Err(RelayError::InvalidAddress(format!("bad host in {url:?}")));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Host part, without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the host means "all interfaces".
    pub fn is_wildcard(&self) -> bool {
        self.host.is_empty() || self.host == "*"
    }

    /// Same host, different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            host: self.host.clone(),
            port,
        }
    }

    /// Address suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        if self.is_wildcard() {
            format!("0.0.0.0:{}", self.port)
        } else {
            self.socket_addr()
        }
    }

    /// Address suitable for `TcpStream::connect`.
    pub fn connect_addr(&self) -> String {
        if self.is_wildcard() {
            format!("127.0.0.1:{}", self.port)
        } else {
            self.socket_addr()
        }
    }

    fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", TCP_SCHEME, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", TCP_SCHEME, self.host, self.port)
        }
    }
}
