//! Mirror peer addressing.
//!
//! Peers exchange `(host, port)` pairs on the wire; the registry and the
//! executor key everything by the canonical `host:port` string.  IPv6 hosts
//! are bracketed so the string always splits back into the same pair.

use {
    crate::error::{MirrorError, Result},
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// A remote mirror gateway endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerTarget {
    pub host: String,
    pub port: u16,
}

impl PeerTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses a canonical `host:port` address.
    pub fn from_addr(addr: &str) -> Result<Self> {
        let (host, port) = split_host_port(addr)?;
        Ok(Self { host, port })
    }

    /// The canonical `host:port` key for this target.
    pub fn addr(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

impl fmt::Display for PeerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr())
    }
}

/// Joins a host and port into `host:port`, bracketing hosts that contain a
/// colon.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Splits `host:port` or `[host]:port` back into its parts.
pub fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let invalid = || MirrorError::InvalidAddr(addr.to_owned());

    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
        if host.contains(['[', ']']) {
            return Err(invalid());
        }
        (host, port)
    } else {
        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        // unbracketed IPv6
        if host.contains([':', '[', ']']) {
            return Err(invalid());
        }
        (host, port)
    };

    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_owned(), port))
}

/// Parses a list of canonical addresses, failing on the first bad one.
pub fn parse_addrs<S: AsRef<str>>(addrs: &[S]) -> Result<Vec<PeerTarget>> {
    addrs
        .iter()
        .map(|addr| PeerTarget::from_addr(addr.as_ref()))
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────────────
