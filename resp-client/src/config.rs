//! # Client Configuration
//!
//! Connection settings for a single server. `ClientConfig` derives
//! `Deserialize` so host applications can embed it in their own config files;
//! timeouts are expressed in milliseconds there.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{ClientError, ClientResult};

/// Port used when a URL omits one.
pub const DEFAULT_PORT: u16 = 6379;

/// Configuration for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Optional TCP connect timeout.
    #[serde(rename = "connect_timeout_ms", deserialize_with = "millis")]
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout; an expired read fails the connection.
    #[serde(rename = "read_timeout_ms", deserialize_with = "millis")]
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    #[serde(rename = "write_timeout_ms", deserialize_with = "millis")]
    pub write_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Default settings pointed at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        }
    }

    /// Parses `redis://host[:port]` (or a bare `host[:port]`).
    ///
    /// Database selection and credentials are not supported and are rejected.
    pub fn from_url(url: &str) -> ClientResult<Self> {
        let invalid = |why: &str| ClientError::InvalidAddress(format!("{url}: {why}"));

        let rest = match url.split_once("://") {
            Some(("redis", rest)) => rest,
            Some((scheme, _)) => return Err(invalid(&format!("unsupported scheme {scheme:?}"))),
            None => url,
        };
        let authority = rest.strip_suffix('/').unwrap_or(rest);
        if authority.contains('/') {
            return Err(invalid("database selection is not supported"));
        }
        if authority.contains('@') {
            return Err(invalid("credentials are not supported"));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
                (host, port)
            }
            None => (authority, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(ClientConfig::new(format!("{host}:{port}")))
    }

    /// Resolves the configured address to the first socket address.
    pub fn socket_addr(&self) -> ClientResult<SocketAddr> {
        self.addr
            .to_socket_addrs()
            .map_err(|err| ClientError::InvalidAddress(format!("{}: {err}", self.addr)))?
            .next()
            .ok_or_else(|| ClientError::InvalidAddress(format!("{}: no addresses", self.addr)))
    }
}

fn millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_urls() {
        assert_eq!(ClientConfig::from_url("redis://cache:6380").unwrap().addr, "cache:6380");
        assert_eq!(ClientConfig::from_url("redis://cache/").unwrap().addr, "cache:6379");
        assert_eq!(ClientConfig::from_url("127.0.0.1:7000").unwrap().addr, "127.0.0.1:7000");
    }

    #[test]
    fn rejects_unsupported_urls() {
        for url in ["http://x:1", "redis://x:1/2", "redis://u:p@x:1", "redis://:1", "redis://x:port"] {
            let err = ClientConfig::from_url(url).unwrap_err();
            assert!(matches!(err, ClientError::InvalidAddress(_)), "{url}");
        }
    }

    #[test]
    fn deserializes_with_millisecond_timeouts() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"addr":"10.0.0.1:6379","read_timeout_ms":250}"#).unwrap();
        assert_eq!(config.addr, "10.0.0.1:6379");
        assert_eq!(config.read_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.connect_timeout, None);

        let defaults: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults, ClientConfig::default());
    }

    #[test]
    fn resolves_socket_address() {
        let addr = ClientConfig::new("127.0.0.1:6390").socket_addr().unwrap();
        assert_eq!(addr.port(), 6390);
        assert!(ClientConfig::new("not an address").socket_addr().is_err());
    }
}
