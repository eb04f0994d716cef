//! Server targets

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Host and port of a telemetry server.
///
/// Deserializes from either `"host:port"` or `["host", port]`; serializes as
/// `"host:port"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Parse `host:port`, accepting bracketed IPv6 hosts (`[::1]:9000`).
    pub fn parse(text: &str) -> Option<Self> {
        let (host, port) = text.trim().rsplit_once(':')?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return None;
        }
        let port = port.parse().ok()?;
        Some(Self::new(host, port))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Serialize for ServerAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAddress {
    Pair(String, u16),
    Text(String),
}

impl<'de> Deserialize<'de> for ServerAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawAddress::deserialize(deserializer)? {
            RawAddress::Pair(host, port) => Ok(ServerAddress::new(host, port)),
            RawAddress::Text(text) => ServerAddress::parse(&text).ok_or_else(|| {
                serde::de::Error::custom(format!("invalid address '{}', expected host:port", text))
            }),
        }
    }
}

/// A configured server; `name` doubles as its output sub-directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTarget {
    pub name: String,
    pub address: ServerAddress,
}

impl ServerTarget {
    pub fn new(name: impl Into<String>, address: ServerAddress) -> Self {
        Self { name: name.into(), address }
    }
}
