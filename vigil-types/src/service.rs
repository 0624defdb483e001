use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "tcp" => Some(Self::Tcp),
            "udp" => Some(Self::Udp),
            "sctp" => Some(Self::Sctp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Sctp => write!(f, "sctp"),
        }
    }
}

/// An open port and whatever the external tool said about the service on it.
///
/// Only open ports are ever represented; closed and filtered ports are
/// dropped by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub target: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Service name, e.g. "ssh" or "microsoft-ds".
    pub service: String,
    /// Product and version text, e.g. "OpenSSH 6.6.1p1 Ubuntu 2ubuntu2".
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

impl ServiceRecord {
    /// `port/protocol`, the location tag used on findings.
    pub fn location(&self) -> String {
        format!("{}/{}", self.port, self.protocol)
    }

    /// Identity of the socket this record describes.
    pub fn key(&self) -> (&str, u16, Protocol) {
        (self.target.as_str(), self.port, self.protocol)
    }
}
