use serde::{Deserialize, Serialize};
use std::fmt;

/// A replica's `(ip, port)` identity. Equality and hashing are by the pair only,
/// mirroring the original `Address` type this crate's RPCs were distilled from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub ip: String,
    pub port: u16,
}

impl Address {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    /// Dial string for `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Filesystem-safe id used as the stable storage filename stem.
    pub fn storage_id(&self) -> String {
        format!("{}_{}", self.ip, self.port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
