//! Host identity: a fixed-size node identifier ordered by XOR distance,
//! paired with the node's reachable network address.

use std::fmt;
use std::net::SocketAddr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Fixed-size node identifier. Distance between two ids is their bytewise
/// XOR, compared big-endian, so "closer" means a longer shared prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostId(pub [u8; 32]);

impl HostId {
    pub const LEN: usize = 32;

    pub fn random() -> Self {
        let mut bytes = [0u8; Self::LEN];
        rand::thread_rng().fill(&mut bytes[..]);
        HostId(bytes)
    }

    /// All-zero id, used for bootstrap peers whose real id is not yet known.
    pub fn zero() -> Self {
        HostId([0u8; Self::LEN])
    }

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        HostId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// XOR distance to another id. The result compares as an unsigned
    /// big-endian integer via the derived array ordering.
    pub fn distance(&self, other: &HostId) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}

impl fmt::Debug for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostId({}...)", &self.to_hex()[..12])
    }
}

/// A known peer: identifier plus reachable address. Immutable once built.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub addr: SocketAddr,
}

impl Host {
    pub fn new(id: HostId, addr: SocketAddr) -> Self {
        Host { id, addr }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Host({}@{})", self.id, self.addr)
    }
}
