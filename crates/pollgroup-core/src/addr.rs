//! Transport addresses
//!
//! `HostAddr` stores the host part of a transport address in a fixed,
//! zero-padded buffer. Two addresses are equal only if every byte of the
//! buffer matches, which gives the affinity cache an exact fixed-length
//! comparison that cannot be fooled by trailing garbage.

use core::fmt;

use crate::error::AddrError;
use crate::ids::TransportKind;

/// Maximum length of a transport address string (excluding the terminator).
pub const TRADDR_MAX_LEN: usize = 256;

/// Fixed-length host address (IP address, RDMA GID, ...).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostAddr {
    bytes: [u8; TRADDR_MAX_LEN + 1],
    len: u16,
}

impl HostAddr {
    /// Build from a string. Fails if it does not fit or contains NUL.
    pub fn new(addr: &str) -> Result<Self, AddrError> {
        let raw = addr.as_bytes();
        if raw.len() > TRADDR_MAX_LEN {
            return Err(AddrError::TooLong {
                len: raw.len(),
                max: TRADDR_MAX_LEN,
            });
        }
        if raw.contains(&0) {
            return Err(AddrError::InteriorNul);
        }
        let mut bytes = [0u8; TRADDR_MAX_LEN + 1];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self {
            bytes,
            len: raw.len() as u16,
        })
    }

    pub fn as_str(&self) -> &str {
        // Built from a &str, so the prefix is always valid UTF-8.
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostAddr").field(&self.as_str()).finish()
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full transport address of a peer.
///
/// Only `traddr` identifies the host; `trsvcid` (port / service id) differs
/// between connections of the same host and is not used for placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportAddr {
    pub kind: TransportKind,
    pub traddr: HostAddr,
    pub trsvcid: String,
}

impl TransportAddr {
    pub fn new(kind: TransportKind, traddr: &str, trsvcid: &str) -> Result<Self, AddrError> {
        Ok(Self {
            kind,
            traddr: HostAddr::new(traddr)?,
            trsvcid: trsvcid.to_string(),
        })
    }
}

impl fmt::Display for TransportAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.traddr, self.trsvcid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_addr_roundtrip() {
        let a = HostAddr::new("192.168.1.10").unwrap();
        assert_eq!(a.as_str(), "192.168.1.10");
        assert_eq!(a.len(), 12);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_exact_comparison() {
        let a = HostAddr::new("10.0.0.1").unwrap();
        let b = HostAddr::new("10.0.0.1").unwrap();
        let c = HostAddr::new("10.0.0.10").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_limits() {
        let max = "a".repeat(TRADDR_MAX_LEN);
        assert!(HostAddr::new(&max).is_ok());

        let long = "a".repeat(TRADDR_MAX_LEN + 1);
        assert_eq!(
            HostAddr::new(&long),
            Err(AddrError::TooLong {
                len: TRADDR_MAX_LEN + 1,
                max: TRADDR_MAX_LEN
            })
        );
        assert_eq!(HostAddr::new("10.0\0.1"), Err(AddrError::InteriorNul));
    }

    #[test]
    fn test_port_not_part_of_host() {
        let a = TransportAddr::new(TransportKind::TCP, "10.0.0.1", "4420").unwrap();
        let b = TransportAddr::new(TransportKind::TCP, "10.0.0.1", "4421").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.traddr, b.traddr);
        assert_eq!(a.to_string(), "TCP:10.0.0.1:4420");
    }
}
