//! Peer identity and tick numbering.

use std::fmt;

/// Simulation tick counter.
///
/// Tick `0` is the initial state; tick `n` is the state after `n` steps.
pub type Tick = u64;

/// Session-unique participant identifier.
///
/// The host is always [`PeerId::HOST`]. Client ids are handed out by the
/// transport on connect and are never reused within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub i32);

impl PeerId {
    /// The authoritative host.
    pub const HOST: Self = Self(0);

    /// The local client, before an id has been assigned.
    ///
    /// Also used as the peer of a desync a client reports against the host.
    pub const LOCAL: Self = Self(-1);

    /// Returns true for the host id.
    #[inline]
    #[must_use]
    pub const fn is_host(self) -> bool {
        self.0 == 0
    }

    /// Returns true if this id was assigned by a host.
    #[inline]
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 >= 0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::LOCAL
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_and_local() {
        assert!(PeerId::HOST.is_host());
        assert!(PeerId::HOST.is_assigned());
        assert!(!PeerId::LOCAL.is_assigned());
        assert_eq!(PeerId::default(), PeerId::LOCAL);
        assert_eq!(PeerId(3).to_string(), "peer#3");
    }
}
