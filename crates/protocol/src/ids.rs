//! Client and capability registration identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a connected editor client.
///
/// Minted by the transport when a client connects. Ids are unique among
/// currently-connected clients; reuse after disconnect is permitted but
/// never happens in practice with random generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generate a fresh client id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a capability registration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CapabilityRegistrationId(u64);

impl CapabilityRegistrationId {
    /// Construct an id from its raw value. Intended for tests and for the
    /// generator; registrations obtained from the daemon carry ids minted
    /// by [`CapabilityIdGen`].
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CapabilityRegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic generator for capability registration ids.
///
/// Ids never repeat within a process lifetime. The generator is shared
/// between the session core (open-file auto-grants) and the transport
/// (explicit acquire requests), so a single instance must be used per
/// daemon.
#[derive(Debug, Default)]
pub struct CapabilityIdGen {
    next: AtomicU64,
}

impl CapabilityIdGen {
    /// Create a generator starting at id 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next registration id.
    pub fn next_id(&self) -> CapabilityRegistrationId {
        CapabilityRegistrationId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
