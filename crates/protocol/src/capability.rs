//! Capability grants and registrations.
//!
//! A capability is a named permission the daemon can grant to exactly one
//! client at a time. Each grant is recorded as a registration carrying a
//! unique id, used for later release or forced revocation.

use serde::{Deserialize, Serialize};

use crate::ids::CapabilityRegistrationId;
use crate::path::WorkspacePath;

/// A named permission grantable to a client.
///
/// Currently the only capability kind is exclusive write rights over a
/// workspace file. The tagged representation leaves room for further
/// kinds, each with its own conflict policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum Capability {
    /// Exclusive write rights over a workspace file.
    CanEdit(WorkspacePath),
}

impl Capability {
    /// The workspace path this capability covers.
    pub fn path(&self) -> &WorkspacePath {
        match self {
            Capability::CanEdit(path) => path,
        }
    }
}

/// Record of a single capability grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRegistration {
    /// Unique id for this grant.
    pub id: CapabilityRegistrationId,
    /// The granted capability.
    pub capability: Capability,
}

impl CapabilityRegistration {
    /// Create a registration for the given capability.
    pub fn new(id: CapabilityRegistrationId, capability: Capability) -> Self {
        Self { id, capability }
    }
}
