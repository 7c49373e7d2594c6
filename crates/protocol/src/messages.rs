//! Protocol message definitions for editd.
//!
//! This module defines all message types exchanged between the daemon and
//! editor clients. Messages are serialized as JSON; the daemon's transport
//! wraps each one in a newline-delimited [`Envelope`].

use serde::{Deserialize, Serialize};

use crate::capability::{Capability, CapabilityRegistration};
use crate::error::OperationError;
use crate::ids::CapabilityRegistrationId;
use crate::path::WorkspacePath;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Envelope wrapper for all protocol messages.
///
/// The envelope provides versioning and sequence numbers. A response
/// echoes the sequence number of the request it answers; notifications
/// carry a daemon-assigned sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Sequence number for request/response pairing.
    pub sequence: u64,
    /// The actual message payload.
    pub payload: Message,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
        }
    }
}

/// Top-level message enum containing all message types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    // File requests
    /// Request to open a file and join its shared buffer.
    OpenFile(OpenFile),
    /// Request to close a previously opened file.
    CloseFile(CloseFile),
    /// Request to read a file's on-disk content.
    ReadFile(ReadFile),
    /// Request to write content to a file on disk.
    WriteFile(WriteFile),
    /// Request to create a file or directory.
    CreateFile(CreateFile),

    // Capability requests
    /// Request exclusive edit rights, revoking any conflicting holder.
    AcquireCapability(AcquireCapability),
    /// Release a previously granted capability.
    ReleaseCapability(ReleaseCapability),

    // File responses
    /// Response to [`OpenFile`].
    OpenFileResponse(OpenFileResponse),
    /// Response to [`CloseFile`].
    CloseFileResult(CloseFileResult),
    /// Response to [`ReadFile`].
    ReadFileResult(ReadFileResult),
    /// Response to [`WriteFile`].
    WriteFileResult(WriteFileResult),
    /// Response to [`CreateFile`].
    CreateFileResult(CreateFileResult),

    // Notifications
    /// A capability was granted to the receiving client.
    CapabilityGranted(CapabilityGranted),
    /// A capability held by the receiving client was revoked by the daemon.
    CapabilityForceReleased(CapabilityForceReleased),

    // Control
    /// Ping for keepalive.
    Ping(Ping),
    /// Pong response to ping.
    Pong(Pong),
}

// ============================================================================
// File Messages
// ============================================================================

/// Request to open a file and join its shared buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFile {
    /// Path to open.
    pub path: WorkspacePath,
}

/// Request to close a previously opened file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseFile {
    /// Path to close.
    pub path: WorkspacePath,
}

/// Request to read a file's on-disk content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFile {
    /// Path to read.
    pub path: WorkspacePath,
}

/// Request to write content to a file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFile {
    /// Path to write.
    pub path: WorkspacePath,
    /// Content to write.
    #[serde(with = "serde_bytes")]
    pub content: Vec<u8>,
}

/// What kind of filesystem entry to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateKind {
    /// An empty regular file.
    File,
    /// A directory.
    Directory,
}

/// Descriptor for a creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFileDescriptor {
    /// Path to create.
    pub path: WorkspacePath,
    /// Entry kind.
    pub kind: CreateKind,
}

/// Request to create a file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFile {
    /// What to create.
    pub descriptor: CreateFileDescriptor,
}

/// A successfully opened file: the shared buffer plus the write
/// capability, when the opener was granted one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedFile {
    /// Buffer content as known to the daemon.
    #[serde(with = "serde_bytes")]
    pub content: Vec<u8>,
    /// Monotonic buffer version.
    pub version: u64,
    /// Write capability, granted iff no other client held one.
    pub write_capability: Option<CapabilityRegistration>,
}

/// Response to [`OpenFile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFileResponse {
    /// The opened buffer, or why opening failed.
    pub result: Result<OpenedFile, OperationError>,
}

/// Response to [`CloseFile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseFileResult {
    /// Unit on success.
    pub result: Result<(), OperationError>,
}

/// Response to [`ReadFile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFileResult {
    /// File content, or why reading failed.
    pub result: Result<ReadContent, OperationError>,
}

/// Content payload of a successful read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadContent {
    /// The bytes read.
    #[serde(with = "serde_bytes")]
    pub content: Vec<u8>,
}

/// Response to [`WriteFile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFileResult {
    /// Unit on success.
    pub result: Result<(), OperationError>,
}

/// Response to [`CreateFile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFileResult {
    /// Unit on success.
    pub result: Result<(), OperationError>,
}

// ============================================================================
// Capability Messages
// ============================================================================

/// Request exclusive edit rights over a file.
///
/// Any conflicting registration is force-released first; the grant itself
/// is announced with a [`CapabilityGranted`] notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireCapability {
    /// The capability being requested.
    pub capability: Capability,
}

/// Release a previously granted capability.
///
/// Releasing an unknown or non-owned registration is silently ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseCapability {
    /// Registration to release.
    pub id: CapabilityRegistrationId,
}

/// A capability was granted to the receiving client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityGranted {
    /// The new registration.
    pub registration: CapabilityRegistration,
}

/// A capability held by the receiving client was revoked by the daemon,
/// without the holder's request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityForceReleased {
    /// The revoked registration's id.
    pub id: CapabilityRegistrationId,
}

// ============================================================================
// Control Messages
// ============================================================================

/// Ping for keepalive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Sender timestamp (Unix epoch milliseconds), echoed back in the pong.
    pub timestamp: u64,
}

/// Pong response to ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// The timestamp carried by the ping being answered.
    pub timestamp: u64,
}
