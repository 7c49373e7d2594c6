//! # editd Protocol Library
//!
//! This crate provides the protocol definitions shared between the editd
//! daemon and its editor clients.
//!
//! ## Overview
//!
//! The protocol crate is the foundation of editd's communication layer,
//! providing:
//!
//! - **Message Definitions**: All request, response, and notification types
//!   for file and capability operations
//! - **Identifiers**: Client ids and the monotonic capability registration
//!   id generator
//! - **Workspace Paths**: Root-relative file addressing with traversal-safe
//!   segment validation
//! - **Error Taxonomy**: Tagged failure values carried on response paths
//!
//! Everything in this crate is pure data: serde-serializable types with no
//! I/O and no async. Framing (newline-delimited JSON envelopes) is applied
//! by the daemon's transport.
//!
//! ## Modules
//!
//! - [`ids`]: Client and capability registration identifiers
//! - [`path`]: Workspace path addressing
//! - [`capability`]: Capability grants and registrations
//! - [`messages`]: Protocol message definitions
//! - [`error`]: Error types

pub mod capability;
pub mod error;
pub mod ids;
pub mod messages;
pub mod path;

pub use capability::{Capability, CapabilityRegistration};
pub use error::{FileSystemFailure, OperationError};
pub use ids::{CapabilityIdGen, CapabilityRegistrationId, ClientId};
pub use messages::{Envelope, Message, PROTOCOL_VERSION};
pub use path::{PathError, RootId, WorkspacePath};
