//! # editd Daemon Library
//!
//! This crate provides the daemon (server) functionality for editd,
//! arbitrating shared edit sessions for editor clients.
//!
//! ## Overview
//!
//! The daemon is the service editor clients attach to. It provides:
//!
//! - **Session Management**: Tracks connected clients, open buffers, and
//!   capability grants in one immutable environment value
//! - **Write Arbitration**: At most one client holds edit rights over a
//!   file at any instant; conflicting grants are revoked with a
//!   notification to the losing client
//! - **File Operations**: Open/read/write/create requests served against
//!   configured content roots with boundary validation
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                  Transport (TCP/JSON)                 │
//! │     one connection = one client = one command pump    │
//! ├───────────────────────────────────────────────────────┤
//! │                 Session Core (mailbox)                │
//! │   (Environment, Command) -> (Environment', Effects)   │
//! ├──────────────────────────┬────────────────────────────┤
//! │       Environment        │       File Access          │
//! │  clients · grants · bufs │   content-root confined    │
//! └──────────────────────────┴────────────────────────────┘
//! ```
//!
//! All session state lives in the [`session::Environment`]; the core
//! processes commands strictly one at a time and commits a new
//! environment value per command, so no locking is involved anywhere in
//! session management.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: The environment and the command loop
//! - [`files`]: File access providers
//! - [`transport`]: Newline-delimited JSON over TCP

pub mod config;
pub mod files;
pub mod session;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export session types for convenience
pub use session::{
    Command, Effect, Environment, SessionConfig, SessionCore, SessionGone, SessionHandle,
};

// Re-export files types for convenience
pub use files::{FileAccess, LocalFiles, MemoryFiles};
