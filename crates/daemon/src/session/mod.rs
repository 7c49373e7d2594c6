//! Edit-session management.
//!
//! This module is the daemon's core: [`environment`] holds the immutable
//! session state (connected clients, capability grants, open buffers) and
//! [`core`] drives it with a single-consumer command loop.

pub mod core;
pub mod environment;

pub use self::core::{Command, Effect, SessionConfig, SessionCore, SessionGone, SessionHandle};
pub use self::environment::{Buffer, Client, DuplicateClient, Environment, OpenBuffer};
