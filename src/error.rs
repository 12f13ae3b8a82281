//! Error types for the L2CAP client.
//!
//! This module defines every recoverable error the crate reports: buffer
//! exhaustion, connection setup refusals, write preconditions, and
//! configuration I/O.

use thiserror::Error;

/// Main error type for the L2CAP client.
#[derive(Error, Debug)]
pub enum L2capError {
   #[error("Buffer arena exhausted: requested {requested} bytes, {available} available")]
   BufferExhausted { requested: usize, available: usize },

   #[error("Invalid PSM: 0x{0:04x}")]
   InvalidPsm(u16),

   #[error("Remote address is empty")]
   EmptyAddress,

   #[error("Invalid remote address: {0}")]
   InvalidAddress(String),

   #[error("Already connecting")]
   AlreadyConnecting,

   #[error("Link layer could not allocate a channel")]
   ChannelUnavailable,

   #[error("Channel not connected")]
   NotConnected,

   #[error("Invalid configuration: {0}")]
   InvalidConfig(String),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),
}

/// Convenience type alias for Results with `L2capError`.
pub type Result<T> = std::result::Result<T, L2capError>;
