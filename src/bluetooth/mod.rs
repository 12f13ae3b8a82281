//! L2CAP channel layer.
//!
//! This module provides the connection client, the link-layer boundary it
//! talks through, and the registry that routes link events to clients.

pub mod fragment;
pub mod l2cap;
pub mod link;
pub mod protocol;
pub mod registry;

#[cfg(test)]
mod mock;
