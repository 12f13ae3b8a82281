//! Application-facing notifications from a connection client.
//!
//! This module provides the callback interface through which a
//! [`ConnectionClient`] reports connection state changes, inbound data, and
//! write readiness.

use crate::{bluetooth::l2cap::ConnectionClient, buffer::Buffer};

/// Handlers invoked by a [`ConnectionClient`].
///
/// Handlers may call back into the client (for example `write` from
/// `write_ready`); any state a handler needs travels in the implementing type.
pub trait ClientCallbacks {
   /// Both sides of the channel are configured.
   fn connected(&self, client: &ConnectionClient);

   /// The channel went away, whether through the peer, the link layer, or a
   /// failed negotiation.
   fn disconnected(&self, client: &ConnectionClient);

   /// An inbound packet arrived. `buffer` is released when this returns;
   /// take an alias to keep it.
   fn read_ready(&self, client: &ConnectionClient, buffer: &Buffer);

   /// Congestion cleared and the outbound queue drained.
   fn write_ready(&self, client: &ConnectionClient);
}

/// Type alias for the boxed handler set owned by a client.
pub type CallbackSet = Box<dyn ClientCallbacks>;
