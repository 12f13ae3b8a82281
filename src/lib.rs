//! L2CAP connection client over a reference-counted buffer arena.
//!
//! [`BufferArena`] hands out shared, tail-sliceable byte buffers.
//! [`ConnectionClient`] negotiates a channel with a peer through an abstract
//! [`LinkLayer`], fragments outbound buffers to the peer's MTU, and holds
//! fragments back while the link reports congestion. Link events are routed
//! to clients by channel id through a [`ClientRegistry`].
//!
//! Everything runs on one event context: no operation blocks, and none of
//! the types here are `Send`.

pub mod bluetooth;
pub mod buffer;
pub mod config;
pub mod error;
pub mod event;

pub use crate::{
   bluetooth::{
      l2cap::{ChannelStats, ConnectionClient, WeakClient},
      link::{LinkEvent, LinkLayer},
      protocol::{BdAddr, ChannelId, ConfigOptions, ConfigResult, Psm, SendStatus},
      registry::ClientRegistry,
   },
   buffer::{Buffer, BufferArena},
   config::ClientConfig,
   error::{L2capError, Result},
   event::ClientCallbacks,
};
