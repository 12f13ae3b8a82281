//! Lookup of live clients by local channel id.
//!
//! The link layer reports every event against a channel id; the registry
//! resolves that id to the client currently holding it. Entries are weak, so
//! the registry never keeps a client alive.

use std::{cell::RefCell, rc::Rc};

use log::warn;

use crate::bluetooth::{
   l2cap::{ConnectionClient, WeakClient},
   link::LinkEvent,
   protocol::ChannelId,
};

/// Registry of live clients, shared with whatever drives the link layer.
#[derive(Debug, Default)]
pub struct ClientRegistry {
   clients: RefCell<Vec<WeakClient>>,
}

impl ClientRegistry {
   pub fn new() -> Rc<Self> {
      Rc::new(Self::default())
   }

   pub fn register(&self, client: &ConnectionClient) {
      let mut clients = self.clients.borrow_mut();
      if !clients.iter().any(|weak| weak.refers_to(client)) {
         clients.push(WeakClient::new(client));
      }
   }

   pub fn unregister(&self, client: &ConnectionClient) {
      self
         .clients
         .borrow_mut()
         .retain(|weak| weak.is_alive() && !weak.refers_to(client));
   }

   /// Finds the client whose channel is `cid`.
   pub fn find(&self, cid: ChannelId) -> Option<ConnectionClient> {
      self
         .clients
         .borrow()
         .iter()
         .filter_map(WeakClient::upgrade)
         .find(|client| client.local_channel_id() == Some(cid))
   }

   /// Number of registered clients still alive.
   pub fn len(&self) -> usize {
      self
         .clients
         .borrow()
         .iter()
         .filter(|weak| weak.is_alive())
         .count()
   }

   pub fn is_empty(&self) -> bool {
      self.len() == 0
   }

   /// Forwards `event` to the owner of `cid`.
   ///
   /// Returns false when no client holds `cid`; the event is dropped, since
   /// the channel was already torn down locally.
   pub fn dispatch(&self, cid: ChannelId, event: LinkEvent<'_>) -> bool {
      let Some(client) = self.find(cid) else {
         warn!("No client for {cid}, dropping {}", <&str>::from(&event));
         return false;
      };
      client.handle_event(cid, event);
      true
   }

   /// Drops entries whose client is gone.
   pub(crate) fn prune(&self) {
      // A drop can land while a lookup holds the list; the next prune catches it.
      if let Ok(mut clients) = self.clients.try_borrow_mut() {
         clients.retain(WeakClient::is_alive);
      }
   }
}
