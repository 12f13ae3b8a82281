//! L2CAP connection client.
//!
//! This module drives one logical channel to a peer: connection setup, the
//! two-sided configuration handshake, fragmentation of outbound buffers to
//! the negotiated MTU, and congestion-based flow control of the outbound
//! queue.

use std::{
   cell::RefCell,
   collections::VecDeque,
   fmt, ptr,
   rc::{Rc, Weak},
};

use log::{debug, info, warn};

use crate::{
   bluetooth::{
      fragment::{Fragment, fragment},
      link::{LinkEvent, LinkLayer},
      protocol::{
         BdAddr, ChannelId, ConfigOptions, ConfigResponse, ConfigResult, ConfigResultCode,
         FlowControlMode, L2CAP_CONN_OK, Psm, SendStatus,
      },
      registry::ClientRegistry,
   },
   buffer::{Buffer, BufferArena},
   config::ClientConfig,
   error::{L2capError, Result},
   event::{CallbackSet, ClientCallbacks},
};

/// Traffic counters for the current connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
   pub fragments_sent: u64,
   pub bytes_sent: u64,
   pub congestion_events: u64,
   pub packets_completed: u64,
   pub packets_received: u64,
}

#[derive(Debug)]
struct ChannelState {
   local_channel_id: Option<ChannelId>,
   remote_mtu: u16,
   configured_self: bool,
   configured_peer: bool,
   is_congested: bool,
   outbound: VecDeque<Fragment>,
   stats: ChannelStats,
}

impl ChannelState {
   fn new(default_mtu: u16) -> Self {
      Self {
         local_channel_id: None,
         remote_mtu: default_mtu,
         configured_self: false,
         configured_peer: false,
         is_congested: false,
         outbound: VecDeque::new(),
         stats: ChannelStats::default(),
      }
   }

   const fn is_connected(&self) -> bool {
      self.local_channel_id.is_some() && self.configured_self && self.configured_peer
   }

   fn is_idle(&self) -> bool {
      self.local_channel_id.is_none() && !self.configured_self && !self.configured_peer
   }
}

/// Internal shared state for a client.
struct ClientInner {
   link: Rc<dyn LinkLayer>,
   registry: Weak<ClientRegistry>,
   arena: BufferArena,
   config: ClientConfig,
   callbacks: CallbackSet,
   state: RefCell<ChannelState>,
}

impl fmt::Debug for ClientInner {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("ClientInner")
         .field("config", &self.config)
         .field("state", &self.state)
         .finish_non_exhaustive()
   }
}

impl Drop for ClientInner {
   fn drop(&mut self) {
      if let Some(cid) = self.state.get_mut().local_channel_id.take() {
         debug!("Client dropped while holding {cid}");
         if !self.link.disconnect_request(cid) {
            warn!("Unable to tear down {cid}");
         }
      }
      if let Some(registry) = self.registry.upgrade() {
         registry.prune();
      }
   }
}

/// One L2CAP channel to a peer.
///
/// This type is cheaply cloneable; clones refer to the same channel. All
/// methods must be called from the context that delivers link events.
#[derive(Clone)]
pub struct ConnectionClient(Rc<ClientInner>);

/// Weak reference to a [`ConnectionClient`].
#[derive(Debug, Clone)]
pub struct WeakClient(Weak<ClientInner>);

impl WeakClient {
   pub fn new(client: &ConnectionClient) -> Self {
      Self(Rc::downgrade(&client.0))
   }

   pub fn upgrade(&self) -> Option<ConnectionClient> {
      self.0.upgrade().map(ConnectionClient)
   }

   pub(crate) fn is_alive(&self) -> bool {
      self.0.strong_count() > 0
   }

   pub(crate) fn refers_to(&self, client: &ConnectionClient) -> bool {
      ptr::eq(self.0.as_ptr(), Rc::as_ptr(&client.0))
   }
}

impl fmt::Debug for ConnectionClient {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      fmt::Debug::fmt(&self.0, f)
   }
}

impl ConnectionClient {
   /// Creates a disconnected client and adds it to `registry`.
   pub fn new(
      link: Rc<dyn LinkLayer>,
      registry: &Rc<ClientRegistry>,
      arena: BufferArena,
      config: ClientConfig,
      callbacks: impl ClientCallbacks + 'static,
   ) -> Result<Self> {
      config.validate()?;
      let client = Self(Rc::new(ClientInner {
         link,
         registry: Rc::downgrade(registry),
         arena,
         state: RefCell::new(ChannelState::new(config.default_mtu)),
         config,
         callbacks: Box::new(callbacks),
      }));
      registry.register(&client);
      Ok(client)
   }

   /// Disconnects and removes the client from its registry.
   ///
   /// Every clone of this handle shares the channel, so this ends the
   /// channel for all of them. A clone that connects again rejoins the
   /// registry.
   pub fn free(self) {
      self.disconnect();
      if let Some(registry) = self.0.registry.upgrade() {
         registry.unregister(&self);
      }
   }

   /// Local channel id, once the link layer has assigned one.
   pub fn local_channel_id(&self) -> Option<ChannelId> {
      self.0.state.borrow().local_channel_id
   }

   /// Largest payload the peer accepts per packet.
   pub fn remote_mtu(&self) -> u16 {
      self.0.state.borrow().remote_mtu
   }

   /// True once a channel is assigned and both sides are configured.
   pub fn is_connected(&self) -> bool {
      self.0.state.borrow().is_connected()
   }

   pub fn is_congested(&self) -> bool {
      self.0.state.borrow().is_congested
   }

   /// Fragments waiting for the link layer to accept them.
   pub fn queued_fragments(&self) -> usize {
      self.0.state.borrow().outbound.len()
   }

   pub fn stats(&self) -> ChannelStats {
      self.0.state.borrow().stats
   }

   pub fn config(&self) -> &ClientConfig {
      &self.0.config
   }

   /// Starts connecting to `psm` on `remote`.
   ///
   /// Success means the link layer accepted the request; the outcome is
   /// reported later through `connected` or `disconnected`.
   pub fn connect(&self, remote: BdAddr, psm: Psm) -> Result<()> {
      if remote.is_any() {
         return Err(L2capError::EmptyAddress);
      }
      if !self.0.state.borrow().is_idle() {
         return Err(L2capError::AlreadyConnecting);
      }

      let Some(cid) = self.0.link.connect(psm, remote) else {
         warn!("Link layer refused connection to {remote} psm {psm}");
         return Err(L2capError::ChannelUnavailable);
      };
      self.0.state.borrow_mut().local_channel_id = Some(cid);
      if let Some(registry) = self.0.registry.upgrade() {
         registry.register(self);
      }
      self.0.link.set_event_sink(cid, WeakClient::new(self));

      info!("Connecting to {remote} psm {psm} on {cid}");
      Ok(())
   }

   /// Tears the channel down and drops every queued fragment.
   ///
   /// Does not fire `disconnected`; the caller knows it asked for this.
   pub fn disconnect(&self) {
      let cid = self.reset();
      if let Some(cid) = cid {
         info!("Disconnecting {cid}");
         if !self.0.link.disconnect_request(cid) {
            warn!("Unable to send disconnect request for {cid}");
         }
      }
   }

   /// Queues `packet` for transmission, split to the remote MTU.
   ///
   /// Returns `Ok(false)` without touching the buffer while the link is
   /// congested; wait for `write_ready` before retrying. `Ok(true)` means
   /// the payload was queued, not that it was transmitted.
   pub fn write(&self, packet: &Buffer) -> Result<bool> {
      {
         let mut state = self.0.state.borrow_mut();
         if !state.is_connected() {
            return Err(L2capError::NotConnected);
         }
         if state.is_congested {
            return Ok(false);
         }
         let mtu = usize::from(state.remote_mtu);
         state.outbound.extend(fragment(&packet.bytes(), mtu));
      }
      self.dispatch_fragments();
      Ok(true)
   }

   /// Handles one event from the link layer for channel `cid`.
   ///
   /// Events for any channel other than the one currently assigned are
   /// dropped, so a late event from a closed channel cannot touch its
   /// successor.
   pub fn handle_event(&self, cid: ChannelId, event: LinkEvent<'_>) {
      if self.local_channel_id() != Some(cid) {
         debug!("Ignoring {} for stale {cid}", <&str>::from(&event));
         return;
      }

      match event {
         LinkEvent::ConnectCompleted { result } => self.on_connect_completed(cid, result),
         LinkEvent::PeerConfigRequest(options) => self.on_peer_config_request(cid, options),
         LinkEvent::ConfigCompleted(result) => self.on_config_completed(cid, result),
         LinkEvent::PeerDisconnect { ack_required } => self.on_peer_disconnect(cid, ack_required),
         LinkEvent::DisconnectCompleted => {
            info!("{cid} closed");
            self.reset();
            self.0.callbacks.disconnected(self);
         },
         LinkEvent::CongestionChanged { congested } => self.on_congestion_changed(cid, congested),
         LinkEvent::Inbound(bytes) => self.on_inbound_packet(cid, bytes),
         LinkEvent::TransmitCompleted { packets } => {
            self.0.state.borrow_mut().stats.packets_completed += u64::from(packets);
         },
      }
   }

   fn on_connect_completed(&self, cid: ChannelId, result: u16) {
      if result != L2CAP_CONN_OK {
         warn!("Connection on {cid} failed with result 0x{result:04x}");
         // Nothing was opened, so there is nothing to tear down.
         self.reset();
         self.0.callbacks.disconnected(self);
         return;
      }

      let options = ConfigOptions {
         mtu: Some(self.0.config.local_mtu),
         flow_control: Some(FlowControlMode::Basic),
         flush_timeout: self.0.config.flush_timeout_ms,
      };
      debug!("{cid} connected, requesting {options:?}");
      if !self.0.link.send_config_request(cid, &options) {
         warn!("Unable to send config request on {cid}");
         self.fail();
      }
   }

   fn on_peer_config_request(&self, cid: ChannelId, requested: ConfigOptions) {
      let min_mtu = self.0.config.min_mtu;
      let mut response = ConfigResponse {
         result: ConfigResultCode::Ok,
         options: ConfigOptions::default(),
      };

      if let Some(mtu) = requested.mtu
         && mtu < min_mtu
      {
         warn!("Peer on {cid} requested MTU {mtu}, proposing {min_mtu}");
         response.result = ConfigResultCode::UnacceptableParams;
         response.options.mtu = Some(min_mtu);
      }

      if let Some(mode) = requested.flow_control
         && mode != FlowControlMode::Basic
      {
         warn!("Peer on {cid} requested {mode} mode, falling back to basic");
         response.result = ConfigResultCode::UnacceptableParams;
         response.options.flow_control = Some(FlowControlMode::Basic);
      }

      if !self.0.link.send_config_response(cid, &response) {
         warn!("Unable to send config response on {cid}");
         self.fail();
         return;
      }
      if response.result != ConfigResultCode::Ok {
         return;
      }

      self.mark_configured(|state| {
         if let Some(mtu) = requested.mtu {
            state.remote_mtu = mtu;
         }
         state.configured_peer = true;
      });
   }

   fn on_config_completed(&self, cid: ChannelId, result: ConfigResult) {
      match result {
         ConfigResult::Ok(negotiated) => {
            debug!("{cid} configured with {negotiated:?}");
            self.mark_configured(|state| state.configured_self = true);
         },
         ConfigResult::Pending => debug!("{cid} configuration pending"),
         // No renegotiation; a rejected configuration ends the connection.
         ConfigResult::Unacceptable(proposed) => {
            warn!("Peer rejected configuration on {cid}, proposed {proposed:?}");
            self.fail();
         },
         ConfigResult::Failed(code) => {
            warn!("Configuration on {cid} failed with result 0x{code:04x}");
            self.fail();
         },
      }
   }

   fn on_peer_disconnect(&self, cid: ChannelId, ack_required: bool) {
      info!("Peer disconnected {cid}");
      if ack_required {
         self.0.link.disconnect_response(cid);
      }
      // The id is already invalid on the link; reset without a teardown request.
      self.reset();
      self.0.callbacks.disconnected(self);
   }

   fn on_congestion_changed(&self, cid: ChannelId, congested: bool) {
      {
         let mut state = self.0.state.borrow_mut();
         if congested && !state.is_congested {
            state.stats.congestion_events += 1;
         }
         state.is_congested = congested;
      }
      if congested {
         debug!("{cid} congested");
         return;
      }

      debug!("{cid} decongested, {} fragments queued", self.queued_fragments());
      self.dispatch_fragments();

      let ready = {
         let state = self.0.state.borrow();
         state.is_connected() && !state.is_congested
      };
      if ready {
         self.0.callbacks.write_ready(self);
      }
   }

   fn on_inbound_packet(&self, cid: ChannelId, bytes: &[u8]) {
      let buffer = match self.0.arena.alloc_copy(bytes) {
         Ok(Some(buffer)) => buffer,
         Ok(None) => {
            debug!("Ignoring empty packet on {cid}");
            return;
         },
         Err(e) => {
            warn!("Dropping inbound packet on {cid}: {e}");
            return;
         },
      };
      debug!("← {cid}: {}", hex::encode(bytes));
      self.0.state.borrow_mut().stats.packets_received += 1;

      self.0.callbacks.read_ready(self, &buffer);
      buffer.release();
   }

   /// Hands queued fragments to the link layer until it reports congestion.
   fn dispatch_fragments(&self) {
      loop {
         let (cid, fragment) = {
            let mut state = self.0.state.borrow_mut();
            if state.is_congested {
               return;
            }
            let Some(cid) = state.local_channel_id else {
               return;
            };
            let Some(fragment) = state.outbound.pop_front() else {
               return;
            };
            (cid, fragment)
         };

         let len = fragment.len() as u64;
         debug!("→ {cid}: {}", hex::encode(&fragment));
         let status = self.0.link.send_packet(cid, fragment);

         let mut state = self.0.state.borrow_mut();
         if state.local_channel_id != Some(cid) {
            return;
         }
         match status {
            SendStatus::Success => {
               state.stats.fragments_sent += 1;
               state.stats.bytes_sent += len;
            },
            SendStatus::Congested => {
               // The link layer keeps the fragment and sends it once it can.
               state.stats.fragments_sent += 1;
               state.stats.bytes_sent += len;
               state.stats.congestion_events += 1;
               state.is_congested = true;
               debug!("{cid} congested, {} fragments held back", state.outbound.len());
            },
            SendStatus::Failed => {
               drop(state);
               warn!("Failed to send fragment on {cid}");
               self.fail();
               return;
            },
         }
      }
   }

   /// Applies a configuration step and fires `connected` on the transition
   /// into the fully configured state.
   fn mark_configured(&self, apply: impl FnOnce(&mut ChannelState)) {
      let now_connected = {
         let mut state = self.0.state.borrow_mut();
         let was_connected = state.is_connected();
         apply(&mut *state);
         !was_connected && state.is_connected()
      };
      if now_connected {
         if let Some(cid) = self.local_channel_id() {
            info!("{cid} connected, remote MTU {}", self.remote_mtu());
         }
         self.0.callbacks.connected(self);
      }
   }

   /// Returns to the idle state; yields the channel that was assigned.
   fn reset(&self) -> Option<ChannelId> {
      let mut state = self.0.state.borrow_mut();
      if !state.outbound.is_empty() {
         debug!("Dropping {} queued fragments", state.outbound.len());
      }
      let cid = state.local_channel_id;
      *state = ChannelState::new(self.0.config.default_mtu);
      cid
   }

   /// Recovers from a negotiation or transport failure.
   fn fail(&self) {
      self.disconnect();
      self.0.callbacks.disconnected(self);
   }
}
