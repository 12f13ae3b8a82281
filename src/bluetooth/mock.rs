//! Scripted in-memory link layer and recording callbacks for tests.

use std::{
   cell::{Cell, RefCell},
   collections::VecDeque,
   rc::Rc,
};

use crate::{
   bluetooth::{
      fragment::Fragment,
      l2cap::{ConnectionClient, WeakClient},
      link::{LinkEvent, LinkLayer},
      protocol::{
         BdAddr, ChannelId, ConfigOptions, ConfigResponse, ConfigResult, L2CAP_CONN_OK, Psm,
         SendStatus,
      },
      registry::ClientRegistry,
   },
   buffer::{Buffer, BufferArena},
   config::ClientConfig,
   event::ClientCallbacks,
};

pub(crate) fn init_logging() {
   let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn remote() -> BdAddr {
   BdAddr([0x00, 0x1a, 0x7d, 0xda, 0x71, 0x13])
}

pub(crate) fn psm() -> Psm {
   Psm::new(0x1001).unwrap()
}

/// Link layer that records every request and replays scripted send results.
#[derive(Default)]
pub(crate) struct MockLink {
   last_cid: Cell<u16>,
   pub refuse_connect: Cell<bool>,
   pub fail_config_request: Cell<bool>,
   pub fail_config_response: Cell<bool>,
   pub fail_disconnect: Cell<bool>,
   send_script: RefCell<VecDeque<SendStatus>>,
   pub connects: RefCell<Vec<(Psm, BdAddr)>>,
   pub sinks: RefCell<Vec<(ChannelId, WeakClient)>>,
   pub config_requests: RefCell<Vec<(ChannelId, ConfigOptions)>>,
   pub config_responses: RefCell<Vec<(ChannelId, ConfigResponse)>>,
   pub disconnect_requests: RefCell<Vec<ChannelId>>,
   pub disconnect_responses: RefCell<Vec<ChannelId>>,
   pub sent: RefCell<Vec<(ChannelId, Fragment)>>,
}

impl MockLink {
   pub fn new() -> Rc<Self> {
      Rc::new(Self::default())
   }

   /// Queues results for the next `send_packet` calls; `Success` afterwards.
   pub fn script(&self, statuses: &[SendStatus]) {
      self.send_script.borrow_mut().extend(statuses.iter().copied());
   }

   pub fn sent_lengths(&self) -> Vec<usize> {
      self.sent.borrow().iter().map(|(_, f)| f.len()).collect()
   }

   pub fn sent_bytes(&self) -> Vec<u8> {
      self
         .sent
         .borrow()
         .iter()
         .flat_map(|(_, f)| f.iter().copied())
         .collect()
   }
}

impl LinkLayer for MockLink {
   fn connect(&self, psm: Psm, remote: BdAddr) -> Option<ChannelId> {
      self.connects.borrow_mut().push((psm, remote));
      if self.refuse_connect.get() {
         return None;
      }
      let cid = self.last_cid.get().max(0x003f) + 1;
      self.last_cid.set(cid);
      ChannelId::new(cid)
   }

   fn set_event_sink(&self, cid: ChannelId, sink: WeakClient) {
      self.sinks.borrow_mut().push((cid, sink));
   }

   fn send_config_request(&self, cid: ChannelId, options: &ConfigOptions) -> bool {
      self.config_requests.borrow_mut().push((cid, *options));
      !self.fail_config_request.get()
   }

   fn send_config_response(&self, cid: ChannelId, response: &ConfigResponse) -> bool {
      self.config_responses.borrow_mut().push((cid, *response));
      !self.fail_config_response.get()
   }

   fn disconnect_request(&self, cid: ChannelId) -> bool {
      self.disconnect_requests.borrow_mut().push(cid);
      !self.fail_disconnect.get()
   }

   fn disconnect_response(&self, cid: ChannelId) {
      self.disconnect_responses.borrow_mut().push(cid);
   }

   fn send_packet(&self, cid: ChannelId, fragment: Fragment) -> SendStatus {
      let status = self
         .send_script
         .borrow_mut()
         .pop_front()
         .unwrap_or(SendStatus::Success);
      if status != SendStatus::Failed {
         self.sent.borrow_mut().push((cid, fragment));
      }
      status
   }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Recorded {
   Connected,
   Disconnected,
   Read(Vec<u8>),
   WriteReady,
}

#[derive(Default)]
pub(crate) struct Recorder {
   events: RefCell<Vec<Recorded>>,
}

impl Recorder {
   pub fn take(&self) -> Vec<Recorded> {
      self.events.take()
   }
}

impl ClientCallbacks for Rc<Recorder> {
   fn connected(&self, _client: &ConnectionClient) {
      self.events.borrow_mut().push(Recorded::Connected);
   }

   fn disconnected(&self, _client: &ConnectionClient) {
      self.events.borrow_mut().push(Recorded::Disconnected);
   }

   fn read_ready(&self, _client: &ConnectionClient, buffer: &Buffer) {
      self.events.borrow_mut().push(Recorded::Read(buffer.to_vec()));
   }

   fn write_ready(&self, _client: &ConnectionClient) {
      self.events.borrow_mut().push(Recorded::WriteReady);
   }
}

/// One client wired to a mock link and a fresh registry.
pub(crate) struct Harness {
   pub link: Rc<MockLink>,
   pub registry: Rc<ClientRegistry>,
   pub arena: BufferArena,
   pub recorder: Rc<Recorder>,
   pub client: ConnectionClient,
}

impl Harness {
   pub fn new() -> Self {
      Self::with_arena(BufferArena::new())
   }

   pub fn with_arena(arena: BufferArena) -> Self {
      let recorder = Rc::new(Recorder::default());
      let mut harness = Self::with_callbacks(arena, recorder.clone());
      harness.recorder = recorder;
      harness
   }

   pub fn with_callbacks(arena: BufferArena, callbacks: impl ClientCallbacks + 'static) -> Self {
      init_logging();
      let link = MockLink::new();
      let registry = ClientRegistry::new();
      let client = ConnectionClient::new(
         link.clone(),
         &registry,
         arena.clone(),
         ClientConfig::default(),
         callbacks,
      )
      .unwrap();
      Self {
         link,
         registry,
         arena,
         recorder: Rc::new(Recorder::default()),
         client,
      }
   }

   pub fn cid(&self) -> ChannelId {
      self.client.local_channel_id().expect("channel assigned")
   }

   /// Delivers `event` for the client's channel through the registry.
   pub fn deliver(&self, event: LinkEvent<'_>) {
      assert!(self.registry.dispatch(self.cid(), event), "event not dispatched");
   }

   /// Runs the whole handshake with the peer requesting `peer_mtu`.
   pub fn establish(&self, peer_mtu: u16) {
      self.client.connect(remote(), psm()).unwrap();
      self.deliver(LinkEvent::ConnectCompleted { result: L2CAP_CONN_OK });
      self.deliver(LinkEvent::PeerConfigRequest(ConfigOptions {
         mtu: Some(peer_mtu),
         ..Default::default()
      }));
      self.deliver(LinkEvent::ConfigCompleted(ConfigResult::Ok(ConfigOptions::default())));
      assert!(self.client.is_connected());
      assert_eq!(self.client.remote_mtu(), peer_mtu);
      // Empty when the harness was built with custom callbacks
      let events = self.recorder.take();
      assert!(events.is_empty() || events == [Recorded::Connected], "{events:?}");
   }

   /// Checks the client is back in its freshly constructed state.
   pub fn assert_reset(&self) {
      let client = &self.client;
      assert!(client.local_channel_id().is_none());
      assert_eq!(client.remote_mtu(), client.config().default_mtu);
      assert!(!client.is_connected());
      assert!(!client.is_congested());
      assert_eq!(client.queued_fragments(), 0);
   }
}
