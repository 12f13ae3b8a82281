//! Boundary to the link layer that carries L2CAP signalling and data.
//!
//! The link layer is consumed through [`LinkLayer`] and reports back with
//! [`LinkEvent`]s, keyed by local channel id and routed through the
//! [`ClientRegistry`](super::registry::ClientRegistry).

use crate::bluetooth::{
   fragment::Fragment,
   l2cap::WeakClient,
   protocol::{BdAddr, ChannelId, ConfigOptions, ConfigResponse, ConfigResult, Psm, SendStatus},
};

/// Synchronous requests a client makes of the link layer.
///
/// Implementations are driven from the same event context as the clients
/// and must not block.
pub trait LinkLayer {
   /// Starts connecting to `psm` on `remote`; `None` if no channel could be
   /// allocated.
   fn connect(&self, psm: Psm, remote: BdAddr) -> Option<ChannelId>;

   /// Routes events for `cid` to `sink`.
   fn set_event_sink(&self, cid: ChannelId, sink: WeakClient);

   fn send_config_request(&self, cid: ChannelId, options: &ConfigOptions) -> bool;

   fn send_config_response(&self, cid: ChannelId, response: &ConfigResponse) -> bool;

   fn disconnect_request(&self, cid: ChannelId) -> bool;

   fn disconnect_response(&self, cid: ChannelId);

   /// Takes ownership of `fragment` unless the result is `Failed`.
   fn send_packet(&self, cid: ChannelId, fragment: Fragment) -> SendStatus;
}

/// Events the link layer delivers for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
pub enum LinkEvent<'a> {
   /// Outcome of `connect`; `L2CAP_CONN_OK` on success.
   ConnectCompleted { result: u16 },
   /// The peer proposes options and expects a response.
   PeerConfigRequest(ConfigOptions),
   /// The peer answered our configuration request.
   ConfigCompleted(ConfigResult),
   PeerDisconnect { ack_required: bool },
   /// Our own teardown request finished.
   DisconnectCompleted,
   CongestionChanged { congested: bool },
   Inbound(&'a [u8]),
   /// Informational count of packets that left the controller.
   TransmitCompleted { packets: u16 },
}
