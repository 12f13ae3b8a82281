//! L2CAP protocol constants and negotiation data structures.
//!
//! This module contains the identifiers, configuration options and result
//! codes exchanged with the link layer during channel setup.

use std::{
   fmt,
   num::{NonZeroU16, ParseIntError},
   str::FromStr,
};

use crate::error::{L2capError, Result};

/// MTU assumed until a peer configuration request says otherwise.
pub const L2CAP_DEFAULT_MTU: u16 = 672;
/// Smallest MTU a peer may request.
pub const L2CAP_MIN_MTU: u16 = 48;
/// Connect-completed result code for success.
pub const L2CAP_CONN_OK: u16 = 0;

/// Protocol/Service Multiplexer identifying the remote service.
///
/// Only values that are non-zero, odd, and have an even upper byte can be
/// constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Psm(NonZeroU16);

impl Psm {
   pub fn new(psm: u16) -> Result<Self> {
      if psm & 0x0101 != 0x0001 {
         return Err(L2capError::InvalidPsm(psm));
      }
      NonZeroU16::new(psm)
         .map(Self)
         .ok_or(L2capError::InvalidPsm(psm))
   }

   pub const fn get(self) -> u16 {
      self.0.get()
   }
}

impl fmt::Display for Psm {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "0x{:04x}", self.get())
   }
}

/// Local channel identifier handed out by the link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(NonZeroU16);

impl ChannelId {
   /// Returns `None` for the reserved value 0.
   pub const fn new(cid: u16) -> Option<Self> {
      match NonZeroU16::new(cid) {
         Some(cid) => Some(Self(cid)),
         None => None,
      }
   }

   pub const fn get(self) -> u16 {
      self.0.get()
   }
}

impl fmt::Display for ChannelId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "cid 0x{:04x}", self.get())
   }
}

/// Bluetooth device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
   /// The all-zero address, treated as "no address".
   pub const ANY: Self = Self([0; 6]);

   pub fn is_any(&self) -> bool {
      *self == Self::ANY
   }
}

impl FromStr for BdAddr {
   type Err = L2capError;

   fn from_str(s: &str) -> Result<Self> {
      if s.is_empty() {
         return Err(L2capError::EmptyAddress);
      }
      let invalid = || L2capError::InvalidAddress(s.to_owned());

      let mut addr = [0u8; 6];
      let mut parts = s.split(':');
      for byte in &mut addr {
         let part = parts.next().ok_or_else(invalid)?;
         if part.len() != 2 {
            return Err(invalid());
         }
         *byte = u8::from_str_radix(part, 16).map_err(|_: ParseIntError| invalid())?;
      }
      if parts.next().is_some() {
         return Err(invalid());
      }
      Ok(Self(addr))
   }
}

impl fmt::Display for BdAddr {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let [a, b, c, d, e, g] = self.0;
      write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
   }
}

/// Flow-control and retransmission modes a peer may propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display)]
#[repr(u8)]
pub enum FlowControlMode {
   Basic = 0x00,
   Retransmission = 0x01,
   FlowControl = 0x02,
   EnhancedRetransmission = 0x03,
   Streaming = 0x04,
}

/// Configuration options carried by requests and responses.
///
/// Absent options are `None`; only present options are negotiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigOptions {
   pub mtu: Option<u16>,
   pub flow_control: Option<FlowControlMode>,
   pub flush_timeout: Option<u16>,
}

/// Wire result codes of a configuration exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display)]
#[repr(u16)]
pub enum ConfigResultCode {
   Ok = 0x0000,
   UnacceptableParams = 0x0001,
   FailedNoReason = 0x0002,
   UnknownOptions = 0x0003,
   Pending = 0x0004,
}

/// Outcome of our own configuration request, as reported by the link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigResult {
   /// The peer accepted; carries the negotiated options.
   Ok(ConfigOptions),
   /// The peer has not decided yet; a later completion follows.
   Pending,
   /// The peer rejected our options and proposed these instead.
   Unacceptable(ConfigOptions),
   /// Any other result code.
   Failed(u16),
}

impl ConfigResult {
   pub fn from_code(code: u16, options: ConfigOptions) -> Self {
      match ConfigResultCode::from_repr(code) {
         Some(ConfigResultCode::Ok) => Self::Ok(options),
         Some(ConfigResultCode::Pending) => Self::Pending,
         Some(ConfigResultCode::UnacceptableParams) => Self::Unacceptable(options),
         Some(ConfigResultCode::FailedNoReason | ConfigResultCode::UnknownOptions) | None => {
            Self::Failed(code)
         },
      }
   }

   pub fn code(&self) -> u16 {
      match self {
         Self::Ok(_) => ConfigResultCode::Ok as u16,
         Self::Pending => ConfigResultCode::Pending as u16,
         Self::Unacceptable(_) => ConfigResultCode::UnacceptableParams as u16,
         Self::Failed(code) => *code,
      }
   }
}

/// Our answer to a peer configuration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigResponse {
   pub result: ConfigResultCode,
   pub options: ConfigOptions,
}

/// Result of handing one outbound packet to the link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display)]
#[repr(u8)]
pub enum SendStatus {
   Failed = 0,
   Success = 1,
   Congested = 2,
}
