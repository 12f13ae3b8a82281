//! Configuration management for the L2CAP client.
//!
//! This module handles loading and saving the channel negotiation
//! parameters from disk.

use std::{
   env, fs,
   path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
   bluetooth::protocol::{L2CAP_DEFAULT_MTU, L2CAP_MIN_MTU},
   error::{L2capError, Result},
};

/// Negotiation parameters shared by every client built from it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientConfig {
   /// MTU assumed for the peer until it tells us otherwise.
   #[serde(default = "default_mtu")]
   pub default_mtu: u16,

   /// Smallest MTU we accept from a peer.
   #[serde(default = "default_min_mtu")]
   pub min_mtu: u16,

   /// MTU advertised in our own configuration request.
   #[serde(default = "default_mtu")]
   pub local_mtu: u16,

   #[serde(default)]
   pub flush_timeout_ms: Option<u16>,
}

const fn default_mtu() -> u16 {
   L2CAP_DEFAULT_MTU
}

const fn default_min_mtu() -> u16 {
   L2CAP_MIN_MTU
}

impl Default for ClientConfig {
   fn default() -> Self {
      Self {
         default_mtu: default_mtu(),
         min_mtu: default_min_mtu(),
         local_mtu: default_mtu(),
         flush_timeout_ms: None,
      }
   }
}

impl ClientConfig {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   /// Loads configuration from `path`, writing the default there if missing.
   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         let config: Self = toml::from_str(&contents)?;
         config.validate()?;
         Ok(config)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   /// Saves the current configuration to the default location.
   pub fn save(&self) -> Result<()> {
      self.save_to(&Self::config_path()?)
   }

   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   /// Checks the MTU bounds against each other.
   pub fn validate(&self) -> Result<()> {
      if self.min_mtu == 0 {
         return Err(L2capError::InvalidConfig("min_mtu must be non-zero".into()));
      }
      if self.default_mtu < self.min_mtu {
         return Err(L2capError::InvalidConfig(format!(
            "default_mtu {} is below min_mtu {}",
            self.default_mtu, self.min_mtu
         )));
      }
      if self.local_mtu < self.min_mtu {
         return Err(L2capError::InvalidConfig(format!(
            "local_mtu {} is below min_mtu {}",
            self.local_mtu, self.min_mtu
         )));
      }
      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(home) = env::var("L2CAP_CLIENT_HOME") {
         PathBuf::from(home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Ok(home) = env::var("HOME") {
         PathBuf::from(home).join(".config")
      } else {
         return Err(L2capError::ConfigDirNotFound);
      };

      Ok(config_dir.join("l2cap-client").join("config.toml"))
   }
}
