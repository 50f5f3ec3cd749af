//! Configuration management for node directories, watcher timing and IPC
//! limits.

use std::{
   path::{Path, PathBuf},
   sync::OnceLock,
   time::Duration,
};

use directories::BaseDirs;
use figment::{
   Figment,
   providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Smallest event buffer the watcher will run with. Pushes from every VM on
/// the node share it, so bursts of this size must never block a producer.
pub const MIN_EVENT_BUFFER: usize = 100;
pub const MAX_MESSAGE_BYTES_CAP: usize = 64 * 1024 * 1024;
/// Smallest frame limit that still fits a full domain.
pub const MIN_MESSAGE_BYTES: usize = 64 * 1024;

pub const GHOST_RECORD_DIR_NAME: &str = "ghost-records";
pub const LEGACY_SOCKET_DIR_NAME: &str = "sockets";

/// Agent configuration loaded from defaults, a TOML file and environment
/// variables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
   pub virt_share_dir:   PathBuf,
   pub virt_private_dir: PathBuf,
   pub pods_base_dir:    PathBuf,

   pub watchdog_timeout_secs:     u64,
   pub domain_resync_period_secs: u64,
   pub probe_timeout_ms:          u64,
   pub rpc_timeout_ms:            u64,

   pub event_buffer:      usize,
   pub max_message_bytes: usize,
}

impl Default for Config {
   fn default() -> Self {
      Self {
         virt_share_dir:            PathBuf::from("/var/run/kubevirt"),
         virt_private_dir:          PathBuf::from("/var/run/kubevirt-private"),
         pods_base_dir:             PathBuf::from("/pods"),
         watchdog_timeout_secs:     30,
         domain_resync_period_secs: 300,
         probe_timeout_ms:          5000,
         rpc_timeout_ms:            5000,
         event_buffer:              MIN_EVENT_BUFFER,
         max_message_bytes:         16 * 1024 * 1024,
      }
   }
}

impl Config {
   /// Loads configuration from `path` (or the default location) and the
   /// `VIRTNODE_` environment.
   pub fn load(path: Option<&Path>) -> Result<Self> {
      let mut figment = Figment::from(Serialized::defaults(Self::default()));

      let file = path
         .map(Path::to_path_buf)
         .or_else(|| std::env::var_os("VIRTNODE_CONFIG").map(PathBuf::from))
         .or_else(default_config_path);
      if let Some(file) = file {
         if file.exists() {
            figment = figment.merge(Toml::file(file));
         } else if path.is_some() {
            tracing::warn!("config file {} does not exist, using defaults", file.display());
         }
      }

      let cfg: Self = figment
         .merge(Env::prefixed("VIRTNODE_").lowercase(true))
         .extract()
         .map_err(|e| ConfigError::Parse(e.to_string()))?;
      cfg.validate()?;
      Ok(cfg)
   }

   pub fn validate(&self) -> Result<()> {
      if self.watchdog_timeout_secs == 0 {
         return Err(ConfigError::Invalid("watchdog_timeout_secs must be positive".to_string()).into());
      }
      if self.domain_resync_period_secs == 0 {
         return Err(
            ConfigError::Invalid("domain_resync_period_secs must be positive".to_string()).into(),
         );
      }
      if self.probe_timeout_ms == 0 || self.rpc_timeout_ms == 0 {
         return Err(ConfigError::Invalid("socket timeouts must be positive".to_string()).into());
      }
      if self.max_message_bytes < MIN_MESSAGE_BYTES {
         return Err(
            ConfigError::Invalid(format!(
               "max_message_bytes {} is below the minimum {}",
               self.max_message_bytes, MIN_MESSAGE_BYTES
            ))
            .into(),
         );
      }
      if self.max_message_bytes > MAX_MESSAGE_BYTES_CAP {
         return Err(
            ConfigError::Invalid(format!(
               "max_message_bytes {} exceeds hard cap {}",
               self.max_message_bytes, MAX_MESSAGE_BYTES_CAP
            ))
            .into(),
         );
      }
      Ok(())
   }

   pub fn watchdog_timeout(&self) -> Duration {
      Duration::from_secs(self.watchdog_timeout_secs)
   }

   pub fn resync_period(&self) -> Duration {
      Duration::from_secs(self.domain_resync_period_secs)
   }

   pub fn probe_timeout(&self) -> Duration {
      Duration::from_millis(self.probe_timeout_ms)
   }

   pub fn rpc_timeout(&self) -> Duration {
      Duration::from_millis(self.rpc_timeout_ms)
   }

   pub fn effective_event_buffer(&self) -> usize {
      self.event_buffer.max(MIN_EVENT_BUFFER)
   }

   /// Directory holding one checkpoint per ghost record.
   pub fn ghost_records_dir(&self) -> PathBuf {
      self.virt_private_dir.join(GHOST_RECORD_DIR_NAME)
   }

   /// Directory where pre-pod-socket launchers put their `<uid>_sock` files.
   pub fn legacy_sockets_dir(&self) -> PathBuf {
      self.virt_share_dir.join(LEGACY_SOCKET_DIR_NAME)
   }

   pub fn notify_socket_path(&self) -> PathBuf {
      crate::notify::notify_socket_path(&self.virt_share_dir)
   }
}

/// Initializes the global configuration from `path`.
///
/// Only the first successful call wins; later calls return the already
/// installed configuration.
pub fn init(path: Option<&Path>) -> Result<&'static Config> {
   if let Some(cfg) = CONFIG.get() {
      return Ok(cfg);
   }
   let cfg = Config::load(path)?;
   Ok(CONFIG.get_or_init(|| cfg))
}

fn default_config_path() -> Option<PathBuf> {
   BaseDirs::new().map(|d| d.config_dir().join("virtnode").join("config.toml"))
}
