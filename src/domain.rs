//! Domain model shared between the control socket, the notification socket
//! and the watcher's event stream.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ghost::GhostRecord;

pub const DOMAIN_API_VERSION: &str = "1.2.2";
pub const DOMAIN_KIND: &str = "Domain";

/// Returns the `namespace/name` key used for domains and ghost records.
pub fn key_for(namespace: &str, name: &str) -> String {
   format!("{namespace}/{name}")
}

/// Hypervisor-level domain name for a VM (`namespace_name`).
pub fn domain_name(namespace: &str, name: &str) -> String {
   format!("{namespace}_{name}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
   pub name:               String,
   pub namespace:          String,
   pub uid:                String,
   /// Set when the domain should be torn down.
   pub deletion_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifeCycle {
   #[default]
   NoState,
   Running,
   Blocked,
   Paused,
   ShuttingDown,
   Shutoff,
   Crashed,
   PmSuspended,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateChangeReason {
   #[default]
   Unknown,
   User,
   Shutdown,
   Destroyed,
   Migrated,
   Crashed,
   Panicked,
   Saved,
   Failed,
   FromSnapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSpec {
   pub name:        String,
   pub domain_type: String,
   pub memory_kib:  u64,
   /// UID of the VM instance that owns this domain.
   pub vmi_uid:     String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainStatus {
   pub status: LifeCycle,
   pub reason: StateChangeReason,
}

/// Guest OS details reported by the guest agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestOsInfo {
   pub name:           String,
   pub version:        String,
   pub kernel_release: String,
}

/// Runtime representation of one VM's hypervisor state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
   pub api_version: String,
   pub kind:        String,
   pub meta:        ObjectMeta,
   pub spec:        DomainSpec,
   pub status:      DomainStatus,
   pub guest_os:    Option<GuestOsInfo>,
}

impl Domain {
   /// A domain reference carrying only identity.
   pub fn new_minimal(namespace: &str, name: &str) -> Self {
      Self {
         api_version: DOMAIN_API_VERSION.to_string(),
         kind:        DOMAIN_KIND.to_string(),
         meta:        ObjectMeta {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..ObjectMeta::default()
         },
         spec:        DomainSpec {
            name: domain_name(namespace, name),
            domain_type: "kvm".to_string(),
            ..DomainSpec::default()
         },
         status:      DomainStatus::default(),
         guest_os:    None,
      }
   }

   /// Synthesizes a domain for a VM whose control socket is gone or
   /// unresponsive. The deletion timestamp tells consumers to tear it down.
   pub fn stale(record: &GhostRecord) -> Self {
      let mut domain = Self::new_minimal(&record.namespace, &record.name);
      domain.meta.uid.clone_from(&record.uid);
      domain.spec.vmi_uid.clone_from(&record.uid);
      domain.meta.deletion_timestamp = Some(Utc::now());
      domain
   }

   pub fn key(&self) -> String {
      key_for(&self.meta.namespace, &self.meta.name)
   }

   pub fn is_marked_for_deletion(&self) -> bool {
      self.meta.deletion_timestamp.is_some()
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
   Added,
   Modified,
   Deleted,
   Error,
}

impl fmt::Display for EventType {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let s = match self {
         Self::Added => "ADDED",
         Self::Modified => "MODIFIED",
         Self::Deleted => "DELETED",
         Self::Error => "ERROR",
      };
      f.write_str(s)
   }
}

/// Status carried by an error notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStatus {
   pub message: String,
}

/// Unit of the watcher's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEvent {
   Added(Domain),
   Modified(Domain),
   Deleted(Domain),
   Error(ErrorStatus),
}

impl WatchEvent {
   pub const fn event_type(&self) -> EventType {
      match self {
         Self::Added(_) => EventType::Added,
         Self::Modified(_) => EventType::Modified,
         Self::Deleted(_) => EventType::Deleted,
         Self::Error(_) => EventType::Error,
      }
   }

   pub const fn domain(&self) -> Option<&Domain> {
      match self {
         Self::Added(d) | Self::Modified(d) | Self::Deleted(d) => Some(d),
         Self::Error(_) => None,
      }
   }
}
