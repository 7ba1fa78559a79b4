//! Store-and-forward request/response channel over numbered slots ("ports").
//!
//! A producer writes an [`Envelope`] to a slot; a consumer later reads it
//! from the same slot. There is no rendezvous and no daemon involvement.
//! By convention one pending record per slot; concurrent producers race.
//!
//! The slot storage itself is a host capability ([`SlotHost`]). Two hosts
//! are provided:
//! - **MemorySlotHost**: per-process, for embedding and tests
//! - **FileSlotHost**: a shared directory, one file per slot, usable across processes

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bridge::protocol::Envelope;

mod file;
mod memory;

pub use file::FileSlotHost;
pub use memory::MemorySlotHost;

/// What a slot handle returns when there is nothing to read.
pub const EMPTY_SENTINEL: &str = "NULL PORT DATA";

/// Records kept per slot before the oldest is evicted.
pub const DEFAULT_PORT_CAPACITY: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("invalid port number {0}: ports start at 1")]
    InvalidNumber(u32),
    #[error("port {port} I/O error: {source}")]
    Io {
        port: PortNumber,
        #[source]
        source: std::io::Error,
    },
    #[error("port {port} holds a record that is not an envelope: {source}")]
    Decode {
        port: PortNumber,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode envelope for port {port}: {source}")]
    Encode {
        port: PortNumber,
        #[source]
        source: serde_json::Error,
    },
    #[error("port {0} records must be a single line")]
    MultiLineRecord(PortNumber),
}

/// A slot number. Always ≥ 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PortNumber(u32);

impl PortNumber {
    pub fn new(n: u32) -> Result<Self, PortError> {
        if n == 0 {
            return Err(PortError::InvalidNumber(n));
        }
        Ok(Self(n))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for PortNumber {
    type Error = PortError;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl From<PortNumber> for u32 {
    fn from(port: PortNumber) -> Self {
        port.0
    }
}

impl std::str::FromStr for PortNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: u32 = s.parse().map_err(|e| format!("invalid port number '{s}': {e}"))?;
        Self::new(n).map_err(|e| e.to_string())
    }
}

impl std::fmt::Display for PortNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw access to one slot.
#[async_trait]
pub trait SlotHandle: Send + Sync {
    /// Pop the oldest record, or [`EMPTY_SENTINEL`] if the slot is empty.
    async fn read(&self) -> Result<String, PortError>;

    /// Append a record. Returns the evicted record if the slot was full.
    async fn write(&self, data: String) -> Result<Option<String>, PortError>;
}

/// Resolves slot numbers to handles.
pub trait SlotHost: Send + Sync {
    fn handle(&self, port: PortNumber) -> Arc<dyn SlotHandle>;
}

/// Envelope-level view of one slot.
pub struct Port {
    number: PortNumber,
    handle: Arc<dyn SlotHandle>,
}

impl Port {
    pub fn open(host: &dyn SlotHost, number: PortNumber) -> Self {
        Self {
            number,
            handle: host.handle(number),
        }
    }

    pub fn number(&self) -> PortNumber {
        self.number
    }

    pub async fn write(&self, envelope: &Envelope) -> Result<(), PortError> {
        let record = serde_json::to_string(envelope).map_err(|source| PortError::Encode {
            port: self.number,
            source,
        })?;
        if let Some(evicted) = self.handle.write(record).await? {
            tracing::warn!(port = %self.number, evicted = %evicted, "Port full, oldest record dropped");
        }
        tracing::trace!(port = %self.number, id = ?envelope.id, "Envelope written");
        Ok(())
    }

    /// Fetch the next envelope; `None` when the slot is empty. Never blocks.
    pub async fn read(&self) -> Result<Option<Envelope>, PortError> {
        let record = self.handle.read().await?;
        if record == EMPTY_SENTINEL {
            return Ok(None);
        }
        serde_json::from_str(&record)
            .map(Some)
            .map_err(|source| PortError::Decode {
                port: self.number,
                source,
            })
    }
}
