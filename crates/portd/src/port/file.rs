//! Slot host backed by a shared directory.
//!
//! Slot `n` is the file `{dir}/port-{n}.jsonl`, one record per line, oldest
//! first. Reads and writes rewrite the file without locking: concurrent
//! producers and consumers on the same slot are best-effort.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::{DEFAULT_PORT_CAPACITY, EMPTY_SENTINEL, PortError, PortNumber, SlotHandle, SlotHost};

struct FileSlot {
    port: PortNumber,
    path: PathBuf,
    capacity: usize,
}

impl FileSlot {
    fn io_error(&self, source: std::io::Error) -> PortError {
        PortError::Io {
            port: self.port,
            source,
        }
    }

    async fn load(&self) -> Result<Vec<String>, PortError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn store(&self, records: &[String]) -> Result<(), PortError> {
        if records.is_empty() {
            return match tokio::fs::remove_file(&self.path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(self.io_error(e)),
            };
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let mut contents = records.join("\n");
        contents.push('\n');
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|e| self.io_error(e))
    }
}

#[async_trait]
impl SlotHandle for FileSlot {
    async fn read(&self) -> Result<String, PortError> {
        let mut records = self.load().await?;
        if records.is_empty() {
            return Ok(EMPTY_SENTINEL.to_string());
        }
        let head = records.remove(0);
        self.store(&records).await?;
        Ok(head)
    }

    async fn write(&self, data: String) -> Result<Option<String>, PortError> {
        if data.contains('\n') {
            return Err(PortError::MultiLineRecord(self.port));
        }
        let mut records = self.load().await?;
        records.push(data);
        let evicted = if records.len() > self.capacity {
            Some(records.remove(0))
        } else {
            None
        };
        self.store(&records).await?;
        Ok(evicted)
    }
}

/// Slots shared through files in one directory.
pub struct FileSlotHost {
    dir: PathBuf,
    capacity: usize,
}

impl FileSlotHost {
    pub fn new(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            dir: dir.into(),
            capacity: capacity.max(1),
        }
    }

    pub fn with_default_capacity(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, DEFAULT_PORT_CAPACITY)
    }
}

impl SlotHost for FileSlotHost {
    fn handle(&self, port: PortNumber) -> Arc<dyn SlotHandle> {
        Arc::new(FileSlot {
            port,
            path: self.dir.join(format!("port-{port}.jsonl")),
            capacity: self.capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::Envelope;
    use crate::port::Port;

    #[tokio::test]
    async fn envelope_crosses_host_instances() {
        let dir = tempfile::tempdir().unwrap();
        let port = PortNumber::new(5).unwrap();
        let written = Envelope::success(serde_json::json!("x")).with_id(Some("a".to_string()));

        // Producer and consumer only share the directory.
        let producer = FileSlotHost::with_default_capacity(dir.path());
        Port::open(&producer, port).write(&written).await.unwrap();

        let consumer = FileSlotHost::with_default_capacity(dir.path());
        let read = Port::open(&consumer, port).read().await.unwrap();
        assert_eq!(read, Some(written));

        assert_eq!(Port::open(&consumer, port).read().await.unwrap(), None);
        assert!(!dir.path().join("port-5.jsonl").exists());
    }

    #[tokio::test]
    async fn missing_directory_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let host = FileSlotHost::with_default_capacity(dir.path().join("not-yet"));
        let slot = host.handle(PortNumber::new(1).unwrap());
        assert_eq!(slot.read().await.unwrap(), EMPTY_SENTINEL);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_and_rejects_multiline() {
        let dir = tempfile::tempdir().unwrap();
        let host = FileSlotHost::new(dir.path(), 1);
        let slot = host.handle(PortNumber::new(2).unwrap());

        assert_eq!(slot.write("first".to_string()).await.unwrap(), None);
        assert_eq!(
            slot.write("second".to_string()).await.unwrap(),
            Some("first".to_string())
        );
        assert!(matches!(
            slot.write("a\nb".to_string()).await,
            Err(PortError::MultiLineRecord(_))
        ));
        assert_eq!(slot.read().await.unwrap(), "second");
    }
}
