//! In-process slot host.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{DEFAULT_PORT_CAPACITY, EMPTY_SENTINEL, PortError, PortNumber, SlotHandle, SlotHost};

struct MemorySlot {
    capacity: usize,
    records: StdMutex<VecDeque<String>>,
}

#[async_trait]
impl SlotHandle for MemorySlot {
    async fn read(&self) -> Result<String, PortError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .pop_front()
            .unwrap_or_else(|| EMPTY_SENTINEL.to_string()))
    }

    async fn write(&self, data: String) -> Result<Option<String>, PortError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.push_back(data);
        if records.len() > self.capacity {
            return Ok(records.pop_front());
        }
        Ok(None)
    }
}

/// Slots held in memory, created on first use.
pub struct MemorySlotHost {
    capacity: usize,
    slots: DashMap<PortNumber, Arc<MemorySlot>>,
}

impl MemorySlotHost {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: DashMap::new(),
        }
    }
}

impl Default for MemorySlotHost {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_CAPACITY)
    }
}

impl SlotHost for MemorySlotHost {
    fn handle(&self, port: PortNumber) -> Arc<dyn SlotHandle> {
        let capacity = self.capacity;
        let slot = self.slots.entry(port).or_insert_with(|| {
            Arc::new(MemorySlot {
                capacity,
                records: StdMutex::new(VecDeque::new()),
            })
        });
        Arc::clone(slot.value()) as Arc<dyn SlotHandle>
    }
}
