//! Persistence boundary.
//!
//! The engine reads and writes device groups, device instances and mapping
//! records through [`MappingStore`]. The core ships [`MemoryStore`]; the
//! `pointmap-storage` crate provides the redb-backed implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{MapperError, Result};
use crate::model::{DeviceGroup, DeviceInstance, MappingRecord, SourceId};

/// Read/write contract of the persistence collaborator.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Group template for a device type.
    async fn load_group(&self, device_type: &str) -> Result<Option<DeviceGroup>>;

    /// Insert or replace the group of `group.device_type`.
    async fn save_group(&self, group: &DeviceGroup) -> Result<()>;

    async fn load_instance(&self, device_id: &str) -> Result<Option<DeviceInstance>>;

    /// Insert or replace the instance of `instance.device_id`.
    async fn save_instance(&self, instance: &DeviceInstance) -> Result<()>;

    async fn list_instances(&self) -> Result<Vec<DeviceInstance>>;

    async fn list_instances_by_type(&self, device_type: &str) -> Result<Vec<DeviceInstance>>;

    async fn load_record(&self, source_id: &SourceId) -> Result<Option<MappingRecord>>;

    /// Insert or replace the record of `record.source_id` (last writer wins).
    async fn upsert_record(&self, record: &MappingRecord) -> Result<()>;

    async fn list_records(&self) -> Result<Vec<MappingRecord>>;

    async fn list_records_for_device(&self, device_id: &str) -> Result<Vec<MappingRecord>>;
}

#[derive(Default)]
struct MemoryTables {
    groups: HashMap<String, DeviceGroup>,
    instances: HashMap<String, DeviceInstance>,
    records: HashMap<String, MappingRecord>,
}

/// In-process store.
///
/// `set_unavailable(true)` makes every call fail with
/// [`MapperError::Storage`], standing in for an unreachable database.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<MemoryTables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MapperError::Storage("memory store is unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MappingStore for MemoryStore {
    async fn load_group(&self, device_type: &str) -> Result<Option<DeviceGroup>> {
        self.check()?;
        Ok(self.tables.read().groups.get(device_type).cloned())
    }

    async fn save_group(&self, group: &DeviceGroup) -> Result<()> {
        self.check()?;
        self.tables
            .write()
            .groups
            .insert(group.device_type.clone(), group.clone());
        Ok(())
    }

    async fn load_instance(&self, device_id: &str) -> Result<Option<DeviceInstance>> {
        self.check()?;
        Ok(self.tables.read().instances.get(device_id).cloned())
    }

    async fn save_instance(&self, instance: &DeviceInstance) -> Result<()> {
        self.check()?;
        self.tables
            .write()
            .instances
            .insert(instance.device_id.clone(), instance.clone());
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<DeviceInstance>> {
        self.check()?;
        let mut instances: Vec<_> = self.tables.read().instances.values().cloned().collect();
        instances.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(instances)
    }

    async fn list_instances_by_type(&self, device_type: &str) -> Result<Vec<DeviceInstance>> {
        Ok(self
            .list_instances()
            .await?
            .into_iter()
            .filter(|i| i.device_type == device_type)
            .collect())
    }

    async fn load_record(&self, source_id: &SourceId) -> Result<Option<MappingRecord>> {
        self.check()?;
        Ok(self.tables.read().records.get(&source_id.key()).cloned())
    }

    async fn upsert_record(&self, record: &MappingRecord) -> Result<()> {
        self.check()?;
        self.tables
            .write()
            .records
            .insert(record.source_id.key(), record.clone());
        Ok(())
    }

    async fn list_records(&self) -> Result<Vec<MappingRecord>> {
        self.check()?;
        let mut records: Vec<_> = self.tables.read().records.values().cloned().collect();
        records.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(records)
    }

    async fn list_records_for_device(&self, device_id: &str) -> Result<Vec<MappingRecord>> {
        Ok(self
            .list_records()
            .await?
            .into_iter()
            .filter(|r| r.source_id.device_id == device_id)
            .collect())
    }
}
