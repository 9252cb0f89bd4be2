//! redb-backed mapping store.
//!
//! Every row is stored as JSON text under a string key:
//!
//! | table               | key                 | value              |
//! |---------------------|---------------------|--------------------|
//! | `device_groups`     | device type         | `DeviceGroup`      |
//! | `device_instances`  | device id           | `DeviceInstance`   |
//! | `device_type_index` | device type         | comma-separated ids|
//! | `mapping_records`   | `device_id:point`   | `MappingRecord`    |

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use tracing::warn;

use pointmap_core::{DeviceGroup, DeviceInstance, MappingRecord, MappingStore, SourceId};

use crate::error::Error;

const GROUPS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("device_groups");
const INSTANCES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("device_instances");
const TYPE_INDEX_TABLE: TableDefinition<&str, &str> = TableDefinition::new("device_type_index");
const RECORDS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("mapping_records");

/// Mapping store persisted in a single redb file.
pub struct RedbMappingStore {
    db: Arc<Database>,
    path: String,
}

fn decode<T: DeserializeOwned>(table: &str, key: &str, json: &str) -> Option<T> {
    match serde_json::from_str(json) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Skipping undecodable row {}/{}: {}", table, key, e);
            None
        }
    }
}

fn split_index(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl RedbMappingStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, Error> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = if path_ref.exists() {
            Database::open(path_ref)?
        } else {
            Database::create(path_ref)?
        };

        // Opening a table in a write transaction creates it when missing.
        let write_txn = db.begin_write()?;
        {
            let _groups = write_txn.open_table(GROUPS_TABLE)?;
            let _instances = write_txn.open_table(INSTANCES_TABLE)?;
            let _type_index = write_txn.open_table(TYPE_INDEX_TABLE)?;
            let _records = write_txn.open_table(RECORDS_TABLE)?;
        }
        write_txn.commit()?;

        tracing::info!(category = "storage", "Opened mapping store at {}", path_ref.display());

        Ok(Arc::new(RedbMappingStore {
            db: Arc::new(db),
            path: path_ref.to_string_lossy().to_string(),
        }))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    // ========== Device Groups ==========

    pub fn put_group(&self, group: &DeviceGroup) -> Result<(), Error> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(GROUPS_TABLE)?;
            let json = serde_json::to_string(group)?;
            table.insert(group.device_type.as_str(), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_group(&self, device_type: &str) -> Result<Option<DeviceGroup>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(GROUPS_TABLE)?;

        match table.get(device_type)? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn all_groups(&self) -> Result<Vec<DeviceGroup>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(GROUPS_TABLE)?;

        let mut groups = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            if let Some(group) = decode("device_groups", key.value(), value.value()) {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    // ========== Device Instances ==========

    /// Save an instance and add it to the type index.
    pub fn put_instance(&self, instance: &DeviceInstance) -> Result<(), Error> {
        let device_id = instance.device_id.as_str();

        let write_txn = self.db.begin_write()?;
        {
            let mut instances = write_txn.open_table(INSTANCES_TABLE)?;
            let json = serde_json::to_string(instance)?;
            instances.insert(device_id, json.as_str())?;

            let mut index = write_txn.open_table(TYPE_INDEX_TABLE)?;
            let key = instance.device_type.as_str();
            let mut device_ids = match index.get(key)? {
                Some(value) => split_index(value.value()),
                None => Vec::new(),
            };
            if !device_ids.iter().any(|id| id == device_id) {
                device_ids.push(device_id.to_string());
                let joined = device_ids.join(",");
                index.insert(key, joined.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_instance(&self, device_id: &str) -> Result<Option<DeviceInstance>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(INSTANCES_TABLE)?;

        match table.get(device_id)? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// All instances, ordered by device id.
    pub fn all_instances(&self) -> Result<Vec<DeviceInstance>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(INSTANCES_TABLE)?;

        let mut instances = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            if let Some(instance) = decode("device_instances", key.value(), value.value()) {
                instances.push(instance);
            }
        }
        Ok(instances)
    }

    /// Instances of one device type, resolved through the type index.
    pub fn instances_of_type(&self, device_type: &str) -> Result<Vec<DeviceInstance>, Error> {
        let read_txn = self.db.begin_read()?;

        let device_ids = {
            let index = read_txn.open_table(TYPE_INDEX_TABLE)?;
            match index.get(device_type)? {
                Some(value) => split_index(value.value()),
                None => return Ok(Vec::new()),
            }
        };

        let table = read_txn.open_table(INSTANCES_TABLE)?;
        let mut instances: Vec<DeviceInstance> = Vec::with_capacity(device_ids.len());
        for device_id in device_ids {
            match table.get(device_id.as_str())? {
                Some(value) => {
                    if let Some(instance) =
                        decode("device_instances", &device_id, value.value())
                    {
                        instances.push(instance);
                    }
                }
                None => warn!("Type index of {} lists missing device {}", device_type, device_id),
            }
        }
        instances.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(instances)
    }

    // ========== Mapping Records ==========

    pub fn put_record(&self, record: &MappingRecord) -> Result<(), Error> {
        let key = record.source_id.key();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;
            let json = serde_json::to_string(record)?;
            table.insert(key.as_str(), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_record(&self, source_id: &SourceId) -> Result<Option<MappingRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;

        match table.get(source_id.key().as_str())? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn all_records(&self) -> Result<Vec<MappingRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;

        let mut records: Vec<MappingRecord> = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            if let Some(record) = decode("mapping_records", key.value(), value.value()) {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(records)
    }

    /// Records of one device, found by scanning the `device_id:` key range.
    pub fn records_of_device(&self, device_id: &str) -> Result<Vec<MappingRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;

        let prefix = format!("{}:", device_id);
        let mut records: Vec<MappingRecord> = Vec::new();
        for result in table.range::<&str>(prefix.as_str()..)? {
            let (key, value) = result?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            if let Some(record) = decode::<MappingRecord>("mapping_records", key.value(), value.value())
            {
                // Device ids may themselves contain ':'.
                if record.source_id.device_id == device_id {
                    records.push(record);
                }
            }
        }
        records.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(records)
    }
}

#[async_trait]
impl MappingStore for RedbMappingStore {
    async fn load_group(&self, device_type: &str) -> pointmap_core::Result<Option<DeviceGroup>> {
        Ok(self.get_group(device_type)?)
    }

    async fn save_group(&self, group: &DeviceGroup) -> pointmap_core::Result<()> {
        Ok(self.put_group(group)?)
    }

    async fn load_instance(&self, device_id: &str) -> pointmap_core::Result<Option<DeviceInstance>> {
        Ok(self.get_instance(device_id)?)
    }

    async fn save_instance(&self, instance: &DeviceInstance) -> pointmap_core::Result<()> {
        Ok(self.put_instance(instance)?)
    }

    async fn list_instances(&self) -> pointmap_core::Result<Vec<DeviceInstance>> {
        Ok(self.all_instances()?)
    }

    async fn list_instances_by_type(
        &self,
        device_type: &str,
    ) -> pointmap_core::Result<Vec<DeviceInstance>> {
        Ok(self.instances_of_type(device_type)?)
    }

    async fn load_record(&self, source_id: &SourceId) -> pointmap_core::Result<Option<MappingRecord>> {
        Ok(self.get_record(source_id)?)
    }

    async fn upsert_record(&self, record: &MappingRecord) -> pointmap_core::Result<()> {
        Ok(self.put_record(record)?)
    }

    async fn list_records(&self) -> pointmap_core::Result<Vec<MappingRecord>> {
        Ok(self.all_records()?)
    }

    async fn list_records_for_device(
        &self,
        device_id: &str,
    ) -> pointmap_core::Result<Vec<MappingRecord>> {
        Ok(self.records_of_device(device_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointmap_core::{InstanceStatus, ResolvedPoint};
    use std::fs;

    fn create_temp_store() -> Arc<RedbMappingStore> {
        let temp_dir =
            std::env::temp_dir().join(format!("mapping_store_test_{}", uuid::Uuid::new_v4()));
        let _ = fs::remove_dir_all(&temp_dir);
        fs::create_dir_all(&temp_dir).unwrap();
        RedbMappingStore::open(temp_dir.join("mappings.redb")).unwrap()
    }

    #[test]
    fn test_group_crud() {
        let store = create_temp_store();
        assert!(store.get_group("CHPL").unwrap().is_none());

        let group = DeviceGroup::new("CHPL", vec!["CHWRT".into(), "CHWST".into()]);
        store.put_group(&group).unwrap();

        let loaded = store.get_group("CHPL").unwrap().unwrap();
        assert_eq!(loaded.raw_points, vec!["CHWRT", "CHWST"]);
        assert_eq!(store.all_groups().unwrap().len(), 1);
    }

    #[test]
    fn test_instance_type_index() {
        let store = create_temp_store();
        store.put_instance(&DeviceInstance::new("AHU-2", "AHU")).unwrap();
        store.put_instance(&DeviceInstance::new("AHU-1", "AHU")).unwrap();
        store.put_instance(&DeviceInstance::new("CHPL-1", "CHPL")).unwrap();
        // Saving again must not duplicate the index entry.
        store.put_instance(&DeviceInstance::new("AHU-1", "AHU")).unwrap();

        let ahus = store.instances_of_type("AHU").unwrap();
        let ids: Vec<_> = ahus.iter().map(|i| i.device_id.as_str()).collect();
        assert_eq!(ids, vec!["AHU-1", "AHU-2"]);
        assert!(store.instances_of_type("VAV").unwrap().is_empty());
        assert_eq!(store.all_instances().unwrap().len(), 3);
    }

    #[test]
    fn test_instance_mappings_survive_round_trip() {
        let store = create_temp_store();
        let mut instance = DeviceInstance::new("CHPL-1", "CHPL");
        instance.merge(
            "CHWRT",
            ResolvedPoint {
                enos_path: "CHPL/points/CHW_RetTemp".into(),
                confidence: 0.9,
            },
        );
        instance.status = InstanceStatus::Partial;
        store.put_instance(&instance).unwrap();

        let loaded = store.get_instance("CHPL-1").unwrap().unwrap();
        assert_eq!(loaded.status, InstanceStatus::Partial);
        assert_eq!(loaded.mappings["CHWRT"].enos_path, "CHPL/points/CHW_RetTemp");
    }

    #[test]
    fn test_records_of_device_does_not_leak_prefix_matches() {
        let store = create_temp_store();
        for (device, point) in [("AHU-1", "SAT"), ("AHU-1", "RAT"), ("AHU-10", "SAT")] {
            let record = MappingRecord::new(
                SourceId::new(device, point),
                format!("AHU/points/{}", point),
                0.9,
                "rule",
            );
            store.put_record(&record).unwrap();
        }

        let records = store.records_of_device("AHU-1").unwrap();
        let points: Vec<_> = records.iter().map(|r| r.source_id.point.as_str()).collect();
        assert_eq!(points, vec!["RAT", "SAT"]);
        assert_eq!(store.all_records().unwrap().len(), 3);
    }
}
