//! Durable Homie projection using redb.
//!
//! Four tables mirror the relational layout of the projection: devices,
//! clusters, attributes and (reserved) device properties. Keys are the unique
//! tuples, values are JSON rows with the normative column names.
//!
//! Writes follow a two-step discipline: `ensure_*` inserts a blank row if the
//! key is absent, `set_*` overwrites a single field and refreshes
//! `updated_at`. Each step is its own write transaction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, DatabaseError, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::{debug, info};

use homiebridge_core::{AttributeRecord, ClusterRecord, DevicePropertyRecord, DeviceRecord};

use crate::Error;

// Devices table: key = topic_id, value = DeviceRecord (JSON)
const DEVICES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("devices");

// Clusters table: key = (device_id, cluster_name), value = ClusterRecord (JSON)
const CLUSTERS_TABLE: TableDefinition<(&str, &str), &str> = TableDefinition::new("clusters");

// Attributes table: key = (device_id, cluster_name, attribute_name), value = AttributeRecord (JSON)
const ATTRIBUTES_TABLE: TableDefinition<(&str, &str, &str), &str> =
    TableDefinition::new("attributes");

// Device properties table: key = (device_id, property_name), value = DevicePropertyRecord (JSON)
const DEVICE_PROPERTIES_TABLE: TableDefinition<(&str, &str), &str> =
    TableDefinition::new("device_properties");

/// A single device-level field write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceField {
    Name(String),
    State(String),
    ProtocolVersion(String),
    NodeList(String),
}

impl DeviceField {
    fn apply(self, device: &mut DeviceRecord) {
        match self {
            DeviceField::Name(v) => device.device_name = Some(v),
            DeviceField::State(v) => device.state = Some(v),
            DeviceField::ProtocolVersion(v) => device.protocol_version = Some(v),
            DeviceField::NodeList(v) => device.node_list = Some(v),
        }
    }
}

/// A single attribute-level field write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeField {
    Value(String),
    Datatype(String),
    Settable(bool),
    FormatInfo(String),
}

impl AttributeField {
    fn apply(self, attribute: &mut AttributeRecord) {
        match self {
            AttributeField::Value(v) => attribute.value = Some(v),
            AttributeField::Datatype(v) => attribute.datatype = Some(v),
            AttributeField::Settable(v) => attribute.settable = v,
            AttributeField::FormatInfo(v) => attribute.format_info = Some(v),
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// redb-backed projection store.
pub struct ProjectionStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl ProjectionStore {
    /// Open or create the projection database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, Error> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let is_new = !path_ref.exists();
        let opened = if is_new {
            Database::create(path_ref)
        } else {
            Database::open(path_ref)
        };
        // redb takes an exclusive file lock for the lifetime of the handle
        let db = match opened {
            Ok(db) => db,
            Err(DatabaseError::DatabaseAlreadyOpen) => {
                return Err(Error::Locked(path_ref.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        // Opening a table in a write transaction creates it if missing, which
        // also covers files written before a table existed.
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DEVICES_TABLE)?;
            let _ = write_txn.open_table(CLUSTERS_TABLE)?;
            let _ = write_txn.open_table(ATTRIBUTES_TABLE)?;
            let _ = write_txn.open_table(DEVICE_PROPERTIES_TABLE)?;
        }
        write_txn.commit()?;

        info!(
            category = "storage",
            "Opened projection store at {} (new: {})",
            path_ref.display(),
            is_new
        );

        Ok(Arc::new(ProjectionStore {
            db: Arc::new(db),
            path: path_ref.to_path_buf(),
        }))
    }

    /// Database file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========== Ensure (insert-if-absent) ==========

    /// Insert a blank device row if none exists. Returns true when inserted.
    pub fn ensure_device(&self, device_id: &str) -> Result<bool, Error> {
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(DEVICES_TABLE)?;
            let exists = table.get(device_id)?.is_some();
            if !exists {
                let json = serde_json::to_string(&DeviceRecord::new(device_id, now()))?;
                table.insert(device_id, json.as_str())?;
            }
            !exists
        };
        write_txn.commit()?;
        if inserted {
            debug!(device_id = %device_id, "Created device row");
        }
        Ok(inserted)
    }

    /// Insert a blank cluster row if none exists. Returns true when inserted.
    pub fn ensure_cluster(&self, device_id: &str, cluster_name: &str) -> Result<bool, Error> {
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(CLUSTERS_TABLE)?;
            let exists = table.get((device_id, cluster_name))?.is_some();
            if !exists {
                let record = ClusterRecord::new(device_id, cluster_name, now());
                let json = serde_json::to_string(&record)?;
                table.insert((device_id, cluster_name), json.as_str())?;
            }
            !exists
        };
        write_txn.commit()?;
        if inserted {
            debug!(device_id = %device_id, cluster = %cluster_name, "Created cluster row");
        }
        Ok(inserted)
    }

    /// Insert a blank attribute row if none exists. Returns true when inserted.
    pub fn ensure_attribute(
        &self,
        device_id: &str,
        cluster_name: &str,
        attribute_name: &str,
    ) -> Result<bool, Error> {
        let key = (device_id, cluster_name, attribute_name);
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(ATTRIBUTES_TABLE)?;
            let exists = table.get(key)?.is_some();
            if !exists {
                let record = AttributeRecord::new(device_id, cluster_name, attribute_name, now());
                let json = serde_json::to_string(&record)?;
                table.insert(key, json.as_str())?;
            }
            !exists
        };
        write_txn.commit()?;
        if inserted {
            debug!(
                device_id = %device_id,
                cluster = %cluster_name,
                attribute = %attribute_name,
                "Created attribute row"
            );
        }
        Ok(inserted)
    }

    // ========== Set (overwrite one field) ==========

    /// Overwrite one device field. Returns false if the row does not exist.
    pub fn set_device_field(&self, device_id: &str, field: DeviceField) -> Result<bool, Error> {
        self.modify_device(device_id, |device| field.apply(device))
    }

    /// Overwrite `cluster_properties`. Returns false if the row does not exist.
    pub fn set_cluster_properties(
        &self,
        device_id: &str,
        cluster_name: &str,
        properties: &str,
    ) -> Result<bool, Error> {
        let key = (device_id, cluster_name);
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(CLUSTERS_TABLE)?;
            let current = table.get(key)?.map(|v| v.value().to_string());
            match current {
                Some(json) => {
                    let mut record: ClusterRecord = serde_json::from_str(&json)?;
                    record.properties = Some(properties.to_string());
                    record.updated_at = now();
                    let json = serde_json::to_string(&record)?;
                    table.insert(key, json.as_str())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Overwrite one attribute field. Returns false if the row does not exist.
    pub fn set_attribute_field(
        &self,
        device_id: &str,
        cluster_name: &str,
        attribute_name: &str,
        field: AttributeField,
    ) -> Result<bool, Error> {
        let key = (device_id, cluster_name, attribute_name);
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(ATTRIBUTES_TABLE)?;
            let current = table.get(key)?.map(|v| v.value().to_string());
            match current {
                Some(json) => {
                    let mut record: AttributeRecord = serde_json::from_str(&json)?;
                    field.apply(&mut record);
                    record.updated_at = now();
                    let json = serde_json::to_string(&record)?;
                    table.insert(key, json.as_str())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    fn modify_device<F>(&self, device_id: &str, f: F) -> Result<bool, Error>
    where
        F: FnOnce(&mut DeviceRecord),
    {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(DEVICES_TABLE)?;
            let current = table.get(device_id)?.map(|v| v.value().to_string());
            match current {
                Some(json) => {
                    let mut record: DeviceRecord = serde_json::from_str(&json)?;
                    f(&mut record);
                    record.updated_at = now();
                    let json = serde_json::to_string(&record)?;
                    table.insert(device_id, json.as_str())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    // ========== External upserts ==========

    /// Upsert a whole device: ensure the row, then overwrite name, state,
    /// version and node list with the record's values. `created_at` of an
    /// existing row is kept.
    pub fn save_device_info(&self, record: &DeviceRecord) -> Result<(), Error> {
        if record.device_id.is_empty() {
            return Err(Error::InvalidInput("device id must not be empty".to_string()));
        }
        self.ensure_device(&record.device_id)?;
        self.modify_device(&record.device_id, |device| {
            device.device_name = record.device_name.clone();
            device.state = record.state.clone();
            device.protocol_version = record.protocol_version.clone();
            device.node_list = record.node_list.clone();
        })?;
        Ok(())
    }

    /// Upsert an attribute value, creating the device and cluster ancestors.
    pub fn save_attribute_value(
        &self,
        device_id: &str,
        cluster_name: &str,
        attribute_name: &str,
        value: &str,
    ) -> Result<(), Error> {
        if device_id.is_empty() || cluster_name.is_empty() || attribute_name.is_empty() {
            return Err(Error::InvalidInput(format!(
                "incomplete attribute key: {}/{}/{}",
                device_id, cluster_name, attribute_name
            )));
        }
        self.ensure_device(device_id)?;
        self.ensure_cluster(device_id, cluster_name)?;
        self.ensure_attribute(device_id, cluster_name, attribute_name)?;
        self.set_attribute_field(
            device_id,
            cluster_name,
            attribute_name,
            AttributeField::Value(value.to_string()),
        )?;
        Ok(())
    }

    // ========== Reads ==========

    pub fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES_TABLE)?;
        match table.get(device_id)? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// All devices, ordered by device id ascending.
    pub fn list_devices(&self) -> Result<Vec<DeviceRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES_TABLE)?;

        let mut devices = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            devices.push(serde_json::from_str(value.value())?);
        }
        Ok(devices)
    }

    pub fn device_count(&self) -> Result<u64, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES_TABLE)?;
        Ok(table.len()?)
    }

    pub fn get_cluster(
        &self,
        device_id: &str,
        cluster_name: &str,
    ) -> Result<Option<ClusterRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CLUSTERS_TABLE)?;
        match table.get((device_id, cluster_name))? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// Clusters of a device, ordered by name.
    pub fn list_clusters(&self, device_id: &str) -> Result<Vec<ClusterRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CLUSTERS_TABLE)?;

        let mut clusters = Vec::new();
        for result in table.range((device_id, "")..)? {
            let (key, value) = result?;
            if key.value().0 != device_id {
                break;
            }
            clusters.push(serde_json::from_str(value.value())?);
        }
        Ok(clusters)
    }

    pub fn get_attribute(
        &self,
        device_id: &str,
        cluster_name: &str,
        attribute_name: &str,
    ) -> Result<Option<AttributeRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ATTRIBUTES_TABLE)?;
        match table.get((device_id, cluster_name, attribute_name))? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// Attributes of one cluster, ordered by name.
    pub fn list_attributes(
        &self,
        device_id: &str,
        cluster_name: &str,
    ) -> Result<Vec<AttributeRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ATTRIBUTES_TABLE)?;

        let mut attributes = Vec::new();
        for result in table.range((device_id, cluster_name, "")..)? {
            let (key, value) = result?;
            let (d, c, _) = key.value();
            if d != device_id || c != cluster_name {
                break;
            }
            attributes.push(serde_json::from_str(value.value())?);
        }
        Ok(attributes)
    }

    pub fn get_device_property(
        &self,
        device_id: &str,
        property_name: &str,
    ) -> Result<Option<DevicePropertyRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICE_PROPERTIES_TABLE)?;
        match table.get((device_id, property_name))? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_temp_store() -> (tempfile::TempDir, Arc<ProjectionStore>) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ProjectionStore::open(temp_dir.path().join("homie.redb")).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested/data/homie.redb");
        let store = ProjectionStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.device_count().unwrap(), 0);
    }

    #[test]
    fn test_ensure_device_is_insert_if_absent() {
        let (_dir, store) = create_temp_store();
        assert!(store.ensure_device("dev1").unwrap());
        store
            .set_device_field("dev1", DeviceField::State("ready".to_string()))
            .unwrap();

        // A second ensure must not reset the populated row
        assert!(!store.ensure_device("dev1").unwrap());
        let device = store.get_device("dev1").unwrap().unwrap();
        assert_eq!(device.state.as_deref(), Some("ready"));
    }

    #[test]
    fn test_set_field_requires_row() {
        let (_dir, store) = create_temp_store();
        assert!(!store
            .set_device_field("ghost", DeviceField::Name("x".to_string()))
            .unwrap());
        assert!(!store.set_cluster_properties("ghost", "c", "a,b").unwrap());
        assert!(!store
            .set_attribute_field("ghost", "c", "a", AttributeField::Settable(true))
            .unwrap());
        assert!(store.get_device("ghost").unwrap().is_none());
    }

    #[test]
    fn test_device_fields() {
        let (_dir, store) = create_temp_store();
        store.ensure_device("dev1").unwrap();
        for field in [
            DeviceField::Name("Lamp".to_string()),
            DeviceField::State("init".to_string()),
            DeviceField::ProtocolVersion("4.0.0".to_string()),
            DeviceField::NodeList("onoff,level".to_string()),
            DeviceField::State("ready".to_string()),
        ] {
            assert!(store.set_device_field("dev1", field).unwrap());
        }

        let device = store.get_device("dev1").unwrap().unwrap();
        assert_eq!(device.device_name.as_deref(), Some("Lamp"));
        assert_eq!(device.state.as_deref(), Some("ready"));
        assert_eq!(device.protocol_version.as_deref(), Some("4.0.0"));
        assert_eq!(device.nodes(), vec!["onoff", "level"]);
        assert!(device.updated_at >= device.created_at);
    }

    #[test]
    fn test_cluster_and_attribute_fields() {
        let (_dir, store) = create_temp_store();
        store.ensure_device("dev1").unwrap();
        assert!(store.ensure_cluster("dev1", "onoff").unwrap());
        assert!(!store.ensure_cluster("dev1", "onoff").unwrap());
        assert!(store.set_cluster_properties("dev1", "onoff", "on,toggle").unwrap());

        assert!(store.ensure_attribute("dev1", "onoff", "on").unwrap());
        store
            .set_attribute_field("dev1", "onoff", "on", AttributeField::Datatype("boolean".into()))
            .unwrap();
        store
            .set_attribute_field("dev1", "onoff", "on", AttributeField::Settable(true))
            .unwrap();
        store
            .set_attribute_field("dev1", "onoff", "on", AttributeField::FormatInfo("".into()))
            .unwrap();
        store
            .set_attribute_field("dev1", "onoff", "on", AttributeField::Value("false".into()))
            .unwrap();

        let cluster = store.get_cluster("dev1", "onoff").unwrap().unwrap();
        assert_eq!(cluster.properties.as_deref(), Some("on,toggle"));

        let attr = store.get_attribute("dev1", "onoff", "on").unwrap().unwrap();
        assert_eq!(attr.datatype.as_deref(), Some("boolean"));
        assert!(attr.settable);
        assert_eq!(attr.format_info.as_deref(), Some(""));
        assert_eq!(attr.value.as_deref(), Some("false"));
    }

    #[test]
    fn test_list_devices_ordered() {
        let (_dir, store) = create_temp_store();
        for id in ["zeta", "alpha", "mid", "Alpha"] {
            store.ensure_device(id).unwrap();
        }
        let ids: Vec<String> = store
            .list_devices()
            .unwrap()
            .into_iter()
            .map(|d| d.device_id)
            .collect();
        assert_eq!(ids, vec!["Alpha", "alpha", "mid", "zeta"]);
        assert_eq!(store.device_count().unwrap(), 4);
    }

    #[test]
    fn test_list_scoped_to_parent() {
        let (_dir, store) = create_temp_store();
        store.save_attribute_value("dev1", "level", "current", "10").unwrap();
        store.save_attribute_value("dev1", "onoff", "on", "true").unwrap();
        store.save_attribute_value("dev1", "onoff", "default", "false").unwrap();
        store.save_attribute_value("dev10", "onoff", "on", "false").unwrap();
        store.save_attribute_value("dev2", "onoff", "on", "true").unwrap();

        let clusters: Vec<String> = store
            .list_clusters("dev1")
            .unwrap()
            .into_iter()
            .map(|c| c.cluster_name)
            .collect();
        assert_eq!(clusters, vec!["level", "onoff"]);

        let attrs: Vec<String> = store
            .list_attributes("dev1", "onoff")
            .unwrap()
            .into_iter()
            .map(|a| a.attribute_name)
            .collect();
        assert_eq!(attrs, vec!["default", "on"]);

        assert!(store.list_clusters("dev3").unwrap().is_empty());
        assert!(store.list_attributes("dev1", "color").unwrap().is_empty());
    }

    #[test]
    fn test_save_device_info_overwrites_all_fields() {
        let (_dir, store) = create_temp_store();
        store.ensure_device("dev1").unwrap();
        store
            .set_device_field("dev1", DeviceField::State("ready".to_string()))
            .unwrap();
        let created_at = store.get_device("dev1").unwrap().unwrap().created_at;

        let record = DeviceRecord::new("dev1", 0).with_name("Lamp");
        store.save_device_info(&record).unwrap();

        let device = store.get_device("dev1").unwrap().unwrap();
        assert_eq!(device.device_name.as_deref(), Some("Lamp"));
        // Unset fields in the record clear the stored ones
        assert_eq!(device.state, None);
        assert_eq!(device.created_at, created_at);

        assert!(store.save_device_info(&DeviceRecord::default()).is_err());
    }

    #[test]
    fn test_save_attribute_value_creates_ancestors() {
        let (_dir, store) = create_temp_store();
        store.save_attribute_value("dev1", "temp", "celsius", "21.5").unwrap();
        store.save_attribute_value("dev1", "temp", "celsius", "22.0").unwrap();

        assert!(store.get_device("dev1").unwrap().is_some());
        assert!(store.get_cluster("dev1", "temp").unwrap().is_some());
        let attr = store.get_attribute("dev1", "temp", "celsius").unwrap().unwrap();
        assert_eq!(attr.value.as_deref(), Some("22.0"));
        assert!(!attr.settable);

        assert!(store.save_attribute_value("dev1", "", "x", "1").is_err());
    }

    #[test]
    fn test_second_open_reports_locked() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("homie.redb");
        let first = ProjectionStore::open(&path).unwrap();

        let err = ProjectionStore::open(&path).err().unwrap();
        assert!(matches!(&err, Error::Locked(p) if p == &path));

        // The lock goes away with the first handle
        drop(first);
        assert!(ProjectionStore::open(&path).is_ok());
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("homie.redb");
        {
            let store = ProjectionStore::open(&path).unwrap();
            store.save_attribute_value("dev1", "onoff", "on", "true").unwrap();
        }
        let store = ProjectionStore::open(&path).unwrap();
        assert_eq!(store.list_devices().unwrap().len(), 1);
        assert!(store.get_device_property("dev1", "anything").unwrap().is_none());
    }

    #[test]
    fn test_stored_row_uses_column_names() {
        let (_dir, store) = create_temp_store();
        store.ensure_device("dev1").unwrap();
        store
            .set_device_field("dev1", DeviceField::ProtocolVersion("4.0.0".to_string()))
            .unwrap();

        let read_txn = store.db.begin_read().unwrap();
        let table = read_txn.open_table(DEVICES_TABLE).unwrap();
        let raw = table.get("dev1").unwrap().unwrap().value().to_string();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["topic_id"], "dev1");
        assert_eq!(json["homie_version"], "4.0.0");
    }
}
