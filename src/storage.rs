use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteOptions, DB};
use serde::{de::DeserializeOwned, Serialize};
use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

// Using bincode for compact binary serialization, zstd on top for blocks
// full of signatures and public keys.

pub const CF_BLOCK: &str = "block";
pub const CF_BRIDGE_TX: &str = "bridge_tx";
pub const CF_BRIDGE_ARCHIVE: &str = "bridge_archive";
pub const CF_BRIDGE_CLAIMS: &str = "bridge_claims";
pub const CF_VALIDATOR: &str = "validator";
pub const CF_BRIDGE_CONFIG: &str = "bridge_config";

pub const COLUMN_FAMILIES: [&str; 7] = [
    "default",
    CF_BLOCK,
    CF_BRIDGE_TX,
    CF_BRIDGE_ARCHIVE,
    CF_BRIDGE_CLAIMS,
    CF_VALIDATOR,
    CF_BRIDGE_CONFIG,
];

const ZSTD_LEVEL: i32 = 3;

/// Durable keyed record storage. The ledger and the bridge coordinator only
/// talk to this trait; crash consistency is the implementation's business.
pub trait RecordStore: Send + Sync {
    fn put_raw(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<()>;
    fn get_raw(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn delete(&self, cf: &str, key: &[u8]) -> Result<()>;
    /// All entries of a column family in key order.
    fn scan(&self, cf: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Typed helpers over any [`RecordStore`].
pub trait RecordStoreExt: RecordStore {
    fn put<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let raw = bincode::serialize(value)
            .with_context(|| format!("Failed to serialize value for key '{key:?}' in CF '{cf}'"))?;
        let packed = zstd::encode_all(&raw[..], ZSTD_LEVEL).context("zstd compression failed")?;
        self.put_raw(cf, key, &packed)
    }

    fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.get_raw(cf, key)? {
            Some(value) => decode(cf, key, &value).map(Some),
            None => Ok(None),
        }
    }

    fn scan_values<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        self.scan(cf)?
            .into_iter()
            .map(|(k, v)| decode(cf, &k, &v))
            .collect()
    }
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {}

fn decode<T: DeserializeOwned>(cf: &str, key: &[u8], value: &[u8]) -> Result<T> {
    let raw = zstd::decode_all(value)
        .with_context(|| format!("Failed to decompress value for key '{key:?}' in CF '{cf}'"))?;
    bincode::deserialize(&raw)
        .with_context(|| format!("Failed to deserialize value for key '{key:?}' in CF '{cf}'"))
}

/// RocksDB-backed store, one column family per record kind.
pub struct Store {
    db: DB,
    path: String,
}

impl Store {
    pub fn open(base_path: &str) -> Result<Self> {
        let mut cf_opts = Options::default();
        cf_opts.set_write_buffer_size(64 * 1024 * 1024);
        cf_opts.set_max_write_buffer_number(2);
        cf_opts.set_target_file_size_base(64 * 1024 * 1024);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, cf_opts.clone()))
            .collect();

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let wal_dir = format!("{base_path}/logs");
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("Failed to create database directory '{base_path}'"))?;
        std::fs::create_dir_all(&wal_dir).ok();
        db_opts.set_wal_dir(&wal_dir);

        db_opts.set_use_fsync(false);
        db_opts.set_bytes_per_sync(8 * 1024 * 1024);
        db_opts.set_wal_bytes_per_sync(8 * 1024 * 1024);
        db_opts.set_max_background_jobs(4);
        db_opts.set_max_open_files(512);
        db_opts.set_wal_recovery_mode(rocksdb::DBRecoveryMode::TolerateCorruptedTailRecords);
        db_opts.set_keep_log_file_num(10);

        let db = DB::open_cf_descriptors(&db_opts, base_path, cf_descriptors)
            .with_context(|| format!("Failed to open database at '{base_path}'"))?;

        let store = Store { db, path: base_path.to_string() };
        store.health_check().context("Database health check failed during initialization")?;
        info!(path = %store.path, "database opened");
        Ok(store)
    }

    /// Write/read/delete probe on the default column family.
    pub fn health_check(&self) -> Result<()> {
        let test_key = b"health_check";
        self.db.put(test_key, b"ok").context("Database write test failed")?;
        let value = self.db.get(test_key).context("Database read test failed")?;
        if value.as_deref() != Some(b"ok") {
            anyhow::bail!("Database read/write consistency check failed");
        }
        self.db.delete(test_key).context("Database delete test failed")?;
        Ok(())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn handle(&self, cf: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf)
            .ok_or_else(|| anyhow::anyhow!("Column family '{}' not found", cf))
    }
}

impl RecordStore for Store {
    fn put_raw(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let handle = self.handle(cf)?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .put_cf_opt(handle, key, value, &write_opts)
            .with_context(|| format!("Failed to PUT to database for key '{key:?}' in CF '{cf}'"))
    }

    fn get_raw(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let handle = self.handle(cf)?;
        Ok(self.db.get_cf(handle, key)?)
    }

    fn delete(&self, cf: &str, key: &[u8]) -> Result<()> {
        let handle = self.handle(cf)?;
        self.db
            .delete_cf(handle, key)
            .with_context(|| format!("Failed to DELETE key '{key:?}' in CF '{cf}'"))
    }

    fn scan(&self, cf: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let handle = self.handle(cf)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (k, v) = item?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    fn flush(&self) -> Result<()> {
        for cf in COLUMN_FAMILIES {
            if let Some(handle) = self.db.cf_handle(cf) {
                self.db.flush_cf(handle).with_context(|| format!("Failed to flush CF '{cf}'"))?;
            }
        }
        debug!(path = %self.path, "database flushed");
        Ok(())
    }
}

/// Process-local store for tests and throwaway nodes.
#[derive(Default)]
pub struct MemoryStore {
    cfs: RwLock<HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn RecordStore> {
        Arc::new(Self::new())
    }
}

impl RecordStore for MemoryStore {
    fn put_raw(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.cfs
            .write()
            .entry(cf.to_string())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get_raw(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.cfs.read().get(cf).and_then(|m| m.get(key).cloned()))
    }

    fn delete(&self, cf: &str, key: &[u8]) -> Result<()> {
        if let Some(m) = self.cfs.write().get_mut(cf) {
            m.remove(key);
        }
        Ok(())
    }

    fn scan(&self, cf: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .cfs
            .read()
            .get(cf)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

/// Open the on-disk store described by the config.
pub fn open(cfg: &crate::config::Storage) -> Result<Arc<Store>> {
    Ok(Arc::new(Store::open(&cfg.path)?))
}
