//! Recording doubles for kernel tests.

use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use showroom_db::{
    to_row, CarFields, Collection, DataGateway, Database, Filter, ObjectStorage, RecordId, Row,
    SelectQuery,
};

use crate::{AssetUpload, KernelConfig, ShowroomKernel};

type EventLog = Arc<Mutex<Vec<String>>>;

/// Wraps the in-memory database, logging writes and failing chosen operations.
pub(crate) struct RecordingGateway {
    inner: Database,
    events: EventLog,
    failing: Mutex<HashSet<&'static str>>,
}

impl RecordingGateway {
    pub(crate) fn fail_on(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    fn check(&self, operation: &'static str, collection: Collection) -> Result<()> {
        if self.failing.lock().contains(operation) {
            Err(anyhow!("{operation} on '{collection}' unavailable"))
        } else {
            Ok(())
        }
    }

    fn record(&self, operation: &str, collection: Collection) {
        self.events.lock().push(format!("{operation} {collection}"));
    }
}

#[async_trait]
impl DataGateway for RecordingGateway {
    async fn select(&self, collection: Collection, query: &SelectQuery) -> Result<Vec<Row>> {
        self.check("select", collection)?;
        self.inner.select(collection, query).await
    }

    async fn insert(&self, collection: Collection, rows: Vec<Row>) -> Result<Vec<Row>> {
        self.record("insert", collection);
        self.check("insert", collection)?;
        self.inner.insert(collection, rows).await
    }

    async fn update(&self, collection: Collection, filters: &[Filter], changes: Row) -> Result<u64> {
        self.record("update", collection);
        self.check("update", collection)?;
        self.inner.update(collection, filters, changes).await
    }

    async fn delete(&self, collection: Collection, filters: &[Filter]) -> Result<u64> {
        self.record("delete", collection);
        self.check("delete", collection)?;
        self.inner.delete(collection, filters).await
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        self.check("count", collection)?;
        self.inner.count(collection).await
    }
}

/// In-memory bucket store whose public URLs live under `https://host/bucket/`.
pub(crate) struct RecordingStorage {
    objects: Mutex<BTreeSet<String>>,
    events: EventLog,
    fail_puts: Mutex<bool>,
    fail_removes: Mutex<bool>,
}

impl RecordingStorage {
    pub(crate) fn fail_puts(&self) {
        *self.fail_puts.lock() = true;
    }

    pub(crate) fn fail_removes(&self) {
        *self.fail_removes.lock() = true;
    }

    pub(crate) fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects.lock().contains(&format!("{bucket}/{key}"))
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[async_trait]
impl ObjectStorage for RecordingStorage {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        _bytes: &[u8],
        _content_type: &str,
    ) -> Result<()> {
        self.events.lock().push(format!("put {bucket}/{key}"));
        if *self.fail_puts.lock() {
            return Err(anyhow!("bucket '{bucket}' rejected upload"));
        }
        self.objects.lock().insert(format!("{bucket}/{key}"));
        Ok(())
    }

    fn public_url(&self, _bucket: &str, key: &str) -> String {
        format!("https://host/bucket/{key}")
    }

    async fn remove_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        let mut events = self.events.lock();
        for key in keys {
            events.push(format!("remove {bucket}/{key}"));
        }
        drop(events);
        if *self.fail_removes.lock() {
            return Err(anyhow!("bucket '{bucket}' rejected removal"));
        }
        let mut objects = self.objects.lock();
        for key in keys {
            objects.remove(&format!("{bucket}/{key}"));
        }
        Ok(())
    }
}

pub(crate) struct Harness {
    pub(crate) gateway: Arc<RecordingGateway>,
    pub(crate) storage: Arc<RecordingStorage>,
    database: Database,
    events: EventLog,
}

impl Harness {
    pub(crate) async fn new() -> Self {
        let database = Database::connect("sqlite::memory:").await.unwrap();
        let events = EventLog::default();
        let gateway = Arc::new(RecordingGateway {
            inner: database.clone(),
            events: events.clone(),
            failing: Mutex::new(HashSet::new()),
        });
        let storage = Arc::new(RecordingStorage {
            objects: Mutex::new(BTreeSet::new()),
            events: events.clone(),
            fail_puts: Mutex::new(false),
            fail_removes: Mutex::new(false),
        });
        Self {
            gateway,
            storage,
            database,
            events,
        }
    }

    pub(crate) fn kernel(&self) -> ShowroomKernel {
        ShowroomKernel::new(
            self.gateway.clone(),
            self.storage.clone(),
            KernelConfig::default(),
        )
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub(crate) fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub(crate) async fn count(&self, collection: Collection) -> u64 {
        self.database.count(collection).await.unwrap()
    }

    /// Inserts a car row directly, bypassing the workflow.
    pub(crate) async fn seed_car(
        &self,
        name: &str,
        price: f64,
        image_url: Option<&str>,
        image_key: Option<&str>,
    ) -> RecordId {
        let row = to_row(&CarFields {
            name: name.into(),
            price,
            image_url: image_url.map(str::to_owned),
            image_key: image_key.map(str::to_owned),
        })
        .unwrap();
        let inserted = self
            .database
            .insert(Collection::Cars, vec![row])
            .await
            .unwrap();
        inserted[0]["id"].as_i64().unwrap()
    }
}

pub(crate) fn kernel_with(harness: &Harness, tweak: impl FnOnce(&mut KernelConfig)) -> ShowroomKernel {
    let mut config = KernelConfig::default();
    tweak(&mut config);
    ShowroomKernel::new(harness.gateway.clone(), harness.storage.clone(), config)
}

pub(crate) fn png(file_name: &str) -> AssetUpload {
    AssetUpload::new(
        file_name,
        Some("image/png".into()),
        b"\x89PNG\r\n\x1a\n".to_vec(),
    )
}
