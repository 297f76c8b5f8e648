//! Asset-attached record workflow.
//!
//! Writes that carry an image run as a small saga: the object is uploaded
//! first, then the row referencing it is written. If the row write fails the
//! freshly uploaded object is removed again, so a failed request leaves
//! neither a row pointing at a missing image nor an orphaned image. A replaced
//! image is only removed after the row no longer references it.

use anyhow::anyhow;
use chrono::Utc;
use serde_json::Value;
use showroom_db::{Collection, DataGateway, Filter, ObjectStorage, RecordId, Row};
use tracing::{debug, info, warn};

use crate::{
    assets::{generate_storage_key, owned_storage_key, AssetUpload, StoredAsset},
    KernelError,
};

const IMAGE_URL: &str = "image_url";
const IMAGE_KEY: &str = "image_key";

pub(crate) struct AssetWorkflow<'a> {
    gateway: &'a dyn DataGateway,
    storage: &'a dyn ObjectStorage,
    collection: Collection,
    bucket: &'static str,
}

impl<'a> AssetWorkflow<'a> {
    pub(crate) fn new(
        gateway: &'a dyn DataGateway,
        storage: &'a dyn ObjectStorage,
        collection: Collection,
        bucket: &'static str,
    ) -> Self {
        Self {
            gateway,
            storage,
            collection,
            bucket,
        }
    }

    /// Inserts `fields`, attaching `asset` when present. Returns the stored row.
    pub(crate) async fn create(
        &self,
        mut fields: Row,
        asset: Option<&AssetUpload>,
    ) -> Result<Row, KernelError> {
        let mut saga = UploadSaga::new(self.storage, self.bucket);
        if let Some(asset) = asset {
            let stored = saga.upload(asset).await?;
            attach(&mut fields, stored);
        }

        match self.gateway.insert(self.collection, vec![fields]).await {
            Ok(rows) => match rows.into_iter().next() {
                Some(row) => {
                    info!(collection = %self.collection, id = ?row.get("id"), "record created");
                    Ok(row)
                }
                None => {
                    saga.compensate().await;
                    Err(KernelError::Gateway(anyhow!(
                        "insert into '{}' returned no row",
                        self.collection
                    )))
                }
            },
            Err(err) => {
                saga.compensate().await;
                Err(KernelError::Gateway(err))
            }
        }
    }

    /// Overwrites record `id` with `fields`. Without a new asset the current
    /// image reference is carried over, unless `fields` links a different
    /// `image_url`, in which case the previously owned object is released.
    /// Returns the merged row.
    pub(crate) async fn update(
        &self,
        id: RecordId,
        mut fields: Row,
        asset: Option<&AssetUpload>,
    ) -> Result<Row, KernelError> {
        let current = self.current(id).await?;
        let mut saga = UploadSaga::new(self.storage, self.bucket);

        let replaced = match asset {
            Some(asset) => {
                let stored = saga.upload(asset).await?;
                attach(&mut fields, stored);
                self.owned_key(&current)
            }
            None => {
                let relinked = fields
                    .get(IMAGE_URL)
                    .is_some_and(|url| Some(url) != current.get(IMAGE_URL));
                if relinked {
                    fields.insert(IMAGE_KEY.into(), Value::Null);
                    let linked = self.owned_key(&fields);
                    self.owned_key(&current).filter(|old| linked.as_ref() != Some(old))
                } else {
                    for column in [IMAGE_URL, IMAGE_KEY] {
                        let value = current.get(column).cloned().unwrap_or(Value::Null);
                        fields.insert(column.into(), value);
                    }
                    None
                }
            }
        };

        match self
            .gateway
            .update(self.collection, &[Filter::id(id)], fields.clone())
            .await
        {
            Ok(0) => {
                saga.compensate().await;
                Err(KernelError::not_found(self.collection, id))
            }
            Ok(_) => {
                if let Some(old_key) = replaced {
                    self.remove_best_effort(old_key).await;
                }
                info!(collection = %self.collection, id, "record updated");
                let mut merged = current;
                merged.extend(fields);
                Ok(merged)
            }
            Err(err) => {
                saga.compensate().await;
                Err(KernelError::Gateway(err))
            }
        }
    }

    /// Removes the record's image (best effort), then the record itself.
    pub(crate) async fn delete(&self, id: RecordId) -> Result<(), KernelError> {
        let current = self.current(id).await?;
        if let Some(key) = self.owned_key(&current) {
            self.remove_best_effort(key).await;
        }

        let removed = self
            .gateway
            .delete(self.collection, &[Filter::id(id)])
            .await
            .map_err(KernelError::Gateway)?;
        if removed == 0 {
            return Err(KernelError::not_found(self.collection, id));
        }
        info!(collection = %self.collection, id, "record deleted");
        Ok(())
    }

    async fn current(&self, id: RecordId) -> Result<Row, KernelError> {
        self.gateway
            .fetch_one(self.collection, &[Filter::id(id)])
            .await
            .map_err(KernelError::Gateway)?
            .ok_or_else(|| KernelError::not_found(self.collection, id))
    }

    fn owned_key(&self, row: &Row) -> Option<String> {
        let prefix = self.storage.public_url(self.bucket, "");
        owned_storage_key(text(row, IMAGE_KEY), text(row, IMAGE_URL), &prefix)
    }

    async fn remove_best_effort(&self, key: String) {
        match self
            .storage
            .remove_objects(self.bucket, std::slice::from_ref(&key))
            .await
        {
            Ok(()) => debug!(bucket = self.bucket, key = %key, "previous image removed"),
            Err(err) => warn!(
                bucket = self.bucket,
                key = %key,
                error = %err,
                "failed to remove image; object left behind"
            ),
        }
    }
}

fn text<'r>(row: &'r Row, column: &str) -> Option<&'r str> {
    row.get(column).and_then(Value::as_str)
}

fn attach(fields: &mut Row, stored: StoredAsset) {
    fields.insert(IMAGE_URL.into(), Value::String(stored.url));
    fields.insert(IMAGE_KEY.into(), Value::String(stored.key));
}

/// Objects uploaded during one workflow run.
struct UploadSaga<'a> {
    storage: &'a dyn ObjectStorage,
    bucket: &'static str,
    uploaded: Vec<String>,
}

impl<'a> UploadSaga<'a> {
    fn new(storage: &'a dyn ObjectStorage, bucket: &'static str) -> Self {
        Self {
            storage,
            bucket,
            uploaded: Vec::new(),
        }
    }

    async fn upload(&mut self, asset: &AssetUpload) -> Result<StoredAsset, KernelError> {
        let key = generate_storage_key(&asset.file_name, Utc::now(), &mut rand::thread_rng());
        self.storage
            .put_object(self.bucket, &key, &asset.bytes, &asset.content_type())
            .await
            .map_err(KernelError::Storage)?;
        let url = self.storage.public_url(self.bucket, &key);
        debug!(bucket = self.bucket, key = %key, size = asset.bytes.len(), "image uploaded");
        self.uploaded.push(key.clone());
        Ok(StoredAsset { key, url })
    }

    /// Undoes every upload after the row write failed.
    async fn compensate(self) {
        if self.uploaded.is_empty() {
            return;
        }
        match self
            .storage
            .remove_objects(self.bucket, &self.uploaded)
            .await
        {
            Ok(()) => info!(
                bucket = self.bucket,
                keys = ?self.uploaded,
                "rolled back image upload"
            ),
            Err(err) => warn!(
                bucket = self.bucket,
                keys = ?self.uploaded,
                error = %err,
                "failed to roll back image upload; objects orphaned"
            ),
        }
    }
}
