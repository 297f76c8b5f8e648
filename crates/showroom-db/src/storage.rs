//! Object storage for record images.
//!
//! Buckets are flat: a key is a single path segment. The hosted backend is
//! reached through its storage REST API; the local backend writes files under
//! a media root that the web service exposes under `/media`.

use std::{
    io::ErrorKind,
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::rest::remote_message;

/// Object store contract: upload by key, public URL of a key, bulk removal.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<()>;

    /// Public retrieval URL for a stored key. Pure string derivation.
    fn public_url(&self, bucket: &str, key: &str) -> String;

    async fn remove_objects(&self, bucket: &str, keys: &[String]) -> Result<()>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage key '{0}' is not a single safe path segment")]
    InvalidKey(String),
    #[error("object '{bucket}/{key}' already exists")]
    AlreadyExists { bucket: String, key: String },
    #[error("storage service returned {status}: {message}")]
    Remote { status: u16, message: String },
}

fn validate_segment(value: &str) -> Result<(), StorageError> {
    let safe = !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0']);
    if safe {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(value.to_owned()))
    }
}

/// Filesystem-backed store: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base: String,
}

impl LocalObjectStorage {
    /// `public_base` is the URL prefix under which `root` is served
    /// (e.g. `http://127.0.0.1:8080/media`).
    pub fn new(root: impl Into<PathBuf>, public_base: &str) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        validate_segment(bucket)?;
        validate_segment(key)?;
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists {
                    bucket: bucket.to_owned(),
                    key: key.to_owned(),
                }
                .into())
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to open {}", path.display()))
            }
        };
        file.write_all(bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        file.flush().await?;
        debug!(bucket, key, size = bytes.len(), "object stored");
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.public_base, bucket, key)
    }

    async fn remove_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        for key in keys {
            let path = self.object_path(bucket, key)?;
            match fs::remove_file(&path).await {
                Ok(()) => debug!(bucket, key = %key, "object removed"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to remove {}", path.display()))
                }
            }
        }
        Ok(())
    }
}

/// Hosted storage reached through `/storage/v1/object`.
#[derive(Debug, Clone)]
pub struct RestObjectStorage {
    endpoint: String,
    api_key: String,
    client: Client,
}

impl RestObjectStorage {
    pub fn new(project_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for object storage")?;
        Ok(Self::with_client(project_url, api_key, client))
    }

    pub fn with_client(project_url: &str, api_key: impl Into<String>, client: Client) -> Self {
        Self {
            endpoint: format!("{}/storage/v1/object", project_url.trim_end_matches('/')),
            api_key: api_key.into(),
            client,
        }
    }
}

#[async_trait]
impl ObjectStorage for RestObjectStorage {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<()> {
        validate_segment(bucket)?;
        validate_segment(key)?;
        let response = self
            .client
            .post(format!("{}/{}/{}", self.endpoint, bucket, key))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes.to_vec())
            .send()
            .await
            .with_context(|| format!("upload of '{}/{}' failed", bucket, key))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Remote {
                status: status.as_u16(),
                message: remote_message(&body),
            }
            .into());
        }
        debug!(bucket, key, size = bytes.len(), "object uploaded");
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/public/{}/{}", self.endpoint, bucket, key)
    }

    async fn remove_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        validate_segment(bucket)?;
        let response = self
            .client
            .delete(format!("{}/{}", self.endpoint, bucket))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&json!({ "prefixes": keys }))
            .send()
            .await
            .with_context(|| format!("removal from '{}' failed", bucket))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Remote {
                status: status.as_u16(),
                message: remote_message(&body),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_store_put_and_remove() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStorage::new(temp.path(), "http://127.0.0.1:8080/media/");

        store
            .put_object("cars", "1725000000000-abc123xyz.jpg", b"jpeg", "image/jpeg")
            .await
            .unwrap();
        let stored = temp.path().join("cars").join("1725000000000-abc123xyz.jpg");
        assert_eq!(std::fs::read(&stored).unwrap(), b"jpeg");
        assert_eq!(
            store.public_url("cars", "1725000000000-abc123xyz.jpg"),
            "http://127.0.0.1:8080/media/cars/1725000000000-abc123xyz.jpg"
        );

        store
            .remove_objects(
                "cars",
                &["1725000000000-abc123xyz.jpg".into(), "never-existed.png".into()],
            )
            .await
            .unwrap();
        assert!(!stored.exists());
    }

    #[tokio::test]
    async fn local_store_never_overwrites() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStorage::new(temp.path(), "http://localhost/media");
        store
            .put_object("gallery", "a.png", b"one", "image/png")
            .await
            .unwrap();
        let err = store
            .put_object("gallery", "a.png", b"two", "image/png")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast::<StorageError>().unwrap(),
            StorageError::AlreadyExists { .. }
        ));
    }

    #[tokio::test]
    async fn local_store_rejects_nested_keys() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStorage::new(temp.path(), "http://localhost/media");
        for key in ["../escape.jpg", "nested/key.jpg", ""] {
            let err = store
                .put_object("cars", key, b"x", "image/jpeg")
                .await
                .unwrap_err();
            assert_eq!(
                err.downcast::<StorageError>().unwrap(),
                StorageError::InvalidKey(key.to_string())
            );
        }
    }

    #[test]
    fn hosted_public_url_shape() {
        let store = RestObjectStorage::with_client("https://demo.example", "key", Client::new());
        assert_eq!(
            store.public_url("gallery", "1725000000000-k2j4h5g6f.png"),
            "https://demo.example/storage/v1/object/public/gallery/1725000000000-k2j4h5g6f.png"
        );
    }
}
