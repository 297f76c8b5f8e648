//! Showroom site orchestration.
//!
//! The kernel owns the rules the public pages and the admin area share:
//! validation of admin forms, the asset-attached record workflow (upload an
//! image, then write the row that references it, compensating on failure),
//! degraded public reads, and credential checks. Storage is reached only
//! through the [`DataGateway`] and [`ObjectStorage`] contracts from
//! `showroom-db`, so the same kernel drives the hosted backend and the local
//! SQLite/filesystem pair.

mod admin;
mod assets;
mod catalog;
mod workflow;

#[cfg(test)]
mod testing;

use std::{fmt, sync::Arc};

use serde::Serialize;
use showroom_db::{Collection, DataGateway, ObjectStorage, RecordId};
use thiserror::Error;

pub use admin::{Credentials, DashboardCounts, ProfileForm};
pub use assets::{
    generate_storage_key, key_from_public_url, owned_storage_key, AssetUpload, StoredAsset,
};
pub use catalog::{CarForm, GalleryForm, Showcase};

const DEFAULT_FEATURED_LIMIT: u32 = 6;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024;

/// Tunables for the kernel.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Items per section on the home page.
    pub featured_limit: u32,
    pub max_upload_bytes: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            featured_limit: DEFAULT_FEATURED_LIMIT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Entry point used by the web layer.
#[derive(Clone)]
pub struct ShowroomKernel {
    gateway: Arc<dyn DataGateway>,
    storage: Arc<dyn ObjectStorage>,
    config: KernelConfig,
}

impl ShowroomKernel {
    pub fn new(
        gateway: Arc<dyn DataGateway>,
        storage: Arc<dyn ObjectStorage>,
        config: KernelConfig,
    ) -> Self {
        Self {
            gateway,
            storage,
            config,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }
}

impl fmt::Debug for ShowroomKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShowroomKernel")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A single rejected form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Every problem found in one submitted form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.fields.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn into_result(self) -> Result<(), KernelError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(KernelError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, error) in self.fields.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", error.field, error.message)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("invalid input: {0}")]
    Validation(ValidationError),
    #[error("{collection} record {id} not found")]
    NotFound {
        collection: Collection,
        id: RecordId,
    },
    #[error("invalid username or admin code")]
    InvalidCredentials,
    #[error("image upload failed: {0}")]
    Storage(anyhow::Error),
    #[error(transparent)]
    Gateway(anyhow::Error),
}

impl KernelError {
    pub(crate) fn not_found(collection: Collection, id: RecordId) -> Self {
        KernelError::NotFound { collection, id }
    }
}

impl From<anyhow::Error> for KernelError {
    fn from(value: anyhow::Error) -> Self {
        KernelError::Gateway(value)
    }
}

impl From<ValidationError> for KernelError {
    fn from(value: ValidationError) -> Self {
        KernelError::Validation(value)
    }
}
