//! Image assets attached to records: upload payloads, storage keys and the
//! mapping from a stored record back to the object it owns.

use std::{fmt, path::Path};

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::ValidationError;

const KEY_SUFFIX_LEN: usize = 9;
const MAX_EXTENSION_LEN: usize = 10;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// File received from an admin form.
#[derive(Clone)]
pub struct AssetUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl AssetUpload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: Option<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            bytes: bytes.into(),
        }
    }

    /// Declared content type, or a guess from the file name when the client
    /// sent none (or only the generic octet-stream).
    pub fn content_type(&self) -> String {
        match self.content_type.as_deref().map(str::trim) {
            Some(declared) if !declared.is_empty() && declared != "application/octet-stream" => {
                declared.to_ascii_lowercase()
            }
            _ => mime_guess::from_path(&self.file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.content_type().starts_with("image/")
    }
}

impl fmt::Debug for AssetUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetUpload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Where an uploaded asset ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub key: String,
    pub url: String,
}

/// Records asset problems for `field` into `errors`.
pub(crate) fn validate_asset(
    field: &'static str,
    asset: &AssetUpload,
    max_bytes: usize,
    errors: &mut ValidationError,
) {
    if asset.bytes.is_empty() {
        errors.push(field, "file is empty");
    } else if asset.bytes.len() > max_bytes {
        errors.push(
            field,
            format!("file is larger than {} bytes", max_bytes),
        );
    }
    if !asset.is_image() {
        errors.push(field, "file must be an image");
    }
}

/// Collision-resistant key: `<unix-millis>-<9 base36 chars>[.<ext>]`.
pub fn generate_storage_key<R: Rng + ?Sized>(
    file_name: &str,
    now: DateTime<Utc>,
    rng: &mut R,
) -> String {
    let suffix: String = (0..KEY_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    let mut key = format!("{}-{}", now.timestamp_millis(), suffix);
    if let Some(ext) = file_extension(file_name) {
        key.push('.');
        key.push_str(&ext);
    }
    key
}

fn file_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    let ext: String = ext
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(MAX_EXTENSION_LEN)
        .collect::<String>()
        .to_ascii_lowercase();
    (!ext.is_empty()).then_some(ext)
}

/// Recovers a storage key from a public URL issued under `public_prefix`.
///
/// URLs pointing anywhere else (hand-entered gallery links, other hosts)
/// own no object in the bucket and yield `None`.
pub fn key_from_public_url(url: &str, public_prefix: &str) -> Option<String> {
    let rest = url.trim().strip_prefix(public_prefix)?;
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    (!rest.is_empty()).then(|| rest.to_string())
}

/// Storage key owned by a record: the explicit key when one was stored,
/// otherwise derived from the public URL for rows written without one.
pub fn owned_storage_key(
    image_key: Option<&str>,
    image_url: Option<&str>,
    public_prefix: &str,
) -> Option<String> {
    match image_key.map(str::trim).filter(|key| !key.is_empty()) {
        Some(key) => Some(key.to_string()),
        None => image_url.and_then(|url| key_from_public_url(url, public_prefix)),
    }
}
