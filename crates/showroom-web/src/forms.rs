//! Multipart admin forms.

use std::collections::HashMap;

use axum::extract::{multipart::MultipartError, Multipart};
use showroom_kernel::{AssetUpload, CarForm, GalleryForm};
use utoipa::ToSchema;

use crate::server::ApiError;

/// Text fields and file parts of one multipart body.
#[derive(Debug, Default)]
pub(crate) struct MultipartFields {
    text: HashMap<String, String>,
    files: HashMap<String, AssetUpload>,
}

impl MultipartFields {
    pub(crate) async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut fields = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            match field.file_name().map(str::to_owned) {
                Some(file_name) => {
                    let content_type = field.content_type().map(str::to_owned);
                    let bytes = field.bytes().await.map_err(multipart_error)?;
                    // An untouched file input arrives as an empty, unnamed part.
                    if file_name.is_empty() && bytes.is_empty() {
                        continue;
                    }
                    fields
                        .files
                        .insert(name, AssetUpload::new(file_name, content_type, bytes.to_vec()));
                }
                None => {
                    let value = field.text().await.map_err(multipart_error)?;
                    fields.text.insert(name, value);
                }
            }
        }
        Ok(fields)
    }

    fn text(&mut self, name: &str) -> String {
        self.text.remove(name).unwrap_or_default()
    }

    fn optional_text(&mut self, name: &str) -> Option<String> {
        self.text.remove(name)
    }

    fn file(&mut self, name: &str) -> Option<AssetUpload> {
        self.files.remove(name)
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    ApiError::new(err.status(), err.body_text())
}

/// Car form as `multipart/form-data`.
#[derive(Debug, ToSchema)]
pub(crate) struct CarUpload {
    #[schema(example = "Toyota Avanza 1.5 G")]
    pub(crate) name: String,
    /// Decimal price; must parse as a non-negative number.
    #[schema(example = "250000000")]
    pub(crate) price: String,
    /// Required on create, optional on update.
    #[schema(value_type = Option<String>, format = Binary)]
    pub(crate) image: Option<AssetUpload>,
}

impl CarUpload {
    pub(crate) async fn read(multipart: Multipart) -> Result<Self, ApiError> {
        let mut fields = MultipartFields::read(multipart).await?;
        Ok(Self {
            name: fields.text("name"),
            price: fields.text("price"),
            image: fields.file("image"),
        })
    }

    pub(crate) fn into_parts(self) -> (CarForm, Option<AssetUpload>) {
        (
            CarForm {
                name: self.name,
                price: self.price,
            },
            self.image,
        )
    }
}

/// Gallery form as `multipart/form-data`.
#[derive(Debug, ToSchema)]
pub(crate) struct GalleryUpload {
    pub(crate) description: String,
    /// Link used when no file is attached.
    pub(crate) image_url: Option<String>,
    #[schema(value_type = Option<String>, format = Binary)]
    pub(crate) image: Option<AssetUpload>,
}

impl GalleryUpload {
    pub(crate) async fn read(multipart: Multipart) -> Result<Self, ApiError> {
        let mut fields = MultipartFields::read(multipart).await?;
        Ok(Self {
            description: fields.text("description"),
            image_url: fields.optional_text("image_url"),
            image: fields.file("image"),
        })
    }

    pub(crate) fn into_parts(self) -> (GalleryForm, Option<AssetUpload>) {
        (
            GalleryForm {
                description: self.description,
                image_url: self.image_url,
            },
            self.image,
        )
    }
}
