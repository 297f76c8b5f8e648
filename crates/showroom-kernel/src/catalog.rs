//! Car listings and the activity gallery: public reads and admin writes.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use showroom_db::{
    from_row, to_row, Car, CarFields, Collection, Filter, GalleryFields, GalleryItem, RecordId,
    SelectQuery,
};
use tracing::{instrument, warn};

use crate::{
    assets::{key_from_public_url, validate_asset, AssetUpload},
    workflow::AssetWorkflow,
    KernelError, ShowroomKernel, ValidationError,
};

/// Car form as submitted by an admin. `price` is the raw text field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CarForm {
    pub name: String,
    pub price: String,
}

/// Gallery form. `image_url` is a hand-entered link used when no file is sent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GalleryForm {
    pub description: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Home page content: the newest cars and gallery items.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Showcase {
    pub featured_cars: Vec<Car>,
    pub featured_gallery: Vec<GalleryItem>,
}

impl CarForm {
    fn validate(
        &self,
        image: Option<&AssetUpload>,
        image_required: bool,
        max_upload_bytes: usize,
    ) -> Result<f64, KernelError> {
        let mut errors = ValidationError::default();
        if self.name.trim().is_empty() {
            errors.push("name", "name is required");
        }
        let price = parse_price(&self.price, &mut errors);
        match image {
            Some(image) => validate_asset("image", image, max_upload_bytes, &mut errors),
            None if image_required => errors.push("image", "image is required"),
            None => {}
        }
        errors.into_result()?;
        Ok(price.unwrap_or_default())
    }
}

fn parse_price(raw: &str, errors: &mut ValidationError) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        errors.push("price", "price is required");
        return None;
    }
    match raw.parse::<f64>() {
        Ok(price) if price.is_finite() && price >= 0.0 => Some(price),
        Ok(_) => {
            errors.push("price", "price must be zero or more");
            None
        }
        Err(_) => {
            errors.push("price", "price must be a number");
            None
        }
    }
}

impl GalleryForm {
    /// Returns the hand-entered URL to store when no file accompanies the form.
    fn validate(
        &self,
        image: Option<&AssetUpload>,
        max_upload_bytes: usize,
    ) -> Result<Option<String>, KernelError> {
        let mut errors = ValidationError::default();
        if self.description.trim().is_empty() {
            errors.push("description", "description is required");
        }
        let manual_url = self
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty());
        if let Some(url) = manual_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push("image_url", "image_url must be an http(s) URL");
            }
        }
        if let Some(image) = image {
            validate_asset("image", image, max_upload_bytes, &mut errors);
        }
        errors.into_result()?;
        Ok(manual_url.map(str::to_owned))
    }
}

impl ShowroomKernel {
    fn workflow(&self, collection: Collection) -> AssetWorkflow<'_> {
        AssetWorkflow::new(
            self.gateway.as_ref(),
            self.storage.as_ref(),
            collection,
            bucket_of(collection),
        )
    }

    /// A hand-entered link must not point into the gallery bucket: the row
    /// would carry no key and later be taken to own that object. Re-sending
    /// the item's current link is allowed.
    async fn check_manual_link(
        &self,
        url: &str,
        item: Option<RecordId>,
    ) -> Result<(), KernelError> {
        let prefix = self
            .storage
            .public_url(bucket_of(Collection::Gallery), "");
        if key_from_public_url(url, &prefix).is_none() {
            return Ok(());
        }
        if let Some(id) = item {
            let current = self.gallery_item(id).await?;
            if current.image_url.as_deref() == Some(url) {
                return Ok(());
            }
        }
        Err(ValidationError::single(
            "image_url",
            "image_url must not point at an uploaded gallery image; attach the file instead",
        )
        .into())
    }

    pub(crate) async fn list<T: DeserializeOwned>(
        &self,
        collection: Collection,
        limit: Option<u32>,
    ) -> Result<Vec<T>, KernelError> {
        let rows = self
            .gateway
            .select(collection, &SelectQuery::newest(limit))
            .await?;
        rows.into_iter()
            .map(|row| from_row(collection, row).map_err(KernelError::Gateway))
            .collect()
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        collection: Collection,
        id: RecordId,
    ) -> Result<T, KernelError> {
        let row = self
            .gateway
            .fetch_one(collection, &[Filter::id(id)])
            .await?
            .ok_or_else(|| KernelError::not_found(collection, id))?;
        Ok(from_row(collection, row)?)
    }

    /// All cars, newest first. A failed fetch renders as an empty list.
    pub async fn price_list(&self) -> Vec<Car> {
        or_empty(Collection::Cars, self.list(Collection::Cars, None).await)
    }

    /// All gallery items, newest first. A failed fetch renders as an empty list.
    pub async fn gallery_page(&self) -> Vec<GalleryItem> {
        or_empty(Collection::Gallery, self.list(Collection::Gallery, None).await)
    }

    /// Home page sections, fetched concurrently. Each degrades on its own.
    pub async fn showcase(&self) -> Showcase {
        let limit = Some(self.config.featured_limit);
        let (cars, gallery) = tokio::join!(
            self.list::<Car>(Collection::Cars, limit),
            self.list::<GalleryItem>(Collection::Gallery, limit),
        );
        Showcase {
            featured_cars: or_empty(Collection::Cars, cars),
            featured_gallery: or_empty(Collection::Gallery, gallery),
        }
    }

    pub async fn car(&self, id: RecordId) -> Result<Car, KernelError> {
        self.get(Collection::Cars, id).await
    }

    pub async fn gallery_item(&self, id: RecordId) -> Result<GalleryItem, KernelError> {
        self.get(Collection::Gallery, id).await
    }

    #[instrument(skip(self, form, image), fields(name = %form.name))]
    pub async fn create_car(
        &self,
        form: CarForm,
        image: Option<AssetUpload>,
    ) -> Result<Car, KernelError> {
        let price = form.validate(image.as_ref(), true, self.config.max_upload_bytes)?;
        let fields = to_row(&CarFields {
            name: form.name.trim().to_string(),
            price,
            image_url: None,
            image_key: None,
        })?;
        let row = self
            .workflow(Collection::Cars)
            .create(fields, image.as_ref())
            .await?;
        Ok(from_row(Collection::Cars, row)?)
    }

    /// Overwrites name and price; the image is replaced only when a new
    /// file is supplied.
    #[instrument(skip(self, form, image))]
    pub async fn update_car(
        &self,
        id: RecordId,
        form: CarForm,
        image: Option<AssetUpload>,
    ) -> Result<Car, KernelError> {
        let price = form.validate(image.as_ref(), false, self.config.max_upload_bytes)?;
        let mut fields = to_row(&CarFields {
            name: form.name.trim().to_string(),
            price,
            image_url: None,
            image_key: None,
        })?;
        fields.remove("image_url");
        fields.remove("image_key");
        let row = self
            .workflow(Collection::Cars)
            .update(id, fields, image.as_ref())
            .await?;
        Ok(from_row(Collection::Cars, row)?)
    }

    #[instrument(skip(self))]
    pub async fn delete_car(&self, id: RecordId) -> Result<(), KernelError> {
        self.workflow(Collection::Cars).delete(id).await
    }

    /// Creates a gallery item from an uploaded file, or from a hand-entered
    /// URL when no file is sent. Neither is required.
    #[instrument(skip(self, form, image))]
    pub async fn create_gallery_item(
        &self,
        form: GalleryForm,
        image: Option<AssetUpload>,
    ) -> Result<GalleryItem, KernelError> {
        let manual_url = form.validate(image.as_ref(), self.config.max_upload_bytes)?;
        let manual_url = if image.is_some() { None } else { manual_url };
        if let Some(url) = manual_url.as_deref() {
            self.check_manual_link(url, None).await?;
        }
        let fields = to_row(&GalleryFields {
            description: form.description.trim().to_string(),
            image_url: manual_url,
            image_key: None,
        })?;
        let row = self
            .workflow(Collection::Gallery)
            .create(fields, image.as_ref())
            .await?;
        Ok(from_row(Collection::Gallery, row)?)
    }

    /// Updates the description. A new file replaces the image; otherwise
    /// a hand-entered URL replaces it, and without either the stored image
    /// is preserved.
    #[instrument(skip(self, form, image))]
    pub async fn update_gallery_item(
        &self,
        id: RecordId,
        form: GalleryForm,
        image: Option<AssetUpload>,
    ) -> Result<GalleryItem, KernelError> {
        let manual_url = form.validate(image.as_ref(), self.config.max_upload_bytes)?;
        let mut fields = to_row(&GalleryFields {
            description: form.description.trim().to_string(),
            image_url: None,
            image_key: None,
        })?;
        fields.remove("image_url");
        fields.remove("image_key");

        if let (None, Some(url)) = (image.as_ref(), manual_url) {
            self.check_manual_link(&url, Some(id)).await?;
            fields.insert("image_url".into(), url.into());
        }
        let row = self
            .workflow(Collection::Gallery)
            .update(id, fields, image.as_ref())
            .await?;
        Ok(from_row(Collection::Gallery, row)?)
    }

    #[instrument(skip(self))]
    pub async fn delete_gallery_item(&self, id: RecordId) -> Result<(), KernelError> {
        self.workflow(Collection::Gallery).delete(id).await
    }
}

fn bucket_of(collection: Collection) -> &'static str {
    collection.bucket().unwrap_or(collection.as_str())
}

fn or_empty<T>(collection: Collection, result: Result<Vec<T>, KernelError>) -> Vec<T> {
    match result {
        Ok(items) => items,
        Err(err) => {
            warn!(collection = %collection, error = %err, "listing unavailable; rendering empty");
            Vec::new()
        }
    }
}
