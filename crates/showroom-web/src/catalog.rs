use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use showroom_db::{Car, GalleryItem};
use showroom_kernel::Showcase;
use utoipa::ToSchema;

use crate::server::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct CarResponse {
    pub id: i64,
    pub name: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Car> for CarResponse {
    fn from(car: Car) -> Self {
        Self {
            id: car.id,
            name: car.name,
            price: car.price,
            image_url: car.image_url,
            created_at: car.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GalleryItemResponse {
    pub id: i64,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<GalleryItem> for GalleryItemResponse {
    fn from(item: GalleryItem) -> Self {
        Self {
            id: item.id,
            description: item.description,
            image_url: item.image_url,
            created_at: item.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HomeResponse {
    pub featured_cars: Vec<CarResponse>,
    pub featured_gallery: Vec<GalleryItemResponse>,
}

impl From<Showcase> for HomeResponse {
    fn from(showcase: Showcase) -> Self {
        Self {
            featured_cars: cars(showcase.featured_cars),
            featured_gallery: gallery(showcase.featured_gallery),
        }
    }
}

pub(crate) fn cars(cars: Vec<Car>) -> Vec<CarResponse> {
    cars.into_iter().map(CarResponse::from).collect()
}

pub(crate) fn gallery(items: Vec<GalleryItem>) -> Vec<GalleryItemResponse> {
    items.into_iter().map(GalleryItemResponse::from).collect()
}

#[utoipa::path(
    get,
    path = "/api/v1/home",
    responses((status = 200, description = "Newest cars and gallery items", body = HomeResponse))
)]
pub async fn home(State(state): State<Arc<AppState>>) -> Json<HomeResponse> {
    Json(state.kernel.showcase().await.into())
}

#[utoipa::path(
    get,
    path = "/api/v1/cars",
    responses((status = 200, description = "Price list, newest first", body = [CarResponse]))
)]
pub async fn price_list(State(state): State<Arc<AppState>>) -> Json<Vec<CarResponse>> {
    Json(cars(state.kernel.price_list().await))
}

#[utoipa::path(
    get,
    path = "/api/v1/gallery",
    responses((status = 200, description = "Activity gallery, newest first", body = [GalleryItemResponse]))
)]
pub async fn gallery_page(State(state): State<Arc<AppState>>) -> Json<Vec<GalleryItemResponse>> {
    Json(gallery(state.kernel.gallery_page().await))
}
