use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use showroom_db::AdminAccount;
use showroom_kernel::{Credentials, DashboardCounts, KernelError, ProfileForm};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    catalog::{cars, gallery, CarResponse, GalleryItemResponse},
    forms::{CarUpload, GalleryUpload},
    server::{ApiError, AppState, ErrorBody},
    session::{clear_session_cookie, session_cookie, AdminSession},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginBody {
    pub username: String,
    pub admin_code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProfileBody {
    pub username: String,
    pub admin_code: String,
}

/// Admin identity as exposed over the API. The admin code is never echoed.
#[derive(Debug, Serialize, ToSchema)]
pub struct AdminProfile {
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl From<AdminAccount> for AdminProfile {
    fn from(admin: AdminAccount) -> Self {
        Self {
            id: admin.id,
            username: admin.username,
            created_at: admin.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub admin: AdminProfile,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardResponse {
    pub cars: u64,
    pub gallery: u64,
    pub admins: u64,
}

impl From<DashboardCounts> for DashboardResponse {
    fn from(counts: DashboardCounts) -> Self {
        Self {
            cars: counts.cars,
            gallery: counts.gallery,
            admins: counts.admins,
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/login",
    request_body = LoginBody,
    responses(
        (status = 200, description = "Signed in; session cookie set", body = LoginResponse),
        (status = 400, description = "Missing username or admin code", body = ErrorBody),
        (status = 401, description = "Unknown username or admin code", body = ErrorBody),
        (status = 429, description = "Too many sign-in attempts"),
        (status = 502, description = "Record store unavailable", body = ErrorBody)
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginBody>,
) -> Result<Response, ApiError> {
    let credentials = Credentials {
        username: body.username,
        admin_code: body.admin_code,
    };
    let admin = state.kernel.login(credentials).await.map_err(|err| match err {
        KernelError::Gateway(_) => ApiError::bad_gateway("login failed"),
        other => ApiError::from(other),
    })?;

    let issued = state.sessions.issue(admin.clone());
    info!(admin_id = admin.id, "admin session issued");
    let cookie = session_cookie(&issued.token, state.sessions.ttl());
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(ApiError::internal)?,
    );
    let body = LoginResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        admin: admin.into(),
    };
    Ok((headers, Json(body)).into_response())
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/logout",
    responses(
        (status = 204, description = "Session revoked and cookie cleared"),
        (status = 401, description = "No admin session", body = ErrorBody)
    ),
    security(("adminSession" = []))
)]
pub async fn logout(State(state): State<Arc<AppState>>, session: AdminSession) -> Response {
    state.sessions.revoke(&session.token);
    info!(admin_id = session.admin.id, "admin session revoked");
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie())],
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/dashboard",
    responses(
        (status = 200, description = "Record counts", body = DashboardResponse),
        (status = 401, description = "No admin session", body = ErrorBody)
    ),
    security(("adminSession" = []))
)]
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
) -> Json<DashboardResponse> {
    Json(state.kernel.dashboard().await.into())
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/profile",
    responses(
        (status = 200, description = "Signed-in admin", body = AdminProfile),
        (status = 401, description = "No admin session", body = ErrorBody),
        (status = 404, description = "Admin no longer exists", body = ErrorBody)
    ),
    security(("adminSession" = []))
)]
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    session: AdminSession,
) -> Result<Json<AdminProfile>, ApiError> {
    let admin = state.kernel.admin_account(session.admin.id).await?;
    Ok(Json(admin.into()))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/profile",
    request_body = ProfileBody,
    responses(
        (status = 200, description = "Profile updated", body = AdminProfile),
        (status = 400, description = "Missing username or admin code", body = ErrorBody),
        (status = 401, description = "No admin session", body = ErrorBody),
        (status = 502, description = "Record store unavailable", body = ErrorBody)
    ),
    security(("adminSession" = []))
)]
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    session: AdminSession,
    Json(body): Json<ProfileBody>,
) -> Result<Json<AdminProfile>, ApiError> {
    let form = ProfileForm {
        username: body.username,
        admin_code: body.admin_code,
    };
    let admin = state.kernel.update_profile(session.admin.id, form).await?;
    state.sessions.refresh_admin(&admin);
    Ok(Json(admin.into()))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/cars",
    responses(
        (status = 200, description = "All cars, newest first", body = [CarResponse]),
        (status = 401, description = "No admin session", body = ErrorBody)
    ),
    security(("adminSession" = []))
)]
pub async fn list_cars(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
) -> Json<Vec<CarResponse>> {
    Json(cars(state.kernel.price_list().await))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/cars/{id}",
    params(("id" = i64, Path, description = "Car identifier")),
    responses(
        (status = 200, description = "Car details", body = CarResponse),
        (status = 401, description = "No admin session", body = ErrorBody),
        (status = 404, description = "Car not found", body = ErrorBody)
    ),
    security(("adminSession" = []))
)]
pub async fn get_car(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(id): Path<i64>,
) -> Result<Json<CarResponse>, ApiError> {
    Ok(Json(state.kernel.car(id).await?.into()))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/cars",
    request_body(content = CarUpload, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Car created", body = CarResponse),
        (status = 400, description = "Invalid form", body = ErrorBody),
        (status = 401, description = "No admin session", body = ErrorBody),
        (status = 502, description = "Upload or record store failed", body = ErrorBody)
    ),
    security(("adminSession" = []))
)]
pub async fn create_car(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CarResponse>), ApiError> {
    let (form, image) = CarUpload::read(multipart).await?.into_parts();
    let car = state.kernel.create_car(form, image).await?;
    Ok((StatusCode::CREATED, Json(car.into())))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/cars/{id}",
    params(("id" = i64, Path, description = "Car identifier")),
    request_body(content = CarUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Car updated", body = CarResponse),
        (status = 400, description = "Invalid form", body = ErrorBody),
        (status = 401, description = "No admin session", body = ErrorBody),
        (status = 404, description = "Car not found", body = ErrorBody),
        (status = 502, description = "Upload or record store failed", body = ErrorBody)
    ),
    security(("adminSession" = []))
)]
pub async fn update_car(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<Json<CarResponse>, ApiError> {
    let (form, image) = CarUpload::read(multipart).await?.into_parts();
    let car = state.kernel.update_car(id, form, image).await?;
    Ok(Json(car.into()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/cars/{id}",
    params(("id" = i64, Path, description = "Car identifier")),
    responses(
        (status = 204, description = "Car and its image removed"),
        (status = 401, description = "No admin session", body = ErrorBody),
        (status = 404, description = "Car not found", body = ErrorBody),
        (status = 502, description = "Record store failed", body = ErrorBody)
    ),
    security(("adminSession" = []))
)]
pub async fn delete_car(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.kernel.delete_car(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/gallery",
    responses(
        (status = 200, description = "All gallery items, newest first", body = [GalleryItemResponse]),
        (status = 401, description = "No admin session", body = ErrorBody)
    ),
    security(("adminSession" = []))
)]
pub async fn list_gallery(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
) -> Json<Vec<GalleryItemResponse>> {
    Json(gallery(state.kernel.gallery_page().await))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/gallery/{id}",
    params(("id" = i64, Path, description = "Gallery item identifier")),
    responses(
        (status = 200, description = "Gallery item", body = GalleryItemResponse),
        (status = 401, description = "No admin session", body = ErrorBody),
        (status = 404, description = "Gallery item not found", body = ErrorBody)
    ),
    security(("adminSession" = []))
)]
pub async fn get_gallery_item(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(id): Path<i64>,
) -> Result<Json<GalleryItemResponse>, ApiError> {
    Ok(Json(state.kernel.gallery_item(id).await?.into()))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/gallery",
    request_body(content = GalleryUpload, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Gallery item created", body = GalleryItemResponse),
        (status = 400, description = "Invalid form", body = ErrorBody),
        (status = 401, description = "No admin session", body = ErrorBody),
        (status = 502, description = "Upload or record store failed", body = ErrorBody)
    ),
    security(("adminSession" = []))
)]
pub async fn create_gallery_item(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    multipart: Multipart,
) -> Result<(StatusCode, Json<GalleryItemResponse>), ApiError> {
    let (form, image) = GalleryUpload::read(multipart).await?.into_parts();
    let item = state.kernel.create_gallery_item(form, image).await?;
    Ok((StatusCode::CREATED, Json(item.into())))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/gallery/{id}",
    params(("id" = i64, Path, description = "Gallery item identifier")),
    request_body(content = GalleryUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Gallery item updated", body = GalleryItemResponse),
        (status = 400, description = "Invalid form", body = ErrorBody),
        (status = 401, description = "No admin session", body = ErrorBody),
        (status = 404, description = "Gallery item not found", body = ErrorBody),
        (status = 502, description = "Upload or record store failed", body = ErrorBody)
    ),
    security(("adminSession" = []))
)]
pub async fn update_gallery_item(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<Json<GalleryItemResponse>, ApiError> {
    let (form, image) = GalleryUpload::read(multipart).await?.into_parts();
    let item = state.kernel.update_gallery_item(id, form, image).await?;
    Ok(Json(item.into()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/gallery/{id}",
    params(("id" = i64, Path, description = "Gallery item identifier")),
    responses(
        (status = 204, description = "Gallery item and its image removed"),
        (status = 401, description = "No admin session", body = ErrorBody),
        (status = 404, description = "Gallery item not found", body = ErrorBody),
        (status = 502, description = "Record store failed", body = ErrorBody)
    ),
    security(("adminSession" = []))
)]
pub async fn delete_gallery_item(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.kernel.delete_gallery_item(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
