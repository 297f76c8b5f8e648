use std::{env, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use showroom_db::{
    DataGateway, Database, LocalObjectStorage, ObjectStorage, RestGateway, RestObjectStorage,
};
use showroom_kernel::{KernelConfig, KernelError, ShowroomKernel};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info};
use utoipa::{Modify, OpenApi, ToSchema};

use crate::{
    admin, catalog,
    middleware::rate_limit::{self, RateLimitConfig, RateLimiter},
    session::SessionStore,
};

/// Room for multipart framing and text fields on top of the image itself.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;

    let (gateway, storage): (Arc<dyn DataGateway>, Arc<dyn ObjectStorage>) = match &config.backend
    {
        Backend::Local {
            db_url,
            media_root,
        } => {
            let db = Database::connect(db_url)
                .await
                .context("failed to open database")?;
            let media_base = format!("{}/media", config.public_url);
            (
                Arc::new(db),
                Arc::new(LocalObjectStorage::new(media_root.clone(), &media_base)),
            )
        }
        Backend::Hosted {
            project_url,
            api_key,
            timeout,
        } => (
            Arc::new(RestGateway::new(project_url, api_key.clone(), *timeout)?),
            Arc::new(RestObjectStorage::new(project_url, api_key.clone(), *timeout)?),
        ),
    };

    let kernel = ShowroomKernel::new(gateway, storage, config.kernel.clone());
    if let Some((username, admin_code)) = &config.bootstrap_admin {
        kernel
            .ensure_bootstrap_admin(username, admin_code)
            .await
            .context("failed to seed bootstrap admin")?;
    }

    let state = Arc::new(AppState::new(kernel, SessionStore::new(config.session_ttl)));
    let mut app = build_router(state);
    if let Backend::Local { media_root, .. } = &config.backend {
        app = app.nest_service("/media", ServeDir::new(media_root));
    }
    let app = app
        .layer(from_fn_with_state(
            RateLimiter::new(config.rate_limits.clone()),
            rate_limit::enforce,
        ))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listen socket")?;

    info!(
        addr = %config.listen_addr,
        backend = config.backend.name(),
        "showroom-web listening"
    );
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("HTTP server exited")?;
    Ok(())
}

pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state
        .kernel
        .config()
        .max_upload_bytes
        .saturating_add(FORM_OVERHEAD_BYTES);
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/home", get(catalog::home))
        .route("/api/v1/cars", get(catalog::price_list))
        .route("/api/v1/gallery", get(catalog::gallery_page))
        .route("/api/v1/admin/login", post(admin::login))
        .route("/api/v1/admin/logout", post(admin::logout))
        .route("/api/v1/admin/dashboard", get(admin::dashboard))
        .route(
            "/api/v1/admin/profile",
            get(admin::get_profile).put(admin::update_profile),
        )
        .route(
            "/api/v1/admin/cars",
            get(admin::list_cars).post(admin::create_car),
        )
        .route(
            "/api/v1/admin/cars/:id",
            get(admin::get_car)
                .put(admin::update_car)
                .delete(admin::delete_car),
        )
        .route(
            "/api/v1/admin/gallery",
            get(admin::list_gallery).post(admin::create_gallery_item),
        )
        .route(
            "/api/v1/admin/gallery/:id",
            get(admin::get_gallery_item)
                .put(admin::update_gallery_item)
                .delete(admin::delete_gallery_item),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub struct AppState {
    pub(crate) kernel: ShowroomKernel,
    pub(crate) sessions: SessionStore,
}

impl AppState {
    pub(crate) fn new(kernel: ShowroomKernel, sessions: SessionStore) -> Self {
        Self { kernel, sessions }
    }
}

#[derive(Clone)]
enum Backend {
    Local {
        db_url: String,
        media_root: PathBuf,
    },
    Hosted {
        project_url: String,
        api_key: String,
        timeout: Duration,
    },
}

impl Backend {
    fn name(&self) -> &'static str {
        match self {
            Backend::Local { .. } => "local",
            Backend::Hosted { .. } => "hosted",
        }
    }
}

#[derive(Clone)]
struct AppConfig {
    listen_addr: SocketAddr,
    public_url: String,
    backend: Backend,
    kernel: KernelConfig,
    session_ttl: Option<Duration>,
    rate_limits: RateLimitConfig,
    bootstrap_admin: Option<(String, String)>,
}

impl AppConfig {
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let listen_addr: SocketAddr = var("SHOWROOM_API_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid SHOWROOM_API_ADDR")?;

        let public_url = var("SHOWROOM_PUBLIC_URL")
            .unwrap_or_else(|| format!("http://{listen_addr}"))
            .trim_end_matches('/')
            .to_string();

        let backend = match var("SHOWROOM_BACKEND").as_deref().unwrap_or("local") {
            "local" => Backend::Local {
                db_url: var("SHOWROOM_DB_DSN")
                    .or_else(|| var("DATABASE_URL"))
                    .unwrap_or_else(|| "sqlite://./showroom.db".to_string()),
                media_root: var("SHOWROOM_MEDIA_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./media")),
            },
            "hosted" => Backend::Hosted {
                project_url: var("SHOWROOM_BAAS_URL")
                    .context("SHOWROOM_BAAS_URL must be configured for the hosted backend")?,
                api_key: var("SHOWROOM_BAAS_KEY")
                    .context("SHOWROOM_BAAS_KEY must be configured for the hosted backend")?,
                timeout: Duration::from_secs(
                    u64_var(&var, "SHOWROOM_BAAS_TIMEOUT_SECONDS")?.unwrap_or(30),
                ),
            },
            other => return Err(anyhow!("unknown SHOWROOM_BACKEND '{other}' (expected local or hosted)")),
        };

        let defaults = KernelConfig::default();
        let kernel = KernelConfig {
            featured_limit: u64_var(&var, "SHOWROOM_FEATURED_LIMIT")?
                .map(|value| value.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.featured_limit),
            max_upload_bytes: match u64_var(&var, "SHOWROOM_MAX_UPLOAD_MIB")? {
                Some(mib) => upload_limit_bytes(mib)
                    .context("invalid SHOWROOM_MAX_UPLOAD_MIB: limit too large")?,
                None => defaults.max_upload_bytes,
            },
        };

        let session_ttl = match u64_var(&var, "SHOWROOM_SESSION_TTL_HOURS")?.unwrap_or(12) {
            0 => None,
            hours => Some(Duration::from_secs(
                hours
                    .checked_mul(3600)
                    .context("invalid SHOWROOM_SESSION_TTL_HOURS: lifetime too large")?,
            )),
        };

        let rate_defaults = RateLimitConfig::default();
        let rate_limits = RateLimitConfig {
            login_per_minute: u64_var(&var, "SHOWROOM_LOGIN_PER_MINUTE")?
                .unwrap_or(rate_defaults.login_per_minute),
            admin_per_minute: u64_var(&var, "SHOWROOM_ADMIN_PER_MINUTE")?
                .unwrap_or(rate_defaults.admin_per_minute),
            window: rate_defaults.window,
            trust_forwarded: bool_var(&var, "SHOWROOM_TRUST_FORWARDED")?.unwrap_or(false),
        };

        let bootstrap_admin = match (
            var("SHOWROOM_BOOTSTRAP_ADMIN_USERNAME"),
            var("SHOWROOM_BOOTSTRAP_ADMIN_CODE"),
        ) {
            (Some(username), Some(code)) => Some((username, code)),
            (None, None) => None,
            _ => {
                return Err(anyhow!(
                    "SHOWROOM_BOOTSTRAP_ADMIN_USERNAME and SHOWROOM_BOOTSTRAP_ADMIN_CODE must be set together"
                ))
            }
        };

        Ok(Self {
            listen_addr,
            public_url,
            backend,
            kernel,
            session_ttl,
            rate_limits,
            bootstrap_admin,
        })
    }
}

fn u64_var(var: impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    var(key)
        .map(|value| {
            value
                .parse::<u64>()
                .with_context(|| format!("invalid {key}: expected a non-negative integer"))
        })
        .transpose()
}

fn bool_var(var: impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>> {
    var(key)
        .map(|value| match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("invalid {key}: expected true or false")),
        })
        .transpose()
}

/// Upload limit for `mib` mebibytes, leaving room for the form overhead.
fn upload_limit_bytes(mib: u64) -> Option<usize> {
    let bytes = usize::try_from(mib.checked_mul(1024 * 1024)?).ok()?;
    bytes.checked_add(FORM_OVERHEAD_BYTES)?;
    Some(bytes)
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Service is healthy"))
)]
async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Vec<FieldErrorBody>,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub(crate) fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub(crate) fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub(crate) fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<KernelError> for ApiError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Validation(errors) => {
                let mut api = ApiError::new(StatusCode::BAD_REQUEST, "invalid form input");
                api.details = errors
                    .fields
                    .into_iter()
                    .map(|field| FieldErrorBody {
                        field: field.field.to_string(),
                        message: field.message,
                    })
                    .collect();
                api
            }
            KernelError::NotFound { .. } => ApiError::new(StatusCode::NOT_FOUND, err.to_string()),
            KernelError::InvalidCredentials => ApiError::unauthorized(err.to_string()),
            KernelError::Storage(inner) => {
                ApiError::bad_gateway(format!("image storage failed: {inner}"))
            }
            KernelError::Gateway(inner) => {
                ApiError::bad_gateway(format!("record store request failed: {inner}"))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(status = %self.status, message = %self.message, "api error");
        let body = Json(ErrorBody {
            error: self.message,
            details: self.details,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    error: String,
    /// Per-field problems for rejected forms.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<FieldErrorBody>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FieldErrorBody {
    field: String,
    message: String,
}

pub mod docs {
    use super::*;
    use crate::{
        admin::{
            AdminProfile, DashboardResponse, LoginBody, LoginResponse, ProfileBody,
        },
        catalog::{CarResponse, GalleryItemResponse, HomeResponse},
        forms::{CarUpload, GalleryUpload},
        session::SESSION_COOKIE,
    };
    use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};

    #[derive(OpenApi)]
    #[openapi(
        info(title = "Showroom API", version = "0.1.0"),
        paths(
            healthz,
            catalog::home,
            catalog::price_list,
            catalog::gallery_page,
            admin::login,
            admin::logout,
            admin::dashboard,
            admin::get_profile,
            admin::update_profile,
            admin::list_cars,
            admin::get_car,
            admin::create_car,
            admin::update_car,
            admin::delete_car,
            admin::list_gallery,
            admin::get_gallery_item,
            admin::create_gallery_item,
            admin::update_gallery_item,
            admin::delete_gallery_item
        ),
        components(schemas(
            CarResponse,
            GalleryItemResponse,
            HomeResponse,
            LoginBody,
            LoginResponse,
            ProfileBody,
            AdminProfile,
            DashboardResponse,
            CarUpload,
            GalleryUpload,
            ErrorBody,
            FieldErrorBody
        )),
        modifiers(&SecurityAddon)
    )]
    pub struct ApiDoc;

    struct SecurityAddon;

    impl Modify for SecurityAddon {
        fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
            let components = openapi.components.get_or_insert_with(Default::default);
            components.add_security_scheme(
                "adminSession",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(SESSION_COOKIE))),
            );
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("Session token returned by /api/v1/admin/login"))
                        .build(),
                ),
            );
        }
    }
}
