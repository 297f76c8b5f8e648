use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

use showroom_db::{
    from_row, to_row, Car, CarFields, Collection, DataGateway, Filter, GatewayError,
    ObjectStorage, RestGateway, RestObjectStorage, Row, SelectQuery, StorageError,
};

const API_KEY: &str = "anon-test-key";

#[derive(Default)]
struct FakeBackend {
    cars: Vec<Row>,
    next_id: i64,
    objects: HashMap<String, Vec<u8>>,
}

type Shared = Arc<Mutex<FakeBackend>>;

async fn spawn_backend() -> (String, Shared) {
    let state = Shared::default();
    let app = Router::new()
        .route(
            "/rest/v1/cars",
            get(list_cars)
                .post(insert_cars)
                .patch(update_cars)
                .delete(delete_cars)
                .head(count_cars),
        )
        .route("/storage/v1/object/:bucket/:key", post(upload_object))
        .route(
            "/storage/v1/object/:bucket",
            axum::routing::delete(remove_objects),
        )
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("apikey").and_then(|v| v.to_str().ok()) == Some(API_KEY)
        && headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some(format!("Bearer {API_KEY}").as_str())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "Invalid API key" })),
    )
        .into_response()
}

fn matches(row: &Row, params: &HashMap<String, String>) -> bool {
    params
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "select" | "order" | "limit"))
        .all(|(column, operand)| {
            let expected = operand.strip_prefix("eq.").unwrap_or(operand);
            match row.get(column) {
                Some(Value::String(s)) => s == expected,
                Some(other) => other.to_string() == expected,
                None => false,
            }
        })
}

async fn list_cars(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let backend = state.lock();
    let mut rows: Vec<Row> = backend
        .cars
        .iter()
        .filter(|row| matches(row, &params))
        .cloned()
        .collect();
    if params.get("order").map(String::as_str) == Some("created_at.desc") {
        rows.reverse();
    }
    if let Some(limit) = params.get("limit").and_then(|l| l.parse::<usize>().ok()) {
        rows.truncate(limit);
    }
    Json(rows).into_response()
}

async fn insert_cars(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(rows): Json<Vec<Row>>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    assert_eq!(
        headers.get("prefer").and_then(|v| v.to_str().ok()),
        Some("return=representation")
    );
    let mut backend = state.lock();
    let mut inserted = Vec::new();
    for mut row in rows {
        backend.next_id += 1;
        row.insert("id".into(), json!(backend.next_id));
        row.insert(
            "created_at".into(),
            json!(format!("2024-09-01T10:00:{:02}+00:00", backend.next_id)),
        );
        backend.cars.push(row.clone());
        inserted.push(row);
    }
    (StatusCode::CREATED, Json(inserted)).into_response()
}

async fn update_cars(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(changes): Json<Row>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut backend = state.lock();
    let mut touched = Vec::new();
    for row in backend.cars.iter_mut().filter(|row| matches(row, &params)) {
        for (column, value) in &changes {
            row.insert(column.clone(), value.clone());
        }
        touched.push(row.clone());
    }
    Json(touched).into_response()
}

async fn delete_cars(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut backend = state.lock();
    let (removed, kept): (Vec<Row>, Vec<Row>) = backend
        .cars
        .drain(..)
        .partition(|row| matches(row, &params));
    backend.cars = kept;
    Json(removed).into_response()
}

async fn count_cars(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    assert_eq!(
        headers.get("prefer").and_then(|v| v.to_str().ok()),
        Some("count=exact")
    );
    let total = state.lock().cars.len();
    let range = if total == 0 {
        "*/0".to_string()
    } else {
        format!("0-{}/{}", total - 1, total)
    };
    (StatusCode::OK, [(header::CONTENT_RANGE, range)]).into_response()
}

async fn upload_object(
    State(state): State<Shared>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut backend = state.lock();
    let path = format!("{bucket}/{key}");
    if backend.objects.contains_key(&path) {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "statusCode": "409", "error": "Duplicate", "message": "The resource already exists" })),
        )
            .into_response();
    }
    backend.objects.insert(path.clone(), body.to_vec());
    Json(json!({ "Key": path })).into_response()
}

async fn remove_objects(
    State(state): State<Shared>,
    Path(bucket): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut backend = state.lock();
    let mut removed = Vec::new();
    for key in body["prefixes"].as_array().cloned().unwrap_or_default() {
        let Some(key) = key.as_str() else { continue };
        let path = format!("{bucket}/{key}");
        if backend.objects.remove(&path).is_some() {
            removed.push(json!({ "name": key }));
        }
    }
    Json(removed).into_response()
}

fn car(name: &str, price: f64) -> Row {
    to_row(&CarFields {
        name: name.into(),
        price,
        image_url: None,
        image_key: None,
    })
    .unwrap()
}

#[tokio::test]
async fn hosted_gateway_insert_select_update_delete() -> Result<()> {
    let (url, state) = spawn_backend().await;
    let gateway = RestGateway::new(&url, API_KEY, Duration::from_secs(5))?;

    let inserted = gateway
        .insert(Collection::Cars, vec![car("avanza", 250_000_000.0), car("brio", 1.5e8)])
        .await?;
    assert_eq!(inserted.len(), 2);

    let newest = gateway
        .select(Collection::Cars, &SelectQuery::newest(Some(1)))
        .await?;
    let newest: Car = from_row(Collection::Cars, newest[0].clone())?;
    assert_eq!(newest.name, "brio");

    let id = inserted[0]["id"].as_i64().unwrap();
    let touched = gateway
        .update(Collection::Cars, &[Filter::id(id)], car("avanza veloz", 2.7e8))
        .await?;
    assert_eq!(touched, 1);

    let fetched = gateway
        .fetch_one(Collection::Cars, &[Filter::id(id)])
        .await?
        .unwrap();
    let fetched: Car = from_row(Collection::Cars, fetched)?;
    assert_eq!(fetched.name, "avanza veloz");
    assert_eq!(fetched.price, 270_000_000.0);

    assert_eq!(gateway.count(Collection::Cars).await?, 2);
    assert_eq!(
        gateway.delete(Collection::Cars, &[Filter::id(id)]).await?,
        1
    );
    assert_eq!(gateway.count(Collection::Cars).await?, 1);
    assert_eq!(state.lock().cars.len(), 1);
    Ok(())
}

#[tokio::test]
async fn hosted_gateway_counts_empty_collection() -> Result<()> {
    let (url, _state) = spawn_backend().await;
    let gateway = RestGateway::new(&url, API_KEY, Duration::from_secs(5))?;
    assert_eq!(gateway.count(Collection::Cars).await?, 0);
    Ok(())
}

#[tokio::test]
async fn hosted_gateway_surfaces_remote_errors() -> Result<()> {
    let (url, _state) = spawn_backend().await;

    let wrong_key = RestGateway::new(&url, "not-the-key", Duration::from_secs(5))?;
    let err = wrong_key
        .select(Collection::Cars, &SelectQuery::new())
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast::<GatewayError>()?,
        GatewayError::Remote {
            status: 401,
            message: "Invalid API key".into()
        }
    );

    let gateway = RestGateway::new(&url, API_KEY, Duration::from_secs(5))?;
    let err = gateway
        .select(Collection::Gallery, &SelectQuery::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast::<GatewayError>()?,
        GatewayError::Remote { status: 404, .. }
    ));
    Ok(())
}

#[tokio::test]
async fn hosted_storage_upload_conflict_and_remove() -> Result<()> {
    let (url, state) = spawn_backend().await;
    let storage = RestObjectStorage::new(&url, API_KEY, Duration::from_secs(5))?;

    storage
        .put_object("cars", "1725000000000-q1w2e3r4t.jpg", b"jpeg", "image/jpeg")
        .await?;
    assert!(state
        .lock()
        .objects
        .contains_key("cars/1725000000000-q1w2e3r4t.jpg"));

    let err = storage
        .put_object("cars", "1725000000000-q1w2e3r4t.jpg", b"again", "image/jpeg")
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast::<StorageError>()?,
        StorageError::Remote {
            status: 409,
            message: "The resource already exists".into()
        }
    );

    storage
        .remove_objects("cars", &["1725000000000-q1w2e3r4t.jpg".to_string()])
        .await?;
    assert!(state.lock().objects.is_empty());
    Ok(())
}
