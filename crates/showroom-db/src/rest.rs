//! Hosted record store reached over its PostgREST-style HTTP interface.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header::HeaderValue, Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

use crate::{
    gateway::{DataGateway, Filter, SelectQuery},
    Collection, GatewayError, Row,
};

const PREFER: &str = "Prefer";
const RETURN_REPRESENTATION: &str = "return=representation";

/// [`DataGateway`] backed by the hosted `/rest/v1` endpoint.
#[derive(Clone, Debug)]
pub struct RestGateway {
    endpoint: String,
    api_key: String,
    client: Client,
}

impl RestGateway {
    /// `project_url` is the backend's base URL (e.g. `https://xyz.supabase.co`).
    pub fn new(project_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for record gateway")?;
        Ok(Self::with_client(project_url, api_key, client))
    }

    pub fn with_client(project_url: &str, api_key: impl Into<String>, client: Client) -> Self {
        Self {
            endpoint: format!("{}/rest/v1", project_url.trim_end_matches('/')),
            api_key: api_key.into(),
            client,
        }
    }

    fn table_url(&self, collection: Collection) -> String {
        format!("{}/{}", self.endpoint, collection.as_str())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

#[async_trait]
impl DataGateway for RestGateway {
    async fn select(&self, collection: Collection, query: &SelectQuery) -> Result<Vec<Row>> {
        let params = select_params(query);
        debug!(collection = %collection, ?params, "select");
        let response = self
            .authorized(self.client.get(self.table_url(collection)))
            .query(&params)
            .send()
            .await
            .with_context(|| format!("select from '{}' failed", collection))?;
        let response = ensure_success(response).await?;
        response
            .json::<Vec<Row>>()
            .await
            .with_context(|| format!("invalid rows returned for '{}'", collection))
    }

    async fn insert(&self, collection: Collection, rows: Vec<Row>) -> Result<Vec<Row>> {
        let response = self
            .authorized(self.client.post(self.table_url(collection)))
            .header(PREFER, RETURN_REPRESENTATION)
            .json(&rows)
            .send()
            .await
            .with_context(|| format!("insert into '{}' failed", collection))?;
        let response = ensure_success(response).await?;
        response
            .json::<Vec<Row>>()
            .await
            .with_context(|| format!("invalid insert acknowledgement from '{}'", collection))
    }

    async fn update(&self, collection: Collection, filters: &[Filter], changes: Row) -> Result<u64> {
        if filters.is_empty() {
            return Err(GatewayError::Unfiltered("update", collection).into());
        }
        let response = self
            .authorized(self.client.patch(self.table_url(collection)))
            .query(&filter_params(filters))
            .header(PREFER, RETURN_REPRESENTATION)
            .json(&changes)
            .send()
            .await
            .with_context(|| format!("update of '{}' failed", collection))?;
        let response = ensure_success(response).await?;
        let touched: Vec<Row> = response.json().await?;
        Ok(touched.len() as u64)
    }

    async fn delete(&self, collection: Collection, filters: &[Filter]) -> Result<u64> {
        if filters.is_empty() {
            return Err(GatewayError::Unfiltered("delete", collection).into());
        }
        let response = self
            .authorized(self.client.delete(self.table_url(collection)))
            .query(&filter_params(filters))
            .header(PREFER, RETURN_REPRESENTATION)
            .send()
            .await
            .with_context(|| format!("delete from '{}' failed", collection))?;
        let response = ensure_success(response).await?;
        let removed: Vec<Row> = response.json().await?;
        Ok(removed.len() as u64)
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let response = self
            .authorized(self.client.head(self.table_url(collection)))
            .query(&[("select", "*")])
            .header(PREFER, "count=exact")
            .send()
            .await
            .with_context(|| format!("count of '{}' failed", collection))?;
        let response = ensure_success(response).await?;
        let range = response
            .headers()
            .get("content-range")
            .map(HeaderValue::to_str)
            .transpose()
            .context("non-ASCII Content-Range header")?
            .ok_or_else(|| anyhow!("count of '{}' returned no Content-Range", collection))?;
        parse_content_range_total(range)
    }
}

/// Query-string pairs for an ordered, filtered select.
pub(crate) fn select_params(query: &SelectQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    params.extend(filter_params(&query.filters));
    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".into(), format!("{}.{}", order.column, direction)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".into(), limit.to_string()));
    }
    params
}

pub(crate) fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|filter| {
            let operand = match &filter.value {
                Value::Null => "is.null".to_string(),
                Value::String(s) => format!("eq.{s}"),
                other => format!("eq.{other}"),
            };
            (filter.column.clone(), operand)
        })
        .collect()
}

/// Extracts the total from `Content-Range: 0-24/3573` or `*/0`.
pub(crate) fn parse_content_range_total(value: &str) -> Result<u64> {
    let (_, total) = value
        .trim()
        .rsplit_once('/')
        .ok_or_else(|| anyhow!("malformed Content-Range '{}'", value))?;
    total
        .parse()
        .map_err(|_| anyhow!("Content-Range '{}' has no exact total", value))
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Remote {
        status: status.as_u16(),
        message: remote_message(&body),
    }
    .into())
}

/// Pulls `message` out of an error body, falling back to the raw text.
pub(crate) fn remote_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
