//! PostgREST client implementing [`RemoteStore`].

use async_trait::async_trait;
use log::{debug, error};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;

use leadsync_core::errors::RemoteError;
use leadsync_core::remote::{QueryFilter, RemoteStore, Table};

use crate::config::RemoteConfig;
use crate::error::{RemoteClientError, Result};

/// Media type asking PostgREST for exactly one row as a bare object.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Client for the project's PostgREST endpoint.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bearer: String,
}

impl RestStore {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            bearer: config.bearer().to_string(),
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let api_key = HeaderValue::from_str(&self.api_key)
            .map_err(|_| RemoteClientError::config("Invalid API key format"))?;
        headers.insert("apikey", api_key);

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", self.bearer))
            .map_err(|_| RemoteClientError::config("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        Ok(headers)
    }

    fn table_url(&self, table: Table, filter: Option<&QueryFilter>) -> String {
        let query = filter.map(query_string).unwrap_or_default();
        if query.is_empty() {
            format!("{}/{}", self.base_url, table)
        } else {
            format!("{}/{}?{}", self.base_url, table, query)
        }
    }

    /// Reads a response into rows. A single-object body becomes one row.
    async fn parse_rows(response: reqwest::Response) -> Result<Vec<Value>> {
        let status = response.status();
        let body = response.text().await?;
        debug!("REST response ({}): {} bytes", status, body.len());

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Array(rows)) => Ok(rows),
            Ok(row @ Value::Object(_)) => Ok(vec![row]),
            Ok(other) => Err(RemoteClientError::api(
                status.as_u16(),
                "invalid_body",
                format!("Expected rows, got {}", other),
            )),
            Err(e) => {
                error!("Failed to deserialize response. Body: {}, Error: {}", body, e);
                Err(e.into())
            }
        }
    }

    async fn select(&self, table: Table, filter: &QueryFilter) -> Result<Vec<Value>> {
        let mut request = self
            .client
            .get(self.table_url(table, Some(filter)))
            .headers(self.headers()?);
        if filter.single {
            request = request.header(ACCEPT, SINGLE_OBJECT);
        }
        Self::parse_rows(request.send().await?).await
    }

    async fn insert_rows(&self, table: Table, rows: Vec<Value>) -> Result<Vec<Value>> {
        debug!("Inserting {} rows into {}", rows.len(), table);
        let response = self
            .client
            .post(self.table_url(table, None))
            .headers(self.headers()?)
            .header("Prefer", "return=representation")
            .json(&rows)
            .send()
            .await?;
        Self::parse_rows(response).await
    }

    async fn patch_rows(&self, table: Table, filter: &QueryFilter, patch: Value) -> Result<Vec<Value>> {
        let response = self
            .client
            .patch(self.table_url(table, Some(filter)))
            .headers(self.headers()?)
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        Self::parse_rows(response).await
    }

    async fn delete_rows(&self, table: Table, filter: &QueryFilter) -> Result<()> {
        if filter.filters.is_empty() {
            return Err(RemoteClientError::config(
                "Refusing to delete without a row filter",
            ));
        }
        let response = self
            .client
            .delete(self.table_url(table, Some(filter)))
            .headers(self.headers()?)
            .header("Prefer", "return=minimal")
            .send()
            .await?;
        Self::parse_rows(response).await.map(|_| ())
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn query(&self, table: Table, filter: &QueryFilter) -> std::result::Result<Vec<Value>, RemoteError> {
        Ok(self.select(table, filter).await?)
    }

    async fn insert(&self, table: Table, rows: Vec<Value>) -> std::result::Result<Vec<Value>, RemoteError> {
        Ok(self.insert_rows(table, rows).await?)
    }

    async fn update(
        &self,
        table: Table,
        filter: &QueryFilter,
        patch: Value,
    ) -> std::result::Result<Vec<Value>, RemoteError> {
        Ok(self.patch_rows(table, filter, patch).await?)
    }

    async fn delete(&self, table: Table, filter: &QueryFilter) -> std::result::Result<(), RemoteError> {
        Ok(self.delete_rows(table, filter).await?)
    }
}

/// Renders a filter as PostgREST query parameters.
pub(crate) fn query_string(filter: &QueryFilter) -> String {
    let mut params = Vec::new();
    if let Some(select) = &filter.select {
        params.push(format!("select={}", urlencoding::encode(select)));
    }
    for row_filter in &filter.filters {
        params.push(format!(
            "{}=eq.{}",
            urlencoding::encode(&row_filter.column),
            urlencoding::encode(&row_filter.value)
        ));
    }
    if let Some(order) = &filter.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(format!("order={}.{}", urlencoding::encode(&order.column), direction));
    }
    params.join("&")
}

/// Builds an API error from a failed response, keeping the PostgREST code.
pub(crate) fn api_error(status: u16, body: &str) -> RemoteClientError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(ApiErrorBody {
            code: Some(code),
            message,
        }) => RemoteClientError::api(status, code, message.unwrap_or_default()),
        _ => RemoteClientError::api(status, status.to_string(), format!("Request failed: {}", body)),
    }
}
