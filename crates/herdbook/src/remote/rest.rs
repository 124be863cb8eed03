//! PostgrestRemote: `RemoteCollection` over a PostgREST endpoint.
//!
//! Targets the `/rest/v1/{resource}` layout of hosted Postgres backends.
//! Every response error is classified once, here, from the HTTP status and
//! the PostgREST / PostgreSQL error code in the body.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{RemoteError, RemoteErrorKind};
use crate::types::{Filters, Record, ID_FIELD};

use super::traits::{probe_outcome, zero_rows_error, RemoteCollection};

/// Connection settings for [`PostgrestRemote`].
#[derive(Debug, Clone)]
pub struct PostgrestOptions {
    /// Project URL, e.g. `https://xyz.example.co`.
    pub base_url: String,
    /// Public API key sent as the `apikey` header.
    pub api_key: String,
    /// Session token of the signed-in user. Falls back to `api_key`.
    pub access_token: Option<String>,
}

pub struct PostgrestRemote {
    client: Client,
    options: PostgrestOptions,
}

/// Error body returned by PostgREST.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Map an HTTP status plus PostgREST error code to an error class.
pub fn classify_status(status: StatusCode, code: Option<&str>) -> RemoteErrorKind {
    match code {
        // undefined_column / column missing from the schema cache
        Some("42703") | Some("PGRST204") => return RemoteErrorKind::SchemaIncompatible,
        // insufficient_privilege (row-level security)
        Some("42501") => return RemoteErrorKind::PermissionDenied,
        // undefined_table / table missing from the schema cache
        Some("42P01") | Some("PGRST205") => return RemoteErrorKind::NotFound,
        _ => {}
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteErrorKind::PermissionDenied,
        StatusCode::NOT_FOUND => RemoteErrorKind::NotFound,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            RemoteErrorKind::Unreachable
        }
        _ => RemoteErrorKind::Unknown,
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        RemoteError::unreachable(e.to_string())
    } else {
        RemoteError::unknown(e.to_string())
    }
}

/// PostgREST equality operand for a JSON value.
fn eq_operand(value: &Value) -> String {
    match value {
        Value::String(s) => format!("eq.{s}"),
        Value::Null => "is.null".to_string(),
        other => format!("eq.{other}"),
    }
}

impl PostgrestRemote {
    pub fn new(options: PostgrestOptions) -> Self {
        Self::with_client(Client::new(), options)
    }

    pub fn with_client(client: Client, options: PostgrestOptions) -> Self {
        Self { client, options }
    }

    /// Replace the user session token (e.g. after sign-in).
    pub fn set_access_token(&mut self, token: Option<String>) {
        self.options.access_token = token;
    }

    fn request(&self, method: Method, resource: &str) -> RequestBuilder {
        let url = format!(
            "{}/rest/v1/{}",
            self.options.base_url.trim_end_matches('/'),
            resource
        );
        let bearer = self
            .options
            .access_token
            .as_deref()
            .unwrap_or(&self.options.api_key);
        self.client
            .request(method, url)
            .header("apikey", &self.options.api_key)
            .bearer_auth(bearer)
    }

    /// Send and decode a JSON array of rows, classifying failures.
    async fn rows(&self, request: RequestBuilder) -> Result<Vec<Map<String, Value>>, RemoteError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(Vec::new());
            }
            return response
                .json::<Vec<Map<String, Value>>>()
                .await
                .map_err(|e| RemoteError::unknown(format!("malformed response: {e}")));
        }

        let text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let kind = classify_status(status, body.code.as_deref());
        debug!(%status, code = ?body.code, %kind, "postgrest request failed");
        Err(RemoteError::new(
            kind,
            body.message.unwrap_or_else(|| format!("HTTP {status}: {text}")),
        ))
    }

    fn with_filters(mut request: RequestBuilder, filters: &Filters) -> RequestBuilder {
        for (field, value) in filters {
            request = request.query(&[(field.as_str(), eq_operand(value))]);
        }
        request
    }
}

#[async_trait]
impl RemoteCollection for PostgrestRemote {
    async fn probe_column(&self, resource: &str, field: &str) -> bool {
        let request = self
            .request(Method::GET, resource)
            .query(&[("select", field), ("limit", "1")]);
        probe_outcome(self.rows(request).await.map(|_| ()))
    }

    async fn create(
        &self,
        resource: &str,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError> {
        let request = self
            .request(Method::POST, resource)
            .header("Prefer", "return=representation")
            .json(fields);
        let mut rows = self.rows(request).await?;
        if rows.is_empty() {
            return Err(RemoteError::unknown(format!(
                "insert into {resource} returned no row"
            )));
        }
        Ok(Record::from_remote(rows.swap_remove(0)))
    }

    async fn fetch_all(
        &self,
        resource: &str,
        filters: &Filters,
    ) -> Result<Vec<Record>, RemoteError> {
        let request = Self::with_filters(
            self.request(Method::GET, resource).query(&[("select", "*")]),
            filters,
        );
        let rows = self.rows(request).await?;
        Ok(rows.into_iter().map(Record::from_remote).collect())
    }

    async fn fetch_by_id(&self, resource: &str, id: &str) -> Result<Option<Record>, RemoteError> {
        let request = self
            .request(Method::GET, resource)
            .query(&[("select", "*".to_string()), (ID_FIELD, format!("eq.{id}"))]);
        let rows = self.rows(request).await?;
        Ok(rows.into_iter().next().map(Record::from_remote))
    }

    async fn update_by_id(
        &self,
        resource: &str,
        id: &str,
        patch: &Map<String, Value>,
        filters: &Filters,
    ) -> Result<Record, RemoteError> {
        let request = Self::with_filters(
            self.request(Method::PATCH, resource)
                .query(&[(ID_FIELD, format!("eq.{id}"))])
                .header("Prefer", "return=representation")
                .json(patch),
            filters,
        );
        let mut rows = self.rows(request).await?;
        if rows.is_empty() {
            return Err(zero_rows_error(resource, id, filters));
        }
        Ok(Record::from_remote(rows.swap_remove(0)))
    }

    async fn delete_by_id(
        &self,
        resource: &str,
        id: &str,
        filters: &Filters,
    ) -> Result<(), RemoteError> {
        let request = Self::with_filters(
            self.request(Method::DELETE, resource)
                .query(&[(ID_FIELD, format!("eq.{id}"))])
                .header("Prefer", "return=representation"),
            filters,
        );
        let rows = self.rows(request).await?;
        if rows.is_empty() {
            return Err(zero_rows_error(resource, id, filters));
        }
        Ok(())
    }
}
