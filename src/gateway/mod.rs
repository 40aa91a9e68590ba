//! Remote gateway: outbound calls to the remote record API.
//!
//! Requests go through a [`Transport`] (the production one is
//! [`HttpTransport`], which forwards through the configured proxy) and come
//! back as raw [`RemoteResponse`]s that [`RemoteGateway::call`] classifies:
//!
//! - HTTP 429 → [`SyncError::RateLimited`] with the `Retry-After` hint
//!   (1 second when absent)
//! - other non-2xx → [`SyncError::Remote`] with the best message found in
//!   the body
//! - 2xx → decoded JSON body
//!
//! # Retry Strategy
//!
//! [`RemoteGateway::call_with_retry`] repeats a call only on rate limiting.
//! After failed attempt `i` it waits `retry_after × 2^(i-1)` before the
//! next one; once `max_attempts` is reached the last rate-limit error is
//! returned. Every other failure is returned immediately.

mod http;
#[cfg(test)]
pub(crate) mod testing;

pub use http::HttpTransport;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use pawtrack_core::models::{Collection, BOOKKEEPING_FIELDS};

use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};

/// Used when a 429 carries no usable `Retry-After` header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Longest raw (non-JSON) error body kept in an error message.
const MAX_RAW_MESSAGE_CHARS: usize = 200;

const PAGE_SIZE: u32 = 100;

/// Environment fallback for the remote credential.
pub const CREDENTIAL_ENV: &str = "PAWTRACK_REMOTE_CREDENTIAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// File uploads are the only multipart requests.
    Multipart(FileUpload),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: Method,
    /// Path relative to the API base, e.g. `/pages`.
    pub path: String,
    pub body: RequestBody,
}

impl RemoteRequest {
    pub fn new(method: Method, path: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }

    pub fn json(method: Method, path: impl Into<String>, body: Value) -> Self {
        Self::new(method, path, RequestBody::Json(body))
    }
}

/// A response before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

/// Values the gateway needs for every call.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSettings {
    pub proxy_url: String,
    pub proxy_token: Option<String>,
    pub credential: String,
}

/// Read-only source of [`RemoteSettings`]; may report them missing.
pub trait SettingsProvider: Send + Sync {
    fn remote_settings(&self) -> SyncResult<RemoteSettings>;
}

impl SettingsProvider for RemoteConfig {
    fn remote_settings(&self) -> SyncResult<RemoteSettings> {
        let proxy_url = self
            .proxy_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| SyncError::Configuration("remote.proxy_url is not set".into()))?;

        let credential = self
            .credential
            .clone()
            .or_else(|| std::env::var(CREDENTIAL_ENV).ok())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                SyncError::Configuration(format!(
                    "remote.credential is not set (and {} is empty)",
                    CREDENTIAL_ENV
                ))
            })?;

        Ok(RemoteSettings {
            proxy_url,
            proxy_token: self.proxy_token.clone(),
            credential,
        })
    }
}

/// Sends one request and returns the raw response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        settings: &RemoteSettings,
        request: &RemoteRequest,
    ) -> SyncResult<RemoteResponse>;
}

/// One page of a remote collection query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    pub results: Vec<Value>,
    pub next_cursor: Option<String>,
}

pub struct RemoteGateway {
    transport: Arc<dyn Transport>,
    settings: Arc<dyn SettingsProvider>,
    databases: HashMap<Collection, String>,
    max_attempts: u32,
}

impl RemoteGateway {
    pub fn new(transport: Arc<dyn Transport>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            transport,
            settings,
            databases: HashMap::new(),
            max_attempts: 3,
        }
    }

    /// Build the production gateway from configuration.
    pub fn from_config(config: &RemoteConfig) -> SyncResult<Self> {
        let transport = HttpTransport::new(config)?;
        let mut gateway = Self::new(Arc::new(transport), Arc::new(config.clone()))
            .with_max_attempts(config.rate_limit_attempts);
        for collection in Collection::ALL {
            if let Some(db) = config.database_id(collection) {
                gateway = gateway.with_database(collection, db);
            }
        }
        Ok(gateway)
    }

    /// Map a local collection to its remote database.
    pub fn with_database(mut self, collection: Collection, database_id: impl Into<String>) -> Self {
        self.databases.insert(collection, database_id.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Send one request and classify the response.
    pub async fn call(&self, request: &RemoteRequest) -> SyncResult<Value> {
        let settings = self.settings.remote_settings()?;
        let response = self.transport.send(&settings, request).await?;
        classify(response)
    }

    /// [`call`](Self::call), retrying rate-limited attempts with backoff.
    pub async fn call_with_retry(
        &self,
        request: &RemoteRequest,
        max_attempts: u32,
    ) -> SyncResult<Value> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.call(request).await {
                Err(SyncError::RateLimited { retry_after }) if attempt < max_attempts => {
                    let delay = backoff_delay(retry_after, attempt);
                    tracing::warn!(
                        path = %request.path,
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn database_id(&self, collection: Collection) -> SyncResult<&str> {
        self.databases
            .get(&collection)
            .map(String::as_str)
            .ok_or_else(|| {
                SyncError::Configuration(format!(
                    "no remote database configured for collection '{}'",
                    collection
                ))
            })
    }

    /// Create a remote row; returns the remote id.
    pub async fn create_record(&self, collection: Collection, snapshot: &Value) -> SyncResult<String> {
        let body = json!({
            "parent": { "database_id": self.database_id(collection)? },
            "properties": to_remote_properties(snapshot),
        });
        let response = self
            .call_with_retry(&RemoteRequest::json(Method::Post, "/pages", body), self.max_attempts)
            .await?;

        response
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SyncError::Remote {
                status: 200,
                message: "create response is missing an id".to_string(),
            })
    }

    /// Partially update a remote row.
    pub async fn update_record(&self, remote_id: &str, snapshot: &Value) -> SyncResult<Value> {
        let body = json!({ "properties": to_remote_properties(snapshot) });
        self.call_with_retry(
            &RemoteRequest::json(Method::Patch, format!("/pages/{}", remote_id), body),
            self.max_attempts,
        )
        .await
    }

    /// Soft-delete a remote row.
    pub async fn archive_record(&self, remote_id: &str) -> SyncResult<Value> {
        self.call_with_retry(
            &RemoteRequest::json(
                Method::Patch,
                format!("/pages/{}", remote_id),
                json!({ "archived": true }),
            ),
            self.max_attempts,
        )
        .await
    }

    /// Fetch one page of a remote collection.
    pub async fn query_collection(
        &self,
        collection: Collection,
        start_cursor: Option<&str>,
    ) -> SyncResult<QueryPage> {
        let mut body = json!({ "page_size": PAGE_SIZE });
        if let Some(cursor) = start_cursor {
            body["start_cursor"] = json!(cursor);
        }
        let path = format!("/databases/{}/query", self.database_id(collection)?);
        let response = self
            .call_with_retry(&RemoteRequest::json(Method::Post, path, body), self.max_attempts)
            .await?;

        let results = response
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let has_more = response
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let next_cursor = response
            .get("next_cursor")
            .and_then(Value::as_str)
            .filter(|_| has_more)
            .map(str::to_string);

        Ok(QueryPage {
            results,
            next_cursor,
        })
    }

    /// Follow cursors until the remote collection is exhausted.
    pub async fn query_all(&self, collection: Collection) -> SyncResult<Vec<Value>> {
        let mut rows = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.query_collection(collection, cursor.as_deref()).await?;
            rows.extend(page.results);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(rows),
            }
        }
    }

    /// Upload a file as a multipart body.
    pub async fn upload_file(&self, file: FileUpload) -> SyncResult<Value> {
        self.call_with_retry(
            &RemoteRequest::new(Method::Post, "/file_uploads", RequestBody::Multipart(file)),
            self.max_attempts,
        )
        .await
    }
}

/// Delay after failed attempt `attempt` (1-indexed).
pub fn backoff_delay(retry_after: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    retry_after.saturating_mul(1u32 << exponent)
}

/// Classify a raw response.
pub fn classify(response: RemoteResponse) -> SyncResult<Value> {
    let status = response.status;
    if status == 429 {
        return Err(SyncError::RateLimited {
            retry_after: response.retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
        });
    }
    if !(200..300).contains(&status) {
        return Err(SyncError::Remote {
            status,
            message: extract_message(&response.body),
        });
    }
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&response.body).map_err(|e| SyncError::Remote {
        status,
        message: format!("undecodable response body: {}", e),
    })
}

/// Best-available message from an error body.
pub fn extract_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let candidate = json
            .get("message")
            .or_else(|| json.get("error").and_then(|e| e.get("message")))
            .or_else(|| json.get("error"));
        if let Some(message) = candidate.and_then(Value::as_str) {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    if trimmed.chars().count() > MAX_RAW_MESSAGE_CHARS {
        let mut short: String = trimmed.chars().take(MAX_RAW_MESSAGE_CHARS).collect();
        short.push('…');
        short
    } else {
        trimmed.to_string()
    }
}

/// Record snapshot as sent to the remote: bookkeeping removed, local id
/// kept as `local_id` for correlation.
pub fn to_remote_properties(snapshot: &Value) -> Value {
    let mut properties = Map::new();
    if let Some(object) = snapshot.as_object() {
        for (key, value) in object {
            if !BOOKKEEPING_FIELDS.contains(&key.as_str()) {
                properties.insert(key.clone(), value.clone());
            }
        }
        if let Some(id) = object.get("id") {
            properties.insert("local_id".to_string(), id.clone());
        }
    }
    Value::Object(properties)
}
