//! reqwest [`Transport`] that forwards every request through the proxy.
//!
//! The true destination (`api_base + path`) travels as the `url` query
//! parameter of the proxy URL, with the proxy token (if any) as `token`.
//! Every request carries `Authorization: Bearer <credential>` and the
//! configured API-version header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::multipart::{Form, Part};
use reqwest::Url;

use super::{Method, RemoteRequest, RemoteResponse, RemoteSettings, RequestBody, Transport};
use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};

pub struct HttpTransport {
    client: reqwest::Client,
    api_base: String,
    version_header: String,
    api_version: String,
}

impl HttpTransport {
    pub fn new(config: &RemoteConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            version_header: config.version_header.clone(),
            api_version: config.api_version.clone(),
        })
    }

    /// Proxy URL with the destination and token attached.
    pub fn proxied_url(&self, settings: &RemoteSettings, path: &str) -> SyncResult<Url> {
        let mut url = Url::parse(&settings.proxy_url).map_err(|e| {
            SyncError::Configuration(format!(
                "invalid proxy URL '{}': {}",
                settings.proxy_url, e
            ))
        })?;

        let destination = format!("{}{}", self.api_base, path);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("url", &destination);
            if let Some(token) = settings.proxy_token.as_deref().filter(|t| !t.is_empty()) {
                query.append_pair("token", token);
            }
        }
        Ok(url)
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        settings: &RemoteSettings,
        request: &RemoteRequest,
    ) -> SyncResult<RemoteResponse> {
        let url = self.proxied_url(settings, &request.path)?;

        let mut builder = self
            .client
            .request(to_reqwest(request.method), url)
            .bearer_auth(&settings.credential)
            .header(self.version_header.as_str(), self.api_version.as_str());

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Multipart(file) => {
                let part = Part::bytes(file.bytes.clone())
                    .file_name(file.file_name.clone())
                    .mime_str(&file.mime_type)?;
                builder.multipart(Form::new().part("file", part))
            }
        };

        tracing::debug!(method = ?request.method, path = %request.path, "remote request");
        let response = builder.send().await?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await?;

        Ok(RemoteResponse {
            status,
            retry_after,
            body,
        })
    }
}
