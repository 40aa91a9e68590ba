//! Scripted [`Transport`] for gateway and processor tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{RemoteRequest, RemoteResponse, RemoteSettings, Transport};
use crate::config::RemoteConfig;
use crate::error::SyncResult;

type Responder = dyn Fn(&RemoteRequest, usize) -> SyncResult<RemoteResponse> + Send + Sync;

/// Answers each request with `responder(request, call_index)` and records
/// what was sent and when.
pub struct FakeTransport {
    responder: Box<Responder>,
    log: Mutex<Vec<(RemoteRequest, tokio::time::Instant)>>,
}

impl FakeTransport {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&RemoteRequest, usize) -> SyncResult<RemoteResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.log.lock().unwrap().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.log.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub fn call_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(
        &self,
        _settings: &RemoteSettings,
        request: &RemoteRequest,
    ) -> SyncResult<RemoteResponse> {
        let index = {
            let mut log = self.log.lock().unwrap();
            log.push((request.clone(), tokio::time::Instant::now()));
            log.len() - 1
        };
        (self.responder)(request, index)
    }
}

pub fn respond(status: u16, body: &str) -> RemoteResponse {
    RemoteResponse {
        status,
        retry_after: None,
        body: body.to_string(),
    }
}

pub fn rate_limited(secs: u64) -> RemoteResponse {
    RemoteResponse {
        status: 429,
        retry_after: Some(Duration::from_secs(secs)),
        body: r#"{"message":"rate limited"}"#.to_string(),
    }
}

pub fn settings() -> RemoteConfig {
    RemoteConfig {
        proxy_url: Some("http://proxy.test/forward".to_string()),
        proxy_token: Some("proxy-token".to_string()),
        credential: Some("secret".to_string()),
        ..RemoteConfig::default()
    }
}
