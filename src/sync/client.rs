use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

use crate::{
    session::{SessionManager, token_expired},
    sync::retry::RetryConfig,
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A request relative to the API base URL. Serializable so it can sit in the
/// offline queue.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl TransportRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<RawResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
        let mut builder = self.client.request(request.method.as_reqwest(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let body = serde_json::from_slice(&bytes).ok();

        Ok(RawResponse { status, body })
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    #[error("{}", message.as_deref().unwrap_or("request rejected"))]
    Rejected { status: u16, message: Option<String> },
    #[error("request failed after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },
    #[error("invalid response: {0}")]
    Decode(String),
}

impl SyncError {
    /// Server-provided message, or `fallback` when the server gave none.
    pub fn message_or(&self, fallback: &str) -> String {
        match self {
            SyncError::Rejected { message: Some(m), .. } => m.clone(),
            SyncError::Rejected { message: None, .. } => fallback.to_string(),
            other => format!("{}: {}", fallback, other),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<Value>,
    pub attempts: u32,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(self) -> Result<T, SyncError> {
        serde_json::from_value(self.body.unwrap_or(Value::Null)).map_err(|e| SyncError::Decode(e.to_string()))
    }
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt {
    Success(ApiResponse),
    Retryable(String),
    Rejected(SyncError),
}

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    session: SessionManager,
    retry: RetryConfig,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>, session: SessionManager, retry: RetryConfig) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
            retry,
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// One attempt. A 401 triggers a single token refresh and a resend.
    pub async fn send_once(&self, request: &ApiRequest) -> Attempt {
        self.refresh_if_expired().await;
        let first = self.classify(self.dispatch(request).await);
        if let Attempt::Rejected(SyncError::Rejected { status: 401, .. }) = &first {
            if self.refresh_token().await.is_some() {
                return self.classify(self.dispatch(request).await);
            }
        }
        first
    }

    /// Retries 5xx and network failures with exponential backoff, up to
    /// `max_retries` attempts in total.
    pub async fn fetch_with_retry(&self, request: &ApiRequest) -> Result<ApiResponse, SyncError> {
        let mut attempt = 1;
        loop {
            match self.send_once(request).await {
                Attempt::Success(mut response) => {
                    response.attempts = attempt;
                    return Ok(response);
                }
                Attempt::Rejected(e) => return Err(e),
                Attempt::Retryable(message) => {
                    if attempt >= self.retry.max_retries {
                        log::error!(
                            "{:?} {} failed after {} attempts: {}",
                            request.method,
                            request.path,
                            attempt,
                            message
                        );
                        return Err(SyncError::Exhausted {
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay = self.retry.delay(attempt);
                    log::warn!(
                        "{:?} {} failed ({}), retrying in {:?}",
                        request.method,
                        request.path,
                        message,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        self.fetch_with_retry(&ApiRequest::get(path)).await?.json()
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, SyncError> {
        self.fetch_with_retry(request).await?.json()
    }

    pub async fn send(&self, request: &ApiRequest) -> Result<(), SyncError> {
        self.fetch_with_retry(request).await.map(|_| ())
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let mut headers: Vec<(String, String)> = Vec::new();
        if request.body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        if let Some(token) = self.session.token().await {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        for (name, value) in &request.headers {
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }

        self.transport
            .send(TransportRequest {
                method: request.method,
                url: format!("{}{}", self.base_url, request.path),
                headers,
                body: request.body.clone(),
            })
            .await
    }

    fn classify(&self, result: Result<RawResponse, TransportError>) -> Attempt {
        match result {
            Ok(response) if response.is_success() => Attempt::Success(ApiResponse {
                status: response.status,
                body: response.body,
                attempts: 1,
            }),
            Ok(response) if response.status >= 500 => {
                Attempt::Retryable(error_message(response.body.as_ref()).unwrap_or_else(|| format!("server error {}", response.status)))
            }
            Ok(response) => Attempt::Rejected(SyncError::Rejected {
                status: response.status,
                message: error_message(response.body.as_ref()),
            }),
            Err(e) => Attempt::Retryable(e.to_string()),
        }
    }

    /// Refreshes ahead of the request when the stored token has expired and
    /// a refresh token is available.
    async fn refresh_if_expired(&self) {
        let Some(token) = self.session.token().await else {
            return;
        };
        if self.session.refresh_token().await.is_none() || !token_expired(&token, Utc::now()) {
            return;
        }
        log::debug!("Stored token has expired, refreshing before sending.");
        if self.refresh_token().await.is_none() {
            log::warn!("Expired token could not be refreshed.");
        }
    }

    async fn refresh_token(&self) -> Option<String> {
        let token = self.session.token().await?;
        let body = match self.session.refresh_token().await {
            Some(refresh) => serde_json::json!({ "refreshToken": refresh }),
            None => serde_json::json!({}),
        };

        let result = self
            .transport
            .send(TransportRequest {
                method: Method::Post,
                url: format!("{}/auth/refresh", self.base_url),
                headers: vec![
                    ("Content-Type".to_string(), "application/json".to_string()),
                    ("Authorization".to_string(), format!("Bearer {}", token)),
                ],
                body: Some(body),
            })
            .await;

        let new_token = match result {
            Ok(response) if response.is_success() => response
                .body
                .as_ref()
                .and_then(|b| b.get("token"))
                .and_then(Value::as_str)
                .map(str::to_string),
            Ok(response) => {
                log::warn!("Token refresh rejected with status {}", response.status);
                None
            }
            Err(e) => {
                log::warn!("Token refresh failed: {}", e);
                None
            }
        }?;

        if let Err(e) = self.session.update_token(&new_token).await {
            log::error!("Failed to persist refreshed token: {:?}", e);
        }
        Some(new_token)
    }
}

/// `error`, then `message`, from a JSON error body.
pub fn error_message(body: Option<&Value>) -> Option<String> {
    let body = body?;
    body.get("error")
        .and_then(Value::as_str)
        .or_else(|| body.get("message").and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{collections::VecDeque, sync::Mutex};

    use super::*;

    /// Replays canned responses in order and records every request it sees.
    /// Requests to `/auth/refresh` are answered from a separate script.
    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        refresh_responses: Mutex<VecDeque<RawResponse>>,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn push(&self, status: u16, body: Value) -> &Self {
            self.responses
                .lock()
                .unwrap()
                .push_back(Ok(RawResponse { status, body: Some(body) }));
            self
        }

        pub fn push_network_error(&self) -> &Self {
            self.responses
                .lock()
                .unwrap()
                .push_back(Err(TransportError::Network("connection refused".to_string())));
            self
        }

        pub fn push_refresh(&self, status: u16, body: Value) -> &Self {
            self.refresh_responses
                .lock()
                .unwrap()
                .push_back(RawResponse { status, body: Some(body) });
            self
        }

        pub fn requests(&self) -> Vec<TransportRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
            let is_refresh = request.url.ends_with("/auth/refresh");
            self.requests.lock().unwrap().push(request);
            if is_refresh {
                return Ok(self
                    .refresh_responses
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or(RawResponse { status: 401, body: None }));
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Network("no scripted response".to_string())))
        }
    }

    pub async fn client_with(transport: Arc<ScriptedTransport>, token: Option<&str>) -> ApiClient {
        let session = SessionManager::in_memory();
        if let Some(token) = token {
            session.update_token(token).await.unwrap();
        }
        ApiClient::new(transport, "http://backend.test/api", session, RetryConfig::default())
    }
}
