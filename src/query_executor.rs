use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use serde_json::{Value, json};

use crate::error::UpstreamError;
use crate::query_builder::QueryRequest;

/// One call to an upstream service.
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
}

impl UpstreamRequest {
    pub fn graphql(url: impl Into<String>, request: &QueryRequest) -> Self {
        UpstreamRequest {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Some(json!({
                "query": request.query,
                "variables": request.variables,
            })),
            timeout: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs upstream calls on behalf of resolvers.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

pub struct HttpQueryExecutor {
    client: reqwest::Client,
}

impl HttpQueryExecutor {
    pub fn new() -> Self {
        HttpQueryExecutor {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        HttpQueryExecutor { client }
    }
}

impl Default for HttpQueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn execute(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let url = request.url.clone();
        let mut builder = self
            .client
            .request(request.method, &url)
            .header("Accept", "application/json");

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|source| UpstreamError::Request {
            url: url.clone(),
            source,
        })?;
        let status = response.status().as_u16();

        let bytes = response
            .bytes()
            .await
            .map_err(|source| UpstreamError::Request {
                url: url.clone(),
                source,
            })?;
        // Non-JSON bodies (empty 204s, plain-text errors) are kept as strings.
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        tracing::debug!(%url, status, "upstream responded");
        Ok(UpstreamResponse { status, body })
    }
}
