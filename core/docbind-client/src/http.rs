//! reqwest-based HTTP(S) connector.

use crate::error::{ClientError, ClientResult};
use crate::protocol::{Method, Request, Response};
use crate::transport::Connector;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// HTTP connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Origin of the document store, e.g. `https://app.example.com`.
    pub base_url: String,
    /// Per-exchange timeout in milliseconds.
    pub timeout_ms: u64,
    pub user_agent: String,
    /// Keep session cookies between exchanges (global contexts rely on them).
    pub cookies: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_ms: 30_000,
            user_agent: format!("docbind/{}", env!("CARGO_PKG_VERSION")),
            cookies: true,
        }
    }
}

/// Sends protocol requests over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpConnector {
    config: HttpConfig,
    client: Client,
}

impl HttpConnector {
    pub fn new(config: HttpConfig) -> ClientResult<Self> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(ClientError::Config(format!(
                "base_url must be an http(s) origin: {}",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .cookie_store(config.cookies)
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn send(&self, request: Request) -> ClientResult<Response> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, self.url(&request.path));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            ClientError::Network(format!("{} {} failed: {e}", request.method, request.path))
        })?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let bytes = response.bytes().await?;

        let body = if bytes.is_empty() {
            None
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(body) => Some(body),
                Err(e) if (200..300).contains(&status) => return Err(e.into()),
                Err(_) => None,
            }
        };

        debug!(
            method = %request.method,
            path = %request.path,
            status,
            "exchange completed"
        );

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
