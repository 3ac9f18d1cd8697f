//! HTTP/HTTPS 协议处理器
//!
//! 以可配置方法发送 JSON 请求体，状态码 ≥400 视为发送失败，
//! 错误码为 `HTTP_<status>`；响应体截断后随结果返回。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use domain::Protocol;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use crate::error::ProtocolError;
use crate::handler::{ProtocolClient, ProtocolHandler};
use crate::types::{codes, HandlerTimeouts, PublishResult};

/// 响应体随结果返回的最大字节数。
const BODY_SNIPPET_LIMIT: usize = 512;

/// HTTP 连接配置（Connection.config 的 HTTP/HTTPS 形态）。
#[derive(Debug, Clone, Deserialize)]
pub struct HttpHandlerConfig {
    /// 目标 URL（设备可用 target 覆盖）
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

fn default_method() -> String {
    "POST".to_string()
}

impl HttpHandlerConfig {
    pub fn from_json(config: &serde_json::Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(config.clone())
            .map_err(|err| ProtocolError::ConfigParse(format!("http config: {err}")))
    }

    fn method(&self) -> Result<reqwest::Method, ProtocolError> {
        match self.method.to_ascii_uppercase().as_str() {
            "GET" => Ok(reqwest::Method::GET),
            "POST" => Ok(reqwest::Method::POST),
            "PUT" => Ok(reqwest::Method::PUT),
            "PATCH" => Ok(reqwest::Method::PATCH),
            other => Err(ProtocolError::ConfigParse(format!(
                "unsupported http method: {other}"
            ))),
        }
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= BODY_SNIPPET_LIMIT {
        return body.to_string();
    }
    // 按字符边界截断，避免撕裂多字节序列
    let mut end = BODY_SNIPPET_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// HTTP 协议处理器。
pub struct HttpHandler {
    timeouts: HandlerTimeouts,
}

impl HttpHandler {
    pub fn new(timeouts: HandlerTimeouts) -> Self {
        Self { timeouts }
    }

    fn build_client(&self) -> Result<reqwest::Client, ProtocolError> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(self.timeouts.connect_timeout_ms))
            .timeout(Duration::from_millis(self.timeouts.publish_timeout_ms))
            .build()
            .map_err(|err| ProtocolError::Connection(format!("http client build: {err}")))
    }

    async fn send(
        &self,
        client: &reqwest::Client,
        config: &HttpHandlerConfig,
        target: Option<&str>,
        payload: &[u8],
    ) -> PublishResult {
        let started = Instant::now();
        let method = match config.method() {
            Ok(method) => method,
            Err(err) => return PublishResult::from_error(&err, 0),
        };
        let url = target.unwrap_or(config.url.as_str());

        let mut request = client
            .request(method, url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec());
        if let Some(headers) = &config.headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                let latency = started.elapsed().as_millis() as u64;
                let code = if err.is_timeout() {
                    codes::PUBLISH_TIMEOUT
                } else if err.is_connect() {
                    codes::CONNECTION_REFUSED
                } else {
                    codes::REQUEST_ERROR
                };
                return PublishResult::fail(code, format!("http request failed: {err}"), latency);
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let latency = started.elapsed().as_millis() as u64;
        let snippet = truncate_body(&body);

        if status.as_u16() >= 400 {
            PublishResult::fail(
                &format!("HTTP_{}", status.as_u16()),
                format!("http request returned status {}", status.as_u16()),
                latency,
            )
            .with_detail("status_code", serde_json::json!(status.as_u16()))
            .with_detail("body", serde_json::json!(snippet))
        } else {
            PublishResult::ok(
                format!("http request accepted with status {}", status.as_u16()),
                latency,
            )
            .with_detail("status_code", serde_json::json!(status.as_u16()))
            .with_detail("body", serde_json::json!(snippet))
        }
    }
}

#[async_trait]
impl ProtocolHandler for HttpHandler {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn validate_config(&self, config: &serde_json::Value) -> bool {
        match HttpHandlerConfig::from_json(config) {
            Ok(config) => {
                (config.url.starts_with("http://") || config.url.starts_with("https://"))
                    && config.method().is_ok()
            }
            Err(_) => false,
        }
    }

    async fn connect(
        &self,
        _connection_id: &str,
        config: &serde_json::Value,
    ) -> Result<ProtocolClient, ProtocolError> {
        // 先行校验配置，保证坏配置在入池前暴露
        HttpHandlerConfig::from_json(config)?.method()?;
        Ok(ProtocolClient::Http(self.build_client()?))
    }

    async fn is_healthy(&self, client: &ProtocolClient) -> bool {
        // reqwest 内部维护连接池并自动重建底层连接
        matches!(client, ProtocolClient::Http(_))
    }

    async fn publish(
        &self,
        config: &serde_json::Value,
        target: Option<&str>,
        payload: &[u8],
    ) -> PublishResult {
        let config = match HttpHandlerConfig::from_json(config) {
            Ok(config) => config,
            Err(err) => return PublishResult::from_error(&err, 0),
        };
        let client = match self.build_client() {
            Ok(client) => client,
            Err(err) => return PublishResult::from_error(&err, 0),
        };
        self.send(&client, &config, target, payload)
            .await
            .with_detail("pooled", serde_json::json!(false))
    }

    async fn publish_pooled(
        &self,
        client: &ProtocolClient,
        config: &serde_json::Value,
        target: Option<&str>,
        payload: &[u8],
    ) -> PublishResult {
        let config = match HttpHandlerConfig::from_json(config) {
            Ok(config) => config,
            Err(err) => return PublishResult::from_error(&err, 0),
        };
        let ProtocolClient::Http(client) = client else {
            return PublishResult::fail(codes::PUBLISH_ERROR, "client is not an http client", 0);
        };
        self.send(client, &config, target, payload)
            .await
            .with_detail("pooled", serde_json::json!(true))
    }
}
