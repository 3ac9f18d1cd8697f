//! 协议层公共类型定义

use serde::Serialize;

use crate::error::ProtocolError;

/// 稳定错误码常量（贯穿发送日志、熔断统计与 API 返回）。
pub mod codes {
    pub const CONNECTION_REFUSED: &str = "CONNECTION_REFUSED";
    pub const CONNECTION_ERROR: &str = "CONNECTION_ERROR";
    pub const CONNECT_TIMEOUT: &str = "CONNECT_TIMEOUT";
    pub const PUBLISH_TIMEOUT: &str = "PUBLISH_TIMEOUT";
    pub const PUBLISH_ERROR: &str = "PUBLISH_ERROR";
    pub const INVALID_CONFIG: &str = "INVALID_CONFIG";
    pub const REQUEST_ERROR: &str = "REQUEST_ERROR";
}

/// 协议处理器共用的超时参数。
#[derive(Debug, Clone, Copy)]
pub struct HandlerTimeouts {
    /// 建立连接超时（毫秒）
    pub connect_timeout_ms: u64,
    /// 单次发布超时（毫秒）
    pub publish_timeout_ms: u64,
}

impl Default for HandlerTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            publish_timeout_ms: 10_000,
        }
    }
}

/// 单次发送的统一结果。
///
/// 热路径不抛错：失败以 `success=false` + 稳定错误码表达，
/// `details` 承载协议相关细节（HTTP 状态码、Kafka offset 等）。
#[derive(Debug, Clone, Serialize)]
pub struct PublishResult {
    pub success: bool,
    pub message: String,
    /// 从发起到确认的耗时（毫秒）
    pub latency_ms: u64,
    pub error_code: Option<String>,
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl PublishResult {
    /// 成功结果。
    pub fn ok(message: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: true,
            message: message.into(),
            latency_ms,
            error_code: None,
            details: serde_json::Map::new(),
        }
    }

    /// 失败结果。
    pub fn fail(code: &str, message: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: false,
            message: message.into(),
            latency_ms,
            error_code: Some(code.to_string()),
            details: serde_json::Map::new(),
        }
    }

    /// 从连接工厂错误折叠为失败结果。
    pub fn from_error(err: &ProtocolError, latency_ms: u64) -> Self {
        Self::fail(err.code(), err.to_string(), latency_ms)
    }

    /// 附加协议细节字段。
    pub fn with_detail(mut self, key: &str, value: serde_json::Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }
}

/// 当前 Unix 时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
