//! 稳定的 DTO 与 API 响应契约。

use serde::{Deserialize, Serialize};

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// 发送引擎运行状态。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusDto {
    pub running: bool,
    pub active_devices: usize,
    pub tick_count: u64,
    pub interval_ms: u64,
    pub max_concurrent: usize,
    pub uptime_seconds: u64,
}

/// 设备启停请求体。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceActionRequest {
    /// 停止时是否将读取游标归零
    #[serde(default)]
    pub reset_row_index: bool,
}

/// 设备运行视图。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRuntimeDto {
    pub device_id: String,
    pub name: String,
    pub status: String,
    pub connection_id: String,
    pub dataset_id: String,
    pub current_row_index: u64,
    pub last_transmission_at_ms: Option<i64>,
    pub transmission_frequency_seconds: u64,
}

/// 连接池条目视图。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolEntryDto {
    pub connection_id: String,
    pub protocol: String,
    pub use_count: u64,
    pub idle_ms: u64,
    pub age_ms: u64,
    /// 是否正被租借（发送在途）
    pub in_flight: bool,
}

/// 熔断器状态视图。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitDto {
    pub connection_id: String,
    pub state: String,
    pub failure_count: u32,
    pub open_count: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_failure_at_ms: Option<i64>,
    /// OPEN 状态下距可重试的剩余毫秒（其余状态为 0）
    pub remaining_ms: u64,
}

/// 发送日志条目视图。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryDto {
    pub log_id: String,
    pub connection_id: String,
    pub device_id: String,
    pub direction: String,
    pub protocol: String,
    pub status: String,
    pub payload_size: u64,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub latency_ms: u64,
    pub batch_id: Option<String>,
    pub created_at_ms: i64,
}

/// 运行指标视图。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsDto {
    pub mqtt_sent: u64,
    pub mqtt_failed: u64,
    pub http_sent: u64,
    pub http_failed: u64,
    pub kafka_sent: u64,
    pub kafka_failed: u64,
    pub bytes_sent: u64,
    pub ticks: u64,
    pub avg_tick_duration_ms: u64,
    pub avg_publish_latency_ms: u64,
    pub circuit_opened: u64,
    pub circuit_denied: u64,
    pub pool_created: u64,
    pub pool_reused: u64,
    pub pool_evicted: u64,
    pub active_devices: u64,
}

/// 联通性测试返回结构。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConnectionResponse {
    pub success: bool,
    pub message: String,
    pub latency_ms: u64,
    pub error_code: Option<String>,
    pub details: serde_json::Map<String, serde_json::Value>,
}
