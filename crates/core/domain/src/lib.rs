pub mod data;

pub use data::{DatasetRow, TransmissionConfig, default_batch_size};

use serde::{Deserialize, Serialize};

/// 目标端的线协议类型。
///
/// `https` 作为 `http` 的别名保留（历史配置兼容），两者路由到同一处理器。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Mqtt,
    Http,
    Https,
    Kafka,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Mqtt => "mqtt",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Kafka => "kafka",
        }
    }

    /// 从字符串解析（大小写不敏感）。
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "mqtt" => Some(Protocol::Mqtt),
            "http" => Some(Protocol::Http),
            "https" => Some(Protocol::Https),
            "kafka" => Some(Protocol::Kafka),
            _ => None,
        }
    }
}

/// 设备发送状态。
///
/// `Completed` 为终态：数据集耗尽且未开启 auto_reset 的设备停在此状态，
/// 仍保留在活跃集合中但不再到期。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Idle,
    Transmitting,
    Error,
    Paused,
    Completed,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Idle => "idle",
            DeviceStatus::Transmitting => "transmitting",
            DeviceStatus::Error => "error",
            DeviceStatus::Paused => "paused",
            DeviceStatus::Completed => "completed",
        }
    }
}

/// 设备类型。
///
/// 数采仪（datalogger）可按 batch_size 批量发送，传感器隐式按单行发送。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Sensor,
    Datalogger,
}
