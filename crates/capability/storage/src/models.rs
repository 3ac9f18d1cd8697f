//! 数据模型
//!
//! 定义所有存储相关的数据模型和更新结构：
//! - 设备模型：DeviceRecord, DeviceStateUpdate（含发送配置与游标）
//! - 连接模型：ConnectionRecord（目标端协议与配置）
//! - 发送日志模型：TransmissionLogRecord（单次尝试一条，不可变）

use domain::{DeviceKind, DeviceStatus, Protocol, TransmissionConfig};
use serde::{Deserialize, Serialize};

/// 设备记录。
///
/// 资格门控：`transmission_enabled && is_active` 的设备才进入活跃集合。
/// 发送频率约束在 1..=172800 秒之间。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub name: String,
    pub kind: DeviceKind,
    /// 关联的目标端连接
    pub connection_id: String,
    /// 关联的数据集
    pub dataset_id: String,
    pub transmission_enabled: bool,
    pub is_active: bool,
    /// 发送频率（秒，1–172800）
    pub transmission_frequency_seconds: u32,
    pub transmission_config: TransmissionConfig,
    /// 数据集游标：auto_reset 时恒在 [0, row_count)，否则可停在 row_count（终态）
    pub current_row_index: u64,
    pub last_transmission_at_ms: Option<i64>,
    pub status: DeviceStatus,
}

impl DeviceRecord {
    /// 是否具备进入活跃集合的资格。
    pub fn eligible(&self) -> bool {
        self.transmission_enabled && self.is_active
    }
}

/// 设备可变状态更新（引擎每次尝试后写回）。
#[derive(Debug, Clone, Default)]
pub struct DeviceStateUpdate {
    pub current_row_index: Option<u64>,
    pub last_transmission_at_ms: Option<i64>,
    pub status: Option<DeviceStatus>,
}

/// 目标端连接记录。
///
/// `config` 中的敏感字段（密码、token）由外部协作方解密后传入，
/// 引擎自身不持久化任何密钥。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub connection_id: String,
    pub name: String,
    pub protocol: Protocol,
    /// 协议配置（broker 地址、topic/path、QoS、method 等）
    pub config: serde_json::Value,
}

/// 发送日志记录（单次尝试一条，写入后不可变）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionLogRecord {
    pub log_id: String,
    pub connection_id: String,
    pub device_id: String,
    /// 方向：引擎侧恒为 "sent"
    pub direction: String,
    pub payload_size: u64,
    pub protocol: Protocol,
    /// "success" 或 "failed"
    pub status: String,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub latency_ms: u64,
    /// 同一 tick 内所有尝试共享的批次 ID
    pub batch_id: String,
    pub created_at_ms: i64,
}
