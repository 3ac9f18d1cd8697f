use serde::{Deserialize, Serialize};

/// 数据集单行：扁平的 键 → 字符串或数值 映射。
///
/// 行数据原样进入发送载荷（外加可选注入键），因此直接用 JSON 对象表示。
pub type DatasetRow = serde_json::Map<String, serde_json::Value>;

/// 设备级发送配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionConfig {
    /// 载荷中注入 `device_id` 键
    #[serde(default = "default_true")]
    pub include_device_id: bool,
    /// 载荷中注入 `timestamp` 键（毫秒）
    #[serde(default = "default_true")]
    pub include_timestamp: bool,
    /// 游标到达数据集末尾后回绕到 0
    #[serde(default = "default_true")]
    pub auto_reset: bool,
    /// 单次发送消费的行数（≥1）
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            include_device_id: true,
            include_timestamp: true,
            auto_reset: true,
            batch_size: 1,
        }
    }
}

impl TransmissionConfig {
    /// batch_size 下限为 1。
    pub fn effective_batch_size(&self) -> u64 {
        u64::from(self.batch_size.max(1))
    }
}

fn default_true() -> bool {
    true
}

pub fn default_batch_size() -> u32 {
    1
}
