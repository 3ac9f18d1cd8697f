//! 设备内存存储实现
//!
//! 功能：
//! - 发送资格设备列举
//! - 可变状态（游标/时间/状态）写回
//! - 测试与演示用的设备播种

use crate::error::StorageError;
use crate::models::{DeviceRecord, DeviceStateUpdate};
use crate::traits::DeviceStore;
use std::collections::HashMap;
use std::sync::RwLock;

/// 设备内存存储
///
/// 使用 RwLock + HashMap 提供线程安全的内存存储。
pub struct InMemoryDeviceStore {
    devices: RwLock<HashMap<String, DeviceRecord>>,
}

impl InMemoryDeviceStore {
    /// 创建新的设备存储
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// 写入或覆盖一台设备（播种用）
    pub fn upsert_device(&self, record: DeviceRecord) {
        if let Ok(mut map) = self.devices.write() {
            map.insert(record.device_id.clone(), record);
        }
    }
}

impl Default for InMemoryDeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DeviceStore for InMemoryDeviceStore {
    /// 列出所有具备发送资格的设备
    async fn list_transmission_devices(&self) -> Result<Vec<DeviceRecord>, StorageError> {
        let items = self
            .devices
            .read()
            .map(|map| {
                map.values()
                    .filter(|item| item.eligible())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(items)
    }

    /// 查找指定设备
    async fn find_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, StorageError> {
        let item = self
            .devices
            .read()
            .ok()
            .and_then(|map| map.get(device_id).cloned());
        Ok(item)
    }

    /// 写回设备可变状态
    async fn update_device_state(
        &self,
        device_id: &str,
        update: DeviceStateUpdate,
    ) -> Result<(), StorageError> {
        let mut map = self
            .devices
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let device = map
            .get_mut(device_id)
            .ok_or_else(|| StorageError::new("device not found"))?;
        if let Some(index) = update.current_row_index {
            device.current_row_index = index;
        }
        if let Some(ts) = update.last_transmission_at_ms {
            device.last_transmission_at_ms = Some(ts);
        }
        if let Some(status) = update.status {
            device.status = status;
        }
        Ok(())
    }
}
