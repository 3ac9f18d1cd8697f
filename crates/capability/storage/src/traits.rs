//! 存储接口 Trait 定义
//!
//! 定义发送引擎消费的外部协作方异步接口：
//! - DeviceStore：设备资格字段与可变状态读写
//! - ConnectionStore：目标端配置读取（已解密）
//! - DatasetReader：数据集行的偏移/限量读取
//! - TransmissionLogStore：发送日志仅追加写入
//!
//! 设计原则：
//! - 所有接口返回 StorageError
//! - 使用 async_trait 支持动态分发
//! - 引擎不实现任何 CRUD，持久化形态由部署方决定

use crate::error::StorageError;
use crate::models::{ConnectionRecord, DeviceRecord, DeviceStateUpdate, TransmissionLogRecord};
use async_trait::async_trait;
use domain::DatasetRow;

/// 设备存储接口。
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// 列出所有具备发送资格的设备（transmission_enabled 且 is_active）
    async fn list_transmission_devices(&self) -> Result<Vec<DeviceRecord>, StorageError>;

    /// 查找指定设备
    async fn find_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, StorageError>;

    /// 写回设备可变状态（游标、最近发送时间、状态）
    async fn update_device_state(
        &self,
        device_id: &str,
        update: DeviceStateUpdate,
    ) -> Result<(), StorageError>;
}

/// 目标端连接存储接口。
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// 查找连接配置（敏感字段已解密）
    async fn find_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<ConnectionRecord>, StorageError>;
}

/// 数据集读取接口。
#[async_trait]
pub trait DatasetReader: Send + Sync {
    /// 数据集总行数
    async fn row_count(&self, dataset_id: &str) -> Result<u64, StorageError>;

    /// 按偏移/限量读取数据行
    async fn read_rows(
        &self,
        dataset_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<DatasetRow>, StorageError>;
}

/// 发送日志接口（仅追加）。
#[async_trait]
pub trait TransmissionLogStore: Send + Sync {
    /// 追加一条发送日志（单次尝试一条）
    async fn append(&self, record: TransmissionLogRecord) -> Result<(), StorageError>;

    /// 读取最近 limit 条日志（管理面查询用）
    async fn recent(&self, limit: usize) -> Result<Vec<TransmissionLogRecord>, StorageError>;
}
