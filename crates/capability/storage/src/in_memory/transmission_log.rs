//! 发送日志内存实现
//!
//! 仅追加的日志序列，保留末尾 capacity 条。

use crate::error::StorageError;
use crate::models::TransmissionLogRecord;
use crate::traits::TransmissionLogStore;
use std::collections::VecDeque;
use std::sync::RwLock;

const DEFAULT_CAPACITY: usize = 10_000;

/// 发送日志内存存储
pub struct InMemoryTransmissionLog {
    entries: RwLock<VecDeque<TransmissionLogRecord>>,
    capacity: usize,
}

impl InMemoryTransmissionLog {
    /// 创建默认容量的日志存储
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// 创建指定容量的日志存储
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// 当前日志条数（测试用）
    pub fn len(&self) -> usize {
        self.entries.read().map(|q| q.len()).unwrap_or(0)
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryTransmissionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TransmissionLogStore for InMemoryTransmissionLog {
    /// 追加一条发送日志
    async fn append(&self, record: TransmissionLogRecord) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        entries.push_back(record);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        Ok(())
    }

    /// 读取最近 limit 条日志（新到旧）
    async fn recent(&self, limit: usize) -> Result<Vec<TransmissionLogRecord>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}
