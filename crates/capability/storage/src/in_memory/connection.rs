//! 连接内存存储实现

use crate::error::StorageError;
use crate::models::ConnectionRecord;
use crate::traits::ConnectionStore;
use std::collections::HashMap;
use std::sync::RwLock;

/// 目标端连接内存存储
pub struct InMemoryConnectionStore {
    connections: RwLock<HashMap<String, ConnectionRecord>>,
}

impl InMemoryConnectionStore {
    /// 创建新的连接存储
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// 写入或覆盖一条连接（播种用）
    pub fn upsert_connection(&self, record: ConnectionRecord) {
        if let Ok(mut map) = self.connections.write() {
            map.insert(record.connection_id.clone(), record);
        }
    }
}

impl Default for InMemoryConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    /// 查找连接配置
    async fn find_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<ConnectionRecord>, StorageError> {
        let item = self
            .connections
            .read()
            .ok()
            .and_then(|map| map.get(connection_id).cloned());
        Ok(item)
    }
}
