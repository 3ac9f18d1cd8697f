//! 数据集内存存储实现
//!
//! 以数据集 ID 为键保存有序的行序列，提供偏移/限量读取。

use crate::error::StorageError;
use crate::traits::DatasetReader;
use domain::DatasetRow;
use std::collections::HashMap;
use std::sync::RwLock;

/// 数据集内存存储
pub struct InMemoryDatasetStore {
    datasets: RwLock<HashMap<String, Vec<DatasetRow>>>,
}

impl InMemoryDatasetStore {
    /// 创建新的数据集存储
    pub fn new() -> Self {
        Self {
            datasets: RwLock::new(HashMap::new()),
        }
    }

    /// 写入整个数据集（播种用，覆盖旧内容）
    pub fn insert_dataset(&self, dataset_id: impl Into<String>, rows: Vec<DatasetRow>) {
        if let Ok(mut map) = self.datasets.write() {
            map.insert(dataset_id.into(), rows);
        }
    }
}

impl Default for InMemoryDatasetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatasetReader for InMemoryDatasetStore {
    /// 数据集总行数
    async fn row_count(&self, dataset_id: &str) -> Result<u64, StorageError> {
        let count = self
            .datasets
            .read()
            .ok()
            .and_then(|map| map.get(dataset_id).map(|rows| rows.len() as u64))
            .ok_or_else(|| StorageError::new("dataset not found"))?;
        Ok(count)
    }

    /// 按偏移/限量读取数据行
    async fn read_rows(
        &self,
        dataset_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<DatasetRow>, StorageError> {
        let map = self
            .datasets
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let rows = map
            .get(dataset_id)
            .ok_or_else(|| StorageError::new("dataset not found"))?;
        let start = (offset as usize).min(rows.len());
        let end = start.saturating_add(limit as usize).min(rows.len());
        Ok(rows[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, value: i64) -> DatasetRow {
        let mut map = DatasetRow::new();
        map.insert(key.to_string(), serde_json::json!(value));
        map
    }

    #[tokio::test]
    async fn read_rows_respects_offset_and_limit() {
        let store = InMemoryDatasetStore::new();
        store.insert_dataset("ds-1", (0..10).map(|i| row("v", i)).collect());

        assert_eq!(store.row_count("ds-1").await.expect("count"), 10);
        let rows = store.read_rows("ds-1", 8, 5).await.expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["v"], serde_json::json!(8));
    }

    #[tokio::test]
    async fn missing_dataset_is_an_error() {
        let store = InMemoryDatasetStore::new();
        assert!(store.row_count("nope").await.is_err());
    }
}
