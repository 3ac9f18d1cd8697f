//! 目标端连接池
//!
//! 每个目标端连接最多缓存一个常驻客户端。取用路径按目标端串行：
//! 外层表锁只用于取/建槽位句柄，建连发生在槽位自身的锁内，
//! 不同目标端互不阻塞，同一目标端不会并发建出两个客户端。
//! 槽位元数据与客户端分开存放，租借在途时视图仍可见。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use domain::Protocol;
use serde::Serialize;
use sim_protocol::{HandlerSet, ProtocolClient, ProtocolError};
use sim_storage::ConnectionRecord;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

/// 连接池参数。
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 空闲淘汰阈值（毫秒）
    pub max_idle_ms: u64,
    /// 健康检查周期（毫秒）
    pub health_check_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_ms: 300_000,
            health_check_interval_ms: 60_000,
        }
    }
}

/// 槽位元数据（最近一次取用时更新）。
#[derive(Debug, Clone, Copy)]
struct SlotMeta {
    protocol: Protocol,
    created_at: Instant,
    last_used: Instant,
    /// 复用次数（新建为 0，每次命中 +1）
    use_count: u64,
}

type SlotHandle = Arc<tokio::sync::Mutex<Option<ProtocolClient>>>;

/// 池条目视图。
#[derive(Debug, Clone, Serialize)]
pub struct PoolEntryStats {
    pub connection_id: String,
    pub protocol: Protocol,
    pub use_count: u64,
    pub idle_ms: u64,
    pub age_ms: u64,
    /// 是否正被租借（发送在途）
    pub in_flight: bool,
}

/// 取用成功后的客户端租借。
///
/// 持有期间同一目标端的其他取用会等待，发送完成后随 drop 释放。
pub struct PooledConnection {
    guard: OwnedMutexGuard<Option<ProtocolClient>>,
}

impl PooledConnection {
    pub fn client(&self) -> &ProtocolClient {
        static NOOP: ProtocolClient = ProtocolClient::Noop;
        // acquire 成功后槽位必有客户端；该分支仅为避免 panic
        self.guard.as_ref().unwrap_or(&NOOP)
    }

    /// 发送失败后作废该客户端：下次取用会重新建连。
    pub async fn invalidate(mut self) {
        if let Some(client) = self.guard.take() {
            client.close().await;
        }
    }
}

/// 目标端连接池。
pub struct ConnectionPool {
    config: PoolConfig,
    slots: Mutex<HashMap<String, SlotHandle>>,
    meta: Mutex<HashMap<String, SlotMeta>>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
            meta: Mutex::new(HashMap::new()),
        }
    }

    fn slot_handle(&self, connection_id: &str) -> SlotHandle {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(connection_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    fn slot_handles(&self) -> Vec<(String, SlotHandle)> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .iter()
            .map(|(connection_id, handle)| (connection_id.clone(), handle.clone()))
            .collect()
    }

    fn meta_of(&self, connection_id: &str) -> Option<SlotMeta> {
        let meta = self.meta.lock().unwrap_or_else(|e| e.into_inner());
        meta.get(connection_id).copied()
    }

    fn remove_meta(&self, connection_id: &str) {
        let mut meta = self.meta.lock().unwrap_or_else(|e| e.into_inner());
        meta.remove(connection_id);
    }

    /// 取用目标端客户端：命中健康缓存则复用，否则新建入池。
    pub async fn acquire(
        &self,
        handlers: &dyn HandlerSet,
        connection: &ConnectionRecord,
    ) -> Result<PooledConnection, ProtocolError> {
        let handle = self.slot_handle(&connection.connection_id);
        let mut guard = handle.lock_owned().await;

        let handler = handlers.handler(connection.protocol);
        if let Some(client) = guard.as_ref() {
            if handler.is_healthy(client).await {
                let use_count = {
                    let now = Instant::now();
                    let mut meta = self.meta.lock().unwrap_or_else(|e| e.into_inner());
                    let entry =
                        meta.entry(connection.connection_id.clone())
                            .or_insert(SlotMeta {
                                protocol: connection.protocol,
                                created_at: now,
                                last_used: now,
                                use_count: 0,
                            });
                    entry.use_count += 1;
                    entry.last_used = now;
                    entry.use_count
                };
                sim_telemetry::record_pool_reused();
                debug!(
                    target: "sim.pool",
                    connection_id = %connection.connection_id,
                    use_count,
                    "pool hit"
                );
                return Ok(PooledConnection { guard });
            }
            // 缓存客户端已失活，拆除后重建
            if let Some(stale) = guard.take() {
                stale.close().await;
            }
            self.remove_meta(&connection.connection_id);
        }

        let client = handler
            .connect(&connection.connection_id, &connection.config)
            .await?;
        *guard = Some(client);
        {
            let now = Instant::now();
            let mut meta = self.meta.lock().unwrap_or_else(|e| e.into_inner());
            meta.insert(
                connection.connection_id.clone(),
                SlotMeta {
                    protocol: connection.protocol,
                    created_at: now,
                    last_used: now,
                    use_count: 0,
                },
            );
        }
        sim_telemetry::record_pool_created();
        info!(
            target: "sim.pool",
            connection_id = %connection.connection_id,
            protocol = connection.protocol.as_str(),
            "pool entry created"
        );
        Ok(PooledConnection { guard })
    }

    /// 作废指定目标端的缓存客户端。
    pub async fn invalidate(&self, connection_id: &str) {
        let handle = self.slot_handle(connection_id);
        let mut guard = handle.lock().await;
        if let Some(client) = guard.take() {
            client.close().await;
        }
        self.remove_meta(connection_id);
    }

    /// 周期健康检查：淘汰超过空闲阈值或失活的客户端。
    ///
    /// 忙碌中的槽位跳过，留给下个周期。
    pub async fn health_check_all(&self, handlers: &dyn HandlerSet) {
        let max_idle = Duration::from_millis(self.config.max_idle_ms);
        for (connection_id, handle) in self.slot_handles() {
            let Ok(mut guard) = handle.try_lock() else {
                continue;
            };
            let Some(client) = guard.as_ref() else {
                // 租借方作废后留下的空槽，补清元数据
                self.remove_meta(&connection_id);
                continue;
            };
            let Some(meta) = self.meta_of(&connection_id) else {
                continue;
            };
            let idle_expired = meta.last_used.elapsed() >= max_idle;
            let healthy = handlers.handler(meta.protocol).is_healthy(client).await;
            if idle_expired || !healthy {
                if let Some(evicted) = guard.take() {
                    evicted.close().await;
                    sim_telemetry::record_pool_evicted();
                    info!(
                        target: "sim.pool",
                        connection_id = %connection_id,
                        reason = if idle_expired { "idle" } else { "unhealthy" },
                        "pool entry evicted"
                    );
                }
                self.remove_meta(&connection_id);
            }
        }
    }

    /// 当前池条目视图。租借在途的槽位按最近一次已知元数据计入。
    pub async fn stats(&self) -> Vec<PoolEntryStats> {
        let mut entries = Vec::new();
        for (connection_id, handle) in self.slot_handles() {
            let in_flight = match handle.try_lock() {
                Ok(guard) => {
                    if guard.is_none() {
                        // 作废后尚未重建的空槽不计入
                        self.remove_meta(&connection_id);
                        continue;
                    }
                    false
                }
                Err(_) => true,
            };
            if let Some(meta) = self.meta_of(&connection_id) {
                entries.push(PoolEntryStats {
                    connection_id,
                    protocol: meta.protocol,
                    use_count: meta.use_count,
                    idle_ms: meta.last_used.elapsed().as_millis() as u64,
                    age_ms: meta.created_at.elapsed().as_millis() as u64,
                    in_flight,
                });
            }
        }
        entries
    }

    /// 停机清池：拆除所有缓存客户端。
    pub async fn close_all(&self) {
        for (_, handle) in self.slot_handles() {
            let mut guard = handle.lock().await;
            if let Some(client) = guard.take() {
                client.close().await;
            }
        }
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.clear();
        let mut meta = self.meta.lock().unwrap_or_else(|e| e.into_inner());
        meta.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sim_protocol::{ProtocolHandler, PublishResult};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingHandler {
        connects: AtomicU64,
    }

    #[async_trait]
    impl ProtocolHandler for CountingHandler {
        fn protocol(&self) -> Protocol {
            Protocol::Mqtt
        }

        fn validate_config(&self, _config: &serde_json::Value) -> bool {
            true
        }

        async fn connect(
            &self,
            _connection_id: &str,
            _config: &serde_json::Value,
        ) -> Result<ProtocolClient, ProtocolError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(ProtocolClient::Noop)
        }

        async fn is_healthy(&self, _client: &ProtocolClient) -> bool {
            true
        }

        async fn publish(
            &self,
            _config: &serde_json::Value,
            _target: Option<&str>,
            _payload: &[u8],
        ) -> PublishResult {
            PublishResult::ok("sent", 1)
        }

        async fn publish_pooled(
            &self,
            _client: &ProtocolClient,
            _config: &serde_json::Value,
            _target: Option<&str>,
            _payload: &[u8],
        ) -> PublishResult {
            PublishResult::ok("sent", 1)
        }
    }

    struct SingleHandlerSet(CountingHandler);

    impl HandlerSet for SingleHandlerSet {
        fn handler(&self, _protocol: Protocol) -> &dyn ProtocolHandler {
            &self.0
        }
    }

    fn connection(id: &str) -> ConnectionRecord {
        ConnectionRecord {
            connection_id: id.to_string(),
            name: id.to_string(),
            protocol: Protocol::Mqtt,
            config: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn reuses_cached_client() {
        let pool = ConnectionPool::new(PoolConfig::default());
        let handlers = SingleHandlerSet(CountingHandler {
            connects: AtomicU64::new(0),
        });

        let first = pool.acquire(&handlers, &connection("conn-a")).await.expect("acquire");
        drop(first);
        let second = pool.acquire(&handlers, &connection("conn-a")).await.expect("acquire");
        drop(second);

        assert_eq!(handlers.0.connects.load(Ordering::SeqCst), 1);
        let stats = pool.stats().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].use_count, 1);
    }

    #[tokio::test]
    async fn invalidate_forces_reconnect() {
        let pool = ConnectionPool::new(PoolConfig::default());
        let handlers = SingleHandlerSet(CountingHandler {
            connects: AtomicU64::new(0),
        });

        let leased = pool.acquire(&handlers, &connection("conn-a")).await.expect("acquire");
        leased.invalidate().await;
        assert!(pool.stats().await.is_empty());
        let _again = pool.acquire(&handlers, &connection("conn-a")).await.expect("acquire");

        assert_eq!(handlers.0.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn evicts_idle_entries() {
        let pool = ConnectionPool::new(PoolConfig {
            max_idle_ms: 0,
            ..PoolConfig::default()
        });
        let handlers = SingleHandlerSet(CountingHandler {
            connects: AtomicU64::new(0),
        });

        let leased = pool.acquire(&handlers, &connection("conn-a")).await.expect("acquire");
        drop(leased);
        pool.health_check_all(&handlers).await;

        assert!(pool.stats().await.is_empty());
    }

    #[tokio::test]
    async fn stats_include_leased_slots() {
        let pool = ConnectionPool::new(PoolConfig::default());
        let handlers = SingleHandlerSet(CountingHandler {
            connects: AtomicU64::new(0),
        });

        let leased = pool.acquire(&handlers, &connection("conn-a")).await.expect("acquire");
        let stats = pool.stats().await;
        assert_eq!(stats.len(), 1);
        assert!(stats[0].in_flight);

        drop(leased);
        let stats = pool.stats().await;
        assert_eq!(stats.len(), 1);
        assert!(!stats[0].in_flight);
    }

    #[tokio::test]
    async fn destinations_use_independent_slots() {
        let pool = ConnectionPool::new(PoolConfig::default());
        let handlers = SingleHandlerSet(CountingHandler {
            connects: AtomicU64::new(0),
        });

        // 同时持有两个目标端的租借，互不阻塞
        let a = pool.acquire(&handlers, &connection("conn-a")).await.expect("acquire");
        let b = pool.acquire(&handlers, &connection("conn-b")).await.expect("acquire");
        drop(a);
        drop(b);

        assert_eq!(handlers.0.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().await.len(), 2);
    }
}
