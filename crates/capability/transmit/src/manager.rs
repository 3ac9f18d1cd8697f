//! 发送引擎调度器
//!
//! tick 循环 + monitor 循环双任务驱动：tick 负责到期设备的发送尝试，
//! monitor 负责活跃集合刷新与连接池健康检查。单 tick 内的尝试由
//! Semaphore 限并发，同一批次共享一个 batch_id 便于日志关联。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use domain::{DeviceKind, DeviceStatus};
use sim_protocol::{HandlerSet, ProtocolError, PublishResult, codes, now_epoch_ms};
use sim_storage::{
    ConnectionRecord, ConnectionStore, DatasetReader, DeviceRecord, DeviceStateUpdate, DeviceStore,
    StorageError, TransmissionLogRecord, TransmissionLogStore,
};
use tokio::sync::{RwLock, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitStats};
use crate::payload::build_payload;
use crate::pool::{ConnectionPool, PoolConfig, PoolEntryStats};

/// 引擎侧错误码（协议层错误码之外的尝试失败原因）。
pub const DATASET_EMPTY: &str = "DATASET_EMPTY";
pub const DATASET_EXHAUSTED: &str = "DATASET_EXHAUSTED";
pub const DATASET_READ_ERROR: &str = "DATASET_READ_ERROR";
pub const CONNECTION_NOT_FOUND: &str = "CONNECTION_NOT_FOUND";

/// 引擎错误。
#[derive(Debug, thiserror::Error)]
pub enum TransmitError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),
    #[error("transmission engine already running")]
    AlreadyRunning,
}

/// 引擎运行参数。
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 调度 tick 间隔（毫秒）
    pub tick_interval_ms: u64,
    /// 活跃集合刷新与池健康检查周期（秒）
    pub monitor_interval_seconds: u64,
    /// 单 tick 并发发送上限
    pub max_concurrent: usize,
    /// 停机等待在途发送的宽限期（毫秒）
    pub shutdown_grace_ms: u64,
    /// 日志写入超时（毫秒）
    pub log_write_timeout_ms: u64,
    pub breaker: BreakerConfig,
    pub pool: PoolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            monitor_interval_seconds: 30,
            max_concurrent: 16,
            shutdown_grace_ms: 5000,
            log_write_timeout_ms: 2000,
            breaker: BreakerConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

/// 引擎消费的外部协作方集合。
#[derive(Clone)]
pub struct EngineStores {
    pub devices: Arc<dyn DeviceStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub datasets: Arc<dyn DatasetReader>,
    pub logs: Arc<dyn TransmissionLogStore>,
}

/// 引擎运行状态视图。
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub running: bool,
    pub active_devices: usize,
    pub tick_count: u64,
    pub interval_ms: u64,
    pub max_concurrent: usize,
    pub uptime_seconds: u64,
}

struct ManagerInner {
    config: EngineConfig,
    stores: EngineStores,
    handlers: Arc<dyn HandlerSet>,
    pool: ConnectionPool,
    breaker: CircuitBreaker,
    /// 活跃设备集合（device_id → 最近已知记录）
    active: RwLock<HashMap<String, DeviceRecord>>,
    permits: Arc<Semaphore>,
    tick_count: AtomicU64,
    running: AtomicBool,
    started_at: std::sync::Mutex<Option<Instant>>,
    shutdown: std::sync::Mutex<Option<watch::Sender<bool>>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// 发送引擎入口。克隆共享同一实例。
#[derive(Clone)]
pub struct TransmissionManager {
    inner: Arc<ManagerInner>,
}

impl TransmissionManager {
    pub fn new(config: EngineConfig, stores: EngineStores, handlers: Arc<dyn HandlerSet>) -> Self {
        let pool = ConnectionPool::new(config.pool.clone());
        let breaker = CircuitBreaker::new(config.breaker.clone());
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            inner: Arc::new(ManagerInner {
                config,
                stores,
                handlers,
                pool,
                breaker,
                active: RwLock::new(HashMap::new()),
                permits,
                tick_count: AtomicU64::new(0),
                running: AtomicBool::new(false),
                started_at: std::sync::Mutex::new(None),
                shutdown: std::sync::Mutex::new(None),
                tasks: std::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    /// 启动 tick 循环与 monitor 循环。重复启动返回错误。
    pub async fn start(&self) -> Result<(), TransmitError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(TransmitError::AlreadyRunning);
        }
        let count = self.refresh_active_devices().await?;
        info!(
            target: "sim.engine",
            active_devices = count,
            tick_interval_ms = self.inner.config.tick_interval_ms,
            "transmission engine started"
        );

        if let Ok(mut started_at) = self.inner.started_at.lock() {
            *started_at = Some(Instant::now());
        }
        let (tx, rx) = watch::channel(false);
        if let Ok(mut shutdown) = self.inner.shutdown.lock() {
            *shutdown = Some(tx);
        }

        let tick_inner = Arc::clone(&self.inner);
        let mut tick_rx = rx.clone();
        let tick_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(
                tick_inner.config.tick_interval_ms.max(100),
            ));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick_inner.run_tick().await,
                    _ = tick_rx.changed() => break,
                }
            }
        });

        let pool_inner = Arc::clone(&self.inner);
        let mut pool_rx = rx.clone();
        let pool_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(
                pool_inner.config.pool.health_check_interval_ms.max(1000),
            ));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        pool_inner
                            .pool
                            .health_check_all(pool_inner.handlers.as_ref())
                            .await;
                    }
                    _ = pool_rx.changed() => break,
                }
            }
        });

        let monitor_inner = Arc::clone(&self.inner);
        let mut monitor_rx = rx;
        let monitor_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(
                monitor_inner.config.monitor_interval_seconds.max(1),
            ));
            // 启动时已刷新过一次，跳过首个立即 tick
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = monitor_inner.refresh_active_devices().await {
                            warn!(target: "sim.engine", error = %err, "active set refresh failed");
                        }
                    }
                    _ = monitor_rx.changed() => break,
                }
            }
        });

        if let Ok(mut tasks) = self.inner.tasks.lock() {
            tasks.push(tick_task);
            tasks.push(pool_task);
            tasks.push(monitor_task);
        }
        Ok(())
    }

    /// 停机：通知循环退出，等待在途发送结束后清池。
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut started_at) = self.inner.started_at.lock() {
            *started_at = None;
        }
        if let Ok(mut shutdown) = self.inner.shutdown.lock() {
            if let Some(tx) = shutdown.take() {
                let _ = tx.send(true);
            }
        }

        let all_permits = self.inner.config.max_concurrent.max(1) as u32;
        let grace = Duration::from_millis(self.inner.config.shutdown_grace_ms);
        match tokio::time::timeout(grace, self.inner.permits.acquire_many(all_permits)).await {
            Ok(Ok(drained)) => drop(drained),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(target: "sim.engine", "in-flight attempts not drained within grace period")
            }
        }

        let tasks: Vec<JoinHandle<()>> = match self.inner.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            task.abort();
        }

        self.inner.pool.close_all().await;
        info!(target: "sim.engine", "transmission engine stopped");
    }

    /// 手动驱动一个 tick（测试与诊断用，生产由内部循环驱动）。
    pub async fn run_tick(&self) {
        self.inner.run_tick().await;
    }

    /// 从设备存储重建活跃集合。
    pub async fn refresh_active_devices(&self) -> Result<usize, TransmitError> {
        self.inner.refresh_active_devices().await
    }

    /// 将设备标记为待发送并纳入活跃集合。
    pub async fn start_device(&self, device_id: &str) -> Result<(), TransmitError> {
        let mut device = self
            .inner
            .stores
            .devices
            .find_device(device_id)
            .await?
            .ok_or_else(|| TransmitError::NotFound("device", device_id.to_string()))?;
        self.inner
            .stores
            .devices
            .update_device_state(
                device_id,
                DeviceStateUpdate {
                    status: Some(DeviceStatus::Idle),
                    ..Default::default()
                },
            )
            .await?;
        device.status = DeviceStatus::Idle;
        if device.eligible() {
            let mut active = self.inner.active.write().await;
            active.insert(device_id.to_string(), device);
            sim_telemetry::set_active_devices(active.len() as u64);
        }
        info!(target: "sim.engine", device_id = %device_id, "device transmission started");
        Ok(())
    }

    /// 按存储的当前状态重估单个设备的发送资格，立即纳入或移出活跃集合。
    ///
    /// 配置在外部被修改后调用，变更无需等到下个 monitor 周期生效。
    pub async fn refresh_device(&self, device_id: &str) -> Result<bool, TransmitError> {
        let device = self
            .inner
            .stores
            .devices
            .find_device(device_id)
            .await?
            .ok_or_else(|| TransmitError::NotFound("device", device_id.to_string()))?;
        let eligible = device.eligible();
        let mut active = self.inner.active.write().await;
        if eligible {
            active.insert(device_id.to_string(), device);
        } else {
            active.remove(device_id);
        }
        sim_telemetry::set_active_devices(active.len() as u64);
        debug!(
            target: "sim.engine",
            device_id = %device_id,
            eligible,
            "device eligibility refreshed"
        );
        Ok(eligible)
    }

    /// 暂停设备并移出活跃集合，可选将游标归零。
    pub async fn stop_device(
        &self,
        device_id: &str,
        reset_row_index: bool,
    ) -> Result<(), TransmitError> {
        self.inner
            .stores
            .devices
            .find_device(device_id)
            .await?
            .ok_or_else(|| TransmitError::NotFound("device", device_id.to_string()))?;
        self.inner
            .stores
            .devices
            .update_device_state(
                device_id,
                DeviceStateUpdate {
                    current_row_index: reset_row_index.then_some(0),
                    last_transmission_at_ms: None,
                    status: Some(DeviceStatus::Paused),
                },
            )
            .await?;
        let mut active = self.inner.active.write().await;
        active.remove(device_id);
        sim_telemetry::set_active_devices(active.len() as u64);
        info!(
            target: "sim.engine",
            device_id = %device_id,
            reset_row_index,
            "device transmission stopped"
        );
        Ok(())
    }

    /// 对目标端做一次自包含的联通性测试（不经过连接池与熔断）。
    pub async fn test_connection(
        &self,
        connection_id: &str,
    ) -> Result<PublishResult, TransmitError> {
        let connection = self
            .inner
            .stores
            .connections
            .find_connection(connection_id)
            .await?
            .ok_or_else(|| TransmitError::NotFound("connection", connection_id.to_string()))?;
        let handler = self.inner.handlers.handler(connection.protocol);
        if !handler.validate_config(&connection.config) {
            return Ok(PublishResult::fail(
                codes::INVALID_CONFIG,
                "connection config failed validation",
                0,
            ));
        }
        let probe = serde_json::json!({ "test": true, "timestamp": now_epoch_ms() });
        let payload = serde_json::to_vec(&probe).unwrap_or_default();
        Ok(handler.publish(&connection.config, None, &payload).await)
    }

    pub async fn status(&self) -> EngineStatus {
        let uptime_seconds = self
            .inner
            .started_at
            .lock()
            .ok()
            .and_then(|started_at| started_at.map(|at| at.elapsed().as_secs()))
            .unwrap_or(0);
        EngineStatus {
            running: self.inner.running.load(Ordering::SeqCst),
            active_devices: self.inner.active.read().await.len(),
            tick_count: self.inner.tick_count.load(Ordering::Relaxed),
            interval_ms: self.inner.config.tick_interval_ms,
            max_concurrent: self.inner.config.max_concurrent,
            uptime_seconds,
        }
    }

    pub fn circuit_stats(&self) -> Vec<CircuitStats> {
        self.inner.breaker.snapshot()
    }

    pub fn reset_circuit(&self, connection_id: &str) {
        self.inner.breaker.reset(connection_id);
    }

    pub fn reset_all_circuits(&self) {
        self.inner.breaker.reset_all();
    }

    pub async fn pool_stats(&self) -> Vec<PoolEntryStats> {
        self.inner.pool.stats().await
    }
}

impl ManagerInner {
    async fn refresh_active_devices(&self) -> Result<usize, TransmitError> {
        let devices = self.stores.devices.list_transmission_devices().await?;
        let mut map = HashMap::with_capacity(devices.len());
        for device in devices {
            if device.eligible() {
                map.insert(device.device_id.clone(), device);
            }
        }
        let count = map.len();
        *self.active.write().await = map;
        sim_telemetry::set_active_devices(count as u64);
        debug!(target: "sim.engine", active_devices = count, "active set refreshed");
        Ok(count)
    }

    async fn run_tick(self: &Arc<Self>) {
        let started = Instant::now();
        let now_ms = now_epoch_ms();
        let due: Vec<DeviceRecord> = {
            let active = self.active.read().await;
            active
                .values()
                .filter(|device| device_due(device, now_ms))
                .cloned()
                .collect()
        };

        if !due.is_empty() {
            let batch_id = Uuid::new_v4().to_string();
            debug!(
                target: "sim.engine",
                batch_id = %batch_id,
                due = due.len(),
                "tick dispatch"
            );
            let mut handles = Vec::with_capacity(due.len());
            for device in due {
                let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                    break;
                };
                let inner = Arc::clone(self);
                let batch_id = batch_id.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    inner.process_device(device, &batch_id, now_ms).await;
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }
        }

        self.tick_count.fetch_add(1, Ordering::Relaxed);
        sim_telemetry::record_tick(started.elapsed().as_millis() as u64);
    }

    /// 单设备单次发送尝试。
    async fn process_device(&self, device: DeviceRecord, batch_id: &str, now_ms: i64) {
        let connection_id = device.connection_id.clone();
        if !self.breaker.can_execute(&connection_id) {
            // 熔断拒绝：不写日志、不动游标，等恢复窗口
            sim_telemetry::record_circuit_denied();
            debug!(
                target: "sim.engine",
                device_id = %device.device_id,
                connection_id = %connection_id,
                "attempt skipped: circuit open"
            );
            return;
        }

        let connection = match self.stores.connections.find_connection(&connection_id).await {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                warn!(
                    target: "sim.engine",
                    device_id = %device.device_id,
                    connection_id = %connection_id,
                    code = CONNECTION_NOT_FOUND,
                    "device references missing connection"
                );
                self.apply_update(
                    &device.device_id,
                    DeviceStateUpdate {
                        status: Some(DeviceStatus::Error),
                        ..Default::default()
                    },
                )
                .await;
                return;
            }
            Err(err) => {
                warn!(
                    target: "sim.engine",
                    connection_id = %connection_id,
                    error = %err,
                    "connection lookup failed"
                );
                return;
            }
        };

        let handler = self.handlers.handler(connection.protocol);
        if !handler.validate_config(&connection.config) {
            self.on_config_error(
                &device,
                &connection,
                batch_id,
                "destination config failed validation".to_string(),
            )
            .await;
            return;
        }

        let batch_size = match device.kind {
            DeviceKind::Datalogger => device.transmission_config.effective_batch_size(),
            DeviceKind::Sensor => 1,
        };

        let row_count = match self.stores.datasets.row_count(&device.dataset_id).await {
            Ok(count) => count,
            Err(err) => {
                self.on_dataset_error(&device, &connection, batch_id, &err)
                    .await;
                return;
            }
        };
        if row_count == 0 {
            self.append_log(make_log(
                &device,
                &connection,
                batch_id,
                0,
                "failed",
                Some(format!("{DATASET_EMPTY}: dataset has no rows")),
                0,
            ))
            .await;
            self.apply_update(
                &device.device_id,
                DeviceStateUpdate {
                    status: Some(DeviceStatus::Error),
                    ..Default::default()
                },
            )
            .await;
            return;
        }

        let mut index = device.current_row_index;
        if index >= row_count {
            if device.transmission_config.auto_reset {
                index = 0;
            } else {
                self.complete_device(&device, &connection, batch_id).await;
                return;
            }
        }

        let rows = match self
            .stores
            .datasets
            .read_rows(&device.dataset_id, index, batch_size)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                self.on_dataset_error(&device, &connection, batch_id, &err)
                    .await;
                return;
            }
        };
        if rows.is_empty() {
            if device.transmission_config.auto_reset {
                self.apply_update(
                    &device.device_id,
                    DeviceStateUpdate {
                        current_row_index: Some(0),
                        ..Default::default()
                    },
                )
                .await;
            } else {
                self.complete_device(&device, &connection, batch_id).await;
            }
            return;
        }

        let payload = build_payload(&device, &rows, now_ms);
        let payload_size = payload.len() as u64;

        let pooled = match self.pool.acquire(self.handlers.as_ref(), &connection).await {
            Ok(pooled) => pooled,
            Err(ProtocolError::ConfigParse(message)) => {
                self.on_config_error(&device, &connection, batch_id, message)
                    .await;
                return;
            }
            Err(err) => {
                self.on_failure(
                    &device,
                    &connection,
                    batch_id,
                    payload_size,
                    err.code(),
                    err.to_string(),
                    0,
                )
                .await;
                return;
            }
        };

        let result = handler
            .publish_pooled(pooled.client(), &connection.config, None, &payload)
            .await;

        if result.success {
            drop(pooled);
            self.breaker.record_success(&connection_id);
            sim_telemetry::record_message_sent(connection.protocol);
            sim_telemetry::record_bytes_sent(payload_size);
            sim_telemetry::record_publish_latency_ms(result.latency_ms);

            let consumed = rows.len() as u64;
            let mut next_index = index + consumed;
            let mut status = DeviceStatus::Transmitting;
            if next_index >= row_count {
                if device.transmission_config.auto_reset {
                    next_index = 0;
                } else {
                    // 最后一行成功发出即完成，游标停在数据集末尾
                    next_index = row_count;
                    status = DeviceStatus::Completed;
                }
            }
            self.apply_update(
                &device.device_id,
                DeviceStateUpdate {
                    current_row_index: Some(next_index),
                    last_transmission_at_ms: Some(now_ms),
                    status: Some(status),
                },
            )
            .await;
            self.append_log(make_log(
                &device,
                &connection,
                batch_id,
                payload_size,
                "success",
                None,
                result.latency_ms,
            ))
            .await;
            debug!(
                target: "sim.engine",
                device_id = %device.device_id,
                connection_id = %connection_id,
                rows = consumed,
                latency_ms = result.latency_ms,
                "transmission succeeded"
            );
            if status == DeviceStatus::Completed {
                info!(
                    target: "sim.engine",
                    device_id = %device.device_id,
                    "device completed dataset"
                );
            }
        } else {
            pooled.invalidate().await;
            let code = result
                .error_code
                .clone()
                .unwrap_or_else(|| codes::PUBLISH_ERROR.to_string());
            self.on_failure(
                &device,
                &connection,
                batch_id,
                payload_size,
                &code,
                result.message,
                result.latency_ms,
            )
            .await;
        }
    }

    /// 数据集读取失败：按失败尝试记日志并标记设备，但不计入熔断。
    async fn on_dataset_error(
        &self,
        device: &DeviceRecord,
        connection: &ConnectionRecord,
        batch_id: &str,
        err: &StorageError,
    ) {
        warn!(
            target: "sim.engine",
            device_id = %device.device_id,
            dataset_id = %device.dataset_id,
            error = %err,
            "dataset read failed"
        );
        self.append_log(make_log(
            device,
            connection,
            batch_id,
            0,
            "failed",
            Some(format!("{DATASET_READ_ERROR}: {err}")),
            0,
        ))
        .await;
        self.apply_update(
            &device.device_id,
            DeviceStateUpdate {
                status: Some(DeviceStatus::Error),
                ..Default::default()
            },
        )
        .await;
    }

    /// 配置错误：立即按失败尝试记日志并停止自动重试，不计入熔断。
    ///
    /// 设备移出活跃集合，修好配置后由 monitor 刷新或手动 refresh 重新纳入。
    async fn on_config_error(
        &self,
        device: &DeviceRecord,
        connection: &ConnectionRecord,
        batch_id: &str,
        message: String,
    ) {
        warn!(
            target: "sim.engine",
            device_id = %device.device_id,
            connection_id = %connection.connection_id,
            code = codes::INVALID_CONFIG,
            error = %message,
            "destination config invalid"
        );
        sim_telemetry::record_message_failed(connection.protocol);
        self.append_log(make_log(
            device,
            connection,
            batch_id,
            0,
            "failed",
            Some(format!("{}: {message}", codes::INVALID_CONFIG)),
            0,
        ))
        .await;
        self.apply_update(
            &device.device_id,
            DeviceStateUpdate {
                status: Some(DeviceStatus::Error),
                ..Default::default()
            },
        )
        .await;
        let mut active = self.active.write().await;
        active.remove(&device.device_id);
        sim_telemetry::set_active_devices(active.len() as u64);
    }

    /// 游标被外部置到数据集末尾之后且不回绕时的兜底：记一条失败日志并转入终态。
    /// 自然走到末尾的设备在成功路径上直接完成，不经过这里。
    async fn complete_device(
        &self,
        device: &DeviceRecord,
        connection: &ConnectionRecord,
        batch_id: &str,
    ) {
        self.append_log(make_log(
            device,
            connection,
            batch_id,
            0,
            "failed",
            Some(format!(
                "{DATASET_EXHAUSTED}: dataset exhausted and auto reset disabled"
            )),
            0,
        ))
        .await;
        self.apply_update(
            &device.device_id,
            DeviceStateUpdate {
                status: Some(DeviceStatus::Completed),
                ..Default::default()
            },
        )
        .await;
        info!(
            target: "sim.engine",
            device_id = %device.device_id,
            "device completed dataset"
        );
    }

    /// 失败收尾：熔断计数、指标、日志与设备状态。
    ///
    /// 不更新最近发送时间，设备下一 tick 仍到期，形成自然重试。
    async fn on_failure(
        &self,
        device: &DeviceRecord,
        connection: &ConnectionRecord,
        batch_id: &str,
        payload_size: u64,
        code: &str,
        message: String,
        latency_ms: u64,
    ) {
        let error = format!("{code}: {message}");
        if self.breaker.record_failure(&connection.connection_id, &error) {
            sim_telemetry::record_circuit_opened();
            warn!(
                target: "sim.engine",
                connection_id = %connection.connection_id,
                "circuit opened"
            );
        }
        sim_telemetry::record_message_failed(connection.protocol);
        self.append_log(make_log(
            device,
            connection,
            batch_id,
            payload_size,
            "failed",
            Some(error),
            latency_ms,
        ))
        .await;
        self.apply_update(
            &device.device_id,
            DeviceStateUpdate {
                status: Some(DeviceStatus::Error),
                ..Default::default()
            },
        )
        .await;
        warn!(
            target: "sim.engine",
            device_id = %device.device_id,
            connection_id = %connection.connection_id,
            code = %code,
            "transmission failed"
        );
    }

    /// 写回设备可变状态，并同步活跃集合中的副本。
    async fn apply_update(&self, device_id: &str, update: DeviceStateUpdate) {
        if let Err(err) = self
            .stores
            .devices
            .update_device_state(device_id, update.clone())
            .await
        {
            warn!(
                target: "sim.engine",
                device_id = %device_id,
                error = %err,
                "device state write failed"
            );
        }
        let mut active = self.active.write().await;
        if let Some(device) = active.get_mut(device_id) {
            if let Some(index) = update.current_row_index {
                device.current_row_index = index;
            }
            if let Some(ts) = update.last_transmission_at_ms {
                device.last_transmission_at_ms = Some(ts);
            }
            if let Some(status) = update.status {
                device.status = status;
            }
        }
    }

    /// 追加发送日志。慢日志端不能卡死 tick，超时放弃并告警。
    async fn append_log(&self, record: TransmissionLogRecord) {
        let deadline = Duration::from_millis(self.config.log_write_timeout_ms);
        match tokio::time::timeout(deadline, self.stores.logs.append(record)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(target: "sim.engine", error = %err, "transmission log write failed");
            }
            Err(_) => warn!(target: "sim.engine", "transmission log write timed out"),
        }
    }
}

/// 设备是否到期：Completed 终态永不到期；从未发送过立即到期。
fn device_due(device: &DeviceRecord, now_ms: i64) -> bool {
    if device.status == DeviceStatus::Completed {
        return false;
    }
    match device.last_transmission_at_ms {
        None => true,
        Some(last) => {
            now_ms - last >= i64::from(device.transmission_frequency_seconds) * 1000
        }
    }
}

fn make_log(
    device: &DeviceRecord,
    connection: &ConnectionRecord,
    batch_id: &str,
    payload_size: u64,
    status: &str,
    error_message: Option<String>,
    latency_ms: u64,
) -> TransmissionLogRecord {
    TransmissionLogRecord {
        log_id: Uuid::new_v4().to_string(),
        connection_id: connection.connection_id.clone(),
        device_id: device.device_id.clone(),
        direction: "sent".to_string(),
        payload_size,
        protocol: connection.protocol,
        status: status.to_string(),
        error_message,
        retry_count: 0,
        latency_ms,
        batch_id: batch_id.to_string(),
        created_at_ms: now_epoch_ms(),
    }
}
