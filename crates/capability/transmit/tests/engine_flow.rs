//! 发送引擎端到端流程测试：内存存储 + 脚本化协议处理器。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use domain::{DeviceKind, DeviceStatus, Protocol, TransmissionConfig};
use sim_protocol::{
    HandlerSet, ProtocolClient, ProtocolError, ProtocolHandler, PublishResult, codes,
};
use sim_storage::{
    ConnectionRecord, DeviceRecord, DeviceStore, InMemoryConnectionStore, InMemoryDatasetStore,
    InMemoryDeviceStore, InMemoryTransmissionLog, TransmissionLogStore,
};
use sim_transmit::{BreakerConfig, EngineConfig, EngineStores, TransmissionManager};

/// 脚本化处理器：连接配置里 `"fail": true` 的目标端发送失败，
/// `"invalid": true` 的目标端配置校验不通过。
struct ScriptedHandler {
    connects: AtomicU64,
    publishes: AtomicU64,
}

impl ScriptedHandler {
    fn new() -> Self {
        Self {
            connects: AtomicU64::new(0),
            publishes: AtomicU64::new(0),
        }
    }

    fn scripted_result(&self, config: &serde_json::Value) -> PublishResult {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        if config["fail"].as_bool().unwrap_or(false) {
            PublishResult::fail(codes::PUBLISH_ERROR, "scripted failure", 1)
        } else {
            PublishResult::ok("scripted success", 1)
        }
    }
}

#[async_trait]
impl ProtocolHandler for ScriptedHandler {
    fn protocol(&self) -> Protocol {
        Protocol::Mqtt
    }

    fn validate_config(&self, config: &serde_json::Value) -> bool {
        !config["invalid"].as_bool().unwrap_or(false)
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
        config: &serde_json::Value,
        _target: Option<&str>,
        _payload: &[u8],
    ) -> PublishResult {
        self.scripted_result(config)
    }

    async fn publish_pooled(
        &self,
        _client: &ProtocolClient,
        config: &serde_json::Value,
        _target: Option<&str>,
        _payload: &[u8],
    ) -> PublishResult {
        self.scripted_result(config)
    }
}

struct ScriptedSet(ScriptedHandler);

impl HandlerSet for ScriptedSet {
    fn handler(&self, _protocol: Protocol) -> &dyn ProtocolHandler {
        &self.0
    }
}

struct Harness {
    manager: TransmissionManager,
    devices: Arc<InMemoryDeviceStore>,
    logs: Arc<InMemoryTransmissionLog>,
}

fn row(value: i64) -> domain::DatasetRow {
    let mut map = domain::DatasetRow::new();
    map.insert("value".to_string(), serde_json::json!(value));
    map
}

fn connection(id: &str, fail: bool) -> ConnectionRecord {
    ConnectionRecord {
        connection_id: id.to_string(),
        name: id.to_string(),
        protocol: Protocol::Mqtt,
        config: serde_json::json!({ "fail": fail }),
    }
}

fn device(id: &str, connection_id: &str, config: TransmissionConfig) -> DeviceRecord {
    DeviceRecord {
        device_id: id.to_string(),
        name: id.to_string(),
        kind: DeviceKind::Datalogger,
        connection_id: connection_id.to_string(),
        dataset_id: "ds-1".to_string(),
        transmission_enabled: true,
        is_active: true,
        transmission_frequency_seconds: 1,
        transmission_config: config,
        current_row_index: 0,
        last_transmission_at_ms: None,
        status: DeviceStatus::Idle,
    }
}

fn harness(breaker: BreakerConfig) -> Harness {
    let devices = Arc::new(InMemoryDeviceStore::new());
    let connections = Arc::new(InMemoryConnectionStore::new());
    let datasets = Arc::new(InMemoryDatasetStore::new());
    let logs = Arc::new(InMemoryTransmissionLog::new());

    datasets.insert_dataset("ds-1", (0..10).map(row).collect());
    connections.upsert_connection(connection("conn-ok", false));
    connections.upsert_connection(connection("conn-bad", true));
    connections.upsert_connection(ConnectionRecord {
        connection_id: "conn-invalid".to_string(),
        name: "conn-invalid".to_string(),
        protocol: Protocol::Mqtt,
        config: serde_json::json!({ "invalid": true }),
    });

    let stores = EngineStores {
        devices: devices.clone(),
        connections,
        datasets,
        logs: logs.clone(),
    };
    let config = EngineConfig {
        breaker,
        ..EngineConfig::default()
    };
    let manager = TransmissionManager::new(config, stores, Arc::new(ScriptedSet(ScriptedHandler::new())));

    Harness {
        manager,
        devices,
        logs,
    }
}

#[tokio::test]
async fn successful_tick_advances_cursor_and_logs() {
    let h = harness(BreakerConfig::default());
    h.devices
        .upsert_device(device("dev-1", "conn-ok", TransmissionConfig::default()));
    h.manager.refresh_active_devices().await.expect("refresh");

    h.manager.run_tick().await;

    let device = h
        .devices
        .find_device("dev-1")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(device.current_row_index, 1);
    assert_eq!(device.status, DeviceStatus::Transmitting);
    assert!(device.last_transmission_at_ms.is_some());

    let logs = h.logs.recent(10).await.expect("logs");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "success");
    assert_eq!(logs[0].device_id, "dev-1");
    assert!(logs[0].payload_size > 0);
}

#[tokio::test]
async fn failure_retries_next_tick_without_advancing_cursor() {
    let h = harness(BreakerConfig::default());
    h.devices
        .upsert_device(device("dev-1", "conn-bad", TransmissionConfig::default()));
    h.manager.refresh_active_devices().await.expect("refresh");

    h.manager.run_tick().await;
    h.manager.run_tick().await;

    // 失败不更新最近发送时间，两个 tick 都到期并尝试
    let logs = h.logs.recent(10).await.expect("logs");
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|log| log.status == "failed"));
    assert!(
        logs[0]
            .error_message
            .as_deref()
            .is_some_and(|message| message.starts_with(codes::PUBLISH_ERROR))
    );

    let device = h
        .devices
        .find_device("dev-1")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(device.current_row_index, 0);
    assert_eq!(device.status, DeviceStatus::Error);
    assert!(device.last_transmission_at_ms.is_none());
}

#[tokio::test]
async fn open_circuit_denies_silently() {
    let h = harness(BreakerConfig {
        failure_threshold: 2,
        base_recovery_ms: 60_000,
        max_recovery_ms: 300_000,
    });
    h.devices
        .upsert_device(device("dev-1", "conn-bad", TransmissionConfig::default()));
    h.manager.refresh_active_devices().await.expect("refresh");

    // 两次失败后熔断打开
    h.manager.run_tick().await;
    h.manager.run_tick().await;
    assert_eq!(h.logs.len(), 2);

    // 熔断拒绝：无日志、游标不动
    h.manager.run_tick().await;
    assert_eq!(h.logs.len(), 2);

    let stats = h.manager.circuit_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].open_count, 1);
    assert!(stats[0].remaining_ms > 0);
}

#[tokio::test]
async fn cursor_wraps_at_dataset_end_with_auto_reset() {
    let h = harness(BreakerConfig::default());
    let mut dev = device(
        "dev-1",
        "conn-ok",
        TransmissionConfig {
            batch_size: 3,
            ..TransmissionConfig::default()
        },
    );
    dev.current_row_index = 9;
    h.devices.upsert_device(dev);
    h.manager.refresh_active_devices().await.expect("refresh");

    h.manager.run_tick().await;

    // 末尾只剩 1 行：发出后回绕到 0，不跨末尾拼接
    let device = h
        .devices
        .find_device("dev-1")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(device.current_row_index, 0);
    assert_eq!(h.logs.len(), 1);
}

#[tokio::test]
async fn exhausted_dataset_without_auto_reset_completes() {
    let h = harness(BreakerConfig::default());
    let mut dev = device(
        "dev-1",
        "conn-ok",
        TransmissionConfig {
            auto_reset: false,
            ..TransmissionConfig::default()
        },
    );
    dev.current_row_index = 10;
    h.devices.upsert_device(dev);
    h.manager.refresh_active_devices().await.expect("refresh");

    h.manager.run_tick().await;

    let device = h
        .devices
        .find_device("dev-1")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(device.status, DeviceStatus::Completed);
    let logs = h.logs.recent(10).await.expect("logs");
    assert_eq!(logs.len(), 1);
    assert!(
        logs[0]
            .error_message
            .as_deref()
            .is_some_and(|message| message.starts_with(sim_transmit::DATASET_EXHAUSTED))
    );

    // 终态设备不再到期：后续 tick 无新日志
    h.manager.run_tick().await;
    assert_eq!(h.logs.len(), 1);
}

#[tokio::test]
async fn final_row_success_completes_without_failure_log() {
    let h = harness(BreakerConfig::default());
    let mut dev = device(
        "dev-1",
        "conn-ok",
        TransmissionConfig {
            auto_reset: false,
            ..TransmissionConfig::default()
        },
    );
    dev.current_row_index = 9;
    h.devices.upsert_device(dev);
    h.manager.refresh_active_devices().await.expect("refresh");

    h.manager.run_tick().await;

    // 最后一行发出即完成：状态直接转终态，游标停在末尾
    let device = h
        .devices
        .find_device("dev-1")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(device.status, DeviceStatus::Completed);
    assert_eq!(device.current_row_index, 10);
    assert!(device.last_transmission_at_ms.is_some());

    // 只有成功日志，没有 DATASET_EXHAUSTED 失败条目
    let logs = h.logs.recent(10).await.expect("logs");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "success");

    // 终态设备后续 tick 不再尝试
    h.manager.run_tick().await;
    assert_eq!(h.logs.len(), 1);
}

#[tokio::test]
async fn invalid_config_fails_fast_without_circuit_impact() {
    let h = harness(BreakerConfig::default());
    h.devices.upsert_device(device(
        "dev-1",
        "conn-invalid",
        TransmissionConfig::default(),
    ));
    h.manager.refresh_active_devices().await.expect("refresh");

    h.manager.run_tick().await;

    // 配置错误按失败记一条日志，但不计入熔断
    let logs = h.logs.recent(10).await.expect("logs");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "failed");
    assert!(
        logs[0]
            .error_message
            .as_deref()
            .is_some_and(|message| message.starts_with(codes::INVALID_CONFIG))
    );
    assert!(h.manager.circuit_stats().is_empty());

    let device = h
        .devices
        .find_device("dev-1")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(device.status, DeviceStatus::Error);

    // 设备移出活跃集合，后续 tick 不再盲目重试
    assert_eq!(h.manager.status().await.active_devices, 0);
    h.manager.run_tick().await;
    assert_eq!(h.logs.len(), 1);

    // 刷新后重新评估（配置修复的路径）
    h.manager.refresh_device("dev-1").await.expect("refresh");
    h.manager.run_tick().await;
    assert_eq!(h.logs.len(), 2);
}

#[tokio::test]
async fn destinations_fail_independently() {
    let h = harness(BreakerConfig {
        failure_threshold: 1,
        base_recovery_ms: 60_000,
        max_recovery_ms: 300_000,
    });
    h.devices
        .upsert_device(device("dev-ok", "conn-ok", TransmissionConfig::default()));
    h.devices
        .upsert_device(device("dev-bad", "conn-bad", TransmissionConfig::default()));
    h.manager.refresh_active_devices().await.expect("refresh");

    // tick1：坏目标端失败并熔断；tick2：坏目标端被拒，好目标端照常发送
    h.manager.run_tick().await;
    h.manager.run_tick().await;

    let good = h
        .devices
        .find_device("dev-ok")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(good.status, DeviceStatus::Transmitting);
    assert!(good.current_row_index >= 1);

    let bad = h
        .devices
        .find_device("dev-bad")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(bad.status, DeviceStatus::Error);
    assert_eq!(bad.current_row_index, 0);
}

#[tokio::test]
async fn stop_device_pauses_and_resets_cursor() {
    let h = harness(BreakerConfig::default());
    h.devices
        .upsert_device(device("dev-1", "conn-ok", TransmissionConfig::default()));
    h.manager.refresh_active_devices().await.expect("refresh");
    h.manager.run_tick().await;

    h.manager
        .stop_device("dev-1", true)
        .await
        .expect("stop device");

    let device = h
        .devices
        .find_device("dev-1")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(device.status, DeviceStatus::Paused);
    assert_eq!(device.current_row_index, 0);
    assert_eq!(h.manager.status().await.active_devices, 0);

    // 暂停后不再发送
    h.manager.run_tick().await;
    assert_eq!(h.logs.len(), 1);
}

#[tokio::test]
async fn start_device_requeues_for_transmission() {
    let h = harness(BreakerConfig::default());
    h.devices
        .upsert_device(device("dev-1", "conn-ok", TransmissionConfig::default()));
    h.manager.refresh_active_devices().await.expect("refresh");
    h.manager.stop_device("dev-1", false).await.expect("stop");
    assert_eq!(h.manager.status().await.active_devices, 0);

    h.manager.start_device("dev-1").await.expect("start");
    assert_eq!(h.manager.status().await.active_devices, 1);

    h.manager.run_tick().await;
    assert_eq!(h.logs.len(), 1);
}

#[tokio::test]
async fn refresh_device_tracks_store_eligibility() {
    let h = harness(BreakerConfig::default());
    let mut dev = device("dev-1", "conn-ok", TransmissionConfig::default());
    h.devices.upsert_device(dev.clone());
    h.manager.refresh_active_devices().await.expect("refresh");
    assert_eq!(h.manager.status().await.active_devices, 1);

    // 外部关闭发送开关后，单设备刷新立即移出活跃集合
    dev.transmission_enabled = false;
    h.devices.upsert_device(dev.clone());
    let eligible = h.manager.refresh_device("dev-1").await.expect("refresh");
    assert!(!eligible);
    assert_eq!(h.manager.status().await.active_devices, 0);

    // 重新打开后无需等 monitor 周期即可恢复
    dev.transmission_enabled = true;
    h.devices.upsert_device(dev);
    let eligible = h.manager.refresh_device("dev-1").await.expect("refresh");
    assert!(eligible);
    assert_eq!(h.manager.status().await.active_devices, 1);

    assert!(h.manager.refresh_device("dev-missing").await.is_err());
}

#[tokio::test]
async fn circuit_stats_expose_lifetime_counters() {
    let h = harness(BreakerConfig {
        failure_threshold: 2,
        base_recovery_ms: 60_000,
        max_recovery_ms: 300_000,
    });
    h.devices
        .upsert_device(device("dev-1", "conn-bad", TransmissionConfig::default()));
    h.manager.refresh_active_devices().await.expect("refresh");

    h.manager.run_tick().await;
    h.manager.run_tick().await;

    let stats = h.manager.circuit_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].total_failures, 2);
    assert_eq!(stats[0].total_successes, 0);
    assert!(
        stats[0]
            .last_error
            .as_deref()
            .is_some_and(|error| error.starts_with(codes::PUBLISH_ERROR))
    );
    assert!(stats[0].last_failure_at_ms.is_some());

    // 手动复位后放行，退避历史清零、终身计数保留
    h.manager.reset_circuit("conn-bad");
    let stats = h.manager.circuit_stats();
    assert_eq!(stats[0].open_count, 0);
    assert_eq!(stats[0].total_failures, 2);
}

#[tokio::test]
async fn test_connection_reports_scripted_outcome() {
    let h = harness(BreakerConfig::default());

    let ok = h.manager.test_connection("conn-ok").await.expect("test");
    assert!(ok.success);

    let bad = h.manager.test_connection("conn-bad").await.expect("test");
    assert!(!bad.success);
    assert_eq!(bad.error_code.as_deref(), Some(codes::PUBLISH_ERROR));

    assert!(h.manager.test_connection("conn-missing").await.is_err());
}
