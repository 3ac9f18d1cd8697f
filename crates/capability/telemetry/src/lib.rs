//! 追踪初始化、请求 ID 生成与引擎指标计数。

use domain::Protocol;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 引擎指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub mqtt_sent: u64,
    pub mqtt_failed: u64,
    pub http_sent: u64,
    pub http_failed: u64,
    pub kafka_sent: u64,
    pub kafka_failed: u64,
    pub bytes_sent: u64,
    pub publish_latency_ms_total: u64,
    pub publish_latency_ms_count: u64,
    pub ticks: u64,
    pub tick_duration_ms_total: u64,
    pub tick_duration_ms_count: u64,
    pub circuit_opened: u64,
    pub circuit_denied: u64,
    pub pool_created: u64,
    pub pool_reused: u64,
    pub pool_evicted: u64,
    pub active_devices: u64,
}

impl MetricsSnapshot {
    /// 所有协议发送成功总数。
    pub fn total_sent(&self) -> u64 {
        self.mqtt_sent + self.http_sent + self.kafka_sent
    }

    /// 所有协议发送失败总数。
    pub fn total_failed(&self) -> u64 {
        self.mqtt_failed + self.http_failed + self.kafka_failed
    }
}

/// 引擎指标。
pub struct TelemetryMetrics {
    mqtt_sent: AtomicU64,
    mqtt_failed: AtomicU64,
    http_sent: AtomicU64,
    http_failed: AtomicU64,
    kafka_sent: AtomicU64,
    kafka_failed: AtomicU64,
    bytes_sent: AtomicU64,
    publish_latency_ms_total: AtomicU64,
    publish_latency_ms_count: AtomicU64,
    ticks: AtomicU64,
    tick_duration_ms_total: AtomicU64,
    tick_duration_ms_count: AtomicU64,
    circuit_opened: AtomicU64,
    circuit_denied: AtomicU64,
    pool_created: AtomicU64,
    pool_reused: AtomicU64,
    pool_evicted: AtomicU64,
    active_devices: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            mqtt_sent: AtomicU64::new(0),
            mqtt_failed: AtomicU64::new(0),
            http_sent: AtomicU64::new(0),
            http_failed: AtomicU64::new(0),
            kafka_sent: AtomicU64::new(0),
            kafka_failed: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            publish_latency_ms_total: AtomicU64::new(0),
            publish_latency_ms_count: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            tick_duration_ms_total: AtomicU64::new(0),
            tick_duration_ms_count: AtomicU64::new(0),
            circuit_opened: AtomicU64::new(0),
            circuit_denied: AtomicU64::new(0),
            pool_created: AtomicU64::new(0),
            pool_reused: AtomicU64::new(0),
            pool_evicted: AtomicU64::new(0),
            active_devices: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            mqtt_sent: self.mqtt_sent.load(Ordering::Relaxed),
            mqtt_failed: self.mqtt_failed.load(Ordering::Relaxed),
            http_sent: self.http_sent.load(Ordering::Relaxed),
            http_failed: self.http_failed.load(Ordering::Relaxed),
            kafka_sent: self.kafka_sent.load(Ordering::Relaxed),
            kafka_failed: self.kafka_failed.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            publish_latency_ms_total: self.publish_latency_ms_total.load(Ordering::Relaxed),
            publish_latency_ms_count: self.publish_latency_ms_count.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            tick_duration_ms_total: self.tick_duration_ms_total.load(Ordering::Relaxed),
            tick_duration_ms_count: self.tick_duration_ms_count.load(Ordering::Relaxed),
            circuit_opened: self.circuit_opened.load(Ordering::Relaxed),
            circuit_denied: self.circuit_denied.load(Ordering::Relaxed),
            pool_created: self.pool_created.load(Ordering::Relaxed),
            pool_reused: self.pool_reused.load(Ordering::Relaxed),
            pool_evicted: self.pool_evicted.load(Ordering::Relaxed),
            active_devices: self.active_devices.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录一次发送成功（按协议计数）。
pub fn record_message_sent(protocol: Protocol) {
    let metrics = metrics();
    let counter = match protocol {
        Protocol::Mqtt => &metrics.mqtt_sent,
        Protocol::Http | Protocol::Https => &metrics.http_sent,
        Protocol::Kafka => &metrics.kafka_sent,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次发送失败（按协议计数）。
pub fn record_message_failed(protocol: Protocol) {
    let metrics = metrics();
    let counter = match protocol {
        Protocol::Mqtt => &metrics.mqtt_failed,
        Protocol::Http | Protocol::Https => &metrics.http_failed,
        Protocol::Kafka => &metrics.kafka_failed,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

/// 记录发送字节数。
pub fn record_bytes_sent(bytes: u64) {
    metrics().bytes_sent.fetch_add(bytes, Ordering::Relaxed);
}

/// 记录发布延迟（毫秒）。
pub fn record_publish_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .publish_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .publish_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录一次调度 tick 及其耗时（毫秒）。
pub fn record_tick(duration_ms: u64) {
    let metrics = metrics();
    metrics.ticks.fetch_add(1, Ordering::Relaxed);
    metrics
        .tick_duration_ms_total
        .fetch_add(duration_ms, Ordering::Relaxed);
    metrics
        .tick_duration_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录熔断器打开次数。
pub fn record_circuit_opened() {
    metrics().circuit_opened.fetch_add(1, Ordering::Relaxed);
}

/// 记录被熔断器拒绝的尝试次数。
pub fn record_circuit_denied() {
    metrics().circuit_denied.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接池新建客户端次数。
pub fn record_pool_created() {
    metrics().pool_created.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接池命中复用次数。
pub fn record_pool_reused() {
    metrics().pool_reused.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接池空闲淘汰次数。
pub fn record_pool_evicted() {
    metrics().pool_evicted.fetch_add(1, Ordering::Relaxed);
}

/// 更新活跃设备数（gauge 语义，直接覆盖）。
pub fn set_active_devices(count: u64) {
    metrics().active_devices.store(count, Ordering::Relaxed);
}
