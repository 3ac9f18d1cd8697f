//! 应用运行配置加载。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: String,
    /// 调度 tick 间隔（毫秒）
    pub transmission_interval_ms: u64,
    /// 活跃设备集合刷新周期（秒）
    pub monitor_interval_seconds: u64,
    /// 单 tick 并发发送上限
    pub max_concurrent_transmissions: usize,
    /// 停机时等待在途发送的宽限期（毫秒）
    pub shutdown_grace_ms: u64,
    /// 熔断阈值：连续失败次数
    pub breaker_failure_threshold: u32,
    /// 熔断恢复窗口基准（秒）
    pub breaker_base_recovery_seconds: u64,
    /// 熔断恢复窗口上限（秒）
    pub breaker_max_recovery_seconds: u64,
    /// 连接池空闲淘汰阈值（秒）
    pub pool_max_idle_seconds: u64,
    /// 连接池健康检查周期（秒）
    pub pool_health_check_interval_seconds: u64,
    /// 协议连接超时（毫秒）
    pub connect_timeout_ms: u64,
    /// 单次发布超时（毫秒）
    pub publish_timeout_ms: u64,
    /// 发送日志写入超时（毫秒，慢日志端不能卡死 tick）
    pub log_write_timeout_ms: u64,
    /// 启动时自动拉起引擎
    pub engine_autostart: bool,
    /// 启动时播种演示数据
    pub seed_demo: bool,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_addr = env::var("SIM_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let transmission_interval_ms =
            read_u64_with_default("SIM_TRANSMISSION_INTERVAL_MS", 1000)?;
        let monitor_interval_seconds = read_u64_with_default("SIM_MONITOR_INTERVAL_SECONDS", 30)?;
        let max_concurrent_transmissions =
            read_u64_with_default("SIM_MAX_CONCURRENT_TRANSMISSIONS", 16)? as usize;
        let shutdown_grace_ms = read_u64_with_default("SIM_SHUTDOWN_GRACE_MS", 5000)?;
        let breaker_failure_threshold =
            read_u32_with_default("SIM_BREAKER_FAILURE_THRESHOLD", 5)?;
        let breaker_base_recovery_seconds =
            read_u64_with_default("SIM_BREAKER_BASE_RECOVERY_SECONDS", 30)?;
        let breaker_max_recovery_seconds =
            read_u64_with_default("SIM_BREAKER_MAX_RECOVERY_SECONDS", 300)?;
        let pool_max_idle_seconds = read_u64_with_default("SIM_POOL_MAX_IDLE_SECONDS", 300)?;
        let pool_health_check_interval_seconds =
            read_u64_with_default("SIM_POOL_HEALTH_CHECK_INTERVAL_SECONDS", 60)?;
        let connect_timeout_ms = read_u64_with_default("SIM_CONNECT_TIMEOUT_MS", 5000)?;
        let publish_timeout_ms = read_u64_with_default("SIM_PUBLISH_TIMEOUT_MS", 10_000)?;
        let log_write_timeout_ms = read_u64_with_default("SIM_LOG_WRITE_TIMEOUT_MS", 2000)?;
        let engine_autostart = read_bool_with_default("SIM_ENGINE_AUTOSTART", true);
        let seed_demo = read_bool_with_default("SIM_SEED_DEMO", false);

        Ok(Self {
            http_addr,
            transmission_interval_ms,
            monitor_interval_seconds,
            max_concurrent_transmissions,
            shutdown_grace_ms,
            breaker_failure_threshold,
            breaker_base_recovery_seconds,
            breaker_max_recovery_seconds,
            pool_max_idle_seconds,
            pool_health_check_interval_seconds,
            connect_timeout_ms,
            publish_timeout_ms,
            log_write_timeout_ms,
            engine_autostart,
            seed_demo,
        })
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
