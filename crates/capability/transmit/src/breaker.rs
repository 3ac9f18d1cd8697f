//! 目标端熔断器
//!
//! 每个目标端连接一个独立熔断域。连续失败达到阈值后打开，
//! 恢复窗口按打开次数指数退避（base × 2^(open_count-1)，封顶 max）。
//! OPEN 到期后的第一次探测在 HALF_OPEN 下放行：成功即回到 CLOSED
//! 并清零连续失败与退避历史，失败立刻回到 OPEN 并加倍窗口。
//! 条目按目标端惰性创建，之后只复位不销毁（终身计数保留）。

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use sim_protocol::now_epoch_ms;

/// 熔断参数。
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// 连续失败阈值
    pub failure_threshold: u32,
    /// 恢复窗口基准（毫秒）
    pub base_recovery_ms: u64,
    /// 恢复窗口上限（毫秒）
    pub max_recovery_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_recovery_ms: 30_000,
            max_recovery_ms: 300_000,
        }
    }
}

/// 熔断状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// 单个目标端的熔断视图。
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub connection_id: String,
    pub state: CircuitState,
    /// 连续失败计数（成功清零）
    pub failure_count: u32,
    pub open_count: u32,
    /// 终身成功/失败计数
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_success_at_ms: Option<i64>,
    pub last_failure_at_ms: Option<i64>,
    pub last_transition_at_ms: Option<i64>,
    /// OPEN 状态下距可重试的剩余毫秒
    pub remaining_ms: u64,
}

#[derive(Debug)]
struct CircuitEntry {
    state: CircuitState,
    failure_count: u32,
    open_count: u32,
    total_successes: u64,
    total_failures: u64,
    last_error: Option<String>,
    last_success_at_ms: Option<i64>,
    last_failure_at_ms: Option<i64>,
    last_transition_at_ms: Option<i64>,
    opened_at_ms: i64,
    recovery_ms: u64,
}

impl Default for CircuitEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            open_count: 0,
            total_successes: 0,
            total_failures: 0,
            last_error: None,
            last_success_at_ms: None,
            last_failure_at_ms: None,
            last_transition_at_ms: None,
            opened_at_ms: 0,
            recovery_ms: 0,
        }
    }
}

/// 目标端熔断器集合。
///
/// 状态检查与迁移在同一临界区内完成，OPEN→HALF_OPEN 的转换
/// 不会被并发尝试重复触发。
pub struct CircuitBreaker {
    config: BreakerConfig,
    entries: Mutex<HashMap<String, CircuitEntry>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 是否允许向该目标端发起尝试。
    ///
    /// OPEN 且恢复窗口已过时原地转入 HALF_OPEN 并放行。
    pub fn can_execute(&self, connection_id: &str) -> bool {
        self.can_execute_at(connection_id, now_epoch_ms())
    }

    fn can_execute_at(&self, connection_id: &str, now_ms: i64) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = entries.get_mut(connection_id) else {
            return true;
        };
        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if now_ms >= entry.opened_at_ms + entry.recovery_ms as i64 {
                    entry.state = CircuitState::HalfOpen;
                    entry.last_transition_at_ms = Some(now_ms);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// 记录一次成功：连续失败与退避历史清零，回到 CLOSED。
    pub fn record_success(&self, connection_id: &str) {
        self.record_success_at(connection_id, now_epoch_ms());
    }

    fn record_success_at(&self, connection_id: &str, now_ms: i64) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(connection_id.to_string()).or_default();
        entry.total_successes += 1;
        entry.last_success_at_ms = Some(now_ms);
        entry.failure_count = 0;
        entry.open_count = 0;
        if entry.state != CircuitState::Closed {
            entry.state = CircuitState::Closed;
            entry.last_transition_at_ms = Some(now_ms);
        }
    }

    /// 记录一次失败。返回本次失败是否触发了熔断打开。
    pub fn record_failure(&self, connection_id: &str, error: &str) -> bool {
        self.record_failure_at(connection_id, error, now_epoch_ms())
    }

    fn record_failure_at(&self, connection_id: &str, error: &str, now_ms: i64) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(connection_id.to_string()).or_default();
        entry.failure_count += 1;
        entry.total_failures += 1;
        entry.last_failure_at_ms = Some(now_ms);
        entry.last_error = Some(error.to_string());
        let should_open = match entry.state {
            // 探测失败立刻回到 OPEN，窗口加倍
            CircuitState::HalfOpen => true,
            CircuitState::Closed => entry.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if should_open {
            entry.open_count += 1;
            entry.recovery_ms = recovery_window_ms(&self.config, entry.open_count);
            entry.opened_at_ms = now_ms;
            entry.state = CircuitState::Open;
            entry.last_transition_at_ms = Some(now_ms);
        }
        should_open
    }

    /// 手动复位单个目标端（清零连续失败与退避，终身计数保留）。
    pub fn reset(&self, connection_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(connection_id) {
            entry.state = CircuitState::Closed;
            entry.failure_count = 0;
            entry.open_count = 0;
            entry.last_transition_at_ms = Some(now_epoch_ms());
        }
    }

    /// 手动复位所有目标端。
    pub fn reset_all(&self) {
        let now_ms = now_epoch_ms();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for entry in entries.values_mut() {
            entry.state = CircuitState::Closed;
            entry.failure_count = 0;
            entry.open_count = 0;
            entry.last_transition_at_ms = Some(now_ms);
        }
    }

    /// 所有已知目标端的熔断视图。
    pub fn snapshot(&self) -> Vec<CircuitStats> {
        self.snapshot_at(now_epoch_ms())
    }

    fn snapshot_at(&self, now_ms: i64) -> Vec<CircuitStats> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .map(|(connection_id, entry)| {
                let remaining_ms = if entry.state == CircuitState::Open {
                    (entry.opened_at_ms + entry.recovery_ms as i64 - now_ms).max(0) as u64
                } else {
                    0
                };
                CircuitStats {
                    connection_id: connection_id.clone(),
                    state: entry.state,
                    failure_count: entry.failure_count,
                    open_count: entry.open_count,
                    total_successes: entry.total_successes,
                    total_failures: entry.total_failures,
                    last_error: entry.last_error.clone(),
                    last_success_at_ms: entry.last_success_at_ms,
                    last_failure_at_ms: entry.last_failure_at_ms,
                    last_transition_at_ms: entry.last_transition_at_ms,
                    remaining_ms,
                }
            })
            .collect()
    }
}

/// 第 open_count 次打开的恢复窗口：base × 2^(open_count-1)，封顶 max。
fn recovery_window_ms(config: &BreakerConfig, open_count: u32) -> u64 {
    let exp = open_count.saturating_sub(1).min(20);
    config
        .base_recovery_ms
        .saturating_mul(1u64 << exp)
        .min(config.max_recovery_ms)
}
