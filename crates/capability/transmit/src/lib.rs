//! # 发送引擎能力模块
//!
//! 以固定 tick 驱动设备数据外发的调度引擎：
//!
//! ```text
//! tick (默认 1s)
//!   │
//!   ├─ 活跃集合筛选到期设备（频率 + 状态门控）
//!   │
//!   ├─ 每设备一次尝试（Semaphore 限并发）
//!   │     ├─ 熔断检查 ── OPEN 则静默跳过
//!   │     ├─ 数据集按游标读行、构造载荷
//!   │     ├─ 连接池取/建客户端 → publish_pooled
//!   │     └─ 写回游标/状态 + 追加发送日志
//!   │
//!   └─ monitor (默认 30s)：刷新活跃集合、连接池健康检查
//! ```
//!
//! 失败语义：
//! - 单次失败只改设备状态为 error，不推进游标、不更新最近发送时间，
//!   设备下一 tick 仍到期，形成自然重试
//! - 同一目标端连续失败达到阈值后熔断，恢复窗口按打开次数指数退避
//! - 熔断拒绝的尝试不产生日志、不计入失败
//! - 配置错误与数据集读取错误按失败记日志但不计入熔断；
//!   配置错误的设备停止自动尝试，待刷新后重新评估

mod breaker;
mod manager;
mod payload;
mod pool;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState, CircuitStats};
pub use manager::{
    CONNECTION_NOT_FOUND, DATASET_EMPTY, DATASET_EXHAUSTED, DATASET_READ_ERROR, EngineConfig,
    EngineStatus, EngineStores, TransmissionManager, TransmitError,
};
pub use payload::build_payload;
pub use pool::{ConnectionPool, PoolConfig, PoolEntryStats, PooledConnection};
