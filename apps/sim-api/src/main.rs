//! 模拟器运行时：发送引擎 + 管理面 HTTP API。

mod routes;
mod seed;

use std::sync::Arc;

use sim_config::AppConfig;
use sim_protocol::{HandlerTimeouts, ProtocolRegistry};
use sim_storage::{
    InMemoryConnectionStore, InMemoryDatasetStore, InMemoryDeviceStore, InMemoryTransmissionLog,
};
use sim_telemetry::init_tracing;
use sim_transmit::{BreakerConfig, EngineConfig, EngineStores, PoolConfig, TransmissionManager};
use tracing::info;

use crate::routes::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    // 内存协作方（演示与单机部署形态）
    let devices = Arc::new(InMemoryDeviceStore::new());
    let connections = Arc::new(InMemoryConnectionStore::new());
    let datasets = Arc::new(InMemoryDatasetStore::new());
    let logs = Arc::new(InMemoryTransmissionLog::new());
    if config.seed_demo {
        let seeded = seed::seed_demo_fleet(&devices, &connections, &datasets);
        info!(devices = seeded, "demo fleet seeded");
    }
    let stores = EngineStores {
        devices,
        connections,
        datasets,
        logs,
    };

    // 协议处理器与发送引擎
    let handlers = Arc::new(ProtocolRegistry::new(HandlerTimeouts {
        connect_timeout_ms: config.connect_timeout_ms,
        publish_timeout_ms: config.publish_timeout_ms,
    }));
    let engine_config = EngineConfig {
        tick_interval_ms: config.transmission_interval_ms,
        monitor_interval_seconds: config.monitor_interval_seconds,
        max_concurrent: config.max_concurrent_transmissions,
        shutdown_grace_ms: config.shutdown_grace_ms,
        log_write_timeout_ms: config.log_write_timeout_ms,
        breaker: BreakerConfig {
            failure_threshold: config.breaker_failure_threshold,
            base_recovery_ms: config.breaker_base_recovery_seconds.saturating_mul(1000),
            max_recovery_ms: config.breaker_max_recovery_seconds.saturating_mul(1000),
        },
        pool: PoolConfig {
            max_idle_ms: config.pool_max_idle_seconds.saturating_mul(1000),
            health_check_interval_ms: config
                .pool_health_check_interval_seconds
                .saturating_mul(1000),
        },
    };
    let manager = TransmissionManager::new(engine_config, stores.clone(), handlers);
    if config.engine_autostart {
        manager.start().await?;
    }

    // 管理面 API
    let app = routes::router(AppState {
        manager: manager.clone(),
        stores,
    });
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!(addr = %config.http_addr, "admin api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // HTTP 退出后停引擎：等在途发送结束并清池
    manager.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        info!("shutdown signal listener failed, exiting immediately");
    }
}
