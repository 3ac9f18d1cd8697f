use sim_config::AppConfig;

#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("SIM_HTTP_ADDR", "127.0.0.1:8081");
        std::env::set_var("SIM_TRANSMISSION_INTERVAL_MS", "250");
        std::env::set_var("SIM_BREAKER_FAILURE_THRESHOLD", "3");
        std::env::set_var("SIM_SEED_DEMO", "true");
    }

    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.http_addr, "127.0.0.1:8081");
    assert_eq!(config.transmission_interval_ms, 250);
    assert_eq!(config.breaker_failure_threshold, 3);
    assert!(config.seed_demo);
    // 未设置的键取默认值
    assert_eq!(config.breaker_max_recovery_seconds, 300);
    assert_eq!(config.max_concurrent_transmissions, 16);
}
