//! 演示数据播种：三种协议目标端 + 小型设备编队。

use domain::{DatasetRow, DeviceKind, DeviceStatus, Protocol, TransmissionConfig};
use sim_storage::{
    ConnectionRecord, DeviceRecord, InMemoryConnectionStore, InMemoryDatasetStore,
    InMemoryDeviceStore,
};

/// 播种演示编队，返回设备数。
pub fn seed_demo_fleet(
    devices: &InMemoryDeviceStore,
    connections: &InMemoryConnectionStore,
    datasets: &InMemoryDatasetStore,
) -> usize {
    datasets.insert_dataset("ds-weather", weather_rows(60));

    connections.upsert_connection(ConnectionRecord {
        connection_id: "conn-mqtt-local".to_string(),
        name: "本地 MQTT broker".to_string(),
        protocol: Protocol::Mqtt,
        config: serde_json::json!({
            "broker_url": "mqtt://127.0.0.1:1883",
            "topic": "sim/telemetry",
            "qos": 1,
        }),
    });
    connections.upsert_connection(ConnectionRecord {
        connection_id: "conn-http-local".to_string(),
        name: "本地 HTTP 接收端".to_string(),
        protocol: Protocol::Http,
        config: serde_json::json!({
            "url": "http://127.0.0.1:9000/ingest",
            "method": "POST",
        }),
    });
    connections.upsert_connection(ConnectionRecord {
        connection_id: "conn-kafka-local".to_string(),
        name: "本地 Kafka".to_string(),
        protocol: Protocol::Kafka,
        config: serde_json::json!({
            "bootstrap_servers": ["127.0.0.1:9092"],
            "topic": "sim-telemetry",
            "partition": 0,
        }),
    });

    let fleet = [
        demo_device(
            "dev-temp-01",
            "温度传感器 01",
            DeviceKind::Sensor,
            "conn-mqtt-local",
            5,
            TransmissionConfig::default(),
        ),
        demo_device(
            "dev-logger-01",
            "数采仪 01",
            DeviceKind::Datalogger,
            "conn-http-local",
            10,
            TransmissionConfig {
                batch_size: 5,
                ..TransmissionConfig::default()
            },
        ),
        demo_device(
            "dev-temp-02",
            "温度传感器 02",
            DeviceKind::Sensor,
            "conn-kafka-local",
            15,
            TransmissionConfig::default(),
        ),
    ];
    let count = fleet.len();
    for device in fleet {
        devices.upsert_device(device);
    }
    count
}

/// 简单的日循环温湿度曲线。
fn weather_rows(count: usize) -> Vec<DatasetRow> {
    (0..count)
        .map(|i| {
            let mut row = DatasetRow::new();
            let phase = (i % 24) as f64;
            row.insert(
                "temperature".to_string(),
                serde_json::json!(18.0 + phase * 0.5),
            );
            row.insert(
                "humidity".to_string(),
                serde_json::json!(40 + (i % 20) as i64),
            );
            row
        })
        .collect()
}

fn demo_device(
    device_id: &str,
    name: &str,
    kind: DeviceKind,
    connection_id: &str,
    frequency_seconds: u32,
    config: TransmissionConfig,
) -> DeviceRecord {
    DeviceRecord {
        device_id: device_id.to_string(),
        name: name.to_string(),
        kind,
        connection_id: connection_id.to_string(),
        dataset_id: "ds-weather".to_string(),
        transmission_enabled: true,
        is_active: true,
        transmission_frequency_seconds: frequency_seconds,
        transmission_config: config,
        current_row_index: 0,
        last_transmission_at_ms: None,
        status: DeviceStatus::Idle,
    }
}
