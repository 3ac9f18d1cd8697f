//! 发送载荷构造
//!
//! 单行：行对象本身作为载荷根；多行：行数组包在 `readings` 字段下。
//! 按设备发送配置在根级注入 `device_id` 与 `timestamp`（毫秒时间戳），
//! 注入字段覆盖行内同名字段。

use domain::DatasetRow;
use serde_json::Value;
use sim_storage::DeviceRecord;

/// 由数据行与设备配置构造 JSON 载荷字节。
pub fn build_payload(device: &DeviceRecord, rows: &[DatasetRow], now_ms: i64) -> Vec<u8> {
    let mut root = if rows.len() == 1 {
        rows[0].clone()
    } else {
        let mut map = serde_json::Map::new();
        map.insert(
            "readings".to_string(),
            Value::Array(rows.iter().cloned().map(Value::Object).collect()),
        );
        map
    };

    let config = &device.transmission_config;
    if config.include_device_id {
        root.insert(
            "device_id".to_string(),
            Value::String(device.device_id.clone()),
        );
    }
    if config.include_timestamp {
        root.insert("timestamp".to_string(), Value::from(now_ms));
    }

    serde_json::to_vec(&Value::Object(root)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{DeviceKind, DeviceStatus, TransmissionConfig};

    fn device(config: TransmissionConfig) -> DeviceRecord {
        DeviceRecord {
            device_id: "dev-1".to_string(),
            name: "温度传感器".to_string(),
            kind: DeviceKind::Sensor,
            connection_id: "conn-1".to_string(),
            dataset_id: "ds-1".to_string(),
            transmission_enabled: true,
            is_active: true,
            transmission_frequency_seconds: 60,
            transmission_config: config,
            current_row_index: 0,
            last_transmission_at_ms: None,
            status: DeviceStatus::Idle,
        }
    }

    fn row(json: serde_json::Value) -> DatasetRow {
        match json {
            Value::Object(map) => map,
            _ => unreachable!("test rows are objects"),
        }
    }

    #[test]
    fn single_row_injects_identity_and_timestamp() {
        let device = device(TransmissionConfig::default());
        let rows = vec![row(serde_json::json!({ "temp": 21.5, "humidity": 40 }))];

        let payload = build_payload(&device, &rows, 1_700_000_000_000);
        let value: Value = serde_json::from_slice(&payload).expect("json");

        assert_eq!(value["temp"], serde_json::json!(21.5));
        assert_eq!(value["device_id"], serde_json::json!("dev-1"));
        assert_eq!(value["timestamp"], serde_json::json!(1_700_000_000_000_i64));
        assert!(value.get("readings").is_none());
    }

    #[test]
    fn multi_row_wraps_in_readings() {
        let device = device(TransmissionConfig::default());
        let rows = vec![
            row(serde_json::json!({ "temp": 20 })),
            row(serde_json::json!({ "temp": 21 })),
            row(serde_json::json!({ "temp": 22 })),
        ];

        let payload = build_payload(&device, &rows, 1_700_000_000_000);
        let value: Value = serde_json::from_slice(&payload).expect("json");

        assert_eq!(value["readings"].as_array().map(Vec::len), Some(3));
        assert_eq!(value["readings"][1]["temp"], serde_json::json!(21));
        assert_eq!(value["device_id"], serde_json::json!("dev-1"));
    }

    #[test]
    fn injection_can_be_disabled() {
        let config = TransmissionConfig {
            include_device_id: false,
            include_timestamp: false,
            ..TransmissionConfig::default()
        };
        let device = device(config);
        let rows = vec![row(serde_json::json!({ "temp": 20 }))];

        let payload = build_payload(&device, &rows, 1_700_000_000_000);
        let value: Value = serde_json::from_slice(&payload).expect("json");

        assert!(value.get("device_id").is_none());
        assert!(value.get("timestamp").is_none());
    }

    #[test]
    fn injected_fields_override_row_fields() {
        let device = device(TransmissionConfig::default());
        let rows = vec![row(serde_json::json!({ "device_id": "spoofed", "temp": 20 }))];

        let payload = build_payload(&device, &rows, 1_700_000_000_000);
        let value: Value = serde_json::from_slice(&payload).expect("json");

        assert_eq!(value["device_id"], serde_json::json!("dev-1"));
    }
}
