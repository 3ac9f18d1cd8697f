use domain::Protocol;
use sim_telemetry::{
    new_request_ids, record_message_failed, record_message_sent, record_publish_latency_ms,
    set_active_devices,
};

#[test]
fn request_ids_non_empty() {
    let ids = new_request_ids();
    assert!(!ids.request_id.is_empty());
    assert!(!ids.trace_id.is_empty());
}

#[test]
fn counters_accumulate_per_protocol() {
    let before = sim_telemetry::metrics().snapshot();
    record_message_sent(Protocol::Mqtt);
    record_message_sent(Protocol::Https);
    record_message_failed(Protocol::Kafka);
    record_publish_latency_ms(25);
    set_active_devices(3);

    let after = sim_telemetry::metrics().snapshot();
    assert_eq!(after.mqtt_sent, before.mqtt_sent + 1);
    // https 与 http 共享同一计数
    assert_eq!(after.http_sent, before.http_sent + 1);
    assert_eq!(after.kafka_failed, before.kafka_failed + 1);
    assert!(after.publish_latency_ms_total >= before.publish_latency_ms_total + 25);
    assert_eq!(after.active_devices, 3);
}
