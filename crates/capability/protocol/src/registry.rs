//! 协议处理器注册表

use domain::Protocol;

use crate::handler::{HandlerSet, ProtocolHandler};
use crate::http::HttpHandler;
use crate::kafka::KafkaHandler;
use crate::mqtt::MqttHandler;
use crate::types::HandlerTimeouts;

/// 生产用处理器集合：每种协议一个常驻处理器实例。
pub struct ProtocolRegistry {
    mqtt: MqttHandler,
    http: HttpHandler,
    kafka: KafkaHandler,
}

impl ProtocolRegistry {
    pub fn new(timeouts: HandlerTimeouts) -> Self {
        Self {
            mqtt: MqttHandler::new(timeouts),
            http: HttpHandler::new(timeouts),
            kafka: KafkaHandler::new(timeouts),
        }
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new(HandlerTimeouts::default())
    }
}

impl HandlerSet for ProtocolRegistry {
    fn handler(&self, protocol: Protocol) -> &dyn ProtocolHandler {
        match protocol {
            Protocol::Mqtt => &self.mqtt,
            // https 与 http 共用同一处理器，仅 URL scheme 不同
            Protocol::Http | Protocol::Https => &self.http,
            Protocol::Kafka => &self.kafka,
        }
    }
}
