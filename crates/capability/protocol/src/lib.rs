//! # 协议发布能力模块
//!
//! 提供多协议数据发送能力，支持：
//! - **MQTT**：mqtt/mqtts/ws/wss 四种传输，发布后等待 broker 确认
//! - **HTTP/HTTPS**：可配置方法的 JSON 请求，状态码 ≥400 视为失败
//! - **Kafka**：同步式 produce，返回 topic/partition/offset
//!
//! ## 架构设计
//!
//! ```text
//! Connection 配置 (protocol + config)
//!       │
//!       ▼
//! ProtocolRegistry (HandlerSet)
//!       │
//!       ├── MqttHandler
//!       ├── HttpHandler
//!       └── KafkaHandler
//!       │
//!       ▼
//! PublishResult（成功标志、延迟、错误码、协议细节）
//! ```
//!
//! ## 契约
//!
//! 三个处理器实现同一 [`ProtocolHandler`] 契约：
//! - `validate_config`：结构校验，缺失/畸形字段返回 false，永不报错
//! - `publish`：自包含一次性发送（自建客户端、发完拆除），仅用于联通性测试
//! - `publish_pooled`：使用连接池提供的存活客户端发送（热路径），永不关闭客户端
//!
//! 处理器在热路径上不向外抛错：所有失败都折叠为
//! `PublishResult { success: false, error_code, message }`。

mod error;
mod handler;
mod http;
mod kafka;
mod mqtt;
mod registry;
mod types;

pub use error::ProtocolError;
pub use handler::{HandlerSet, ProtocolClient, ProtocolHandler};
pub use http::{HttpHandler, HttpHandlerConfig};
pub use kafka::{KafkaHandler, KafkaHandlerConfig};
pub use mqtt::{BrokerEndpoint, MqttClientHandle, MqttHandler, MqttHandlerConfig, MqttTransportKind, parse_broker_url};
pub use registry::ProtocolRegistry;
pub use types::*;
