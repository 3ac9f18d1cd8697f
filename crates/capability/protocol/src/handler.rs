//! 协议处理器契约

use async_trait::async_trait;
use domain::Protocol;

use crate::error::ProtocolError;
use crate::types::PublishResult;

/// 可缓存在连接池中的协议客户端。
///
/// 由对应协议的处理器构造与解读，池层只负责存取与生命周期。
pub enum ProtocolClient {
    Mqtt(crate::mqtt::MqttClientHandle),
    Http(reqwest::Client),
    Kafka(rskafka::client::partition::PartitionClient),
    /// 占位客户端（接线与测试用）
    Noop,
}

impl ProtocolClient {
    /// 客户端种类（日志用）。
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolClient::Mqtt(_) => "mqtt",
            ProtocolClient::Http(_) => "http",
            ProtocolClient::Kafka(_) => "kafka",
            ProtocolClient::Noop => "noop",
        }
    }

    /// 主动拆除底层连接。幂等，失败仅记日志。
    pub async fn close(&self) {
        match self {
            ProtocolClient::Mqtt(handle) => handle.close().await,
            // reqwest / rskafka 客户端随 drop 释放底层连接
            ProtocolClient::Http(_) | ProtocolClient::Kafka(_) | ProtocolClient::Noop => {}
        }
    }
}

/// 协议处理器契约。
///
/// 三个协议实现统一接口，发送引擎只依赖该抽象。
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// 处理器对应的协议。
    fn protocol(&self) -> Protocol;

    /// 结构校验连接配置。缺失/畸形字段返回 false，永不报错。
    fn validate_config(&self, config: &serde_json::Value) -> bool;

    /// 构造常驻客户端（供连接池缓存复用）。
    async fn connect(
        &self,
        connection_id: &str,
        config: &serde_json::Value,
    ) -> Result<ProtocolClient, ProtocolError>;

    /// 池化客户端存活探测。
    async fn is_healthy(&self, client: &ProtocolClient) -> bool;

    /// 一次性自包含发送：自建客户端、发完拆除。联通性测试用，非热路径。
    async fn publish(
        &self,
        config: &serde_json::Value,
        target: Option<&str>,
        payload: &[u8],
    ) -> PublishResult;

    /// 热路径发送：使用连接池提供的存活客户端，永不关闭该客户端。
    async fn publish_pooled(
        &self,
        client: &ProtocolClient,
        config: &serde_json::Value,
        target: Option<&str>,
        payload: &[u8],
    ) -> PublishResult;
}

/// 按协议提供处理器的集合。
///
/// 生产实现为 [`crate::ProtocolRegistry`]；测试可注入脚本化实现。
pub trait HandlerSet: Send + Sync {
    fn handler(&self, protocol: Protocol) -> &dyn ProtocolHandler;
}
