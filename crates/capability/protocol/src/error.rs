//! 协议错误类型定义

use crate::types::codes;

/// 协议发布错误
///
/// 仅在构造客户端（连接工厂）路径上向外传播；
/// 热路径发送的失败折叠为 `PublishResult`。
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 对端拒绝连接
    #[error("connection refused: {0}")]
    Refused(String),

    /// 连接错误（非拒绝）
    #[error("connection error: {0}")]
    Connection(String),

    /// 连接超时
    #[error("timeout: {0}")]
    Timeout(String),

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// 发布错误
    #[error("publish error: {0}")]
    Publish(String),
}

impl ProtocolError {
    /// 稳定错误码（写入发送日志与熔断统计）。
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Refused(_) => codes::CONNECTION_REFUSED,
            ProtocolError::Connection(_) => codes::CONNECTION_ERROR,
            ProtocolError::Timeout(_) => codes::CONNECT_TIMEOUT,
            ProtocolError::ConfigParse(_) => codes::INVALID_CONFIG,
            ProtocolError::Publish(_) => codes::PUBLISH_ERROR,
        }
    }
}
