//! Kafka 协议处理器
//!
//! 基于 rskafka 的分区客户端做同步式 produce：
//! 连接时即解析 topic 元数据，发送成功返回写入的 offset。

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use domain::Protocol;
use rskafka::client::partition::{Compression, UnknownTopicHandling};
use rskafka::client::ClientBuilder;
use rskafka::record::Record;
use serde::Deserialize;

use crate::error::ProtocolError;
use crate::handler::{ProtocolClient, ProtocolHandler};
use crate::types::{codes, HandlerTimeouts, PublishResult};

/// Kafka 连接配置（Connection.config 的 Kafka 形态）。
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaHandlerConfig {
    /// bootstrap 地址列表，形如 `["broker-1:9092"]`
    pub bootstrap_servers: Vec<String>,
    pub topic: String,
    #[serde(default)]
    pub partition: i32,
    /// 消息 key（可选，用于分区亲和）
    #[serde(default)]
    pub key: Option<String>,
}

impl KafkaHandlerConfig {
    pub fn from_json(config: &serde_json::Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(config.clone())
            .map_err(|err| ProtocolError::ConfigParse(format!("kafka config: {err}")))
    }
}

/// Kafka 协议处理器。
pub struct KafkaHandler {
    timeouts: HandlerTimeouts,
}

impl KafkaHandler {
    pub fn new(timeouts: HandlerTimeouts) -> Self {
        Self { timeouts }
    }

    async fn open_partition_client(
        &self,
        config: &KafkaHandlerConfig,
    ) -> Result<rskafka::client::partition::PartitionClient, ProtocolError> {
        let deadline = Duration::from_millis(self.timeouts.connect_timeout_ms);
        let build = async {
            let client = ClientBuilder::new(config.bootstrap_servers.clone())
                .build()
                .await
                .map_err(|err| classify_connect_error(err.to_string()))?;
            client
                .partition_client(
                    config.topic.clone(),
                    config.partition,
                    UnknownTopicHandling::Retry,
                )
                .await
                .map_err(|err| {
                    ProtocolError::Connection(format!(
                        "kafka partition client for {}/{}: {err}",
                        config.topic, config.partition
                    ))
                })
        };
        match tokio::time::timeout(deadline, build).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout(format!(
                "kafka connect timeout after {}ms",
                self.timeouts.connect_timeout_ms
            ))),
        }
    }

    async fn produce(
        &self,
        partition_client: &rskafka::client::partition::PartitionClient,
        config: &KafkaHandlerConfig,
        payload: &[u8],
    ) -> PublishResult {
        let started = Instant::now();
        let record = Record {
            key: config.key.clone().map(String::into_bytes),
            value: Some(payload.to_vec()),
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
        };

        let deadline = Duration::from_millis(self.timeouts.publish_timeout_ms);
        let produce = partition_client.produce(vec![record], Compression::NoCompression);
        match tokio::time::timeout(deadline, produce).await {
            Ok(Ok(offsets)) => {
                let latency = started.elapsed().as_millis() as u64;
                PublishResult::ok("record written to kafka", latency)
                    .with_detail("topic", serde_json::json!(config.topic))
                    .with_detail("partition", serde_json::json!(config.partition))
                    .with_detail("offset", serde_json::json!(offsets.first().copied()))
            }
            Ok(Err(err)) => PublishResult::fail(
                codes::PUBLISH_ERROR,
                format!("kafka produce failed: {err}"),
                started.elapsed().as_millis() as u64,
            ),
            Err(_) => PublishResult::fail(
                codes::PUBLISH_TIMEOUT,
                format!(
                    "kafka produce timeout after {}ms",
                    self.timeouts.publish_timeout_ms
                ),
                started.elapsed().as_millis() as u64,
            ),
        }
    }
}

fn classify_connect_error(message: String) -> ProtocolError {
    if message.to_ascii_lowercase().contains("refused") {
        ProtocolError::Refused(message)
    } else {
        ProtocolError::Connection(message)
    }
}

#[async_trait]
impl ProtocolHandler for KafkaHandler {
    fn protocol(&self) -> Protocol {
        Protocol::Kafka
    }

    fn validate_config(&self, config: &serde_json::Value) -> bool {
        match KafkaHandlerConfig::from_json(config) {
            Ok(config) => {
                !config.bootstrap_servers.is_empty()
                    && config.bootstrap_servers.iter().all(|s| s.contains(':'))
                    && !config.topic.is_empty()
                    && config.partition >= 0
            }
            Err(_) => false,
        }
    }

    async fn connect(
        &self,
        _connection_id: &str,
        config: &serde_json::Value,
    ) -> Result<ProtocolClient, ProtocolError> {
        let config = KafkaHandlerConfig::from_json(config)?;
        let partition_client = self.open_partition_client(&config).await?;
        Ok(ProtocolClient::Kafka(partition_client))
    }

    async fn is_healthy(&self, client: &ProtocolClient) -> bool {
        // 分区客户端在 produce 时自动重试元数据；存在即视为可用
        matches!(client, ProtocolClient::Kafka(_))
    }

    async fn publish(
        &self,
        config: &serde_json::Value,
        target: Option<&str>,
        payload: &[u8],
    ) -> PublishResult {
        let started = Instant::now();
        let config = match KafkaHandlerConfig::from_json(config) {
            Ok(config) => config,
            Err(err) => return PublishResult::from_error(&err, 0),
        };
        let _ = target; // topic 在建连时绑定到分区客户端，不支持逐条覆盖
        let partition_client = match self.open_partition_client(&config).await {
            Ok(partition_client) => partition_client,
            Err(err) => {
                return PublishResult::from_error(&err, started.elapsed().as_millis() as u64);
            }
        };
        self.produce(&partition_client, &config, payload)
            .await
            .with_detail("pooled", serde_json::json!(false))
    }

    async fn publish_pooled(
        &self,
        client: &ProtocolClient,
        config: &serde_json::Value,
        _target: Option<&str>,
        payload: &[u8],
    ) -> PublishResult {
        let config = match KafkaHandlerConfig::from_json(config) {
            Ok(config) => config,
            Err(err) => return PublishResult::from_error(&err, 0),
        };
        let ProtocolClient::Kafka(partition_client) = client else {
            return PublishResult::fail(codes::PUBLISH_ERROR, "client is not a kafka client", 0);
        };
        self.produce(partition_client, &config, payload)
            .await
            .with_detail("pooled", serde_json::json!(true))
    }
}
