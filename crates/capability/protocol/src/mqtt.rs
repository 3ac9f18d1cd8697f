//! MQTT 协议处理器
//!
//! 支持 mqtt/mqtts/ws/wss 四种传输。客户端建立后由后台任务驱动
//! 事件循环，连接状态通过 watch 通道对外可见，QoS>0 的发布通过
//! broadcast 通道等待 broker 的 PubAck/PubComp 确认。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use domain::Protocol;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use serde::Deserialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::handler::{ProtocolClient, ProtocolHandler};
use crate::types::{codes, HandlerTimeouts, PublishResult};

/// MQTT 连接配置（Connection.config 的 MQTT 形态）。
#[derive(Debug, Clone, Deserialize)]
pub struct MqttHandlerConfig {
    /// broker 地址，形如 `mqtt://host:1883` / `wss://host/mqtt`
    pub broker_url: String,
    /// 默认发布主题（设备可用 target 覆盖）
    pub topic: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,
}

fn default_qos() -> u8 {
    1
}

fn default_keep_alive() -> u64 {
    30
}

impl MqttHandlerConfig {
    pub fn from_json(config: &serde_json::Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(config.clone())
            .map_err(|err| ProtocolError::ConfigParse(format!("mqtt config: {err}")))
    }
}

/// broker URL 的传输种类。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttTransportKind {
    Tcp,
    Tls,
    Ws,
    Wss,
}

/// 解析后的 broker 端点。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub transport: MqttTransportKind,
    pub host: String,
    pub port: u16,
    /// websocket 路径（tcp/tls 传输下为空）
    pub path: String,
}

impl BrokerEndpoint {
    /// websocket 传输下 rumqttc 需要完整 URL 作为 broker 地址。
    pub fn websocket_url(&self) -> String {
        let scheme = match self.transport {
            MqttTransportKind::Ws => "ws",
            MqttTransportKind::Wss => "wss",
            _ => unreachable!("websocket_url only valid for ws/wss"),
        };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

/// 解析 broker URL。
///
/// 缺省端口：mqtt→1883，mqtts→8883，ws→80，wss→443；
/// websocket 缺省路径为 `/mqtt`。
pub fn parse_broker_url(url: &str) -> Result<BrokerEndpoint, ProtocolError> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| ProtocolError::ConfigParse(format!("broker url missing scheme: {url}")))?;

    let (transport, default_port) = match scheme {
        "mqtt" | "tcp" => (MqttTransportKind::Tcp, 1883),
        "mqtts" | "ssl" => (MqttTransportKind::Tls, 8883),
        "ws" => (MqttTransportKind::Ws, 80),
        "wss" => (MqttTransportKind::Wss, 443),
        other => {
            return Err(ProtocolError::ConfigParse(format!(
                "unsupported broker scheme: {other}"
            )));
        }
    };

    let (authority, path) = match rest.split_once('/') {
        Some((authority, path)) => (authority, format!("/{path}")),
        None => (rest, String::new()),
    };
    if authority.is_empty() {
        return Err(ProtocolError::ConfigParse(format!(
            "broker url missing host: {url}"
        )));
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                ProtocolError::ConfigParse(format!("invalid broker port: {port}"))
            })?;
            (host.to_string(), port)
        }
        None => (authority.to_string(), default_port),
    };

    let path = match transport {
        MqttTransportKind::Ws | MqttTransportKind::Wss => {
            if path.is_empty() {
                "/mqtt".to_string()
            } else {
                path
            }
        }
        _ => path,
    };

    Ok(BrokerEndpoint {
        transport,
        host,
        port,
        path,
    })
}

/// 链路状态（由事件循环任务维护）。
#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Up,
    Down(String),
}

/// 常驻 MQTT 客户端句柄。
///
/// 事件循环运行在独立任务中；句柄关闭时先 disconnect 再终止任务。
pub struct MqttClientHandle {
    client: AsyncClient,
    link: watch::Receiver<LinkState>,
    acks: broadcast::Sender<u16>,
    /// 发布串行锁：等待确认期间链路上只有一条本客户端的在途发布
    publish_lock: tokio::sync::Mutex<()>,
    eventloop_task: JoinHandle<()>,
}

impl MqttClientHandle {
    /// 当前链路是否在线。
    pub fn is_connected(&self) -> bool {
        *self.link.borrow() == LinkState::Up
    }

    fn subscribe_acks(&self) -> broadcast::Receiver<u16> {
        self.acks.subscribe()
    }

    /// 拆除客户端：尽力 disconnect，随后终止事件循环任务。
    pub async fn close(&self) {
        if let Err(err) = self.client.disconnect().await {
            debug!(target: "sim.protocol", error = %err, "mqtt disconnect on close failed");
        }
        self.eventloop_task.abort();
    }
}

/// MQTT 协议处理器。
pub struct MqttHandler {
    timeouts: HandlerTimeouts,
}

impl MqttHandler {
    pub fn new(timeouts: HandlerTimeouts) -> Self {
        Self { timeouts }
    }

    /// 建立客户端并等待 ConnAck。
    async fn open_client(
        &self,
        connection_id: &str,
        config: &MqttHandlerConfig,
    ) -> Result<MqttClientHandle, ProtocolError> {
        let endpoint = parse_broker_url(&config.broker_url)?;
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("sim-{}", uuid::Uuid::new_v4()));

        let mut options = match endpoint.transport {
            MqttTransportKind::Tcp | MqttTransportKind::Tls => {
                MqttOptions::new(client_id, endpoint.host.clone(), endpoint.port)
            }
            MqttTransportKind::Ws | MqttTransportKind::Wss => {
                MqttOptions::new(client_id, endpoint.websocket_url(), endpoint.port)
            }
        };
        options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.max(5)));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        match endpoint.transport {
            MqttTransportKind::Tcp => {}
            MqttTransportKind::Tls => {
                options.set_transport(Transport::tls_with_default_config());
            }
            MqttTransportKind::Ws => {
                options.set_transport(Transport::Ws);
            }
            MqttTransportKind::Wss => {
                options.set_transport(Transport::wss_with_default_config());
            }
        }

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let (link_tx, link_rx) = watch::channel(LinkState::Connecting);
        let (ack_tx, _) = broadcast::channel(64);
        let ack_out = ack_tx.clone();
        let conn = connection_id.to_string();

        let eventloop_task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        debug!(target: "sim.protocol", connection_id = %conn, "mqtt link up");
                        if link_tx.send(LinkState::Up).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        let _ = ack_out.send(ack.pkid);
                    }
                    Ok(Event::Incoming(Packet::PubComp(comp))) => {
                        let _ = ack_out.send(comp.pkid);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(target: "sim.protocol", connection_id = %conn, error = %err, "mqtt eventloop error");
                        if link_tx.send(LinkState::Down(err.to_string())).is_err() {
                            break;
                        }
                        // rumqttc 会自动重连；让出一拍避免错误风暴刷屏
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        let handle = MqttClientHandle {
            client,
            link: link_rx,
            acks: ack_tx,
            publish_lock: tokio::sync::Mutex::new(()),
            eventloop_task,
        };

        let deadline = Duration::from_millis(self.timeouts.connect_timeout_ms);
        let mut link = handle.link.clone();
        let wait_up = async {
            loop {
                let state = link.borrow_and_update().clone();
                match state {
                    LinkState::Up => return Ok(()),
                    LinkState::Down(msg) => return Err(msg),
                    LinkState::Connecting => {}
                }
                if link.changed().await.is_err() {
                    return Err("mqtt eventloop stopped".to_string());
                }
            }
        };

        match tokio::time::timeout(deadline, wait_up).await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(msg)) => {
                handle.close().await;
                if msg.to_ascii_lowercase().contains("refused") {
                    Err(ProtocolError::Refused(msg))
                } else {
                    Err(ProtocolError::Connection(msg))
                }
            }
            Err(_) => {
                handle.close().await;
                Err(ProtocolError::Timeout(format!(
                    "mqtt connect timeout after {}ms",
                    self.timeouts.connect_timeout_ms
                )))
            }
        }
    }
}

/// QoS 数值映射，越界折叠到至多一次。
pub fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

#[async_trait]
impl ProtocolHandler for MqttHandler {
    fn protocol(&self) -> Protocol {
        Protocol::Mqtt
    }

    fn validate_config(&self, config: &serde_json::Value) -> bool {
        match MqttHandlerConfig::from_json(config) {
            Ok(config) => !config.topic.is_empty() && parse_broker_url(&config.broker_url).is_ok(),
            Err(_) => false,
        }
    }

    async fn connect(
        &self,
        connection_id: &str,
        config: &serde_json::Value,
    ) -> Result<ProtocolClient, ProtocolError> {
        let config = MqttHandlerConfig::from_json(config)?;
        let handle = self.open_client(connection_id, &config).await?;
        Ok(ProtocolClient::Mqtt(handle))
    }

    async fn is_healthy(&self, client: &ProtocolClient) -> bool {
        match client {
            ProtocolClient::Mqtt(handle) => handle.is_connected(),
            _ => false,
        }
    }

    async fn publish(
        &self,
        config: &serde_json::Value,
        target: Option<&str>,
        payload: &[u8],
    ) -> PublishResult {
        let started = Instant::now();
        let client = match self.connect("adhoc", config).await {
            Ok(client) => client,
            Err(err) => {
                return PublishResult::from_error(&err, started.elapsed().as_millis() as u64);
            }
        };
        let mut result = self.publish_pooled(&client, config, target, payload).await;
        client.close().await;
        result
            .details
            .insert("pooled".to_string(), serde_json::json!(false));
        result
    }

    async fn publish_pooled(
        &self,
        client: &ProtocolClient,
        config: &serde_json::Value,
        target: Option<&str>,
        payload: &[u8],
    ) -> PublishResult {
        let started = Instant::now();
        let config = match MqttHandlerConfig::from_json(config) {
            Ok(config) => config,
            Err(err) => return PublishResult::from_error(&err, 0),
        };
        let ProtocolClient::Mqtt(handle) = client else {
            return PublishResult::fail(codes::PUBLISH_ERROR, "client is not an mqtt client", 0);
        };
        let topic = target.unwrap_or(config.topic.as_str());
        let qos = qos_from_u8(config.qos);

        // 同一客户端的发布串行化：等待确认时在途的只有本次发布，
        // 确认流里出现的任何 pkid 都属于它
        let _serial = handle.publish_lock.lock().await;
        // 先订阅确认流再发布，确保 ack 不会在订阅前到达被丢弃
        let mut acks = handle.subscribe_acks();
        if let Err(err) = handle
            .client
            .publish(topic, qos, false, payload.to_vec())
            .await
        {
            return PublishResult::fail(
                codes::PUBLISH_ERROR,
                format!("mqtt publish failed: {err}"),
                started.elapsed().as_millis() as u64,
            );
        }

        if qos == QoS::AtMostOnce {
            return PublishResult::ok("published (qos 0)", started.elapsed().as_millis() as u64)
                .with_detail("topic", serde_json::json!(topic))
                .with_detail("pooled", serde_json::json!(true));
        }

        let deadline = Duration::from_millis(self.timeouts.publish_timeout_ms);
        match tokio::time::timeout(deadline, acks.recv()).await {
            Ok(Ok(pkid)) => {
                PublishResult::ok("acknowledged by broker", started.elapsed().as_millis() as u64)
                    .with_detail("topic", serde_json::json!(topic))
                    .with_detail("message_id", serde_json::json!(pkid))
                    .with_detail("pooled", serde_json::json!(true))
            }
            Ok(Err(_)) => PublishResult::fail(
                codes::PUBLISH_ERROR,
                "mqtt ack stream closed",
                started.elapsed().as_millis() as u64,
            ),
            Err(_) => PublishResult::fail(
                codes::PUBLISH_TIMEOUT,
                format!(
                    "no broker ack within {}ms",
                    self.timeouts.publish_timeout_ms
                ),
                started.elapsed().as_millis() as u64,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tcp_url_with_default_port() {
        let endpoint = parse_broker_url("mqtt://broker.local").expect("parse");
        assert_eq!(endpoint.transport, MqttTransportKind::Tcp);
        assert_eq!(endpoint.host, "broker.local");
        assert_eq!(endpoint.port, 1883);
        assert!(endpoint.path.is_empty());
    }

    #[test]
    fn parse_tls_url_with_explicit_port() {
        let endpoint = parse_broker_url("mqtts://broker.local:9883").expect("parse");
        assert_eq!(endpoint.transport, MqttTransportKind::Tls);
        assert_eq!(endpoint.port, 9883);
    }

    #[test]
    fn parse_wss_url_with_path() {
        let endpoint = parse_broker_url("wss://broker.local/ws/mqtt").expect("parse");
        assert_eq!(endpoint.transport, MqttTransportKind::Wss);
        assert_eq!(endpoint.port, 443);
        assert_eq!(endpoint.path, "/ws/mqtt");
        assert_eq!(endpoint.websocket_url(), "wss://broker.local:443/ws/mqtt");
    }

    #[test]
    fn parse_ws_url_defaults_path() {
        let endpoint = parse_broker_url("ws://broker.local:8083").expect("parse");
        assert_eq!(endpoint.transport, MqttTransportKind::Ws);
        assert_eq!(endpoint.port, 8083);
        assert_eq!(endpoint.path, "/mqtt");
    }

    #[test]
    fn parse_rejects_unknown_scheme_and_missing_host() {
        assert!(parse_broker_url("amqp://broker.local").is_err());
        assert!(parse_broker_url("broker.local:1883").is_err());
        assert!(parse_broker_url("mqtt://").is_err());
        assert!(parse_broker_url("mqtt://broker.local:notaport").is_err());
    }

    #[test]
    fn qos_mapping_folds_out_of_range() {
        assert_eq!(qos_from_u8(0), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2), QoS::ExactlyOnce);
        assert_eq!(qos_from_u8(7), QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn concurrent_publishes_wait_for_distinct_acks() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        // 不连 broker：直接构造句柄，确认由测试侧注入
        let (client, _eventloop) =
            AsyncClient::new(MqttOptions::new("sim-test", "127.0.0.1", 1883), 16);
        let (_link_tx, link) = watch::channel(LinkState::Up);
        let (acks, _ack_keepalive) = broadcast::channel(8);
        let handle = Arc::new(ProtocolClient::Mqtt(MqttClientHandle {
            client,
            link,
            acks: acks.clone(),
            publish_lock: tokio::sync::Mutex::new(()),
            eventloop_task: tokio::spawn(async {}),
        }));
        let handler = Arc::new(MqttHandler::new(HandlerTimeouts {
            connect_timeout_ms: 1000,
            publish_timeout_ms: 2000,
        }));
        let config = serde_json::json!({
            "broker_url": "mqtt://127.0.0.1:1883",
            "topic": "devices/telemetry",
            "qos": 1,
        });

        let finished = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..2 {
            let handle = Arc::clone(&handle);
            let handler = Arc::clone(&handler);
            let config = config.clone();
            let finished = Arc::clone(&finished);
            tasks.push(tokio::spawn(async move {
                let result = handler.publish_pooled(&handle, &config, None, b"{}").await;
                finished.fetch_add(1, Ordering::SeqCst);
                result
            }));
        }

        // 发布串行化：一个确认只完成一次发布
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        let _ = acks.send(1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        let _ = acks.send(2);

        for task in tasks {
            let result = task.await.expect("join");
            assert!(result.success);
        }
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn validate_config_checks_required_fields() {
        let handler = MqttHandler::new(HandlerTimeouts::default());
        let good = serde_json::json!({
            "broker_url": "mqtt://broker.local:1883",
            "topic": "devices/telemetry",
        });
        assert!(handler.validate_config(&good));

        let missing_topic = serde_json::json!({ "broker_url": "mqtt://broker.local" });
        assert!(!handler.validate_config(&missing_topic));

        let bad_url = serde_json::json!({ "broker_url": "broker.local", "topic": "t" });
        assert!(!handler.validate_config(&bad_url));
    }
}
