//! 管理面路由：引擎控制、设备启停、池/熔断/日志/指标查询。

use api_contract::{
    ApiResponse, CircuitDto, DeviceActionRequest, DeviceRuntimeDto, EngineStatusDto, LogEntryDto,
    MetricsDto, PoolEntryDto, TestConnectionResponse,
};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use sim_storage::{DeviceStore, TransmissionLogRecord, TransmissionLogStore};
use sim_telemetry::new_request_ids;
use sim_transmit::{EngineStores, TransmissionManager, TransmitError};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

#[derive(Clone)]
pub struct AppState {
    pub manager: TransmissionManager,
    pub stores: EngineStores,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/engine/status", get(engine_status))
        .route("/api/engine/start", post(engine_start))
        .route("/api/engine/stop", post(engine_stop))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/:device_id/start", post(device_start))
        .route("/api/devices/:device_id/stop", post(device_stop))
        .route("/api/devices/:device_id/refresh", post(device_refresh))
        .route("/api/connections/:connection_id/test", post(connection_test))
        .route("/api/engine/pool", get(pool_entries))
        .route("/api/engine/circuits", get(circuit_entries))
        .route("/api/engine/circuits/reset", post(circuits_reset_all))
        .route(
            "/api/engine/circuits/:connection_id/reset",
            post(circuit_reset),
        )
        .route("/api/logs", get(recent_logs))
        .route("/api/metrics", get(metrics))
        .with_state(state)
        // 注入 request_id/trace_id
        .layer(middleware::from_fn(request_context))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

async fn engine_status(State(state): State<AppState>) -> Response {
    let status = state.manager.status().await;
    ok(EngineStatusDto {
        running: status.running,
        active_devices: status.active_devices,
        tick_count: status.tick_count,
        interval_ms: status.interval_ms,
        max_concurrent: status.max_concurrent,
        uptime_seconds: status.uptime_seconds,
    })
}

async fn engine_start(State(state): State<AppState>) -> Response {
    match state.manager.start().await {
        Ok(()) => ok(serde_json::json!({ "running": true })),
        Err(err) => transmit_error(err),
    }
}

async fn engine_stop(State(state): State<AppState>) -> Response {
    state.manager.stop().await;
    ok(serde_json::json!({ "running": false }))
}

async fn list_devices(State(state): State<AppState>) -> Response {
    match state.stores.devices.list_transmission_devices().await {
        Ok(devices) => {
            let items: Vec<DeviceRuntimeDto> = devices
                .into_iter()
                .map(|device| DeviceRuntimeDto {
                    device_id: device.device_id,
                    name: device.name,
                    status: device.status.as_str().to_string(),
                    connection_id: device.connection_id,
                    dataset_id: device.dataset_id,
                    current_row_index: device.current_row_index,
                    last_transmission_at_ms: device.last_transmission_at_ms,
                    transmission_frequency_seconds: u64::from(
                        device.transmission_frequency_seconds,
                    ),
                })
                .collect();
            ok(items)
        }
        Err(err) => internal_error(err),
    }
}

async fn device_start(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Response {
    match state.manager.start_device(&device_id).await {
        Ok(()) => ok(serde_json::json!({ "deviceId": device_id })),
        Err(err) => transmit_error(err),
    }
}

async fn device_stop(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Option<Json<DeviceActionRequest>>,
) -> Response {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    match state
        .manager
        .stop_device(&device_id, request.reset_row_index)
        .await
    {
        Ok(()) => ok(serde_json::json!({ "deviceId": device_id })),
        Err(err) => transmit_error(err),
    }
}

async fn device_refresh(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Response {
    match state.manager.refresh_device(&device_id).await {
        Ok(eligible) => ok(serde_json::json!({ "deviceId": device_id, "eligible": eligible })),
        Err(err) => transmit_error(err),
    }
}

async fn connection_test(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Response {
    match state.manager.test_connection(&connection_id).await {
        Ok(result) => ok(TestConnectionResponse {
            success: result.success,
            message: result.message,
            latency_ms: result.latency_ms,
            error_code: result.error_code,
            details: result.details,
        }),
        Err(err) => transmit_error(err),
    }
}

async fn pool_entries(State(state): State<AppState>) -> Response {
    let entries: Vec<PoolEntryDto> = state
        .manager
        .pool_stats()
        .await
        .into_iter()
        .map(|entry| PoolEntryDto {
            connection_id: entry.connection_id,
            protocol: entry.protocol.as_str().to_string(),
            use_count: entry.use_count,
            idle_ms: entry.idle_ms,
            age_ms: entry.age_ms,
            in_flight: entry.in_flight,
        })
        .collect();
    ok(entries)
}

async fn circuit_entries(State(state): State<AppState>) -> Response {
    let entries: Vec<CircuitDto> = state
        .manager
        .circuit_stats()
        .into_iter()
        .map(|entry| CircuitDto {
            connection_id: entry.connection_id,
            state: entry.state.as_str().to_string(),
            failure_count: entry.failure_count,
            open_count: entry.open_count,
            total_successes: entry.total_successes,
            total_failures: entry.total_failures,
            last_error: entry.last_error,
            last_failure_at_ms: entry.last_failure_at_ms,
            remaining_ms: entry.remaining_ms,
        })
        .collect();
    ok(entries)
}

async fn circuit_reset(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Response {
    state.manager.reset_circuit(&connection_id);
    ok(serde_json::json!({ "connectionId": connection_id }))
}

async fn circuits_reset_all(State(state): State<AppState>) -> Response {
    state.manager.reset_all_circuits();
    ok(serde_json::json!({ "reset": true }))
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    limit: Option<usize>,
}

async fn recent_logs(State(state): State<AppState>, Query(query): Query<LogQuery>) -> Response {
    let limit = query.limit.unwrap_or(100).min(1000);
    match state.stores.logs.recent(limit).await {
        Ok(records) => {
            let items: Vec<LogEntryDto> = records.into_iter().map(log_dto).collect();
            ok(items)
        }
        Err(err) => internal_error(err),
    }
}

async fn metrics() -> Response {
    let snapshot = sim_telemetry::metrics().snapshot();
    ok(MetricsDto {
        mqtt_sent: snapshot.mqtt_sent,
        mqtt_failed: snapshot.mqtt_failed,
        http_sent: snapshot.http_sent,
        http_failed: snapshot.http_failed,
        kafka_sent: snapshot.kafka_sent,
        kafka_failed: snapshot.kafka_failed,
        bytes_sent: snapshot.bytes_sent,
        ticks: snapshot.ticks,
        avg_tick_duration_ms: average(
            snapshot.tick_duration_ms_total,
            snapshot.tick_duration_ms_count,
        ),
        avg_publish_latency_ms: average(
            snapshot.publish_latency_ms_total,
            snapshot.publish_latency_ms_count,
        ),
        circuit_opened: snapshot.circuit_opened,
        circuit_denied: snapshot.circuit_denied,
        pool_created: snapshot.pool_created,
        pool_reused: snapshot.pool_reused,
        pool_evicted: snapshot.pool_evicted,
        active_devices: snapshot.active_devices,
    })
}

fn log_dto(record: TransmissionLogRecord) -> LogEntryDto {
    LogEntryDto {
        log_id: record.log_id,
        connection_id: record.connection_id,
        device_id: record.device_id,
        direction: record.direction,
        protocol: record.protocol.as_str().to_string(),
        status: record.status,
        payload_size: record.payload_size,
        error_message: record.error_message,
        retry_count: record.retry_count,
        latency_ms: record.latency_ms,
        batch_id: Some(record.batch_id),
        created_at_ms: record.created_at_ms,
    }
}

fn average(total: u64, count: u64) -> u64 {
    if count == 0 { 0 } else { total / count }
}

fn ok<T: serde::Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

fn transmit_error(err: TransmitError) -> Response {
    match err {
        TransmitError::NotFound(kind, id) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error(
                "NOT_FOUND",
                format!("{kind} not found: {id}"),
            )),
        )
            .into_response(),
        TransmitError::AlreadyRunning => (
            StatusCode::CONFLICT,
            Json(ApiResponse::<()>::error(
                "ENGINE.ALREADY_RUNNING",
                "transmission engine already running",
            )),
        )
            .into_response(),
        TransmitError::Storage(err) => internal_error(err),
    }
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::error("INTERNAL.ERROR", err.to_string())),
    )
        .into_response()
}

async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    // 生成 request_id 与 trace_id，并注入请求扩展与日志
    let ids = new_request_ids();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(ids.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %ids.request_id,
        trace_id = %ids.trace_id,
        method = %method,
        path = %path
    );

    let mut response = next.run(req).instrument(span).await;
    response.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&ids.request_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response.headers_mut().insert(
        "x-trace-id",
        HeaderValue::from_str(&ids.trace_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::average;

    #[test]
    fn average_is_zero_safe() {
        assert_eq!(average(0, 0), 0);
        assert_eq!(average(100, 4), 25);
    }
}
