//! End-to-end tests driving the full dispatch path over a seeded store.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use serde_json::{Value, json};

use histdata_server::domain::candle::Candle;
use histdata_server::infrastructure::protocol::server::{McpServer, ServerState};
use histdata_server::infrastructure::protocol::{JsonRpcRequest, JsonRpcResponse, dispatch};
use histdata_server::infrastructure::storage::{StorageGateway, dataset_path, writer};
use histdata_server::{TransportMode, build_registry};

fn candle_at(ts: chrono::DateTime<Utc>, close: f64) -> Candle {
    Candle {
        date: ts.format("%Y-%m-%d").to_string(),
        time: ts.format("%H:%M:%S").to_string(),
        open: close - 0.001,
        high: close + 0.001,
        low: close - 0.002,
        close,
        volume: 10.0,
        ts,
    }
}

fn seed_store(dir: &std::path::Path, candles: &[Candle]) -> Arc<StorageGateway> {
    writer::write_manifest(dir).unwrap();
    let locator = dataset_path(dir, "EURUSD", "m1");
    writer::write_candles(&locator.path, candles).unwrap();
    Arc::new(StorageGateway::new(dir))
}

fn rpc(id: i64, method: &str, params: Value) -> JsonRpcRequest {
    serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    }))
    .unwrap()
}

async fn read_uri(gateway: &Arc<StorageGateway>, uri: &str) -> JsonRpcResponse {
    let registry = Arc::new(build_registry(gateway).unwrap());
    dispatch(&registry, rpc(1, "resources/read", json!({"uri": uri})))
        .await
        .unwrap()
}

#[tokio::test]
async fn read_returns_only_in_range_bars_in_ascending_order() {
    let dir = tempfile::tempdir().unwrap();
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    // Two bars before the range, three inside, written in ascending order.
    let candles = vec![
        candle_at(base - Duration::hours(2), 1.0),
        candle_at(base - Duration::hours(1), 1.1),
        candle_at(base, 1.2),
        candle_at(base + Duration::hours(5), 1.3),
        candle_at(base + Duration::hours(23), 1.4),
    ];
    let gateway = seed_store(dir.path(), &candles);

    let response = read_uri(
        &gateway,
        "forex://histdata/EURUSD/m1/2024-01-01T00:00/2024-01-02T00:00",
    )
    .await;

    assert!(response.error.is_none());
    let contents = &response.result.unwrap()["contents"][0];
    assert_eq!(contents["mimeType"], "application/x-ndjson");

    let lines: Vec<&str> = contents["text"]
        .as_str()
        .unwrap()
        .lines()
        .collect();
    assert_eq!(lines.len(), 3);

    let closes: Vec<f64> = lines
        .iter()
        .map(|line| {
            serde_json::from_str::<Value>(line).unwrap()["close"]
                .as_f64()
                .unwrap()
        })
        .collect();
    assert_eq!(closes, vec![1.2, 1.3, 1.4]);
}

#[tokio::test]
async fn range_bounds_are_inclusive_on_both_ends() {
    let dir = tempfile::tempdir().unwrap();
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let candles: Vec<Candle> = (0..5)
        .map(|i| candle_at(base + Duration::minutes(i), 1.0 + f64::from(i as i32)))
        .collect();
    let gateway = seed_store(dir.path(), &candles);

    let response = read_uri(
        &gateway,
        "forex://histdata/EURUSD/m1/2024-01-01T00:01/2024-01-01T00:03",
    )
    .await;

    let result = response.result.unwrap();
    let text = result["contents"][0]["text"].as_str().unwrap();
    assert_eq!(text.lines().count(), 3);
}

#[tokio::test]
async fn multi_row_group_files_scan_correctly() {
    let dir = tempfile::tempdir().unwrap();
    writer::write_manifest(dir.path()).unwrap();

    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let candles: Vec<Candle> = (0..2000)
        .map(|i| candle_at(base + Duration::minutes(i), 1.0))
        .collect();

    // Tiny row groups so the range scan has groups to skip on both sides.
    let locator = dataset_path(dir.path(), "EURUSD", "m1");
    writer::write_candles_chunked(&locator.path, &candles, Some(100)).unwrap();

    let gateway = Arc::new(StorageGateway::new(dir.path()));
    let response = read_uri(
        &gateway,
        "forex://histdata/EURUSD/m1/2024-01-01T16:40/2024-01-01T17:19",
    )
    .await;

    let result = response.result.unwrap();
    let text = result["contents"][0]["text"].as_str().unwrap();
    // Minutes 1000..=1039 inclusive.
    assert_eq!(text.lines().count(), 40);
}

#[tokio::test]
async fn missing_dataset_is_a_resource_not_found_error() {
    let dir = tempfile::tempdir().unwrap();
    writer::write_manifest(dir.path()).unwrap();
    let gateway = Arc::new(StorageGateway::new(dir.path()));

    let response = read_uri(
        &gateway,
        "forex://histdata/GBPUSD/m1/2024-01-01/2024-01-02",
    )
    .await;

    assert_eq!(response.error.unwrap().code, -32002);
}

#[tokio::test]
async fn ema_tool_call_shapes_history_and_latest() {
    let dir = tempfile::tempdir().unwrap();
    writer::write_manifest(dir.path()).unwrap();
    let gateway = Arc::new(StorageGateway::new(dir.path()));
    let registry = Arc::new(build_registry(&gateway).unwrap());

    let closes: Vec<f64> = (1..=16).map(f64::from).collect();
    let response = dispatch(
        &registry,
        rpc(
            2,
            "tools/call",
            json!({"name": "calculate_ema", "arguments": {"closes": closes, "period": 5}}),
        ),
    )
    .await
    .unwrap();

    assert!(response.error.is_none());
    let result = response.result.unwrap();
    assert!(result.get("isError").is_none());
    let payload = &result["structuredContent"];
    assert_eq!(payload["period"], 5);
    assert_eq!(payload["history"].as_array().unwrap().len(), 11);
    assert!(payload["latestValue"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn lifecycle_serves_then_releases_storage() {
    let dir = tempfile::tempdir().unwrap();
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let candles = vec![candle_at(base, 1.2)];
    let gateway = seed_store(dir.path(), &candles);

    let server = McpServer::new(Arc::clone(&gateway), 0);
    server.start(TransportMode::Http).await.unwrap();

    let registry = server.registry().await.unwrap();
    let response = dispatch(
        &registry,
        rpc(
            3,
            "resources/read",
            json!({"uri": "forex://histdata/EURUSD/m1/2024-01-01/2024-01-02"}),
        ),
    )
    .await
    .unwrap();
    assert!(response.error.is_none());
    assert!(gateway.is_open().await);

    server.stop().await;
    assert_eq!(server.state().await, ServerState::Stopped);
    assert!(!gateway.is_open().await);
}
