//! Live request dispatch against an in-memory service

use costsync_core::config::{LiveConfig, ServiceConfig};
use costsync_core::delivery::MemoryProducer;
use costsync_core::models::{BimElement, QuantityValue};
use costsync_core::store::{SharedStore, SqliteStore};
use costsync_core::{CostService, EventBus};
use costsync_web::live::dispatch::handle_text;
use costsync_web::AppState;
use serde_json::Value;
use std::sync::Arc;

async fn state_with_tower_a() -> Arc<AppState> {
    let store = SharedStore::from_store(Arc::new(SqliteStore::in_memory().unwrap()));
    let service = CostService::new(
        store,
        Arc::new(MemoryProducer::new()),
        &ServiceConfig::default(),
        EventBus::default_capacity(),
    );
    service.start().await.unwrap();
    let element = BimElement {
        id: "e1".into(),
        global_id: Some("2O2Fr$t4X7Zf8NOew3FLOH".into()),
        ebkp_code: Some("C01.01".into()),
        area: Some(QuantityValue::Scalar(10.0)),
        ..Default::default()
    };
    service.import_qto("Tower A", vec![element]).await.unwrap();
    Arc::new(AppState::new(Arc::new(service), LiveConfig::default()))
}

async fn ask(state: &Arc<AppState>, frame: &str) -> Value {
    let reply = handle_text(state, frame).await;
    serde_json::from_str(&reply.to_text().unwrap()).unwrap()
}

#[tokio::test]
async fn test_ping_answers_pong() {
    let state = state_with_tower_a().await;
    let reply = ask(&state, r#"{"type":"ping","messageId":"p1"}"#).await;
    assert_eq!(reply["type"], "pong");
    assert_eq!(reply["messageId"], "p1");
}

#[tokio::test]
async fn test_empty_code_matching_is_success() {
    let state = state_with_tower_a().await;
    let reply = ask(
        &state,
        r#"{"type":"request_code_matching","messageId":"m1","payload":{"codes":[]}}"#,
    )
    .await;
    assert_eq!(reply["type"], "code_matching_info");
    assert_eq!(reply["messageId"], "m1");
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["matches"], serde_json::json!([]));
    assert_eq!(reply["matchCount"], 0);
}

#[tokio::test]
async fn test_available_codes_and_matching() {
    let state = state_with_tower_a().await;
    let reply = ask(
        &state,
        r#"{"type":"get_available_ebkp_codes","messageId":"c1","payload":{"projectName":"Tower A"}}"#,
    )
    .await;
    assert_eq!(reply["type"], "available_ebkp_codes");
    assert_eq!(reply["codes"][0]["code"], "C1.1");

    let reply = ask(
        &state,
        r#"{"type":"request_code_matching","messageId":"m2","payload":{"projectName":"Tower A","codes":[{"code":"C1.1","unitPrice":50}]}}"#,
    )
    .await;
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["matchCount"], 1);
    assert_eq!(reply["elementCount"], 1);
}

#[tokio::test]
async fn test_save_cost_batch_full_delivers() {
    let state = state_with_tower_a().await;
    let upload = ask(
        &state,
        r#"{"type":"save_excel_data","messageId":"x1","payload":{"projectName":"Tower A","filename":"tower-a.xlsx","fileId":"file-1","items":[{"ebkp":"C1.1","kennwert":50}]}}"#,
    )
    .await;
    assert_eq!(upload["type"], "save_excel_data_response");
    assert_eq!(upload["status"], "success");
    assert_eq!(upload["result"]["unitCostsSaved"], 1);

    let reply = ask(
        &state,
        r#"{"type":"save_cost_batch_full","messageId":"b1","payload":{"projectName":"Tower A","matchedItems":[],"allExcelItems":[{"ebkp":"C4.2","chf":300}]}}"#,
    )
    .await;
    assert_eq!(reply["type"], "save_cost_batch_full_response");
    assert_eq!(reply["messageId"], "b1");
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["result"]["processedBimElements"], 1);
    assert_eq!(reply["result"]["processedExcelOnlyItems"], 1);
    assert_eq!(reply["result"]["deliveredCount"], 2);
}

#[tokio::test]
async fn test_missing_project_name_is_error_response() {
    let state = state_with_tower_a().await;
    let reply = ask(
        &state,
        r#"{"type":"save_cost_batch_full","messageId":"b2","payload":{}}"#,
    )
    .await;
    assert_eq!(reply["type"], "save_cost_batch_full_response");
    assert_eq!(reply["messageId"], "b2");
    assert_eq!(reply["status"], "error");
    assert!(reply["message"].as_str().unwrap().contains("projectName"));
}

#[tokio::test]
async fn test_delete_unknown_project_is_zero_success() {
    let state = state_with_tower_a().await;
    let reply = ask(
        &state,
        r#"{"type":"delete_project_data","messageId":"d1","payload":{"projectName":"Nowhere"}}"#,
    )
    .await;
    assert_eq!(reply["type"], "delete_project_data_response");
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["deletedCount"], 0);
}

#[tokio::test]
async fn test_unknown_and_malformed_frames() {
    let state = state_with_tower_a().await;
    let reply = ask(&state, r#"{"type":"launch_rockets","messageId":"u1"}"#).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["messageId"], "u1");
    assert_eq!(reply["status"], "error");

    let reply = ask(&state, "not json").await;
    assert_eq!(reply["type"], "error");
    assert!(reply.get("messageId").is_none());
}
