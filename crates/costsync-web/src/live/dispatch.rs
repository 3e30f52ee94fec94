//! Request handling for inbound live frames
//!
//! Every answer echoes the request's `messageId`. Failures are answered with
//! the response type the request expects, carrying `status: "error"`.

use crate::state::AppState;
use anyhow::Result;
use costsync_core::CoreError;
use costsync_types::{
    ClientRequest, CodeMatchingRequest, CostBatchRequest, ExcelDataRequest, InboundFrame,
    ProjectScope, Reply, ServerMessage,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Answer one text frame
pub async fn handle_text(state: &Arc<AppState>, text: &str) -> ServerMessage {
    let frame = match InboundFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(reason = %e.reason, "Rejected live frame");
            let kind = e.header.kind.clone().unwrap_or_default();
            return ServerMessage::failure(
                &kind,
                Reply::error(e.header.message_id, format!("Invalid message: {}", e.reason)),
            );
        }
    };

    let kind = frame.request.kind();
    let message_id = frame.message_id.clone();
    debug!(kind, message_id = ?message_id, "Live request");

    match handle_request(state, frame).await {
        Ok(message) => message,
        Err(e) => {
            warn!(kind, error = %e, "Live request failed");
            ServerMessage::failure(kind, Reply::error(message_id, format!("{:#}", e)))
        }
    }
}

async fn handle_request(state: &Arc<AppState>, frame: InboundFrame) -> Result<ServerMessage> {
    let id = frame.message_id;
    match frame.request {
        ClientRequest::Ping => Ok(ServerMessage::Pong { message_id: id }),
        ClientRequest::GetAvailableEbkpCodes { payload } => available_codes(state, id, payload).await,
        ClientRequest::RequestCodeMatching { payload } => code_matching(state, id, payload).await,
        ClientRequest::SaveCostBatchFull { payload } => save_cost_batch(state, id, payload).await,
        ClientRequest::SaveExcelData { payload } => save_excel_data(state, id, payload).await,
        ClientRequest::DeleteProjectData { payload } => delete_project_data(state, id, payload).await,
    }
}

/// `available_ebkp_codes` for one project, or for every project
pub async fn available_codes(
    state: &Arc<AppState>,
    id: Option<String>,
    payload: ProjectScope,
) -> Result<ServerMessage> {
    let codes = state
        .service
        .available_codes(payload.project_name.as_deref())
        .await?;
    Ok(ServerMessage::AvailableEbkpCodes {
        reply: Reply::success(id, format!("Found {} codes", codes.len())),
        codes,
    })
}

async fn code_matching(
    state: &Arc<AppState>,
    id: Option<String>,
    payload: CodeMatchingRequest,
) -> Result<ServerMessage> {
    if payload.codes.is_empty() {
        return Ok(ServerMessage::CodeMatchingInfo {
            reply: Reply::success(id, "No codes to match"),
            matches: Vec::new(),
            match_count: 0,
            element_count: 0,
        });
    }

    let report = state
        .service
        .code_matches(
            payload.project_name.as_deref(),
            &payload.codes,
            payload.force_refresh,
        )
        .await?;
    let matches = report.matches.as_ref().clone();
    Ok(ServerMessage::CodeMatchingInfo {
        reply: Reply::success(id, format!("Matched {} codes", matches.len())),
        match_count: matches.len(),
        matches,
        element_count: report.element_count,
    })
}

/// Runs the reconciliation on its own task; the answer gives up after the
/// request timeout but the run itself continues.
async fn save_cost_batch(
    state: &Arc<AppState>,
    id: Option<String>,
    payload: CostBatchRequest,
) -> Result<ServerMessage> {
    let project_name = required_project(payload.project_name)?;
    let service = Arc::clone(&state.service);
    let run = tokio::spawn(async move {
        service
            .reconcile(
                &project_name,
                &payload.matched_items,
                &payload.all_excel_items,
                true,
            )
            .await
    });

    let timeout = state.live.request_timeout();
    let result = match tokio::time::timeout(timeout, run).await {
        Ok(joined) => joined??,
        Err(_) => {
            return Err(CoreError::Timeout {
                operation: "save_cost_batch_full".to_string(),
                timeout_secs: timeout.as_secs(),
            }
            .into())
        }
    };

    let message = if result.has_project() {
        format!(
            "Processed {} BIM elements and {} spreadsheet items",
            result.processed_bim_elements, result.processed_excel_only_items
        )
    } else {
        "Project not found, nothing to reconcile".to_string()
    };
    Ok(ServerMessage::SaveCostBatchFullResponse {
        reply: Reply::success(id, message),
        result: Some(result),
    })
}

async fn save_excel_data(
    state: &Arc<AppState>,
    id: Option<String>,
    payload: ExcelDataRequest,
) -> Result<ServerMessage> {
    let result = state.service.save_excel_data(&payload).await?;
    Ok(ServerMessage::SaveExcelDataResponse {
        reply: Reply::success(
            id,
            format!("Saved {} unit costs", result.unit_costs_saved),
        ),
        result: Some(result),
    })
}

async fn delete_project_data(
    state: &Arc<AppState>,
    id: Option<String>,
    payload: ProjectScope,
) -> Result<ServerMessage> {
    let project_name = required_project(payload.project_name)?;
    let report = state.service.delete_project_data(&project_name).await?;
    let message = if report.project_found {
        format!("Deleted {} documents", report.deleted_count())
    } else {
        "Project not found, nothing deleted".to_string()
    };
    Ok(ServerMessage::DeleteProjectDataResponse {
        reply: Reply::success(id, message),
        deleted_count: report.deleted_count(),
        report: Some(report),
    })
}

fn required_project(name: Option<String>) -> Result<String, CoreError> {
    name.map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| CoreError::invalid_input("projectName is required"))
}
