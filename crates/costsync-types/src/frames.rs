//! Push channel frames (JSON text over WebSocket)
//!
//! Every inbound frame has a `type` and an optional `messageId`; responses to
//! a request echo that `messageId` and carry a `status` plus a human-readable
//! `message`.

use crate::matching::{CodeMatch, EbkpCodeInfo};
use crate::reports::{DeleteProjectReport, ExcelImportResult, ReconciliationResult};
use crate::spreadsheet::SpreadsheetItem;
use serde::{Deserialize, Serialize};

// ===================
// Inbound
// ===================

/// Envelope fields readable from any frame, even one whose payload is invalid
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameHeader {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Requests a client may send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Ping,
    GetAvailableEbkpCodes {
        #[serde(default)]
        payload: ProjectScope,
    },
    RequestCodeMatching {
        #[serde(default)]
        payload: CodeMatchingRequest,
    },
    SaveCostBatchFull {
        #[serde(default)]
        payload: CostBatchRequest,
    },
    SaveExcelData {
        #[serde(default)]
        payload: ExcelDataRequest,
    },
    DeleteProjectData {
        #[serde(default)]
        payload: ProjectScope,
    },
}

impl ClientRequest {
    /// Wire name of the request type
    pub fn kind(&self) -> &'static str {
        match self {
            ClientRequest::Ping => "ping",
            ClientRequest::GetAvailableEbkpCodes { .. } => "get_available_ebkp_codes",
            ClientRequest::RequestCodeMatching { .. } => "request_code_matching",
            ClientRequest::SaveCostBatchFull { .. } => "save_cost_batch_full",
            ClientRequest::SaveExcelData { .. } => "save_excel_data",
            ClientRequest::DeleteProjectData { .. } => "delete_project_data",
        }
    }
}

/// A parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub message_id: Option<String>,
    pub request: ClientRequest,
}

/// Why an inbound frame could not be turned into a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameParseError {
    /// Whatever envelope could be recovered (for the messageId echo)
    pub header: FrameHeader,
    pub reason: String,
}

impl InboundFrame {
    /// Parse a text frame, keeping the header when the payload is malformed
    pub fn parse(text: &str) -> Result<Self, FrameParseError> {
        let header: FrameHeader = serde_json::from_str(text).map_err(|e| FrameParseError {
            header: FrameHeader::default(),
            reason: format!("Invalid JSON frame: {}", e),
        })?;

        if header.kind.is_none() {
            return Err(FrameParseError {
                header,
                reason: "Frame is missing its 'type'".to_string(),
            });
        }

        match serde_json::from_str::<ClientRequest>(text) {
            Ok(request) => Ok(Self {
                message_id: header.message_id,
                request,
            }),
            Err(e) => Err(FrameParseError {
                reason: format!(
                    "Cannot handle '{}': {}",
                    header.kind.as_deref().unwrap_or_default(),
                    e
                ),
                header,
            }),
        }
    }
}

/// Payload naming a project
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectScope {
    #[serde(default, alias = "project")]
    pub project_name: Option<String>,
}

/// Unit cost offered by the client for matching
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitCostInput {
    pub code: String,
    #[serde(default, alias = "kennwert")]
    pub unit_price: f64,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeMatchingRequest {
    #[serde(default, alias = "project")]
    pub project_name: Option<String>,
    #[serde(default)]
    pub codes: Vec<UnitCostInput>,
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBatchRequest {
    #[serde(default, alias = "project")]
    pub project_name: Option<String>,
    #[serde(default)]
    pub matched_items: Vec<SpreadsheetItem>,
    #[serde(default, alias = "allItems")]
    pub all_excel_items: Vec<SpreadsheetItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcelDataRequest {
    #[serde(default, alias = "project")]
    pub project_name: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, alias = "excelItems")]
    pub items: Vec<SpreadsheetItem>,
}

// ===================
// Outbound
// ===================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Broker producer state as shown to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProducerState {
    Connected,
    Disconnected,
}

impl From<bool> for ProducerState {
    fn from(connected: bool) -> Self {
        if connected {
            ProducerState::Connected
        } else {
            ProducerState::Disconnected
        }
    }
}

/// Fields common to every response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub status: ResponseStatus,
    pub message: String,
}

impl Reply {
    pub fn success(message_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            message_id,
            status: ResponseStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            message_id,
            status: ResponseStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Frames sent by the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    ConnectionStatus {
        connection_id: u64,
        status: String,
        kafka: ProducerState,
    },
    KafkaStatus {
        status: ProducerState,
    },
    ProjectUpdated {
        project_name: String,
        project_id: String,
        element_count: usize,
        total_cost: f64,
    },
    AvailableEbkpCodes {
        #[serde(flatten)]
        reply: Reply,
        codes: Vec<EbkpCodeInfo>,
    },
    CodeMatchingInfo {
        #[serde(flatten)]
        reply: Reply,
        matches: Vec<CodeMatch>,
        match_count: usize,
        element_count: usize,
    },
    SaveCostBatchFullResponse {
        #[serde(flatten)]
        reply: Reply,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<ReconciliationResult>,
    },
    SaveExcelDataResponse {
        #[serde(flatten)]
        reply: Reply,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<ExcelImportResult>,
    },
    DeleteProjectDataResponse {
        #[serde(flatten)]
        reply: Reply,
        deleted_count: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        report: Option<DeleteProjectReport>,
    },
    Error {
        #[serde(flatten)]
        reply: Reply,
    },
}

impl ServerMessage {
    /// Error response shaped like the normal answer to `request_kind`
    pub fn failure(request_kind: &str, reply: Reply) -> Self {
        match request_kind {
            "get_available_ebkp_codes" => ServerMessage::AvailableEbkpCodes {
                reply,
                codes: Vec::new(),
            },
            "request_code_matching" => ServerMessage::CodeMatchingInfo {
                reply,
                matches: Vec::new(),
                match_count: 0,
                element_count: 0,
            },
            "save_cost_batch_full" => ServerMessage::SaveCostBatchFullResponse {
                reply,
                result: None,
            },
            "save_excel_data" => ServerMessage::SaveExcelDataResponse {
                reply,
                result: None,
            },
            "delete_project_data" => ServerMessage::DeleteProjectDataResponse {
                reply,
                deleted_count: 0,
                report: None,
            },
            _ => ServerMessage::Error { reply },
        }
    }

    /// The reply block, for frames that answer a request
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            ServerMessage::AvailableEbkpCodes { reply, .. }
            | ServerMessage::CodeMatchingInfo { reply, .. }
            | ServerMessage::SaveCostBatchFullResponse { reply, .. }
            | ServerMessage::SaveExcelDataResponse { reply, .. }
            | ServerMessage::DeleteProjectDataResponse { reply, .. }
            | ServerMessage::Error { reply } => Some(reply),
            _ => None,
        }
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping_with_message_id() {
        let frame = InboundFrame::parse(r#"{"type":"ping","messageId":"m-1"}"#).unwrap();
        assert_eq!(frame.request, ClientRequest::Ping);
        assert_eq!(frame.message_id.as_deref(), Some("m-1"));
    }

    #[test]
    fn test_parse_cost_batch_payload() {
        let text = r#"{
            "type": "save_cost_batch_full",
            "messageId": "42",
            "payload": {
                "projectName": "Tower A",
                "matchedItems": [{"ebkp": "C1.1", "kennwert": 50}],
                "allExcelItems": [{"ebkp": "C4.2", "chf": 300}]
            }
        }"#;
        let frame = InboundFrame::parse(text).unwrap();
        match frame.request {
            ClientRequest::SaveCostBatchFull { payload } => {
                assert_eq!(payload.project_name.as_deref(), Some("Tower A"));
                assert_eq!(payload.matched_items.len(), 1);
                assert_eq!(payload.all_excel_items[0].cost_value(), 300.0);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_keeps_header() {
        let err = InboundFrame::parse(r#"{"type":"launch_rockets","messageId":"x"}"#).unwrap_err();
        assert_eq!(err.header.kind.as_deref(), Some("launch_rockets"));
        assert_eq!(err.header.message_id.as_deref(), Some("x"));
    }

    #[test]
    fn test_missing_type_rejected() {
        let err = InboundFrame::parse(r#"{"messageId":"x"}"#).unwrap_err();
        assert!(err.reason.contains("type"));
        assert_eq!(err.header.message_id.as_deref(), Some("x"));
    }

    #[test]
    fn test_pong_has_no_payload() {
        let text = ServerMessage::Pong { message_id: None }.to_text().unwrap();
        assert_eq!(text, r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_response_echoes_message_id() {
        let msg = ServerMessage::CodeMatchingInfo {
            reply: Reply::success(Some("abc".into()), "No codes to match"),
            matches: Vec::new(),
            match_count: 0,
            element_count: 0,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_text().unwrap()).unwrap();
        assert_eq!(json["type"], "code_matching_info");
        assert_eq!(json["messageId"], "abc");
        assert_eq!(json["status"], "success");
        assert_eq!(json["matchCount"], 0);
        assert_eq!(json["matches"], serde_json::json!([]));
    }

    #[test]
    fn test_failure_matches_request_kind() {
        let msg = ServerMessage::failure(
            "delete_project_data",
            Reply::error(Some("7".into()), "projectName is required"),
        );
        let json: serde_json::Value = serde_json::from_str(&msg.to_text().unwrap()).unwrap();
        assert_eq!(json["type"], "delete_project_data_response");
        assert_eq!(json["status"], "error");
        assert_eq!(json["deletedCount"], 0);
    }

    #[test]
    fn test_kafka_status_wire() {
        let msg = ServerMessage::KafkaStatus {
            status: ProducerState::from(false),
        };
        assert_eq!(
            msg.to_text().unwrap(),
            r#"{"type":"kafka_status","status":"DISCONNECTED"}"#
        );
    }
}
