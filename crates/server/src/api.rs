//! JSON routes used by the embeddable widget and the business dashboard.
//!
//! Widget:
//! - `POST /quote/generate`                one quote exchange
//! - `POST /chats/complete`                persist a finished conversation
//!
//! Dashboard:
//! - `GET  /chats?businessId=`             active chats, newest first
//! - `GET  /chats/{id}?businessId=`        chat detail with transcript
//! - `POST /chats/{id}/delete?businessId=`  soft delete
//! - `GET  /admin/chats`                   every chat, deleted included

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use instaquote_agent::runtime::{CompleteChatRequest, QuoteAssistant, QuoteRequest};
use instaquote_core::domain::business::BusinessId;
use instaquote_core::domain::chat::{ChatId, ChatRecord, ChatSummary, Turn};
use instaquote_core::errors::{ApplicationError, InterfaceError};

#[derive(Clone)]
pub struct ApiState {
    assistant: Arc<QuoteAssistant>,
}

impl ApiState {
    pub fn new(assistant: Arc<QuoteAssistant>) -> Self {
        Self { assistant }
    }
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQuoteBody {
    pub business_id: Option<String>,
    pub message: Option<String>,
    pub chat_id: Option<String>,
    pub messages: Option<Vec<Turn>>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQuoteResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteChatBody {
    pub business_id: Option<String>,
    pub messages: Option<Vec<Turn>>,
    pub chat_id: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteChatResponse {
    pub success: bool,
    pub chat_id: String,
    pub chat_number: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessQuery {
    pub business_id: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummaryBody {
    pub id: String,
    pub business_id: String,
    pub chat_number: i64,
    pub summary: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub message_count: usize,
    pub created_at: String,
    pub is_deleted: bool,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ChatListResponse {
    pub chats: Vec<ChatSummaryBody>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDetailBody {
    pub id: String,
    pub business_id: String,
    pub chat_number: i64,
    pub summary: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub messages: Vec<Turn>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

impl From<ChatSummary> for ChatSummaryBody {
    fn from(summary: ChatSummary) -> Self {
        Self {
            id: summary.id.0,
            business_id: summary.business_id.0,
            chat_number: summary.chat_number,
            summary: summary.summary,
            contact_name: summary.contact_name,
            contact_email: summary.contact_email,
            contact_phone: summary.contact_phone,
            message_count: summary.message_count,
            created_at: summary.created_at.to_rfc3339(),
            is_deleted: summary.is_deleted,
        }
    }
}

impl From<ChatRecord> for ChatDetailBody {
    fn from(record: ChatRecord) -> Self {
        Self {
            id: record.id.0,
            business_id: record.business_id.0,
            chat_number: record.chat_number,
            summary: record.summary,
            contact_name: record.contact_name,
            contact_email: record.contact_email,
            contact_phone: record.contact_phone,
            messages: record.messages,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/quote/generate", post(generate_quote))
        .route("/chats/complete", post(complete_chat))
        .route("/chats", get(list_chats))
        .route("/chats/{id}", get(chat_detail))
        .route("/chats/{id}/delete", post(delete_chat))
        .route("/admin/chats", get(list_all_chats))
        .with_state(state)
}

fn correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn failure(error: ApplicationError, correlation_id: String) -> (StatusCode, Json<ApiError>) {
    let interface = error.into_interface(correlation_id);
    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(
            event_name = "api.request.failed",
            correlation_id = interface.correlation_id(),
            error = %interface,
            "request failed"
        );
    } else {
        warn!(
            event_name = "api.request.rejected",
            correlation_id = interface.correlation_id(),
            error = %interface,
            "request rejected"
        );
    }

    let body = ApiError {
        error: interface.user_message().to_string(),
        correlation_id: interface.correlation_id().to_string(),
    };
    (status, Json(body))
}

/// Malformed or mistyped bodies get the same error envelope as every other
/// rejected request.
fn json_body<T>(
    body: Result<Json<T>, JsonRejection>,
    correlation_id: &str,
) -> Result<T, (StatusCode, Json<ApiError>)> {
    body.map(|Json(body)| body).map_err(|rejection| {
        failure(
            ApplicationError::Validation(format!("invalid request body: {}", rejection.body_text())),
            correlation_id.to_string(),
        )
    })
}

fn required(value: Option<String>, field: &str) -> Result<String, ApplicationError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApplicationError::Validation(format!("{field} is required")))
}

fn optional_chat_id(value: Option<String>) -> Option<ChatId> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty()).map(ChatId)
}

// ---------------------------------------------------------------------------
// Widget handlers
// ---------------------------------------------------------------------------

pub async fn generate_quote(
    State(state): State<ApiState>,
    body: Result<Json<GenerateQuoteBody>, JsonRejection>,
) -> ApiResult<GenerateQuoteResponse> {
    let correlation_id = correlation_id();
    let body = json_body(body, &correlation_id)?;
    let request = required(body.business_id, "businessId")
        .and_then(|business_id| {
            Ok(QuoteRequest {
                business_id: BusinessId(business_id),
                message: required(body.message, "message")?,
                chat_id: optional_chat_id(body.chat_id),
                transcript: body.messages.unwrap_or_default(),
            })
        })
        .map_err(|e| failure(e, correlation_id.clone()))?;

    let reply = state
        .assistant
        .generate_reply(request)
        .await
        .map_err(|e| failure(e, correlation_id.clone()))?;

    Ok(Json(GenerateQuoteResponse {
        message: reply.message,
        chat_id: reply.chat_id.map(|chat_id| chat_id.0),
    }))
}

pub async fn complete_chat(
    State(state): State<ApiState>,
    body: Result<Json<CompleteChatBody>, JsonRejection>,
) -> ApiResult<CompleteChatResponse> {
    let correlation_id = correlation_id();
    let body = json_body(body, &correlation_id)?;
    let business_id =
        required(body.business_id, "businessId").map_err(|e| failure(e, correlation_id.clone()))?;

    let persisted = state
        .assistant
        .complete_chat(CompleteChatRequest {
            business_id: BusinessId(business_id),
            messages: body.messages.unwrap_or_default(),
            chat_id: optional_chat_id(body.chat_id),
        })
        .await
        .map_err(|e| failure(e, correlation_id.clone()))?;

    Ok(Json(CompleteChatResponse {
        success: true,
        chat_id: persisted.chat_id.0,
        chat_number: persisted.chat_number,
    }))
}

// ---------------------------------------------------------------------------
// Dashboard handlers
// ---------------------------------------------------------------------------

pub async fn list_chats(
    Query(query): Query<BusinessQuery>,
    State(state): State<ApiState>,
) -> ApiResult<ChatListResponse> {
    let correlation_id = correlation_id();
    let business_id =
        required(query.business_id, "businessId").map_err(|e| failure(e, correlation_id.clone()))?;

    let chats = state
        .assistant
        .list_chats(&BusinessId(business_id))
        .await
        .map_err(|e| failure(e, correlation_id.clone()))?;

    Ok(Json(ChatListResponse { chats: chats.into_iter().map(ChatSummaryBody::from).collect() }))
}

pub async fn chat_detail(
    Path(id): Path<String>,
    Query(query): Query<BusinessQuery>,
    State(state): State<ApiState>,
) -> ApiResult<ChatDetailBody> {
    let correlation_id = correlation_id();
    let business_id =
        required(query.business_id, "businessId").map_err(|e| failure(e, correlation_id.clone()))?;

    let record = state
        .assistant
        .chat_detail(&ChatId(id), &BusinessId(business_id))
        .await
        .map_err(|e| failure(e, correlation_id.clone()))?;

    Ok(Json(ChatDetailBody::from(record)))
}

pub async fn delete_chat(
    Path(id): Path<String>,
    Query(query): Query<BusinessQuery>,
    State(state): State<ApiState>,
) -> ApiResult<SuccessResponse> {
    let correlation_id = correlation_id();
    let business_id =
        required(query.business_id, "businessId").map_err(|e| failure(e, correlation_id.clone()))?;

    state
        .assistant
        .delete_chat(&ChatId(id), &BusinessId(business_id))
        .await
        .map_err(|e| failure(e, correlation_id.clone()))?;

    Ok(Json(SuccessResponse { success: true }))
}

pub async fn list_all_chats(State(state): State<ApiState>) -> ApiResult<ChatListResponse> {
    let correlation_id = correlation_id();
    let chats =
        state.assistant.list_all_chats().await.map_err(|e| failure(e, correlation_id.clone()))?;

    Ok(Json(ChatListResponse { chats: chats.into_iter().map(ChatSummaryBody::from).collect() }))
}
