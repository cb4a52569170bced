/// JSON RPC surface of the agent
///
/// Write failures are reported as `InvalidArgument` and read failures as
/// `NotFound`, whatever their underlying cause.
use crate::{
    context::AppContext,
    error::{AgentError, AgentResult, ErrorResponse},
    handler::ProcessRequest,
    ledger::AccountInformation,
    storage::QueryRequest,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error status of an RPC call
#[derive(Debug)]
pub struct RpcStatus {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl RpcStatus {
    pub fn invalid_argument(err: impl fmt::Display) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "InvalidArgument",
            message: err.to_string(),
        }
    }

    pub fn not_found(err: impl fmt::Display) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NotFound",
            message: err.to_string(),
        }
    }
}

impl IntoResponse for RpcStatus {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.code.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub ok: bool,
    /// Storage locator, may be empty
    pub identifier: String,
}

/// Stored record as JSON-encoded bytes (base64 on the wire)
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(with = "crate::ticket::bytes")]
    pub document: Vec<u8>,
    #[serde(with = "crate::ticket::bytes")]
    pub proof: Vec<u8>,
    #[serde(with = "crate::ticket::bytes")]
    pub document_metadata: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountInformationRequest {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TxParametersResponse {
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TxSubmitRequest {
    /// Signed transaction
    #[serde(with = "crate::ticket::bytes")]
    pub stx: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TxSubmitResponse {
    pub id: String,
}

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/process", post(process))
        .route("/v1/query", post(query))
        .route("/v1/account/information", post(account_information))
        .route("/v1/tx/params", get(tx_parameters))
        .route("/v1/tx/submit", post(tx_submit))
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse { ok: true })
}

async fn process(
    State(ctx): State<AppContext>,
    req: Result<Json<ProcessRequest>, JsonRejection>,
) -> Result<Json<ProcessResponse>, RpcStatus> {
    let Json(req) = req.map_err(|e| RpcStatus::invalid_argument(e.body_text()))?;
    let identifier = ctx
        .handler
        .process(&req)
        .await
        .map_err(RpcStatus::invalid_argument)?;

    Ok(Json(ProcessResponse {
        ok: true,
        identifier,
    }))
}

async fn query(
    State(ctx): State<AppContext>,
    req: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, RpcStatus> {
    let Json(req) = req.map_err(|e| RpcStatus::not_found(e.body_text()))?;
    let (id, proof) = ctx
        .handler
        .retrieve(&req)
        .await
        .map_err(RpcStatus::not_found)?;

    let encode = |value: serde_json::Result<Vec<u8>>| {
        value.map_err(|e| RpcStatus::not_found(AgentError::Internal(e.to_string())))
    };
    Ok(Json(QueryResponse {
        document: encode(serde_json::to_vec(&id.document(true)))?,
        proof: encode(serde_json::to_vec(&proof))?,
        document_metadata: encode(serde_json::to_vec(id.metadata()))?,
    }))
}

async fn account_information(
    State(ctx): State<AppContext>,
    Json(req): Json<AccountInformationRequest>,
) -> AgentResult<Json<AccountInformation>> {
    Ok(Json(ctx.handler.account_information(&req.address).await?))
}

async fn tx_parameters(State(ctx): State<AppContext>) -> AgentResult<Json<TxParametersResponse>> {
    let params = ctx.handler.tx_parameters().await?;
    Ok(Json(TxParametersResponse { params }))
}

async fn tx_submit(
    State(ctx): State<AppContext>,
    Json(req): Json<TxSubmitRequest>,
) -> AgentResult<Json<TxSubmitResponse>> {
    let id = ctx.handler.tx_submit(&req.stx).await?;
    Ok(Json(TxSubmitResponse { id }))
}
