//! Chunked upload handlers.

use crate::auth::require_principal;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{parse_json, read_body_limited};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use satchel_core::UploadId;
use satchel_core::upload::{
    CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest, InitUploadResponse,
    PartReceipt,
};

/// POST /v1/uploads - Start a chunked upload.
pub async fn init_upload(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<InitUploadResponse>)> {
    let principal = require_principal(&req)?;
    let body: InitUploadRequest = parse_json(req.into_body()).await?;

    let response = state.uploads.init(&principal.id, &body).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// PUT /v1/uploads/{upload_id}/parts/{part_number} - Upload one part.
pub async fn upload_part(
    State(state): State<AppState>,
    Path((upload_id, part_number)): Path<(String, String)>,
    req: Request,
) -> ApiResult<Json<PartReceipt>> {
    let principal = require_principal(&req)?;
    let upload_id = UploadId::parse(&upload_id)?;
    let part_number: u32 = part_number
        .parse()
        .map_err(|_| ApiError::Validation(format!("invalid part number: {part_number}")))?;

    let data = read_body_limited(req.into_body(), state.uploads.limits().max_chunk_bytes).await?;
    let receipt = state
        .uploads
        .upload_part(&principal.id, &upload_id, part_number, data)
        .await?;
    Ok(Json(receipt))
}

/// POST /v1/uploads/{upload_id}/complete - Assemble the uploaded parts.
pub async fn complete_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CompleteUploadResponse>)> {
    let principal = require_principal(&req)?;
    let upload_id = UploadId::parse(&upload_id)?;
    let body: CompleteUploadRequest = parse_json(req.into_body()).await?;

    let response = state
        .uploads
        .complete(&principal.id, &upload_id, &body)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// DELETE /v1/uploads/{upload_id} - Abort a chunked upload.
pub async fn abort_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let principal = require_principal(&req)?;
    let upload_id = UploadId::parse(&upload_id)?;

    state.uploads.abort(&principal.id, &upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
