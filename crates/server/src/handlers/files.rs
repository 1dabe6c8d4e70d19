//! Single-request upload and file deletion handlers.

use crate::auth::require_principal;
use crate::error::ApiResult;
use crate::handlers::common::read_body_limited;
use crate::state::AppState;
use crate::uploads::DirectUpload;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use satchel_core::FileId;
use satchel_core::upload::CompleteUploadResponse;

/// POST /v1/files?name=&content_type=&group_id=&expires_in= - Upload a file in one request.
///
/// The body is the file content. Without a `content_type` parameter the
/// request's own `Content-Type` header is recorded.
pub async fn upload_file(
    State(state): State<AppState>,
    Query(mut params): Query<DirectUpload>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CompleteUploadResponse>)> {
    let principal = require_principal(&req)?;
    if params.content_type.is_none() {
        params.content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    let data = read_body_limited(req.into_body(), state.uploads.limits().max_direct_bytes).await?;
    let response = state
        .uploads
        .put_direct(&principal.id, &params, data)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// DELETE /v1/files/{file_id} - Delete a file and its content.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let principal = require_principal(&req)?;
    let file_id = FileId::parse(&file_id)?;

    state.uploads.delete_file(&principal.id, &file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
