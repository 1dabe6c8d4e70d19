//! File group handlers.

use crate::auth::require_principal;
use crate::error::ApiResult;
use crate::handlers::common::parse_json;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use satchel_core::GroupId;
use satchel_core::group::{CreateGroupRequest, CreateGroupResponse};

/// POST /v1/groups - Create a file group.
pub async fn create_group(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CreateGroupResponse>)> {
    let principal = require_principal(&req)?;
    let body: CreateGroupRequest = parse_json(req.into_body()).await?;

    let response = state.uploads.create_group(&principal.id, &body).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// DELETE /v1/groups/{group_id} - Delete a group with all of its items.
pub async fn delete_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let principal = require_principal(&req)?;
    let group_id = GroupId::parse(&group_id)?;

    state.uploads.delete_group(&principal.id, &group_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
