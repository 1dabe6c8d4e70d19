//! Administrative handlers.

use crate::auth::{get_trace_id, require_principal};
use crate::error::ApiResult;
use crate::state::AppState;
use crate::sweeper::SweepStats;
use axum::Json;
use axum::extract::{Request, State};

/// POST /v1/admin/sweep - Run the expiration sweeper now and report what it removed.
pub async fn trigger_sweep(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<SweepStats>> {
    let principal = require_principal(&req)?;
    principal.require_admin()?;

    let trace_id = get_trace_id(&req).map(|t| t.as_str().to_string());
    tracing::info!(
        user = %principal.id,
        trace_id = trace_id.as_deref().unwrap_or("-"),
        "On-demand sweep requested"
    );
    let stats = state.sweeper.run().await;
    Ok(Json(stats))
}
