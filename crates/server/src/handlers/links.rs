//! Link issuance and redemption handlers.

use crate::auth::require_principal;
use crate::downloads::{DEFAULT_CONTENT_TYPE, FileDownload, Resolved};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::parse_json;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use satchel_core::link::{IssueLinkRequest, IssueLinkResponse};
use serde::Deserialize;

/// Characters allowed unescaped in an RFC 5987 `attr-char`.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// POST /v1/links - Issue a download link for an owned file or group.
pub async fn issue_link(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<IssueLinkResponse>)> {
    let principal = require_principal(&req)?;
    let body: IssueLinkRequest = parse_json(req.into_body()).await?;

    let response = state.downloads.issue_link(&principal.id, &body).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Query parameters for link redemption.
#[derive(Debug, Default, Deserialize)]
pub struct RedeemParams {
    /// `1` or `true` asks the browser to save instead of display.
    #[serde(default)]
    pub attachment: Option<String>,
}

impl RedeemParams {
    fn wants_attachment(&self) -> bool {
        matches!(self.attachment.as_deref(), Some("1" | "true"))
    }
}

/// GET /v1/links/{token} - Redeem a link.
///
/// File links stream the content; group links return the manifest. No
/// authentication is needed or consulted.
pub async fn redeem_link(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(params): Query<RedeemParams>,
) -> ApiResult<Response> {
    match state.downloads.resolve(&token).await? {
        Resolved::File(download) => file_response(download, params.wants_attachment()),
        Resolved::Group(manifest) => Ok(Json(manifest).into_response()),
    }
}

fn file_response(download: FileDownload, attachment: bool) -> ApiResult<Response> {
    let content_type = HeaderValue::from_str(&download.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    let disposition = HeaderValue::from_str(&content_disposition(&download.name, attachment))
        .map_err(|e| ApiError::Internal(format!("content disposition: {e}")))?;
    let stream = download
        .body
        .map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, download.size)
        .header(CONTENT_DISPOSITION, disposition)
        .header(X_CONTENT_TYPE_OPTIONS, "nosniff")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(format!("failed to build response: {e}")))
}

/// Build a `Content-Disposition` value carrying the last path segment of
/// `name`, with an ASCII fallback and an RFC 5987 `filename*`.
fn content_disposition(name: &str, attachment: bool) -> String {
    let disposition = if attachment { "attachment" } else { "inline" };
    let leaf = name.rsplit('/').next().unwrap_or(name);
    let fallback: String = leaf
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(leaf, ATTR_CHAR);
    format!("{disposition}; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
