//! Authentication middleware and the credential directory.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use satchel_core::config::AuthConfig;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// Truncated to MAX_TRACE_ID_LEN characters with non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    /// Get the trace ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    /// Stable user ID, recorded as the owner of everything the user uploads.
    pub id: String,
    /// May run administrative operations.
    pub admin: bool,
}

impl Principal {
    /// Require the admin flag, returning an error if absent.
    pub fn require_admin(&self) -> ApiResult<()> {
        if self.admin {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "user {} is not an administrator",
                self.id
            )))
        }
    }
}

/// Source of truth for who may upload.
#[async_trait]
pub trait CredentialDirectory: Send + Sync {
    /// Check `secret` for `identifier`. Returns `None` for unknown users and wrong secrets alike.
    async fn authenticate(&self, identifier: &str, secret: &str) -> Option<Principal>;
}

struct StaticUser {
    secret_hash: [u8; 32],
    admin: bool,
}

/// Credential directory backed by the `[[auth.users]]` configuration list.
///
/// Secrets are stored as SHA-256 digests and compared in constant time.
pub struct StaticCredentialDirectory {
    users: HashMap<String, StaticUser>,
}

impl StaticCredentialDirectory {
    /// Build the directory from configuration. Entries with an unparseable hash are skipped.
    pub fn from_config(config: &AuthConfig) -> Self {
        let mut users = HashMap::with_capacity(config.users.len());
        for user in &config.users {
            let mut secret_hash = [0u8; 32];
            if hex::decode_to_slice(&user.secret_hash, &mut secret_hash).is_err() {
                tracing::warn!(user = %user.id, "Ignoring user with invalid secret_hash");
                continue;
            }
            users.insert(
                user.id.clone(),
                StaticUser {
                    secret_hash,
                    admin: user.admin,
                },
            );
        }
        Self { users }
    }

    /// Number of configured users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are configured.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl CredentialDirectory for StaticCredentialDirectory {
    async fn authenticate(&self, identifier: &str, secret: &str) -> Option<Principal> {
        let presented = Sha256::digest(secret.as_bytes());
        let user = self.users.get(identifier)?;
        if bool::from(presented.as_slice().ct_eq(&user.secret_hash[..])) {
            Some(Principal {
                id: identifier.to_string(),
                admin: user.admin,
            })
        } else {
            None
        }
    }
}

/// Split a `Basic` Authorization header into identifier and secret.
/// The scheme name is case-insensitive.
fn extract_basic_credentials(req: &Request) -> Option<(String, String)> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    if value.len() < 6 || !value[..6].eq_ignore_ascii_case("basic ") {
        return None;
    }
    let decoded = STANDARD.decode(value[6..].trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Authentication middleware that resolves Basic credentials and sets up trace context.
///
/// Requests without valid credentials pass through without a [`Principal`];
/// handlers that need one call [`require_principal`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    if let Some((id, secret)) = extract_basic_credentials(&req) {
        match state.credentials.authenticate(&id, &secret).await {
            Some(principal) => {
                req.extensions_mut().insert(principal);
            }
            None => {
                tracing::debug!(user = %id, "Rejected credentials");
            }
        }
    }

    let response = next
        .run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str))
        .await;

    Ok(response)
}

/// Require an authenticated principal.
pub fn require_principal(req: &Request) -> ApiResult<Principal> {
    req.extensions()
        .get::<Principal>()
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
}

/// Get the trace ID from request extensions.
pub fn get_trace_id(req: &Request) -> Option<&TraceId> {
    req.extensions().get::<TraceId>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_auth(value: &str) -> Request {
        Request::builder()
            .header(AUTHORIZATION, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_trace_id_sanitized() {
        let id = TraceId::from_client("abc\ndef\u{7f}");
        assert_eq!(id.as_str(), "abcdef");

        let long = "x".repeat(500);
        assert_eq!(TraceId::from_client(&long).as_str().len(), MAX_TRACE_ID_LEN);

        assert!(!TraceId::from_client("\n\n").as_str().is_empty());
    }

    #[test]
    fn test_extract_basic_credentials() {
        let header = format!("Basic {}", STANDARD.encode("alice:s3:cret"));
        let req = request_with_auth(&header);
        assert_eq!(
            extract_basic_credentials(&req),
            Some(("alice".to_string(), "s3:cret".to_string()))
        );

        let lower = format!("basic {}", STANDARD.encode("bob:pw"));
        assert!(extract_basic_credentials(&request_with_auth(&lower)).is_some());

        assert!(extract_basic_credentials(&request_with_auth("Bearer abc")).is_none());
        assert!(extract_basic_credentials(&request_with_auth("Basic !!!")).is_none());
        let no_colon = format!("Basic {}", STANDARD.encode("alice"));
        assert!(extract_basic_credentials(&request_with_auth(&no_colon)).is_none());
    }

    #[tokio::test]
    async fn test_static_directory_authenticates() {
        let directory = StaticCredentialDirectory::from_config(&AuthConfig::for_testing());
        assert_eq!(directory.len(), 2);

        let alice = directory
            .authenticate("alice", "alice-secret")
            .await
            .unwrap();
        assert!(alice.admin);
        assert!(alice.require_admin().is_ok());

        let bob = directory.authenticate("bob", "bob-secret").await.unwrap();
        assert!(!bob.admin);
        assert!(matches!(bob.require_admin(), Err(ApiError::Forbidden(_))));

        assert!(directory.authenticate("bob", "alice-secret").await.is_none());
        assert!(directory.authenticate("carol", "bob-secret").await.is_none());
    }
}
