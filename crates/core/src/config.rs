//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the ambient AWS credential chain if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to the ambient AWS credential chain if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (e.g., `endpoint/bucket/key` instead of `bucket.endpoint/key`).
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("s3 config requires a bucket name".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        /// Logs warnings for queries exceeding this duration.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// Upload size ceilings and session lifetime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest single part accepted by the chunked upload path.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: u64,
    /// Largest body accepted by the single-request upload path.
    #[serde(default = "default_max_direct_bytes")]
    pub max_direct_bytes: u64,
    /// Largest declared size accepted when starting a chunked upload.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Seconds an unfinished chunked upload is kept before the sweeper reaps it.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_max_chunk_bytes() -> u64 {
    crate::DEFAULT_MAX_CHUNK_BYTES
}

fn default_max_direct_bytes() -> u64 {
    crate::DEFAULT_MAX_DIRECT_BYTES
}

fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024 * 1024 // 100 GiB
}

fn default_session_ttl_secs() -> u64 {
    86400 // 24 hours
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: default_max_chunk_bytes(),
            max_direct_bytes: default_max_direct_bytes(),
            max_file_bytes: default_max_file_bytes(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl LimitsConfig {
    /// Validate limit invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_bytes == 0 || self.max_direct_bytes == 0 {
            return Err("limits.max_chunk_bytes and limits.max_direct_bytes must be > 0".to_string());
        }
        if self.session_ttl_secs == 0 || self.session_ttl_secs > i64::MAX as u64 {
            return Err(format!(
                "limits.session_ttl_secs {} must be between 1 and {}",
                self.session_ttl_secs,
                i64::MAX
            ));
        }
        Ok(())
    }
}

/// Minimum accepted length of the link signing secret.
pub const MIN_LINK_SECRET_LEN: usize = 32;

/// Download link signing configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct LinksConfig {
    /// HMAC secret for link tokens. Rotating it invalidates every outstanding link.
    /// WARNING: Prefer the SATCHEL_LINKS__SECRET env var over storing it in config.
    pub secret: String,
    /// Lifetime of the per-item tokens minted for group manifests.
    #[serde(default = "default_group_item_ttl_secs")]
    pub group_item_ttl_secs: u64,
    /// Upper bound applied to requested link lifetimes.
    #[serde(default = "default_max_ttl_secs")]
    pub max_ttl_secs: u64,
}

fn default_group_item_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_max_ttl_secs() -> u64 {
    crate::PERMANENT_LINK_TTL_SECS
}

impl fmt::Debug for LinksConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinksConfig")
            .field("secret", &"[REDACTED]")
            .field("group_item_ttl_secs", &self.group_item_ttl_secs)
            .field("max_ttl_secs", &self.max_ttl_secs)
            .finish()
    }
}

impl LinksConfig {
    /// Create a test configuration with a fixed secret.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            secret: "test-link-secret-0123456789abcdef0123456789".to_string(),
            group_item_ttl_secs: default_group_item_ttl_secs(),
            max_ttl_secs: default_max_ttl_secs(),
        }
    }

    /// Validate link configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.len() < MIN_LINK_SECRET_LEN {
            return Err(format!(
                "links.secret must be at least {MIN_LINK_SECRET_LEN} bytes"
            ));
        }
        if self.group_item_ttl_secs == 0 || self.max_ttl_secs == 0 {
            return Err("links.group_item_ttl_secs and links.max_ttl_secs must be > 0".to_string());
        }
        if self.max_ttl_secs > i64::MAX as u64 {
            return Err(format!(
                "links.max_ttl_secs {} exceeds maximum value {}",
                self.max_ttl_secs,
                i64::MAX
            ));
        }
        Ok(())
    }
}

/// Expiration sweeper configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Run the sweeper on a timer inside the server process.
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,
    /// Interval in seconds between runs (default: 1 day).
    #[serde(default = "default_sweeper_interval_secs")]
    pub interval_secs: u64,
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_sweeper_interval_secs() -> u64 {
    86400 // 24 hours
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_secs: default_sweeper_interval_secs(),
        }
    }
}

impl SweeperConfig {
    /// Get the run interval as a std::time::Duration.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    /// Validate sweeper configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.interval_secs == 0 {
            return Err("sweeper.interval_secs cannot be 0 when the sweeper is enabled".to_string());
        }
        Ok(())
    }
}

/// A principal allowed to upload and manage files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserConfig {
    /// Login identifier; also used as the owner ID on records.
    pub id: String,
    /// SHA256 hex of the user's secret (64 characters).
    /// Generate with: `echo -n "your-secret" | sha256sum`
    pub secret_hash: String,
    /// May trigger administrative operations such as an on-demand sweep.
    #[serde(default)]
    pub admin: bool,
}

/// Credential directory configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Known users.
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl AuthConfig {
    /// Create a test configuration with two users: `alice` (admin) and `bob`.
    ///
    /// **For testing only.** Secrets are `alice-secret` and `bob-secret`.
    pub fn for_testing() -> Self {
        Self {
            users: vec![
                UserConfig {
                    id: "alice".to_string(),
                    // SHA256 of "alice-secret"
                    secret_hash: "0c848abb03307b06cf70cd4e29c157dc81af5e94ab3eb1d0c59a120269572376"
                        .to_string(),
                    admin: true,
                },
                UserConfig {
                    id: "bob".to_string(),
                    // SHA256 of "bob-secret"
                    secret_hash: "9f03ef1533a68d2f506f81ef463c1183a82a6bd40e45613f36e6fe1889cf1b99"
                        .to_string(),
                    admin: false,
                },
            ],
        }
    }

    /// Validate user entries.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for user in &self.users {
            if user.id.is_empty()
                || !user
                    .id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            {
                return Err(format!(
                    "auth.users id {:?} must be non-empty and use only [A-Za-z0-9._-]",
                    user.id
                ));
            }
            if user.secret_hash.len() != 64
                || !user.secret_hash.chars().all(|c| c.is_ascii_hexdigit())
            {
                return Err(format!(
                    "auth.users[{}].secret_hash must be 64 hex characters",
                    user.id
                ));
            }
            if !seen.insert(user.id.as_str()) {
                return Err(format!("auth.users id {} is listed twice", user.id));
            }
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Upload limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Link signing configuration (required).
    pub links: LinksConfig,
    /// Expiration sweeper configuration.
    #[serde(default)]
    pub sweeper: SweeperConfig,
    /// Users allowed to upload.
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// a fixed link secret, and the test users from [`AuthConfig::for_testing`].
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            limits: LimitsConfig::default(),
            links: LinksConfig::for_testing(),
            sweeper: SweeperConfig {
                enabled: false,
                ..SweeperConfig::default()
            },
            auth: AuthConfig::for_testing(),
        }
    }

    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.limits.validate()?;
        self.links.validate()?;
        self.sweeper.validate()?;
        self.auth.validate()?;
        Ok(())
    }
}
