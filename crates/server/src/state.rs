//! Application state shared across handlers.

use crate::auth::{CredentialDirectory, StaticCredentialDirectory};
use crate::downloads::DownloadResolver;
use crate::sweeper::Sweeper;
use crate::uploads::UploadOrchestrator;
use satchel_core::config::AppConfig;
use satchel_metadata::MetadataStore;
use satchel_signer::LinkSigner;
use satchel_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Link token signer.
    pub signer: Arc<LinkSigner>,
    /// Who may upload.
    pub credentials: Arc<dyn CredentialDirectory>,
    /// Chunked and direct upload orchestration.
    pub uploads: Arc<UploadOrchestrator>,
    /// Link issuance and redemption.
    pub downloads: Arc<DownloadResolver>,
    /// Expiration sweeper.
    pub sweeper: Arc<Sweeper>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Validates the configuration and builds the link signer. Credentials
    /// come from `[[auth.users]]` unless replaced with [`Self::with_credentials`].
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Result<Self, satchel_core::Error> {
        config.validate().map_err(satchel_core::Error::Config)?;

        let signer = Arc::new(
            LinkSigner::new(config.links.secret.as_bytes())
                .map_err(|e| satchel_core::Error::Config(format!("links.secret: {e}")))?,
        );
        let credentials: Arc<dyn CredentialDirectory> =
            Arc::new(StaticCredentialDirectory::from_config(&config.auth));
        if config.auth.users.is_empty() {
            tracing::warn!("No users configured; every upload endpoint will reject requests");
        }

        let uploads = Arc::new(UploadOrchestrator::new(
            storage.clone(),
            metadata.clone(),
            config.limits.clone(),
        ));
        let downloads = Arc::new(DownloadResolver::new(
            storage.clone(),
            metadata.clone(),
            signer.clone(),
            config.links.clone(),
        ));
        let sweeper = Arc::new(Sweeper::new(storage.clone(), metadata.clone()));

        Ok(Self {
            config: Arc::new(config),
            storage,
            metadata,
            signer,
            credentials,
            uploads,
            downloads,
            sweeper,
        })
    }

    /// Replace the credential directory.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialDirectory>) -> Self {
        self.credentials = credentials;
        self
    }
}
