//! Wiring of the session store and API client.
//!
//! An `AppContext` is built once at startup; presentation code holds it and
//! hands out the `SessionStore` and `ApiClient` it owns.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::api::{http_client, ApiClient};
use crate::auth::{SessionStorage, SessionStore};
use crate::config::Config;

pub struct AppContext {
    pub config: Config,
    pub session: Arc<SessionStore>,
    pub api: ApiClient,
}

impl AppContext {
    /// Build the context with the storage backend named in `config`.
    pub async fn from_config(config: Config) -> Result<Self> {
        let storage = config.session_storage()?;
        Self::with_storage(config, storage).await
    }

    /// Build the context over an explicit storage backend and restore the
    /// previous session from it.
    pub async fn with_storage(config: Config, storage: Box<dyn SessionStorage>) -> Result<Self> {
        let client = http_client(config.request_timeout_secs())?;
        let base_url = config.base_url();
        debug!(base_url = %base_url, storage = ?config.storage, "Building app context");

        let session = Arc::new(SessionStore::new(client.clone(), base_url.clone(), storage));
        match session.restore().await {
            Ok(found) => debug!(found, "Session restore finished"),
            Err(e) => warn!(error = %e, "Failed to restore session, starting logged out"),
        }

        let api = ApiClient::new(client, base_url, Arc::clone(&session));
        Ok(Self {
            config,
            session,
            api,
        })
    }
}
