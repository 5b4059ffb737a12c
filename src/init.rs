use std::sync::Arc;

use crate::api::ApiClient;
use crate::cache::{CacheCoordinator, CachePersister, FileStore};
use crate::cancel::RequestManager;
use crate::config::Config;
use crate::error::Result;
use crate::push::{PushHub, WsPushTransport};
use crate::stream::{HttpStreamTransport, RetryPolicy, StreamSession, StreamTransport};

// ============================================================================
// Application State
// ============================================================================

/// Everything a running client shares: one cache, one push hub, one
/// HTTP client behind both the REST and streaming paths.
pub struct AppState {
    pub config: Config,
    pub cache: Arc<CacheCoordinator>,
    pub persister: Arc<CachePersister>,
    pub api: ApiClient,
    pub stream_transport: Arc<dyn StreamTransport>,
    pub push: PushHub,
    pub requests: RequestManager,
}

impl AppState {
    /// A session wired to the shared cache so terminal states invalidate it.
    pub fn stream_session(&self) -> StreamSession {
        let policy = RetryPolicy {
            max_retries: self.config.stream_max_retries,
            ..RetryPolicy::default()
        };
        StreamSession::build(
            self.stream_transport.clone(),
            self.config.endpoints.clone(),
            policy,
            Some(self.cache.clone()),
        )
    }
}

pub async fn app_init() -> Result<Arc<AppState>> {
    let config = Config::from_env()?;
    log::info!("✅ Configuration loaded");
    log::info!("🌍 API: {}", config.endpoints.api(&[])?);

    let client = setup_http_client()?;

    log::info!("💾 Restoring cache from {}...", config.cache_dir.display());
    let cache = Arc::new(CacheCoordinator::default());
    let persister = Arc::new(CachePersister::new(
        Arc::new(FileStore::new(&config.cache_dir)),
        config.cache_buster.clone(),
    ));
    persister.restore(&cache)?;

    let state = Arc::new(AppState {
        api: ApiClient::new(
            client.clone(),
            config.endpoints.clone(),
            config.request_timeout,
        ),
        stream_transport: Arc::new(HttpStreamTransport::new(client)),
        push: PushHub::new(Arc::new(WsPushTransport), config.endpoints.clone()),
        requests: RequestManager::new(),
        cache,
        persister,
        config,
    });
    Ok(state)
}

// ============================================================================
// Setup Functions
// ============================================================================

fn setup_http_client() -> Result<reqwest::Client> {
    // No overall timeout: stage streams stay open for minutes.
    Ok(reqwest::Client::builder()
        .user_agent(concat!("casewatch/", env!("CARGO_PKG_VERSION")))
        .build()?)
}
