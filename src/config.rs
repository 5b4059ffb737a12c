use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{AppError, ErrorContext, Result};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints: Endpoints,
    pub request_timeout: Duration,
    pub stream_max_retries: u32,
    pub cache_dir: PathBuf,
    pub cache_buster: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_base = std::env::var("API_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());
        let api_root = std::env::var("API_ROOT").unwrap_or_else(|_| "api/v1".to_string());
        let ws_base = std::env::var("WS_BASE_URL").ok();

        Ok(Self {
            endpoints: Endpoints::new(&api_base, &api_root, ws_base.as_deref())?,
            request_timeout: Duration::from_secs(
                std::env::var("REQUEST_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .map_err(|e| AppError::config(format!("REQUEST_TIMEOUT_SECS: {}", e)))?,
            ),
            stream_max_retries: std::env::var("STREAM_MAX_RETRIES")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .map_err(|e| AppError::config(format!("STREAM_MAX_RETRIES: {}", e)))?,
            cache_dir: std::env::var("CACHE_DIR")
                .unwrap_or_else(|_| ".casewatch".to_string())
                .into(),
            cache_buster: std::env::var("CACHE_BUSTER")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
        })
    }
}

// ============================================================================
// Endpoints
// ============================================================================

/// Builds the streaming and push URLs for one backend deployment.
#[derive(Debug, Clone)]
pub struct Endpoints {
    api_base: Url,
    api_root: Vec<String>,
    ws_base: Url,
}

impl Endpoints {
    pub fn new(api_base: &str, api_root: &str, ws_base: Option<&str>) -> Result<Self> {
        let api_base = Url::parse(api_base).context("API_BASE_URL")?;
        let ws_base = match ws_base {
            Some(ws) => Url::parse(ws).context("WS_BASE_URL")?,
            None => derive_ws_base(&api_base)?,
        };
        let api_root = api_root
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            api_base,
            api_root,
            ws_base,
        })
    }

    /// `/<api-root>/cases/{caseId}/run-stage-stream/{stage}[?refresh=true]`
    pub fn stage_stream(&self, case_id: &str, stage: &str, refresh: bool) -> Result<Url> {
        let mut url = self.api(&["cases", case_id, "run-stage-stream", stage])?;
        if refresh {
            url.query_pairs_mut().append_pair("refresh", "true");
        }
        Ok(url)
    }

    /// Plain REST resource under the API root, e.g. `["cases", id]`.
    pub fn api(&self, segments: &[&str]) -> Result<Url> {
        let root: Vec<&str> = self.api_root.iter().map(String::as_str).collect();
        join_segments(&self.api_base, root.iter().chain(segments.iter()).copied())
    }

    pub fn case_socket(&self, case_id: &str) -> Result<Url> {
        join_segments(&self.ws_base, ["ws", "cases", case_id])
    }

    pub fn notifications_socket(&self) -> Result<Url> {
        join_segments(&self.ws_base, ["ws", "notifications"])
    }
}

fn derive_ws_base(api_base: &Url) -> Result<Url> {
    let scheme = match api_base.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    let mut ws = api_base.clone();
    ws.set_scheme(scheme)
        .map_err(|_| AppError::config(format!("cannot derive ws url from {}", api_base)))?;
    Ok(ws)
}

fn join_segments<'a>(base: &Url, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| AppError::config(format!("{} cannot be a base url", base)))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    Ok(url)
}
