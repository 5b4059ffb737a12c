use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::cache::{CacheCoordinator, CacheKey};
use crate::config::Endpoints;
use crate::error::{AppError, Result, require_id};

/// Plain JSON reads against the REST API, each bounded by `timeout`.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    endpoints: Endpoints,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(client: reqwest::Client, endpoints: Endpoints, timeout: Duration) -> Self {
        Self {
            client,
            endpoints,
            timeout,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.endpoints.api(segments)?;
        self.get_url(url).await
    }

    pub async fn get_url<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        log::debug!("GET {}", url);

        let request = async {
            let response = self
                .client
                .get(url.clone())
                .header(ACCEPT, HeaderValue::from_static("application/json"))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(AppError::transport(format!(
                    "GET {} failed with HTTP {}",
                    url.path(),
                    status.as_u16()
                )));
            }
            Ok(response.json::<T>().await?)
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(AppError::timeout(url.path(), self.timeout.as_secs())),
        }
    }

    /// Reads a case through the cache.
    pub async fn case(&self, cache: &CacheCoordinator, case_id: &str) -> Result<Value> {
        let case_id = require_id("case id", case_id)?;
        let url = self.endpoints.api(&["cases", case_id])?;
        cache
            .fetch(&CacheKey::case(case_id), || self.get_url(url))
            .await
    }

    pub async fn strategies(&self, cache: &CacheCoordinator, case_id: &str) -> Result<Value> {
        let case_id = require_id("case id", case_id)?;
        let url = self.endpoints.api(&["cases", case_id, "strategies"])?;
        cache
            .fetch(&CacheKey::strategies(case_id), || self.get_url(url))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn client() -> ApiClient {
        let endpoints = Endpoints::new("http://127.0.0.1:9", "api/v1", None).unwrap();
        ApiClient::new(reqwest::Client::new(), endpoints, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_blank_case_id_is_rejected_before_request() {
        let cache = CacheCoordinator::default();
        let err = client().case(&cache, "   ").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingIdentifier);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_fresh_entry_is_served_without_request() {
        let cache = CacheCoordinator::default();
        cache.set(CacheKey::case("c1"), serde_json::json!({"id": "c1"}));
        let value = client().case(&cache, "c1").await.unwrap();
        assert_eq!(value["id"], "c1");
    }
}
