use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderValue};
use url::Url;

use crate::error::{AppError, Result};

/// Body of a streamed response, chunk by chunk as the network delivers it.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Opens one streamed request. Failures here are transport-level.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, url: &Url) -> Result<ByteStream>;
}

// ============================================================================
// HTTP transport
// ============================================================================

#[derive(Clone)]
pub struct HttpStreamTransport {
    client: reqwest::Client,
}

impl HttpStreamTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    async fn open(&self, url: &Url) -> Result<ByteStream> {
        log::debug!("📡 POST {}", url);
        let response = self
            .client
            .post(url.clone())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::transport(format!(
                "stream request failed with HTTP {}",
                status.as_u16()
            ))
            .with_details(serde_json::json!({ "body": body })));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(AppError::from))
            .boxed())
    }
}
