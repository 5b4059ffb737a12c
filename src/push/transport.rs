use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::{AppError, Result};

pub type FrameStream = BoxStream<'static, Result<String>>;

/// An open duplex connection: inbound text frames plus an outbound queue.
pub struct PushConnection {
    pub frames: FrameStream,
    pub outgoing: mpsc::Sender<String>,
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<PushConnection>;
}

// ============================================================================
// WebSocket transport
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct WsPushTransport;

#[async_trait]
impl PushTransport for WsPushTransport {
    async fn connect(&self, url: &Url) -> Result<PushConnection> {
        log::info!("Connecting to WebSocket: {}", url);
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let (outgoing, mut rx) = mpsc::channel::<String>(32);
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = write.send(Message::text(text)).await {
                    log::warn!("WebSocket send failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let frames = async_stream::stream! {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => yield Ok(text.as_str().to_owned()),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => yield Ok(text),
                        Err(_) => log::warn!("Dropping non UTF-8 binary frame"),
                    },
                    Ok(Message::Close(_)) => {
                        log::info!("WebSocket closed by server");
                        break;
                    }
                    // Ping/pong are answered by tungstenite
                    Ok(_) => {}
                    Err(e) => {
                        yield Err(AppError::from(e));
                        break;
                    }
                }
            }
        };

        Ok(PushConnection {
            frames: frames.boxed(),
            outgoing,
        })
    }
}
