//! WebSocket client for the hub's live telemetry stream

use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Message, client::IntoClientRequest},
};
use tracing::{debug, error, info};

use crate::actors::messages::HubEvent;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// What a stream subscriber sees
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    Connected,
    Disconnected(String),
    Hub(HubEvent),
}

/// Turn an API base URL into the stream URL, appending the token if any
pub fn stream_url(api_url: &str, auth_token: Option<&str>) -> String {
    // Convert http:// to ws:// and https:// to wss://
    let ws_url = api_url
        .trim_end_matches('/')
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);

    match auth_token {
        Some(token) => format!("{ws_url}/api/v1/stream?token={token}"),
        None => format!("{ws_url}/api/v1/stream"),
    }
}

/// Streams hub events, reconnecting on every disconnect
pub struct LiveStreamClient {
    url: String,
}

impl LiveStreamClient {
    pub fn new(api_url: &str, auth_token: Option<&str>) -> Self {
        Self {
            url: stream_url(api_url, auth_token),
        }
    }

    /// Start streaming in the background
    ///
    /// The stream stops once the returned receiver is dropped.
    pub fn connect(self) -> mpsc::UnboundedReceiver<ViewerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(tx));
        rx
    }

    async fn run(self, tx: mpsc::UnboundedSender<ViewerEvent>) {
        loop {
            info!("Connecting to live stream");

            let reason = match self.connect_once(&tx).await {
                Ok(()) => "stream ended".to_string(),
                Err(e) => {
                    error!("live stream error: {e:#}");
                    format!("{e:#}")
                }
            };

            if tx.send(ViewerEvent::Disconnected(reason)).is_err() {
                debug!("stream receiver dropped, stopping");
                return;
            }

            info!("reconnecting in {}s", RECONNECT_DELAY.as_secs());
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn connect_once(&self, tx: &mpsc::UnboundedSender<ViewerEvent>) -> Result<()> {
        let request = self
            .url
            .as_str()
            .into_client_request()
            .context("Failed to create WebSocket request")?;

        let (ws_stream, _) = connect_async(request)
            .await
            .context("Failed to connect to live stream")?;

        info!("live stream connected");
        if tx.send(ViewerEvent::Connected).is_err() {
            return Ok(());
        }

        let (mut write, mut read) = ws_stream.split();

        // Keep proxies from timing out idle connections
        let ping_task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(PING_INTERVAL).await;
                if write.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
            }
        });

        let result = async {
            while let Some(msg) = read.next().await {
                match msg.context("WebSocket message error")? {
                    Message::Text(text) => match serde_json::from_str::<HubEvent>(&text) {
                        Ok(event) => {
                            if tx.send(ViewerEvent::Hub(event)).is_err() {
                                break;
                            }
                        }
                        Err(e) => error!("Failed to parse hub event: {e}\nRaw JSON: {text}"),
                    },
                    Message::Close(_) => {
                        info!("live stream closed by server");
                        break;
                    }
                    _ => {}
                }
            }
            Ok(())
        }
        .await;

        ping_task.abort();
        result
    }
}
