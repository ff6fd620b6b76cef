//! Table change notifications over the realtime websocket
//!
//! The feed joins a `postgres_changes` channel for one table and reports
//! that *something* changed; the REST gateway answers each notification by
//! re-reading the whole collection.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};

/// Interval between Phoenix heartbeats
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct FeedMessage {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    message_ref: Value,
}

/// Events the feed reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedEvent {
    Change,
    Reply,
    Error,
    Close,
    Other,
}

impl FeedEvent {
    fn parse(event: &str) -> Self {
        match event {
            "postgres_changes" | "INSERT" | "UPDATE" | "DELETE" => FeedEvent::Change,
            "phx_reply" => FeedEvent::Reply,
            "phx_error" => FeedEvent::Error,
            "phx_close" => FeedEvent::Close,
            _ => FeedEvent::Other,
        }
    }
}

/// Websocket URL of the realtime endpoint for a project URL
pub fn websocket_url(base_url: &str, key: &str) -> String {
    let url = base_url
        .replace("http://", "ws://")
        .replace("https://", "wss://");
    format!("{}/realtime/v1/websocket?apikey={}&vsn=1.0.0", url, key)
}

/// Live change notifications for one table
///
/// The connection task is aborted when the feed is dropped.
pub struct ChangeFeed {
    topic: String,
    changes: mpsc::Receiver<Result<()>>,
    task: JoinHandle<()>,
}

impl ChangeFeed {
    /// Open the websocket and join the change channel of `schema.table`
    pub async fn connect(
        base_url: &str,
        key: &str,
        access_token: Option<&str>,
        schema: &str,
        table: &str,
        heartbeat: Duration,
    ) -> Result<Self> {
        let url = websocket_url(base_url, key);
        let topic = format!("realtime:{}:{}", schema, table);
        info!("Connecting change feed for {}", topic);

        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::realtime(format!("WebSocket connection failed: {}", e)))?;
        let (mut write, mut read) = stream.split();

        let join = json!({
            "topic": topic,
            "event": "phx_join",
            "payload": {
                "config": {
                    "postgres_changes": [{"event": "*", "schema": schema, "table": table}]
                },
                "access_token": access_token.unwrap_or(key),
            },
            "ref": "1",
        });
        write
            .send(Message::Text(join.to_string()))
            .await
            .map_err(|e| Error::realtime(format!("failed to join {}: {}", topic, e)))?;

        let (tx, rx) = mpsc::channel(16);
        let task_topic = topic.clone();
        let task = tokio::spawn(async move {
            let mut next_ref: u64 = 2;
            let mut ticker = tokio::time::interval(heartbeat);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    msg = read.next() => {
                        let text = match msg {
                            Some(Ok(Message::Text(text))) => text,
                            Some(Ok(Message::Close(frame))) => {
                                debug!("Change feed {} closed by server: {:?}", task_topic, frame);
                                break;
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                error!("Change feed {} read error: {}", task_topic, e);
                                let _ = tx.send(Err(Error::realtime(e))).await;
                                break;
                            }
                            None => {
                                debug!("Change feed {} stream ended", task_topic);
                                break;
                            }
                        };

                        let message: FeedMessage = match serde_json::from_str(&text) {
                            Ok(message) => message,
                            Err(e) => {
                                warn!("Ignoring unparseable feed message: {} ({})", text, e);
                                continue;
                            }
                        };
                        if message.topic != task_topic {
                            trace!("Feed message for {} ignored", message.topic);
                            continue;
                        }

                        match FeedEvent::parse(&message.event) {
                            FeedEvent::Change => {
                                trace!("Change on {}", task_topic);
                                if tx.send(Ok(())).await.is_err() {
                                    break;
                                }
                            }
                            FeedEvent::Reply => {
                                let status = message.payload["status"].as_str().unwrap_or("ok");
                                if status != "ok" {
                                    let reason = message.payload["response"].to_string();
                                    warn!("Join of {} rejected: {}", task_topic, reason);
                                    let _ = tx.send(Err(Error::realtime(format!("join rejected: {}", reason)))).await;
                                    break;
                                }
                                debug!("Reply on {} (ref {})", task_topic, message.message_ref);
                            }
                            FeedEvent::Error | FeedEvent::Close => {
                                warn!("Channel {} ended with {}", task_topic, message.event);
                                let _ = tx.send(Err(Error::realtime(format!("channel {}", message.event)))).await;
                                break;
                            }
                            FeedEvent::Other => {}
                        }
                    }
                    _ = ticker.tick() => {
                        let beat = json!({
                            "topic": "phoenix",
                            "event": "heartbeat",
                            "payload": {},
                            "ref": next_ref.to_string(),
                        });
                        next_ref += 1;
                        if let Err(e) = write.send(Message::Text(beat.to_string())).await {
                            error!("Failed to send heartbeat on {}: {}", task_topic, e);
                            let _ = tx.send(Err(Error::realtime(e))).await;
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            topic,
            changes: rx,
            task,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next change; `None` once the connection is gone
    pub async fn next_change(&mut self) -> Option<Result<()>> {
        self.changes.recv().await
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_switches_scheme() {
        assert_eq!(
            websocket_url("https://db.example.com", "anon"),
            "wss://db.example.com/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
        assert!(websocket_url("http://localhost:54321", "k").starts_with("ws://localhost:54321/"));
    }

    #[test]
    fn change_events_are_recognised() {
        assert_eq!(FeedEvent::parse("postgres_changes"), FeedEvent::Change);
        assert_eq!(FeedEvent::parse("UPDATE"), FeedEvent::Change);
        assert_eq!(FeedEvent::parse("phx_reply"), FeedEvent::Reply);
        assert_eq!(FeedEvent::parse("presence_state"), FeedEvent::Other);
    }

    #[tokio::test]
    async fn connect_to_unreachable_host_fails() {
        let result = ChangeFeed::connect(
            "http://127.0.0.1:1",
            "anon",
            None,
            "public",
            "contacts",
            HEARTBEAT_INTERVAL,
        )
        .await;
        assert!(matches!(result, Err(Error::Realtime(_))));
    }
}
