//! Per-connection reader and writer tasks

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

use super::{Hub, HubConfig, Registration};

impl Hub {
    /// Serve one upgraded socket until it closes, misses its pong deadline
    /// or gets evicted.
    pub async fn handle(self: Arc<Self>, socket: WebSocket, tenant_id: String, user_id: String) {
        let registration = match self.register(&tenant_id, &user_id).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(tenant_id = %tenant_id, "Refusing WebSocket client: {}", e);
                return;
            }
        };
        let Registration {
            client_id,
            events,
            evicted,
        } = registration;

        let (sink, mut stream) = socket.split();
        let writer_done = CancellationToken::new();
        let writer = tokio::spawn(write_loop(
            sink,
            events,
            evicted.clone(),
            writer_done.clone(),
            self.config().clone(),
            client_id.clone(),
        ));

        let pong_timeout = self.config().pong_timeout;
        let mut deadline = Instant::now() + pong_timeout;
        loop {
            tokio::select! {
                _ = evicted.cancelled() => break,
                _ = writer_done.cancelled() => break,
                _ = sleep_until(deadline) => {
                    tracing::info!(client_id = %client_id, "WebSocket pong deadline missed");
                    break;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Pong(_))) => deadline = Instant::now() + pong_timeout,
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(client_id = %client_id, "Ignoring client frame: {}", text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(client_id = %client_id, "WebSocket read error: {}", e);
                        break;
                    }
                },
            }
        }

        self.unregister(&client_id);
        evicted.cancel();
        let _ = writer.await;
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: tokio::sync::mpsc::Receiver<Arc<crate::models::WsEvent>>,
    evicted: CancellationToken,
    done: CancellationToken,
    config: HubConfig,
    client_id: String,
) {
    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);

    loop {
        let outgoing = tokio::select! {
            biased;
            _ = evicted.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => match serde_json::to_string(event.as_ref()) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        tracing::error!(client_id = %client_id, "Failed to encode event: {}", e);
                        continue;
                    }
                },
                None => break,
            },
            _ = ping.tick() => Message::Ping(Default::default()),
        };

        match timeout(config.write_timeout, sink.send(outgoing)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(client_id = %client_id, "WebSocket write failed: {}", e);
                break;
            }
            Err(_) => {
                tracing::info!(client_id = %client_id, "WebSocket write deadline exceeded");
                break;
            }
        }
    }

    // Pending events for this client are dropped with the receiver.
    let _ = timeout(config.write_timeout, sink.send(Message::Close(None))).await;
    done.cancel();
}
