//! Realtime websocket client.
//!
//! One websocket carries every joined channel. A background task owns the
//! socket: it writes queued frames, sends the heartbeat, and routes incoming
//! change events to the channel router by topic. When the socket closes the
//! task closes every channel and exits; nothing reconnects automatically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use lc_core::constants;
use lc_core::error::{LcError, LcResult};

use crate::events::{ChannelRouter, ChannelSpec, ConnectionState, RealtimeChannel};
use crate::protocol::{self, Frame};

/// Websocket client for the realtime change feed.
pub struct RealtimeClient {
    /// Full websocket URL including api key and protocol version.
    endpoint: String,
    heartbeat: Duration,
    router: Arc<ChannelRouter>,
    access_token: Mutex<Option<String>>,
    /// Frames queued for the socket task. `None` while disconnected.
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    io_task: Mutex<Option<JoinHandle<()>>>,
    next_ref: Arc<AtomicU64>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl RealtimeClient {
    /// Create a client for the given websocket endpoint. Does not connect.
    pub fn new(endpoint: impl Into<String>, heartbeat: Duration) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            endpoint: endpoint.into(),
            heartbeat,
            router: Arc::new(ChannelRouter::new()),
            access_token: Mutex::new(None),
            outgoing: Mutex::new(None),
            io_task: Mutex::new(None),
            next_ref: Arc::new(AtomicU64::new(1)),
            state_tx: Arc::new(state_tx),
        }
    }

    /// Build the websocket endpoint for a backend project URL.
    ///
    /// `https://x.supabase.co` becomes
    /// `wss://x.supabase.co/realtime/v1/websocket?apikey=<key>&vsn=1.0.0`.
    pub fn endpoint_for(project_url: &str, api_key: &str) -> LcResult<String> {
        let base = project_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(LcError::Config(format!("backend url has no http(s) scheme: {project_url}")));
        };
        Ok(format!(
            "{ws_base}/realtime/v1/websocket?apikey={api_key}&vsn={}",
            constants::REALTIME_VSN
        ))
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.router.len()
    }

    fn set_state(state_tx: &watch::Sender<ConnectionState>, new_state: ConnectionState) {
        let old = state_tx.send_replace(new_state);
        if old != new_state {
            info!("realtime state: {old} -> {new_state}");
        }
    }

    fn next_ref(&self) -> u64 {
        self.next_ref.fetch_add(1, Ordering::Relaxed)
    }

    /// Open the websocket if it is not already open.
    pub async fn connect(&self) -> LcResult<()> {
        let mut outgoing = self.outgoing.lock().await;
        if outgoing.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Ok(());
        }

        Self::set_state(&self.state_tx, ConnectionState::Connecting);
        let (ws, _response) = match tokio_tungstenite::connect_async(self.endpoint.as_str()).await {
            Ok(pair) => pair,
            Err(e) => {
                Self::set_state(&self.state_tx, ConnectionState::Failed);
                return Err(LcError::Realtime(format!("connect failed: {e}")));
            }
        };
        Self::set_state(&self.state_tx, ConnectionState::Connected);

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            ws,
            rx,
            self.heartbeat,
            Arc::clone(&self.router),
            Arc::clone(&self.next_ref),
            Arc::clone(&self.state_tx),
        ));

        *outgoing = Some(tx);
        if let Some(previous) = self.io_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn send(&self, frame: Frame) -> LcResult<()> {
        let text = frame.encode()?;
        let outgoing = self.outgoing.lock().await;
        let tx = outgoing
            .as_ref()
            .ok_or_else(|| LcError::Realtime("socket not connected".into()))?;
        tx.send(text)
            .map_err(|_| LcError::Realtime("socket closed".into()))
    }

    /// Join a channel, connecting first if needed.
    pub async fn subscribe(&self, spec: ChannelSpec) -> LcResult<RealtimeChannel> {
        self.connect().await?;

        let token = self.access_token.lock().await.clone();
        let join = protocol::join(&spec, self.next_ref(), token.as_deref());
        let topic = spec.topic.clone();
        let channel = self.router.open(spec);

        if let Err(e) = self.send(join).await {
            self.router.close(&topic);
            return Err(e);
        }
        debug!("joined realtime channel {topic}");
        Ok(channel)
    }

    /// Leave a channel. Returns whether it was open.
    pub async fn unsubscribe(&self, topic: &str) -> LcResult<bool> {
        if !self.router.close(topic) {
            return Ok(false);
        }
        if self.state() == ConnectionState::Connected {
            self.send(protocol::leave(topic, self.next_ref())).await?;
        }
        debug!("left realtime channel {topic}");
        Ok(true)
    }

    /// Set the user access token used for row-level security on joined
    /// and future channels.
    pub async fn set_access_token(&self, token: Option<String>) -> LcResult<()> {
        *self.access_token.lock().await = token.clone();
        let Some(token) = token else {
            return Ok(());
        };
        if self.state() != ConnectionState::Connected {
            return Ok(());
        }
        for topic in self.router.topics() {
            self.send(protocol::access_token(&topic, &token, self.next_ref())).await?;
        }
        Ok(())
    }

    /// Close the socket and every channel.
    pub async fn disconnect(&self) {
        // Dropping the sender makes the socket task send a close frame and exit.
        self.outgoing.lock().await.take();
        if let Some(task) = self.io_task.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                warn!("realtime socket task did not stop in time");
            }
        }
        self.router.close_all();
        Self::set_state(&self.state_tx, ConnectionState::Disconnected);
    }
}

async fn run_socket<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    heartbeat: Duration,
    router: Arc<ChannelRouter>,
    next_ref: Arc<AtomicU64>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);

    let outcome: Result<(), String> = loop {
        tokio::select! {
            queued = outgoing.recv() => match queued {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        break Err(e.to_string());
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break Ok(());
                }
            },
            _ = ticker.tick() => {
                let text = match protocol::heartbeat(next_ref.fetch_add(1, Ordering::Relaxed)).encode() {
                    Ok(text) => text,
                    Err(e) => break Err(e.to_string()),
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    break Err(e.to_string());
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle_frame(&router, &text),
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.to_string()),
            },
        }
    };

    router.close_all();
    match outcome {
        Ok(()) => RealtimeClient::set_state(&state_tx, ConnectionState::Disconnected),
        Err(e) => {
            error!("realtime socket closed with error: {e}");
            RealtimeClient::set_state(&state_tx, ConnectionState::Failed);
        }
    }
}

fn handle_frame(router: &ChannelRouter, text: &str) {
    let frame = match Frame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("{e}");
            return;
        }
    };

    match frame.event.as_str() {
        protocol::events::POSTGRES_CHANGES => match protocol::parse_change(&frame) {
            Some(change) => {
                router.route_to(frame.channel_topic(), change);
            }
            None => warn!("malformed change on {}", frame.topic),
        },
        protocol::events::REPLY if frame.is_error_reply() => {
            warn!("realtime rejected {}: {}", frame.topic, frame.payload);
        }
        protocol::events::ERROR | protocol::events::CLOSE => {
            if router.close(frame.channel_topic()) {
                warn!("realtime closed channel {}", frame.channel_topic());
            }
        }
        protocol::events::SYSTEM => {
            debug!(topic = %frame.topic, payload = %frame.payload, "realtime system message");
        }
        other => debug!("realtime {other} on {}", frame.topic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChangeKind;
    use tokio::net::TcpListener;

    #[test]
    fn test_endpoint_for() {
        assert_eq!(
            RealtimeClient::endpoint_for("https://abcd.supabase.co/", "anon").unwrap(),
            "wss://abcd.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
        assert_eq!(
            RealtimeClient::endpoint_for("http://127.0.0.1:54321", "k").unwrap(),
            "ws://127.0.0.1:54321/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
        assert!(RealtimeClient::endpoint_for("abcd.supabase.co", "k").is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_sets_failed_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = RealtimeClient::new(format!("ws://{addr}/realtime/v1/websocket"), Duration::from_secs(30));
        let spec = ChannelSpec::new("chat:c1", "messages");
        assert!(client.subscribe(spec).await.is_err());
        assert_eq!(client.state(), ConnectionState::Failed);
        assert_eq!(client.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_join_and_receive_change() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Minimal server: read the join, answer with one insert, then close.
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let join = loop {
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    break Frame::decode(&text).unwrap();
                }
            };
            let change = serde_json::json!({
                "topic": join.topic,
                "event": "postgres_changes",
                "payload": {"data": {
                    "type": "INSERT", "schema": "public", "table": "messages",
                    "record": {"id": "m1", "chat_id": "c1"}
                }},
                "ref": null
            });
            ws.send(Message::Text(change.to_string())).await.unwrap();
            let _ = ws.close(None).await;
            join
        });

        let client = RealtimeClient::new(format!("ws://{addr}/realtime/v1/websocket"), Duration::from_secs(30));
        let spec = ChannelSpec::new("chat:c1", "messages")
            .on(ChangeKind::Insert)
            .filter_eq("chat_id", "c1");
        let mut channel = client.subscribe(spec).await.unwrap();

        let event = channel.recv().await.unwrap();
        assert_eq!(event.record["id"], "m1");

        // Server closed the socket, so the channel ends.
        assert!(channel.recv().await.is_none());

        let join = server.await.unwrap();
        assert_eq!(join.event, "phx_join");
        assert_eq!(join.payload["config"]["postgres_changes"][0]["filter"], "chat_id=eq.c1");
    }
}
