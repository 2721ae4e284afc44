//! Supabase realtime client implementing [`ChangeStream`].
//!
//! Each subscription owns one websocket joined to one channel. A background
//! task keeps the socket alive with heartbeats and forwards decoded change
//! payloads to the [`RealtimeChannel`] handed to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use leadsync_core::errors::RemoteError;
use leadsync_core::remote::{ChangeChannel, ChangeStream, RawChange, RowFilter, Table};

use crate::config::RemoteConfig;
use crate::error::{RemoteClientError, Result};
use crate::protocol::{
    channel_topic, classify, heartbeat_message, join_message, leave_message, Inbound,
    PhoenixMessage,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ChangeResult = std::result::Result<RawChange, RemoteError>;

/// Changes buffered between the socket task and the consumer.
const CHANNEL_BUFFER: usize = 256;

/// How long `unsubscribe` waits for the socket task to say goodbye.
const LEAVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Change stream backed by the realtime websocket endpoint.
#[derive(Debug, Clone)]
pub struct RealtimeStream {
    config: RemoteConfig,
    refs: Arc<AtomicU64>,
}

impl RealtimeStream {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            refs: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_ref(&self) -> String {
        self.refs.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Connects, joins the table's channel and starts the socket task.
    pub async fn join(&self, table: Table, filter: &RowFilter) -> Result<RealtimeChannel> {
        let (mut ws, _) = connect_async(self.config.realtime_endpoint()).await?;
        let topic = channel_topic(table);
        let join_ref = self.next_ref();

        let join = join_message(&topic, table, filter, self.config.bearer(), &join_ref);
        ws.send(Message::Text(join.to_text()?.into())).await?;

        match tokio::time::timeout(self.config.timeout, await_join(&mut ws, &topic, &join_ref)).await
        {
            Ok(joined) => joined?,
            Err(_) => {
                return Err(RemoteClientError::realtime(format!(
                    "Timed out joining {}",
                    topic
                )))
            }
        }
        info!("Joined realtime channel {} ({})", topic, filter);

        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let (leave_tx, leave_rx) = oneshot::channel();
        let socket_task = SocketTask {
            ws,
            topic: topic.clone(),
            refs: self.refs.clone(),
            heartbeat: self.config.heartbeat_interval,
            tx,
        };
        let task = tokio::spawn(socket_task.run(leave_rx));

        Ok(RealtimeChannel {
            topic,
            rx,
            leave: Some(leave_tx),
            task: Some(task),
        })
    }
}

#[async_trait]
impl ChangeStream for RealtimeStream {
    async fn subscribe(
        &self,
        table: Table,
        filter: &RowFilter,
    ) -> std::result::Result<Box<dyn ChangeChannel>, RemoteError> {
        let channel = self.join(table, filter).await?;
        Ok(Box::new(channel))
    }
}

/// Reads frames until the server answers the join request.
async fn await_join(ws: &mut Socket, topic: &str, join_ref: &str) -> Result<()> {
    while let Some(frame) = ws.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let message: PhoenixMessage = match serde_json::from_str(text.as_str()) {
            Ok(message) => message,
            Err(e) => {
                debug!("Skipping unparseable frame during join: {}", e);
                continue;
            }
        };
        match classify(message, topic)? {
            Inbound::Reply { msg_ref, ok, detail } if msg_ref.as_deref() == Some(join_ref) => {
                if ok {
                    return Ok(());
                }
                return Err(RemoteClientError::realtime(format!(
                    "Join refused for {}: {}",
                    topic, detail
                )));
            }
            Inbound::ChannelError(message) => return Err(RemoteClientError::realtime(message)),
            Inbound::Closed => break,
            _ => {}
        }
    }
    Err(RemoteClientError::realtime(format!(
        "Socket closed while joining {}",
        topic
    )))
}

struct SocketTask {
    ws: Socket,
    topic: String,
    refs: Arc<AtomicU64>,
    heartbeat: Duration,
    tx: mpsc::Sender<ChangeResult>,
}

impl SocketTask {
    fn next_ref(&self) -> String {
        self.refs.fetch_add(1, Ordering::Relaxed).to_string()
    }

    async fn send(&mut self, message: PhoenixMessage) -> Result<()> {
        let text = message.to_text()?;
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn run(mut self, mut leave: oneshot::Receiver<()>) {
        let mut heartbeat = tokio::time::interval(self.heartbeat);
        // The first tick completes immediately.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = &mut leave => {
                    let leave = leave_message(&self.topic, &self.next_ref());
                    if let Err(e) = self.send(leave).await {
                        debug!("Failed to send leave for {}: {}", self.topic, e);
                    }
                    let _ = self.ws.close(None).await;
                    break;
                }
                _ = heartbeat.tick() => {
                    let beat = heartbeat_message(&self.next_ref());
                    if let Err(e) = self.send(beat).await {
                        warn!("Heartbeat failed on {}: {}", self.topic, e);
                        let _ = self.tx.send(Err(e.into())).await;
                        break;
                    }
                }
                frame = self.ws.next() => {
                    let keep_going = match frame {
                        Some(Ok(Message::Text(text))) => self.forward(text.as_str()).await,
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Realtime socket for {} closed", self.topic);
                            false
                        }
                        Some(Ok(_)) => true,
                        Some(Err(e)) => {
                            let err: RemoteError = RemoteClientError::from(e).into();
                            let _ = self.tx.send(Err(err)).await;
                            false
                        }
                    };
                    if !keep_going {
                        break;
                    }
                }
            }
        }
    }

    /// Forwards one text frame. Returns false once the channel is finished.
    async fn forward(&mut self, text: &str) -> bool {
        let message: PhoenixMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping unparseable frame on {}: {}", self.topic, e);
                return true;
            }
        };

        match classify(message, &self.topic) {
            Ok(Inbound::Change(change)) => self.tx.send(Ok(change)).await.is_ok(),
            Ok(Inbound::ChannelError(message)) => {
                let _ = self
                    .tx
                    .send(Err(RemoteClientError::realtime(message).into()))
                    .await;
                false
            }
            Ok(Inbound::Closed) => false,
            Ok(Inbound::Reply { ok: false, detail, .. }) => {
                warn!("Realtime request on {} failed: {}", self.topic, detail);
                true
            }
            Ok(_) => true,
            Err(e) => {
                warn!("Dropping malformed change on {}: {}", self.topic, e);
                true
            }
        }
    }
}

/// One joined realtime channel.
pub struct RealtimeChannel {
    topic: String,
    rx: mpsc::Receiver<ChangeResult>,
    leave: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeChannel {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl ChangeChannel for RealtimeChannel {
    async fn next_change(&mut self) -> Option<ChangeResult> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self) {
        if let Some(leave) = self.leave.take() {
            let _ = leave.send(());
        }
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(LEAVE_TIMEOUT, task).await.is_err() {
                warn!("Realtime channel {} did not close in time", self.topic);
            }
        }
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadsync_core::remote::ChangeKind;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn frame(value: Value) -> Message {
        Message::Text(value.to_string().into())
    }

    /// Serves one websocket connection with `script`, returning the events it received.
    async fn serve_once<F, Fut>(script: F) -> (String, JoinHandle<Vec<String>>)
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Vec<String>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            script(ws).await
        });
        (format!("http://{}", addr), handle)
    }

    fn stream_for(url: &str) -> RealtimeStream {
        let mut config = RemoteConfig::from_project_url(url, "anon").unwrap();
        config.timeout = Duration::from_secs(5);
        RealtimeStream::new(config)
    }

    async fn read_event(ws: &mut WebSocketStream<TcpStream>) -> Option<PhoenixMessage> {
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).ok();
            }
        }
        None
    }

    #[tokio::test]
    async fn test_join_forwards_changes_and_leaves() {
        let (url, server) = serve_once(|mut ws| async move {
            let mut seen = Vec::new();
            let join = read_event(&mut ws).await.unwrap();
            seen.push(join.event.clone());
            let topic = join.topic.clone();
            ws.send(frame(json!({
                "topic": topic, "event": "phx_reply", "ref": join.msg_ref,
                "payload": {"status": "ok", "response": {}}
            })))
            .await
            .unwrap();
            ws.send(frame(json!({
                "topic": topic, "event": "postgres_changes", "ref": null,
                "payload": {"data": {"type": "INSERT", "record": {"id": "lead-1"}, "old_record": {}}}
            })))
            .await
            .unwrap();
            while let Some(message) = read_event(&mut ws).await {
                seen.push(message.event.clone());
                if message.event == "phx_leave" {
                    break;
                }
            }
            seen
        })
        .await;

        let stream = stream_for(&url);
        let mut channel = stream
            .join(Table::Leads, &RowFilter::eq("user_id", "owner-1"))
            .await
            .unwrap();
        assert_eq!(channel.topic(), "realtime:leads_changes");

        let change = channel.next_change().await.unwrap().unwrap();
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.new.unwrap()["id"], "lead-1");

        channel.unsubscribe().await;
        channel.unsubscribe().await;

        let seen = server.await.unwrap();
        assert_eq!(seen.first().map(String::as_str), Some("phx_join"));
        assert_eq!(seen.last().map(String::as_str), Some("phx_leave"));
    }

    #[tokio::test]
    async fn test_join_refused_is_an_error() {
        let (url, server) = serve_once(|mut ws| async move {
            let join = read_event(&mut ws).await.unwrap();
            ws.send(frame(json!({
                "topic": join.topic, "event": "phx_reply", "ref": join.msg_ref,
                "payload": {"status": "error", "response": {"reason": "unauthorized"}}
            })))
            .await
            .unwrap();
            Vec::new()
        })
        .await;

        let err = stream_for(&url)
            .subscribe(Table::Audiences, &RowFilter::eq("user_id", "owner-1"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code, "realtime");
        assert!(err.message.contains("unauthorized"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_close_ends_channel() {
        let (url, server) = serve_once(|mut ws| async move {
            let join = read_event(&mut ws).await.unwrap();
            ws.send(frame(json!({
                "topic": join.topic, "event": "phx_reply", "ref": join.msg_ref,
                "payload": {"status": "ok", "response": {}}
            })))
            .await
            .unwrap();
            ws.send(frame(json!({
                "topic": join.topic, "event": "phx_close", "ref": null, "payload": {}
            })))
            .await
            .unwrap();
            Vec::new()
        })
        .await;

        let mut channel = stream_for(&url)
            .join(Table::Leads, &RowFilter::eq("user_id", "owner-1"))
            .await
            .unwrap();
        assert!(channel.next_change().await.is_none());
        server.await.unwrap();
    }
}
