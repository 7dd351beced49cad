//! WebSocket listener and per-connection protocol driver.
//!
//! On attach a connection receives the full history replay followed by one
//! status message, then enters the dispatch loop. Protocol noise (malformed
//! JSON, unknown types, bad payload shapes) is dropped silently and the
//! connection stays open.

pub mod connections;

use crate::session::{SessionManager, StatusReport};
use self::connections::{ConnId, ConnectionManager};
use futures_util::{SinkExt, StreamExt};
use ptycast_core::{
    map_special_key, strip_device_attributes, CastError, CastResult, ClientMessage, ServerMessage,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info};

/// The streaming front of the server: one session manager, one connection
/// manager, any number of observers.
pub struct Server {
    sessions: Arc<SessionManager>,
    connections: Arc<ConnectionManager>,
}

impl Server {
    pub fn new(sessions: Arc<SessionManager>, connections: Arc<ConnectionManager>) -> Self {
        Self {
            sessions,
            connections,
        }
    }

    /// Accept loop. Runs until the listener fails or the task is dropped.
    pub async fn run(&self, bind_addr: SocketAddr) -> CastResult<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| CastError::Transport(format!("WS bind failed: {e}")))?;
        info!(addr = %bind_addr, "WebSocket listener started");

        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    let sessions = self.sessions.clone();
                    let connections = self.connections.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, remote, sessions, connections).await
                        {
                            debug!(remote = %remote, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    }
}

/// Messages a freshly attached observer receives before anything live: the
/// re-sanitized history transcript in original order, then exactly one status.
fn attach_messages(snapshot: Vec<String>, status: &StatusReport) -> Vec<ServerMessage> {
    let mut messages = Vec::with_capacity(snapshot.len() + 1);
    for chunk in snapshot {
        let cleaned = strip_device_attributes(&chunk);
        if cleaned.is_empty() {
            continue;
        }
        messages.push(ServerMessage::Output {
            data: cleaned.into_owned(),
        });
    }
    messages.push(ServerMessage::Status {
        status: status.status,
        pid: status.pid,
        message: None,
    });
    messages
}

/// Push the replay and status through the connection's own queue, awaiting
/// room instead of failing: a replay larger than the queue drains through it
/// rather than overflowing it. Errors only when the queue closed (peer gone).
async fn deliver_attach(
    outbound: &mpsc::Sender<String>,
    snapshot: Vec<String>,
    status: &StatusReport,
) -> Result<(), mpsc::error::SendError<String>> {
    for message in attach_messages(snapshot, status) {
        if let Ok(text) = message.encode() {
            outbound.send(text).await?;
        }
    }
    Ok(())
}

/// Forward live output into one connection's queue, in broadcast order,
/// with backpressure. A connection that falls a whole broadcast buffer
/// behind is disconnected rather than fed a gap.
fn spawn_output_forwarder(
    conn_id: ConnId,
    mut live_rx: broadcast::Receiver<String>,
    outbound: mpsc::Sender<String>,
    connections: Arc<ConnectionManager>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match live_rx.recv().await {
                Ok(chunk) => {
                    let Ok(text) = (ServerMessage::Output { data: chunk }).encode() else {
                        continue;
                    };
                    if outbound.send(text).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(conn_id, skipped, "connection too slow for live output");
                    connections.disconnect(conn_id);
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn handle_connection(
    stream: TcpStream,
    remote: SocketAddr,
    sessions: Arc<SessionManager>,
    connections: Arc<ConnectionManager>,
) -> CastResult<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| CastError::Transport(format!("WS handshake failed: {e}")))?;
    debug!(remote = %remote, "WebSocket connection accepted");

    let (mut sink, mut ws_rx) = ws_stream.split();
    let (conn_id, outbound_tx, mut outbound_rx) = connections.connect();

    // Writer: the only task touching this connection's sink, so each
    // observer receives messages strictly in enqueue order.
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Snapshot and live subscription are taken in one step, so the replayed
    // transcript and the live stream partition the output with no gap and
    // no duplicate. Replay enqueues before the forwarder starts, keeping
    // everything in order through the connection's single queue.
    let (snapshot, live_rx) = sessions.attach().await;
    let status = sessions.status().await;
    if deliver_attach(&outbound_tx, snapshot, &status).await.is_err() {
        connections.disconnect(conn_id);
        writer.abort();
        debug!(remote = %remote, "peer went away during replay");
        return Ok(());
    }
    let forwarder =
        spawn_output_forwarder(conn_id, live_rx, outbound_tx.clone(), connections.clone());

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                dispatch(&text, conn_id, &sessions, &connections).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // binary and control frames are not part of the protocol
            Err(e) => {
                debug!(remote = %remote, error = %e, "WebSocket receive failed");
                break;
            }
        }
    }

    connections.disconnect(conn_id);
    forwarder.abort();
    writer.abort();
    debug!(remote = %remote, "WebSocket connection closed");
    Ok(())
}

/// Route one inbound frame. Anything that fails to decode is protocol noise
/// and is ignored without a reply.
async fn dispatch(
    text: &str,
    conn_id: ConnId,
    sessions: &SessionManager,
    connections: &ConnectionManager,
) {
    let Ok(message) = ClientMessage::decode(text) else {
        return;
    };

    match message {
        ClientMessage::Input { data } => {
            // An observer must not be able to echo a forged terminal-identity
            // reply into the process input stream.
            let cleaned = strip_device_attributes(&data);
            if !cleaned.is_empty() {
                sessions.write(&cleaned).await;
            }
        }
        ClientMessage::Resize { cols, rows } => {
            if cols > 0 && rows > 0 {
                if let (Ok(cols), Ok(rows)) = (u16::try_from(cols), u16::try_from(rows)) {
                    sessions.resize(cols, rows).await;
                }
            }
        }
        ClientMessage::SpecialKey { key, modifiers } => {
            if let Some(seq) = map_special_key(&key, &modifiers) {
                sessions.write(seq).await;
            }
        }
        ClientMessage::Ping {} => {
            connections.send_json(conn_id, &ServerMessage::Pong {});
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::history::HistoryBuffer;
    use ptycast_core::SessionStatus;
    use std::time::Duration;
    use tokio::time::timeout;

    fn stopped_status() -> StatusReport {
        StatusReport {
            status: SessionStatus::Stopped,
            pid: None,
            uptime_seconds: 0,
            dimensions: crate::session::manager::ReportedDimensions {
                cols: None,
                rows: None,
            },
            session_id: None,
            cwd: None,
        }
    }

    #[test]
    fn attach_replays_surviving_history_then_one_status() {
        // Five appends, caps sized so the oldest two are evicted.
        let mut history = HistoryBuffer::new(1024, 3);
        for s in ["one", "two", "three", "four", "five"] {
            history.push(s.into());
        }

        let messages = attach_messages(history.snapshot(), &stopped_status());
        assert_eq!(messages.len(), 4);
        for (msg, expected) in messages.iter().zip(["three", "four", "five"]) {
            assert_eq!(
                msg,
                &ServerMessage::Output {
                    data: expected.into()
                }
            );
        }
        assert!(matches!(
            messages.last(),
            Some(ServerMessage::Status {
                status: SessionStatus::Stopped,
                pid: None,
                ..
            })
        ));
    }

    #[test]
    fn attach_re_sanitizes_and_drops_empty_chunks() {
        let snapshot = vec!["keep".to_string(), "\x1b[?1;2c".to_string(), "me".to_string()];
        let messages = attach_messages(snapshot, &stopped_status());
        // Two surviving outputs plus the status.
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], ServerMessage::Output { data: "keep".into() });
        assert_eq!(messages[1], ServerMessage::Output { data: "me".into() });
    }

    #[tokio::test]
    async fn replay_larger_than_the_outbound_queue_is_delivered_whole() {
        // A snapshot far bigger than the queue must drain through it intact,
        // ending with the status message, instead of overflowing it.
        let (tx, mut rx) = mpsc::channel(8);
        let snapshot: Vec<String> = (0..300).map(|i| format!("chunk-{i} ")).collect();

        let drain = tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(text) = rx.recv().await {
                received.push(text);
            }
            received
        });

        deliver_attach(&tx, snapshot, &stopped_status()).await.unwrap();
        drop(tx);

        let received = timeout(Duration::from_secs(5), drain).await.unwrap().unwrap();
        assert_eq!(received.len(), 301);
        assert!(received[0].contains("chunk-0"));
        assert!(received[299].contains("chunk-299"));
        assert!(received[300].contains(r#""type":"status""#));
    }

    async fn spawn_server() -> (SocketAddr, Arc<SessionManager>, Arc<ConnectionManager>) {
        let sessions = Arc::new(SessionManager::new(500_000, 2000, 200));
        let connections = ConnectionManager::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (srv_sessions, srv_connections) = (sessions.clone(), connections.clone());
        tokio::spawn(async move {
            loop {
                let Ok((stream, remote)) = listener.accept().await else {
                    break;
                };
                let sessions = srv_sessions.clone();
                let connections = srv_connections.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, remote, sessions, connections).await;
                });
            }
        });

        (addr, sessions, connections)
    }

    async fn next_text(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<TcpStream>,
        >,
    ) -> Option<String> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            match timeout(Duration::from_millis(500), ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => return Some(text),
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(_))) | Ok(None) => return None,
                Err(_) => continue,
            }
        }
        None
    }

    #[tokio::test]
    async fn fresh_observer_gets_status_first_and_pong_on_ping() {
        let (addr, _sessions, _connections) = spawn_server().await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();

        // Empty history: the very first frame is the status message.
        let first = next_text(&mut ws).await.unwrap();
        assert_eq!(
            first,
            r#"{"type":"status","payload":{"status":"stopped","pid":null,"message":null}}"#
        );

        ws.send(Message::Text(r#"{"type":"ping","payload":{}}"#.into()))
            .await
            .unwrap();
        let reply = next_text(&mut ws).await.unwrap();
        assert_eq!(reply, r#"{"type":"pong","payload":{}}"#);

        // Protocol noise: the channel must survive it.
        ws.send(Message::Text("{not json".into())).await.unwrap();
        ws.send(Message::Text(r#"{"type":"detach","payload":{}}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Text(r#"{"type":"ping","payload":{}}"#.into()))
            .await
            .unwrap();
        let reply = next_text(&mut ws).await.unwrap();
        assert_eq!(reply, r#"{"type":"pong","payload":{}}"#);
    }

    #[tokio::test]
    async fn live_output_is_broadcast_to_attached_observer() {
        let (addr, sessions, _connections) = spawn_server().await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let _status = next_text(&mut ws).await.unwrap();

        sessions
            .start(crate::session::StartOptions {
                command: "sh".into(),
                args: vec!["-c".into(), "printf live-probe".into()],
                cwd: None,
                cols: 80,
                rows: 24,
            })
            .await
            .unwrap();

        let mut seen = String::new();
        while !seen.contains("live-probe") {
            match next_text(&mut ws).await {
                Some(text) => seen.push_str(&text),
                None => break,
            }
        }
        assert!(seen.contains("live-probe"), "got: {seen}");
        sessions.stop(true).await;
    }
}
