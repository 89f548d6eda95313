use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{bail, Context};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use agent_protocol::{codec, AuthFrame, HeartbeatFrame, Outbound};

use crate::config::{AgentConfig, ReconnectConfig};
use crate::router::Router;

pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const AUTH_READ_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Default)]
struct StateInner {
    phase: Phase,
    server_id: String,
}

/// Observable connection state: phase plus the server id recorded at auth.
#[derive(Clone, Default)]
pub struct ConnectionState {
    inner: Arc<RwLock<StateInner>>,
}

impl ConnectionState {
    pub fn phase(&self) -> Phase {
        self.inner.read().expect("state lock poisoned").phase
    }

    pub fn server_id(&self) -> String {
        self.inner
            .read()
            .expect("state lock poisoned")
            .server_id
            .clone()
    }

    fn set_phase(&self, phase: Phase) {
        self.inner.write().expect("state lock poisoned").phase = phase;
    }

    fn set_connected(&self, server_id: String) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        inner.phase = Phase::Connected;
        inner.server_id = server_id;
    }
}

/// Owns the WebSocket channel: dials, authenticates, pumps frames both ways
/// and reconnects with exponential backoff. The write side is the single
/// serialization point for outbound frames; producers only ever touch the
/// bounded queue behind the send-sink.
pub struct ConnectionManager {
    cfg: Arc<AgentConfig>,
    router: Arc<Router>,
    outbound: mpsc::Receiver<Outbound>,
    state: ConnectionState,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        cfg: Arc<AgentConfig>,
        router: Arc<Router>,
        outbound: mpsc::Receiver<Outbound>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            router,
            outbound,
            state: ConnectionState::default(),
            shutdown,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.clone()
    }

    /// Supervisor loop: connect, run until teardown, back off, repeat. The
    /// backoff delay doubles per failed attempt up to the cap and resets on a
    /// successful auth.
    pub async fn run(mut self) {
        let mut delay = self.cfg.reconnect.initial_delay;

        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            self.state.set_phase(Phase::Connecting);
            match self.connect().await {
                Ok(ws) => {
                    delay = self.cfg.reconnect.initial_delay;
                    self.run_connection(ws).await;
                    self.state.set_phase(Phase::Disconnected);
                    // Frames queued while the channel was up are gone; they
                    // must not reappear on the next connection.
                    self.drain_outbound();
                }
                Err(err) => {
                    tracing::warn!(error = %err, "connection attempt failed");
                    self.state.set_phase(Phase::Disconnected);
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_delay(delay, &self.cfg.reconnect);
        }
    }

    async fn connect(&self) -> anyhow::Result<WsStream> {
        tracing::info!(endpoint = %self.cfg.endpoint, "connecting");

        let (mut ws, _) = timeout(HANDSHAKE_TIMEOUT, connect_async(self.cfg.endpoint.as_str()))
            .await
            .context("websocket handshake timed out")?
            .context("dial failed")?;

        let auth = Outbound::Auth(AuthFrame {
            token: self.cfg.token.clone(),
            agent_version: AGENT_VERSION.to_string(),
            hostname: sysinfo::System::host_name().unwrap_or_default(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        });
        let payload = serde_json::to_string(&auth).context("encode auth frame")?;
        ws.send(Message::Text(payload))
            .await
            .context("send auth frame")?;

        let reply = timeout(AUTH_READ_TIMEOUT, ws.next())
            .await
            .context("auth reply timed out")?
            .context("connection closed during auth")?
            .context("read auth reply")?;
        let Message::Text(text) = reply else {
            bail!("unexpected auth reply frame");
        };

        match codec::peek_type(text.as_bytes())
            .context("parse auth reply")?
            .as_str()
        {
            codec::TAG_AUTH_OK => {
                let ok = codec::parse_auth_ok(text.as_bytes()).context("parse auth_ok")?;
                tracing::info!(server_id = %ok.server_id, "authenticated");
                self.state.set_connected(ok.server_id);
                Ok(ws)
            }
            codec::TAG_AUTH_ERROR => {
                let err = codec::parse_auth_error(text.as_bytes()).unwrap_or_default();
                bail!("auth failed: {}", err.error);
            }
            other => bail!("unexpected auth reply type: {other}"),
        }
    }

    /// Running phase: a spawned read pump hands frames to the router while
    /// this loop serializes heartbeats and queued outbound frames onto the
    /// socket. Any failure on either side tears the connection down.
    async fn run_connection(&mut self, ws: WsStream) {
        let (mut ws_tx, ws_rx) = ws.split();

        let router = Arc::clone(&self.router);
        let read_shutdown = self.shutdown.clone();
        let mut read_pump = tokio::spawn(read_pump(ws_rx, router, read_shutdown));

        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.cfg.heartbeat,
            self.cfg.heartbeat,
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                _ = &mut read_pump => break,
                _ = heartbeat.tick() => {
                    let frame = Outbound::Heartbeat(HeartbeatFrame {
                        timestamp: chrono::Utc::now().to_rfc3339(),
                    });
                    if let Err(err) = write_frame(&mut ws_tx, &frame).await {
                        tracing::warn!(error = %err, "heartbeat failed, tearing down");
                        break;
                    }
                }
                next = self.outbound.recv() => {
                    let Some(frame) = next else { break };
                    if let Err(err) = write_frame(&mut ws_tx, &frame).await {
                        tracing::warn!(error = %err, "write failed, tearing down");
                        break;
                    }
                }
            }
        }

        read_pump.abort();
        let _ = read_pump.await;
    }

    fn drain_outbound(&mut self) {
        let mut dropped = 0usize;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "discarded queued frames at teardown");
        }
    }
}

async fn read_pump(mut ws_rx: WsSource, router: Arc<Router>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            frame = ws_rx.next() => {
                match frame {
                    None => return,
                    Some(Ok(Message::Text(text))) => dispatch(&router, text.as_bytes()).await,
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("connection closed by server");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                        return;
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "read error");
                        return;
                    }
                }
            }
        }
    }
}

async fn dispatch(router: &Router, data: &[u8]) {
    match codec::peek_type(data) {
        // Auth replies are consumed during the handshake; after it they are
        // stale and dropped here before reaching the router.
        Ok(tag) if tag == codec::TAG_AUTH_OK || tag == codec::TAG_AUTH_ERROR => {}
        Ok(tag) => router.handle(&tag, data).await,
        Err(err) => tracing::warn!(error = %err, "failed to parse frame"),
    }
}

async fn write_frame(ws_tx: &mut WsSink, frame: &Outbound) -> anyhow::Result<()> {
    let payload = serde_json::to_string(frame).context("encode frame")?;
    ws_tx
        .send(Message::Text(payload))
        .await
        .context("write frame")?;
    Ok(())
}

fn next_delay(current: Duration, cfg: &ReconnectConfig) -> Duration {
    let scaled = current.mul_f64(cfg.multiplier);
    if scaled > cfg.max_delay {
        cfg.max_delay
    } else {
        scaled
    }
}
