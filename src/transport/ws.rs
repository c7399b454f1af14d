// SPDX-License-Identifier: MIT
//! WebSocket transports.
//!
//! [`WsTransport`] is the dialing side (router → wallet, or a dApp client in
//! tests): it connects with bounded retries and exponential backoff, and can
//! re-establish the channel after an unexpected drop. A connection attempt
//! that exceeds `attempt_timeout` fails the whole `connect` with
//! [`TransportError::Timeout`] and is never retried; only non-timeout dial
//! failures count against `max_retries`.
//!
//! [`WsConnection`] wraps an already-accepted server-side stream; the server
//! accept loop in [`crate::server`] builds one per client.

use super::{Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, info, warn};

// ─── Reconnect configuration ─────────────────────────────────────────────────

/// Dial/retry behavior for [`WsTransport`].
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum dial attempts per connect (including the first try).
    ///
    /// Default: 3
    pub max_retries: u32,
    /// Delay before the second attempt; multiplied by `multiplier` after
    /// each failure, capped at `max_delay`.
    ///
    /// Default: 500 ms
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay.
    ///
    /// Default: 30 s
    pub max_delay: Duration,
    /// Backoff multiplier.
    ///
    /// Default: 2.0
    pub multiplier: f64,
    /// Per-attempt dial timeout. An attempt that exceeds this fails the
    /// connect immediately with `Timeout`; it is NOT retried.
    ///
    /// Default: 10 s
    pub attempt_timeout: Duration,
    /// Re-establish the channel in the background after an unexpected drop.
    ///
    /// Default: true
    pub auto_reconnect: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            attempt_timeout: Duration::from_secs(10),
            auto_reconnect: true,
        }
    }
}

// ─── Dialing transport ───────────────────────────────────────────────────────

struct WsInner {
    url: String,
    config: ReconnectConfig,
    /// Sender into the live connection's writer task; `None` while down.
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    connected: AtomicBool,
    /// Set by an explicit `disconnect`; suppresses auto-reconnect.
    shutdown: AtomicBool,
}

/// Client-side WebSocket transport with retry/backoff/reconnect.
pub struct WsTransport {
    inner: Arc<WsInner>,
    incoming: std::sync::Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, config: ReconnectConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(WsInner {
                url: url.into(),
                config,
                outbound: Mutex::new(None),
                events_tx,
                connected: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
            incoming: std::sync::Mutex::new(Some(events_rx)),
        }
    }
}

/// One dial pass: retries with backoff, timeout aborts immediately.
async fn establish(inner: &Arc<WsInner>) -> Result<(), TransportError> {
    let cfg = &inner.config;
    let mut delay = cfg.initial_delay;
    let mut last_err = String::new();

    for attempt in 1..=cfg.max_retries.max(1) {
        match tokio::time::timeout(cfg.attempt_timeout, connect_async(inner.url.as_str())).await {
            Err(_) => {
                warn!(url = %inner.url, attempt, "dial attempt timed out — giving up");
                return Err(TransportError::Timeout);
            }
            Ok(Ok((ws, _resp))) => {
                wire_connection(inner, ws).await;
                info!(url = %inner.url, attempt, "websocket connected");
                return Ok(());
            }
            Ok(Err(e)) => {
                last_err = e.to_string();
                if attempt < cfg.max_retries {
                    warn!(
                        url = %inner.url,
                        attempt,
                        max = cfg.max_retries,
                        delay_ms = delay.as_millis(),
                        err = %last_err,
                        "dial attempt failed — retrying"
                    );
                    tokio::time::sleep(delay).await;
                    let next_ms = (delay.as_millis() as f64 * cfg.multiplier) as u128;
                    delay = Duration::from_millis(next_ms.min(cfg.max_delay.as_millis()) as u64);
                }
            }
        }
    }

    Err(TransportError::ConnectionFailed(last_err))
}

/// Split an established socket into writer/reader tasks bound to `inner`.
/// The outbound sender is installed before this returns, so `send` works
/// as soon as `connect` does.
async fn wire_connection<S>(inner: &Arc<WsInner>, ws: WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    // Writer: drains the outbound queue into the socket.
    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    *inner.outbound.lock().await = Some(out_tx.clone());
    inner.connected.store(true, Ordering::SeqCst);
    let _ = inner.events_tx.send(TransportEvent::Connected);

    // Reader: frames in, pings answered, drop detection.
    let inner = inner.clone();
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let _ = inner.events_tx.send(TransportEvent::Frame(text));
                }
                Ok(Message::Ping(data)) => {
                    let _ = out_tx.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }

        // Explicit disconnect already emitted the event and cleared state.
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        if inner.connected.swap(false, Ordering::SeqCst) {
            *inner.outbound.lock().await = None;
            let _ = inner.events_tx.send(TransportEvent::Disconnected);
            if inner.config.auto_reconnect {
                debug!(url = %inner.url, "connection dropped — attempting reconnect");
                if let Err(e) = reestablish(inner.clone()).await {
                    warn!(url = %inner.url, err = %e, "reconnect failed");
                }
            }
        }
    });
}

/// Boxed indirection for the reconnect path: the reader task's future would
/// otherwise contain its own type through `establish`.
fn reestablish(
    inner: Arc<WsInner>,
) -> futures_util::future::BoxFuture<'static, Result<(), TransportError>> {
    Box::pin(async move { establish(&inner).await })
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.inner.connected.load(Ordering::SeqCst) {
            return Err(TransportError::AlreadyConnected);
        }
        self.inner.shutdown.store(false, Ordering::SeqCst);
        establish(&self.inner).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            if let Some(tx) = self.inner.outbound.lock().await.take() {
                let _ = tx.send(Message::Close(None));
            }
            let _ = self.inner.events_tx.send(TransportEvent::Disconnected);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let guard = self.inner.outbound.lock().await;
        match guard.as_ref() {
            Some(tx) => tx
                .send(Message::Text(frame))
                .map_err(|_| TransportError::SendFailed("writer task gone".to_string())),
            None => Err(TransportError::SendFailed("not connected".to_string())),
        }
    }

    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.incoming.lock().expect("incoming lock poisoned").take()
    }
}

// ─── Accepted server-side connection ─────────────────────────────────────────

/// Transport over an already-accepted WebSocket stream.
///
/// No reconnect: when the client drops, the connection is done.
pub struct WsConnection {
    outbound: mpsc::UnboundedSender<Message>,
    incoming: std::sync::Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    connected: Arc<AtomicBool>,
}

impl WsConnection {
    pub fn new<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let conn = connected.clone();
        let pong_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let _ = in_tx.send(TransportEvent::Frame(text));
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = pong_tx.send(Message::Pong(data));
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            if conn.swap(false, Ordering::SeqCst) {
                let _ = in_tx.send(TransportEvent::Disconnected);
            }
        });

        Self {
            outbound: out_tx,
            incoming: std::sync::Mutex::new(Some(in_rx)),
            connected,
        }
    }
}

#[async_trait]
impl Transport for WsConnection {
    async fn connect(&self) -> Result<(), TransportError> {
        // Accepted connections are born connected.
        Err(TransportError::AlreadyConnected)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.outbound.send(Message::Close(None));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::SendFailed("not connected".to_string()));
        }
        self.outbound
            .send(Message::Text(frame))
            .map_err(|_| TransportError::SendFailed("writer task gone".to_string()))
    }

    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.incoming.lock().expect("incoming lock poisoned").take()
    }
}
