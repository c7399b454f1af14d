// SPDX-License-Identifier: MIT
//! dApp-facing WebSocket server.
//!
//! One engine per accepted connection, with the router's `wm_*` table
//! attached. The handshake `Origin` header becomes the connection's origin
//! and feeds session binding; per-IP connection admission throttles abusive
//! peers before any JSON-RPC processing happens. Broadcast events fan out
//! to every connection; a slow client lags and skips frames, it never
//! stalls the router.

use crate::router::Router;
use crate::rpc::engine::{PeerInfo, RpcEngine};
use crate::transport::ws::WsConnection;
use crate::transport::Transport;
use anyhow::Result;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Max new WebSocket connections per IP per minute.
const MAX_CONNECTIONS_PER_MIN: usize = 30;

/// How often a connection's liveness is re-checked while idle.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Per-IP connection admission, a tumbling one-minute window.
struct ConnectionGate {
    connections: HashMap<IpAddr, Vec<Instant>>,
}

impl ConnectionGate {
    fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Returns `true` if the connection should be allowed.
    fn check_and_record(&mut self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let one_min_ago = now - Duration::from_secs(60);

        let timestamps = self.connections.entry(ip).or_default();
        timestamps.retain(|t| *t > one_min_ago);

        if timestamps.len() >= MAX_CONNECTIONS_PER_MIN {
            return false;
        }
        timestamps.push(now);
        true
    }
}

/// Bind `addr` and serve until a shutdown signal arrives.
pub async fn run(router: Arc<Router>, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "router listening");
    run_with_listener(router, listener).await
}

/// Serve an already-bound listener until a shutdown signal arrives.
pub async fn run_with_listener(router: Arc<Router>, listener: TcpListener) -> Result<()> {
    let gate = Arc::new(Mutex::new(ConnectionGate::new()));

    let shutdown = make_shutdown_future();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received — stopping router server");
                break;
            }

            conn = listener.accept() => {
                let (stream, peer) = match conn {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(err = %e, "accept error");
                        continue;
                    }
                };

                {
                    let mut gate = gate.lock().await;
                    if !gate.check_and_record(peer.ip()) {
                        warn!(peer = %peer, "connection rate limit exceeded — rejecting");
                        drop(stream);
                        continue;
                    }
                }

                debug!(peer = %peer, "new connection");
                let router = router.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, router).await {
                        warn!(peer = %peer, err = %e, "connection error");
                    }
                });
            }
        }
    }

    info!("router server stopped");
    Ok(())
}

async fn handle_connection(stream: tokio::net::TcpStream, router: Arc<Router>) -> Result<()> {
    // Capture the Origin header during the handshake; it is the identity
    // every session-bound check runs against.
    let mut origin: Option<String> = None;
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &tokio_tungstenite::tungstenite::handshake::server::Request,
         resp: tokio_tungstenite::tungstenite::handshake::server::Response| {
            origin = req
                .headers()
                .get("Origin")
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            Ok(resp)
        },
    )
    .await?;

    let transport: Arc<dyn Transport> = Arc::new(WsConnection::new(ws));
    let engine = Arc::new(RpcEngine::new(
        transport.clone(),
        PeerInfo { origin },
        router.context().config.debug,
    ));
    router.attach(&engine);
    engine.clone().start();

    // Fan broadcast events out to this client until it goes away. Requests
    // are already served by the engine's own tasks.
    let mut events = router.context().broadcaster.subscribe();
    loop {
        if !transport.is_connected() {
            break;
        }
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(frame) => {
                        if engine.send_raw(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        // Slow client: events are dropped for this client,
                        // the sender is never blocked.
                        warn!(skipped = n, "broadcast lagged — slow client skipped events");
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                // Loop back around to the liveness check.
            }
        }
    }

    engine.shutdown();
    Ok(())
}

/// Resolves when a shutdown signal is received.
///
/// On Unix this is SIGTERM or Ctrl-C; elsewhere Ctrl-C only.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
