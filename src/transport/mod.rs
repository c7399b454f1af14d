// SPDX-License-Identifier: MIT
//! Framed duplex channels between JSON-RPC peers.
//!
//! A transport carries whole text frames in order; it knows nothing about
//! JSON-RPC. The engine ([`crate::rpc::engine`]) sits on top and owns the
//! inbound receiver. Two implementations ship with the crate: an in-process
//! [`memory`] pair for tests and embedded wallets, and a [`ws`] WebSocket
//! client with bounded-retry reconnect.

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Transport-level failures, surfaced before any JSON-RPC processing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// `send` was called while the channel is down.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// `connect` was called on an already-connected transport.
    #[error("transport is already connected")]
    AlreadyConnected,

    /// The operation requires an established connection.
    #[error("transport is not connected")]
    NotConnected,

    /// A single connection attempt exceeded its timeout. Never retried.
    #[error("connection attempt timed out")]
    Timeout,

    /// All retry attempts failed; carries the last underlying cause.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer went away; outstanding requests are terminated with this.
    #[error("transport disconnected")]
    Disconnected,
}

/// Lifecycle and data events delivered on the inbound receiver, in order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The channel (re-)established.
    Connected,
    /// One whole inbound frame.
    Frame(String),
    /// The channel dropped. Outstanding requests must fail with
    /// [`TransportError::Disconnected`].
    Disconnected,
}

/// A duplex ordered framed channel.
///
/// The inbound side is handed out exactly once via [`take_incoming`]; the
/// consumer (normally the engine's reader task) sees every frame in arrival
/// order.
///
/// [`take_incoming`]: Transport::take_incoming
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the channel. Fails with [`TransportError::AlreadyConnected`]
    /// when called on a connected transport.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tear the channel down. Idempotent: disconnecting a disconnected
    /// transport is a no-op.
    async fn disconnect(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Queue one frame for delivery. Fails with
    /// [`TransportError::SendFailed`] when not connected; never blocks
    /// indefinitely.
    async fn send(&self, frame: String) -> Result<(), TransportError>;

    /// Take the inbound event receiver. Returns `None` on every call after
    /// the first.
    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;
}
