// SPDX-License-Identifier: MIT
//! In-process transport pair.
//!
//! [`pair`] returns two linked transports; a frame sent on one side arrives
//! on the other in order. Used by the integration tests and by hosts that
//! embed a wallet in the same process as the router.

use super::{Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One end of an in-process duplex channel.
pub struct MemoryTransport {
    /// Frames we send land on the peer's inbound receiver.
    to_peer: mpsc::UnboundedSender<TransportEvent>,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    /// Sender half kept so `disconnect` can push a local Disconnected event.
    to_self: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
}

/// Create a linked pair. Both ends start connected.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();

    let a = MemoryTransport {
        to_peer: tx_b.clone(),
        incoming: Mutex::new(Some(rx_a)),
        to_self: tx_a.clone(),
        connected: Arc::new(AtomicBool::new(true)),
    };
    let b = MemoryTransport {
        to_peer: tx_a,
        incoming: Mutex::new(Some(rx_b)),
        to_self: tx_b,
        connected: Arc::new(AtomicBool::new(true)),
    };
    (a, b)
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyConnected);
        }
        let _ = self.to_self.send(TransportEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            // Already disconnected; idempotent.
            return Ok(());
        }
        // Both ends observe the drop so each side fails its outstanding
        // requests.
        let _ = self.to_self.send(TransportEvent::Disconnected);
        let _ = self.to_peer.send(TransportEvent::Disconnected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::SendFailed("not connected".to_string()));
        }
        self.to_peer
            .send(TransportEvent::Frame(frame))
            .map_err(|_| TransportError::SendFailed("peer receiver dropped".to_string()))
    }

    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.incoming.lock().expect("incoming lock poisoned").take()
    }
}
