//! Transport abstraction and an in-process implementation.

use crate::error::TransportError;
use crate::proto::{RejectReason, SyncRequest, SyncResponse};
use crate::server::SyncServer;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// A request/response channel to one peer.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn request(&self, request: SyncRequest) -> Result<SyncResponse, TransportError>;
}

#[async_trait]
impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    async fn request(&self, request: SyncRequest) -> Result<SyncResponse, TransportError> {
        (**self).request(request).await
    }
}

/// An encoded request and the slot for its encoded reply.
type Envelope = (String, oneshot::Sender<String>);

/// In-memory transport for testing and simulation.
///
/// Requests are serialized to JSON and handed to a task serving the peer's
/// [`SyncServer`], so every exchange exercises the wire encoding. The link
/// can be cut on demand or after a set number of requests.
pub struct MemoryTransport {
    outgoing: mpsc::Sender<Envelope>,
    connected: AtomicBool,
    fail_after: Mutex<Option<usize>>,
    requests: AtomicUsize,
}

impl MemoryTransport {
    /// Start serving `server` on a background task and connect to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(server: Arc<SyncServer>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Envelope>(32);

        tokio::spawn(async move {
            while let Some((payload, reply)) = rx.recv().await {
                let response = match serde_json::from_str::<SyncRequest>(&payload) {
                    Ok(request) => server.handle(request),
                    Err(e) => SyncResponse::Rejected {
                        reason: RejectReason::InvalidRequest,
                        message: e.to_string(),
                    },
                };
                match serde_json::to_string(&response) {
                    Ok(body) => {
                        // the caller may have given up waiting
                        let _ = reply.send(body);
                    }
                    Err(e) => warn!(error = %e, "Failed to encode sync response"),
                }
            }
        });

        MemoryTransport {
            outgoing: tx,
            connected: AtomicBool::new(true),
            fail_after: Mutex::new(None),
            requests: AtomicUsize::new(0),
        }
    }

    /// Cut the link; requests fail until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        *self.fail_after.lock() = None;
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Let `n` more requests through, then cut the link.
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock() = Some(n);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Requests delivered so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn check_link(&self) -> Result<(), TransportError> {
        let mut fail_after = self.fail_after.lock();
        if let Some(remaining) = fail_after.as_mut() {
            if *remaining == 0 {
                self.connected.store(false, Ordering::SeqCst);
            } else {
                *remaining -= 1;
            }
        }
        if !self.is_connected() {
            return Err(TransportError::ConnectionFailed("link down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SyncTransport for MemoryTransport {
    async fn request(&self, request: SyncRequest) -> Result<SyncResponse, TransportError> {
        self.check_link()?;

        let payload =
            serde_json::to_string(&request).map_err(|e| TransportError::Encoding(e.to_string()))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.outgoing
            .send((payload, reply_tx))
            .await
            .map_err(|_| TransportError::Disconnected)?;
        let body = reply_rx.await.map_err(|_| TransportError::Disconnected)?;

        self.requests.fetch_add(1, Ordering::SeqCst);
        serde_json::from_str(&body).map_err(|e| TransportError::Encoding(e.to_string()))
    }
}
