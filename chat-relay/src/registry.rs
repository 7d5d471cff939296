use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
    sync::{Mutex, RwLock},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{error::DeliveryError, protocol::write_line};

/// Opaque identity of one connection. Display names are not unique, this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection state. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Active = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Active,
            _ => SessionState::Closed,
        }
    }
}

type Outbound = Box<dyn AsyncWrite + Send + Unpin>;

/// Send side of a session: the outbound half of its transport plus its state.
///
/// Other sessions write through [`Peer::send`] while the owning session is
/// blocked reading, so the writer lives behind an async mutex. Once the peer
/// is `Closed` every send fails with [`DeliveryError::Closed`] instead of
/// touching the transport.
pub struct Peer {
    id: SessionId,
    state: AtomicU8,
    writer: Mutex<Option<Outbound>>,
    closing: CancellationToken,
}

impl Peer {
    pub fn new<W>(id: SessionId, writer: W, closing: CancellationToken) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Self {
            id,
            state: AtomicU8::new(SessionState::Connecting as u8),
            writer: Mutex::new(Some(Box::new(writer))),
            closing,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Writes one line to this session's client.
    ///
    /// Any failure also asks the owning session to close, so a dead transport
    /// found by a broadcaster is cleaned up by the session itself.
    pub async fn send(&self, line: &str) -> Result<(), DeliveryError> {
        let mut writer = self.writer.lock().await;
        if self.state() == SessionState::Closed {
            self.request_close();
            return Err(DeliveryError::Closed);
        }
        let Some(writer) = writer.as_mut() else {
            self.request_close();
            return Err(DeliveryError::Closed);
        };
        self.write_or_abandon(writer, line).await
    }

    /// Moves `Connecting -> Active`: writes `greeting`, then registers with
    /// `registry`. The writer stays locked throughout so no broadcast can land
    /// before the greeting, and a session whose greeting failed never joins.
    pub async fn activate(
        self: &Arc<Self>,
        registry: &SessionRegistry,
        greeting: &str,
    ) -> Result<(), DeliveryError> {
        let mut writer = self.writer.lock().await;
        if self.state() != SessionState::Connecting {
            return Err(DeliveryError::Closed);
        }
        let Some(writer) = writer.as_mut() else {
            self.request_close();
            return Err(DeliveryError::Closed);
        };
        self.write_or_abandon(writer, greeting).await?;

        let activated = self.state.compare_exchange(
            SessionState::Connecting as u8,
            SessionState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if activated.is_err() {
            return Err(DeliveryError::Closed);
        }
        registry.register(Arc::clone(self)).await;
        Ok(())
    }

    /// Writes `line` unless a close is requested first. A client that stopped
    /// reading would otherwise pin the writer lock and stall shutdown.
    async fn write_or_abandon(
        &self,
        writer: &mut Outbound,
        line: &str,
    ) -> Result<(), DeliveryError> {
        let result = select! {
            biased;
            _ = self.closing.cancelled() => Err(DeliveryError::Closed),
            written = write_line(writer, line) => written.map_err(DeliveryError::Io),
        };
        if result.is_err() {
            self.request_close();
        }
        result
    }

    /// Asks the owning session to stop. Safe to call any number of times.
    pub fn request_close(&self) {
        self.closing.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Completes once a close was requested, locally or by server shutdown.
    pub async fn closed(&self) {
        self.closing.cancelled().await;
    }

    /// Marks the peer closed and releases its transport. Idempotent.
    pub async fn shutdown(&self) {
        self.mark_closed();
        self.request_close();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(error) = writer.shutdown().await {
                debug!(session = %self.id, ?error, "transport shutdown failed");
            }
        }
    }

    fn mark_closed(&self) {
        self.state
            .fetch_max(SessionState::Closed as u8, Ordering::AcqRel);
    }
}

/// The set of `Active` sessions shared by every connection task.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Peer>>>,
    next_id: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Adds `peer` to the active set. Registering the same id twice is a caller bug.
    pub async fn register(&self, peer: Arc<Peer>) {
        let mut sessions = self.sessions.write().await;
        let previous = sessions.insert(peer.id(), peer);
        debug_assert!(previous.is_none(), "session registered twice");
    }

    /// Removes a session if present and returns it.
    ///
    /// The peer is marked closed before the write lock is released, so a
    /// broadcast that snapshotted it earlier will skip it from now on.
    pub async fn unregister(&self, id: SessionId) -> Option<Arc<Peer>> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(&id);
        if let Some(peer) = &removed {
            peer.mark_closed();
        }
        removed
    }

    /// Delivers `line` to every registered session except `excluded`.
    ///
    /// Returns the number of successful deliveries. Recipients that cannot be
    /// reached are skipped; they close on their own task.
    pub async fn broadcast_except(&self, line: &str, excluded: SessionId) -> usize {
        let recipients: Vec<Arc<Peer>> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|peer| peer.id() != excluded)
                .cloned()
                .collect()
        };

        let mut delivered = 0;
        for peer in recipients {
            match peer.send(line).await {
                Ok(()) => delivered += 1,
                Err(error) => {
                    debug!(session = %peer.id(), %error, "skipping unreachable session");
                }
            }
        }
        delivered
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
