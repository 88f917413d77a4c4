//! Connection registry and per-connection stream sessions.
//!
//! The registry is the only state shared between socket handlers and
//! session tasks. Removing a connection cancels its live session first, so a
//! pump that notices the missing entry has already been told to stop.
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use crate::transport::Transport;

/// Opaque id assigned to each client connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    #[error("connection {0} already has an active speech stream")]
    StreamInProgress(ConnectionId),
}

#[derive(Debug, Clone)]
struct SessionHandle {
    id: u64,
    cancel: CancellationToken,
}

/// One in-flight synthesis for a connection.
///
/// Counters are private to the task that owns the session; only the
/// cancellation token is shared with the connection.
#[derive(Debug)]
pub struct StreamSession {
    id: u64,
    cancel: CancellationToken,
    next_index: u64,
    total_bytes: u64,
}

impl StreamSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Account for one emitted frame and return its index.
    pub fn record_frame(&mut self, len: usize) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        self.total_bytes += len as u64;
        index
    }

    /// Index the next frame will carry.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn chunks_sent(&self) -> u64 {
        self.next_index
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

pub struct Connection {
    id: ConnectionId,
    connected_at: DateTime<Utc>,
    transport: Arc<dyn Transport>,
    active: Mutex<Option<SessionHandle>>,
    session_seq: AtomicU64,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("connected_at", &self.connected_at)
            .field("streaming", &self.is_streaming())
            .finish()
    }
}

impl Connection {
    fn new(id: ConnectionId, transport: Arc<dyn Transport>) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            transport,
            active: Mutex::new(None),
            session_seq: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_streaming(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Claim the single stream slot. Fails if a session is still live.
    pub fn begin_session(&self) -> Result<StreamSession, RegistryError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            return Err(RegistryError::StreamInProgress(self.id.clone()));
        }
        let handle = SessionHandle {
            id: self.session_seq.fetch_add(1, Ordering::Relaxed) + 1,
            cancel: CancellationToken::new(),
        };
        *active = Some(handle.clone());
        Ok(StreamSession {
            id: handle.id,
            cancel: handle.cancel,
            next_index: 0,
            total_bytes: 0,
        })
    }

    /// Release the slot if it still belongs to `session_id`.
    pub fn end_session(&self, session_id: u64) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(handle) if handle.id == session_id => {
                *active = None;
                true
            }
            _ => false,
        }
    }

    /// Halt the live session and free the slot in one step.
    ///
    /// The old task keeps running until it observes its token, but every
    /// emission is gated on that token, so a new session can start at once.
    /// Its later `end_session` call no longer matches and is a no-op.
    pub fn cancel_session(&self) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.take() {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            socket_id: self.id.to_string(),
            is_streaming: self.is_streaming(),
            connected_at: self.connected_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub socket_id: String,
    pub is_streaming: bool,
    pub connected_at: DateTime<Utc>,
}

/// Map of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        id: ConnectionId,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Connection>, RegistryError> {
        let mut connections = self.connections.write().await;
        if connections.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        let connection = Arc::new(Connection::new(id.clone(), transport));
        connections.insert(id, connection.clone());
        Ok(connection)
    }

    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(id)
    }

    /// Remove a connection, cancelling its live session before the entry
    /// disappears.
    pub async fn unregister(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.get(id) {
            if connection.cancel_session() {
                debug!(connection = %id, "cancelled live session on unregister");
            }
        }
        connections.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<ConnectionStats> {
        let connections = self.connections.read().await;
        let mut stats: Vec<ConnectionStats> = connections.values().map(|c| c.stats()).collect();
        stats.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        stats
    }

    /// Cancel every live session and drop all connections.
    pub async fn clear(&self) -> usize {
        let mut connections = self.connections.write().await;
        for connection in connections.values() {
            connection.cancel_session();
        }
        let count = connections.len();
        connections.clear();
        count
    }
}
