//! Connection registry.
//!
//! The registry owns every [`ConnectionConfig`] and at most one live
//! [`Session`] per connection. Entries survive session teardown, so a
//! connection can be reconnected any number of times.
//!
//! No hub publish and no store write happens while a map guard is held:
//! hub listeners are free to call back into the registry.

use crate::backoff::Backoff;
use crate::error::{RegistryError, SessionError, StoreError};
use crate::session::{Session, SessionConfig, SessionState};
use crate::store::{check_unique, ConfigStore, StoredConnections};
use dashmap::DashMap;
use printlink_core::topic::{CONNECTION_ADDED, CONNECTION_REMOVED, CONNECTION_UPDATED};
use printlink_core::{ConnectionConfig, ConnectionDraft, ConnectionId, EventHub};
use printlink_transport::Transport;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

struct Entry {
    seq: u64,
    config: ConnectionConfig,
    session: Option<Arc<Session>>,
}

/// A config together with its current session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    /// Stored config.
    #[serde(flatten)]
    pub config: ConnectionConfig,
    /// Session state, `closed` when there is no session.
    pub state: SessionState,
    /// Unix millis of the last inbound frame of the current session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<u64>,
}

/// Owner of connection configs and their sessions.
pub struct Registry {
    entries: DashMap<ConnectionId, Entry>,
    hub: Arc<EventHub>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ConfigStore>,
    session_config: SessionConfig,
    next_seq: AtomicU64,
    next_id: AtomicU64,
    persist_lock: Mutex<()>,
}

impl Registry {
    /// Create a registry and load the stored configs.
    ///
    /// # Errors
    ///
    /// Returns a store error if the configs cannot be loaded.
    pub fn open(
        hub: Arc<EventHub>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ConfigStore>,
        session_config: SessionConfig,
    ) -> Result<Self, RegistryError> {
        let StoredConnections { configs, next_id } = store.load()?;
        check_unique(&configs)?;

        let next_id = configs
            .iter()
            .filter_map(|c| c.id.sequence())
            .max()
            .map_or(1, |max| max + 1)
            .max(next_id);

        let entries = DashMap::new();
        for (seq, config) in configs.into_iter().enumerate() {
            entries.insert(
                config.id.clone(),
                Entry {
                    seq: seq as u64,
                    config,
                    session: None,
                },
            );
        }

        info!(
            connections = entries.len(),
            transport = transport.name(),
            "Registry opened"
        );

        Ok(Self {
            next_seq: AtomicU64::new(entries.len() as u64),
            entries,
            hub,
            transport,
            store,
            session_config,
            next_id: AtomicU64::new(next_id),
            persist_lock: Mutex::new(()),
        })
    }

    /// The hub sessions publish on.
    #[must_use]
    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    fn allocate_id(&self) -> ConnectionId {
        loop {
            let id = ConnectionId::sequential(self.next_id.fetch_add(1, Ordering::Relaxed));
            if !self.entries.contains_key(&id) {
                return id;
            }
        }
    }

    /// Write every config to the store, in creation order.
    fn persist(&self) -> Result<(), StoreError> {
        let _guard = self
            .persist_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.store.save(&StoredConnections {
            configs: self.configs(),
            next_id: self.next_id.load(Ordering::Relaxed),
        })
    }

    fn configs(&self) -> Vec<ConnectionConfig> {
        let mut entries: Vec<(u64, ConnectionConfig)> = self
            .entries
            .iter()
            .map(|e| (e.seq, e.config.clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, config)| config).collect()
    }

    fn session(&self, id: &ConnectionId) -> Option<Arc<Session>> {
        self.entries.get(id).and_then(|e| e.session.clone())
    }

    /// Add a connection config. Does not connect.
    ///
    /// # Errors
    ///
    /// Returns a config error for invalid input, or a store error if the
    /// config cannot be persisted.
    pub fn add(&self, draft: ConnectionDraft) -> Result<ConnectionId, RegistryError> {
        // The ID is only taken once the draft is known to be valid
        let mut config = draft.validate(ConnectionId::new(""))?;
        let id = self.allocate_id();
        config.id = id.clone();

        self.entries.insert(
            id.clone(),
            Entry {
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                config: config.clone(),
                session: None,
            },
        );

        if let Err(e) = self.persist() {
            self.entries.remove(&id);
            return Err(e.into());
        }

        info!(connection = %id, addr = %config.control_addr(), "Connection added");
        self.hub.publish(CONNECTION_ADDED, json!(config));
        Ok(id)
    }

    /// Replace a connection config.
    ///
    /// A live session keeps its endpoint until it is reconnected.
    ///
    /// # Errors
    ///
    /// Returns `UnknownConnection` if the ID has no config, a config error for
    /// invalid input, or a store error.
    pub fn update(&self, id: &ConnectionId, draft: ConnectionDraft) -> Result<(), RegistryError> {
        let config = draft.validate(id.clone())?;

        let previous = match self.entries.get_mut(id) {
            Some(mut entry) => std::mem::replace(&mut entry.config, config.clone()),
            None => return Err(RegistryError::UnknownConnection(id.clone())),
        };

        if let Err(e) = self.persist() {
            if let Some(mut entry) = self.entries.get_mut(id) {
                entry.config = previous;
            }
            return Err(e.into());
        }

        info!(connection = %id, addr = %config.control_addr(), "Connection updated");
        self.hub.publish(CONNECTION_UPDATED, json!(config));
        Ok(())
    }

    /// Remove a connection, destroying its session. Unknown IDs are ignored.
    ///
    /// # Errors
    ///
    /// Returns a store error if the removal cannot be persisted. The
    /// connection and its session are then left untouched.
    pub async fn remove(&self, id: &ConnectionId) -> Result<(), RegistryError> {
        let Some((_, entry)) = self.entries.remove(id) else {
            debug!(connection = %id, "Remove of unknown connection ignored");
            return Ok(());
        };

        if let Err(e) = self.persist() {
            self.entries.insert(id.clone(), entry);
            return Err(e.into());
        }

        if let Some(session) = entry.session {
            session.shutdown().await;
        }

        info!(connection = %id, "Connection removed");
        self.hub.publish(CONNECTION_REMOVED, json!({ "id": id }));
        Ok(())
    }

    /// Connect a configured device and wait until the session opens.
    ///
    /// If a session already exists and is not closed, no new transport is
    /// opened and the call waits on that session instead.
    ///
    /// # Errors
    ///
    /// Returns `UnknownConnection` if the ID has no config, or
    /// `ConnectFailed` if the session closes before opening.
    pub async fn connect(&self, id: &ConnectionId) -> Result<(), RegistryError> {
        let (session, fresh) = {
            let mut entry = self
                .entries
                .get_mut(id)
                .ok_or_else(|| RegistryError::UnknownConnection(id.clone()))?;

            let live = entry
                .session
                .as_ref()
                .filter(|s| s.state() != SessionState::Closed)
                .cloned();

            match live {
                Some(session) => (session, false),
                None => {
                    let session = Arc::new(Session::new(
                        &entry.config,
                        Arc::clone(&self.hub),
                        Arc::clone(&self.transport),
                        self.session_config.clone(),
                    ));
                    entry.session = Some(Arc::clone(&session));
                    (session, true)
                }
            }
        };

        let mut state = session.watch_state();
        if fresh {
            if let Err(e) = session.connect() {
                debug!(connection = %id, error = %e, "Session closed before connect");
            }
        } else {
            debug!(connection = %id, state = %session.state(), "Joining existing session");
        }

        let reached = state
            .wait_for(|s| matches!(s, SessionState::Open | SessionState::Closed))
            .await
            .map(|s| *s);

        match reached {
            Ok(SessionState::Open) => Ok(()),
            _ => Err(RegistryError::ConnectFailed(id.clone())),
        }
    }

    /// Connect, retrying failed attempts with backoff.
    ///
    /// Only `ConnectFailed` is retried. The connection being removed or an
    /// exhausted attempt budget ends the loop.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub async fn connect_with_retry(
        &self,
        id: &ConnectionId,
        backoff: &Backoff,
    ) -> Result<(), RegistryError> {
        let mut attempt = 1;
        loop {
            match self.connect(id).await {
                Err(RegistryError::ConnectFailed(_)) if backoff.allows(attempt + 1) => {
                    let delay = backoff.delay(attempt);
                    warn!(
                        connection = %id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Send a payload on an open session.
    ///
    /// # Errors
    ///
    /// Returns `UnknownConnection` for unknown IDs and `NotConnected` unless
    /// the session is open.
    pub fn send(&self, id: &ConnectionId, payload: &Value) -> Result<(), RegistryError> {
        let session = self
            .entries
            .get(id)
            .ok_or_else(|| RegistryError::UnknownConnection(id.clone()))?
            .session
            .clone();

        let Some(session) = session else {
            return Err(RegistryError::NotConnected(id.clone()));
        };

        session.send(payload).map_err(|e| match e {
            SessionError::InvalidState { .. } => RegistryError::NotConnected(id.clone()),
            other => other.into(),
        })
    }

    /// Close the session of a connection. No-op without a session.
    pub fn close(&self, id: &ConnectionId) {
        match self.session(id) {
            Some(session) => session.close(),
            None => debug!(connection = %id, "Close without session ignored"),
        }
    }

    /// Session state, `closed` when there is no session or config.
    #[must_use]
    pub fn state(&self, id: &ConnectionId) -> SessionState {
        self.session(id)
            .map_or(SessionState::Closed, |session| session.state())
    }

    /// Stored config of a connection.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionConfig> {
        self.entries.get(id).map(|e| e.config.clone())
    }

    /// Summary of one connection.
    #[must_use]
    pub fn summary(&self, id: &ConnectionId) -> Option<ConnectionSummary> {
        self.entries.get(id).map(|e| summarize(&e))
    }

    /// All connections in creation order.
    #[must_use]
    pub fn list(&self) -> Vec<ConnectionSummary> {
        let mut entries: Vec<(u64, ConnectionSummary)> = self
            .entries
            .iter()
            .map(|e| (e.seq, summarize(&e)))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Number of configured connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no connections are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close every session and wait for them to finish.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self
            .entries
            .iter()
            .filter_map(|e| e.session.clone())
            .collect();

        info!(sessions = sessions.len(), "Shutting down registry");

        let mut tasks = JoinSet::new();
        for session in sessions {
            tasks.spawn(async move { session.shutdown().await });
        }
        while tasks.join_next().await.is_some() {}
    }
}

fn summarize(entry: &Entry) -> ConnectionSummary {
    let session = entry.session.as_deref();
    ConnectionSummary {
        config: entry.config.clone(),
        state: session.map_or(SessionState::Closed, Session::state),
        last_heartbeat_at: session.and_then(Session::last_heartbeat_at),
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("connections", &self.entries.len())
            .field("transport", &self.transport.name())
            .finish()
    }
}
