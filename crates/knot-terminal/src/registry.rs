//! Identity → Session table with per-identity serialization.
//!
//! Every identity has its own slot guarded by an async mutex, so creating,
//! attaching, preempting and evicting one user's session never races itself
//! and never blocks another user.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use knot_core::UserIdentity;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::error::{RegistryError, SpawnError};
use crate::process::{ProcessEvents, ProcessHandle};
use crate::session::{outbound_capacity, AttachError, ConnectionId, Outbound, Session};

type Slot = Arc<Mutex<Option<Arc<Session>>>>;

/// How a connection ended up bound to its session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachKind {
    /// No live session existed; a process was spawned
    Created,
    /// Reattached to a detached session after replaying its buffer
    Resumed { replayed: usize },
    /// Another connection was attached; its process was killed and replaced
    Replaced,
}

/// Result of [`SessionRegistry::connect`]
#[derive(Debug)]
pub struct Attached {
    pub session: Arc<Session>,
    pub kind: AttachKind,
}

struct RegistryInner {
    slots: DashMap<UserIdentity, Slot>,
    buffer_capacity: usize,
    closed: AtomicBool,
}

/// At most one live [`Session`] per [`UserIdentity`]
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("slots", &self.inner.slots.len())
            .field("buffer_capacity", &self.inner.buffer_capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl SessionRegistry {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                slots: DashMap::new(),
                buffer_capacity,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn buffer_capacity(&self) -> usize {
        self.inner.buffer_capacity
    }

    /// Queue size connections should use so a full replay always fits
    pub fn outbound_capacity(&self) -> usize {
        outbound_capacity(self.inner.buffer_capacity)
    }

    /// Return the live session for `identity`, spawning one through `factory`
    /// if there is none. A dead session left in the slot is replaced.
    pub async fn get_or_create<F>(
        &self,
        identity: &UserIdentity,
        factory: F,
    ) -> Result<Arc<Session>, RegistryError>
    where
        F: FnOnce() -> Result<(ProcessHandle, ProcessEvents), SpawnError>,
    {
        self.ensure_open()?;
        let slot = self.slot(identity);
        let mut current = slot.lock().await;

        if let Some(session) = current.as_ref() {
            if session.is_alive() {
                return Ok(Arc::clone(session));
            }
        }

        let result = self.replace_locked(identity, &mut current, factory);
        drop(current);
        drop(slot);
        if result.is_err() {
            self.prune(identity);
        }
        result
    }

    /// Bind a connection to the user's session in one serialized step:
    /// create it, resume it with replay, or preempt the connection that holds it.
    pub async fn connect<F>(
        &self,
        identity: &UserIdentity,
        connection_id: ConnectionId,
        outbound: Outbound,
        factory: F,
    ) -> Result<Attached, RegistryError>
    where
        F: FnOnce() -> Result<(ProcessHandle, ProcessEvents), SpawnError>,
    {
        self.ensure_open()?;
        let slot = self.slot(identity);
        let mut current = slot.lock().await;

        let mut kind = AttachKind::Created;
        if let Some(session) = current.clone() {
            if session.is_alive() {
                match session.attach(connection_id, outbound.clone()) {
                    Ok(replayed) => {
                        return Ok(Attached {
                            session,
                            kind: AttachKind::Resumed { replayed },
                        });
                    }
                    Err(AttachError::AlreadyAttached) => {
                        session.preempt();
                        *current = None;
                        kind = AttachKind::Replaced;
                    }
                    Err(AttachError::ConnectionClosed) => {
                        return Err(RegistryError::ConnectionClosed);
                    }
                    Err(AttachError::Gone) => {}
                }
            }
        }

        let result = self
            .replace_locked(identity, &mut current, factory)
            .and_then(|session| match session.attach(connection_id, outbound) {
                Ok(_) => Ok(session),
                Err(_) => {
                    // Nobody is left to use the new process.
                    session.terminate();
                    *current = None;
                    Err(RegistryError::ConnectionClosed)
                }
            });

        drop(current);
        drop(slot);
        match result {
            Ok(session) => Ok(Attached { session, kind }),
            Err(e) => {
                self.prune(identity);
                Err(e)
            }
        }
    }

    /// Remove and terminate the user's session. Returns whether one existed.
    pub async fn evict(&self, identity: &UserIdentity) -> bool {
        let Some(slot) = self.existing_slot(identity) else {
            return false;
        };
        let removed = slot.lock().await.take();
        drop(slot);
        self.prune(identity);

        match removed {
            Some(session) => {
                info!(user = %identity, session_id = %session.id(), "Evicting terminal session");
                session.terminate();
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, identity: &UserIdentity) -> Option<Arc<Session>> {
        let slot = self.existing_slot(identity)?;
        let session = slot.lock().await.clone();
        session
    }

    /// All published sessions
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions = Vec::new();
        for slot in self.all_slots() {
            if let Some(session) = slot.lock().await.clone() {
                sessions.push(session);
            }
        }
        sessions
    }

    pub async fn len(&self) -> usize {
        self.sessions().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Refuse new sessions from now on
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            info!("Session registry closed to new sessions");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close the registry and take every session out of it.
    ///
    /// Each slot is emptied under its own lock, so an in-flight `connect`
    /// finishes first and its session is included.
    pub async fn drain_all(&self) -> Vec<Arc<Session>> {
        self.close();

        let identities: Vec<UserIdentity> =
            self.inner.slots.iter().map(|e| e.key().clone()).collect();

        let mut drained = Vec::with_capacity(identities.len());
        for identity in identities {
            let Some(slot) = self.existing_slot(&identity) else {
                continue;
            };
            if let Some(session) = slot.lock().await.take() {
                drained.push(session);
            }
            drop(slot);
            self.prune(&identity);
        }

        debug!(count = drained.len(), "Drained session registry");
        drained
    }

    fn ensure_open(&self) -> Result<(), RegistryError> {
        if self.is_closed() {
            return Err(RegistryError::Closed);
        }
        Ok(())
    }

    /// Spawn into an already-locked slot, retiring whatever it held
    fn replace_locked<F>(
        &self,
        identity: &UserIdentity,
        current: &mut Option<Arc<Session>>,
        factory: F,
    ) -> Result<Arc<Session>, RegistryError>
    where
        F: FnOnce() -> Result<(ProcessHandle, ProcessEvents), SpawnError>,
    {
        if let Some(stale) = current.take() {
            debug!(user = %identity, session_id = %stale.id(), "Replacing dead session");
            stale.terminate();
        }
        // Checked again under the lock so drain_all cannot miss a new session.
        self.ensure_open()?;

        let (handle, events) = factory().inspect_err(|e| {
            warn!(user = %identity, error = %e, "Failed to spawn terminal process");
        })?;
        let session = Session::start(
            identity.clone(),
            handle,
            events,
            self.inner.buffer_capacity,
        );
        *current = Some(Arc::clone(&session));
        self.watch(&session);
        Ok(session)
    }

    /// Remove the session from its slot once it is gone
    fn watch(&self, session: &Arc<Session>) {
        let registry = Arc::downgrade(&self.inner);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            session.closed().await;
            if let Some(inner) = Weak::upgrade(&registry) {
                SessionRegistry { inner }
                    .remove_if_current(session.identity(), session.id())
                    .await;
            }
        });
    }

    async fn remove_if_current(&self, identity: &UserIdentity, session_id: Uuid) {
        let Some(slot) = self.existing_slot(identity) else {
            return;
        };
        {
            let mut current = slot.lock().await;
            if current.as_ref().map(|s| s.id()) == Some(session_id) {
                *current = None;
                debug!(user = %identity, session_id = %session_id, "Removed ended session");
            }
        }
        drop(slot);
        self.prune(identity);
    }

    fn slot(&self, identity: &UserIdentity) -> Slot {
        Arc::clone(
            self.inner
                .slots
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .value(),
        )
    }

    fn existing_slot(&self, identity: &UserIdentity) -> Option<Slot> {
        self.inner.slots.get(identity).map(|e| Arc::clone(e.value()))
    }

    fn all_slots(&self) -> Vec<Slot> {
        self.inner
            .slots
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Drop an empty slot nobody else is holding
    fn prune(&self, identity: &UserIdentity) {
        self.inner.slots.remove_if(identity, |_, slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|s| s.is_none())
        });
    }
}
