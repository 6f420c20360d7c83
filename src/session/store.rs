use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::session::entity::Session;
use crate::session::events::{SessionEvent, SessionListener};

/// Source of the current time for session expiry.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub(crate) struct StoreShared {
    pub(crate) sessions: DashMap<String, Arc<Session>>,
    pub(crate) listeners: Vec<Arc<dyn SessionListener>>,
    clock: Arc<dyn Clock>,
    counter: AtomicU64,
}

/// All live sessions of one application.
///
/// The map is shared by every handler thread. Expiry is checked lazily
/// when a session is looked up, and in bulk by [`SessionStore::purge_expired`].
#[derive(Clone)]
pub struct SessionStore {
    shared: Arc<StoreShared>,
    default_timeout_secs: i64,
}

impl SessionStore {
    pub fn new(default_timeout_secs: i64) -> Self {
        Self::with_parts(default_timeout_secs, Vec::new(), Arc::new(SystemClock))
    }

    pub fn with_parts(
        default_timeout_secs: i64,
        listeners: Vec<Arc<dyn SessionListener>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                sessions: DashMap::new(),
                listeners,
                clock,
                counter: AtomicU64::new(0),
            }),
            default_timeout_secs,
        }
    }

    pub fn now_millis(&self) -> i64 {
        self.shared.clock.now_millis()
    }

    pub fn default_timeout_secs(&self) -> i64 {
        self.default_timeout_secs
    }

    pub fn len(&self) -> usize {
        self.shared.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.sessions.is_empty()
    }

    /// Looks a session up without touching it or checking expiry.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.shared.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the live session named by `id`, refreshing its access
    /// time. An expired session is invalidated on the way. When no live
    /// session exists and `create` is set, a new one is made for `origin`.
    pub fn get_or_create(
        &self,
        id: Option<&str>,
        create: bool,
        origin: SocketAddr,
    ) -> Option<Arc<Session>> {
        let now = self.now_millis();
        if let Some(session) = id.and_then(|id| self.get(id)) {
            if session.is_expired(now) {
                debug!(session = session.id(), "session expired");
                session.invalidate();
            } else if session.is_valid() {
                session.access(now);
                return Some(session);
            }
        }

        if create {
            Some(self.create(origin))
        } else {
            None
        }
    }

    /// Makes a new session with the default timeout.
    pub fn create(&self, origin: SocketAddr) -> Arc<Session> {
        let now = self.now_millis();
        let session = loop {
            let id = self.generate_id(origin, now);
            let candidate = Arc::new(Session::new(
                id.clone(),
                now,
                self.default_timeout_secs,
                Arc::downgrade(&self.shared),
            ));
            match self.shared.sessions.entry(id) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&candidate));
                    break candidate;
                }
            }
        };

        debug!(session = session.id(), %origin, "session created");
        session.notify(&SessionEvent::Created);
        session
    }

    /// Session ids hash the client address and port, the time and a
    /// per-store counter.
    fn generate_id(&self, origin: SocketAddr, now: i64) -> String {
        let sequence = self.shared.counter.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);

        let mut hasher = Sha256::new();
        hasher.update(origin.ip().to_string().as_bytes());
        hasher.update(origin.port().to_be_bytes());
        hasher.update(now.to_be_bytes());
        hasher.update(nanos.to_be_bytes());
        hasher.update(sequence.to_be_bytes());
        hex::encode_upper(&hasher.finalize()[..16])
    }

    /// Invalidates every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.now_millis();
        let expired: Vec<Arc<Session>> = self
            .shared
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for session in &expired {
            session.invalidate();
        }
        expired.len()
    }

    /// Invalidates every session, as at shutdown.
    pub fn invalidate_all(&self) {
        let all: Vec<Arc<Session>> = self
            .shared
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for session in all {
            session.invalidate();
        }
    }
}
