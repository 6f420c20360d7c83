use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::http::request::Attribute;
use crate::session::events::SessionEvent;
use crate::session::store::StoreShared;

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub roles: Vec<String>,
    /// The scheme that authenticated the caller, e.g. `BASIC`.
    pub auth_type: String,
}

impl Principal {
    pub fn new(name: impl Into<String>, roles: Vec<String>, auth_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles,
            auth_type: auth_type.into(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Server-side state tied to one client by the session cookie.
///
/// Sessions are shared between handler threads through `Arc`; every
/// field is independently synchronised. Times are epoch milliseconds from
/// the store's clock.
pub struct Session {
    id: String,
    created_at: i64,
    last_accessed: AtomicI64,
    max_inactive_secs: AtomicI64,
    is_new: AtomicBool,
    valid: AtomicBool,
    attributes: Mutex<HashMap<String, Attribute>>,
    principal: Mutex<Option<Principal>>,
    store: Weak<StoreShared>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Session {
    pub(crate) fn new(id: String, now: i64, max_inactive_secs: i64, store: Weak<StoreShared>) -> Self {
        Self {
            id,
            created_at: now,
            last_accessed: AtomicI64::new(now),
            max_inactive_secs: AtomicI64::new(max_inactive_secs),
            is_new: AtomicBool::new(true),
            valid: AtomicBool::new(true),
            attributes: Mutex::new(HashMap::new()),
            principal: Mutex::new(None),
            store,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn creation_time(&self) -> i64 {
        self.created_at
    }

    pub fn last_accessed_time(&self) -> i64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    /// Seconds of inactivity before expiry; `<= 0` never expires.
    pub fn max_inactive_interval(&self) -> i64 {
        self.max_inactive_secs.load(Ordering::Relaxed)
    }

    pub fn set_max_inactive_interval(&self, secs: i64) {
        self.max_inactive_secs.store(secs, Ordering::Relaxed);
    }

    /// True until the client sends the session back.
    pub fn is_new(&self) -> bool {
        self.is_new.load(Ordering::Relaxed)
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        let max_inactive = self.max_inactive_interval();
        max_inactive > 0 && self.last_accessed_time() + max_inactive * 1000 < now
    }

    /// Records a client access. Concurrent accesses race; the last write wins.
    pub(crate) fn access(&self, now: i64) {
        self.last_accessed.store(now, Ordering::Relaxed);
        self.is_new.store(false, Ordering::Relaxed);
    }

    pub fn principal(&self) -> Option<Principal> {
        lock(&self.principal).clone()
    }

    pub fn set_principal(&self, principal: Option<Principal>) {
        *lock(&self.principal) = principal;
    }

    pub fn attribute(&self, name: &str) -> Option<Attribute> {
        lock(&self.attributes).get(name).cloned()
    }

    /// The named attribute, if present and of type `T`.
    pub fn attribute_as<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.attribute(name).and_then(|v| v.downcast::<T>().ok())
    }

    pub fn attribute_names(&self) -> Vec<String> {
        lock(&self.attributes).keys().cloned().collect()
    }

    pub fn set_attribute<T: Any + Send + Sync>(&self, name: &str, value: T) {
        self.set_attribute_arc(name, Arc::new(value));
    }

    /// Stores an attribute and notifies listeners.
    pub fn set_attribute_arc(&self, name: &str, value: Attribute) {
        self.notify(&SessionEvent::ValueBound { name, value: &value });
        let old = lock(&self.attributes).insert(name.to_string(), Arc::clone(&value));
        match old {
            Some(old) => {
                self.notify(&SessionEvent::ValueUnbound { name, value: &old });
                self.notify(&SessionEvent::AttributeReplaced { name, old: &old });
            }
            None => self.notify(&SessionEvent::AttributeAdded { name, value: &value }),
        }
    }

    pub fn remove_attribute(&self, name: &str) -> Option<Attribute> {
        let removed = lock(&self.attributes).remove(name);
        if let Some(value) = &removed {
            self.notify(&SessionEvent::ValueUnbound { name, value });
            self.notify(&SessionEvent::AttributeRemoved { name, value });
        }
        removed
    }

    /// Ends the session: notifies listeners, removes every attribute and
    /// drops the session from its store. Later calls do nothing.
    pub fn invalidate(&self) {
        if !self.valid.swap(false, Ordering::AcqRel) {
            return;
        }
        self.notify(&SessionEvent::Destroyed);

        let drained: Vec<(String, Attribute)> = lock(&self.attributes).drain().collect();
        for (name, value) in &drained {
            self.notify(&SessionEvent::ValueUnbound { name, value });
            self.notify(&SessionEvent::AttributeRemoved { name, value });
        }
        *lock(&self.principal) = None;

        if let Some(store) = self.store.upgrade() {
            store.sessions.remove(&self.id);
        }
    }

    pub(crate) fn notify(&self, event: &SessionEvent<'_>) {
        if let Some(store) = self.store.upgrade() {
            for listener in &store.listeners {
                listener.on_event(self, event);
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("last_accessed", &self.last_accessed_time())
            .field("valid", &self.is_valid())
            .finish()
    }
}
