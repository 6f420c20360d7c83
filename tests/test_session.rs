use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vessel::session::{ManualClock, Session, SessionEvent, SessionListener, SessionStore};

fn origin() -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 7], 51000))
}

/// Records event labels, with the attribute name when there is one.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl SessionListener for Recorder {
    fn on_event(&self, _session: &Session, event: &SessionEvent<'_>) {
        let entry = match event {
            SessionEvent::ValueBound { name, .. }
            | SessionEvent::ValueUnbound { name, .. }
            | SessionEvent::AttributeAdded { name, .. }
            | SessionEvent::AttributeReplaced { name, .. }
            | SessionEvent::AttributeRemoved { name, .. } => format!("{}:{name}", event.label()),
            _ => event.label().to_string(),
        };
        self.events.lock().unwrap().push(entry);
    }
}

fn store_with_recorder(timeout_secs: i64) -> (SessionStore, Arc<Recorder>, Arc<ManualClock>) {
    let recorder = Arc::new(Recorder::default());
    let clock = Arc::new(ManualClock::new(1_000_000));
    let store = SessionStore::with_parts(
        timeout_secs,
        vec![recorder.clone() as Arc<dyn SessionListener>],
        clock.clone(),
    );
    (store, recorder, clock)
}

#[test]
fn test_create_and_lookup_session() {
    let store = SessionStore::new(1800);

    let session = store.get_or_create(None, true, origin()).unwrap();
    assert!(session.is_new());
    assert_eq!(session.id().len(), 32);
    assert_eq!(store.len(), 1);

    let again = store.get_or_create(Some(session.id()), false, origin()).unwrap();
    assert!(Arc::ptr_eq(&session, &again));
    assert!(!again.is_new());
}

#[test]
fn test_lookup_without_create_returns_none() {
    let store = SessionStore::new(1800);

    assert!(store.get_or_create(Some("unknown"), false, origin()).is_none());
    assert!(store.get_or_create(None, false, origin()).is_none());
    assert!(store.is_empty());
}

#[test]
fn test_session_ids_are_unique() {
    let store = SessionStore::new(1800);

    let ids: std::collections::HashSet<String> = (0..200)
        .map(|_| store.create(origin()).id().to_string())
        .collect();

    assert_eq!(ids.len(), 200);
    assert_eq!(store.len(), 200);
}

#[test]
fn test_expired_session_is_destroyed_once() {
    let (store, recorder, clock) = store_with_recorder(1);
    let session = store.get_or_create(None, true, origin()).unwrap();
    let id = session.id().to_string();
    recorder.take();

    clock.advance(Duration::from_secs(2));

    assert!(store.get_or_create(Some(&id), false, origin()).is_none());
    assert!(store.get_or_create(Some(&id), false, origin()).is_none());
    assert!(!session.is_valid());
    assert!(store.is_empty());
    assert_eq!(recorder.take(), ["destroyed"]);
}

#[test]
fn test_access_refreshes_expiry() {
    let (store, _recorder, clock) = store_with_recorder(2);
    let session = store.create(origin());
    let id = session.id().to_string();

    for _ in 0..3 {
        clock.advance(Duration::from_millis(1500));
        assert!(store.get_or_create(Some(&id), false, origin()).is_some());
    }
    assert_eq!(session.last_accessed_time(), 1_000_000 + 4500);
}

#[test]
fn test_non_positive_timeout_never_expires() {
    let (store, _recorder, clock) = store_with_recorder(0);
    let session = store.create(origin());

    clock.advance(Duration::from_secs(365 * 24 * 3600));

    assert!(!session.is_expired(store.now_millis()));
    assert_eq!(store.purge_expired(), 0);
}

#[test]
fn test_purge_removes_only_expired_sessions() {
    let (store, _recorder, clock) = store_with_recorder(10);
    let stale = store.create(origin());
    let fresh = store.create(origin());
    fresh.set_max_inactive_interval(60);

    clock.advance(Duration::from_secs(30));

    assert_eq!(store.purge_expired(), 1);
    assert!(!stale.is_valid());
    assert!(fresh.is_valid());
    assert!(store.get(fresh.id()).is_some());
    assert!(store.get(stale.id()).is_none());
}

#[test]
fn test_attribute_event_order() {
    let (store, recorder, _clock) = store_with_recorder(60);
    let session = store.create(origin());
    assert_eq!(recorder.take(), ["created"]);

    session.set_attribute("cart", 1u32);
    assert_eq!(recorder.take(), ["bound:cart", "added:cart"]);

    session.set_attribute("cart", 2u32);
    assert_eq!(recorder.take(), ["bound:cart", "unbound:cart", "replaced:cart"]);
    assert_eq!(session.attribute_as::<u32>("cart").as_deref(), Some(&2));

    assert!(session.remove_attribute("cart").is_some());
    assert_eq!(recorder.take(), ["unbound:cart", "removed:cart"]);
    assert!(session.remove_attribute("cart").is_none());
    assert!(recorder.take().is_empty());
}

#[test]
fn test_invalidate_unbinds_attributes_after_destroyed() {
    let (store, recorder, _clock) = store_with_recorder(60);
    let session = store.create(origin());
    session.set_attribute("user", "alice".to_string());
    recorder.take();

    session.invalidate();
    session.invalidate();

    assert_eq!(recorder.take(), ["destroyed", "unbound:user", "removed:user"]);
    assert!(session.attribute_names().is_empty());
    assert!(store.is_empty());
}

#[test]
fn test_invalidate_all() {
    let (store, recorder, _clock) = store_with_recorder(60);
    store.create(origin());
    store.create(origin());
    recorder.take();

    store.invalidate_all();

    assert!(store.is_empty());
    assert_eq!(recorder.take(), ["destroyed", "destroyed"]);
}
