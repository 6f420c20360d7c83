//! Session lifecycle and attribute notifications.

use crate::http::request::Attribute;
use crate::session::entity::Session;

/// Something that happened to a session.
///
/// For an attribute write the order is: `ValueBound` for the new value,
/// the write itself, `ValueUnbound` for a replaced value, then
/// `AttributeAdded` or `AttributeReplaced`.
pub enum SessionEvent<'a> {
    Created,
    Destroyed,
    ValueBound { name: &'a str, value: &'a Attribute },
    ValueUnbound { name: &'a str, value: &'a Attribute },
    AttributeAdded { name: &'a str, value: &'a Attribute },
    /// `old` is the value that was replaced.
    AttributeReplaced { name: &'a str, old: &'a Attribute },
    AttributeRemoved { name: &'a str, value: &'a Attribute },
}

impl SessionEvent<'_> {
    /// A short name for logs and tests.
    pub fn label(&self) -> &'static str {
        match self {
            SessionEvent::Created => "created",
            SessionEvent::Destroyed => "destroyed",
            SessionEvent::ValueBound { .. } => "bound",
            SessionEvent::ValueUnbound { .. } => "unbound",
            SessionEvent::AttributeAdded { .. } => "added",
            SessionEvent::AttributeReplaced { .. } => "replaced",
            SessionEvent::AttributeRemoved { .. } => "removed",
        }
    }
}

/// Receives session notifications.
///
/// Called on the thread that caused the event, without any session lock
/// held, so listeners may read the session.
pub trait SessionListener: Send + Sync {
    fn on_event(&self, session: &Session, event: &SessionEvent<'_>);
}
