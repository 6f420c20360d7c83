//! Server-side sessions.
//!
//! A [`SessionStore`] maps session ids to shared [`Session`]s. Requests
//! only hold an `Arc` to the session they resolved; the store owns it.

pub mod entity;
pub mod events;
pub mod store;

pub use entity::{Principal, Session};
pub use events::{SessionEvent, SessionListener};
pub use store::{Clock, ManualClock, SessionStore, SystemClock};
