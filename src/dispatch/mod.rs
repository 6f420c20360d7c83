//! The dispatch engine.
//!
//! - **`pattern`** / **`routes`**: URL patterns and path-to-unit resolution
//! - **`unit`**: handler units and their lifecycle
//! - **`filter`**: filter mappings and the filter chain
//! - **`security`** / **`auth`**: constraints, realms and authentication schemes
//! - **`dispatcher`**: request, forward, include and error dispatches
//! - **`exchange`**: the handler-facing view of one request cycle

pub mod auth;
pub mod dispatcher;
pub mod exchange;
pub mod filter;
pub mod pattern;
pub mod routes;
pub mod security;
pub mod unit;

pub use auth::{AuthRegistry, Authenticator, LoginConfig, MemoryRealm, Realm, UserEntry};
pub use dispatcher::{attrs, DispatchState, RequestDispatcher};
pub use exchange::Exchange;
pub use filter::{DispatchType, Filter, FilterChain, FilterMapping, Matcher};
pub use pattern::UrlPattern;
pub use routes::{MatchKind, RouteMatch, RouteTable};
pub use security::SecurityConstraint;
pub use unit::{Handler, Unit, UnitConfig};
