//! Vessel - a small HTTP application server
//!
//! Accepts HTTP/0.9, 1.0 and 1.1 connections, routes each request through
//! filters and security constraints to application handler units, and
//! keeps server-side sessions.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod server;
pub mod session;
pub mod webapp;

pub use error::{ConfigError, ServletError};
pub use webapp::{WebApp, WebAppBuilder};
