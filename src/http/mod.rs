//! HTTP protocol implementation.
//!
//! The HTTP layer is organized into several submodules:
//!
//! - **`connection`**: The per-connection request loop (state machine below)
//! - **`parser`**: Request line, header, cookie, locale and parameter parsing
//! - **`request`** / **`response`**: Pooled per-cycle request and response objects
//! - **`writer`**: Status line, header and cookie serialization, keep-alive decision
//! - **`cookie`** / **`locale`**: Value types produced by the parser
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌──────────────────┐
//!        │     Reading      │ ← Wait for a complete request (read timeout,
//!        └──────┬───────────┘   or keep-alive timeout between requests)
//!               │ Request parsed
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Dispatch through the application and
//!        └──────┬───────────┘   write the response
//!               │
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close, timeout or malformed request → Closed
//! ```

pub mod connection;
pub mod cookie;
pub mod locale;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
