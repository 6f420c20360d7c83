//! Error types shared by the dispatch engine, handler units and the server.

use std::any::Any;

use thiserror::Error;

/// Error kind given to a handler or filter that panicked.
pub const PANIC_KIND: &str = "panic";

/// Errors raised while processing a single request.
///
/// Handler units and filters return this type. Anything that is not a
/// protocol or state error is wrapped as a [`ServletError::Fault`], whose
/// `kind` selects an error page.
#[derive(Debug, Error)]
pub enum ServletError {
    /// An operation was attempted in a state that forbids it, such as
    /// resetting a committed response.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// Reading from or writing to the client failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A handler unit or filter could not be instantiated or initialised.
    #[error("unit '{unit}' is unavailable: {reason}")]
    Unavailable { unit: String, reason: String },

    /// An application fault. `kind` is matched against the error-page table.
    #[error("{kind}: {source}")]
    Fault {
        kind: String,
        #[source]
        source: anyhow::Error,
    },

    /// A pooled request or response object could not be allocated.
    #[error("{0} pool exhausted")]
    ObjectPoolExhausted(&'static str),
}

impl ServletError {
    /// Wraps an arbitrary error as an application fault of the given kind.
    pub fn fault(kind: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        ServletError::Fault {
            kind: kind.into(),
            source: source.into(),
        }
    }

    /// Turns a caught panic into a fault of kind [`PANIC_KIND`].
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::fault(PANIC_KIND, anyhow::anyhow!(panic_message(payload.as_ref())))
    }

    /// The key used to look up an error page for this error.
    pub fn kind(&self) -> &str {
        match self {
            ServletError::IllegalState(_) => "illegal-state",
            ServletError::Io(_) => "io",
            ServletError::Unavailable { .. } => "unavailable",
            ServletError::Fault { kind, .. } => kind,
            ServletError::ObjectPoolExhausted(_) => "pool-exhausted",
        }
    }

    /// Whether the error came from the client socket rather than the
    /// application, in which case no error page should be attempted.
    pub fn is_client_io(&self) -> bool {
        matches!(self, ServletError::Io(_))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Errors detected while assembling a [`WebApp`](crate::webapp::WebApp).
///
/// These surface at startup, never while serving requests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown authentication scheme '{0}'")]
    UnknownAuthScheme(String),

    #[error("unknown realm '{0}'")]
    UnknownRealm(String),

    #[error("no handler unit named '{0}'")]
    UnknownUnit(String),

    #[error("no filter named '{0}'")]
    UnknownFilter(String),

    #[error("invalid url pattern '{0}'")]
    InvalidPattern(String),

    #[error("duplicate definition of '{0}'")]
    Duplicate(String),

    #[error("security constraints require a login configuration")]
    MissingLoginConfig,
}
