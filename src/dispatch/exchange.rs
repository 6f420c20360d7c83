use std::sync::Arc;

use tracing::debug;

use crate::dispatch::dispatcher::RequestDispatcher;
use crate::error::ServletError;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::session::Session;
use crate::webapp::WebApp;

/// What a handler or filter sees of one request cycle: the request, the
/// response, and the application serving them.
pub struct Exchange<'a> {
    pub request: &'a mut Request,
    pub response: &'a mut Response,
    app: &'a WebApp,
}

impl<'a> Exchange<'a> {
    pub fn new(app: &'a WebApp, request: &'a mut Request, response: &'a mut Response) -> Self {
        Self {
            request,
            response,
            app,
        }
    }

    pub fn app(&self) -> &'a WebApp {
        self.app
    }

    /// The caller's session.
    ///
    /// With `create`, a missing or expired session is replaced by a new one
    /// and its cookie is added to the response, which therefore must not be
    /// committed yet.
    pub fn session(&mut self, create: bool) -> Result<Option<Arc<Session>>, ServletError> {
        if let Some(session) = self.request.cached_session() {
            if session.is_valid() {
                return Ok(Some(Arc::clone(session)));
            }
        }

        let store = self.app.sessions();
        let remote = self.request.remote_addr();
        let session = match store.get_or_create(self.request.session_cookie(), false, remote) {
            Some(session) => Some(session),
            None if create => {
                if self.response.is_committed() {
                    return Err(ServletError::IllegalState(
                        "session creation after response commit",
                    ));
                }
                let session = store.create(remote);
                self.response.add_cookie(self.app.session_cookie(session.id()));
                Some(session)
            }
            None => None,
        };
        self.request.cache_session(session.clone());
        Ok(session)
    }

    /// Invalidates the session and forgets the authenticated caller.
    pub fn logout(&mut self) -> Result<(), ServletError> {
        if let Some(session) = self.session(false)? {
            debug!(session = session.id(), "logout");
            session.invalidate();
        }
        self.request.cache_session(None);
        self.request.set_principal(None);
        Ok(())
    }

    /// A dispatcher for `path`, which may carry a query string. Paths
    /// without a leading `/` are taken relative to the current one.
    pub fn dispatcher(&self, path: &str) -> Option<RequestDispatcher> {
        if path.starts_with('/') {
            return self.app.dispatcher(path);
        }
        let current = self.request.local_path();
        let base = current.rsplit_once('/').map_or("", |(dir, _)| dir);
        self.app.dispatcher(&format!("{base}/{path}"))
    }

    pub fn named_dispatcher(&self, unit: &str) -> Option<RequestDispatcher> {
        self.app.named_dispatcher(unit)
    }

    /// Forwards to `path`, which must resolve to a handler. Returns
    /// `false` when a security constraint turned the forward away.
    pub async fn forward(&mut self, path: &str) -> Result<bool, ServletError> {
        let dispatcher = self.dispatcher(path).ok_or_else(|| no_target(path))?;
        dispatcher.forward(self).await
    }

    /// Includes the output of `path`, which must resolve to a handler.
    pub async fn include(&mut self, path: &str) -> Result<(), ServletError> {
        let dispatcher = self.dispatcher(path).ok_or_else(|| no_target(path))?;
        dispatcher.include(self).await
    }
}

fn no_target(path: &str) -> ServletError {
    ServletError::Unavailable {
        unit: path.to_string(),
        reason: "no handler resolves this path".to_string(),
    }
}
