//! The application: routing tables, units, filters, security and error
//! pages, all fixed when [`WebAppBuilder::build`] returns.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info};

use crate::dispatch::auth::{AuthRegistry, Authenticator, LoginConfig};
use crate::dispatch::dispatcher::{attrs, RequestDispatcher};
use crate::dispatch::exchange::Exchange;
use crate::dispatch::filter::{Filter, FilterLists, FilterMapping, Matcher};
use crate::dispatch::pattern::UrlPattern;
use crate::dispatch::routes::{MatchKind, RouteTable};
use crate::dispatch::security::SecurityConstraint;
use crate::dispatch::unit::{Handler, Registry, UnitConfig, UnitSlot};
use crate::error::{ConfigError, ServletError};
use crate::http::cookie::{Cookie, SESSION_COOKIE_NAME};
use crate::http::request::Request;
use crate::http::response::{status, Response};
use crate::http::writer::reason_phrase;
use crate::session::{Clock, SessionListener, SessionStore, SystemClock};

pub struct WebApp {
    prefix: String,
    routes: RouteTable,
    handlers: Registry<dyn Handler>,
    filters: Registry<dyn Filter>,
    filter_lists: FilterLists,
    constraints: Vec<SecurityConstraint>,
    authenticator: Option<Arc<dyn Authenticator>>,
    error_pages: HashMap<u16, String>,
    kind_pages: HashMap<String, String>,
    welcome_files: Vec<String>,
    sessions: SessionStore,
}

impl WebApp {
    pub fn builder(prefix: &str) -> WebAppBuilder {
        WebAppBuilder::new(prefix)
    }

    /// The mount prefix, empty for the root.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn filter_lists(&self) -> &FilterLists {
        &self.filter_lists
    }

    pub fn constraints(&self) -> &[SecurityConstraint] {
        &self.constraints
    }

    pub fn authenticator(&self) -> Option<&dyn Authenticator> {
        self.authenticator.as_deref()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn handler(&self, name: &str) -> Result<Arc<dyn Handler>, ServletError> {
        self.handlers.get(name).await
    }

    pub async fn filter(&self, name: &str) -> Result<Arc<dyn Filter>, ServletError> {
        self.filters.get(name).await
    }

    pub fn is_unit_initialised(&self, name: &str) -> bool {
        self.handlers.is_initialised(name) || self.filters.is_initialised(name)
    }

    /// The session cookie for `id`, scoped to the mount prefix.
    pub fn session_cookie(&self, id: &str) -> Cookie {
        let path = if self.prefix.is_empty() { "/" } else { &self.prefix };
        Cookie::new(SESSION_COOKIE_NAME, id).with_path(path)
    }

    /// A dispatcher for a path below the mount prefix, optionally with a
    /// query string.
    pub fn dispatcher(&self, path: &str) -> Option<RequestDispatcher> {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (path, None),
        };
        self.routes
            .resolve(path)
            .map(|route| RequestDispatcher::for_route(route, query))
    }

    pub fn named_dispatcher(&self, unit: &str) -> Option<RequestDispatcher> {
        self.handlers
            .contains(unit)
            .then(|| RequestDispatcher::named(unit))
    }

    /// Initialises the units marked load-on-startup.
    pub async fn start(&self) {
        self.filters.start(|s| s.load_on_startup()).await;
        self.handlers.start(|s| s.load_on_startup()).await;
        info!(prefix = %self.prefix, "application started");
    }

    /// Destroys every initialised unit and invalidates all sessions.
    pub fn destroy(&self) {
        self.handlers.destroy_all();
        self.filters.destroy_all();
        self.sessions.invalidate_all();
        info!(prefix = %self.prefix, "application destroyed");
    }

    /// Runs one request through the application.
    ///
    /// Handler faults are turned into error responses here; only failures
    /// of the client connection are returned.
    pub async fn serve(&self, request: &mut Request, response: &mut Response) -> Result<(), ServletError> {
        if !self.prefix.is_empty() && request.request_uri() == self.prefix {
            let mut location = format!("{}/", self.prefix);
            if let Some(query) = request.query_string() {
                location.push('?');
                location.push_str(query);
            }
            return response.send_redirect(&location);
        }
        if !request.set_context_path(&self.prefix) {
            debug!(uri = request.request_uri(), "outside mount prefix");
            response.send_error(status::NOT_FOUND, None)?;
            response.take_pending_error();
            return write_default_error(response, status::NOT_FOUND, None).await;
        }

        let mut ex = Exchange::new(self, request, response);
        let mut unit = None;
        let handled = match AssertUnwindSafe(self.handle(&mut ex, &mut unit))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                ex.response.abandon_includes();
                Err(ServletError::from_panic(payload))
            }
        };
        if let Err(err) = handled {
            if err.is_client_io() {
                return Err(err);
            }
            self.handle_fault(&mut ex, err, unit.as_deref()).await?;
        }

        if let Some(pending) = ex.response.take_pending_error() {
            if !ex.response.is_committed() {
                self.render_error(&mut ex, pending.status, pending.message, None, unit.as_deref())
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle(&self, ex: &mut Exchange<'_>, unit: &mut Option<String>) -> Result<(), ServletError> {
        if let Some(auth) = &self.authenticator {
            if auth.authenticate(ex)? {
                return Ok(());
            }
        }

        let local = ex.request.servlet_path().to_string();
        let Some(dispatcher) = self.resolve_request(&local) else {
            debug!(path = %local, "no route");
            return ex.response.send_error(status::NOT_FOUND, None);
        };
        *unit = Some(dispatcher.unit().to_string());
        dispatcher.dispatch_request(ex).await
    }

    /// Resolves a request path, trying welcome files for directory paths.
    fn resolve_request(&self, local: &str) -> Option<RequestDispatcher> {
        if local.ends_with('/') {
            for welcome in &self.welcome_files {
                let candidate = format!("{local}{welcome}");
                if let Some(route) = self.routes.resolve(&candidate) {
                    if route.kind != MatchKind::Default {
                        return Some(RequestDispatcher::for_route(route, None));
                    }
                }
            }
        }
        self.routes
            .resolve(local)
            .map(|route| RequestDispatcher::for_route(route, None))
    }

    async fn handle_fault(
        &self,
        ex: &mut Exchange<'_>,
        err: ServletError,
        unit: Option<&str>,
    ) -> Result<(), ServletError> {
        error!(
            error = ?err,
            kind = err.kind(),
            uri = ex.request.request_uri(),
            unit,
            "handler fault"
        );
        if ex.response.is_committed() {
            return Ok(());
        }
        ex.response.reset()?;
        let code = match err {
            ServletError::Unavailable { .. } => status::SERVICE_UNAVAILABLE,
            _ => status::INTERNAL_SERVER_ERROR,
        };
        self.render_error(ex, code, Some(err.to_string()), Some(err.kind()), unit)
            .await
    }

    /// Renders an error page for `code`, preferring a page registered for
    /// the error `kind`, then one for the status, then the default body.
    async fn render_error(
        &self,
        ex: &mut Exchange<'_>,
        code: u16,
        message: Option<String>,
        kind: Option<&str>,
        unit: Option<&str>,
    ) -> Result<(), ServletError> {
        let request_uri = ex.request.request_uri().to_string();
        ex.request.set_attribute(attrs::ERROR_STATUS_CODE, code);
        ex.request.set_attribute(attrs::ERROR_REQUEST_URI, request_uri);
        if let Some(message) = &message {
            ex.request.set_attribute(attrs::ERROR_MESSAGE, message.clone());
        }
        if let Some(kind) = kind {
            ex.request.set_attribute(attrs::ERROR_KIND, kind.to_string());
        }
        if let Some(unit) = unit {
            ex.request.set_attribute(attrs::ERROR_UNIT_NAME, unit.to_string());
        }
        ex.response.set_status(code);

        let page = kind
            .and_then(|k| self.kind_pages.get(k))
            .or_else(|| self.error_pages.get(&code));
        if let Some(dispatcher) = page.and_then(|p| self.dispatcher(p)) {
            match dispatcher.error(ex).await {
                Ok(()) => {
                    // An error page cannot raise another error.
                    ex.response.take_pending_error();
                    return Ok(());
                }
                Err(err) if err.is_client_io() => return Err(err),
                Err(err) => {
                    error!(error = ?err, code, "error page failed");
                    if ex.response.is_committed() {
                        return Ok(());
                    }
                    ex.response.reset()?;
                    ex.response.set_status(code);
                }
            }
        }
        write_default_error(ex.response, code, message.as_deref()).await
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// The built-in error body: status, message and a timestamp.
pub fn default_error_body(code: u16, message: Option<&str>) -> String {
    let reason = reason_phrase(code);
    let message = escape_html(message.unwrap_or(reason));
    let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    format!(
        "<html><head><title>{code} {reason}</title></head>\
         <body><h1>{code} {reason}</h1><p>{message}</p><hr><p>{now}</p></body></html>"
    )
}

async fn write_default_error(
    response: &mut Response,
    code: u16,
    message: Option<&str>,
) -> Result<(), ServletError> {
    response.set_status(code);
    response.set_content_type("text/html; charset=utf-8");
    response.write_str(&default_error_body(code, message)).await
}

/// Assembles a [`WebApp`]. Names are checked by [`WebAppBuilder::build`].
pub struct WebAppBuilder {
    prefix: String,
    routes: Vec<(String, String)>,
    default_handler: Option<String>,
    handlers: Vec<UnitSlot<dyn Handler>>,
    filters: Vec<UnitSlot<dyn Filter>>,
    filter_mappings: Vec<FilterMapping>,
    constraints: Vec<SecurityConstraint>,
    login: Option<LoginConfig>,
    auth_registry: AuthRegistry,
    error_pages: HashMap<u16, String>,
    kind_pages: HashMap<String, String>,
    welcome_files: Vec<String>,
    session_timeout_secs: i64,
    session_listeners: Vec<Arc<dyn SessionListener>>,
    clock: Arc<dyn Clock>,
}

impl WebAppBuilder {
    /// `prefix` is the mount prefix; `""` and `"/"` both mount at the root.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            routes: Vec::new(),
            default_handler: None,
            handlers: Vec::new(),
            filters: Vec::new(),
            filter_mappings: Vec::new(),
            constraints: Vec::new(),
            login: None,
            auth_registry: AuthRegistry::with_defaults(),
            error_pages: HashMap::new(),
            kind_pages: HashMap::new(),
            welcome_files: Vec::new(),
            session_timeout_secs: 1800,
            session_listeners: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Registers a lazily created handler unit.
    pub fn handler<H, F>(self, name: &str, factory: F) -> Self
    where
        H: Handler + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.handler_with(UnitConfig::new(name), false, factory)
    }

    pub fn handler_with<H, F>(mut self, config: UnitConfig, load_on_startup: bool, factory: F) -> Self
    where
        H: Handler + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let factory = Arc::new(move || Arc::new(factory()) as Arc<dyn Handler>);
        self.handlers
            .push(UnitSlot::new(config, factory, load_on_startup));
        self
    }

    pub fn route(mut self, pattern: &str, unit: &str) -> Self {
        self.routes.push((pattern.to_string(), unit.to_string()));
        self
    }

    /// The unit serving paths no pattern matches.
    pub fn default_handler(mut self, unit: &str) -> Self {
        self.default_handler = Some(unit.to_string());
        self
    }

    pub fn filter<T, F>(self, name: &str, factory: F) -> Self
    where
        T: Filter + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.filter_with(UnitConfig::new(name), false, factory)
    }

    pub fn filter_with<T, F>(mut self, config: UnitConfig, load_on_startup: bool, factory: F) -> Self
    where
        T: Filter + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let factory = Arc::new(move || Arc::new(factory()) as Arc<dyn Filter>);
        self.filters
            .push(UnitSlot::new(config, factory, load_on_startup));
        self
    }

    pub fn filter_mapping(mut self, mapping: FilterMapping) -> Self {
        self.filter_mappings.push(mapping);
        self
    }

    pub fn constraint(mut self, constraint: SecurityConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn login_config(mut self, login: LoginConfig) -> Self {
        self.login = Some(login);
        self
    }

    /// Replaces the realm and scheme registry used to resolve the login
    /// configuration.
    pub fn auth_registry(mut self, registry: AuthRegistry) -> Self {
        self.auth_registry = registry;
        self
    }

    pub fn error_page(mut self, code: u16, path: &str) -> Self {
        self.error_pages.insert(code, path.to_string());
        self
    }

    /// An error page for handler faults of the given kind.
    pub fn error_page_for_kind(mut self, kind: &str, path: &str) -> Self {
        self.kind_pages.insert(kind.to_string(), path.to_string());
        self
    }

    pub fn welcome_file(mut self, name: &str) -> Self {
        self.welcome_files.push(name.to_string());
        self
    }

    /// Default session timeout; `<= 0` never expires.
    pub fn session_timeout(mut self, secs: i64) -> Self {
        self.session_timeout_secs = secs;
        self
    }

    pub fn session_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.session_listeners.push(listener);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<WebApp, ConfigError> {
        let mut handlers = Registry::new();
        for slot in self.handlers {
            let name = slot.name().to_string();
            if !handlers.insert(slot) {
                return Err(ConfigError::Duplicate(name));
            }
        }
        let mut filters = Registry::new();
        for slot in self.filters {
            let name = slot.name().to_string();
            if !filters.insert(slot) {
                return Err(ConfigError::Duplicate(name));
            }
        }

        let mut routes = RouteTable::new();
        for (pattern, unit) in &self.routes {
            routes.add(UrlPattern::parse(pattern)?, unit.clone());
        }
        if let Some(unit) = &self.default_handler {
            routes.set_default(unit.clone());
        }
        if let Some(unknown) = routes.units().find(|u| !handlers.contains(u)) {
            return Err(ConfigError::UnknownUnit(unknown.to_string()));
        }

        for mapping in &self.filter_mappings {
            if !filters.contains(&mapping.filter) {
                return Err(ConfigError::UnknownFilter(mapping.filter.clone()));
            }
            if let Matcher::Unit(unit) = &mapping.matcher {
                if !handlers.contains(unit) {
                    return Err(ConfigError::UnknownUnit(unit.clone()));
                }
            }
        }

        let needs_login = self.constraints.iter().any(|c| !c.roles.is_empty());
        let authenticator = match &self.login {
            Some(login) => Some(self.auth_registry.resolve(login)?),
            None if needs_login => return Err(ConfigError::MissingLoginConfig),
            None => None,
        };

        Ok(WebApp {
            prefix: self.prefix,
            routes,
            handlers,
            filters,
            filter_lists: FilterLists::build(&self.filter_mappings),
            constraints: self.constraints,
            authenticator,
            error_pages: self.error_pages,
            kind_pages: self.kind_pages,
            welcome_files: self.welcome_files,
            sessions: SessionStore::with_parts(
                self.session_timeout_secs,
                self.session_listeners,
                self.clock,
            ),
        })
    }
}
