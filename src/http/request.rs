use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::ServletError;
use crate::http::cookie::Cookie;
use crate::http::locale::Locale;
use crate::http::parser::{
    self, parse_form_body, parse_query_string, HeaderBlock, Limits, ParamMap, ParseError,
    ParsedRequest, Protocol, RequestLine,
};
use crate::http::writer::decide_keep_alive;
use crate::session::{Principal, Session};

/// A request- or session-scoped attribute value.
pub type Attribute = Arc<dyn Any + Send + Sync>;

/// Socket-level facts about the connection a request arrived on.
#[derive(Debug, Clone, Copy)]
pub struct ConnInfo {
    pub remote: SocketAddr,
    pub local: SocketAddr,
    pub secure: bool,
}

impl Default for ConnInfo {
    fn default() -> Self {
        let unspecified = SocketAddr::from(([127, 0, 0, 1], 0));
        Self {
            remote: unspecified,
            local: unspecified,
            secure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum BodyState {
    #[default]
    Unread,
    /// The application read the raw body; parameters skip the form body.
    Raw,
    /// The body was parsed into parameters and can no longer be read raw.
    Form,
}

/// Path fields rewritten by forward and include dispatches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchPath {
    pub request_uri: String,
    pub servlet_path: String,
    pub path_info: Option<String>,
    pub query_string: Option<String>,
}

/// One request cycle's worth of client request state.
///
/// Requests are pooled: [`Request::populate`] fills one from a parsed
/// request and recycling returns it to [`Request::default`].
#[derive(Default)]
pub struct Request {
    method: String,
    protocol: Protocol,
    scheme: &'static str,
    server_name: String,
    server_port: u16,
    conn: ConnInfo,
    request_uri: String,
    context_path: String,
    servlet_path: String,
    path_info: Option<String>,
    query_string: Option<String>,
    headers: Vec<(String, String)>,
    cookies: Vec<Cookie>,
    authorization: Option<String>,
    content_length: Option<u64>,
    content_type: Option<String>,
    character_encoding: Option<String>,
    locales: Vec<Locale>,
    body: Vec<u8>,
    body_state: BodyState,
    params: Option<ParamMap>,
    attributes: HashMap<String, Attribute>,
    session_cookie: Option<String>,
    session: Option<Arc<Session>>,
    principal: Option<Principal>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a complete request from raw bytes, as if received on a
    /// default connection.
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let (parsed, _) = parser::parse_http_request(raw, Limits::default())?;
        let mut request = Self::new();
        request.populate(parsed, ConnInfo::default());
        Ok(request)
    }

    /// Fills this request from a parsed request.
    ///
    /// Path fields describe the whole URI until the connection resolves
    /// it against the mount prefix with [`Request::set_context_path`].
    pub fn populate(&mut self, parsed: ParsedRequest, conn: ConnInfo) {
        let ParsedRequest {
            line:
                RequestLine {
                    method,
                    raw_uri: _,
                    path,
                    query_string,
                    protocol,
                },
            headers:
                HeaderBlock {
                    headers,
                    cookies,
                    session_id,
                    authorization,
                    locales,
                    content_length,
                    content_type,
                    character_encoding,
                    host,
                    host_port,
                },
            body,
        } = parsed;

        *self = Request {
            method,
            protocol,
            scheme: if conn.secure { "https" } else { "http" },
            server_name: host.unwrap_or_else(|| conn.local.ip().to_string()),
            server_port: host_port.unwrap_or(conn.local.port()),
            conn,
            request_uri: path.clone(),
            context_path: String::new(),
            servlet_path: path,
            path_info: None,
            query_string,
            headers,
            cookies,
            authorization,
            content_length,
            content_type,
            character_encoding,
            locales,
            body,
            body_state: BodyState::Unread,
            params: None,
            attributes: HashMap::new(),
            session_cookie: session_id,
            session: None,
            principal: None,
        };
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn scheme(&self) -> &str {
        self.scheme
    }

    pub fn is_secure(&self) -> bool {
        self.conn.secure
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.conn.remote
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.conn.local
    }

    /// The decoded request path, mount prefix included, without query.
    pub fn request_uri(&self) -> &str {
        &self.request_uri
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn servlet_path(&self) -> &str {
        &self.servlet_path
    }

    pub fn path_info(&self) -> Option<&str> {
        self.path_info.as_deref()
    }

    /// `servlet_path` followed by `path_info`: the path routing matched on.
    pub fn local_path(&self) -> String {
        match &self.path_info {
            Some(info) => format!("{}{}", self.servlet_path, info),
            None => self.servlet_path.clone(),
        }
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Strips the mount prefix from the request path.
    ///
    /// Returns `false`, leaving the request untouched, if the path lies
    /// outside the prefix.
    pub fn set_context_path(&mut self, prefix: &str) -> bool {
        let Some(local) = self.request_uri.strip_prefix(prefix) else {
            return false;
        };
        if !prefix.is_empty() && !local.is_empty() && !local.starts_with('/') {
            return false;
        }
        self.context_path = prefix.to_string();
        self.servlet_path = local.to_string();
        self.path_info = None;
        true
    }

    /// Replaces the routing path fields, returning the previous ones.
    pub fn swap_dispatch_path(&mut self, path: DispatchPath) -> DispatchPath {
        DispatchPath {
            request_uri: std::mem::replace(&mut self.request_uri, path.request_uri),
            servlet_path: std::mem::replace(&mut self.servlet_path, path.servlet_path),
            path_info: std::mem::replace(&mut self.path_info, path.path_info),
            query_string: std::mem::replace(&mut self.query_string, path.query_string),
        }
    }

    pub(crate) fn set_route(&mut self, servlet_path: String, path_info: Option<String>) {
        self.servlet_path = servlet_path;
        self.path_info = path_info;
    }

    /// First value of the named header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of the named header, in arrival order.
    pub fn headers<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &self.headers {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name);
            }
        }
        names
    }

    pub fn int_header(&self, name: &str) -> Option<i64> {
        self.header(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn date_header(&self, name: &str) -> Option<SystemTime> {
        self.header(name)
            .and_then(|v| httpdate::parse_http_date(v.trim()).ok())
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn character_encoding(&self) -> Option<&str> {
        self.character_encoding.as_deref()
    }

    /// Accepted locales, most preferred first.
    pub fn locales(&self) -> &[Locale] {
        &self.locales
    }

    /// The most preferred locale, or the server default.
    pub fn locale(&self) -> Locale {
        self.locales.first().cloned().unwrap_or_default()
    }

    /// Whether the client asked to keep the connection open.
    ///
    /// Uses the request side of the keep-alive decision only.
    pub fn keep_alive(&self) -> bool {
        decide_keep_alive(self.header("Connection"), None, self.protocol)
    }

    /// The raw request body.
    ///
    /// Fails once the body has been consumed by parameter parsing.
    pub fn body(&mut self) -> Result<&[u8], ServletError> {
        if self.body_state == BodyState::Form {
            return Err(ServletError::IllegalState(
                "request body was already consumed as form parameters",
            ));
        }
        self.body_state = BodyState::Raw;
        Ok(&self.body)
    }

    fn ensure_params(&mut self) -> &mut ParamMap {
        if self.params.is_none() {
            let mut params = ParamMap::new();
            if let Some(query) = &self.query_string {
                parse_query_string(query, &mut params);
            }
            if self.body_state == BodyState::Unread
                && parse_form_body(
                    &self.method,
                    self.content_type.as_deref(),
                    &self.body,
                    &mut params,
                )
            {
                self.body_state = BodyState::Form;
            }
            self.params = Some(params);
        }
        self.params.get_or_insert_with(ParamMap::new)
    }

    /// First value of the named parameter.
    pub fn parameter(&mut self, name: &str) -> Option<&str> {
        self.ensure_params()
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn parameter_values(&mut self, name: &str) -> Option<&[String]> {
        self.ensure_params().get(name).map(Vec::as_slice)
    }

    pub fn parameter_map(&mut self) -> &ParamMap {
        self.ensure_params()
    }

    /// Adds the parameters of `query` in front of the current ones.
    ///
    /// Returns the previous map so a dispatch can restore it.
    pub fn merge_query(&mut self, query: &str) -> ParamMap {
        let previous = self.ensure_params().clone();
        let mut merged = ParamMap::new();
        parse_query_string(query, &mut merged);
        for (name, values) in &previous {
            merged
                .entry(name.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
        self.params = Some(merged);
        previous
    }

    pub fn restore_params(&mut self, params: ParamMap) {
        self.params = Some(params);
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// The named attribute, if present and of type `T`.
    pub fn attribute_as<T: Any>(&self, name: &str) -> Option<&T> {
        self.attributes.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn set_attribute<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.attributes.insert(name.into(), Arc::new(value));
    }

    pub fn set_attribute_arc(&mut self, name: impl Into<String>, value: Attribute) {
        self.attributes.insert(name.into(), value);
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Attribute> {
        self.attributes.remove(name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Value of the session cookie the client sent.
    pub fn session_cookie(&self) -> Option<&str> {
        self.session_cookie.as_deref()
    }

    pub(crate) fn cached_session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    pub(crate) fn cache_session(&mut self, session: Option<Arc<Session>>) {
        self.session = session;
    }

    /// The authenticated caller: set on the request by header-based
    /// schemes, or carried by the session after a form login.
    pub fn principal(&self) -> Option<Principal> {
        if let Some(principal) = &self.principal {
            return Some(principal.clone());
        }
        self.session
            .as_ref()
            .filter(|s| s.is_valid())
            .and_then(|s| s.principal())
    }

    pub fn set_principal(&mut self, principal: Option<Principal>) {
        self.principal = principal;
    }

    pub fn remote_user(&self) -> Option<String> {
        self.principal().map(|p| p.name)
    }

    pub fn is_user_in_role(&self, role: &str) -> bool {
        self.principal().is_some_and(|p| p.has_role(role))
    }
}

/// Builder for requests that did not come off a socket, such as in tests.
pub struct RequestBuilder {
    method: String,
    uri: String,
    protocol: Protocol,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    conn: ConnInfo,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: "GET".to_string(),
            uri: "/".to_string(),
            protocol: Protocol::Http11,
            headers: Vec::new(),
            body: Vec::new(),
            conn: ConnInfo::default(),
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn conn(mut self, conn: ConnInfo) -> Self {
        self.conn = conn;
        self
    }

    /// Builds the request by running it through the parser, so that
    /// headers get the same treatment as on the wire.
    pub fn build(self) -> Result<Request, ParseError> {
        let line = parser::parse_request_line(&format!(
            "{} {} {}",
            self.method,
            self.uri,
            self.protocol.as_str()
        ))?;
        let mut header_lines: Vec<String> = self
            .headers
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        if !self.body.is_empty()
            && !self
                .headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        {
            header_lines.push(format!("Content-Length: {}", self.body.len()));
        }
        let headers = parser::parse_headers(header_lines.iter().map(String::as_str))?;

        let mut request = Request::new();
        request.populate(
            ParsedRequest {
                line,
                headers,
                body: self.body,
            },
            self.conn,
        );
        Ok(request)
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
