use std::time::SystemTime;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::ServletError;
use crate::http::cookie::Cookie;
use crate::http::parser::Protocol;
use crate::http::writer::{decide_keep_alive, write_cookie, write_header, write_status_line};

/// Status codes the server itself produces.
pub mod status {
    pub const OK: u16 = 200;
    pub const FOUND: u16 = 302;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// Default size of the output buffer before the response commits.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Where committed bytes go.
///
/// A response that is not attached to a connection captures its output,
/// which is what tests and internal callers inspect.
enum Sink {
    Capture(Vec<u8>),
    Stream(Box<dyn AsyncWrite + Send + Unpin>),
}

impl Default for Sink {
    fn default() -> Self {
        Sink::Capture(Vec::new())
    }
}

impl Sink {
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Sink::Capture(out) => {
                out.extend_from_slice(bytes);
                Ok(())
            }
            Sink::Stream(stream) => stream.write_all(bytes).await,
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Sink::Capture(_) => Ok(()),
            Sink::Stream(stream) => stream.flush().await,
        }
    }
}

/// An error status recorded by [`Response::send_error`], rendered after
/// the handler returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingError {
    pub status: u16,
    pub message: Option<String>,
}

/// What the connection needs to know once a response is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// The `Content-Length` the response declared, if any.
    pub declared_length: Option<u64>,
    /// Body bytes the application wrote.
    pub body_bytes: u64,
    pub keep_alive: bool,
}

impl Completion {
    /// Whether the declared length disagrees with what was written.
    pub fn length_mismatch(&self) -> bool {
        self.declared_length
            .is_some_and(|declared| declared != self.body_bytes)
    }
}

/// One request cycle's worth of response state.
///
/// The status, headers and cookies are buffered until the response
/// commits, which happens on the first flush or when the output buffer
/// overflows. From then on they are frozen.
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    cookies: Vec<Cookie>,
    buffer: Vec<u8>,
    buffer_size: usize,
    committed: bool,
    include_depth: u32,
    protocol: Protocol,
    request_connection: Option<String>,
    head_only: bool,
    server_name: Option<String>,
    keep_alive: bool,
    body_bytes: u64,
    pending_error: Option<PendingError>,
    sink: Sink,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: status::OK,
            headers: Vec::new(),
            cookies: Vec::new(),
            buffer: Vec::new(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            committed: false,
            include_depth: 0,
            protocol: Protocol::Http11,
            request_connection: None,
            head_only: false,
            server_name: None,
            keep_alive: false,
            body_bytes: 0,
            pending_error: None,
            sink: Sink::default(),
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ties the response to the request it answers.
    pub fn prepare(
        &mut self,
        protocol: Protocol,
        request_connection: Option<&str>,
        head_only: bool,
        buffer_size: usize,
    ) {
        self.protocol = protocol;
        self.request_connection = request_connection.map(str::to_string);
        self.head_only = head_only;
        self.buffer_size = buffer_size.max(1);
    }

    pub fn set_server_name(&mut self, name: impl Into<String>) {
        self.server_name = Some(name.into());
    }

    /// Sends committed bytes to `stream` instead of capturing them.
    pub fn attach(&mut self, stream: Box<dyn AsyncWrite + Send + Unpin>) {
        self.sink = Sink::Stream(stream);
    }

    /// Gives back the attached stream, if any.
    pub fn detach(&mut self) -> Option<Box<dyn AsyncWrite + Send + Unpin>> {
        match std::mem::take(&mut self.sink) {
            Sink::Stream(stream) => Some(stream),
            Sink::Capture(_) => None,
        }
    }

    /// Bytes committed so far when no stream is attached.
    pub fn captured(&self) -> &[u8] {
        match &self.sink {
            Sink::Capture(out) => out,
            Sink::Stream(_) => &[],
        }
    }

    /// Returns this response to its freshly constructed state, keeping the
    /// allocation of its output buffer.
    pub fn recycle(&mut self) {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.clear();
        *self = Response {
            buffer,
            ..Response::default()
        };
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    fn frozen(&self, what: &str) -> bool {
        if self.include_depth > 0 {
            debug!(what, "ignored during include");
            return true;
        }
        if self.committed {
            debug!(what, "ignored after commit");
            return true;
        }
        false
    }

    pub fn set_status(&mut self, status: u16) {
        if !self.frozen("status") {
            self.status = status;
        }
    }

    /// Records an error status for the error-dispatch path.
    pub fn send_error(&mut self, status: u16, message: Option<&str>) -> Result<(), ServletError> {
        if self.include_depth > 0 {
            return Ok(());
        }
        if self.committed {
            return Err(ServletError::IllegalState("send_error after commit"));
        }
        self.discard_buffer();
        self.status = status;
        self.pending_error = Some(PendingError {
            status,
            message: message.map(str::to_string),
        });
        Ok(())
    }

    pub fn pending_error(&self) -> Option<&PendingError> {
        self.pending_error.as_ref()
    }

    pub fn take_pending_error(&mut self) -> Option<PendingError> {
        self.pending_error.take()
    }

    /// Sends a 302 to `location`.
    pub fn send_redirect(&mut self, location: &str) -> Result<(), ServletError> {
        if self.include_depth > 0 {
            return Ok(());
        }
        if self.committed {
            return Err(ServletError::IllegalState("send_redirect after commit"));
        }
        self.discard_buffer();
        self.status = status::FOUND;
        self.set_header("Location", location);
        Ok(())
    }

    /// First value of the named header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Replaces the first header with this name, or appends one.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        if self.frozen(name) {
            return;
        }
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    /// Appends a header, keeping earlier values.
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        if !self.frozen(name) {
            self.headers.push((name.to_string(), value.into()));
        }
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.set_header("Content-Type", content_type);
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn set_content_length(&mut self, length: u64) {
        self.set_header("Content-Length", length.to_string());
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn add_cookie(&mut self, cookie: Cookie) {
        if !self.frozen("cookie") {
            self.cookies.push(cookie);
        }
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn set_buffer_size(&mut self, size: usize) -> Result<(), ServletError> {
        if self.committed || !self.buffer.is_empty() {
            return Err(ServletError::IllegalState("buffer size change after output"));
        }
        self.buffer_size = size.max(1);
        Ok(())
    }

    /// Uncommitted body bytes.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Body bytes written so far, flushed or not.
    pub fn body_bytes(&self) -> u64 {
        self.body_bytes
    }

    /// Clears status, headers, cookies and buffered output.
    pub fn reset(&mut self) -> Result<(), ServletError> {
        if self.include_depth > 0 {
            return Ok(());
        }
        if self.committed {
            return Err(ServletError::IllegalState("reset after commit"));
        }
        self.status = status::OK;
        self.headers.clear();
        self.cookies.clear();
        self.buffer.clear();
        self.body_bytes = 0;
        self.pending_error = None;
        Ok(())
    }

    /// Discards buffered output only.
    pub fn reset_buffer(&mut self) -> Result<(), ServletError> {
        if self.committed {
            return Err(ServletError::IllegalState("buffer reset after commit"));
        }
        self.discard_buffer();
        Ok(())
    }

    fn discard_buffer(&mut self) {
        self.body_bytes -= self.buffer.len() as u64;
        self.buffer.clear();
    }

    /// Appends body bytes, committing when the buffer overflows.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), ServletError> {
        self.buffer.extend_from_slice(bytes);
        self.body_bytes += bytes.len() as u64;
        if self.buffer.len() > self.buffer_size {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn write_str(&mut self, text: &str) -> Result<(), ServletError> {
        self.write(text.as_bytes()).await
    }

    /// Commits the response if needed and sends buffered output.
    pub async fn flush(&mut self) -> Result<(), ServletError> {
        if !self.committed {
            self.commit(false).await?;
        }
        self.drain().await
    }

    /// Completes the response: commits it with an exact `Content-Length`
    /// when nothing has been sent yet, then sends what is left.
    pub async fn finish(&mut self) -> Result<Completion, ServletError> {
        if !self.committed {
            self.commit(true).await?;
        }
        self.drain().await?;
        self.sink.flush().await?;

        Ok(Completion {
            declared_length: if self.head_only {
                None
            } else {
                self.content_length()
            },
            body_bytes: self.body_bytes,
            keep_alive: self.keep_alive,
        })
    }

    /// Whether the connection may carry another request. Decided at commit.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub(crate) fn begin_include(&mut self) {
        self.include_depth += 1;
    }

    pub(crate) fn end_include(&mut self) {
        self.include_depth = self.include_depth.saturating_sub(1);
    }

    /// Leaves every include an unwound handler never finished.
    pub(crate) fn abandon_includes(&mut self) {
        self.include_depth = 0;
    }

    pub fn is_including(&self) -> bool {
        self.include_depth > 0
    }

    async fn drain(&mut self) -> Result<(), ServletError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if !self.head_only {
            self.sink.write(&self.buffer).await?;
        }
        self.buffer.clear();
        Ok(())
    }

    async fn commit(&mut self, complete: bool) -> Result<(), ServletError> {
        self.committed = true;
        if self.protocol == Protocol::Http09 {
            self.keep_alive = false;
            return Ok(());
        }

        if complete && !self.contains_header("Content-Length") {
            let length = self.buffer.len().to_string();
            self.headers.push(("Content-Length".to_string(), length));
        }
        if !self.contains_header("Date") {
            let now = httpdate::fmt_http_date(SystemTime::now());
            self.headers.push(("Date".to_string(), now));
        }
        if let Some(server) = &self.server_name {
            if !self.contains_header("Server") {
                self.headers.push(("Server".to_string(), server.clone()));
            }
        }

        // Without a length or chunking the body can only end with the connection.
        let framed = self.contains_header("Content-Length");
        self.keep_alive = framed
            && decide_keep_alive(
                self.request_connection.as_deref(),
                self.header("Connection"),
                self.protocol,
            );
        if !self.keep_alive {
            match self
                .headers
                .iter_mut()
                .find(|(k, _)| k.eq_ignore_ascii_case("Connection"))
            {
                Some((_, value)) => *value = "close".to_string(),
                None => self.headers.push(("Connection".to_string(), "close".to_string())),
            }
        } else if self.protocol == Protocol::Http10 && !self.contains_header("Connection") {
            self.headers
                .push(("Connection".to_string(), "Keep-Alive".to_string()));
        }

        let mut head = Vec::with_capacity(256);
        write_status_line(&mut head, self.protocol, self.status);
        for (name, value) in &self.headers {
            write_header(&mut head, name, value);
        }
        for cookie in &self.cookies {
            write_cookie(&mut head, cookie);
        }
        head.extend_from_slice(b"\r\n");

        debug!(status = self.status, keep_alive = self.keep_alive, "committing response");
        self.sink.write(&head).await?;
        Ok(())
    }
}
