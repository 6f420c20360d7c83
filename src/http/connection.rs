use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::config::ServerConfig;
use crate::http::parser::{parse_http_request, Limits, ParseError, ParsedRequest};
use crate::http::request::{ConnInfo, Request};
use crate::http::response::Response;
use crate::server::pool::ObjectPool;
use crate::webapp::WebApp;

/// Per-connection settings taken from the server configuration.
#[derive(Debug, Clone)]
pub struct ConnSettings {
    pub read_timeout: Duration,
    pub keep_alive_timeout: Duration,
    pub buffer_size: usize,
    pub limits: Limits,
    pub server_name: String,
}

impl From<&ServerConfig> for ConnSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            keep_alive_timeout: config.keep_alive_timeout(),
            buffer_size: config.buffer_size,
            limits: Limits {
                max_head: config.max_head_size,
                max_body: config.max_body_size,
            },
            server_name: config.server_name.clone(),
        }
    }
}

/// Everything a connection needs besides its socket.
pub struct ConnectionContext {
    pub app: Arc<WebApp>,
    pub settings: ConnSettings,
    pub requests: Arc<ObjectPool<Request>>,
    pub responses: Arc<ObjectPool<Response>>,
}

pub struct Connection {
    reader: OwnedReadHalf,
    writer: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    buffer: BytesMut,
    conn: ConnInfo,
    ctx: Arc<ConnectionContext>,
    state: ConnectionState,
}

pub enum ConnectionState {
    /// Waiting for a request. `idle` is set between keep-alive requests,
    /// when the wait is bounded by the keep-alive timeout instead.
    Reading { idle: bool },
    Processing(ParsedRequest),
    Closed,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, ctx: Arc<ConnectionContext>) -> Self {
        let local = stream.local_addr().unwrap_or_else(|_| ConnInfo::default().local);
        let (reader, writer) = stream.into_split();
        Self {
            reader,
            writer: Some(Box::new(writer)),
            buffer: BytesMut::with_capacity(ctx.settings.buffer_size),
            conn: ConnInfo {
                remote: peer,
                local,
                secure: false,
            },
            ctx,
            state: ConnectionState::Reading { idle: false },
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading { idle } => {
                    self.state = match self.read_request(idle).await {
                        Ok(Some(parsed)) => ConnectionState::Processing(parsed),
                        Ok(None) => ConnectionState::Closed,
                        Err(e) => {
                            // Malformed requests get no response.
                            debug!(peer = %self.conn.remote, error = %e, "dropping connection");
                            ConnectionState::Closed
                        }
                    };
                }

                ConnectionState::Processing(parsed) => {
                    let keep_alive = self.process(parsed).await?;
                    self.state = if keep_alive {
                        ConnectionState::Reading { idle: true }
                    } else {
                        ConnectionState::Closed
                    };
                }

                ConnectionState::Closed => {
                    if let Some(mut writer) = self.writer.take() {
                        let _ = writer.shutdown().await;
                    }
                    break;
                }
            }
        }

        Ok(())
    }

    /// Reads until one whole request is buffered. `Ok(None)` means the
    /// client went away or stayed silent past the timeout.
    pub async fn read_request(&mut self, idle: bool) -> Result<Option<ParsedRequest>, ParseError> {
        loop {
            match parse_http_request(&self.buffer, self.ctx.settings.limits) {
                Ok((request, consumed)) => {
                    self.buffer.advance(consumed);
                    return Ok(Some(request));
                }
                Err(ParseError::Incomplete) => {}
                Err(e) => return Err(e),
            }

            let wait = if idle && self.buffer.is_empty() {
                self.ctx.settings.keep_alive_timeout
            } else {
                self.ctx.settings.read_timeout
            };
            let read = tokio::time::timeout(wait, self.reader.read_buf(&mut self.buffer)).await;
            match read {
                Err(_) => {
                    trace!(peer = %self.conn.remote, idle, "read timed out");
                    return Ok(None);
                }
                Ok(Err(e)) => {
                    trace!(peer = %self.conn.remote, error = %e, "read failed");
                    return Ok(None);
                }
                Ok(Ok(0)) => return Ok(None),
                Ok(Ok(_)) => {}
            }
        }
    }

    /// Serves one request. Returns whether the connection stays open.
    async fn process(&mut self, parsed: ParsedRequest) -> anyhow::Result<bool> {
        let (mut request, mut response) =
            match (self.ctx.requests.acquire(), self.ctx.responses.acquire()) {
                (Ok(request), Ok(response)) => (request, response),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(peer = %self.conn.remote, error = %e, "request failed");
                    return Ok(false);
                }
            };
        let Some(writer) = self.writer.take() else {
            return Ok(false);
        };

        request.populate(parsed, self.conn);
        let head_only = request.method().eq_ignore_ascii_case("HEAD");
        response.prepare(
            request.protocol(),
            request.header("Connection"),
            head_only,
            self.ctx.settings.buffer_size,
        );
        response.set_server_name(self.ctx.settings.server_name.clone());
        response.attach(writer);

        debug!(method = request.method(), uri = request.request_uri(), "request");
        let outcome = match self.ctx.app.serve(&mut request, &mut response).await {
            Ok(()) => response.finish().await,
            Err(e) => Err(e),
        };
        self.writer = response.detach();

        match outcome {
            Ok(done) => {
                if done.length_mismatch() {
                    warn!(
                        uri = request.request_uri(),
                        declared = done.declared_length,
                        written = done.body_bytes,
                        "content length mismatch"
                    );
                }
                debug!(status = response.status(), keep_alive = done.keep_alive, "response sent");
                Ok(done.keep_alive && self.writer.is_some())
            }
            Err(e) => {
                debug!(peer = %self.conn.remote, error = %e, "response aborted");
                Ok(false)
            }
        }
    }
}
