use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use vessel::config::Config;
use vessel::dispatch::{Exchange, Handler, Unit};
use vessel::server::{Server, ShutdownHandle};
use vessel::{ServletError, WebApp};

struct Hello;

impl Unit for Hello {}

#[async_trait]
impl Handler for Hello {
    async fn service(&self, ex: &mut Exchange<'_>) -> Result<(), ServletError> {
        let name = ex.request.parameter("name").unwrap_or("world").to_string();
        ex.response.set_content_type("text/plain");
        ex.response.write_str(&format!("hello {name}")).await
    }
}

struct Boom;

impl Unit for Boom {}

#[async_trait]
impl Handler for Boom {
    async fn service(&self, ex: &mut Exchange<'_>) -> Result<(), ServletError> {
        ex.response.write_str("partial").await?;
        panic!("boom");
    }
}

type Running = tokio::task::JoinHandle<anyhow::Result<()>>;

async fn start_server(prefix: &str) -> (SocketAddr, ShutdownHandle, Running) {
    start_server_with(prefix, 4).await
}

async fn start_server_with(
    prefix: &str,
    max_handlers: usize,
) -> (SocketAddr, ShutdownHandle, Running) {
    let mut config = Config::default();
    config.server.listen_addr = "127.0.0.1:0".to_string();
    config.server.accept_timeout_ms = 50;
    config.server.keep_alive_timeout_ms = 2_000;
    config.server.read_timeout_ms = 2_000;
    config.pool.min_idle_handlers = 1;
    config.pool.max_handlers = max_handlers;

    let app = WebApp::builder(prefix)
        .handler("hello", || Hello)
        .handler("boom", || Boom)
        .route("/hello", "hello")
        .route("/boom", "boom")
        .build()
        .unwrap();
    let app = Arc::new(app);
    app.start().await;

    let server = Server::bind(&config, app).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let running = tokio::spawn(server.run());
    (addr, shutdown, running)
}

/// Reads one response framed by its `Content-Length`.
async fn read_response(stream: &mut TcpStream) -> (String, String) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before the response head");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let length: usize = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buf.len() < head_end + length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before the response body");
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[head_end..head_end + length]).into_owned();
    (head, body)
}

#[tokio::test]
async fn test_server_serves_request() {
    let (addr, shutdown, running) = start_server("").await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /hello?name=vessel HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let (head, body) = read_response(&mut stream).await;

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Server: vessel\r\n"));
    assert_eq!(body, "hello vessel");

    drop(stream);
    shutdown.trigger();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_keep_alive_serves_several_requests() {
    let (addr, shutdown, running) = start_server("").await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    for name in ["a", "b", "c"] {
        let request = format!("GET /hello?name={name} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let (head, body) = read_response(&mut stream).await;
        assert!(!head.contains("Connection: close"));
        assert_eq!(body, format!("hello {name}"));
    }

    drop(stream);
    shutdown.trigger();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_handles_pipelined_requests() {
    let (addr, shutdown, running) = start_server("").await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /hello?name=one HTTP/1.1\r\n\r\nGET /hello?name=two HTTP/1.1\r\n\r\n",
        )
        .await
        .unwrap();

    let (_, first) = read_response(&mut stream).await;
    let (_, second) = read_response(&mut stream).await;
    assert_eq!(first, "hello one");
    assert_eq!(second, "hello two");

    drop(stream);
    shutdown.trigger();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_closes_http10_connection() {
    let (addr, shutdown, running) = start_server("").await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /hello HTTP/1.0\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8_lossy(&raw);

    assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(text.contains("Connection: close\r\n"));
    assert!(text.ends_with("hello world"));

    drop(stream);
    shutdown.trigger();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_http09_gets_bare_body() {
    let (addr, shutdown, running) = start_server("").await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET /hello\r\n").await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();

    assert_eq!(raw, b"hello world");

    drop(stream);
    shutdown.trigger();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_not_found_outside_prefix() {
    let (addr, shutdown, running) = start_server("/app").await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /other HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let (head, body) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(body.contains("404 Not Found"));

    stream
        .write_all(b"GET /app/hello HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let (head, body) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, "hello world");

    drop(stream);
    shutdown.trigger();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_drops_malformed_request() {
    let (addr, shutdown, running) = start_server("").await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GARBAGE\r\n\r\n").await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();

    assert!(raw.is_empty());

    drop(stream);
    shutdown.trigger();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_survives_panicking_handler() {
    let (addr, shutdown, running) = start_server_with("", 1).await;

    for _ in 0..2 {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /boom HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let (head, body) = read_response(&mut stream).await;
        assert!(head.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(body.contains("panic: boom"));
        assert!(!body.contains("partial"));

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        // The single handler is released just after the socket closes.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let (head, body) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, "hello world");

    drop(stream);
    shutdown.trigger();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_shutdown_stops_accepting() {
    let (addr, shutdown, running) = start_server("").await;

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
}
