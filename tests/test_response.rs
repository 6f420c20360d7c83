use vessel::http::cookie::Cookie;
use vessel::http::parser::Protocol;
use vessel::http::response::{status, Response};
use vessel::http::writer::{cookie_header_value, decide_keep_alive, reason_phrase};
use vessel::ServletError;

fn captured_text(resp: &Response) -> String {
    String::from_utf8_lossy(resp.captured()).into_owned()
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(reason_phrase(200), "OK");
    assert_eq!(reason_phrase(302), "Found");
    assert_eq!(reason_phrase(401), "Unauthorized");
    assert_eq!(reason_phrase(404), "Not Found");
    assert_eq!(reason_phrase(500), "Internal Server Error");
    assert_eq!(reason_phrase(503), "Service Unavailable");
    assert_eq!(reason_phrase(799), "Unknown");
}

#[test]
fn test_set_header_replaces_add_header_appends() {
    let mut resp = Response::new();

    resp.set_header("X-Tag", "one");
    resp.set_header("x-tag", "two");
    assert_eq!(resp.headers("X-Tag").collect::<Vec<_>>(), ["two"]);

    resp.add_header("X-Tag", "three");
    assert_eq!(resp.headers("X-TAG").collect::<Vec<_>>(), ["two", "three"]);
    assert!(resp.contains_header("x-tag"));
}

#[test]
fn test_content_helpers() {
    let mut resp = Response::new();

    resp.set_content_type("text/html");
    resp.set_content_length(12);

    assert_eq!(resp.content_type(), Some("text/html"));
    assert_eq!(resp.content_length(), Some(12));
    assert_eq!(resp.header("Content-Length"), Some("12"));
}

#[tokio::test]
async fn test_response_finish_writes_head_and_body() {
    let mut resp = Response::new();
    resp.prepare(Protocol::Http11, None, false, 1024);
    resp.set_server_name("vessel");
    resp.set_content_type("text/plain");
    resp.write_str("Hello, World!").await.unwrap();

    let done = resp.finish().await.unwrap();
    let text = captured_text(&resp);

    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Type: text/plain\r\n"));
    assert!(text.contains("Content-Length: 13\r\n"));
    assert!(text.contains("Server: vessel\r\n"));
    assert!(text.contains("Date: "));
    assert!(text.ends_with("\r\n\r\nHello, World!"));
    assert!(done.keep_alive);
    assert!(!done.length_mismatch());
}

#[tokio::test]
async fn test_commit_freezes_status_and_headers() {
    let mut resp = Response::new();
    resp.prepare(Protocol::Http11, None, false, 1024);
    resp.write_str("partial").await.unwrap();
    resp.flush().await.unwrap();
    assert!(resp.is_committed());

    resp.set_status(status::NOT_FOUND);
    resp.set_header("X-Late", "ignored");
    resp.add_cookie(Cookie::new("late", "1"));

    assert_eq!(resp.status(), status::OK);
    assert!(!resp.contains_header("X-Late"));
    assert!(resp.cookies().is_empty());
}

#[tokio::test]
async fn test_reset_after_commit_is_illegal() {
    let mut resp = Response::new();
    resp.prepare(Protocol::Http11, None, false, 1024);
    resp.flush().await.unwrap();

    assert!(matches!(resp.reset(), Err(ServletError::IllegalState(_))));
    assert!(matches!(resp.reset_buffer(), Err(ServletError::IllegalState(_))));
    assert!(matches!(
        resp.send_error(500, None),
        Err(ServletError::IllegalState(_))
    ));
    assert!(matches!(
        resp.send_redirect("/elsewhere"),
        Err(ServletError::IllegalState(_))
    ));
}

#[tokio::test]
async fn test_reset_before_commit_clears_everything() {
    let mut resp = Response::new();
    resp.set_status(status::NOT_FOUND);
    resp.set_header("X-Tag", "one");
    resp.add_cookie(Cookie::new("a", "1"));
    resp.write_str("body").await.unwrap();

    resp.reset().unwrap();

    assert_eq!(resp.status(), status::OK);
    assert!(!resp.contains_header("X-Tag"));
    assert!(resp.cookies().is_empty());
    assert!(resp.buffered().is_empty());
    assert_eq!(resp.body_bytes(), 0);
}

#[tokio::test]
async fn test_buffer_overflow_commits() {
    let mut resp = Response::new();
    resp.prepare(Protocol::Http11, None, false, 8);

    resp.write_str("abcd").await.unwrap();
    assert!(!resp.is_committed());
    resp.write_str("efghijkl").await.unwrap();
    assert!(resp.is_committed());

    let done = resp.finish().await.unwrap();
    let text = captured_text(&resp);
    assert!(text.ends_with("abcdefghijkl"));
    assert!(text.contains("Connection: close\r\n"));
    assert!(!done.keep_alive);
}

#[tokio::test]
async fn test_set_buffer_size_after_output_is_illegal() {
    let mut resp = Response::new();
    resp.set_buffer_size(16).unwrap();
    assert_eq!(resp.buffer_size(), 16);

    resp.write_str("x").await.unwrap();
    assert!(matches!(
        resp.set_buffer_size(32),
        Err(ServletError::IllegalState(_))
    ));
}

#[tokio::test]
async fn test_send_error_discards_buffer_and_records_status() {
    let mut resp = Response::new();
    resp.write_str("lost").await.unwrap();

    resp.send_error(status::NOT_FOUND, Some("nothing here")).unwrap();

    assert_eq!(resp.status(), 404);
    assert!(resp.buffered().is_empty());
    let pending = resp.take_pending_error().unwrap();
    assert_eq!(pending.status, 404);
    assert_eq!(pending.message.as_deref(), Some("nothing here"));
    assert!(resp.pending_error().is_none());
}

#[test]
fn test_send_redirect_sets_location() {
    let mut resp = Response::new();

    resp.send_redirect("/login").unwrap();

    assert_eq!(resp.status(), status::FOUND);
    assert_eq!(resp.header("Location"), Some("/login"));
}

#[tokio::test]
async fn test_declared_length_mismatch_is_reported() {
    let mut resp = Response::new();
    resp.prepare(Protocol::Http11, None, false, 1024);
    resp.set_content_length(100);
    resp.write_str("short").await.unwrap();

    let done = resp.finish().await.unwrap();

    assert_eq!(done.declared_length, Some(100));
    assert_eq!(done.body_bytes, 5);
    assert!(done.length_mismatch());
}

#[tokio::test]
async fn test_head_response_sends_no_body() {
    let mut resp = Response::new();
    resp.prepare(Protocol::Http11, None, true, 1024);
    resp.write_str("invisible").await.unwrap();

    resp.finish().await.unwrap();
    let text = captured_text(&resp);

    assert!(text.contains("Content-Length: 9\r\n"));
    assert!(text.ends_with("\r\n\r\n"));
}

#[tokio::test]
async fn test_http09_response_has_no_head() {
    let mut resp = Response::new();
    resp.prepare(Protocol::Http09, None, false, 1024);
    resp.write_str("<html></html>").await.unwrap();

    let done = resp.finish().await.unwrap();

    assert_eq!(resp.captured(), b"<html></html>");
    assert!(!done.keep_alive);
}

#[tokio::test]
async fn test_http10_keep_alive_is_echoed() {
    let mut resp = Response::new();
    resp.prepare(Protocol::Http10, Some("keep-alive"), false, 1024);

    let done = resp.finish().await.unwrap();

    assert!(done.keep_alive);
    assert!(captured_text(&resp).contains("Connection: Keep-Alive\r\n"));
}

#[tokio::test]
async fn test_cookies_are_serialized_in_head() {
    let mut resp = Response::new();
    resp.prepare(Protocol::Http11, None, false, 1024);
    resp.add_cookie(Cookie::new("SESSIONID", "abc").with_path("/app"));
    resp.add_cookie(Cookie::new("pref", "dark").with_version(1));

    resp.finish().await.unwrap();
    let text = captured_text(&resp);

    assert!(text.contains("Set-Cookie: SESSIONID=abc; Path=/app\r\n"));
    assert!(text.contains("Set-Cookie2: pref=dark; Version=1; Discard\r\n"));
}

#[test]
fn test_persistent_cookie_gets_expiry() {
    let value = cookie_header_value(&Cookie::new("k", "v").with_max_age(60));
    assert!(value.starts_with("k=v; Expires="));
    assert!(value.ends_with(" GMT"));

    let secure = cookie_header_value(
        &Cookie::new("k", "v")
            .with_version(1)
            .with_secure(true)
            .with_max_age(0)
            .with_domain(".example.com"),
    );
    assert_eq!(secure, "k=v; Version=1; Domain=.example.com; Secure; Max-Age=0");
}

#[test]
fn test_keep_alive_decision_table() {
    let cases = [
        (None, None, Protocol::Http11, true),
        (None, None, Protocol::Http10, false),
        (Some("keep-alive"), None, Protocol::Http10, true),
        (Some("close"), None, Protocol::Http11, false),
        (None, Some("close"), Protocol::Http11, false),
        (Some("Keep-Alive"), Some("CLOSE"), Protocol::Http10, false),
        (Some("keep-alive"), None, Protocol::Http09, false),
        (None, None, Protocol::Http09, false),
    ];
    for (req, resp, protocol, expected) in cases {
        assert_eq!(
            decide_keep_alive(req, resp, protocol),
            expected,
            "{req:?} {resp:?} {protocol:?}"
        );
    }
}

#[tokio::test]
async fn test_recycle_restores_defaults() {
    let mut resp = Response::new();
    resp.prepare(Protocol::Http10, None, true, 4);
    resp.set_status(status::FORBIDDEN);
    resp.write_str("abcdefgh").await.unwrap();

    resp.recycle();

    assert_eq!(resp.status(), status::OK);
    assert!(!resp.is_committed());
    assert!(resp.captured().is_empty());
    assert_eq!(resp.body_bytes(), 0);
}
