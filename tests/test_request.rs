use vessel::http::parser::Protocol;
use vessel::http::request::{Request, RequestBuilder};
use vessel::ServletError;

#[test]
fn test_request_header_retrieval() {
    let req = RequestBuilder::new()
        .header("Host", "example.com")
        .header("Content-Type", "application/json")
        .build()
        .unwrap();

    assert_eq!(req.header("host"), Some("example.com"));
    assert_eq!(req.header("Content-Type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
    assert_eq!(req.content_type(), Some("application/json"));
}

#[test]
fn test_request_repeated_headers() {
    let req = RequestBuilder::new()
        .header("Accept", "text/html")
        .header("accept", "text/plain")
        .header("X-Count", " 42 ")
        .build()
        .unwrap();

    let accepts: Vec<&str> = req.headers("ACCEPT").collect();
    assert_eq!(accepts, ["text/html", "text/plain"]);
    assert_eq!(req.header_names(), ["Accept", "X-Count"]);
    assert_eq!(req.int_header("x-count"), Some(42));
}

#[test]
fn test_request_date_header() {
    let req = RequestBuilder::new()
        .header("If-Modified-Since", "Sun, 06 Nov 1994 08:49:37 GMT")
        .build()
        .unwrap();

    let when = req.date_header("If-Modified-Since").unwrap();
    let secs = when
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    assert_eq!(secs, 784111777);
}

#[test]
fn test_request_content_length_parsing() {
    let req = RequestBuilder::new()
        .method("POST")
        .uri("/api")
        .body("0123456789")
        .build()
        .unwrap();

    assert_eq!(req.content_length(), Some(10));
}

#[test]
fn test_request_content_length_missing() {
    let req = RequestBuilder::new().build().unwrap();

    assert_eq!(req.content_length(), None);
}

#[test]
fn test_request_parse_from_raw_bytes() {
    let req = Request::parse(b"GET /shop/cart?item=7 HTTP/1.0\r\nHost: shop.local:9000\r\n\r\n")
        .unwrap();

    assert_eq!(req.method(), "GET");
    assert_eq!(req.protocol(), Protocol::Http10);
    assert_eq!(req.request_uri(), "/shop/cart");
    assert_eq!(req.query_string(), Some("item=7"));
    assert_eq!(req.server_name(), "shop.local");
    assert_eq!(req.server_port(), 9000);
    assert_eq!(req.scheme(), "http");
}

#[test]
fn test_request_parameters_from_query() {
    let mut req = RequestBuilder::new()
        .uri("/search?q=rust+lang&tag=a&tag=b")
        .build()
        .unwrap();

    assert_eq!(req.parameter("q"), Some("rust lang"));
    assert_eq!(
        req.parameter_values("tag"),
        Some(&["a".to_string(), "b".to_string()][..])
    );
    assert_eq!(req.parameter("missing"), None);
}

#[test]
fn test_request_parameters_merge_form_body() {
    let mut req = RequestBuilder::new()
        .method("POST")
        .uri("/submit?source=query")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body("source=form&user=alice")
        .build()
        .unwrap();

    assert_eq!(
        req.parameter_values("source"),
        Some(&["query".to_string(), "form".to_string()][..])
    );
    assert_eq!(req.parameter("user"), Some("alice"));
}

#[test]
fn test_request_body_unavailable_after_form_parse() {
    let mut req = RequestBuilder::new()
        .method("POST")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body("a=1")
        .build()
        .unwrap();

    assert_eq!(req.parameter("a"), Some("1"));
    assert!(matches!(req.body(), Err(ServletError::IllegalState(_))));
}

#[test]
fn test_request_raw_body_skips_form_parse() {
    let mut req = RequestBuilder::new()
        .method("POST")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body("a=1")
        .build()
        .unwrap();

    assert_eq!(req.body().unwrap(), b"a=1");
    assert_eq!(req.parameter("a"), None);
}

#[test]
fn test_request_non_form_post_keeps_body() {
    let mut req = RequestBuilder::new()
        .method("POST")
        .header("Content-Type", "application/json")
        .body("{\"a\":1}")
        .build()
        .unwrap();

    assert_eq!(req.parameter("a"), None);
    assert_eq!(req.body().unwrap(), b"{\"a\":1}");
}

#[test]
fn test_request_merge_and_restore_query() {
    let mut req = RequestBuilder::new().uri("/a?x=1").build().unwrap();

    let saved = req.merge_query("x=2&y=3");
    assert_eq!(
        req.parameter_values("x"),
        Some(&["2".to_string(), "1".to_string()][..])
    );
    assert_eq!(req.parameter("y"), Some("3"));

    req.restore_params(saved);
    assert_eq!(req.parameter("x"), Some("1"));
    assert_eq!(req.parameter("y"), None);
}

#[test]
fn test_request_attributes() {
    let mut req = Request::new();

    req.set_attribute("count", 3u32);
    req.set_attribute("label", "hello".to_string());

    assert_eq!(req.attribute_as::<u32>("count"), Some(&3));
    assert_eq!(req.attribute_as::<String>("label").map(String::as_str), Some("hello"));
    assert!(req.attribute_as::<u64>("count").is_none());

    assert!(req.remove_attribute("count").is_some());
    assert!(req.attribute("count").is_none());
    assert_eq!(req.attribute_names().collect::<Vec<_>>(), ["label"]);
}

#[test]
fn test_request_locales() {
    let req = RequestBuilder::new()
        .header("Accept-Language", "en-US;q=0.8,fr;q=0.9")
        .build()
        .unwrap();

    assert_eq!(req.locale().to_string(), "fr");
    assert_eq!(req.locales().len(), 2);

    let plain = RequestBuilder::new().build().unwrap();
    assert_eq!(plain.locale().to_string(), "en");
}

#[test]
fn test_request_context_path() {
    let mut req = RequestBuilder::new().uri("/app/orders/7").build().unwrap();

    assert!(req.set_context_path("/app"));
    assert_eq!(req.context_path(), "/app");
    assert_eq!(req.servlet_path(), "/orders/7");
    assert_eq!(req.request_uri(), "/app/orders/7");

    let mut other = RequestBuilder::new().uri("/application").build().unwrap();
    assert!(!other.set_context_path("/app"));
    assert_eq!(other.servlet_path(), "/application");
}

#[test]
fn test_request_session_cookie() {
    let req = RequestBuilder::new()
        .header("Cookie", "theme=dark; SESSIONID=abc123")
        .build()
        .unwrap();

    assert_eq!(req.session_cookie(), Some("abc123"));
    assert_eq!(req.cookies().len(), 2);
    assert!(req.header("Cookie").is_none());
}

#[test]
fn test_request_keep_alive_by_protocol() {
    let http11 = RequestBuilder::new().build().unwrap();
    assert!(http11.keep_alive());

    let http10 = RequestBuilder::new()
        .protocol(Protocol::Http10)
        .build()
        .unwrap();
    assert!(!http10.keep_alive());

    let http10_ka = RequestBuilder::new()
        .protocol(Protocol::Http10)
        .header("Connection", "keep-alive")
        .build()
        .unwrap();
    assert!(http10_ka.keep_alive());
}
