//! Stateless parsing of HTTP/0.9, HTTP/1.0 and HTTP/1.1 requests.
//!
//! The connection layer accumulates bytes and calls [`parse_http_request`]
//! until it stops returning [`ParseError::Incomplete`]. The smaller
//! routines are public so the request object can reuse them for lazily
//! parsed parameters.

use std::borrow::Cow;
use std::collections::HashMap;

use thiserror::Error;

use crate::http::cookie::Cookie;
use crate::http::locale::Locale;

/// Content type of URL-encoded form bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Parameter name to its values, in arrival order.
pub type ParamMap = HashMap<String, Vec<String>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("incomplete request")]
    Incomplete,
    #[error("malformed request line: {0}")]
    InvalidRequest(String),
    #[error("malformed header line: {0}")]
    InvalidHeader(String),
    #[error("invalid content length")]
    InvalidContentLength,
    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),
    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),
}

/// Protocol version named on the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    Http09,
    Http10,
    #[default]
    Http11,
}

impl Protocol {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HTTP/0.9" => Some(Protocol::Http09),
            "HTTP/1.0" => Some(Protocol::Http10),
            "HTTP/1.1" => Some(Protocol::Http11),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http09 => "HTTP/0.9",
            Protocol::Http10 => "HTTP/1.0",
            Protocol::Http11 => "HTTP/1.1",
        }
    }
}

/// The pieces of a request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    /// The URI as sent, before any scheme/host reduction.
    pub raw_uri: String,
    /// Percent-decoded path component.
    pub path: String,
    pub query_string: Option<String>,
    pub protocol: Protocol,
}

/// Header-derived request state.
///
/// `headers` keeps every line except cookies, verbatim and in order.
#[derive(Debug, Clone, Default)]
pub struct HeaderBlock {
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<Cookie>,
    pub session_id: Option<String>,
    pub authorization: Option<String>,
    pub locales: Vec<Locale>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub character_encoding: Option<String>,
    pub host: Option<String>,
    pub host_port: Option<u16>,
}

impl HeaderBlock {
    /// First value of the named header, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A fully framed request: line, headers and body bytes.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub line: RequestLine,
    pub headers: HeaderBlock,
    pub body: Vec<u8>,
}

/// Size limits applied while framing a request.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_head: usize,
    pub max_body: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_head: 64 * 1024,
            max_body: 10 * 1024 * 1024,
        }
    }
}

/// Parses one request from the front of `buf`.
///
/// Returns the request and the number of bytes it occupied, or
/// [`ParseError::Incomplete`] when more bytes are needed. Blank lines
/// before the request line are skipped.
pub fn parse_http_request(buf: &[u8], limits: Limits) -> Result<(ParsedRequest, usize), ParseError> {
    let (start, head_end) = match find_head_end(buf)? {
        Some(bounds) => bounds,
        None if buf.len() > limits.max_head => return Err(ParseError::HeadTooLarge(limits.max_head)),
        None => return Err(ParseError::Incomplete),
    };
    if head_end - start > limits.max_head {
        return Err(ParseError::HeadTooLarge(limits.max_head));
    }

    let head = String::from_utf8_lossy(&buf[start..head_end]);
    let mut lines = head.lines();

    let request_line = lines
        .next()
        .ok_or_else(|| ParseError::InvalidRequest(String::new()))?;
    let line = parse_request_line(request_line)?;

    let headers = if line.protocol == Protocol::Http09 {
        HeaderBlock::default()
    } else {
        parse_headers(lines)?
    };

    let content_length = match headers.content_length {
        Some(len) => usize::try_from(len).map_err(|_| ParseError::InvalidContentLength)?,
        None => 0,
    };
    if content_length > limits.max_body {
        return Err(ParseError::BodyTooLarge(limits.max_body));
    }

    let body_bytes = &buf[head_end..];
    if body_bytes.len() < content_length {
        return Err(ParseError::Incomplete);
    }
    let body = body_bytes[..content_length].to_vec();

    Ok((ParsedRequest { line, headers, body }, head_end + content_length))
}

/// Locates the request head in `buf`.
///
/// Returns `(start, end)` where `start` skips leading blank lines and `end`
/// is one past the blank line that terminates the headers. An HTTP/0.9
/// request line has no header phase, so its head ends with the line.
fn find_head_end(buf: &[u8]) -> Result<Option<(usize, usize)>, ParseError> {
    let mut start = 0;
    loop {
        match buf[start..].first() {
            Some(b'\r') | Some(b'\n') => start += 1,
            Some(_) => break,
            None => return Ok(None),
        }
    }

    let Some(first_nl) = buf[start..].iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    let line_end = start + first_nl + 1;
    let request_line = String::from_utf8_lossy(&buf[start..start + first_nl]);
    let request_line = request_line.trim_end_matches('\r');

    let Some((_, _, version)) = split_request_line(request_line) else {
        return Err(ParseError::InvalidRequest(request_line.to_string()));
    };
    if version.is_none() {
        return Ok(Some((start, line_end)));
    }

    // Scan line by line so both CRLF and bare LF terminators work.
    let mut pos = line_end;
    while let Some(nl) = buf[pos..].iter().position(|&b| b == b'\n') {
        let line = &buf[pos..pos + nl];
        if line.is_empty() || line == b"\r" {
            return Ok(Some((start, pos + nl + 1)));
        }
        pos += nl + 1;
    }
    Ok(None)
}

/// Splits a request line into method, URI and protocol.
///
/// A line without a protocol is HTTP/0.9. An absolute URI
/// (`http://host/path`) is reduced to its path and query.
pub fn parse_request_line(line: &str) -> Result<RequestLine, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let invalid = || ParseError::InvalidRequest(line.to_string());
    let (method, raw_uri, version) = split_request_line(line).ok_or_else(invalid)?;
    if method.is_empty() || raw_uri.is_empty() {
        return Err(invalid());
    }
    let protocol = match version {
        Some(version) => Protocol::parse(version).ok_or_else(invalid)?,
        None => Protocol::Http09,
    };

    let local = strip_scheme_and_host(raw_uri);
    let (path, query_string) = match local.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (&*local, None),
    };
    let path = if path.is_empty() { "/" } else { path };

    Ok(RequestLine {
        method: method.to_string(),
        raw_uri: raw_uri.to_string(),
        path: decode_path(path),
        query_string,
        protocol,
    })
}

/// Splits a request line into method, URI and protocol token. The token is
/// `None` for HTTP/0.9, including when only whitespace follows the URI.
fn split_request_line(line: &str) -> Option<(&str, &str, Option<&str>)> {
    let (method, rest) = line.trim_end_matches(['\r', '\n']).split_once(' ')?;
    let rest = rest.trim();
    match rest.split_once(' ') {
        Some((uri, version)) => Some((method, uri, Some(version.trim()))),
        None => Some((method, rest, None)),
    }
}

fn strip_scheme_and_host(uri: &str) -> Cow<'_, str> {
    if uri.starts_with('/') || !uri.contains("://") {
        return Cow::Borrowed(uri);
    }
    match url::Url::parse(uri) {
        Ok(url) => {
            let mut local = url.path().to_string();
            if let Some(query) = url.query() {
                local.push('?');
                local.push_str(query);
            }
            Cow::Owned(local)
        }
        Err(_) => Cow::Borrowed(uri),
    }
}

fn decode_path(path: &str) -> String {
    match urlencoding::decode(path) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => path.to_string(),
    }
}

/// Parses header lines up to the first blank line.
///
/// Continuation lines (leading space or tab) extend the previous header.
pub fn parse_headers<'a, I>(lines: I) -> Result<HeaderBlock, ParseError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut raw: Vec<(String, String)> = Vec::new();
    for line in lines {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            match raw.last_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(line.trim());
                    continue;
                }
                None => return Err(ParseError::InvalidHeader(line.to_string())),
            }
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::InvalidHeader(line.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ParseError::InvalidHeader(line.to_string()));
        }
        raw.push((name.to_string(), value.trim().to_string()));
    }

    let mut block = HeaderBlock::default();
    for (name, value) in raw {
        if name.eq_ignore_ascii_case("cookie") || name.eq_ignore_ascii_case("cookie2") {
            parse_cookie_header(&value, &mut block.cookies);
            continue;
        }

        if name.eq_ignore_ascii_case("authorization") {
            block.authorization = Some(value.clone());
        } else if name.eq_ignore_ascii_case("accept-language") {
            block.locales = parse_locales(&value);
        } else if name.eq_ignore_ascii_case("content-length") {
            let len = value
                .parse::<u64>()
                .map_err(|_| ParseError::InvalidContentLength)?;
            block.content_length = Some(len);
        } else if name.eq_ignore_ascii_case("content-type") {
            let (content_type, encoding) = split_content_type(&value);
            block.content_type = Some(content_type);
            block.character_encoding = encoding;
        } else if name.eq_ignore_ascii_case("host") {
            let (host, port) = split_host(&value);
            block.host = Some(host);
            block.host_port = port;
        }
        block.headers.push((name, value));
    }

    block.session_id = block
        .cookies
        .iter()
        .find(|c| c.is_session_cookie())
        .map(|c| c.value.clone());

    Ok(block)
}

/// Appends the cookies of one `Cookie`/`Cookie2` header value.
///
/// `$Version` applies to the cookies after it, `$Path` and `$Domain` to
/// the cookie before them.
pub fn parse_cookie_header(value: &str, cookies: &mut Vec<Cookie>) {
    let mut version = 0u8;
    for pair in value.split(';') {
        let Some((name, val)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        let val = unquote(val.trim());
        if name.is_empty() {
            continue;
        }

        match name {
            "$Version" => version = val.parse().unwrap_or(0),
            "$Path" => {
                if let Some(last) = cookies.last_mut() {
                    last.path = Some(val.to_string());
                }
            }
            "$Domain" => {
                if let Some(last) = cookies.last_mut() {
                    last.domain = Some(val.to_string());
                }
            }
            _ if name.starts_with('$') => {}
            _ => cookies.push(Cookie::new(name, val).with_version(version)),
        }
    }
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Splits `text/html; charset=UTF-8` into the type and the charset.
fn split_content_type(value: &str) -> (String, Option<String>) {
    let mut encoding = None;
    let mut kept: Vec<&str> = Vec::new();
    for part in value.split(';') {
        let trimmed = part.trim();
        match trimmed.split_once('=') {
            Some((key, charset)) if key.trim().eq_ignore_ascii_case("charset") => {
                encoding = Some(unquote(charset.trim()).to_string());
            }
            _ if !trimmed.is_empty() => kept.push(trimmed),
            _ => {}
        }
    }
    (kept.join("; "), encoding)
}

/// Separates a trailing `:port` from a `Host` value, IPv6 literals included.
fn split_host(value: &str) -> (String, Option<u16>) {
    let bracket_end = value.rfind(']').unwrap_or(0);
    match value.rfind(':') {
        Some(colon) if colon > bracket_end => {
            let port = value[colon + 1..].parse().ok();
            (value[..colon].to_string(), port)
        }
        _ => (value.to_string(), None),
    }
}

/// Orders the locales of an `Accept-Language` value by descending quality.
///
/// Entries with equal quality keep their header order. A clause with a
/// malformed quality counts as 0; entries with quality `<= 0` or `> 1` are
/// dropped, as is the `*` wildcard.
pub fn parse_locales(value: &str) -> Vec<Locale> {
    let stripped: String = value.chars().filter(|c| !c.is_whitespace()).collect();

    let mut weighted: Vec<(f64, Locale)> = Vec::new();
    for clause in stripped.split(',') {
        if clause.is_empty() {
            continue;
        }
        let (tag, quality) = match clause.split_once(';') {
            Some((tag, params)) => (tag, parse_quality(params)),
            None => (clause, 1.0),
        };
        if quality <= 0.0 || quality > 1.0 || tag == "*" {
            continue;
        }
        if let Some(locale) = Locale::from_tag(tag) {
            weighted.push((quality, locale));
        }
    }

    weighted.sort_by(|a, b| b.0.total_cmp(&a.0));
    weighted.into_iter().map(|(_, locale)| locale).collect()
}

fn parse_quality(params: &str) -> f64 {
    params
        .split(';')
        .find_map(|p| p.strip_prefix("q="))
        .map(|q| q.parse::<f64>().unwrap_or(0.0))
        .unwrap_or(1.0)
}

/// Decodes one URL-encoded component: `+` is a space, `%XX` a byte.
pub fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

/// Encodes one component so that [`decode_component`] recovers it.
pub fn encode_component(value: &str) -> String {
    urlencoding::encode(value).replace("%20", "+")
}

/// Adds the `&`-separated pairs of a query string to `params`.
///
/// A key without `=` gets an empty value; repeated keys accumulate.
pub fn parse_query_string(query: &str, params: &mut ParamMap) {
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(decode_component(key))
            .or_default()
            .push(decode_component(value));
    }
}

/// Parses a form body into `params` when the request carries one.
///
/// Only a POST whose content type is exactly the URL-encoded form type is
/// parsed. Returns whether the body was consumed.
pub fn parse_form_body(
    method: &str,
    content_type: Option<&str>,
    body: &[u8],
    params: &mut ParamMap,
) -> bool {
    if method != "POST" || content_type != Some(FORM_CONTENT_TYPE) {
        return false;
    }
    parse_query_string(&String::from_utf8_lossy(body), params);
    true
}

/// Serializes parameters as a query string.
pub fn encode_params<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    params
        .into_iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}
