//! Serialization of response heads, cookies and the keep-alive decision.

use std::time::{Duration, SystemTime};

use crate::http::cookie::Cookie;
use crate::http::parser::Protocol;

/// Characters that force a version 1 cookie value to be quoted.
const COOKIE_SEPARATORS: &str = "()<>@,;:\\\"/[]?={} \t";

/// Standard reason phrase for a status code.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

pub fn write_status_line(buf: &mut Vec<u8>, protocol: Protocol, status: u16) {
    let line = format!("{} {} {}\r\n", protocol.as_str(), status, reason_phrase(status));
    buf.extend_from_slice(line.as_bytes());
}

pub fn write_header(buf: &mut Vec<u8>, name: &str, value: &str) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

/// Writes a `Set-Cookie` (version 0) or `Set-Cookie2` (version 1) line.
pub fn write_cookie(buf: &mut Vec<u8>, cookie: &Cookie) {
    let name = if cookie.version >= 1 {
        "Set-Cookie2"
    } else {
        "Set-Cookie"
    };
    write_header(buf, name, &cookie_header_value(cookie));
}

/// Formats the value of a set-cookie header.
///
/// Version 1 cookies get RFC 2965 attributes and quoted values where
/// needed. Version 0 cookies are written bare, with an `Expires` date when
/// the cookie is persistent.
pub fn cookie_header_value(cookie: &Cookie) -> String {
    let mut out = String::new();
    out.push_str(&cookie.name);
    out.push('=');

    if cookie.version >= 1 {
        quote_into(&cookie.value, &mut out);
        out.push_str("; Version=1");
        if let Some(domain) = &cookie.domain {
            out.push_str("; Domain=");
            quote_into(domain, &mut out);
        }
        if cookie.secure {
            out.push_str("; Secure");
        }
        if cookie.max_age >= 0 {
            out.push_str(&format!("; Max-Age={}", cookie.max_age));
        } else {
            out.push_str("; Discard");
        }
        if let Some(path) = &cookie.path {
            out.push_str("; Path=");
            quote_into(path, &mut out);
        }
    } else {
        out.push_str(&cookie.value);
        if cookie.max_age >= 0 {
            let expires = SystemTime::now() + Duration::from_secs(cookie.max_age.unsigned_abs());
            out.push_str("; Expires=");
            out.push_str(&httpdate::fmt_http_date(expires));
        }
        if let Some(path) = &cookie.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
    }
    out
}

fn quote_into(value: &str, out: &mut String) {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_control() || COOKIE_SEPARATORS.contains(c));
    if !needs_quotes {
        out.push_str(value);
        return;
    }
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Decides whether the connection survives this request/response cycle.
///
/// HTTP/0.9 always closes. An explicit `close` from either side closes.
/// With neither side saying anything, HTTP/1.0 closes and HTTP/1.1 stays
/// open.
pub fn decide_keep_alive(
    request_connection: Option<&str>,
    response_connection: Option<&str>,
    protocol: Protocol,
) -> bool {
    if protocol == Protocol::Http09 {
        return false;
    }
    let is_close = |v: Option<&str>| v.is_some_and(|v| v.trim().eq_ignore_ascii_case("close"));
    if is_close(request_connection) || is_close(response_connection) {
        return false;
    }
    if request_connection.is_none() && response_connection.is_none() {
        return protocol == Protocol::Http11;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_one_values_are_quoted() {
        let cookie = Cookie::new("pref", "a b").with_version(1).with_path("/app");
        assert_eq!(
            cookie_header_value(&cookie),
            "pref=\"a b\"; Version=1; Discard; Path=/app"
        );
    }

    #[test]
    fn plain_values_stay_bare() {
        let mut out = String::new();
        quote_into("abc123", &mut out);
        assert_eq!(out, "abc123");
    }
}
