/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE_NAME: &str = "SESSIONID";

/// An HTTP cookie, as received in a `Cookie` header or sent in `Set-Cookie`.
///
/// `version` is 0 for Netscape-style cookies and 1 for RFC 2965 cookies.
/// A negative `max_age` means the cookie lives for the browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: i64,
    pub secure: bool,
    pub version: u8,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age: -1,
            secure: false,
            version: 0,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_max_age(mut self, max_age: i64) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Whether this cookie names the session.
    pub fn is_session_cookie(&self) -> bool {
        self.name == SESSION_COOKIE_NAME
    }
}
