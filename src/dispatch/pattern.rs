use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// A URL pattern as used by routes, filter mappings and constraints.
///
/// | written     | variant              |
/// |-------------|----------------------|
/// | `/a/b`      | `Exact("/a/b")`      |
/// | `/a/*`      | `Prefix("/a")`       |
/// | `/*`        | `Prefix("")`         |
/// | `*.ext`     | `Extension("ext")`   |
/// | `/`         | `Default`            |
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UrlPattern {
    Exact(String),
    Prefix(String),
    Extension(String),
    Default,
}

impl UrlPattern {
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidPattern(pattern.to_string());

        if pattern == "/" {
            return Ok(UrlPattern::Default);
        }
        if let Some(ext) = pattern.strip_prefix("*.") {
            if ext.is_empty() || ext.contains('/') {
                return Err(invalid());
            }
            return Ok(UrlPattern::Extension(ext.to_string()));
        }
        if !pattern.starts_with('/') {
            return Err(invalid());
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            if prefix.contains('*') {
                return Err(invalid());
            }
            return Ok(UrlPattern::Prefix(prefix.to_string()));
        }
        if pattern.contains('*') {
            return Err(invalid());
        }
        Ok(UrlPattern::Exact(pattern.to_string()))
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            UrlPattern::Exact(exact) => path == exact,
            UrlPattern::Prefix(prefix) => prefix_matches(prefix, path),
            UrlPattern::Extension(ext) => extension_of(path) == Some(ext.as_str()),
            UrlPattern::Default => true,
        }
    }
}

/// Whether `path` is `prefix` itself or lies below it.
pub(crate) fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// The extension of the last path segment, without the dot.
pub(crate) fn extension_of(path: &str) -> Option<&str> {
    let segment = path.rsplit('/').next()?;
    segment.rsplit_once('.').map(|(_, ext)| ext).filter(|e| !e.is_empty())
}

impl FromStr for UrlPattern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UrlPattern::parse(s)
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlPattern::Exact(exact) => f.write_str(exact),
            UrlPattern::Prefix(prefix) => write!(f, "{prefix}/*"),
            UrlPattern::Extension(ext) => write!(f, "*.{ext}"),
            UrlPattern::Default => f.write_str("/"),
        }
    }
}
