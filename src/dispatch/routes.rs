use std::collections::HashMap;

use crate::dispatch::pattern::{extension_of, prefix_matches, UrlPattern};

/// Which kind of pattern resolved a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Prefix,
    Extension,
    Default,
}

/// The outcome of resolving a path against the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub unit: String,
    pub servlet_path: String,
    pub path_info: Option<String>,
    pub kind: MatchKind,
}

/// Path-to-unit table.
///
/// Resolution order: exact path, then the longest matching prefix, then
/// the first matching extension in declaration order, then the default
/// unit.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    exact: HashMap<String, String>,
    /// Kept sorted longest prefix first.
    prefixes: Vec<(String, String)>,
    extensions: Vec<(String, String)>,
    default_unit: Option<String>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pattern: UrlPattern, unit: impl Into<String>) {
        let unit = unit.into();
        match pattern {
            UrlPattern::Exact(path) => {
                self.exact.insert(path, unit);
            }
            UrlPattern::Prefix(prefix) => {
                self.prefixes.retain(|(p, _)| *p != prefix);
                self.prefixes.push((prefix, unit));
                self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
            }
            UrlPattern::Extension(ext) => self.extensions.push((ext, unit)),
            UrlPattern::Default => self.default_unit = Some(unit),
        }
    }

    pub fn set_default(&mut self, unit: impl Into<String>) {
        self.default_unit = Some(unit.into());
    }

    pub fn default_unit(&self) -> Option<&str> {
        self.default_unit.as_deref()
    }

    pub fn resolve(&self, path: &str) -> Option<RouteMatch> {
        if let Some(unit) = self.exact.get(path) {
            return Some(RouteMatch {
                unit: unit.clone(),
                servlet_path: path.to_string(),
                path_info: None,
                kind: MatchKind::Exact,
            });
        }

        if let Some((prefix, unit)) = self
            .prefixes
            .iter()
            .find(|(prefix, _)| prefix_matches(prefix, path))
        {
            let rest = &path[prefix.len()..];
            return Some(RouteMatch {
                unit: unit.clone(),
                servlet_path: prefix.clone(),
                path_info: (!rest.is_empty()).then(|| rest.to_string()),
                kind: MatchKind::Prefix,
            });
        }

        if let Some(ext) = extension_of(path) {
            if let Some((_, unit)) = self.extensions.iter().find(|(e, _)| e == ext) {
                return Some(RouteMatch {
                    unit: unit.clone(),
                    servlet_path: path.to_string(),
                    path_info: None,
                    kind: MatchKind::Extension,
                });
            }
        }

        self.default_unit.as_ref().map(|unit| RouteMatch {
            unit: unit.clone(),
            servlet_path: path.to_string(),
            path_info: None,
            kind: MatchKind::Default,
        })
    }

    /// Every unit name the table refers to.
    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.exact
            .values()
            .chain(self.prefixes.iter().map(|(_, u)| u))
            .chain(self.extensions.iter().map(|(_, u)| u))
            .chain(self.default_unit.iter())
            .map(String::as_str)
    }
}
