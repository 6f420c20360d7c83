use tracing::debug;

use crate::dispatch::exchange::Exchange;
use crate::dispatch::pattern::UrlPattern;
use crate::error::ServletError;
use crate::http::response::status;
use crate::session::Principal;

/// Role that admits any authenticated caller.
pub const ANY_ROLE: &str = "*";

/// Access rule for a set of URL patterns.
///
/// An empty method list applies to every method. An empty role list asks
/// for no authentication; only the transport requirement is checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityConstraint {
    pub patterns: Vec<UrlPattern>,
    pub methods: Vec<String>,
    pub roles: Vec<String>,
    pub ssl_required: bool,
}

impl SecurityConstraint {
    pub fn new(patterns: Vec<UrlPattern>) -> Self {
        Self {
            patterns,
            ..Self::default()
        }
    }

    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn require_ssl(mut self) -> Self {
        self.ssl_required = true;
        self
    }

    pub fn applies(&self, path: &str, method: &str) -> bool {
        (self.methods.is_empty() || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method)))
            && self.patterns.iter().any(|p| p.matches(path))
    }

    fn admits(&self, principal: Option<&Principal>) -> bool {
        if self.roles.is_empty() {
            return true;
        }
        let Some(principal) = principal else {
            return false;
        };
        self.roles
            .iter()
            .any(|role| role == ANY_ROLE || principal.has_role(role))
    }
}

/// The outcome of checking a request against the constraint list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No constraint applies.
    Unconstrained,
    /// A constraint applies and is satisfied.
    Allowed,
    /// The constraint needs a secure connection.
    Forbidden,
    /// The caller has to authenticate, or lacks the roles.
    Challenge,
}

/// Checks a request against `constraints`; the first applicable one decides.
pub fn evaluate(
    constraints: &[SecurityConstraint],
    path: &str,
    method: &str,
    secure: bool,
    principal: Option<&Principal>,
) -> Verdict {
    let Some(constraint) = constraints.iter().find(|c| c.applies(path, method)) else {
        return Verdict::Unconstrained;
    };
    if constraint.ssl_required && !secure {
        Verdict::Forbidden
    } else if !constraint.admits(principal) {
        Verdict::Challenge
    } else {
        Verdict::Allowed
    }
}

/// Applies the constraint check to a dispatch. Returns whether it may go on;
/// when it may not, the response already carries the rejection or challenge.
pub(crate) fn enforce(ex: &mut Exchange<'_>, path: &str) -> Result<bool, ServletError> {
    let app = ex.app();
    let principal = ex.request.principal();
    let verdict = evaluate(
        app.constraints(),
        path,
        ex.request.method(),
        ex.request.is_secure(),
        principal.as_ref(),
    );
    debug!(path, ?verdict, "security check");

    match verdict {
        Verdict::Unconstrained => Ok(true),
        Verdict::Allowed => {
            ex.response.set_header("Pragma", "no-cache");
            ex.response.set_header("Cache-Control", "no-cache");
            ex.response
                .set_header("Expires", httpdate::fmt_http_date(std::time::UNIX_EPOCH));
            Ok(true)
        }
        Verdict::Forbidden => {
            ex.response.send_error(status::FORBIDDEN, Some("secure connection required"))?;
            Ok(false)
        }
        Verdict::Challenge => {
            match app.authenticator() {
                Some(auth) => auth.challenge(ex)?,
                None => ex.response.send_error(status::FORBIDDEN, None)?,
            }
            Ok(false)
        }
    }
}
