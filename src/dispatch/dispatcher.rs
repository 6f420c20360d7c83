//! Forward, include and error dispatches.
//!
//! Every dispatch walks the same small state machine:
//!
//! ```text
//! Initial ──► ConstraintCheck ──► FilterChain ──► TargetInvocation ──► Done
//!    │             │ (denied)          │ (chain ran the target)         ▲
//!    │             └───────────────────┼────────────────────────────────┤
//!    └─► (include / error) ─► FilterChain                               │
//!                                      └────────────────────────────────┘
//! ```

use tracing::{debug, trace};

use crate::dispatch::exchange::Exchange;
use crate::dispatch::filter::{DispatchType, FilterChain};
use crate::dispatch::routes::RouteMatch;
use crate::dispatch::security;
use crate::error::ServletError;
use crate::http::request::DispatchPath;

/// Request attributes describing dispatches.
pub mod attrs {
    pub const FORWARD_REQUEST_URI: &str = "vessel.forward.request_uri";
    pub const FORWARD_CONTEXT_PATH: &str = "vessel.forward.context_path";
    pub const FORWARD_SERVLET_PATH: &str = "vessel.forward.servlet_path";
    pub const FORWARD_PATH_INFO: &str = "vessel.forward.path_info";
    pub const FORWARD_QUERY_STRING: &str = "vessel.forward.query_string";

    pub const INCLUDE_REQUEST_URI: &str = "vessel.include.request_uri";
    pub const INCLUDE_CONTEXT_PATH: &str = "vessel.include.context_path";
    pub const INCLUDE_SERVLET_PATH: &str = "vessel.include.servlet_path";
    pub const INCLUDE_PATH_INFO: &str = "vessel.include.path_info";
    pub const INCLUDE_QUERY_STRING: &str = "vessel.include.query_string";

    pub const ERROR_STATUS_CODE: &str = "vessel.error.status_code";
    pub const ERROR_MESSAGE: &str = "vessel.error.message";
    pub const ERROR_KIND: &str = "vessel.error.kind";
    pub const ERROR_REQUEST_URI: &str = "vessel.error.request_uri";
    pub const ERROR_UNIT_NAME: &str = "vessel.error.unit_name";

    pub(crate) const INCLUDE: [&str; 5] = [
        INCLUDE_REQUEST_URI,
        INCLUDE_CONTEXT_PATH,
        INCLUDE_SERVLET_PATH,
        INCLUDE_PATH_INFO,
        INCLUDE_QUERY_STRING,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Initial,
    ConstraintCheck,
    FilterChain,
    TargetInvocation,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Path {
        route: RouteMatch,
        query: Option<String>,
    },
    Named(String),
}

/// A handle on one dispatch target, by path or by unit name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDispatcher {
    target: Target,
}

impl RequestDispatcher {
    pub(crate) fn for_route(route: RouteMatch, query: Option<String>) -> Self {
        Self {
            target: Target::Path { route, query },
        }
    }

    pub(crate) fn named(unit: impl Into<String>) -> Self {
        Self {
            target: Target::Named(unit.into()),
        }
    }

    /// The handler unit this dispatcher ends in.
    pub fn unit(&self) -> &str {
        match &self.target {
            Target::Path { route, .. } => &route.unit,
            Target::Named(unit) => unit,
        }
    }

    /// Runs the original client request against this target, checking
    /// security constraints first.
    pub(crate) async fn dispatch_request(&self, ex: &mut Exchange<'_>) -> Result<(), ServletError> {
        if let Target::Path { route, .. } = &self.target {
            ex.request
                .set_route(route.servlet_path.clone(), route.path_info.clone());
        }
        let path = ex.request.local_path();
        run(ex, DispatchType::Request, self.unit(), &path).await?;
        Ok(())
    }

    /// Hands the request over to this target. The response must not be
    /// committed; buffered output is discarded.
    ///
    /// Returns `false` when a security constraint stopped the forward
    /// before any filter or the target ran. The response then carries the
    /// rejection or the authentication challenge.
    pub async fn forward(&self, ex: &mut Exchange<'_>) -> Result<bool, ServletError> {
        if ex.response.is_committed() {
            return Err(ServletError::IllegalState("forward after commit"));
        }
        ex.response.reset_buffer()?;

        let Target::Path { route, query } = &self.target else {
            let path = ex.request.local_path();
            return run(ex, DispatchType::Forward, self.unit(), &path).await;
        };

        if ex.request.attribute(attrs::FORWARD_REQUEST_URI).is_none() {
            let original = current_path(ex);
            set_path_attributes(
                ex,
                [
                    attrs::FORWARD_REQUEST_URI,
                    attrs::FORWARD_CONTEXT_PATH,
                    attrs::FORWARD_SERVLET_PATH,
                    attrs::FORWARD_PATH_INFO,
                    attrs::FORWARD_QUERY_STRING,
                ],
                &original,
            );
        }

        let rewritten = target_path(ex, route, query.as_deref());
        let path = local_path(&rewritten);
        debug!(from = ex.request.request_uri(), to = %rewritten.request_uri, "forward");
        let previous = ex.request.swap_dispatch_path(rewritten);
        let params = query.as_deref().map(|q| ex.request.merge_query(q));

        let result = run(ex, DispatchType::Forward, &route.unit, &path).await;

        ex.request.swap_dispatch_path(previous);
        if let Some(params) = params {
            ex.request.restore_params(params);
        }
        result
    }

    /// Runs this target inside the current response. Only its body output
    /// is kept; status, header and cookie changes are dropped.
    pub async fn include(&self, ex: &mut Exchange<'_>) -> Result<(), ServletError> {
        let saved: Vec<_> = attrs::INCLUDE
            .iter()
            .map(|name| (*name, ex.request.remove_attribute(name)))
            .collect();

        let (unit, path, params) = match &self.target {
            Target::Path { route, query } => {
                let included = target_path(ex, route, query.as_deref());
                set_path_attributes(ex, attrs::INCLUDE, &included);
                let params = query.as_deref().map(|q| ex.request.merge_query(q));
                (route.unit.as_str(), local_path(&included), params)
            }
            Target::Named(unit) => (unit.as_str(), ex.request.local_path(), None),
        };

        ex.response.begin_include();
        let result = run(ex, DispatchType::Include, unit, &path).await.map(drop);
        ex.response.end_include();

        if let Some(params) = params {
            ex.request.restore_params(params);
        }
        for (name, value) in saved {
            ex.request.remove_attribute(name);
            if let Some(value) = value {
                ex.request.set_attribute_arc(name, value);
            }
        }
        result
    }

    /// Renders an error page. The caller has already reset the response
    /// and set the error attributes.
    pub(crate) async fn error(&self, ex: &mut Exchange<'_>) -> Result<(), ServletError> {
        let Target::Path { route, query } = &self.target else {
            let path = ex.request.local_path();
            return run(ex, DispatchType::Error, self.unit(), &path).await.map(drop);
        };
        let rewritten = target_path(ex, route, query.as_deref());
        let path = local_path(&rewritten);
        let previous = ex.request.swap_dispatch_path(rewritten);
        let result = run(ex, DispatchType::Error, &route.unit, &path).await;
        ex.request.swap_dispatch_path(previous);
        result.map(drop)
    }
}

/// Drives one dispatch. Returns `false` when the constraint check
/// halted it.
async fn run(
    ex: &mut Exchange<'_>,
    ty: DispatchType,
    unit: &str,
    path: &str,
) -> Result<bool, ServletError> {
    let app = ex.app();
    let mut state = DispatchState::Initial;
    let mut admitted = true;
    loop {
        trace!(?state, ?ty, unit, path, "dispatch");
        state = match state {
            DispatchState::Initial => match ty {
                DispatchType::Request | DispatchType::Forward => DispatchState::ConstraintCheck,
                DispatchType::Include | DispatchType::Error => DispatchState::FilterChain,
            },
            DispatchState::ConstraintCheck => {
                admitted = security::enforce(ex, path)?;
                if admitted {
                    DispatchState::FilterChain
                } else {
                    DispatchState::Done
                }
            }
            DispatchState::FilterChain => {
                let list = app.filter_lists().list(ty);
                if list.iter().any(|m| m.matches(unit, path)) {
                    FilterChain::new(list, unit, path).proceed(ex).await?;
                    DispatchState::Done
                } else {
                    DispatchState::TargetInvocation
                }
            }
            DispatchState::TargetInvocation => {
                let handler = app.handler(unit).await?;
                handler.service(ex).await?;
                DispatchState::Done
            }
            DispatchState::Done => return Ok(admitted),
        };
    }
}

fn current_path(ex: &Exchange<'_>) -> DispatchPath {
    DispatchPath {
        request_uri: ex.request.request_uri().to_string(),
        servlet_path: ex.request.servlet_path().to_string(),
        path_info: ex.request.path_info().map(str::to_string),
        query_string: ex.request.query_string().map(str::to_string),
    }
}

fn target_path(ex: &Exchange<'_>, route: &RouteMatch, query: Option<&str>) -> DispatchPath {
    let mut request_uri = ex.request.context_path().to_string();
    request_uri.push_str(&route.servlet_path);
    if let Some(info) = &route.path_info {
        request_uri.push_str(info);
    }
    DispatchPath {
        request_uri,
        servlet_path: route.servlet_path.clone(),
        path_info: route.path_info.clone(),
        query_string: query
            .map(str::to_string)
            .or_else(|| ex.request.query_string().map(str::to_string)),
    }
}

fn local_path(path: &DispatchPath) -> String {
    match &path.path_info {
        Some(info) => format!("{}{}", path.servlet_path, info),
        None => path.servlet_path.clone(),
    }
}

/// Sets `names` (uri, context, servlet path, path info, query) from `path`.
fn set_path_attributes(ex: &mut Exchange<'_>, names: [&str; 5], path: &DispatchPath) {
    let [uri, context, servlet, info, query] = names;
    let context_path = ex.request.context_path().to_string();
    ex.request.set_attribute(uri, path.request_uri.clone());
    ex.request.set_attribute(context, context_path);
    ex.request.set_attribute(servlet, path.servlet_path.clone());
    if let Some(value) = &path.path_info {
        ex.request.set_attribute(info, value.clone());
    }
    if let Some(value) = &path.query_string {
        ex.request.set_attribute(query, value.clone());
    }
}
