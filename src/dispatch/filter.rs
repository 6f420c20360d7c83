use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::trace;

use crate::dispatch::exchange::Exchange;
use crate::dispatch::pattern::UrlPattern;
use crate::dispatch::unit::Unit;
use crate::error::ServletError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The reason a dispatch runs. Each type has its own filter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DispatchType {
    Request,
    Forward,
    Include,
    Error,
}

impl DispatchType {
    pub const ALL: [DispatchType; 4] = [
        DispatchType::Request,
        DispatchType::Forward,
        DispatchType::Include,
        DispatchType::Error,
    ];
}

/// A unit wrapped around handler invocation.
///
/// Calling `chain.proceed(ex)` continues with the next matching filter,
/// or the target handler once the list is exhausted. A filter that does
/// not call it ends the dispatch.
#[async_trait]
pub trait Filter: Unit {
    async fn do_filter(
        &self,
        ex: &mut Exchange<'_>,
        chain: FilterChain<'_>,
    ) -> Result<(), ServletError>;
}

/// What a filter mapping selects on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// The target handler unit's name.
    Unit(String),
    /// The target's `servlet_path + path_info`.
    Path(UrlPattern),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterMapping {
    pub matcher: Matcher,
    pub filter: String,
    pub dispatch_types: Vec<DispatchType>,
}

impl FilterMapping {
    /// Maps `filter` onto a URL pattern for request dispatches.
    pub fn for_path(pattern: UrlPattern, filter: impl Into<String>) -> Self {
        Self {
            matcher: Matcher::Path(pattern),
            filter: filter.into(),
            dispatch_types: vec![DispatchType::Request],
        }
    }

    /// Maps `filter` onto a handler unit for request dispatches.
    pub fn for_unit(unit: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            matcher: Matcher::Unit(unit.into()),
            filter: filter.into(),
            dispatch_types: vec![DispatchType::Request],
        }
    }

    /// Replaces the dispatch types the mapping applies to.
    pub fn on(mut self, types: &[DispatchType]) -> Self {
        self.dispatch_types = types.to_vec();
        self
    }

    pub fn matches(&self, unit: &str, path: &str) -> bool {
        match &self.matcher {
            Matcher::Unit(name) => name == unit,
            Matcher::Path(pattern) => pattern.matches(path),
        }
    }
}

/// Per-dispatch-type filter lists: path mappings first, then unit
/// mappings, each in declaration order.
#[derive(Debug, Clone, Default)]
pub struct FilterLists {
    request: Vec<FilterMapping>,
    forward: Vec<FilterMapping>,
    include: Vec<FilterMapping>,
    error: Vec<FilterMapping>,
}

impl FilterLists {
    pub fn build(mappings: &[FilterMapping]) -> Self {
        let mut lists = FilterLists::default();
        for ty in DispatchType::ALL {
            let applies = |m: &&FilterMapping| m.dispatch_types.contains(&ty);
            let by_path = mappings
                .iter()
                .filter(applies)
                .filter(|m| matches!(m.matcher, Matcher::Path(_)));
            let by_unit = mappings
                .iter()
                .filter(applies)
                .filter(|m| matches!(m.matcher, Matcher::Unit(_)));
            *lists.list_mut(ty) = by_path.chain(by_unit).cloned().collect();
        }
        lists
    }

    pub fn list(&self, ty: DispatchType) -> &[FilterMapping] {
        match ty {
            DispatchType::Request => &self.request,
            DispatchType::Forward => &self.forward,
            DispatchType::Include => &self.include,
            DispatchType::Error => &self.error,
        }
    }

    fn list_mut(&mut self, ty: DispatchType) -> &mut Vec<FilterMapping> {
        match ty {
            DispatchType::Request => &mut self.request,
            DispatchType::Forward => &mut self.forward,
            DispatchType::Include => &mut self.include,
            DispatchType::Error => &mut self.error,
        }
    }
}

/// A position in one dispatch's filter list.
///
/// The chain is a small `Copy` value. Each step gets its own copy with the
/// index already advanced, so a filter that starts a nested dispatch
/// cannot disturb the walk it is part of.
#[derive(Debug, Clone, Copy)]
pub struct FilterChain<'c> {
    entries: &'c [FilterMapping],
    index: usize,
    unit: &'c str,
    path: &'c str,
}

impl<'c> FilterChain<'c> {
    pub fn new(entries: &'c [FilterMapping], unit: &'c str, path: &'c str) -> Self {
        Self {
            entries,
            index: 0,
            unit,
            path,
        }
    }

    /// The handler unit the chain ends in.
    pub fn target(&self) -> &str {
        self.unit
    }

    /// Runs the next matching filter, or the target when none is left.
    pub fn proceed<'b>(self, ex: &'b mut Exchange<'_>) -> BoxFuture<'b, Result<(), ServletError>>
    where
        'c: 'b,
    {
        Box::pin(async move {
            let mut next = self;
            while let Some(mapping) = next.entries.get(next.index) {
                next.index += 1;
                if mapping.matches(next.unit, next.path) {
                    trace!(filter = %mapping.filter, unit = next.unit, "invoking filter");
                    let filter = ex.app().filter(&mapping.filter).await?;
                    return filter.do_filter(ex, next).await;
                }
            }

            trace!(unit = next.unit, "invoking target");
            let handler = ex.app().handler(next.unit).await?;
            handler.service(ex).await
        })
    }
}
