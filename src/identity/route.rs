//! Route metadata: which capability a navigation target requires.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMeta {
    /// Pattern: literal segments, `:name` parameters, or a trailing `*`.
    pub path: String,
    #[serde(default)]
    pub capability: Option<String>,
}

impl RouteMeta {
    pub fn open(path: impl Into<String>) -> Self { Self { path: path.into(), capability: None } }

    pub fn requires(path: impl Into<String>, capability: impl Into<String>) -> Self {
        Self { path: path.into(), capability: Some(capability.into()) }
    }

    pub fn required_capability(&self) -> Option<&str> {
        self.capability.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    fn segments(&self) -> Vec<&str> { split_path(&self.path) }

    fn is_wildcard(&self) -> bool { self.segments().last() == Some(&"*") }

    fn matches(&self, path: &[&str]) -> bool {
        let pattern = self.segments();
        let (fixed, wildcard) = match pattern.split_last() {
            Some((&"*", rest)) => (rest, true),
            _ => (pattern.as_slice(), false),
        };
        let len_ok = if wildcard { path.len() >= fixed.len() } else { path.len() == fixed.len() };
        len_ok && fixed.iter().zip(path).all(|(p, s)| p.starts_with(':') || p == s)
    }

    // literal segments beat parameters; longer fixed prefixes beat shorter ones
    fn specificity(&self) -> (bool, usize, usize) {
        let segs = self.segments();
        let literal = segs.iter().filter(|s| **s != "*" && !s.starts_with(':')).count();
        (!self.is_wildcard(), segs.len(), literal)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteMeta>,
}

impl RouteTable {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, route: RouteMeta) -> Self { self.insert(route); self }

    /// Add a route; a route with the same pattern is replaced.
    pub fn insert(&mut self, route: RouteMeta) {
        self.routes.retain(|r| r.path != route.path);
        self.routes.push(route);
    }

    pub fn len(&self) -> usize { self.routes.len() }

    pub fn is_empty(&self) -> bool { self.routes.is_empty() }

    /// Most specific route matching `path`. Unknown paths resolve to an open route.
    pub fn resolve(&self, path: &str) -> RouteMeta {
        let segs = split_path(path);
        self.routes
            .iter()
            .filter(|r| r.matches(&segs))
            .max_by_key(|r| r.specificity())
            .cloned()
            .unwrap_or_else(|| RouteMeta::open(path))
    }
}

impl FromIterator<RouteMeta> for RouteTable {
    fn from_iter<I: IntoIterator<Item = RouteMeta>>(iter: I) -> Self {
        let mut table = RouteTable::new();
        for r in iter { table.insert(r); }
        table
    }
}
