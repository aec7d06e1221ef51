//! The router proper: registration, mounting, and trie lookup.

use crate::error::{MatchError, PatternError};
use crate::pattern::{path_segments, Pattern, Segment};
use hashbrown::HashMap;
use http::Method;

/// Stable identifier of a registered route.
///
/// Route ids are dense indices assigned in registration order; the
/// pre-compiler uses them to key per-route statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(pub(crate) u32);

impl RouteId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A successful lookup: the matched route and its captured parameters.
#[derive(Debug)]
pub struct RouteMatch<'a, T> {
    /// Identifier of the matched route.
    pub route_id: RouteId,
    /// The pattern the route was registered with.
    pub pattern: &'a str,
    /// The registered value (handler reference, in the server).
    pub value: &'a T,
    /// Captured path parameters: `:name` under its name, `*` under `*`,
    /// `**` under `**` (joined with `/`).
    pub params: HashMap<String, String>,
}

struct RegisteredRoute<T> {
    method: Method,
    pattern: Pattern,
    value: T,
}

#[derive(Default)]
struct Node {
    literal: HashMap<String, Node>,
    param: Option<Box<Node>>,
    wildcard: Option<Box<Node>>,
    /// Routes whose pattern ends with `**` at this depth, registration order.
    deep: Vec<u32>,
    /// Routes whose pattern ends exactly here, registration order.
    terminals: Vec<u32>,
}

impl Node {
    fn insert(&mut self, segments: &[Segment], route: u32) {
        match segments.first() {
            None => self.terminals.push(route),
            Some(Segment::DeepWildcard) => self.deep.push(route),
            Some(Segment::Literal(lit)) => self
                .literal
                .entry(lit.clone())
                .or_default()
                .insert(&segments[1..], route),
            Some(Segment::Param(_)) => self
                .param
                .get_or_insert_with(Default::default)
                .insert(&segments[1..], route),
            Some(Segment::Wildcard) => self
                .wildcard
                .get_or_insert_with(Default::default)
                .insert(&segments[1..], route),
        }
    }

    /// Depth-first search in precedence order. `captures` accumulates the
    /// dynamic segment values along the current path; on success it holds
    /// exactly the winning route's captures.
    fn find(&self, segments: &[&str], captures: &mut Vec<String>) -> Option<u32> {
        let Some((head, rest)) = segments.split_first() else {
            return self.terminals.first().copied();
        };

        if let Some(child) = self.literal.get(*head) {
            if let Some(found) = child.find(rest, captures) {
                return Some(found);
            }
        }

        if let Some(child) = &self.param {
            captures.push((*head).to_string());
            if let Some(found) = child.find(rest, captures) {
                return Some(found);
            }
            captures.pop();
        }

        if let Some(child) = &self.wildcard {
            captures.push((*head).to_string());
            if let Some(found) = child.find(rest, captures) {
                return Some(found);
            }
            captures.pop();
        }

        if let Some(&found) = self.deep.first() {
            captures.push(segments.join("/"));
            return Some(found);
        }

        None
    }

    /// Match test without capture bookkeeping, for building `Allow` lists.
    fn matches(&self, segments: &[&str]) -> bool {
        let Some((head, rest)) = segments.split_first() else {
            return !self.terminals.is_empty();
        };
        if let Some(child) = self.literal.get(*head) {
            if child.matches(rest) {
                return true;
            }
        }
        if let Some(child) = &self.param {
            if child.matches(rest) {
                return true;
            }
        }
        if let Some(child) = &self.wildcard {
            if child.matches(rest) {
                return true;
            }
        }
        !self.deep.is_empty()
    }
}

/// Pattern-based router over `(method, path)`.
///
/// Generic over the registered value so the routing engine stays free of
/// handler machinery; the server registers its endpoint type.
pub struct Router<T> {
    routes: Vec<RegisteredRoute<T>>,
    tries: HashMap<Method, Node>,
}

impl<T> Router<T> {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            tries: HashMap::new(),
        }
    }

    /// Registers a route. Patterns compile deterministically; invalid
    /// patterns are rejected here so lookup never fails on pattern shape.
    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        value: T,
    ) -> Result<RouteId, PatternError> {
        let pattern = Pattern::compile(pattern)?;
        Ok(self.insert(normalize_method(method), pattern, value))
    }

    /// Mounts a sub-router under `prefix`.
    ///
    /// Every route of `sub` is re-registered here with its pattern prefixed;
    /// mounted routes take fresh registration order at the point of the
    /// mount, and prefix segments participate in precedence like any other
    /// segments.
    pub fn mount(&mut self, prefix: &str, sub: Router<T>) -> Result<(), PatternError> {
        let prefix = Pattern::compile(prefix)?;
        if prefix
            .segments()
            .iter()
            .any(|s| matches!(s, Segment::DeepWildcard))
        {
            return Err(PatternError {
                pattern: prefix.as_str().to_string(),
                reason: "mount prefix may not contain `**`",
            });
        }
        for route in sub.routes {
            let pattern = route.pattern.prefixed(&prefix);
            self.insert(route.method, pattern, route.value);
        }
        Ok(())
    }

    fn insert(&mut self, method: Method, pattern: Pattern, value: T) -> RouteId {
        let id = RouteId(self.routes.len() as u32);
        self.tries
            .entry(method.clone())
            .or_default()
            .insert(pattern.segments(), id.0);
        self.routes.push(RegisteredRoute {
            method,
            pattern,
            value,
        });
        id
    }

    /// Resolves `(method, path)` to a route and its parameters.
    pub fn lookup(&self, method: &Method, path: &str) -> Result<RouteMatch<'_, T>, MatchError> {
        let method = normalize_method(method.clone());
        let segments = path_segments(path);

        if let Some(trie) = self.tries.get(&method) {
            let mut captures = Vec::new();
            if let Some(index) = trie.find(&segments, &mut captures) {
                let route = &self.routes[index as usize];
                let params = route
                    .pattern
                    .capture_names()
                    .map(str::to_string)
                    .zip(captures)
                    .collect();
                return Ok(RouteMatch {
                    route_id: RouteId(index),
                    pattern: route.pattern.as_str(),
                    value: &route.value,
                    params,
                });
            }
        }

        // No match for this method: distinguish 404 from 405.
        let mut allow: Vec<Method> = self
            .tries
            .iter()
            .filter(|(m, trie)| **m != method && trie.matches(&segments))
            .map(|(m, _)| m.clone())
            .collect();
        if allow.is_empty() {
            Err(MatchError::NotFound)
        } else {
            allow.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            allow.dedup();
            Err(MatchError::MethodNotAllowed { allow })
        }
    }

    /// The registered route for `id`.
    pub fn get(&self, id: RouteId) -> Option<(&Method, &str, &T)> {
        self.routes
            .get(id.index())
            .map(|r| (&r.method, r.pattern.as_str(), &r.value))
    }

    /// Iterates all registered routes in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (RouteId, &Method, &str, &T)> {
        self.routes
            .iter()
            .enumerate()
            .map(|(i, r)| (RouteId(i as u32), &r.method, r.pattern.as_str(), &r.value))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Methods compare case-insensitively; the canonical constants are already
/// uppercase, so any lowercase extension token is uppercased once here.
fn normalize_method(method: Method) -> Method {
    let name = method.as_str();
    if name.bytes().any(|b| b.is_ascii_lowercase()) {
        Method::from_bytes(name.to_ascii_uppercase().as_bytes()).unwrap_or(method)
    } else {
        method
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router<&'static str> {
        Router::new()
    }

    #[test]
    fn test_literal_match() {
        let mut r = router();
        r.route(Method::GET, "/health", "health").unwrap();
        let m = r.lookup(&Method::GET, "/health").unwrap();
        assert_eq!(*m.value, "health");
        assert_eq!(m.pattern, "/health");
        assert!(m.params.is_empty());
    }

    #[test]
    fn test_root_route() {
        let mut r = router();
        r.route(Method::GET, "/", "root").unwrap();
        assert_eq!(*r.lookup(&Method::GET, "/").unwrap().value, "root");
    }

    #[test]
    fn test_param_capture() {
        let mut r = router();
        r.route(Method::GET, "/users/:id/posts/:post", "p").unwrap();
        let m = r.lookup(&Method::GET, "/users/7/posts/99").unwrap();
        assert_eq!(m.params["id"], "7");
        assert_eq!(m.params["post"], "99");
    }

    #[test]
    fn test_param_does_not_span_segments() {
        let mut r = router();
        r.route(Method::GET, "/users/:id", "u").unwrap();
        assert!(r.lookup(&Method::GET, "/users/7/extra").is_err());
    }

    #[test]
    fn test_single_wildcard() {
        let mut r = router();
        r.route(Method::GET, "/files/*/meta", "meta").unwrap();
        let m = r.lookup(&Method::GET, "/files/report.pdf/meta").unwrap();
        assert_eq!(m.params["*"], "report.pdf");
        assert!(r.lookup(&Method::GET, "/files/a/b/meta").is_err());
    }

    #[test]
    fn test_deep_wildcard_requires_one_segment() {
        let mut r = router();
        r.route(Method::GET, "/static/**", "s").unwrap();
        assert!(r.lookup(&Method::GET, "/static").is_err());
        let m = r.lookup(&Method::GET, "/static/css/site.css").unwrap();
        assert_eq!(m.params["**"], "css/site.css");
    }

    #[test]
    fn test_precedence_param_over_wildcard() {
        let mut r = router();
        r.route(Method::GET, "/x/*", "wild").unwrap();
        r.route(Method::GET, "/x/:name", "param").unwrap();
        // :param beats * regardless of registration order.
        assert_eq!(*r.lookup(&Method::GET, "/x/v").unwrap().value, "param");
    }

    #[test]
    fn test_precedence_wildcard_over_deep() {
        let mut r = router();
        r.route(Method::GET, "/x/**", "deep").unwrap();
        r.route(Method::GET, "/x/*", "wild").unwrap();
        assert_eq!(*r.lookup(&Method::GET, "/x/one").unwrap().value, "wild");
        assert_eq!(*r.lookup(&Method::GET, "/x/one/two").unwrap().value, "deep");
    }

    #[test]
    fn test_registration_order_breaks_ties() {
        let mut r = router();
        r.route(Method::GET, "/t/:a", "first").unwrap();
        r.route(Method::GET, "/t/:b", "second").unwrap();
        let m = r.lookup(&Method::GET, "/t/v").unwrap();
        assert_eq!(*m.value, "first");
        assert_eq!(m.params["a"], "v");
    }

    #[test]
    fn test_backtracks_from_failed_literal() {
        let mut r = router();
        r.route(Method::GET, "/a/b/c", "literal").unwrap();
        r.route(Method::GET, "/a/:x/d", "param").unwrap();
        // `/a/b/d` walks into the literal `b` child, fails at `c`, and must
        // back out to the param branch.
        assert_eq!(*r.lookup(&Method::GET, "/a/b/d").unwrap().value, "param");
    }

    #[test]
    fn test_mount_concatenates_prefix() {
        let mut api = router();
        api.route(Method::GET, "/users/:id", "user").unwrap();
        api.route(Method::GET, "/", "index").unwrap();

        let mut root = router();
        root.mount("/api/v1", api).unwrap();

        let m = root.lookup(&Method::GET, "/api/v1/users/3").unwrap();
        assert_eq!(*m.value, "user");
        assert_eq!(m.params["id"], "3");
        assert_eq!(*root.lookup(&Method::GET, "/api/v1").unwrap().value, "index");
    }

    #[test]
    fn test_mount_rejects_deep_wildcard_prefix() {
        let sub = router();
        let mut root = router();
        assert!(root.mount("/a/**", sub).is_err());
    }

    #[test]
    fn test_method_case_insensitive() {
        let mut r = router();
        r.route(Method::from_bytes(b"get").unwrap(), "/x", "x").unwrap();
        assert!(r.lookup(&Method::GET, "/x").is_ok());
    }

    #[test]
    fn test_paths_case_sensitive() {
        let mut r = router();
        r.route(Method::GET, "/Users", "u").unwrap();
        assert!(r.lookup(&Method::GET, "/users").is_err());
    }

    #[test]
    fn test_allow_list_sorted_deduplicated() {
        let mut r = router();
        r.route(Method::PUT, "/r", "1").unwrap();
        r.route(Method::DELETE, "/r", "2").unwrap();
        r.route(Method::GET, "/r", "3").unwrap();
        match r.lookup(&Method::POST, "/r") {
            Err(MatchError::MethodNotAllowed { allow }) => {
                assert_eq!(allow, vec![Method::DELETE, Method::GET, Method::PUT]);
            }
            _ => panic!("expected MethodNotAllowed"),
        }
    }

    #[test]
    fn test_route_ids_are_dense() {
        let mut r = router();
        let a = r.route(Method::GET, "/a", "a").unwrap();
        let b = r.route(Method::GET, "/b", "b").unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(r.get(b).map(|(_, p, _)| p), Some("/b"));
        assert_eq!(r.routes().count(), 2);
    }
}
