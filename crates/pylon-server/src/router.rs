//! Path router.
//!
//! Maps request paths to values registered under route patterns. Patterns
//! use `{name}` segments for parameters; routes are tried in registration
//! order and the first match wins. Method dispatch is left to handlers.
//!
//! # Example
//!
//! ```rust
//! use pylon_server::Router;
//!
//! let mut router = Router::new();
//! assert!(router.insert("/users", "list"));
//! assert!(router.insert("/users/{id}", "get"));
//! assert!(!router.insert("/users", "again"));
//!
//! let m = router.find("/users/42").unwrap();
//! assert_eq!(*m.value(), "get");
//! assert_eq!(m.param("id"), Some("42"));
//! ```

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
struct Entry<T> {
    pattern: String,
    segments: Vec<Segment>,
    value: T,
}

impl<T> Entry<T> {
    fn parse(pattern: &str) -> Vec<Segment> {
        pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect()
    }

    fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let actual: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if actual.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, value) in self.segments.iter().zip(actual) {
            match segment {
                Segment::Literal(expected) if expected == value => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), value.to_string());
                }
            }
        }
        Some(params)
    }
}

/// A matched route.
#[derive(Debug)]
pub struct RouteMatch<'a, T> {
    pattern: &'a str,
    value: &'a T,
    params: HashMap<String, String>,
}

impl<'a, T> RouteMatch<'a, T> {
    /// Pattern the route was registered under.
    pub fn pattern(&self) -> &'a str {
        self.pattern
    }

    /// Value registered for the route.
    pub fn value(&self) -> &'a T {
        self.value
    }

    /// A captured path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Consumes the match, returning the captured parameters.
    pub fn into_params(self) -> HashMap<String, String> {
        self.params
    }
}

/// Pattern router.
#[derive(Debug, Clone)]
pub struct Router<T> {
    entries: Vec<Entry<T>>,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Router<T> {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` under `pattern`.
    ///
    /// Returns `false`, leaving the existing route in place, if the pattern
    /// is already registered.
    pub fn insert(&mut self, pattern: impl Into<String>, value: T) -> bool {
        let pattern = pattern.into();
        if self.contains(&pattern) {
            return false;
        }
        let segments = Entry::<T>::parse(&pattern);
        self.entries.push(Entry {
            pattern,
            segments,
            value,
        });
        true
    }

    /// Whether `pattern` is registered.
    pub fn contains(&self, pattern: &str) -> bool {
        self.entries.iter().any(|e| e.pattern == pattern)
    }

    /// Finds the first route matching `path`.
    pub fn find(&self, path: &str) -> Option<RouteMatch<'_, T>> {
        self.entries.iter().find_map(|entry| {
            entry.match_path(path).map(|params| RouteMatch {
                pattern: &entry.pattern,
                value: &entry.value,
                params,
            })
        })
    }

    /// Registered patterns, in registration order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.pattern.as_str())
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        let mut router = Router::new();
        router.insert("/health", 1);
        assert_eq!(router.find("/health").map(|m| *m.value()), Some(1));
        assert_eq!(router.find("/health/").map(|m| *m.value()), Some(1));
        assert!(router.find("/healthz").is_none());
    }

    #[test]
    fn test_root_pattern() {
        let mut router = Router::new();
        router.insert("/", "root");
        assert_eq!(router.find("/").map(|m| *m.value()), Some("root"));
        assert!(router.find("/other").is_none());
    }

    #[test]
    fn test_params() {
        let mut router = Router::new();
        router.insert("/orgs/{org}/repos/{repo}", ());
        let m = router.find("/orgs/pylon/repos/server").unwrap();
        assert_eq!(m.pattern(), "/orgs/{org}/repos/{repo}");
        assert_eq!(m.param("org"), Some("pylon"));
        assert_eq!(m.param("repo"), Some("server"));
        assert_eq!(m.param("missing"), None);
    }

    #[test]
    fn test_segment_count_must_match() {
        let mut router = Router::new();
        router.insert("/users/{id}", ());
        assert!(router.find("/users").is_none());
        assert!(router.find("/users/1/posts").is_none());
    }

    #[test]
    fn test_first_registration_wins() {
        let mut router = Router::new();
        assert!(router.insert("/a", "first"));
        assert!(!router.insert("/a", "second"));
        assert_eq!(router.len(), 1);
        assert_eq!(router.find("/a").map(|m| *m.value()), Some("first"));
    }

    #[test]
    fn test_earlier_route_shadows_later() {
        let mut router = Router::new();
        router.insert("/items/{id}", "param");
        router.insert("/items/new", "literal");
        assert_eq!(router.find("/items/new").map(|m| *m.value()), Some("param"));
        assert_eq!(router.patterns().collect::<Vec<_>>(), ["/items/{id}", "/items/new"]);
    }
}
