//! High-level router API.

use http::Method;

use crate::error::RouteError;
use crate::node::Node;
use crate::RouteMatch;

/// Result of looking up a request against the router.
#[derive(Debug)]
pub enum Lookup<'a, T> {
    /// A route matched both path and method.
    Found(RouteMatch<'a, T>),
    /// The path matched but not the method; carries the `Allow` header value.
    MethodNotAllowed(String),
    /// No route matched the path.
    NotFound,
}

/// A radix tree router storing one `T` per (method, path pattern).
///
/// # Route Priority
///
/// 1. **Static segments** (e.g., `/users/me`)
/// 2. **Parameter segments** (e.g., `/users/{id}`)
/// 3. **Wildcard segments** (e.g., `/files/*path`)
///
/// Trailing slashes are normalized: `/users/` matches `/users`.
#[derive(Debug, Clone)]
pub struct Router<T> {
    root: Node<T>,
    route_count: usize,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Router<T> {
    /// Creates a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Node::root(),
            route_count: 0,
        }
    }

    /// Installs `value` for `method` requests matching `path`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use janus_router::{RouteError, Router};
    /// use http::Method;
    ///
    /// let mut router = Router::new();
    /// router.handle(Method::POST, "/widgets", 1).unwrap();
    /// assert!(matches!(
    ///     router.handle(Method::POST, "/widgets", 2),
    ///     Err(RouteError::Conflict { .. })
    /// ));
    /// ```
    pub fn handle(&mut self, method: Method, path: &str, value: T) -> Result<(), RouteError> {
        self.root.insert(path, method, value)?;
        self.route_count += 1;
        Ok(())
    }

    /// Looks up the value for a request.
    #[must_use]
    pub fn lookup(&self, method: &Method, path: &str) -> Lookup<'_, T> {
        let Some((methods, params)) = self.root.match_path(path) else {
            return Lookup::NotFound;
        };
        match methods.get(method) {
            Some(value) => Lookup::Found(RouteMatch::new(value, params)),
            None => Lookup::MethodNotAllowed(methods.allow_header()),
        }
    }

    /// Returns the number of (method, path) routes installed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.route_count
    }

    /// Returns true if no routes are installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.route_count == 0
    }
}
