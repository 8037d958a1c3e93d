//! Radix tree router for Janus.
//!
//! Routes map an HTTP method and a path pattern to an arbitrary value `T`.
//! The server stores fully supervised handlers here; tests usually store
//! plain strings.
//!
//! # Features
//!
//! - **Radix Tree Matching**: lookup cost grows with path depth, not route count
//! - **Path Parameters**: `/widgets/{id}`
//! - **Wildcards**: `/files/*path` (last segment only)
//! - **Conflict Detection**: installing the same method twice on one path is an error
//!
//! # Example
//!
//! ```rust
//! use janus_router::{Lookup, Router};
//! use http::Method;
//!
//! let mut router = Router::new();
//! router.handle(Method::GET, "/widgets", "listWidgets").unwrap();
//! router.handle(Method::GET, "/widgets/{id}", "getWidget").unwrap();
//!
//! match router.lookup(&Method::GET, "/widgets/42") {
//!     Lookup::Found(m) => {
//!         assert_eq!(*m.value, "getWidget");
//!         assert_eq!(m.params.get("id"), Some("42"));
//!     }
//!     _ => unreachable!(),
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//!                    (root)
//!                      │
//!              ┌───────┴───────┐
//!              │               │
//!           "widgets"        "files"
//!              │               │
//!        ┌─────┴─────┐       "*path"
//!        │           │
//!      (leaf)      "{id}"
//!      [GET]         │
//!                  (leaf)
//!               [GET,DELETE]
//! ```

mod error;
mod method_router;
mod node;
mod params;
mod router;

pub use error::RouteError;
pub use method_router::MethodRouter;
pub use node::Node;
pub use params::Params;
pub use router::{Lookup, Router};

/// A matched route: the stored value and the captured path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a, T> {
    /// The value installed for the route
    pub value: &'a T,
    /// Extracted path parameters
    pub params: Params,
}

impl<'a, T> RouteMatch<'a, T> {
    /// Creates a new route match.
    #[must_use]
    pub fn new(value: &'a T, params: Params) -> Self {
        Self { value, params }
    }
}
