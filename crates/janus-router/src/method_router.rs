//! Per-path method table.

use http::Method;
use smallvec::SmallVec;

/// Maps HTTP methods to values for a single path pattern.
///
/// Any method is accepted, including extension methods.
///
/// ```rust
/// use janus_router::MethodRouter;
/// use http::Method;
///
/// let mut methods = MethodRouter::new();
/// assert!(methods.insert(Method::GET, "getWidget").is_none());
/// assert_eq!(methods.get(&Method::GET), Some(&"getWidget"));
/// assert_eq!(methods.get(&Method::DELETE), None);
/// ```
#[derive(Debug, Clone)]
pub struct MethodRouter<T> {
    entries: SmallVec<[(Method, T); 2]>,
}

impl<T> Default for MethodRouter<T> {
    fn default() -> Self {
        Self {
            entries: SmallVec::new(),
        }
    }
}

impl<T> MethodRouter<T> {
    /// Creates a new empty method router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `value` for `method`, returning the previous value if any.
    pub fn insert(&mut self, method: Method, value: T) -> Option<T> {
        if let Some(slot) = self.entries.iter_mut().find(|(m, _)| *m == method) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.entries.push((method, value));
        None
    }

    /// Returns the value installed for `method`.
    ///
    /// A `HEAD` request falls back to the `GET` value when no explicit
    /// `HEAD` value exists.
    #[must_use]
    pub fn get(&self, method: &Method) -> Option<&T> {
        let direct = self.entries.iter().find(|(m, _)| m == method);
        match direct {
            Some((_, v)) => Some(v),
            None if *method == Method::HEAD => self.get(&Method::GET),
            None => None,
        }
    }

    /// Returns true if `method` has an explicit entry.
    #[must_use]
    pub fn contains(&self, method: &Method) -> bool {
        self.entries.iter().any(|(m, _)| m == method)
    }

    /// Returns true if any methods are registered.
    #[must_use]
    pub fn has_any_method(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Returns the methods registered for this path, in insertion order.
    #[must_use]
    pub fn allowed_methods(&self) -> Vec<Method> {
        self.entries.iter().map(|(m, _)| m.clone()).collect()
    }

    /// Formats the allowed methods for an `Allow` header.
    #[must_use]
    pub fn allow_header(&self) -> String {
        self.entries
            .iter()
            .map(|(m, _)| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
