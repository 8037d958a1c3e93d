//! Path parameter extraction and storage.
//!
//! Parameters are kept in a small vector so the common case of one to four
//! captures never touches the heap for the container itself.

use smallvec::SmallVec;

/// Maximum number of parameters stored inline (stack allocated).
const INLINE_PARAMS: usize = 4;

/// Extracted path parameters from a route match, as (name, value) pairs.
///
/// # Example
///
/// ```rust
/// use janus_router::Params;
///
/// let mut params = Params::new();
/// params.push("widgetId", "42");
///
/// assert_eq!(params.get("widgetId"), Some("42"));
/// assert_eq!(params.get("unknown"), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Params {
    inner: SmallVec<[(String, String); INLINE_PARAMS]>,
}

impl Params {
    /// Creates a new empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter to the set.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Returns the value for a parameter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns an iterator over the parameters.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Drops captures past `len`, used when a match attempt backtracks.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.inner.truncate(len);
    }
}

impl FromIterator<(String, String)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_push_and_get() {
        let mut params = Params::new();
        params.push("id", "123");
        params.push("name", "alice");

        assert_eq!(params.len(), 2);
        assert_eq!(params.get("id"), Some("123"));
        assert_eq!(params.get("name"), Some("alice"));
        assert_eq!(params.get("unknown"), None);
    }

    #[test]
    fn test_params_truncate() {
        let mut params = Params::new();
        params.push("a", "1");
        params.push("b", "2");

        params.truncate(1);
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("b"), None);
    }

    #[test]
    fn test_params_spill_past_inline_capacity() {
        let mut params = Params::new();
        for i in 0..10 {
            params.push(format!("key{i}"), format!("value{i}"));
        }

        assert_eq!(params.len(), 10);
        assert_eq!(params.get("key5"), Some("value5"));
        let pairs: Vec<_> = params.iter().take(2).collect();
        assert_eq!(pairs, vec![("key0", "value0"), ("key1", "value1")]);
    }
}
