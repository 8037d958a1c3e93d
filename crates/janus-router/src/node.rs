//! Radix tree node implementation.

use http::Method;

use crate::error::RouteError;
use crate::method_router::MethodRouter;
use crate::params::Params;

/// Type of path segment in the radix tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    /// Static path segment (e.g., "widgets", "v1")
    Static,
    /// Named parameter (e.g., "{id}")
    Param(String),
    /// Catch-all wildcard (e.g., "*path")
    Wildcard(String),
}

/// A node in the radix tree.
///
/// Each node represents one path segment. Nodes at a route boundary hold a
/// [`MethodRouter`] with the values installed for that pattern.
#[derive(Debug, Clone)]
pub struct Node<T> {
    /// The path segment this node represents
    pub segment: String,

    /// The kind of segment (static, param, or wildcard)
    pub kind: SegmentKind,

    /// Method table for this node, if a route ends here
    pub methods: Option<MethodRouter<T>>,

    /// Static children, sorted by segment for binary search
    pub static_children: Vec<Node<T>>,

    /// Parameter child (at most one per node)
    pub param_child: Option<Box<Node<T>>>,

    /// Wildcard child (at most one per node, always a leaf)
    pub wildcard_child: Option<Box<Node<T>>>,
}

impl<T> Node<T> {
    fn with_kind(segment: String, kind: SegmentKind) -> Self {
        Self {
            segment,
            kind,
            methods: None,
            static_children: Vec::new(),
            param_child: None,
            wildcard_child: None,
        }
    }

    /// Creates a root node for the tree.
    #[must_use]
    pub fn root() -> Self {
        Self::with_kind(String::new(), SegmentKind::Static)
    }

    /// Installs `value` for `method` at `path`.
    ///
    /// Fails on a malformed pattern, or when `method` is already installed
    /// for an equivalent pattern.
    pub fn insert(&mut self, path: &str, method: Method, value: T) -> Result<(), RouteError> {
        let segments = parse_path(path)?;
        let target = self.descend_or_create(path, &segments)?;
        let methods = target.methods.get_or_insert_with(MethodRouter::new);
        if methods.contains(&method) {
            return Err(RouteError::Conflict {
                method,
                path: path.to_string(),
            });
        }
        methods.insert(method, value);
        Ok(())
    }

    fn descend_or_create(
        &mut self,
        path: &str,
        segments: &[(String, SegmentKind)],
    ) -> Result<&mut Self, RouteError> {
        let Some(((segment, kind), remaining)) = segments.split_first() else {
            return Ok(self);
        };

        let child = match kind {
            SegmentKind::Static => {
                let idx = match self
                    .static_children
                    .binary_search_by(|c| c.segment.as_str().cmp(segment))
                {
                    Ok(idx) => idx,
                    Err(idx) => {
                        self.static_children
                            .insert(idx, Self::with_kind(segment.clone(), SegmentKind::Static));
                        idx
                    }
                };
                &mut self.static_children[idx]
            }
            SegmentKind::Param(_) | SegmentKind::Wildcard(_) => {
                let slot = if matches!(kind, SegmentKind::Param(_)) {
                    &mut self.param_child
                } else {
                    &mut self.wildcard_child
                };
                let child =
                    slot.get_or_insert_with(|| Box::new(Self::with_kind(segment.clone(), kind.clone())));
                if child.kind != *kind {
                    return Err(RouteError::InvalidPath {
                        path: path.to_string(),
                        reason: "parameter name differs from an existing route at the same position",
                    });
                }
                child.as_mut()
            }
        };
        child.descend_or_create(path, remaining)
    }

    /// Matches a concrete request path against the tree.
    ///
    /// Returns the method table of the matching node and the captured
    /// parameters.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<(&MethodRouter<T>, Params)> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = Params::new();
        let methods = self.match_segments(&segments, &mut params)?;
        Some((methods, params))
    }

    fn match_segments<'a>(
        &'a self,
        segments: &[&str],
        params: &mut Params,
    ) -> Option<&'a MethodRouter<T>> {
        let Some((segment, remaining)) = segments.split_first() else {
            return self.methods.as_ref().filter(|m| m.has_any_method());
        };

        if let Some(child) = self.find_static_child(segment) {
            if let Some(found) = child.match_segments(remaining, params) {
                return Some(found);
            }
        }

        if let Some(child) = &self.param_child {
            if let SegmentKind::Param(name) = &child.kind {
                let mark = params.len();
                params.push(name.clone(), *segment);
                if let Some(found) = child.match_segments(remaining, params) {
                    return Some(found);
                }
                params.truncate(mark);
            }
        }

        if let Some(child) = &self.wildcard_child {
            if let SegmentKind::Wildcard(name) = &child.kind {
                params.push(name.clone(), segments.join("/"));
                return child.methods.as_ref();
            }
        }

        None
    }

    fn find_static_child(&self, segment: &str) -> Option<&Self> {
        self.static_children
            .binary_search_by(|c| c.segment.as_str().cmp(segment))
            .ok()
            .map(|i| &self.static_children[i])
    }
}

/// Splits a route pattern into typed segments, validating its shape.
fn parse_path(path: &str) -> Result<Vec<(String, SegmentKind)>, RouteError> {
    let invalid = |reason| RouteError::InvalidPath {
        path: path.to_string(),
        reason,
    };
    if !path.starts_with('/') {
        return Err(invalid("path must start with '/'"));
    }

    let raw: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut segments = Vec::with_capacity(raw.len());
    for (i, s) in raw.iter().enumerate() {
        let kind = if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            if name.is_empty() {
                return Err(invalid("empty parameter name"));
            }
            SegmentKind::Param(name.to_string())
        } else if let Some(name) = s.strip_prefix('*') {
            if i + 1 != raw.len() {
                return Err(invalid("wildcard must be the last segment"));
            }
            SegmentKind::Wildcard(name.to_string())
        } else {
            SegmentKind::Static
        };
        segments.push(((*s).to_string(), kind));
    }
    Ok(segments)
}
