//! Persistent scope lists
//!
//! A scope list is the path of scope names active at some point of a line, eg
//! `source.js meta.function string.quoted.double`. Lists are immutable and share their
//! parents: pushing a scope allocates a single node pointing at the list it extends so
//! every list handed out by the tokenizer stays valid forever.

use std::fmt;
use std::sync::Arc;

struct ScopeNode {
    scope_name: String,
    parent: ScopeList,
    /// Number of nodes including this one
    depth: usize,
}

// Iterative so dropping a very long list doesn't recurse once per node
impl Drop for ScopeNode {
    fn drop(&mut self) {
        let mut parent = self.parent.0.take();
        while let Some(node) = parent {
            match Arc::try_unwrap(node) {
                Ok(mut node) => parent = node.parent.0.take(),
                Err(_) => break,
            }
        }
    }
}

/// An immutable, structurally shared list of scope names, enumerated root-first.
#[derive(Clone, Default)]
pub struct ScopeList(Option<Arc<ScopeNode>>);

impl ScopeList {
    /// The empty list
    pub fn new() -> Self {
        Self(None)
    }

    /// Builds a list by pushing every name in order, the first one being the outermost.
    pub fn from_scopes<S: AsRef<str>>(scopes: &[S]) -> Self {
        scopes
            .iter()
            .fold(Self::new(), |list, scope| list.push_scope(scope.as_ref()))
    }

    /// Pushes a single scope name as is.
    fn push_scope(&self, scope_name: &str) -> Self {
        Self(Some(Arc::new(ScopeNode {
            scope_name: scope_name.to_owned(),
            parent: self.clone(),
            depth: self.len() + 1,
        })))
    }

    /// Pushes a scope path onto the list.
    ///
    /// A name may hold several space separated scopes (`"meta.tag string.quoted"`),
    /// each one becomes its own node. `None` and empty names return the same list.
    pub fn push(&self, scope_path: Option<&str>) -> Self {
        let Some(scope_path) = scope_path else {
            return self.clone();
        };

        let mut out = self.clone();
        for segment in scope_path.split(' ').filter(|s| !s.is_empty()) {
            out = out.push_scope(segment);
        }
        out
    }

    /// The list without its innermost scope. The empty list is its own parent.
    pub fn parent(&self) -> ScopeList {
        match &self.0 {
            Some(node) => node.parent.clone(),
            None => ScopeList::new(),
        }
    }

    /// The innermost scope name
    pub fn scope_name(&self) -> Option<&str> {
        self.0.as_ref().map(|node| node.scope_name.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, |node| node.depth)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// All the scope names, outermost first.
    pub fn scope_names(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(self.len());
        let mut current = self;
        while let Some(node) = &current.0 {
            out.push(node.scope_name.as_str());
            current = &node.parent;
        }
        out.reverse();
        out
    }

    /// Same as `scope_names` but owned
    pub fn to_vec(&self) -> Vec<String> {
        self.scope_names().into_iter().map(str::to_owned).collect()
    }
}

impl PartialEq for ScopeList {
    fn eq(&self, other: &Self) -> bool {
        let mut a = self;
        let mut b = other;
        loop {
            match (&a.0, &b.0) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if Arc::ptr_eq(x, y) {
                        return true;
                    }
                    if x.depth != y.depth || x.scope_name != y.scope_name {
                        return false;
                    }
                    a = &x.parent;
                    b = &y.parent;
                }
                _ => return false,
            }
        }
    }
}

impl Eq for ScopeList {}

impl fmt::Display for ScopeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scope_names().join(" "))
    }
}

impl fmt::Debug for ScopeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.scope_names()).finish()
    }
}

/// TextMate scope matching: `selector` matches `scope` if they are equal or if `selector` is
/// a prefix of `scope` ending on a dot boundary (`string` matches `string.quoted`).
#[inline]
pub(crate) fn scope_matches(selector: &str, scope: &str) -> bool {
    scope == selector
        || (scope.len() > selector.len()
            && scope.starts_with(selector)
            && scope.as_bytes()[selector.len()] == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_push_and_enumerate_root_first() {
        let list = ScopeList::new()
            .push(Some("source.js"))
            .push(Some("meta.function"))
            .push(Some("string.quoted"));
        assert_eq!(list.len(), 3);
        assert_eq!(
            list.scope_names(),
            vec!["source.js", "meta.function", "string.quoted"]
        );
        assert_eq!(list.scope_name(), Some("string.quoted"));
        assert_eq!(list.to_string(), "source.js meta.function string.quoted");
    }

    #[test]
    fn splits_space_separated_names() {
        let list = ScopeList::new().push(Some("meta.tag  string.quoted"));
        assert_eq!(list.scope_names(), vec!["meta.tag", "string.quoted"]);
    }

    #[test]
    fn empty_names_are_noops() {
        let list = ScopeList::from_scopes(&["source.js"]);
        assert_eq!(list.push(None), list);
        assert_eq!(list.push(Some("")), list);
    }

    #[test]
    fn older_lists_are_untouched_by_pushes() {
        let base = ScopeList::from_scopes(&["source.js"]);
        let a = base.push(Some("a"));
        let b = base.push(Some("b"));
        assert_eq!(base.scope_names(), vec!["source.js"]);
        assert_eq!(a.parent(), base);
        assert_eq!(b.parent(), base);
        assert_ne!(a, b);
    }

    #[test]
    fn long_lists_can_be_dropped() {
        let base = ScopeList::from_scopes(&["source.x"]);
        let mut list = base.clone();
        for _ in 0..200_000 {
            list = list.push(Some("meta.nested"));
        }
        assert_eq!(list.len(), 200_001);
        drop(list);
        assert_eq!(base.scope_names(), vec!["source.x"]);
    }

    #[test]
    fn equality_is_by_value() {
        let a = ScopeList::from_scopes(&["source.js", "string"]);
        let b = ScopeList::from_scopes(&["source.js", "string"]);
        assert_eq!(a, b);
        assert_ne!(a, ScopeList::from_scopes(&["source.js"]));
        assert_eq!(ScopeList::new().parent(), ScopeList::new());
    }

    #[test]
    fn matches_on_dot_boundaries() {
        assert!(scope_matches("string", "string"));
        assert!(scope_matches("string", "string.quoted"));
        assert!(!scope_matches("string", "strings"));
        assert!(!scope_matches("string.quoted", "string"));
    }
}
