use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::scope::scope_matches;

/// Represents a parent scope requirement in a theme selector.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Parent {
    /// Parent scope that can appear anywhere up the scope stack
    /// `Anywhere(source.js)` from "source.js meta.function" - can have scopes between
    Anywhere(String),
    /// Parent scope that must be the immediate parent (child combinator `>`)
    /// `Direct(meta.function)` from "meta.function > string" - must be immediate parent
    Direct(String),
}

impl Parent {
    pub fn scope(&self) -> &str {
        match self {
            Parent::Anywhere(s) | Parent::Direct(s) => s,
        }
    }
}

impl fmt::Display for Parent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parent::Anywhere(s) => write!(f, "{s}"),
            Parent::Direct(s) => write!(f, "> {s}"),
        }
    }
}

/// A parsed theme selector that is used to match against scope stacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeSelector {
    /// The target scope to match (rightmost in the selector string)
    pub target_scope: String,
    /// Required parent scopes from right to left of the selector
    pub parent_scopes: Vec<Parent>,
}

impl ThemeSelector {
    /// Checks if this selector matches the given scope stack, outermost scope first.
    pub fn matches<S: AsRef<str>>(&self, scope_stack: &[S]) -> bool {
        let Some((last, rest)) = scope_stack.split_last() else {
            return false;
        };
        scope_matches(&self.target_scope, last.as_ref()) && parents_match(&self.parent_scopes, rest)
    }
}

/// Whether the ancestors (outermost first, target excluded) satisfy the parent
/// requirements (innermost first).
///
/// `Parent::Anywhere` can skip intermediate scopes, `Parent::Direct` has to be the
/// scope right above the previous requirement.
pub(crate) fn parents_match<S: AsRef<str>>(parent_scopes: &[Parent], ancestors: &[S]) -> bool {
    let mut rest = ancestors;

    for required_parent in parent_scopes {
        match required_parent {
            Parent::Direct(parent_scope) => match rest.split_last() {
                Some((last, r)) if scope_matches(parent_scope, last.as_ref()) => {
                    rest = r;
                }
                _ => return false,
            },
            Parent::Anywhere(parent_scope) => {
                match rest
                    .iter()
                    .rposition(|scope| scope_matches(parent_scope, scope.as_ref()))
                {
                    // Consume all parents up to and including this match
                    Some(pos) => rest = &rest[..pos],
                    None => return false,
                }
            }
        }
    }

    true
}

/// Orders parent requirement lists the most specific first: longer scopes at the
/// same position first, then more requirements first.
pub(crate) fn cmp_parent_specificity(a: &[Parent], b: &[Parent]) -> Ordering {
    for (pa, pb) in a.iter().zip(b) {
        let by_len = pb.scope().len().cmp(&pa.scope().len());
        if by_len != Ordering::Equal {
            return by_len;
        }
    }
    b.len().cmp(&a.len())
}

/// Orders optional parent lists for sorting theme rules: absent first, then shorter
/// lists, then lexicographically.
pub(crate) fn cmp_parent_scopes(a: Option<&[Parent]>, b: Option<&[Parent]>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

/// Parses a theme selector string into a structured ThemeSelector.
///
/// # Selector Format
/// - Scopes are separated by whitespace: `"source.js meta.function string"`
/// - Child combinator `>` creates direct parent requirement: `"parent > child"`
/// - Target scope is always the rightmost non-`>` token
///
/// Returns `None` if the selector string is empty or ends with `>`
pub fn parse_selector(input: &str) -> Option<ThemeSelector> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let (last, rest) = parts.split_last()?;
    if *last == ">" {
        return None;
    }

    let mut parents = Vec::new();
    let mut is_direct = false;
    for part in rest.iter().rev() {
        if *part == ">" {
            is_direct = true;
            continue;
        }
        let parent_scope = (*part).to_owned();
        parents.push(if is_direct {
            Parent::Direct(parent_scope)
        } else {
            Parent::Anywhere(parent_scope)
        });
        is_direct = false;
    }

    Some(ThemeSelector {
        target_scope: (*last).to_owned(),
        parent_scopes: parents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anywhere(s: &str) -> Parent {
        Parent::Anywhere(s.to_owned())
    }

    fn direct(s: &str) -> Parent {
        Parent::Direct(s.to_owned())
    }

    #[test]
    fn test_parse_selector() {
        let test_cases = vec![
            ("comment", "comment", vec![]),
            (
                "source.js meta.function string",
                "string",
                vec![anywhere("meta.function"), anywhere("source.js")],
            ),
            ("meta.function > string", "string", vec![direct("meta.function")]),
            (
                "source > meta > string",
                "string",
                vec![direct("meta"), direct("source")],
            ),
            (
                "  source.js   meta.function  >   string  ",
                "string",
                vec![direct("meta.function"), anywhere("source.js")],
            ),
        ];

        for (input, target, parents) in test_cases {
            let result = parse_selector(input).unwrap();
            assert_eq!(result.target_scope, target, "input: '{input}'");
            assert_eq!(result.parent_scopes, parents, "input: '{input}'");
        }
        assert_eq!(parse_selector("  "), None);
        assert_eq!(parse_selector("a >"), None);
    }

    #[test]
    fn test_selector_matches() {
        let test_cases = vec![
            // Simple selector tests
            ("comment", vec!["source.js", "comment.line"], true),
            ("comment", vec!["source.js", "string.quoted"], false),
            ("comment.line", vec!["source.js", "comment.line.double-slash"], true),
            ("comment.line", vec!["comment.linear"], false),
            // Parent selector tests (Anywhere)
            ("source.js string", vec!["source.js", "meta.function", "string.quoted"], true),
            ("source.js string", vec!["source.py", "string.quoted"], false),
            ("meta.function string", vec!["source.js", "meta.function.arrow", "string.quoted"], true),
            // Child combinator tests (Direct)
            ("meta.function > string", vec!["source.js", "meta.function", "string.quoted"], true),
            (
                "meta.function > string",
                vec!["source.js", "meta.function", "punctuation", "string.quoted"],
                false,
            ),
            ("source > meta > string", vec!["source.js", "meta.function", "string.quoted"], true),
            (
                "source > meta > string",
                vec!["source.js", "punctuation", "meta.function", "string.quoted"],
                false,
            ),
            // Edge cases
            ("comment", vec![], false),
            ("source.js comment", vec!["source.js"], false),
            (
                "source.js meta.function string",
                vec!["source.js", "meta.class", "meta.function", "string.quoted"],
                true,
            ),
        ];

        for (selector_str, scope_names, expected) in test_cases {
            let selector = parse_selector(selector_str).unwrap();
            assert_eq!(
                selector.matches(&scope_names),
                expected,
                "Selector '{selector_str}' matching scope stack {scope_names:?}"
            );
        }
    }

    #[test]
    fn orders_parent_lists() {
        let list = |items: &[&str]| items.iter().map(|s| anywhere(s)).collect::<Vec<_>>();
        let cases = vec![
            (None, None, Ordering::Equal),
            (None, Some(list(&[])), Ordering::Less),
            (None, Some(list(&["a"])), Ordering::Less),
            (Some(list(&[])), None, Ordering::Greater),
            (Some(list(&["a"])), None, Ordering::Greater),
            (Some(list(&[])), Some(list(&[])), Ordering::Equal),
            (Some(list(&[])), Some(list(&["a"])), Ordering::Less),
            (Some(list(&["a"])), Some(list(&[])), Ordering::Greater),
            (Some(list(&["a"])), Some(list(&["a"])), Ordering::Equal),
            (Some(list(&["a", "b"])), Some(list(&["a"])), Ordering::Greater),
            (Some(list(&["a"])), Some(list(&["a", "b"])), Ordering::Less),
            (Some(list(&["a", "b"])), Some(list(&["a", "b"])), Ordering::Equal),
            (Some(list(&["a", "b"])), Some(list(&["a", "c"])), Ordering::Less),
            (Some(list(&["a", "c"])), Some(list(&["a", "b"])), Ordering::Greater),
        ];
        for (a, b, expected) in cases {
            assert_eq!(
                cmp_parent_scopes(a.as_deref(), b.as_deref()),
                expected,
                "{a:?} vs {b:?}"
            );
        }
    }

    #[test]
    fn longer_parents_are_more_specific() {
        let a = vec![anywhere("meta.structure.dictionary.value.json")];
        let b = vec![anywhere("meta.structure.dictionary.json")];
        assert_eq!(cmp_parent_specificity(&a, &b), Ordering::Less);
        assert_eq!(cmp_parent_specificity(&b, &a), Ordering::Greater);
        assert_eq!(cmp_parent_specificity(&[], &b), Ordering::Greater);
        assert_eq!(cmp_parent_specificity(&a, &a), Ordering::Equal);
    }
}
