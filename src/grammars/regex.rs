use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use onig::Regex;

use crate::grammars::RuleId;
use crate::grammars::anchors::{AnchorActive, has_anchor};

/// `$1` or `${1:/downcase}` in a scope name or end pattern
static CAPTURING_REGEX_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(\d+)|\$\{(\d+):/(downcase|upcase)\}").expect("Invalid capture regex")
});

/// `\1` in an end/while pattern, referring to a group of the begin match
static BACK_REFERENCING_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(\d+)").expect("Invalid backreference regex"));

/// Captures as returned by the scanner: absolute byte ranges, `None` for groups
/// that didn't participate in the match
pub type CaptureIndices = [Option<(usize, usize)>];

/// Whether a scope name needs `replace_captures` at runtime
pub fn has_captures(source: Option<&str>) -> bool {
    source.is_some_and(|s| CAPTURING_REGEX_SOURCE.find(s).is_some())
}

/// Substitutes `$N` and `${N:/downcase|upcase}` with the text of capture group N.
///
/// Leading dots of the captured text are dropped so the result stays a valid scope segment.
/// A group that exists but didn't participate is replaced by an empty string, a group
/// number out of range leaves the token as written.
pub fn replace_captures(source: &str, capture_source: &str, captures: &CaptureIndices) -> String {
    let mut out = String::with_capacity(source.len());
    let mut last_end = 0;

    for caps in CAPTURING_REGEX_SOURCE.captures_iter(source) {
        let Some((start, end)) = caps.pos(0) else {
            continue;
        };
        out.push_str(&source[last_end..start]);
        last_end = end;

        let index = caps
            .at(1)
            .or_else(|| caps.at(2))
            .and_then(|n| n.parse::<usize>().ok());
        let Some(&capture) = index.and_then(|i| captures.get(i)) else {
            out.push_str(&source[start..end]);
            continue;
        };

        let text = capture
            .and_then(|(s, e)| capture_source.get(s..e))
            .unwrap_or_default()
            .trim_start_matches('.');
        match caps.at(3) {
            Some("downcase") => out.push_str(&text.to_lowercase()),
            Some("upcase") => out.push_str(&text.to_uppercase()),
            _ => out.push_str(text),
        }
    }

    out.push_str(&source[last_end..]);
    out
}

/// Escapes everything that would have a meaning in a regex
pub fn escape_regexp_characters(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(
            c,
            '-' | '\\'
                | '{'
                | '}'
                | '*'
                | '+'
                | '?'
                | '|'
                | '^'
                | '$'
                | '.'
                | ','
                | '['
                | ']'
                | '('
                | ')'
                | '#'
        ) || c.is_whitespace()
        {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Replaces `\N` backreferences in `source` with the escaped text captured by the begin match
pub fn resolve_back_references(source: &str, line: &str, captures: &CaptureIndices) -> String {
    let mut out = String::with_capacity(source.len());
    let mut last_end = 0;

    for caps in BACK_REFERENCING_END.captures_iter(source) {
        let Some((start, end)) = caps.pos(0) else {
            continue;
        };
        out.push_str(&source[last_end..start]);
        last_end = end;

        let captured = caps
            .at(1)
            .and_then(|n| n.parse::<usize>().ok())
            .and_then(|i| captures.get(i).copied().flatten())
            .and_then(|(s, e)| line.get(s..e))
            .unwrap_or_default();
        out.push_str(&escape_regexp_characters(captured));
    }

    out.push_str(&source[last_end..]);
    out
}

/// The 4 versions of a pattern depending on which anchors are allowed
#[derive(Clone)]
struct AnchorCache([String; 4]);

/// A pattern of a rule as it will be given to the regex engine.
///
/// `\z` is rewritten to something Oniguruma understands the way TextMate means it and
/// patterns using `\A`/`\G` get their anchor variants computed upfront.
#[derive(Clone)]
pub struct RegExpSource {
    source: String,
    pub rule_id: RuleId,
    pub has_anchor: bool,
    pub has_back_references: bool,
    anchor_cache: Option<Box<AnchorCache>>,
}

impl RegExpSource {
    pub fn new(pattern: &str, rule_id: RuleId) -> Self {
        let source = rewrite_end_of_string(pattern);
        let has_anchor = has_anchor(&source);
        let has_back_references = BACK_REFERENCING_END.find(&source).is_some();
        let anchor_cache = if has_anchor {
            Some(Box::new(build_anchor_cache(&source)))
        } else {
            None
        };

        Self {
            source: source.into_owned(),
            rule_id,
            has_anchor,
            has_back_references,
            anchor_cache,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The pattern with the anchors that are not allowed replaced
    pub fn resolve_anchors(&self, anchors: AnchorActive) -> &str {
        match &self.anchor_cache {
            Some(cache) => &cache.0[anchors.index()],
            None => &self.source,
        }
    }

    /// Same as `resolve_back_references` with this source
    pub fn resolve_back_references(&self, line: &str, captures: &CaptureIndices) -> String {
        resolve_back_references(&self.source, line, captures)
    }
}

fn build_anchor_cache(source: &str) -> AnchorCache {
    let variants = [
        AnchorActive::None,
        AnchorActive::G,
        AnchorActive::A,
        AnchorActive::AG,
    ];
    AnchorCache(variants.map(|a| a.replace_anchors(source).into_owned()))
}

/// `\z` becomes `$(?!\n)(?<!\n)`
fn rewrite_end_of_string(pattern: &str) -> Cow<'_, str> {
    if !pattern.contains("\\z") {
        return Cow::Borrowed(pattern);
    }

    let mut out = String::with_capacity(pattern.len() + 16);
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('z') => out.push_str("$(?!\\n)(?<!\\n)"),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    Cow::Owned(out)
}

impl fmt::Debug for RegExpSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule_id.0, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_replace_captures() {
        let captures = [Some((0, 7)), Some((4, 7))];
        assert_eq!(replace_captures("$1", "abc.def", &captures), "def");
        assert_eq!(replace_captures("${1:/upcase}", "abc.def", &captures), "DEF");
        assert_eq!(
            replace_captures("meta.${0:/downcase}.end", "ABC", &[Some((0, 3))]),
            "meta.abc.end"
        );
    }

    #[test]
    fn replace_captures_edge_cases() {
        // leading dots are removed
        assert_eq!(replace_captures("x.$1", "..ab", &[Some((0, 4)), Some((0, 4))]), "x.ab");
        // out of range group is kept literally
        assert_eq!(replace_captures("x.$3", "ab", &[Some((0, 2))]), "x.$3");
        // group that didn't participate is empty
        assert_eq!(replace_captures("x.$1", "ab", &[Some((0, 2)), None]), "x.");
        assert!(has_captures(Some("entity.$1")));
        assert!(!has_captures(Some("entity.name")));
        assert!(!has_captures(None));
    }

    #[test]
    fn can_resolve_back_references() {
        let line = "<<EOT.x";
        let captures = [Some((0, 7)), Some((2, 5)), Some((5, 7))];
        assert_eq!(resolve_back_references(r"^\1$", line, &captures), "^EOT$");
        assert_eq!(resolve_back_references(r"\2", line, &captures), r"\.x");
        assert_eq!(resolve_back_references(r"a\9", line, &captures), "a");
    }

    #[test]
    fn escapes_regex_characters() {
        assert_eq!(escape_regexp_characters("a.b*(c) d"), r"a\.b\*\(c\)\ d");
    }

    #[test]
    fn rewrites_source() {
        let src = RegExpSource::new(r"foo\z", RuleId(1));
        assert_eq!(src.source(), "foo$(?!\\n)(?<!\\n)");
        assert!(!src.has_anchor);

        let src = RegExpSource::new(r"\G(\w+)\1", RuleId(2));
        assert!(src.has_anchor);
        assert!(src.has_back_references);
        assert_eq!(src.resolve_anchors(AnchorActive::AG), r"\G(\w+)\1");
        assert_eq!(src.resolve_anchors(AnchorActive::A), "\u{FFFF}(\\w+)\\1");
    }
}
