use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use indexmap::IndexMap;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::VerniceResult;

/// Named rules that can be referenced with `#name` includes
pub type RawRepository = HashMap<String, RawRule>;

/// Capture group number -> rule assigning a scope to that group.
///
/// Grammars write them either as an object keyed by the group number or,
/// more rarely, as an array indexed by group.
///
/// # Examples
/// ```json
/// {
///   "1": { "name": "entity.name.function.js" },
///   "2": { "name": "punctuation.definition.parameters.begin.js" }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCaptures(pub BTreeMap<usize, RawRule>);

impl RawCaptures {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The highest group number referenced
    pub fn max_index(&self) -> Option<usize> {
        self.0.keys().next_back().copied()
    }
}

impl<'de> Deserialize<'de> for RawCaptures {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CapturesVisitor;

        impl<'de> Visitor<'de> for CapturesVisitor {
            type Value = RawCaptures;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map or an array of captures")
            }

            fn visit_map<V>(self, mut map: V) -> Result<RawCaptures, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut out = BTreeMap::new();
                while let Some(key) = map.next_key::<String>()? {
                    match key.trim().parse::<usize>() {
                        Ok(idx) => {
                            out.insert(idx, map.next_value()?);
                        }
                        // Not a group number, vscode ignores those as well
                        Err(_) => {
                            let _: de::IgnoredAny = map.next_value()?;
                        }
                    }
                }
                Ok(RawCaptures(out))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<RawCaptures, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut out = BTreeMap::new();
                let mut idx = 0;
                while let Some(rule) = seq.next_element::<RawRule>()? {
                    out.insert(idx, rule);
                    idx += 1;
                }
                Ok(RawCaptures(out))
            }
        }

        deserializer.deserialize_any(CapturesVisitor)
    }
}

/// `applyEndPatternLast` is either a boolean or 0/1 depending on the grammar
fn deserialize_bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlagVisitor;

    impl<'de> Visitor<'de> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a boolean or an integer")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
            Ok(v == 1)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
            Ok(v == 1)
        }

        fn visit_unit<E: de::Error>(self) -> Result<bool, E> {
            Ok(false)
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}

/// A repository entry can be a rule or directly an array of rules (racket.json does that)
fn deserialize_repository<'de, D>(deserializer: D) -> Result<Option<RawRepository>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RepositoryEntry {
        DirectArray(Vec<RawRule>),
        Rule(Box<RawRule>),
    }

    let entries: Option<HashMap<String, RepositoryEntry>> = Option::deserialize(deserializer)?;
    Ok(entries.map(|entries| {
        entries
            .into_iter()
            .map(|(name, entry)| {
                let rule = match entry {
                    RepositoryEntry::DirectArray(patterns) => RawRule {
                        patterns: Some(patterns),
                        ..Default::default()
                    },
                    RepositoryEntry::Rule(rule) => *rule,
                };
                (name, rule)
            })
            .collect()
    }))
}

/// Any TextMate rule as written in a grammar file.
///
/// Which kind of rule it is depends on which fields are present:
/// - `match` → a single regex rule
/// - `begin` + `end` → a region that spans lines until `end` matches
/// - `begin` + `while` → a region that continues as long as `while` matches at the start
///   of each line
/// - otherwise a container of `patterns` or an `include`
///
/// # Examples
/// ```json
/// {
///   "name": "string.quoted.double.js",
///   "begin": "\"",
///   "end": "\"",
///   "beginCaptures": {
///     "0": { "name": "punctuation.definition.string.begin.js" }
///   },
///   "patterns": [
///     { "match": "\\\\.", "name": "constant.character.escape.js" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"), default)]
pub struct RawRule {
    /// - "#name" - reference to repository entry in same grammar
    /// - "source.lang" - reference to another grammar's root patterns
    /// - "source.lang#name" - reference to repository entry in another grammar
    /// - "$self" - reference to current grammar's root patterns
    /// - "$base" - reference to the grammar being tokenized
    pub include: Option<String>,
    pub name: Option<String>,
    pub content_name: Option<String>,
    #[serde(rename(deserialize = "match"))]
    pub match_: Option<String>,
    pub captures: Option<RawCaptures>,
    pub begin: Option<String>,
    pub begin_captures: Option<RawCaptures>,
    pub end: Option<String>,
    pub end_captures: Option<RawCaptures>,
    #[serde(rename(deserialize = "while"))]
    pub while_: Option<String>,
    pub while_captures: Option<RawCaptures>,
    pub patterns: Option<Vec<RawRule>>,
    #[serde(deserialize_with = "deserialize_repository")]
    pub repository: Option<RawRepository>,
    #[serde(deserialize_with = "deserialize_bool_or_int")]
    pub apply_end_pattern_last: bool,
}

/// Top-level structure representing a complete TextMate grammar
///
/// # Examples
/// ```json
/// {
///   "name": "JavaScript",
///   "scopeName": "source.js",
///   "patterns": [
///     { "include": "#statements" }
///   ],
///   "repository": {
///     "statements": {
///       "patterns": [{ "include": "#keywords" }]
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawGrammar {
    /// Human-readable name of the language
    #[serde(default)]
    pub name: Option<String>,
    /// Unique identifier for this grammar's scope
    /// Example: "source.js", "text.html.markdown", "source.rust"
    pub scope_name: String,
    /// Root patterns that define the top-level structure
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    /// Named rules that can be referenced by includes
    #[serde(default, deserialize_with = "deserialize_repository")]
    pub repository: Option<RawRepository>,
    /// Selector -> rule injected wherever the selector matches, in declaration order
    #[serde(default)]
    pub injections: IndexMap<String, RawRule>,
    /// Selector deciding where this grammar gets injected into the grammars of `inject_to`
    #[serde(default)]
    pub injection_selector: Option<String>,
    /// Scope names of the grammars this one should be injected into
    #[serde(default)]
    pub inject_to: Vec<String>,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub first_line_match: Option<String>,
}

impl RawGrammar {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> VerniceResult<Self> {
        let file = File::open(path)?;
        let raw_grammar = serde_json::from_reader(BufReader::new(file))?;
        Ok(raw_grammar)
    }

    pub fn from_json(json: &str) -> VerniceResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The rule standing for the grammar itself, what `$self` points to.
    pub(crate) fn self_rule(&self) -> RawRule {
        RawRule {
            name: Some(self.scope_name.clone()),
            patterns: Some(self.patterns.clone()),
            ..Default::default()
        }
    }

    /// Every external grammar this grammar includes, eg `source.css` from
    /// `{"include": "source.css#rules"}`
    pub(crate) fn external_references(&self) -> Vec<String> {
        fn visit(rule: &RawRule, out: &mut Vec<String>) {
            if let Some(include) = &rule.include
                && !include.starts_with('#')
                && !include.starts_with('$')
            {
                let scope = include.split_once('#').map_or(include.as_str(), |(s, _)| s);
                if !out.iter().any(|x| x == scope) {
                    out.push(scope.to_owned());
                }
            }
            for p in rule.patterns.iter().flatten() {
                visit(p, out);
            }
            for r in rule.repository.iter().flat_map(|r| r.values()) {
                visit(r, out);
            }
            for captures in [
                &rule.captures,
                &rule.begin_captures,
                &rule.end_captures,
                &rule.while_captures,
            ]
            .into_iter()
            .flatten()
            {
                for c in captures.0.values() {
                    visit(c, out);
                }
            }
        }

        let mut out = Vec::new();
        for p in &self.patterns {
            visit(p, &mut out);
        }
        for r in self.repository.iter().flat_map(|r| r.values()) {
            visit(r, &mut out);
        }
        for r in self.injections.values() {
            visit(r, &mut out);
        }
        out.retain(|s| s != &self.scope_name);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_parse_all_rule_shapes() {
        let raw = RawGrammar::from_json(
            r##"{
            "scopeName": "source.test",
            "patterns": [
                {"include": "#string"},
                {"match": "\\d+", "name": "constant.numeric", "captures": {"0": {"name": "x"}, "foo": {}}},
                {"begin": "^>", "while": "^>", "whileCaptures": [{"name": "a"}, {"name": "b"}]}
            ],
            "repository": {
                "string": {"begin": "\"", "end": "\"", "applyEndPatternLast": 1},
                "list": [{"match": "a"}, {"match": "b"}]
            },
            "injections": {
                "L:source.test string": {"patterns": [{"match": "TODO"}]},
                "R:comment": {"patterns": []}
            }
        }"##,
        )
        .unwrap();

        assert_eq!(raw.patterns.len(), 3);
        assert_eq!(raw.patterns[0].include.as_deref(), Some("#string"));
        let captures = raw.patterns[1].captures.as_ref().unwrap();
        assert_eq!(captures.0.len(), 1);
        assert_eq!(captures.0[&0].name.as_deref(), Some("x"));
        let while_captures = raw.patterns[2].while_captures.as_ref().unwrap();
        assert_eq!(while_captures.max_index(), Some(1));

        let repo = raw.repository.as_ref().unwrap();
        assert!(repo["string"].apply_end_pattern_last);
        assert_eq!(repo["list"].patterns.as_ref().map(|p| p.len()), Some(2));

        let selectors: Vec<_> = raw.injections.keys().map(String::as_str).collect();
        assert_eq!(selectors, vec!["L:source.test string", "R:comment"]);
    }

    #[test]
    fn finds_external_references() {
        let raw = RawGrammar::from_json(
            r##"{
            "scopeName": "text.html",
            "patterns": [
                {"include": "$self"},
                {"include": "#tags"},
                {"begin": "<style>", "end": "</style>", "patterns": [{"include": "source.css"}]}
            ],
            "repository": {
                "tags": {"patterns": [{"include": "source.js#expression"}, {"include": "text.html"}]}
            }
        }"##,
        )
        .unwrap();
        assert_eq!(raw.external_references(), vec!["source.css", "source.js"]);
    }
}
