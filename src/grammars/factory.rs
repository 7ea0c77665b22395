use std::collections::HashMap;
use std::sync::Arc;

use crate::grammars::compiled::{NO_RULE, Rule, RuleId, RuleNames, RuleRegistry};
use crate::grammars::raw::{RawCaptures, RawGrammar, RawRepository, RawRule};

/// The repositories visible from a rule: the ones of its grammar and of every rule
/// enclosing it, innermost last.
#[derive(Debug, Clone)]
pub(crate) struct RepositoryStack<'a> {
    grammar: &'a str,
    repositories: Vec<&'a RawRepository>,
}

impl<'a> RepositoryStack<'a> {
    pub fn for_grammar(raw: &'a RawGrammar) -> Self {
        Self {
            grammar: &raw.scope_name,
            repositories: raw.repository.iter().collect(),
        }
    }

    fn with(&self, repository: &'a RawRepository) -> Self {
        let mut out = self.clone();
        out.repositories.push(repository);
        out
    }

    fn lookup(&self, name: &str) -> Option<&'a RawRule> {
        self.repositories.iter().rev().find_map(|r| r.get(name))
    }
}

/// End pattern of a region declared without one: the character never occurs in text
const NEVER_MATCHES: &str = "\u{FFFF}";

/// What an `include` points to
#[derive(Debug, PartialEq, Eq)]
enum IncludeReference<'i> {
    /// `$base`
    Base,
    /// `$self`
    SelfGrammar,
    /// `#name`
    Relative(&'i str),
    /// `source.js`
    TopLevel(&'i str),
    /// `source.js#name`
    TopLevelRepository(&'i str, &'i str),
}

impl<'i> IncludeReference<'i> {
    fn parse(include: &'i str) -> Self {
        match include {
            "$base" => Self::Base,
            "$self" => Self::SelfGrammar,
            _ => {
                if let Some(name) = include.strip_prefix('#') {
                    Self::Relative(name)
                } else if let Some((scope, name)) = include.split_once('#') {
                    Self::TopLevelRepository(scope, name)
                } else {
                    Self::TopLevel(include)
                }
            }
        }
    }
}

/// Turns raw rules into registered rules.
///
/// Raw rules are compiled once: the id is recorded before the children are compiled
/// so cyclic includes resolve to the rule being built.
pub(crate) struct RuleFactory<'a> {
    /// Every raw grammar reachable from the one being compiled, by scope name
    grammars: &'a HashMap<String, Arc<RawGrammar>>,
    /// `$self` rule of every grammar of `grammars`
    self_rules: &'a HashMap<String, RawRule>,
    /// Scope of the grammar being tokenized, where `$base` points
    base_scope: &'a str,
    /// Raw rule address -> id
    compiled: HashMap<usize, RuleId>,
}

impl<'a> RuleFactory<'a> {
    pub fn new(
        grammars: &'a HashMap<String, Arc<RawGrammar>>,
        self_rules: &'a HashMap<String, RawRule>,
        base_scope: &'a str,
    ) -> Self {
        Self {
            grammars,
            self_rules,
            base_scope,
            compiled: HashMap::new(),
        }
    }

    /// The `$self` rule of a grammar with the repositories it sees
    pub fn grammar_root(&self, scope_name: &str) -> Option<(&'a RawRule, RepositoryStack<'a>)> {
        let raw = self.grammars.get(scope_name)?;
        let rule = self.self_rules.get(scope_name)?;
        Some((rule, RepositoryStack::for_grammar(raw)))
    }

    pub fn compile_rule(
        &mut self,
        registry: &mut RuleRegistry,
        raw: &'a RawRule,
        repositories: &RepositoryStack<'a>,
    ) -> RuleId {
        let key = raw as *const RawRule as usize;
        if let Some(id) = self.compiled.get(&key) {
            return *id;
        }

        registry.register_rule(|registry, id| {
            self.compiled.insert(key, id);

            let repositories = match &raw.repository {
                Some(repository) => repositories.with(repository),
                None => repositories.clone(),
            };

            if let Some(pattern) = &raw.match_ {
                let captures = self.compile_captures(registry, raw.captures.as_ref(), &repositories);
                return Rule::match_rule(id, RuleNames::new(raw.name.clone(), None), pattern, captures);
            }

            let names = RuleNames::new(raw.name.clone(), raw.content_name.clone());
            let Some(begin) = &raw.begin else {
                let patterns = match (&raw.patterns, &raw.include) {
                    (None, Some(include)) => {
                        let mut out = Vec::new();
                        if let Some(rule_id) = self.resolve_include(registry, include, &repositories)
                            && !is_skipped(registry, rule_id)
                        {
                            out.push(rule_id);
                        }
                        let missing = out.is_empty();
                        (out, missing)
                    }
                    (patterns, _) => self.compile_patterns(
                        registry,
                        patterns.as_deref().unwrap_or_default(),
                        &repositories,
                    ),
                };
                return Rule::include_only(id, names, patterns.0, patterns.1);
            };

            let patterns = self.compile_patterns(
                registry,
                raw.patterns.as_deref().unwrap_or_default(),
                &repositories,
            );

            if let Some(while_) = &raw.while_ {
                let begin_captures = self.compile_captures(
                    registry,
                    raw.begin_captures.as_ref().or(raw.captures.as_ref()),
                    &repositories,
                );
                let while_captures = self.compile_captures(
                    registry,
                    raw.while_captures.as_ref().or(raw.captures.as_ref()),
                    &repositories,
                );
                return Rule::begin_while(
                    id,
                    names,
                    begin,
                    begin_captures,
                    while_,
                    while_captures,
                    patterns,
                );
            }

            // Without an end the region stays open until the end of the document
            let end = raw.end.as_deref().unwrap_or(NEVER_MATCHES);

            let begin_captures = self.compile_captures(
                registry,
                raw.begin_captures.as_ref().or(raw.captures.as_ref()),
                &repositories,
            );
            let end_captures = self.compile_captures(
                registry,
                raw.end_captures.as_ref().or(raw.captures.as_ref()),
                &repositories,
            );
            Rule::begin_end(
                id,
                names,
                begin,
                begin_captures,
                end,
                end_captures,
                raw.apply_end_pattern_last,
                patterns,
            )
        })
    }

    fn compile_captures(
        &mut self,
        registry: &mut RuleRegistry,
        captures: Option<&'a RawCaptures>,
        repositories: &RepositoryStack<'a>,
    ) -> Vec<Option<RuleId>> {
        let Some(captures) = captures else {
            return Vec::new();
        };
        let Some(max_index) = captures.max_index() else {
            return Vec::new();
        };

        let mut out = vec![None; max_index + 1];
        for (index, raw) in &captures.0 {
            let retokenize_with = if raw.patterns.is_some() {
                self.compile_rule(registry, raw, repositories)
            } else {
                NO_RULE
            };
            let names = RuleNames::new(raw.name.clone(), raw.content_name.clone());
            out[*index] =
                Some(registry.register_rule(|_, id| Rule::capture(id, names, retokenize_with)));
        }
        out
    }

    /// Returns the ids of the patterns and whether some could not be resolved
    fn compile_patterns(
        &mut self,
        registry: &mut RuleRegistry,
        patterns: &'a [RawRule],
        repositories: &RepositoryStack<'a>,
    ) -> (Vec<RuleId>, bool) {
        let mut out = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let rule_id = match &pattern.include {
                Some(include) => self.resolve_include(registry, include, repositories),
                None => Some(self.compile_rule(registry, pattern, repositories)),
            };
            if let Some(rule_id) = rule_id
                && !is_skipped(registry, rule_id)
            {
                out.push(rule_id);
            }
        }

        let has_missing_patterns = out.len() != patterns.len();
        (out, has_missing_patterns)
    }

    fn resolve_include(
        &mut self,
        registry: &mut RuleRegistry,
        include: &str,
        repositories: &RepositoryStack<'a>,
    ) -> Option<RuleId> {
        let resolved = match IncludeReference::parse(include) {
            IncludeReference::Base => self.grammar_root(self.base_scope),
            IncludeReference::SelfGrammar => self.grammar_root(repositories.grammar),
            IncludeReference::Relative(name) => repositories
                .lookup(name)
                .map(|rule| (rule, repositories.clone())),
            IncludeReference::TopLevel(scope) => self.grammar_root(scope),
            IncludeReference::TopLevelRepository(scope, name) => {
                self.grammars.get(scope).and_then(|raw| {
                    let rule = raw.repository.as_ref()?.get(name)?;
                    Some((rule, RepositoryStack::for_grammar(raw)))
                })
            }
        };

        match resolved {
            Some((rule, repositories)) => Some(self.compile_rule(registry, rule, &repositories)),
            None => {
                #[cfg(feature = "debug")]
                log::debug!(
                    "[{}] could not resolve include '{include}'",
                    repositories.grammar
                );
                None
            }
        }
    }
}

/// Containers that ended up with nothing because of unresolved includes are dropped.
/// A rule still being built is kept: it is one of our ancestors.
fn is_skipped(registry: &RuleRegistry, rule_id: RuleId) -> bool {
    registry
        .get_rule_in_progress(rule_id)
        .is_some_and(Rule::is_empty_with_missing_patterns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(raw: &RawGrammar, others: &[RawGrammar]) -> (RuleRegistry, RuleId) {
        let mut grammars = HashMap::new();
        grammars.insert(raw.scope_name.clone(), Arc::new(raw.clone()));
        for other in others {
            grammars.insert(other.scope_name.clone(), Arc::new(other.clone()));
        }
        let self_rules: HashMap<_, _> = grammars
            .iter()
            .map(|(scope, g)| (scope.clone(), g.self_rule()))
            .collect();

        let mut registry = RuleRegistry::new();
        let mut factory = RuleFactory::new(&grammars, &self_rules, &raw.scope_name);
        let (root, repositories) = factory.grammar_root(&raw.scope_name).unwrap();
        let root_id = factory.compile_rule(&mut registry, root, &repositories);
        (registry, root_id)
    }

    fn patterns_of(registry: &RuleRegistry, id: RuleId) -> Vec<RuleId> {
        match registry.get_rule(id).unwrap() {
            Rule::IncludeOnly(r) => r.patterns.clone(),
            Rule::BeginEnd(r) => r.patterns.clone(),
            Rule::BeginWhile(r) => r.patterns.clone(),
            other => panic!("no patterns in {other:?}"),
        }
    }

    #[test]
    fn parses_includes() {
        assert_eq!(IncludeReference::parse("$base"), IncludeReference::Base);
        assert_eq!(IncludeReference::parse("$self"), IncludeReference::SelfGrammar);
        assert_eq!(IncludeReference::parse("#str"), IncludeReference::Relative("str"));
        assert_eq!(
            IncludeReference::parse("source.css"),
            IncludeReference::TopLevel("source.css")
        );
        assert_eq!(
            IncludeReference::parse("source.css#rules"),
            IncludeReference::TopLevelRepository("source.css", "rules")
        );
    }

    #[test]
    fn compiles_every_rule_kind() {
        let raw = RawGrammar::from_json(
            r##"{
            "scopeName": "source.test",
            "patterns": [
                {"match": "a(b)", "name": "m", "captures": {"1": {"name": "c"}}},
                {"begin": "<", "end": ">", "name": "be"},
                {"begin": "^>", "while": "^>", "name": "bw"},
                {"begin": "!", "name": "b"},
                {"include": "#group"}
            ],
            "repository": {"group": {"patterns": [{"match": "x"}]}}
        }"##,
        )
        .unwrap();
        let (registry, root) = compile(&raw, &[]);
        let patterns = patterns_of(&registry, root);
        assert_eq!(patterns.len(), 5);

        let kinds: Vec<_> = patterns
            .iter()
            .map(|id| match registry.get_rule(*id).unwrap() {
                Rule::Match(_) => "match",
                Rule::BeginEnd(_) => "begin_end",
                Rule::BeginWhile(_) => "begin_while",
                Rule::IncludeOnly(_) => "include_only",
                Rule::Capture(_) => "capture",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["match", "begin_end", "begin_while", "begin_end", "include_only"]
        );

        let Rule::Match(m) = registry.get_rule(patterns[0]).unwrap() else {
            unreachable!()
        };
        assert_eq!(m.captures.len(), 2);
        assert!(m.captures[0].is_none());
        let capture = registry.get_rule(m.captures[1].unwrap()).unwrap();
        assert_eq!(capture.names().raw_name(), Some("c"));
    }

    #[test]
    fn handles_recursive_includes() {
        let raw = RawGrammar::from_json(
            r##"{
            "scopeName": "source.test",
            "patterns": [{"include": "#paren"}],
            "repository": {
                "paren": {"begin": "\\(", "end": "\\)", "patterns": [{"include": "#paren"}, {"include": "$self"}]}
            }
        }"##,
        )
        .unwrap();
        let (registry, root) = compile(&raw, &[]);
        let paren = patterns_of(&registry, root)[0];
        assert_eq!(patterns_of(&registry, paren), vec![paren, root]);
    }

    #[test]
    fn inner_repository_shadows_outer() {
        let raw = RawGrammar::from_json(
            r##"{
            "scopeName": "source.test",
            "patterns": [{"include": "#outer"}],
            "repository": {
                "item": {"match": "outer", "name": "outer"},
                "outer": {
                    "patterns": [{"include": "#item"}],
                    "repository": {"item": {"match": "inner", "name": "inner"}}
                }
            }
        }"##,
        )
        .unwrap();
        let (registry, root) = compile(&raw, &[]);
        let outer = patterns_of(&registry, root)[0];
        let item = patterns_of(&registry, outer)[0];
        assert_eq!(registry.get_rule(item).unwrap().names().raw_name(), Some("inner"));
    }

    #[test]
    fn skips_unresolved_includes() {
        let raw = RawGrammar::from_json(
            r##"{
            "scopeName": "source.test",
            "patterns": [
                {"include": "#missing"},
                {"patterns": [{"include": "source.unknown"}]},
                {"match": "x"}
            ]
        }"##,
        )
        .unwrap();
        let (registry, root) = compile(&raw, &[]);
        let Rule::IncludeOnly(r) = registry.get_rule(root).unwrap() else {
            unreachable!()
        };
        assert_eq!(r.patterns.len(), 1);
        assert!(r.has_missing_patterns);
    }

    #[test]
    fn resolves_other_grammars() {
        let raw = RawGrammar::from_json(
            r##"{
            "scopeName": "text.html",
            "patterns": [{"include": "source.css"}, {"include": "source.css#prop"}]
        }"##,
        )
        .unwrap();
        let css = RawGrammar::from_json(
            r##"{
            "scopeName": "source.css",
            "patterns": [{"include": "#prop"}, {"include": "$base"}],
            "repository": {"prop": {"match": "color", "name": "prop"}}
        }"##,
        )
        .unwrap();
        let (registry, root) = compile(&raw, &[css]);
        let patterns = patterns_of(&registry, root);
        assert_eq!(patterns.len(), 2);
        let css_root = patterns[0];
        assert_eq!(
            registry.get_rule(css_root).unwrap().names().raw_name(),
            Some("source.css")
        );
        // `#prop` from within css and `source.css#prop` are the same rule, `$base` is html
        assert_eq!(patterns_of(&registry, css_root), vec![patterns[1], root]);
    }

    #[test]
    fn capture_with_patterns_is_retokenized() {
        let raw = RawGrammar::from_json(
            r##"{
            "scopeName": "source.test",
            "patterns": [
                {"match": "(\\w+)", "captures": {"1": {"name": "word", "patterns": [{"match": "a", "name": "letter"}]}}}
            ]
        }"##,
        )
        .unwrap();
        let (registry, root) = compile(&raw, &[]);
        let Rule::Match(m) = registry.get_rule(patterns_of(&registry, root)[0]).unwrap() else {
            unreachable!()
        };
        let Rule::Capture(capture) = registry.get_rule(m.captures[1].unwrap()).unwrap() else {
            unreachable!()
        };
        assert_ne!(capture.retokenize_captured_with_rule_id, NO_RULE);
        assert_eq!(patterns_of(&registry, capture.retokenize_captured_with_rule_id).len(), 1);
    }
}
