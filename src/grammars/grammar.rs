use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::VerniceResult;
use crate::grammars::compiled::{NO_RULE, Rule, RuleId, RuleRegistry};
use crate::grammars::factory::{RepositoryStack, RuleFactory};
use crate::grammars::injections::{Injection, parse_injection_selector};
use crate::grammars::raw::{RawGrammar, RawRule};
use crate::scope::ScopeList;
use crate::tokenizer::{StateStack, Token, tokenize_line};

/// Where a grammar finds the other grammars it includes and the ones injected into it.
pub trait GrammarRepository {
    /// The raw grammar with that scope name, if known
    fn lookup(&self, scope_name: &str) -> Option<Arc<RawGrammar>>;

    /// Scope names of the grammars declaring they inject into `scope_name`
    fn injections(&self, scope_name: &str) -> Vec<String>;
}

/// Options used when compiling and tokenizing with a grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrammarOptions {
    pub(crate) root_scope: bool,
    pub(crate) slow_match_threshold: Duration,
}

impl Default for GrammarOptions {
    fn default() -> Self {
        Self {
            root_scope: false,
            slow_match_threshold: Duration::from_millis(5),
        }
    }
}

impl GrammarOptions {
    /// Whether the initial state starts with the grammar scope name (eg `source.js`) in its
    /// scopes. Off by default: tokens then only carry the scopes of the rules that matched.
    pub fn root_scope(mut self, value: bool) -> Self {
        self.root_scope = value;
        self
    }

    /// How long a single rule search can take before being reported, only used with the
    /// `debug` feature.
    pub fn slow_match_threshold(mut self, value: Duration) -> Self {
        self.slow_match_threshold = value;
        self
    }
}

/// A compiled grammar, ready to tokenize.
///
/// Every rule reachable from the grammar, including the ones of included grammars and
/// injections, is registered when it is created. The regexes themselves are only compiled
/// when first needed so an invalid pattern is reported by `tokenize_line`.
pub struct Grammar {
    scope_name: String,
    root_id: RuleId,
    rules: RuleRegistry,
    /// Sorted by priority, `L:` first
    injections: Vec<Injection>,
    options: GrammarOptions,
    /// Given out by `initial_state`, recognized to know we are on the first line
    initial_state: StateStack,
}

impl Grammar {
    pub fn new(
        raw: Arc<RawGrammar>,
        repository: Option<&dyn GrammarRepository>,
        options: GrammarOptions,
    ) -> Self {
        let base_scope = raw.scope_name.clone();
        let injector_scopes = repository
            .map(|r| r.injections(&base_scope))
            .unwrap_or_default();
        let grammars = collect_grammars(&raw, &injector_scopes, repository);

        let self_rules: HashMap<String, RawRule> = grammars
            .iter()
            .map(|(scope, g)| (scope.clone(), g.self_rule()))
            .collect();
        // Injected grammars get their own root rule, without the name `$self` has
        let injector_roots: HashMap<String, RawRule> = injector_scopes
            .iter()
            .filter_map(|scope| grammars.get(scope))
            .map(|g| {
                let rule = RawRule {
                    patterns: Some(g.patterns.clone()),
                    ..Default::default()
                };
                (g.scope_name.clone(), rule)
            })
            .collect();

        let mut rules = RuleRegistry::new();
        let mut factory = RuleFactory::new(&grammars, &self_rules, &base_scope);
        let root_id = match factory.grammar_root(&base_scope) {
            Some((root, repositories)) => factory.compile_rule(&mut rules, root, &repositories),
            None => NO_RULE,
        };

        let mut injections = Vec::new();
        let base_repositories = RepositoryStack::for_grammar(&raw);
        for (selector, rule) in &raw.injections {
            let rule_id = factory.compile_rule(&mut rules, rule, &base_repositories);
            add_injections(&mut injections, selector, rule_id);
        }
        for scope in &injector_scopes {
            let Some(injector) = grammars.get(scope) else {
                #[cfg(feature = "debug")]
                log::debug!("[{base_scope}] injected grammar {scope} not found");
                continue;
            };
            if let Some(selector) = &injector.injection_selector
                && let Some(root) = injector_roots.get(scope)
            {
                let rule_id = factory.compile_rule(
                    &mut rules,
                    root,
                    &RepositoryStack::for_grammar(injector),
                );
                add_injections(&mut injections, selector, rule_id);
            }
        }
        injections.sort_by_key(|i| i.priority);

        #[cfg(feature = "debug")]
        log::debug!(
            "[{base_scope}] compiled {} rules and {} injections",
            rules.len(),
            injections.len()
        );

        let scopes = if options.root_scope {
            ScopeList::new().push(Some(&base_scope))
        } else {
            ScopeList::new()
        };

        Self {
            initial_state: StateStack::root(root_id, scopes),
            scope_name: base_scope,
            root_id,
            rules,
            injections,
            options,
        }
    }

    /// Compiles a grammar without any other grammar available: includes of other
    /// grammars are ignored.
    pub fn from_raw(raw: RawGrammar) -> Self {
        Self::new(Arc::new(raw), None, GrammarOptions::default())
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn root_rule_id(&self) -> RuleId {
        self.root_id
    }

    pub fn options(&self) -> &GrammarOptions {
        &self.options
    }

    pub fn get_rule(&self, id: RuleId) -> VerniceResult<&Rule> {
        self.rules.get_rule(id)
    }

    pub(crate) fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    pub fn injections(&self) -> &[Injection] {
        &self.injections
    }

    pub fn has_injections(&self) -> bool {
        !self.injections.is_empty()
    }

    /// The state to give to `tokenize_line` for the first line of a document
    pub fn initial_state(&self) -> StateStack {
        self.initial_state.clone()
    }

    pub(crate) fn is_initial_state(&self, state: &StateStack) -> bool {
        state.ptr_eq(&self.initial_state)
    }

    /// Tokenizes a single line, without its line terminator.
    /// The returned state is the one to give for the next line.
    pub fn tokenize_line(
        &self,
        line: &str,
        previous_state: &StateStack,
    ) -> VerniceResult<(Vec<Token>, StateStack)> {
        tokenize_line(self, line, previous_state)
    }

    /// Tokenizes every line of `text`, starting from the initial state
    pub fn tokenize_lines(&self, text: &str) -> VerniceResult<Vec<Vec<Token>>> {
        let mut state = self.initial_state();
        let mut out = Vec::new();
        for line in text.lines() {
            let (tokens, next) = self.tokenize_line(line, &state)?;
            out.push(tokens);
            state = next;
        }
        Ok(out)
    }

    /// Drops every compiled regex. They are compiled again if the grammar is used after.
    pub fn dispose(&mut self) {
        self.rules.dispose();
    }
}

impl fmt::Debug for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grammar")
            .field("scope_name", &self.scope_name)
            .field("rules", &self.rules.len())
            .field("injections", &self.injections.len())
            .finish()
    }
}

fn add_injections(out: &mut Vec<Injection>, selector: &str, rule_id: RuleId) {
    for matcher in parse_injection_selector(selector) {
        out.push(Injection {
            rule_id,
            matcher: matcher.matcher,
            priority: matcher.priority,
            debug_selector: selector.to_owned(),
        });
    }
}

/// The grammar, every grammar it includes transitively and the injected ones
fn collect_grammars(
    raw: &Arc<RawGrammar>,
    injector_scopes: &[String],
    repository: Option<&dyn GrammarRepository>,
) -> HashMap<String, Arc<RawGrammar>> {
    let mut grammars = HashMap::new();
    grammars.insert(raw.scope_name.clone(), Arc::clone(raw));

    let Some(repository) = repository else {
        return grammars;
    };

    let mut pending: Vec<String> = raw.external_references();
    pending.extend(injector_scopes.iter().cloned());
    while let Some(scope) = pending.pop() {
        if grammars.contains_key(&scope) {
            continue;
        }
        match repository.lookup(&scope) {
            Some(grammar) => {
                pending.extend(grammar.external_references());
                grammars.insert(scope, grammar);
            }
            None => {
                #[cfg(feature = "debug")]
                log::debug!("[{}] grammar {scope} not found", raw.scope_name);
            }
        }
    }
    grammars
}
