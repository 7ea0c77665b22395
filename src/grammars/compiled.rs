use std::borrow::Cow;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::error::{Error, VerniceResult};
use crate::grammars::anchors::AnchorActive;
use crate::grammars::pattern_set::{CompiledRule, RegExpSourceList};
use crate::grammars::regex::{CaptureIndices, RegExpSource, has_captures, replace_captures};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub u32);

impl RuleId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl Deref for RuleId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Id 0 is never registered: it means "no rule"
pub const NO_RULE: RuleId = RuleId(0);
/// Stands for the end pattern of a BeginEnd rule in a scanner
pub const END_RULE_ID: RuleId = RuleId(u32::MAX);
/// Stands for the while pattern of a BeginWhile rule in a scanner
pub const WHILE_RULE_ID: RuleId = RuleId(u32::MAX - 1);

/// `name`/`contentName` of a rule, which can refer to captures (`entity.name.$1`)
#[derive(Debug, Clone, Default)]
pub struct RuleNames {
    name: Option<String>,
    name_is_capturing: bool,
    content_name: Option<String>,
    content_name_is_capturing: bool,
}

impl RuleNames {
    pub fn new(name: Option<String>, content_name: Option<String>) -> Self {
        Self {
            name_is_capturing: has_captures(name.as_deref()),
            content_name_is_capturing: has_captures(content_name.as_deref()),
            name,
            content_name,
        }
    }

    pub fn name<'a>(&'a self, line: &str, captures: &CaptureIndices) -> Option<Cow<'a, str>> {
        resolve_name(self.name.as_deref(), self.name_is_capturing, line, captures)
    }

    pub fn content_name<'a>(
        &'a self,
        line: &str,
        captures: &CaptureIndices,
    ) -> Option<Cow<'a, str>> {
        resolve_name(
            self.content_name.as_deref(),
            self.content_name_is_capturing,
            line,
            captures,
        )
    }

    /// The names as written in the grammar, for debugging
    pub fn raw_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

fn resolve_name<'a>(
    name: Option<&'a str>,
    is_capturing: bool,
    line: &str,
    captures: &CaptureIndices,
) -> Option<Cow<'a, str>> {
    let name = name?;
    if is_capturing && !captures.is_empty() {
        Some(Cow::Owned(replace_captures(name, line, captures)))
    } else {
        Some(Cow::Borrowed(name))
    }
}

/// Scope assignment (and possibly retokenization) for a single capture group
#[derive(Debug)]
pub struct CaptureRule {
    pub id: RuleId,
    pub names: RuleNames,
    /// When not `NO_RULE`, the captured text is tokenized again with that rule
    pub retokenize_captured_with_rule_id: RuleId,
}

#[derive(Debug)]
pub struct MatchRule {
    pub id: RuleId,
    pub names: RuleNames,
    pub match_: RegExpSource,
    /// Capture rule ids indexed by group number
    pub captures: Vec<Option<RuleId>>,
    cached_patterns: OnceLock<RegExpSourceList>,
}

#[derive(Debug)]
pub struct IncludeOnlyRule {
    pub id: RuleId,
    pub names: RuleNames,
    pub patterns: Vec<RuleId>,
    /// Some include could not be resolved
    pub has_missing_patterns: bool,
    cached_patterns: OnceLock<RegExpSourceList>,
}

#[derive(Debug)]
pub struct BeginEndRule {
    pub id: RuleId,
    pub names: RuleNames,
    pub begin: RegExpSource,
    pub begin_captures: Vec<Option<RuleId>>,
    pub end: RegExpSource,
    pub end_captures: Vec<Option<RuleId>>,
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
    cached_patterns: OnceLock<RegExpSourceList>,
    /// Pattern list for the end pattern with its backreferences resolved
    dynamic_patterns: DynamicList,
}

#[derive(Debug)]
pub struct BeginWhileRule {
    pub id: RuleId,
    pub names: RuleNames,
    pub begin: RegExpSource,
    pub begin_captures: Vec<Option<RuleId>>,
    pub while_: RegExpSource,
    pub while_captures: Vec<Option<RuleId>>,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
    cached_patterns: OnceLock<RegExpSourceList>,
    cached_while: OnceLock<RegExpSourceList>,
    dynamic_while: DynamicList,
}

#[derive(Debug)]
pub enum Rule {
    Match(MatchRule),
    IncludeOnly(IncludeOnlyRule),
    BeginEnd(BeginEndRule),
    BeginWhile(BeginWhileRule),
    Capture(CaptureRule),
}

impl Rule {
    pub fn match_rule(
        id: RuleId,
        names: RuleNames,
        pattern: &str,
        captures: Vec<Option<RuleId>>,
    ) -> Self {
        Rule::Match(MatchRule {
            id,
            names,
            match_: RegExpSource::new(pattern, id),
            captures,
            cached_patterns: OnceLock::new(),
        })
    }

    pub fn include_only(
        id: RuleId,
        names: RuleNames,
        patterns: Vec<RuleId>,
        has_missing_patterns: bool,
    ) -> Self {
        Rule::IncludeOnly(IncludeOnlyRule {
            id,
            names,
            patterns,
            has_missing_patterns,
            cached_patterns: OnceLock::new(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn begin_end(
        id: RuleId,
        names: RuleNames,
        begin: &str,
        begin_captures: Vec<Option<RuleId>>,
        end: &str,
        end_captures: Vec<Option<RuleId>>,
        apply_end_pattern_last: bool,
        (patterns, has_missing_patterns): (Vec<RuleId>, bool),
    ) -> Self {
        Rule::BeginEnd(BeginEndRule {
            id,
            names,
            begin: RegExpSource::new(begin, id),
            begin_captures,
            end: RegExpSource::new(end, END_RULE_ID),
            end_captures,
            apply_end_pattern_last,
            patterns,
            has_missing_patterns,
            cached_patterns: OnceLock::new(),
            dynamic_patterns: DynamicList::default(),
        })
    }

    pub fn begin_while(
        id: RuleId,
        names: RuleNames,
        begin: &str,
        begin_captures: Vec<Option<RuleId>>,
        while_: &str,
        while_captures: Vec<Option<RuleId>>,
        (patterns, has_missing_patterns): (Vec<RuleId>, bool),
    ) -> Self {
        Rule::BeginWhile(BeginWhileRule {
            id,
            names,
            begin: RegExpSource::new(begin, id),
            begin_captures,
            while_: RegExpSource::new(while_, WHILE_RULE_ID),
            while_captures,
            patterns,
            has_missing_patterns,
            cached_patterns: OnceLock::new(),
            cached_while: OnceLock::new(),
            dynamic_while: DynamicList::default(),
        })
    }

    pub fn capture(id: RuleId, names: RuleNames, retokenize_captured_with_rule_id: RuleId) -> Self {
        Rule::Capture(CaptureRule {
            id,
            names,
            retokenize_captured_with_rule_id,
        })
    }

    pub fn id(&self) -> RuleId {
        match self {
            Rule::Match(r) => r.id,
            Rule::IncludeOnly(r) => r.id,
            Rule::BeginEnd(r) => r.id,
            Rule::BeginWhile(r) => r.id,
            Rule::Capture(r) => r.id,
        }
    }

    pub fn names(&self) -> &RuleNames {
        match self {
            Rule::Match(r) => &r.names,
            Rule::IncludeOnly(r) => &r.names,
            Rule::BeginEnd(r) => &r.names,
            Rule::BeginWhile(r) => &r.names,
            Rule::Capture(r) => &r.names,
        }
    }

    pub fn name<'a>(&'a self, line: &str, captures: &CaptureIndices) -> Option<Cow<'a, str>> {
        self.names().name(line, captures)
    }

    pub fn content_name<'a>(&'a self, line: &str, captures: &CaptureIndices) -> Option<Cow<'a, str>> {
        self.names().content_name(line, captures)
    }

    /// Rules that only exist to hold patterns are skipped by their parent when nothing
    /// could be resolved in them
    pub(crate) fn is_empty_with_missing_patterns(&self) -> bool {
        match self {
            Rule::IncludeOnly(r) => r.has_missing_patterns && r.patterns.is_empty(),
            Rule::BeginEnd(r) => r.has_missing_patterns && r.patterns.is_empty(),
            Rule::BeginWhile(r) => r.has_missing_patterns && r.patterns.is_empty(),
            Rule::Match(_) | Rule::Capture(_) => false,
        }
    }

    /// Appends the alternatives this rule contributes to a scanner of a parent rule.
    /// `visited` holds the container rules already expanded, grammars can include
    /// themselves.
    pub fn collect_patterns(
        &self,
        registry: &RuleRegistry,
        out: &mut RegExpSourceList,
        visited: &mut HashSet<RuleId>,
    ) -> VerniceResult<()> {
        match self {
            Rule::Match(r) => out.push(r.match_.clone()),
            Rule::BeginEnd(r) => out.push(r.begin.clone()),
            Rule::BeginWhile(r) => out.push(r.begin.clone()),
            Rule::IncludeOnly(r) => {
                if visited.insert(r.id) {
                    collect_all(registry, &r.patterns, out, visited)?;
                }
            }
            Rule::Capture(_) => {}
        }
        Ok(())
    }

    /// Scanner for everything that can match while this rule is at the top of the stack.
    /// `end_source` is the end pattern with resolved backreferences, if any.
    pub fn compile(
        &self,
        registry: &RuleRegistry,
        end_source: Option<&str>,
    ) -> VerniceResult<Arc<CompiledRule>> {
        self.compile_inner(registry, end_source, None)
    }

    /// Same as `compile` with the anchors that are not allowed disabled
    pub fn compile_ag(
        &self,
        registry: &RuleRegistry,
        end_source: Option<&str>,
        anchors: AnchorActive,
    ) -> VerniceResult<Arc<CompiledRule>> {
        self.compile_inner(registry, end_source, Some(anchors))
    }

    fn compile_inner(
        &self,
        registry: &RuleRegistry,
        end_source: Option<&str>,
        anchors: Option<AnchorActive>,
    ) -> VerniceResult<Arc<CompiledRule>> {
        let compile = |list: &RegExpSourceList| match anchors {
            Some(a) => list.compile_ag(a),
            None => list.compile(),
        };

        match self {
            Rule::Match(r) => compile(cached_list(&r.cached_patterns, || {
                let mut out = RegExpSourceList::new();
                out.push(r.match_.clone());
                Ok(out)
            })?),
            Rule::IncludeOnly(r) => compile(cached_list(&r.cached_patterns, || {
                let mut out = RegExpSourceList::new();
                let mut visited = HashSet::from([r.id]);
                collect_all(registry, &r.patterns, &mut out, &mut visited)?;
                Ok(out)
            })?),
            Rule::BeginWhile(r) => compile(cached_list(&r.cached_patterns, || {
                let mut out = RegExpSourceList::new();
                collect_all(registry, &r.patterns, &mut out, &mut HashSet::new())?;
                Ok(out)
            })?),
            Rule::BeginEnd(r) => {
                let list = cached_list(&r.cached_patterns, || {
                    let mut out = RegExpSourceList::new();
                    collect_all(registry, &r.patterns, &mut out, &mut HashSet::new())?;
                    if r.apply_end_pattern_last {
                        out.push(r.end.clone());
                    } else {
                        out.unshift(r.end.clone());
                    }
                    Ok(out)
                })?;

                match end_source {
                    Some(src) if r.end.has_back_references && src != r.end.source() => {
                        let end_index = if r.apply_end_pattern_last {
                            list.len() - 1
                        } else {
                            0
                        };
                        let dynamic = r
                            .dynamic_patterns
                            .get_or_replace(src, || list.with_source(end_index, src));
                        compile(&dynamic)
                    }
                    _ => compile(list),
                }
            }
            Rule::Capture(_) => Ok(Arc::new(CompiledRule::new(Vec::new())?)),
        }
    }

    /// Scanner for the `while` condition of a BeginWhile rule
    pub fn compile_while_ag(
        &self,
        end_source: Option<&str>,
        anchors: AnchorActive,
    ) -> VerniceResult<Option<Arc<CompiledRule>>> {
        let Rule::BeginWhile(r) = self else {
            return Ok(None);
        };
        let list = cached_list(&r.cached_while, || {
            let mut out = RegExpSourceList::new();
            out.push(r.while_.clone());
            Ok(out)
        })?;

        let compiled = match end_source {
            Some(src) if r.while_.has_back_references && src != r.while_.source() => {
                let dynamic = r
                    .dynamic_while
                    .get_or_replace(src, || list.with_source(0, src));
                dynamic.compile_ag(anchors)?
            }
            _ => list.compile_ag(anchors)?,
        };
        Ok(Some(compiled))
    }

    /// Drops every compiled scanner of that rule
    pub fn dispose(&mut self) {
        match self {
            Rule::Match(r) => dispose_list(&mut r.cached_patterns),
            Rule::IncludeOnly(r) => dispose_list(&mut r.cached_patterns),
            Rule::BeginEnd(r) => {
                dispose_list(&mut r.cached_patterns);
                r.dynamic_patterns.clear();
            }
            Rule::BeginWhile(r) => {
                dispose_list(&mut r.cached_patterns);
                dispose_list(&mut r.cached_while);
                r.dynamic_while.clear();
            }
            Rule::Capture(_) => {}
        }
    }

    #[cfg(test)]
    pub(crate) fn has_cached_patterns(&self) -> bool {
        match self {
            Rule::Match(r) => r.cached_patterns.get().is_some(),
            Rule::IncludeOnly(r) => r.cached_patterns.get().is_some(),
            Rule::BeginEnd(r) => {
                r.cached_patterns.get().is_some() || r.dynamic_patterns.source().is_some()
            }
            Rule::BeginWhile(r) => {
                r.cached_patterns.get().is_some()
                    || r.cached_while.get().is_some()
                    || r.dynamic_while.source().is_some()
            }
            Rule::Capture(_) => false,
        }
    }
}

fn collect_all(
    registry: &RuleRegistry,
    patterns: &[RuleId],
    out: &mut RegExpSourceList,
    visited: &mut HashSet<RuleId>,
) -> VerniceResult<()> {
    for pattern in patterns {
        registry
            .get_rule(*pattern)?
            .collect_patterns(registry, out, visited)?;
    }
    Ok(())
}

/// Several threads may build the list concurrently, only one gets stored
fn cached_list(
    slot: &OnceLock<RegExpSourceList>,
    build: impl FnOnce() -> VerniceResult<RegExpSourceList>,
) -> VerniceResult<&RegExpSourceList> {
    if let Some(list) = slot.get() {
        return Ok(list);
    }
    let list = build()?;
    Ok(slot.get_or_init(|| list))
}

/// The list built for the last resolved end/while source of a rule.
///
/// Only one is kept: a rule whose back references resolve to a new text on every use
/// (heredoc tags) would otherwise keep a list per text.
#[derive(Debug, Default)]
struct DynamicList {
    last: Mutex<Option<(String, Arc<RegExpSourceList>)>>,
}

impl DynamicList {
    fn get_or_replace(
        &self,
        source: &str,
        build: impl FnOnce() -> RegExpSourceList,
    ) -> Arc<RegExpSourceList> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((last_source, list)) = last.as_ref()
            && last_source == source
        {
            return Arc::clone(list);
        }
        let list = Arc::new(build());
        *last = Some((source.to_owned(), Arc::clone(&list)));
        list
    }

    fn clear(&mut self) {
        *self.last.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
    }

    #[cfg(test)]
    fn source(&self) -> Option<String> {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.as_ref().map(|(source, _)| source.clone())
    }
}

fn dispose_list(slot: &mut OnceLock<RegExpSourceList>) {
    if let Some(list) = slot.get_mut() {
        list.dispose();
    }
    slot.take();
}

/// Owns every compiled rule of a grammar, indexed by id.
#[derive(Debug)]
pub struct RuleRegistry {
    /// Slot 0 is never used. A slot is `None` while its rule is being built.
    rules: Vec<Option<Rule>>,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self { rules: vec![None] }
    }
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next id and builds the rule with it.
    ///
    /// The id is handed to the factory before the rule exists so it can register its
    /// children, which may point back at it.
    pub fn register_rule(&mut self, factory: impl FnOnce(&mut Self, RuleId) -> Rule) -> RuleId {
        let id = RuleId(self.rules.len() as u32);
        self.rules.push(None);
        let rule = factory(self, id);
        self.rules[id.as_index()] = Some(rule);
        id
    }

    pub fn get_rule(&self, id: RuleId) -> VerniceResult<&Rule> {
        self.rules
            .get(id.as_index())
            .and_then(Option::as_ref)
            .ok_or(Error::UnknownRule(id))
    }

    /// Only `None` if the rule is still being built
    pub(crate) fn get_rule_in_progress(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.as_index()).and_then(Option::as_ref)
    }

    /// Number of registered rules
    pub fn len(&self) -> usize {
        self.rules.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispose(&mut self) {
        for rule in self.rules.iter_mut().flatten() {
            rule.dispose();
        }
    }
}
