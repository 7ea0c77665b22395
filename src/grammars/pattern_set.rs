use std::fmt::{Debug, Formatter};
use std::sync::{Arc, OnceLock};

use onig::{RegSet, RegSetLead, Regex, RegexOptions, SearchOptions, Syntax};

use crate::error::{Error, VerniceResult};
use crate::grammars::RuleId;
use crate::grammars::anchors::AnchorActive;
use crate::grammars::regex::RegExpSource;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ScanMatch {
    /// The rule owning the alternative that matched
    pub rule_id: RuleId,
    /// Absolute byte ranges of every group, group 0 being the whole match
    pub capture_indices: Vec<Option<(usize, usize)>>,
}

impl ScanMatch {
    pub fn start(&self) -> usize {
        self.capture_indices[0].map_or(0, |(s, _)| s)
    }

    pub fn end(&self) -> usize {
        self.capture_indices[0].map_or(0, |(_, e)| e)
    }
}

/// An ordered set of compiled alternatives searched together with an onig `RegSet`.
///
/// The match starting the earliest wins, ties go to the alternative declared first.
pub struct CompiledRule {
    rule_ids: Vec<RuleId>,
    sources: Vec<String>,
    regset: Option<RegSet>,
}

impl CompiledRule {
    pub fn new(items: Vec<(RuleId, String)>) -> VerniceResult<Self> {
        if items.is_empty() {
            return Ok(Self {
                rule_ids: Vec::new(),
                sources: Vec::new(),
                regset: None,
            });
        }

        let (rule_ids, sources): (Vec<_>, Vec<_>) = items.into_iter().unzip();
        let pattern_strs: Vec<&str> = sources.iter().map(String::as_str).collect();

        let regset = RegSet::with_options(&pattern_strs, RegexOptions::REGEX_OPTION_CAPTURE_GROUP)
            .map_err(|e| invalid_pattern(&sources, e))?;

        Ok(Self {
            rule_ids,
            sources,
            regset: Some(regset),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.regset.is_none()
    }

    pub fn rule_ids(&self) -> &[RuleId] {
        &self.rule_ids
    }

    /// Finds the earliest match at or after `pos`.
    /// The whole text is given to the engine so lookbehinds can see before `pos`.
    pub fn find_next_match(&self, text: &str, pos: usize) -> Option<ScanMatch> {
        let regset = self.regset.as_ref()?;
        if pos > text.len() {
            return None;
        }

        let (pattern_index, captures) = regset.captures_with_options(
            text,
            pos,
            text.len(),
            RegSetLead::Position,
            SearchOptions::SEARCH_OPTION_NONE,
        )?;
        captures.pos(0)?;

        Some(ScanMatch {
            rule_id: self.rule_ids[pattern_index],
            capture_indices: (0..captures.len()).map(|i| captures.pos(i)).collect(),
        })
    }
}

/// The set doesn't say which pattern is invalid, compile them one by one to find it
fn invalid_pattern(sources: &[String], set_error: onig::Error) -> Error {
    sources
        .iter()
        .find_map(|source| {
            Regex::with_options(
                source,
                RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
                Syntax::default(),
            )
            .err()
            .map(|e| Error::GrammarCompile {
                pattern: source.clone(),
                message: e.to_string(),
            })
        })
        .unwrap_or_else(|| Error::GrammarCompile {
            pattern: sources.join("|"),
            message: set_error.to_string(),
        })
}

impl Debug for CompiledRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "CompiledRule({} patterns)", self.rule_ids.len())?;
        for (rule_id, source) in self.rule_ids.iter().zip(&self.sources) {
            writeln!(f, "  - {}: {source}", rule_id.0)?;
        }
        Ok(())
    }
}

type CachedScanner = OnceLock<Result<Arc<CompiledRule>, (String, String)>>;

/// Lazily compiled scanners, one per anchor combination
#[derive(Default)]
pub(crate) struct ScannerCache {
    slots: [CachedScanner; 4],
}

impl ScannerCache {
    pub fn get_or_compile(
        &self,
        anchors: AnchorActive,
        build: impl FnOnce() -> VerniceResult<CompiledRule>,
    ) -> VerniceResult<Arc<CompiledRule>> {
        let slot = &self.slots[anchors.index()];
        let res = slot.get_or_init(|| match build() {
            Ok(compiled) => Ok(Arc::new(compiled)),
            Err(Error::GrammarCompile { pattern, message }) => Err((pattern, message)),
            Err(e) => Err((String::new(), e.to_string())),
        });
        match res {
            Ok(compiled) => Ok(Arc::clone(compiled)),
            Err((pattern, message)) => Err(Error::GrammarCompile {
                pattern: pattern.clone(),
                message: message.clone(),
            }),
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.take();
        }
    }
}

/// The alternatives collected for a rule, in priority order
#[derive(Default)]
pub struct RegExpSourceList {
    items: Vec<RegExpSource>,
    has_anchors: bool,
    cache: ScannerCache,
}

impl RegExpSourceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: RegExpSource) {
        self.has_anchors = self.has_anchors || item.has_anchor;
        self.items.push(item);
    }

    pub fn unshift(&mut self, item: RegExpSource) {
        self.has_anchors = self.has_anchors || item.has_anchor;
        self.items.insert(0, item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[RegExpSource] {
        &self.items
    }

    /// A copy of this list with the source at `index` replaced, with empty caches.
    /// Used for end patterns whose backreferences got resolved.
    pub fn with_source(&self, index: usize, source: &str) -> Self {
        let mut out = Self::new();
        for (i, item) in self.items.iter().enumerate() {
            if i == index {
                out.push(RegExpSource::new(source, item.rule_id));
            } else {
                out.push(item.clone());
            }
        }
        out
    }

    /// Compiles the sources as written
    pub fn compile(&self) -> VerniceResult<Arc<CompiledRule>> {
        self.cache.get_or_compile(AnchorActive::AG, || {
            CompiledRule::new(
                self.items
                    .iter()
                    .map(|item| (item.rule_id, item.source().to_owned()))
                    .collect(),
            )
        })
    }

    /// Compiles the sources with the anchors not allowed replaced
    pub fn compile_ag(&self, anchors: AnchorActive) -> VerniceResult<Arc<CompiledRule>> {
        if !self.has_anchors {
            return self.compile();
        }
        self.cache.get_or_compile(anchors, || {
            CompiledRule::new(
                self.items
                    .iter()
                    .map(|item| (item.rule_id, item.resolve_anchors(anchors).to_owned()))
                    .collect(),
            )
        })
    }

    pub fn dispose(&mut self) {
        self.cache.clear();
    }
}

impl Debug for RegExpSourceList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.items).finish()
    }
}
