use std::collections::BTreeMap;

use crate::themes::color::ColorId;
use crate::themes::font_style::FontStyle;
use crate::themes::selector::{Parent, cmp_parent_specificity};

/// A style stored in the trie. `None`/`0` fields are not set by any rule on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeTrieRule {
    /// Number of scope segments of the selector that created or last updated it
    pub scope_depth: usize,
    /// `None` for the main rule of a node
    pub parent_scopes: Option<Vec<Parent>>,
    pub font_style: Option<FontStyle>,
    pub foreground: ColorId,
    pub background: ColorId,
}

impl ThemeTrieRule {
    pub fn new(
        scope_depth: usize,
        parent_scopes: Option<Vec<Parent>>,
        font_style: Option<FontStyle>,
        foreground: ColorId,
        background: ColorId,
    ) -> Self {
        Self {
            scope_depth,
            parent_scopes,
            font_style,
            foreground,
            background,
        }
    }

    fn parents(&self) -> &[Parent] {
        self.parent_scopes.as_deref().unwrap_or_default()
    }

    fn accept_overwrite(
        &mut self,
        scope_depth: usize,
        font_style: Option<FontStyle>,
        foreground: ColorId,
        background: ColorId,
    ) {
        // Rules are inserted sorted by scope so a deeper rule never comes first
        self.scope_depth = self.scope_depth.max(scope_depth);
        if font_style.is_some() {
            self.font_style = font_style;
        }
        if foreground != 0 {
            self.foreground = foreground;
        }
        if background != 0 {
            self.background = background;
        }
    }
}

/// One node of the theme trie, keyed by a segment of a dotted scope name:
/// `constant.numeric` is stored under `constant` -> `numeric`.
///
/// A new node copies the rules of its parent so unset values are inherited when
/// the tree is built rather than when matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeTrieElement {
    pub(crate) main_rule: ThemeTrieRule,
    pub(crate) rules_with_parent_scopes: Vec<ThemeTrieRule>,
    pub(crate) children: BTreeMap<String, ThemeTrieElement>,
}

impl ThemeTrieElement {
    pub fn new(main_rule: ThemeTrieRule) -> Self {
        Self {
            main_rule,
            rules_with_parent_scopes: Vec::new(),
            children: BTreeMap::new(),
        }
    }

    /// Inserts a rule for `scope` (what is left of it at this depth).
    pub fn insert(
        &mut self,
        scope_depth: usize,
        scope: &str,
        parent_scopes: Option<&[Parent]>,
        font_style: Option<FontStyle>,
        foreground: ColorId,
        background: ColorId,
    ) {
        if scope.is_empty() {
            self.insert_here(scope_depth, parent_scopes, font_style, foreground, background);
            return;
        }

        let (head, tail) = scope.split_once('.').unwrap_or((scope, ""));
        let (main_rule, rules) = (&self.main_rule, &self.rules_with_parent_scopes);
        let child = self
            .children
            .entry(head.to_owned())
            .or_insert_with(|| ThemeTrieElement {
                main_rule: main_rule.clone(),
                rules_with_parent_scopes: rules.clone(),
                children: BTreeMap::new(),
            });
        child.insert(
            scope_depth + 1,
            tail,
            parent_scopes,
            font_style,
            foreground,
            background,
        );
    }

    fn insert_here(
        &mut self,
        scope_depth: usize,
        parent_scopes: Option<&[Parent]>,
        mut font_style: Option<FontStyle>,
        mut foreground: ColorId,
        mut background: ColorId,
    ) {
        let Some(parent_scopes) = parent_scopes else {
            self.main_rule
                .accept_overwrite(scope_depth, font_style, foreground, background);
            return;
        };

        if let Some(rule) = self
            .rules_with_parent_scopes
            .iter_mut()
            .find(|r| r.parent_scopes.as_deref() == Some(parent_scopes))
        {
            rule.accept_overwrite(scope_depth, font_style, foreground, background);
            return;
        }

        // Inherit from main rule
        if font_style.is_none() {
            font_style = self.main_rule.font_style;
        }
        if foreground == 0 {
            foreground = self.main_rule.foreground;
        }
        if background == 0 {
            background = self.main_rule.background;
        }
        self.rules_with_parent_scopes.push(ThemeTrieRule::new(
            scope_depth,
            Some(parent_scopes.to_vec()),
            font_style,
            foreground,
            background,
        ));
    }

    /// The candidate rules for a scope name, most specific first: deeper rules first,
    /// then the ones with the most specific parent requirements.
    /// The first one whose parents match the scope path wins.
    pub fn match_scope(&self, scope: &str) -> Vec<&ThemeTrieRule> {
        let mut node = self;
        let mut rest = scope;
        while !rest.is_empty() {
            let (head, tail) = rest.split_once('.').unwrap_or((rest, ""));
            match node.children.get(head) {
                Some(child) => {
                    node = child;
                    rest = tail;
                }
                None => break,
            }
        }

        let mut rules: Vec<_> = node
            .rules_with_parent_scopes
            .iter()
            .chain(std::iter::once(&node.main_rule))
            .collect();
        rules.sort_by(|a, b| {
            b.scope_depth
                .cmp(&a.scope_depth)
                .then_with(|| cmp_parent_specificity(a.parents(), b.parents()))
        });
        rules
    }
}
