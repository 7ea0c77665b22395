use crate::themes::color::is_valid_hex_color;
use crate::themes::font_style::FontStyle;
use crate::themes::raw::RawTheme;
use crate::themes::selector::{Parent, cmp_parent_scopes, parse_selector};

/// A theme entry for a single selector, before being put in the trie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedThemeRule {
    /// The scope the selector targets, `""` for the default style
    pub scope: String,
    /// Requirements on the ancestors, innermost first
    pub parent_scopes: Option<Vec<Parent>>,
    /// Position of the entry in the theme, later ones win when merged
    pub index: usize,
    /// `None` when the entry has no `fontStyle`
    pub font_style: Option<FontStyle>,
    pub foreground: Option<String>,
    pub background: Option<String>,
}

impl ParsedThemeRule {
    pub fn new(
        scope: &str,
        parent_scopes: Option<Vec<Parent>>,
        index: usize,
        font_style: Option<FontStyle>,
        foreground: Option<&str>,
        background: Option<&str>,
    ) -> Self {
        Self {
            scope: scope.to_owned(),
            parent_scopes,
            index,
            font_style,
            foreground: foreground.map(str::to_owned),
            background: background.map(str::to_owned),
        }
    }
}

fn valid_color(color: Option<&str>) -> Option<&str> {
    color.filter(|c| is_valid_hex_color(c))
}

/// Flattens a raw theme into one rule per selector.
///
/// An entry without a scope is a default rule. Invalid colors are dropped.
/// The editor colors of a VS Code theme come first as a default rule so an explicit
/// default entry overrides them.
pub fn parse_theme(raw: &RawTheme) -> Vec<ParsedThemeRule> {
    let mut rules = Vec::new();

    if let Some(colors) = &raw.colors {
        let foreground = valid_color(colors.foreground.as_deref());
        let background = valid_color(colors.background.as_deref());
        if foreground.is_some() || background.is_some() {
            rules.push(ParsedThemeRule::new("", None, 0, None, foreground, background));
        }
    }

    for (index, entry) in raw.settings.iter().enumerate() {
        let Some(settings) = &entry.settings else {
            continue;
        };

        let selectors = match &entry.scope {
            Some(scope) => scope.selectors(),
            None => vec![""],
        };
        let font_style = settings.font_style.as_deref().map(FontStyle::parse);
        let foreground = valid_color(settings.foreground.as_deref());
        let background = valid_color(settings.background.as_deref());

        for selector in selectors {
            if selector.is_empty() {
                rules.push(ParsedThemeRule::new(
                    "", None, index, font_style, foreground, background,
                ));
                continue;
            }
            let Some(parsed) = parse_selector(selector) else {
                #[cfg(feature = "debug")]
                log::debug!("[parse_theme] ignoring invalid selector {selector:?}");
                continue;
            };
            let parent_scopes = if parsed.parent_scopes.is_empty() {
                None
            } else {
                Some(parsed.parent_scopes)
            };
            rules.push(ParsedThemeRule::new(
                &parsed.target_scope,
                parent_scopes,
                index,
                font_style,
                foreground,
                background,
            ));
        }
    }

    rules
}

/// Sorts rules in the order they have to be inserted in the trie: by scope, then
/// parent scopes (none first), then index.
pub(crate) fn sort_parsed_rules(rules: &mut [ParsedThemeRule]) {
    rules.sort_by(|a, b| {
        a.scope
            .cmp(&b.scope)
            .then_with(|| cmp_parent_scopes(a.parent_scopes.as_deref(), b.parent_scopes.as_deref()))
            .then_with(|| a.index.cmp(&b.index))
    });
}
