use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::VerniceResult;
use crate::themes::color::{Color, ColorId, ColorMap};
use crate::themes::font_style::FontStyle;
use crate::themes::parse::{ParsedThemeRule, parse_theme, sort_parsed_rules};
use crate::themes::raw::RawTheme;
use crate::themes::selector::parents_match;
use crate::themes::trie::{ThemeTrieElement, ThemeTrieRule};

/// Style of a scope path as color ids. `None`/`0` fields are not set by the theme.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct StyleAttributes {
    pub font_style: Option<FontStyle>,
    pub foreground: ColorId,
    pub background: ColorId,
}

impl StyleAttributes {
    /// Fills the unset fields from `fallback`
    pub fn or(self, fallback: StyleAttributes) -> StyleAttributes {
        StyleAttributes {
            font_style: self.font_style.or(fallback.font_style),
            foreground: if self.foreground == 0 {
                fallback.foreground
            } else {
                self.foreground
            },
            background: if self.background == 0 {
                fallback.background
            } else {
                self.background
            },
        }
    }
}

impl From<&ThemeTrieRule> for StyleAttributes {
    fn from(rule: &ThemeTrieRule) -> Self {
        Self {
            font_style: rule.font_style,
            foreground: rule.foreground,
            background: rule.background,
        }
    }
}

/// A complete style with foreground, background colors and font styling
///
/// This is the runtime representation that always has concrete values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct Style {
    pub foreground: Color,
    pub background: Color,
    pub font_style: FontStyle,
}

impl Default for Style {
    fn default() -> Style {
        Style {
            foreground: Color::BLACK,
            background: Color::WHITE,
            font_style: FontStyle::empty(),
        }
    }
}

impl Style {
    /// Whether the style draws lines that would show on whitespace
    pub fn has_decorations(&self) -> bool {
        self.font_style.contains(FontStyle::UNDERLINE)
            || self.font_style.contains(FontStyle::STRIKETHROUGH)
    }
}

/// A theme ready to resolve scope paths to styles.
pub struct Theme {
    name: Option<String>,
    color_map: ColorMap,
    defaults: StyleAttributes,
    root: ThemeTrieElement,
    /// innermost scope name -> candidate rules, most specific first
    cache: papaya::HashMap<String, Vec<ThemeTrieRule>>,
}

impl Theme {
    pub fn from_raw(raw: &RawTheme) -> VerniceResult<Self> {
        Self::from_raw_with_color_map(raw, ColorMap::new())
    }

    /// Builds the theme with a given color map, typically a frozen one so the ids are
    /// the ones of an existing theme.
    pub fn from_raw_with_color_map(raw: &RawTheme, color_map: ColorMap) -> VerniceResult<Self> {
        let mut theme = resolve_parsed_theme_rules(parse_theme(raw), color_map)?;
        theme.name = raw.name.clone();
        Ok(theme)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// id -> color as spelled in the theme
    pub fn color_map(&self) -> &ColorMap {
        &self.color_map
    }

    /// The style of text without any scope. All fields are set.
    pub fn defaults(&self) -> StyleAttributes {
        self.defaults
    }

    pub(crate) fn root(&self) -> &ThemeTrieElement {
        &self.root
    }

    /// The style the theme sets for a scope path, outermost scope first.
    /// Fields not set by any matching rule are left unset, an empty path gives the
    /// defaults.
    pub fn match_scope_path<S: AsRef<str>>(&self, path: &[S]) -> StyleAttributes {
        let Some((scope, ancestors)) = path.split_last() else {
            return self.defaults;
        };
        let scope = scope.as_ref();
        let cache = self.cache.pin();
        let rules = match cache.get(scope) {
            Some(rules) => rules,
            None => cache.get_or_insert_with(scope.to_owned(), || {
                self.root.match_scope(scope).into_iter().cloned().collect()
            }),
        };

        rules
            .iter()
            .find(|rule| {
                rule.parent_scopes
                    .as_deref()
                    .is_none_or(|parents| parents_match(parents, ancestors))
            })
            .map(StyleAttributes::from)
            .unwrap_or_default()
    }

    /// Like [`Theme::match_scope_path`] with the unset fields taken from the defaults
    pub fn resolve_style<S: AsRef<str>>(&self, path: &[S]) -> StyleAttributes {
        self.match_scope_path(path).or(self.defaults)
    }

    /// Turns color ids into colors. Unset fields use the theme defaults.
    pub fn style(&self, attributes: StyleAttributes) -> Style {
        let attributes = attributes.or(self.defaults);
        let color = |id: ColorId, fallback: Color| {
            self.color_map
                .get(id)
                .and_then(|hex| Color::from_hex(hex).ok())
                .unwrap_or(fallback)
        };
        Style {
            foreground: color(attributes.foreground, Color::BLACK),
            background: color(attributes.background, Color::WHITE),
            font_style: attributes.font_style.unwrap_or_default(),
        }
    }
}

impl fmt::Debug for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Theme")
            .field("name", &self.name)
            .field("color_map", &self.color_map)
            .field("defaults", &self.defaults)
            .field("root", &self.root)
            .finish()
    }
}

/// Builds the trie from parsed rules.
///
/// The leading rules with an empty scope are merged into the defaults, falling back to
/// no font style, `#000000` and `#ffffff`. The default foreground and background are
/// the first colors registered.
pub fn resolve_parsed_theme_rules(
    mut rules: Vec<ParsedThemeRule>,
    mut color_map: ColorMap,
) -> VerniceResult<Theme> {
    sort_parsed_rules(&mut rules);

    let defaults_count = rules.iter().take_while(|r| r.scope.is_empty()).count();
    let mut font_style = FontStyle::empty();
    let mut foreground = "#000000";
    let mut background = "#ffffff";
    for incoming in &rules[..defaults_count] {
        if let Some(f) = incoming.font_style {
            font_style = f;
        }
        if let Some(c) = &incoming.foreground {
            foreground = c;
        }
        if let Some(c) = &incoming.background {
            background = c;
        }
    }
    let defaults = StyleAttributes {
        font_style: Some(font_style),
        foreground: color_map.get_id(Some(foreground))?,
        background: color_map.get_id(Some(background))?,
    };

    let mut root = ThemeTrieElement::new(ThemeTrieRule::new(0, None, None, 0, 0));
    for rule in &rules[defaults_count..] {
        root.insert(
            0,
            &rule.scope,
            rule.parent_scopes.as_deref(),
            rule.font_style,
            color_map.get_id(rule.foreground.as_deref())?,
            color_map.get_id(rule.background.as_deref())?,
        );
    }

    #[cfg(feature = "debug")]
    log::debug!(
        "[resolve_parsed_theme_rules] {} rules, {} colors",
        rules.len(),
        color_map.len()
    );

    Ok(Theme {
        name: None,
        color_map,
        defaults,
        root,
        cache: papaya::HashMap::new(),
    })
}
