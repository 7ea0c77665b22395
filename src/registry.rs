use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, VerniceResult};
use crate::grammars::{Grammar, GrammarOptions, GrammarRepository, RawGrammar};
use crate::highlight::{HighlightedText, Highlighter, MergingOptions};
use crate::themes::{RawTheme, Theme};

/// The default grammar name, where nothing is highlighted
pub const PLAIN_GRAMMAR_NAME: &str = "plain";

/// Options for highlighting by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightOptions<'a> {
    pub(crate) lang: &'a str,
    pub(crate) theme: &'a str,
    pub(crate) merge_whitespaces: bool,
    pub(crate) merge_same_style_tokens: bool,
    pub(crate) fallback_to_plain: bool,
}

impl<'a> HighlightOptions<'a> {
    /// `lang` is a grammar scope name, name or alias
    pub fn new(lang: &'a str, theme: &'a str) -> Self {
        Self {
            lang,
            theme,
            merge_whitespaces: true,
            merge_same_style_tokens: true,
            fallback_to_plain: false,
        }
    }

    /// Whitespace tokens are merged with the next non-ws tokens.
    pub fn merge_whitespace(mut self, value: bool) -> Self {
        self.merge_whitespaces = value;
        self
    }

    /// Merges tokens with the same style into a single token
    pub fn merge_same_style_tokens(mut self, value: bool) -> Self {
        self.merge_same_style_tokens = value;
        self
    }

    /// Whether to fallback to the plain grammar if the requested
    /// grammar is not found.
    pub fn fallback_to_plain(mut self, value: bool) -> Self {
        self.fallback_to_plain = value;
        self
    }
}

/// Highlighted code with language, theme, and tokens
#[derive(Debug, Clone)]
pub struct HighlightedCode<'a> {
    /// Scope name of the grammar used
    pub language: &'a str,
    pub theme: &'a Theme,
    /// The generated tokens. Each line is a Vector
    pub tokens: Vec<Vec<HighlightedText>>,
}

#[inline]
pub(crate) fn normalize_string(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// Holds the raw grammars and the themes.
///
/// Grammars are compiled the first time they are asked for, with the registry as the
/// repository for the grammars they include or that inject into them. Adding a grammar
/// afterwards drops every compiled grammar since any of them might include it.
pub struct Registry {
    // scope name -> raw grammar
    raw_grammars: HashMap<String, Arc<RawGrammar>>,
    // grammar name or alias -> scope name
    scope_by_name: HashMap<String, String>,
    // scope name -> scope names of the grammars with it in their `injectTo`
    // Most grammars don't have any
    injectors: HashMap<String, Vec<String>>,
    // name given by user -> theme
    themes: HashMap<String, Arc<Theme>>,
    compiled: papaya::HashMap<String, Arc<Grammar>>,
    options: GrammarOptions,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(GrammarOptions::default())
    }
}

impl Registry {
    /// `options` are used for every grammar compiled by this registry
    pub fn new(options: GrammarOptions) -> Self {
        Self {
            raw_grammars: HashMap::new(),
            scope_by_name: HashMap::new(),
            injectors: HashMap::new(),
            themes: HashMap::new(),
            compiled: papaya::HashMap::new(),
            options,
        }
    }

    /// Adds a grammar, replacing any grammar with the same scope name.
    pub fn add_grammar(&mut self, raw_grammar: RawGrammar) {
        let scope_name = raw_grammar.scope_name.clone();

        for injectors in self.injectors.values_mut() {
            injectors.retain(|s| s != &scope_name);
        }
        for target in &raw_grammar.inject_to {
            self.injectors
                .entry(target.clone())
                .or_default()
                .push(scope_name.clone());
        }
        if let Some(name) = &raw_grammar.name {
            self.scope_by_name.insert(name.clone(), scope_name.clone());
        }

        #[cfg(feature = "debug")]
        log::debug!("[registry] adding grammar {scope_name}");

        self.raw_grammars.insert(scope_name, Arc::new(raw_grammar));
        self.compiled = papaya::HashMap::new();
    }

    /// Reads the file and add it as a grammar.
    pub fn add_grammar_from_path(&mut self, path: impl AsRef<Path>) -> VerniceResult<()> {
        let raw_grammar = RawGrammar::load_from_file(path)?;
        self.add_grammar(raw_grammar);
        Ok(())
    }

    /// Adds an empty grammar that will not match any token. Useful as a fallback if the grammar is not found.
    ///
    /// It will get the `plain` grammar name.
    pub fn add_plain_grammar(&mut self, aliases: &[&str]) {
        self.add_grammar(RawGrammar {
            name: Some(PLAIN_GRAMMAR_NAME.to_owned()),
            scope_name: PLAIN_GRAMMAR_NAME.to_owned(),
            ..Default::default()
        });
        for alias in aliases {
            self.add_alias(PLAIN_GRAMMAR_NAME, alias);
        }
    }

    /// Adds an alias for the given grammar, known by its name, scope name or another alias
    pub fn add_alias(&mut self, grammar_name: &str, alias: &str) {
        if let Some(scope_name) = self.resolve_scope(grammar_name) {
            let scope_name = scope_name.to_owned();
            self.scope_by_name.insert(alias.to_string(), scope_name);
        }
    }

    /// Adds a theme under the given name
    pub fn add_theme(&mut self, name: &str, raw_theme: &RawTheme) -> VerniceResult<()> {
        let theme = Theme::from_raw(raw_theme)?;
        self.themes.insert(name.to_string(), Arc::new(theme));
        Ok(())
    }

    /// Reads the file and add it as a theme, named after its `name` field or the file
    /// name if it doesn't have one.
    pub fn add_theme_from_path(&mut self, path: impl AsRef<Path>) -> VerniceResult<()> {
        let path = path.as_ref();
        let raw_theme = RawTheme::load_from_file(path)?;
        let name = match &raw_theme.name {
            Some(name) => name.clone(),
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        self.add_theme(&name, &raw_theme)
    }

    fn resolve_scope<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if self.raw_grammars.contains_key(name) {
            return Some(name);
        }
        self.scope_by_name.get(name).map(String::as_str)
    }

    /// Checks whether the given lang is available in the registry with its scope name,
    /// grammar name or aliases
    pub fn contains_grammar(&self, name: &str) -> bool {
        self.resolve_scope(name).is_some()
    }

    /// Checks whether the given theme is available in the registry
    pub fn contains_theme(&self, name: &str) -> bool {
        self.themes.contains_key(name)
    }

    /// The compiled grammar for a scope name, grammar name or alias.
    /// It is compiled on first use and shared afterwards.
    pub fn grammar(&self, name: &str) -> VerniceResult<Arc<Grammar>> {
        let scope_name = self
            .resolve_scope(name)
            .ok_or_else(|| Error::GrammarNotFound(name.to_string()))?;
        let raw = self
            .raw_grammars
            .get(scope_name)
            .ok_or_else(|| Error::GrammarNotFound(name.to_string()))?;

        let compiled = self.compiled.pin();
        let grammar = compiled.get_or_insert_with(scope_name.to_owned(), || {
            Arc::new(Grammar::new(Arc::clone(raw), Some(self), self.options))
        });
        Ok(Arc::clone(grammar))
    }

    /// The theme added under that name
    pub fn theme(&self, name: &str) -> VerniceResult<Arc<Theme>> {
        self.themes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ThemeNotFound(name.to_string()))
    }

    /// Tokenizes `content` and resolves the style of every token.
    ///
    /// This returns the raw output of the tokenizer + theme matching, rendering it is up
    /// to the caller.
    pub fn highlight<'a>(
        &'a self,
        content: &str,
        options: HighlightOptions<'a>,
    ) -> VerniceResult<HighlightedCode<'a>> {
        let lang = if !self.contains_grammar(options.lang)
            && options.fallback_to_plain
            && self.contains_grammar(PLAIN_GRAMMAR_NAME)
        {
            PLAIN_GRAMMAR_NAME
        } else {
            options.lang
        };
        let grammar = self.grammar(lang)?;
        let theme = self
            .themes
            .get(options.theme)
            .ok_or_else(|| Error::ThemeNotFound(options.theme.to_string()))?;

        let merging_options = MergingOptions {
            merge_whitespaces: options.merge_whitespaces,
            merge_same_style_tokens: options.merge_same_style_tokens,
        };
        let mut highlighter = Highlighter::new(theme);
        let tokens = highlighter.highlight(&grammar, content, merging_options)?;

        let language = self
            .resolve_scope(lang)
            .ok_or_else(|| Error::GrammarNotFound(lang.to_string()))?;
        Ok(HighlightedCode {
            language,
            theme,
            tokens,
        })
    }
}

impl GrammarRepository for Registry {
    fn lookup(&self, scope_name: &str) -> Option<Arc<RawGrammar>> {
        self.raw_grammars.get(scope_name).cloned()
    }

    fn injections(&self, scope_name: &str) -> Vec<String> {
        self.injectors.get(scope_name).cloned().unwrap_or_default()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut grammars: Vec<_> = self.raw_grammars.keys().collect();
        grammars.sort();
        let mut themes: Vec<_> = self.themes.keys().collect();
        themes.sort();
        f.debug_struct("Registry")
            .field("grammars", &grammars)
            .field("themes", &themes)
            .field("compiled", &self.compiled.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use insta::assert_snapshot;

    use super::*;
    use crate::themes::FontStyle;
    use crate::tokenizer::Token;

    const OUTER: &str = r#"{
        "name": "Outer",
        "scopeName": "source.outer",
        "patterns": [
            {"begin": "<<", "end": ">>", "name": "meta.embedded", "patterns": [{"include": "source.inner"}]},
            {"match": "\\bfn\\b", "name": "keyword.outer"}
        ]
    }"#;

    const INNER: &str = r#"{
        "name": "Inner",
        "scopeName": "source.inner",
        "patterns": [{"match": "\\d+", "name": "constant.numeric"}]
    }"#;

    const TODO: &str = r#"{
        "scopeName": "todo.injection",
        "injectionSelector": "L:meta.embedded",
        "injectTo": ["source.outer"],
        "patterns": [{"match": "TODO", "name": "keyword.todo"}]
    }"#;

    const THEME: &str = r##"{
        "name": "Test",
        "tokenColors": [
            {"settings": {"foreground": "#111111", "background": "#eeeeee"}},
            {"scope": "keyword", "settings": {"foreground": "#ff0000", "fontStyle": "bold"}},
            {"scope": "meta.embedded constant", "settings": {"foreground": "#00ff00"}}
        ]
    }"##;

    fn get_registry() -> Registry {
        let mut registry = Registry::default();
        for json in [OUTER, INNER, TODO] {
            registry.add_grammar(RawGrammar::from_json(json).unwrap());
        }
        registry
            .add_theme("test", &RawTheme::from_json(THEME).unwrap())
            .unwrap();
        registry
    }

    fn format_tokens(line: &str, tokens: &[Token]) -> String {
        tokens
            .iter()
            .map(|t| format!("{:?}={}", &line[t.span.clone()], t.scopes.join(" ")))
            .collect::<Vec<_>>()
            .join("|")
    }

    fn format_highlighted_tokens(highlighted_tokens: &[Vec<HighlightedText>]) -> String {
        let mut result = String::new();

        for line_tokens in highlighted_tokens {
            for token in line_tokens {
                let style = &token.style;
                let font_style_abbr = if style.font_style.is_empty() {
                    String::new()
                } else {
                    format!("[{}]", style.font_style)
                };
                result.push_str(&format!(
                    "{:<10}{}{:?}\n",
                    style.foreground.as_hex(),
                    font_style_abbr,
                    token.text
                ));
            }
        }

        result
    }

    #[test]
    fn can_look_up_grammars_by_name_scope_or_alias() {
        let mut registry = get_registry();
        registry.add_alias("Outer", "out");

        assert!(registry.contains_grammar("source.outer"));
        assert!(registry.contains_grammar("Outer"));
        assert!(registry.contains_grammar("out"));
        assert!(!registry.contains_grammar("source.nope"));
        assert!(registry.contains_theme("test"));
        assert!(!registry.contains_theme("nope"));

        let grammar = registry.grammar("out").unwrap();
        assert_eq!(grammar.scope_name(), "source.outer");
        assert!(matches!(
            registry.grammar("source.nope"),
            Err(Error::GrammarNotFound(name)) if name == "source.nope"
        ));
        assert!(matches!(
            registry.theme("nope"),
            Err(Error::ThemeNotFound(name)) if name == "nope"
        ));
    }

    #[test]
    fn compiles_grammars_once() {
        let mut registry = get_registry();
        let first = registry.grammar("source.outer").unwrap();
        let second = registry.grammar("Outer").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // a new grammar might be included by a compiled one
        registry.add_grammar(RawGrammar::from_json(INNER).unwrap());
        let third = registry.grammar("source.outer").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn resolves_other_grammars_and_injections() {
        let registry = get_registry();
        let grammar = registry.grammar("source.outer").unwrap();
        let line = "fn << 42 TODO >> TODO";
        let (tokens, _) = grammar
            .tokenize_line(line, &grammar.initial_state())
            .unwrap();
        assert_snapshot!(
            format_tokens(line, &tokens),
            @r#""fn"=keyword.outer|" "=|"<<"=meta.embedded|" "=meta.embedded|"42"=meta.embedded constant.numeric|" "=meta.embedded|"TODO"=meta.embedded keyword.todo|" "=meta.embedded|">>"=meta.embedded|" TODO"="#
        );
    }

    #[test]
    fn injections_follow_inject_to() {
        let registry = get_registry();
        assert_eq!(registry.injections("source.outer"), vec!["todo.injection"]);
        assert!(registry.injections("source.inner").is_empty());
        assert!(registry.lookup("source.inner").is_some());
        assert!(registry.lookup("source.nope").is_none());
    }

    #[test]
    fn can_highlight() {
        let registry = get_registry();
        let highlighted = registry
            .highlight("fn <<1>>\r\nfn", HighlightOptions::new("Outer", "test"))
            .unwrap();

        assert_eq!(highlighted.language, "source.outer");
        assert_eq!(highlighted.theme.name(), Some("Test"));
        assert_eq!(highlighted.tokens[0][0].style.font_style, FontStyle::BOLD);
        assert_snapshot!(format_highlighted_tokens(&highlighted.tokens), @r#"
        #FF0000   [bold]"fn"
        #111111   " <<"
        #00FF00   "1"
        #111111   ">>"
        #FF0000   [bold]"fn"
        "#);
    }

    #[test]
    fn can_fallback_to_plain() {
        let mut registry = get_registry();
        let options = HighlightOptions::new("nope", "test");
        assert!(matches!(
            registry.highlight("fn", options),
            Err(Error::GrammarNotFound(_))
        ));

        registry.add_plain_grammar(&["txt"]);
        let highlighted = registry
            .highlight("fn", options.fallback_to_plain(true))
            .unwrap();
        assert_eq!(highlighted.language, PLAIN_GRAMMAR_NAME);
        assert_eq!(highlighted.tokens[0].len(), 1);
        assert_eq!(highlighted.tokens[0][0].text, "fn");
        assert!(registry.contains_grammar("txt"));
    }

    #[test]
    fn can_load_from_files() {
        let dir = std::env::temp_dir().join(format!("vernice-registry-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let grammar_path = dir.join("inner.json");
        let theme_path = dir.join("unnamed-theme.json");
        fs::write(&grammar_path, INNER).unwrap();
        fs::write(&theme_path, r##"{"settings": [{"settings": {"foreground": "#123456"}}]}"##)
            .unwrap();

        let mut registry = Registry::default();
        registry.add_grammar_from_path(&grammar_path).unwrap();
        registry.add_theme_from_path(&theme_path).unwrap();
        assert!(registry.contains_grammar("Inner"));
        assert!(registry.contains_theme("unnamed-theme"));
        assert!(matches!(
            registry.add_grammar_from_path(dir.join("missing.json")),
            Err(Error::Io(_))
        ));

        fs::remove_dir_all(&dir).unwrap();
    }
}
