use std::collections::HashMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::VerniceResult;
use crate::grammars::Grammar;
use crate::registry::normalize_string;
use crate::themes::{Style, StyleAttributes, Theme};
use crate::tokenizer::Token;

/// A token with associated styling information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightedText {
    pub text: String,
    pub style: Style,
}

/// Options for token merging behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergingOptions {
    pub merge_whitespaces: bool,
    pub merge_same_style_tokens: bool,
}

impl Default for MergingOptions {
    fn default() -> Self {
        Self {
            merge_whitespaces: true,
            merge_same_style_tokens: true,
        }
    }
}

/// Highlighter that applies theme styles to tokenized code
#[derive(Debug)]
pub struct Highlighter<'r> {
    theme: &'r Theme,
    cache: HashMap<Vec<String>, Style>,
}

impl<'r> Highlighter<'r> {
    pub fn new(theme: &'r Theme) -> Self {
        Highlighter {
            theme,
            cache: HashMap::new(),
        }
    }

    /// The style of a scope path, outermost scope first
    pub fn match_scopes(&mut self, scopes: &[String]) -> Style {
        if let Some(&cached_style) = self.cache.get(scopes) {
            return cached_style;
        }

        let style = self.theme.style(self.theme.match_scope_path(scopes));
        self.cache.insert(scopes.to_vec(), style);
        style
    }

    /// Tokenizes and highlights `content` line by line
    pub fn highlight(
        &mut self,
        grammar: &Grammar,
        content: &str,
        options: MergingOptions,
    ) -> VerniceResult<Vec<Vec<HighlightedText>>> {
        let normalized = normalize_string(content);
        let tokens = grammar.tokenize_lines(&normalized)?;
        Ok(self.highlight_tokens(&normalized, tokens, options))
    }

    /// Apply highlighting to tokenized lines, preserving line structure.
    pub fn highlight_tokens(
        &mut self,
        content: &str,
        tokens: Vec<Vec<Token>>,
        options: MergingOptions,
    ) -> Vec<Vec<HighlightedText>> {
        let mut result = Vec::with_capacity(tokens.len());
        let default_style = self.theme.style(StyleAttributes::default());

        for (line_tokens, line) in tokens.into_iter().zip(content.split('\n')) {
            let mut line_result = line_tokens
                .into_iter()
                .filter(|t| !t.span.is_empty())
                .map(|t| {
                    let style = self.match_scopes(&t.scopes);
                    (t.span, style)
                })
                .collect::<Vec<_>>();

            // first merge all ws by prepending to the next non-ws token
            if options.merge_whitespaces {
                let num_tokens = line_result.len();
                let mut merged = Vec::with_capacity(num_tokens);
                let mut carry_on_range: Option<Range<usize>> = None;

                for (idx, (span, style)) in line_result.into_iter().enumerate() {
                    let could_merge = !style.has_decorations();
                    let is_whitespace_with_next = could_merge
                        && line[span.clone()].chars().all(char::is_whitespace)
                        && idx + 1 < num_tokens;

                    if is_whitespace_with_next {
                        carry_on_range = Some(match carry_on_range {
                            Some(range) => range.start..span.end,
                            None => span,
                        });
                        continue;
                    }

                    match carry_on_range.take() {
                        Some(carried) if could_merge => merged.push((carried.start..span.end, style)),
                        Some(carried) => {
                            // The carried whitespace can't take an underline or strikethrough
                            merged.push((carried, default_style));
                            merged.push((span, style));
                        }
                        None => merged.push((span, style)),
                    }
                }

                line_result = merged;
            }

            // then merge same style tokens after we did the WS
            if options.merge_same_style_tokens {
                let mut merged: Vec<(Range<usize>, Style)> = Vec::with_capacity(line_result.len());

                for (span, style) in line_result {
                    match merged.last_mut() {
                        Some((prev_span, prev_style)) if style == *prev_style => {
                            prev_span.end = span.end;
                        }
                        _ => merged.push((span, style)),
                    }
                }

                line_result = merged;
            }

            result.push(
                line_result
                    .into_iter()
                    .map(|(span, style)| HighlightedText {
                        style,
                        text: line[span].to_string(),
                    })
                    .collect(),
            );
        }

        result
    }
}
