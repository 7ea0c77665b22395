//! TextMate grammar tokenization and theme resolution, following vscode-textmate.
//!
//! A [`Grammar`] turns lines of text into tokens carrying the scopes of the rules that
//! matched, threading a [`StateStack`] from one line to the next. A [`Theme`] resolves a
//! scope path to a style. The [`Registry`] holds both and wires grammars together for
//! includes and injections.

mod error;
pub mod grammars;
mod highlight;
mod registry;
mod scope;
pub mod themes;
pub mod tokenizer;

pub use error::Error;
pub use grammars::{Grammar, GrammarOptions, GrammarRepository, RawGrammar, RuleId};
pub use highlight::{HighlightedText, Highlighter, MergingOptions};
pub use registry::{HighlightOptions, HighlightedCode, PLAIN_GRAMMAR_NAME, Registry};
pub use scope::ScopeList;
pub use themes::{Color, ColorMap, FontStyle, RawTheme, Style, StyleAttributes, Theme};
pub use tokenizer::{StateStack, Token};
