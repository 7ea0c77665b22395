mod color;
mod compiled;
mod font_style;
mod parse;
mod raw;
mod selector;
mod trie;

pub use color::{Color, ColorId, ColorMap, is_valid_hex_color};
pub use compiled::{Style, StyleAttributes, Theme, resolve_parsed_theme_rules};
pub use font_style::FontStyle;
pub use parse::{ParsedThemeRule, parse_theme};
pub use raw::{Colors, RawTheme, RawThemeSetting, RawThemeStyle, ThemeScope};
pub use selector::{Parent, ThemeSelector, parse_selector};
pub use trie::{ThemeTrieElement, ThemeTrieRule};
