use std::fmt;

use serde::{Deserialize, Serialize};

/// Additive font style bitmask. A theme entry without a `fontStyle` is represented
/// as `None` where it matters, not as an empty set.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Debug,
)]
pub struct FontStyle {
    bits: u8,
}

impl FontStyle {
    /// Italic font style
    pub const ITALIC: Self = Self { bits: 1 };
    /// Bold font style
    pub const BOLD: Self = Self { bits: 2 };
    /// Underline font style
    pub const UNDERLINE: Self = Self { bits: 4 };
    /// Strikethrough font style
    pub const STRIKETHROUGH: Self = Self { bits: 8 };

    /// Returns an empty set of flags
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Returns `true` if no flags are currently stored
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Returns `true` if all of the flags in `other` are contained within `self`
    pub const fn contains(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    pub const fn bits(&self) -> u8 {
        self.bits
    }

    /// Parses a theme `fontStyle` string such as `"bold italic"`.
    /// Unknown words (`normal`, `regular`...) are ignored so `""` and `"normal"` are
    /// both an explicit empty style.
    pub fn parse(font_style_str: &str) -> Self {
        let mut font_style = Self::empty();
        for segment in font_style_str.split_whitespace() {
            match segment {
                "italic" => font_style.insert(FontStyle::ITALIC),
                "bold" => font_style.insert(FontStyle::BOLD),
                "underline" => font_style.insert(FontStyle::UNDERLINE),
                "strikethrough" => font_style.insert(FontStyle::STRIKETHROUGH),
                _ => (),
            }
        }
        font_style
    }

    /// Inserts the specified flags in-place
    pub fn insert(&mut self, other: Self) {
        self.bits |= other.bits;
    }
}

impl std::ops::BitOr for FontStyle {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            bits: self.bits | rhs.bits,
        }
    }
}

impl fmt::Display for FontStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names = [
            (FontStyle::ITALIC, "italic"),
            (FontStyle::BOLD, "bold"),
            (FontStyle::UNDERLINE, "underline"),
            (FontStyle::STRIKETHROUGH, "strikethrough"),
        ];
        let words: Vec<_> = names
            .into_iter()
            .filter(|(style, _)| self.contains(*style))
            .map(|(_, name)| name)
            .collect();
        write!(f, "{}", words.join(" "))
    }
}
