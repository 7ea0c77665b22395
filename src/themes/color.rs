use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, VerniceResult};

/// Id of a color in a [`ColorMap`], `0` meaning unset.
pub type ColorId = u32;

/// RGBA color with 8-bit components
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct Color {
    pub(crate) r: u8,
    pub(crate) g: u8,
    pub(crate) b: u8,
    pub(crate) a: u8,
}

fn parse_hex_component(hex: &str, original: &str) -> VerniceResult<u8> {
    u8::from_str_radix(hex, 16).map_err(|_| Error::InvalidHexColor {
        value: original.to_string(),
        reason: format!("invalid hex component '{}'", hex),
    })
}

impl Color {
    pub const WHITE: Color = Color {
        r: 255,
        g: 255,
        b: 255,
        a: 255,
    };
    pub const BLACK: Color = Color {
        r: 0,
        g: 0,
        b: 0,
        a: 255,
    };

    /// Outputs the hex value for that colour.
    #[inline]
    pub fn as_hex(&self) -> String {
        if self.a < 255 {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        } else {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        }
    }

    /// Creates a Color from a `#RGB`, `#RGBA`, `#RRGGBB` or `#RRGGBBAA` string, case
    /// insensitive.
    ///
    /// Errors if the string is not a valid hex colour.
    pub fn from_hex(value: &str) -> VerniceResult<Self> {
        let Some(hex) = value.strip_prefix('#') else {
            return Err(Error::InvalidHexColor {
                value: value.to_string(),
                reason: "missing leading '#'".to_string(),
            });
        };
        if let Some(c) = hex.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(Error::InvalidHexColor {
                value: value.to_string(),
                reason: format!("invalid hex digit '{c}'"),
            });
        }

        match hex.len() {
            // #RGB format (e.g., #F00 for red)
            3 | 4 => {
                let mut components = [255; 4];
                for (i, component) in components.iter_mut().enumerate().take(hex.len()) {
                    // Convert 0xF to 0xFF
                    *component = parse_hex_component(&hex[i..i + 1], value)? * 17;
                }
                let [r, g, b, a] = components;
                Ok(Color { r, g, b, a })
            }
            // #RRGGBB format, with an alpha channel for #RRGGBBAA
            6 | 8 => {
                let mut components = [255; 4];
                for (i, component) in components.iter_mut().enumerate().take(hex.len() / 2) {
                    *component = parse_hex_component(&hex[i * 2..i * 2 + 2], value)?;
                }
                let [r, g, b, a] = components;
                Ok(Color { r, g, b, a })
            }
            _ => Err(Error::InvalidHexColor {
                value: value.to_string(),
                reason: format!("invalid length {}", hex.len()),
            }),
        }
    }
}

/// Whether a theme color can be used. Anything else is dropped from the theme.
pub fn is_valid_hex_color(value: &str) -> bool {
    Color::from_hex(value).is_ok()
}

/// Gives a small stable id to every color used by a theme.
///
/// Ids are given in first-seen order starting at 1 and colors are compared case
/// insensitively. A frozen map only knows the colors it was created with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorMap {
    frozen: bool,
    /// `id - 1` -> color, as first spelled
    colors: Vec<String>,
    ids: HashMap<String, ColorId>,
}

impl ColorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map that only accepts the given colors, with ids starting at 1 in that order
    pub fn frozen<S: AsRef<str>>(colors: &[S]) -> Self {
        let mut map = Self::new();
        for color in colors {
            map.insert(color.as_ref());
        }
        map.frozen = true;
        map
    }

    fn insert(&mut self, color: &str) -> ColorId {
        let key = color.to_ascii_uppercase();
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }
        self.colors.push(color.to_owned());
        let id = self.colors.len() as ColorId;
        self.ids.insert(key, id);
        id
    }

    /// The id of that color, giving it a new one if it's the first time we see it.
    /// `None` is always `0`.
    pub fn get_id(&mut self, color: Option<&str>) -> VerniceResult<ColorId> {
        let Some(color) = color else {
            return Ok(0);
        };
        if self.frozen {
            return self
                .ids
                .get(&color.to_ascii_uppercase())
                .copied()
                .ok_or_else(|| Error::MissingColor(color.to_owned()));
        }
        Ok(self.insert(color))
    }

    /// The color for that id, `None` for `0` and unknown ids
    pub fn get(&self, id: ColorId) -> Option<&str> {
        let index = (id as usize).checked_sub(1)?;
        self.colors.get(index).map(String::as_str)
    }

    /// Every (id, color) pair, by increasing id
    pub fn iter(&self) -> impl Iterator<Item = (ColorId, &str)> {
        self.colors
            .iter()
            .enumerate()
            .map(|(i, color)| (i as ColorId + 1, color.as_str()))
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}
