use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::VerniceResult;

/// The `scope` of a theme entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThemeScope {
    /// Comma separated selectors, eg `"source, meta.tag string"`
    Joined(String),
    /// One selector per item
    List(Vec<String>),
}

impl ThemeScope {
    /// The individual selectors, trimmed. Leading and trailing commas of a joined
    /// scope are ignored.
    pub fn selectors(&self) -> Vec<&str> {
        match self {
            ThemeScope::Joined(s) => s
                .trim_start_matches(',')
                .trim_end_matches(',')
                .split(',')
                .map(str::trim)
                .collect(),
            ThemeScope::List(items) => items.iter().map(|s| s.trim()).collect(),
        }
    }
}

/// Custom deserializer for scope field that can be string or array
fn deserialize_theme_scope<'de, D>(deserializer: D) -> Result<Option<ThemeScope>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ScopeVisitor;

    impl<'de> Visitor<'de> for ScopeVisitor {
        type Value = Option<ThemeScope>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("string or array of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(ThemeScope::Joined(value.to_owned())))
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                vec.push(item);
            }
            Ok(Some(ThemeScope::List(vec)))
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(ScopeVisitor)
}

/// Style of a theme entry, as written in the file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawThemeStyle {
    pub foreground: Option<String>,
    pub background: Option<String>,
    #[serde(rename = "fontStyle")]
    pub font_style: Option<String>,
}

/// One entry of the `settings` (tmTheme) or `tokenColors` (VS Code) array
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawThemeSetting {
    pub name: Option<String>,
    #[serde(deserialize_with = "deserialize_theme_scope", default)]
    pub scope: Option<ThemeScope>,
    /// Entries without settings are ignored
    pub settings: Option<RawThemeStyle>,
}

/// Editor colors of a VS Code theme, used as the default style when present
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Colors {
    pub foreground: Option<String>,
    pub background: Option<String>,
}

// Some themes have it as editor.foreground/background some don't have the editor. prefix
impl<'de> Deserialize<'de> for Colors {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ColorsVisitor;

        impl<'de> Visitor<'de> for ColorsVisitor {
            type Value = Colors;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("struct Colors")
            }

            fn visit_map<V>(self, mut map: V) -> Result<Colors, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut colors = Colors::default();

                while let Some(key) = map.next_key::<String>()? {
                    let slot = match key.as_str() {
                        "foreground" | "editor.foreground" => &mut colors.foreground,
                        "background" | "editor.background" => &mut colors.background,
                        _ => {
                            let _: de::IgnoredAny = map.next_value()?;
                            continue;
                        }
                    };
                    if slot.is_none() {
                        *slot = map.next_value()?;
                    } else {
                        // Skip the value if we already have one
                        let _: de::IgnoredAny = map.next_value()?;
                    }
                }

                Ok(colors)
            }
        }

        deserializer.deserialize_map(ColorsVisitor)
    }
}

/// Raw theme loaded from a JSON theme file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawTheme {
    pub name: Option<String>,
    #[serde(alias = "tokenColors", default)]
    pub settings: Vec<RawThemeSetting>,
    pub colors: Option<Colors>,
}

impl RawTheme {
    pub fn from_json(json: &str) -> VerniceResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> VerniceResult<Self> {
        let file = File::open(path)?;
        let theme = serde_json::from_reader(BufReader::new(file))?;
        Ok(theme)
    }
}
