use std::fmt;
use std::io;

use crate::grammars::RuleId;

pub(crate) type VerniceResult<T> = Result<T, Error>;

/// Errors that can occur during vernice usage
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar or theme file
    Io(io::Error),

    /// JSON parsing failed when loading a grammar or a theme.
    Json(serde_json::Error),

    /// A rule pattern is not a valid regex.
    /// Patterns are compiled lazily so this surfaces on the first line that needs the rule,
    /// not when the grammar is loaded.
    GrammarCompile { pattern: String, message: String },

    /// A rule id that was never registered was looked up.
    UnknownRule(RuleId),

    /// A grammar was not found in the registry.
    GrammarNotFound(String),

    /// A theme was not found in the registry.
    ThemeNotFound(String),

    /// An invalid hex color was encountered when parsing it explicitly.
    /// Invalid colors in themes are dropped instead.
    #[allow(missing_docs)]
    InvalidHexColor { value: String, reason: String },

    /// A frozen color map was asked for a color it doesn't know about.
    MissingColor(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            Error::GrammarCompile { pattern, message } => {
                write!(f, "invalid regex '{}': {}", pattern, message)
            }
            Error::UnknownRule(id) => write!(f, "unknown rule id {}", id.0),
            Error::GrammarNotFound(name) => write!(f, "grammar '{}' not found", name),
            Error::ThemeNotFound(name) => write!(f, "theme '{}' not found", name),
            Error::InvalidHexColor { value, reason } => {
                write!(f, "invalid hex color '{}': {}", value, reason)
            }
            Error::MissingColor(color) => {
                write!(f, "missing color '{}' in a frozen color map", color)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::GrammarCompile { .. }
            | Error::UnknownRule(_)
            | Error::GrammarNotFound(_)
            | Error::ThemeNotFound(_)
            | Error::InvalidHexColor { .. }
            | Error::MissingColor(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
