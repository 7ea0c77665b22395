mod anchors;
mod compiled;
mod factory;
mod grammar;
mod injections;
mod pattern_set;
mod raw;
mod regex;

pub use anchors::AnchorActive;
pub use compiled::*;
pub use grammar::{Grammar, GrammarOptions, GrammarRepository};
pub use injections::{Injection, InjectionPrecedence, SelectorMatcher, parse_injection_selector};
pub use pattern_set::{CompiledRule, RegExpSourceList, ScanMatch};
pub use raw::{RawCaptures, RawGrammar, RawRepository, RawRule};
pub use regex::{
    CaptureIndices, RegExpSource, escape_regexp_characters, has_captures, replace_captures,
    resolve_back_references,
};
