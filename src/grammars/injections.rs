//! TextMate grammar injection selector parsing and matching.

use std::sync::LazyLock;

use onig::Regex;

use crate::grammars::RuleId;
use crate::scope::scope_matches;

/// `L:` injections win over the grammar's own patterns when both match at the same
/// position, `R:` ones are tried after the other injections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum InjectionPrecedence {
    /// `L:` prefix
    Left = -1,
    #[default]
    Normal = 0,
    /// `R:` prefix
    Right = 1,
}

/// Selector matcher that can evaluate against scope paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorMatcher {
    /// Scopes that must appear in that order in the path, not necessarily contiguous
    Path(Vec<String>),
    /// All matchers must succeed (space-separated groups)
    And(Vec<SelectorMatcher>),
    /// Any matcher can succeed (`|` or `,` separated)
    Or(Vec<SelectorMatcher>),
    /// Matcher must NOT succeed (`-` prefix)
    Not(Box<SelectorMatcher>),
}

impl SelectorMatcher {
    /// `scopes` is the path from the root to the innermost scope
    pub fn matches(&self, scopes: &[&str]) -> bool {
        match self {
            SelectorMatcher::Path(selectors) => path_matches(selectors, scopes),
            SelectorMatcher::And(matchers) => matchers.iter().all(|m| m.matches(scopes)),
            SelectorMatcher::Or(matchers) => matchers.iter().any(|m| m.matches(scopes)),
            SelectorMatcher::Not(matcher) => !matcher.matches(scopes),
        }
    }
}

fn path_matches(selectors: &[String], scopes: &[&str]) -> bool {
    if scopes.len() < selectors.len() {
        return false;
    }
    let mut remaining = scopes.iter();
    selectors
        .iter()
        .all(|selector| remaining.any(|scope| scope_matches(selector, scope)))
}

/// A compiled injection selector matcher with priority
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledInjectionMatcher {
    pub matcher: SelectorMatcher,
    pub priority: InjectionPrecedence,
}

/// A rule applied wherever its selector matches the current scopes
#[derive(Debug, Clone)]
pub struct Injection {
    pub rule_id: RuleId,
    pub matcher: SelectorMatcher,
    pub priority: InjectionPrecedence,
    /// The selector as written in the grammar
    pub debug_selector: String,
}

impl Injection {
    pub fn matches(&self, scopes: &[&str]) -> bool {
        self.matcher.matches(scopes)
    }
}

/// Regex for tokenizing injection selectors (vscode-textmate's with `*` allowed in names)
static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([LR]:|[\w.:][\w*.:\-]*|[,|\-()])").expect("Invalid selector regex")
});

fn is_identifier(s: &str) -> bool {
    if s.is_empty() || s == "-" {
        return false;
    }

    s.chars().all(|c| {
        c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == ':' || c == '-' || c == '*'
    })
}

fn parse_inner_expression(tokens: &[&str], position: &mut usize) -> Option<SelectorMatcher> {
    let mut out = Vec::new();
    while let Some(m) = parse_conjunction(tokens, position) {
        if !out.contains(&m) {
            out.push(m);
        }
        if *position < tokens.len() && matches!(tokens[*position], "|" | ",") {
            *position += 1;
        } else {
            break;
        }
    }

    match out.len() {
        0 => None,
        1 => out.pop(),
        _ => Some(SelectorMatcher::Or(out)),
    }
}

fn parse_operand(tokens: &[&str], position: &mut usize) -> Option<SelectorMatcher> {
    if *position >= tokens.len() {
        return None;
    }

    match tokens[*position] {
        "-" => {
            *position += 1;
            let negated = parse_operand(tokens, position)?;
            Some(SelectorMatcher::Not(Box::new(negated)))
        }
        "(" => {
            *position += 1;
            let inner = parse_inner_expression(tokens, position);
            if *position < tokens.len() && tokens[*position] == ")" {
                *position += 1;
            }
            inner
        }
        _ => {
            let mut scopes = Vec::new();

            while *position < tokens.len() && is_identifier(tokens[*position]) {
                let token = tokens[*position];
                // `meta.tag.*.html` only keeps what comes before the wildcard
                let scope = match token.find(".*") {
                    Some(pos) => token[..pos].trim_end_matches('.'),
                    None => token,
                };
                scopes.push(scope.to_owned());
                *position += 1;
            }

            if scopes.is_empty() {
                None
            } else {
                Some(SelectorMatcher::Path(scopes))
            }
        }
    }
}

fn parse_conjunction(tokens: &[&str], position: &mut usize) -> Option<SelectorMatcher> {
    let mut matchers = Vec::new();

    while let Some(m) = parse_operand(tokens, position) {
        matchers.push(m);
    }

    match matchers.len() {
        0 => None,
        1 => matchers.pop(),
        _ => Some(SelectorMatcher::And(matchers)),
    }
}

/// Parse injection selector string into compiled matchers
pub fn parse_injection_selector(selector: &str) -> Vec<CompiledInjectionMatcher> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Vec::new();
    }

    let tokens: Vec<_> = TOKEN_REGEX
        .find_iter(selector)
        .map(|(start, end)| &selector[start..end])
        .collect();
    let mut position = 0;
    let mut res = Vec::new();

    let mut priority = InjectionPrecedence::Normal;
    while position < tokens.len() {
        match tokens[position] {
            "L:" => {
                priority = InjectionPrecedence::Left;
                position += 1;
                continue;
            }
            "R:" => {
                priority = InjectionPrecedence::Right;
                position += 1;
                continue;
            }
            _ => (),
        };

        let Some(matcher) = parse_conjunction(&tokens, &mut position) else {
            break;
        };
        res.push(CompiledInjectionMatcher { matcher, priority });
        priority = InjectionPrecedence::Normal;
        if position < tokens.len() && tokens[position] == "," {
            position += 1;
        } else {
            break;
        }
    }

    res
}
