//! This file replicates the logic of <https://github.com/microsoft/vscode-textmate>

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::VerniceResult;
use crate::grammars::{
    AnchorActive, CaptureIndices, END_RULE_ID, Grammar, NO_RULE, Rule, RuleId, WHILE_RULE_ID,
};
use crate::scope::ScopeList;

mod matching;
mod stack;

use matching::{match_rule_or_injections, search};
pub use stack::StateStack;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Byte span within the line (start inclusive, end exclusive, 0-based)
    pub span: Range<usize>,
    /// Hierarchical scope names, ordered from outermost to innermost
    /// (e.g., source.js -> string.quoted.double -> punctuation.definition.string).
    pub scopes: Vec<String>,
}

impl Token {
    pub fn start(&self) -> usize {
        self.span.start
    }
}

/// Small wrapper so we make we only produce valid tokens.
/// Called in the tokenizer a few times and easier to use a struct than pass
/// mutable vec and usize everywhere
#[derive(Debug, Clone, Default)]
struct TokenAccumulator {
    tokens: Vec<Token>,
    /// Position up to which tokens have been generated
    /// (start of next token to be produced)
    last_end_pos: usize,
}

impl TokenAccumulator {
    fn produce(&mut self, end_pos: usize, scopes: &ScopeList) {
        // Skip empty tokens (can happen with zero-width matches)
        if self.last_end_pos >= end_pos {
            return;
        }

        #[cfg(feature = "debug")]
        log::debug!("[produce]: [{}..{end_pos}] {scopes}", self.last_end_pos);
        self.tokens.push(Token {
            span: self.last_end_pos..end_pos,
            scopes: scopes.to_vec(),
        });
        self.last_end_pos = end_pos;
    }

    /// Same as LineTokens.getResult in vscode-textmate: the token of the added newline
    /// is dropped and there is always at least one token.
    /// `line_len` includes the newline.
    fn finalize(mut self, stack: &StateStack, line_len: usize) -> Vec<Token> {
        if let Some(tok) = self.tokens.last()
            && tok.span.start == line_len - 1
        {
            self.tokens.pop();
        }

        if self.tokens.is_empty() {
            self.last_end_pos = 0;
            self.produce(line_len, stack.content_name_scopes());
        }

        // The newline is not part of the line given to us
        if let Some(t) = self.tokens.last_mut()
            && t.span.end == line_len
        {
            t.span.end -= 1;
        }
        self.tokens
    }
}

/// Where scanning starts once the while conditions are checked
struct WhileCheck {
    stack: StateStack,
    pos: usize,
    anchor_position: Option<usize>,
    is_first_line: bool,
}

/// Check that the while pattern of every BeginWhile rule on the stack still matches,
/// outermost first. The first one failing is popped with everything above it.
fn check_while_conditions(
    grammar: &Grammar,
    text: &str,
    mut is_first_line: bool,
    mut pos: usize,
    stack: StateStack,
    acc: &mut TokenAccumulator,
) -> VerniceResult<WhileCheck> {
    let mut anchor_position = stack.begin_rule_captured_eol().then_some(0);

    let mut while_frames = Vec::new();
    for frame in stack.frames() {
        let rule = frame.rule(grammar)?;
        if matches!(rule, Rule::BeginWhile(_)) {
            while_frames.push((frame.clone(), rule));
        }
    }

    if while_frames.is_empty() {
        return Ok(WhileCheck {
            stack,
            pos,
            anchor_position,
            is_first_line,
        });
    }

    let mut stack = stack;
    for (frame, rule) in while_frames.into_iter().rev() {
        let Rule::BeginWhile(begin_while) = rule else {
            continue;
        };
        let anchors = AnchorActive::at(is_first_line, anchor_position, pos);
        let found = rule
            .compile_while_ag(frame.end_rule(), anchors)?
            .and_then(|scanner| search(grammar, &scanner, text, pos));

        match found {
            Some(m) if m.rule_id == WHILE_RULE_ID => {
                #[cfg(feature = "debug")]
                log::debug!(
                    "[check_while_conditions] while of rule {} still matches at {}",
                    frame.rule_id().0,
                    m.start()
                );
                acc.produce(m.start(), frame.content_name_scopes());
                handle_captures(
                    grammar,
                    text,
                    is_first_line,
                    &frame,
                    acc,
                    &begin_while.while_captures,
                    &m.capture_indices,
                )?;
                acc.produce(m.end(), frame.content_name_scopes());
                anchor_position = Some(m.end());
                if m.end() > pos {
                    pos = m.end();
                    is_first_line = false;
                }
            }
            _ => {
                #[cfg(feature = "debug")]
                log::debug!(
                    "[check_while_conditions] no while match for rule {}, popping",
                    frame.rule_id().0
                );
                stack = frame.pop();
                break;
            }
        }
    }

    Ok(WhileCheck {
        stack,
        pos,
        anchor_position,
        is_first_line,
    })
}

/// Assigns scopes to the capture groups of a match.
///
/// Captures are nested: a group ending before the next one starts is closed first,
/// a group with patterns gets its text tokenized again with them.
fn handle_captures(
    grammar: &Grammar,
    text: &str,
    is_first_line: bool,
    stack: &StateStack,
    acc: &mut TokenAccumulator,
    captures: &[Option<RuleId>],
    capture_indices: &CaptureIndices,
) -> VerniceResult<()> {
    if captures.is_empty() {
        return Ok(());
    }

    let max_end = capture_indices
        .first()
        .copied()
        .flatten()
        .map_or(0, |(_, end)| end);
    // (scopes, end_pos)[]
    let mut local_stack: Vec<(ScopeList, usize)> = Vec::with_capacity(2);

    for (rule_id, capture) in captures.iter().zip(capture_indices) {
        let Some(rule_id) = rule_id else {
            continue;
        };
        let Some((cap_start, cap_end)) = *capture else {
            continue;
        };
        // Nothing captured
        if cap_start == cap_end {
            continue;
        }
        // Capture going beyond the consumed text
        if cap_start > max_end {
            break;
        }

        // pop captures while needed
        while let Some((scopes, end_pos)) = local_stack.last()
            && *end_pos <= cap_start
        {
            acc.produce(*end_pos, scopes);
            local_stack.pop();
        }

        match local_stack.last() {
            Some((scopes, _)) => acc.produce(cap_start, scopes),
            None => acc.produce(cap_start, stack.content_name_scopes()),
        }

        let Rule::Capture(capture_rule) = grammar.get_rule(*rule_id)? else {
            continue;
        };
        let name = capture_rule.names.name(text, capture_indices);

        if capture_rule.retokenize_captured_with_rule_id != NO_RULE {
            let name_scopes = stack.content_name_scopes().push(name.as_deref());
            let content_name = capture_rule.names.content_name(text, capture_indices);
            let content_name_scopes = name_scopes.push(content_name.as_deref());
            let retokenize_stack = stack.push(
                capture_rule.retokenize_captured_with_rule_id,
                Some(cap_start),
                None,
                false,
                None,
                name_scopes,
                content_name_scopes,
            );
            #[cfg(feature = "debug")]
            log::debug!("[handle_captures] Retokenizing capture at [{cap_start}..{cap_end}]");
            tokenize_string(
                grammar,
                text.get(..cap_end).unwrap_or(text),
                is_first_line && cap_start == 0,
                cap_start,
                retokenize_stack,
                acc,
                false,
            )?;
            continue;
        }

        if let Some(name) = name {
            let base = local_stack
                .last()
                .map_or(stack.content_name_scopes(), |(scopes, _)| scopes);
            let scopes = base.push(Some(&name));
            local_stack.push((scopes, cap_end));
        }
    }

    while let Some((scopes, end_pos)) = local_stack.pop() {
        acc.produce(end_pos, &scopes);
    }

    Ok(())
}

/// Moves one character forward, when a rule matched without consuming anything and
/// would otherwise match again at the same place forever
fn force_advance(text: &str, pos: usize) -> usize {
    text.get(pos..)
        .and_then(|rest| rest.chars().next())
        .map_or(text.len(), |c| pos + c.len_utf8())
}

/// Tokenizes `text` from `pos`, pushing the tokens to `acc` and returning the state at the
/// end of it.
fn tokenize_string(
    grammar: &Grammar,
    text: &str,
    mut is_first_line: bool,
    mut pos: usize,
    mut stack: StateStack,
    acc: &mut TokenAccumulator,
    check_while: bool,
) -> VerniceResult<StateStack> {
    let line_len = text.len();
    let mut anchor_position = None;

    // 1. We check if the while pattern is still truthy
    if check_while {
        let res = check_while_conditions(grammar, text, is_first_line, pos, stack, acc)?;
        stack = res.stack;
        pos = res.pos;
        anchor_position = res.anchor_position;
        is_first_line = res.is_first_line;
    }

    // 2. We check for any matching patterns
    loop {
        #[cfg(feature = "debug")]
        log::trace!("[tokenize_string] Scanning {pos}: |{:?}|", text.get(pos..));

        let Some(m) =
            match_rule_or_injections(grammar, text, is_first_line, pos, &stack, anchor_position)?
        else {
            #[cfg(feature = "debug")]
            log::debug!("[tokenize_string] no more matches");
            acc.produce(line_len, stack.content_name_scopes());
            break;
        };
        let (start, end) = (m.start(), m.end());
        let captures = m.capture_indices.as_slice();
        let has_advanced = end > pos;
        let mut stuck = false;

        if m.rule_id == END_RULE_ID {
            let popped_rule = stack.rule(grammar)?;
            #[cfg(feature = "debug")]
            log::debug!(
                "[tokenize_string] End rule matched, popping '{}'",
                popped_rule.names().raw_name().unwrap_or_default()
            );
            acc.produce(start, stack.content_name_scopes());
            stack = stack.with_content_name_scopes(stack.name_scopes().clone());
            if let Rule::BeginEnd(begin_end) = popped_rule {
                handle_captures(
                    grammar,
                    text,
                    is_first_line,
                    &stack,
                    acc,
                    &begin_end.end_captures,
                    captures,
                )?;
            }
            acc.produce(end, stack.content_name_scopes());

            let popped = stack.clone();
            stack = stack.pop();
            anchor_position = popped.anchor_position();

            // Grammar pushed & popped a rule without advancing
            // See https://github.com/Microsoft/vscode-textmate/issues/12
            if !has_advanced && popped.enter_position() == Some(pos) {
                #[cfg(feature = "debug")]
                log::debug!("[tokenize_string] pushed and popped at {pos} without advancing");
                stack = popped;
                stuck = true;
            }
        } else {
            let rule = grammar.get_rule(m.rule_id)?;
            acc.produce(start, stack.content_name_scopes());
            let before_push = stack.clone();
            let name = rule.name(text, captures);
            let name_scopes = stack.content_name_scopes().push(name.as_deref());
            stack = stack.push(
                m.rule_id,
                Some(pos),
                anchor_position,
                end == line_len,
                None,
                name_scopes.clone(),
                name_scopes.clone(),
            );

            match rule {
                Rule::BeginEnd(_) | Rule::BeginWhile(_) => {
                    let (begin_captures, end_source) = match rule {
                        Rule::BeginEnd(r) => (&r.begin_captures, &r.end),
                        Rule::BeginWhile(r) => (&r.begin_captures, &r.while_),
                        _ => unreachable!(),
                    };
                    #[cfg(feature = "debug")]
                    log::debug!(
                        "[tokenize_string] Pushing begin rule={:?}",
                        rule.names().raw_name().unwrap_or("No name")
                    );
                    handle_captures(
                        grammar,
                        text,
                        is_first_line,
                        &stack,
                        acc,
                        begin_captures,
                        captures,
                    )?;
                    acc.produce(end, stack.content_name_scopes());
                    anchor_position = Some(end);

                    let content_name = rule.content_name(text, captures);
                    stack = stack.with_content_name_scopes(name_scopes.push(content_name.as_deref()));
                    if end_source.has_back_references {
                        stack =
                            stack.with_end_rule(end_source.resolve_back_references(text, captures));
                    }

                    if !has_advanced && before_push.has_same_rule_as(&stack) {
                        #[cfg(feature = "debug")]
                        log::debug!("[tokenize_string] begin rule pushed again at {pos}, popping");
                        stack = stack.pop();
                        stuck = true;
                    }
                }
                _ => {
                    let match_captures = match rule {
                        Rule::Match(r) => r.captures.as_slice(),
                        _ => &[],
                    };
                    handle_captures(
                        grammar,
                        text,
                        is_first_line,
                        &stack,
                        acc,
                        match_captures,
                        captures,
                    )?;
                    acc.produce(end, stack.content_name_scopes());
                    // pop rule immediately since it is a MatchRule
                    stack = stack.pop();

                    if !has_advanced {
                        #[cfg(feature = "debug")]
                        log::debug!("[tokenize_string] match rule didn't advance at {pos}");
                        stuck = true;
                    }
                }
            }
        }

        if stuck {
            pos = force_advance(text, pos);
            if pos >= line_len {
                acc.produce(line_len, stack.content_name_scopes());
                break;
            }
        } else if has_advanced {
            pos = end;
            is_first_line = false;
        }
    }

    Ok(stack)
}

/// Tokenizes a line, `previous` being the state returned for the previous line or the
/// grammar initial state.
pub(crate) fn tokenize_line(
    grammar: &Grammar,
    line: &str,
    previous: &StateStack,
) -> VerniceResult<(Vec<Token>, StateStack)> {
    let is_first_line = grammar.is_initial_state(previous);
    let stack = if is_first_line {
        // A fresh root so the returned state is never taken for the initial one
        StateStack::root(previous.rule_id(), previous.content_name_scopes().clone())
    } else {
        previous.reset()
    };

    // Always add a new line, some regex expect it
    let text = format!("{line}\n");
    let mut acc = TokenAccumulator::default();
    let stack = tokenize_string(grammar, &text, is_first_line, 0, stack, &mut acc, true)?;
    Ok((acc.finalize(&stack, text.len()), stack))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::{GrammarOptions, RawGrammar};
    use insta::assert_snapshot;

    fn grammar(json: &str) -> Grammar {
        Grammar::from_raw(RawGrammar::from_json(json).unwrap())
    }

    /// `start:scope scope|start:...`
    fn format_tokens(tokens: &[Token]) -> String {
        tokens
            .iter()
            .map(|t| format!("{}:{}", t.span.start, t.scopes.join(" ")))
            .collect::<Vec<_>>()
            .join("|")
    }

    fn tokenize(grammar: &Grammar, lines: &[&str]) -> Vec<String> {
        let mut state = grammar.initial_state();
        let mut out = Vec::new();
        for line in lines {
            let (tokens, next) = grammar.tokenize_line(line, &state).unwrap();
            assert_partition(&tokens, line);
            out.push(format_tokens(&tokens));
            state = next;
        }
        out
    }

    fn assert_partition(tokens: &[Token], line: &str) {
        assert!(!tokens.is_empty());
        assert_eq!(tokens[0].span.start, 0);
        assert_eq!(tokens.last().unwrap().span.end, line.len());
        for pair in tokens.windows(2) {
            assert_eq!(pair[0].span.end, pair[1].span.start);
        }
    }

    const STRING_GRAMMAR: &str = r#"{
        "scopeName": "source.test",
        "patterns": [
            {
                "begin": "\"\"\"",
                "end": "\"\"\"",
                "name": "string.quoted",
                "beginCaptures": {"0": {"name": "punctuation.begin"}},
                "endCaptures": {"0": {"name": "punctuation.end"}}
            }
        ]
    }"#;

    #[test]
    fn tokenizes_begin_end_on_one_line() {
        let g = grammar(STRING_GRAMMAR);
        let (tokens, state) = g.tokenize_line(r#"abc"""xyz""""#, &g.initial_state()).unwrap();
        let starts: Vec<_> = tokens.iter().map(Token::start).collect();
        assert_eq!(starts, vec![0, 3, 6, 9]);
        assert_snapshot!(format_tokens(&tokens), @"0:|3:string.quoted punctuation.begin|6:string.quoted|9:string.quoted punctuation.end");
        assert_eq!(state.depth(), 0);
    }

    #[test]
    fn keeps_state_across_lines() {
        let g = grammar(STRING_GRAMMAR);
        let lines = tokenize(&g, &[r#"a """ b"#, "inside", r#"c """ d"#, ""]);
        assert_eq!(
            lines,
            vec![
                "0:|2:string.quoted punctuation.begin|5:string.quoted",
                "0:string.quoted",
                "0:string.quoted|2:string.quoted punctuation.end|5:",
                "0:",
            ]
        );
    }

    #[test]
    fn is_deterministic_and_restartable() {
        let g = grammar(STRING_GRAMMAR);
        let (_, state) = g.tokenize_line(r#"x """"#, &g.initial_state()).unwrap();
        let first = g.tokenize_line("abc", &state).unwrap();
        let second = g.tokenize_line("abc", &state).unwrap();
        assert_eq!(first, second);
        assert_eq!(state.depth(), 1);
    }

    #[test]
    fn handles_nested_captures() {
        let g = grammar(
            r#"{
            "scopeName": "source.test",
            "patterns": [
                {
                    "match": "(fn) ((\\w+)\\(\\))",
                    "name": "meta.function",
                    "captures": {
                        "1": {"name": "keyword.fn"},
                        "2": {"name": "meta.signature"},
                        "3": {"name": "entity.name.$3"}
                    }
                }
            ]
        }"#,
        );
        let lines = tokenize(&g, &["fn foo() x"]);
        assert_snapshot!(lines[0], @"0:meta.function keyword.fn|2:meta.function|3:meta.function meta.signature entity.name.foo|6:meta.function meta.signature|8:");
    }

    #[test]
    fn retokenizes_captures_with_patterns() {
        let g = grammar(
            r#"{
            "scopeName": "source.test",
            "patterns": [
                {
                    "match": "<(\\w+)>",
                    "captures": {
                        "1": {"name": "tag", "patterns": [{"match": "b", "name": "letter.b"}]}
                    }
                }
            ]
        }"#,
        );
        let lines = tokenize(&g, &["<abc>"]);
        assert_snapshot!(lines[0], @"0:|1:tag|2:tag letter.b|3:tag|4:");
    }

    #[test]
    fn begin_while_continues_while_matching() {
        let g = grammar(
            r#"{
            "scopeName": "source.test",
            "patterns": [
                {"begin": "^>", "while": "^>", "name": "quote", "patterns": [{"match": "!", "name": "bang"}]}
            ]
        }"#,
        );
        let lines = tokenize(&g, &["> a!", "> b", "c"]);
        assert_eq!(
            lines,
            vec!["0:quote|1:quote|3:quote bang", "0:quote|1:quote", "0:"]
        );
    }

    #[test]
    fn resolves_back_references_in_end() {
        let g = grammar(
            r#"{
            "scopeName": "source.test",
            "patterns": [
                {"begin": "<<(\\w+)", "end": "^\\1$", "name": "heredoc"}
            ]
        }"#,
        );
        let lines = tokenize(&g, &["<<EOT", "EOF", "EOT", "x"]);
        assert_eq!(
            lines,
            vec!["0:heredoc", "0:heredoc", "0:heredoc", "0:"]
        );
    }

    #[test]
    fn apply_end_pattern_last() {
        let json = |last: bool| {
            format!(
                r#"{{
                "scopeName": "source.test",
                "patterns": [
                    {{"begin": "\\[", "end": "\\]", "applyEndPatternLast": {last}, "name": "block",
                      "patterns": [{{"match": "\\]\\]", "name": "escape"}}]}}
                ]
            }}"#
            )
        };
        let first = grammar(&json(false));
        assert_snapshot!(tokenize(&first, &["[a]]"])[0], @"0:block|1:block|2:block|3:");
        let last = grammar(&json(true));
        assert_snapshot!(tokenize(&last, &["[a]]"])[0], @"0:block|1:block|2:block escape");
    }

    #[test]
    fn anchors_only_match_where_allowed() {
        let g = grammar(
            r#"{
            "scopeName": "source.test",
            "patterns": [
                {"begin": "\\(", "end": "\\)", "name": "paren", "patterns": [{"match": "\\Gx", "name": "first"}]},
                {"match": "\\Ay", "name": "start"}
            ]
        }"#,
        );
        let lines = tokenize(&g, &["y(xx)y", "y"]);
        assert_eq!(
            lines,
            vec!["0:start|1:paren|2:paren first|3:paren|4:paren|5:", "0:"]
        );
    }

    #[test]
    fn region_without_end_stays_open() {
        let g = grammar(
            r#"{
            "scopeName": "source.test",
            "patterns": [
                {"begin": "!", "name": "bang", "patterns": [{"match": "x", "name": "inner"}]},
                {"match": "x", "name": "outer"}
            ]
        }"#,
        );
        let lines = tokenize(&g, &["x!x", "x"]);
        assert_eq!(lines, vec!["0:outer|1:bang|2:bang inner", "0:bang inner"]);
    }

    #[test]
    fn never_loops_on_empty_matches() {
        let g = grammar(
            r#"{
            "scopeName": "source.test",
            "patterns": [
                {"match": "(?=a)", "name": "empty"},
                {"begin": "(?=b)", "end": "(?=b)", "name": "region"},
                {"match": "c", "name": "c"}
            ]
        }"#,
        );
        let lines = tokenize(&g, &["abc"]);
        // the region is kept open and the rest of the line moves on with it
        assert_eq!(lines[0], "0:|1:region");
    }

    #[test]
    fn applies_injections() {
        let g = grammar(
            r##"{
            "scopeName": "source.test",
            "patterns": [
                {"begin": "#", "end": "$", "name": "comment"},
                {"match": "TODO", "name": "plain.todo"}
            ],
            "injections": {
                "L:comment": {"patterns": [{"match": "TODO", "name": "keyword.todo"}]},
                "source.test - comment": {"patterns": [{"match": "x", "name": "never"}]}
            }
        }"##,
        );
        let lines = tokenize(&g, &["TODO # TODO"]);
        assert_snapshot!(lines[0], @"0:plain.todo|4:|5:comment|6:comment|7:comment keyword.todo");
    }

    #[test]
    fn left_injections_win_ties() {
        let g = Grammar::new(
            std::sync::Arc::new(
                RawGrammar::from_json(
                    r#"{
                "scopeName": "source.test",
                "patterns": [{"match": "a", "name": "normal"}],
                "injections": {
                    "L:source.test": {"patterns": [{"match": "a", "name": "left"}]},
                    "R:source.test": {"patterns": [{"match": "ab", "name": "right"}]}
                }
            }"#,
                )
                .unwrap(),
            ),
            None,
            GrammarOptions::default().root_scope(true),
        );
        let lines = tokenize(&g, &["ab"]);
        assert_snapshot!(lines[0], @"0:source.test left|1:source.test");
    }

    #[test]
    fn invalid_regex_is_reported() {
        let g = grammar(r#"{"scopeName": "source.test", "patterns": [{"match": "(a"}]}"#);
        let err = g.tokenize_line("a", &g.initial_state()).unwrap_err();
        assert!(matches!(err, crate::Error::GrammarCompile { .. }));
    }

    #[test]
    fn empty_line_has_one_token() {
        let g = grammar(STRING_GRAMMAR);
        let (tokens, _) = g.tokenize_line("", &g.initial_state()).unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].span, 0..0);
    }
}
