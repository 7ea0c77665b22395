use crate::error::VerniceResult;
use crate::grammars::{AnchorActive, CompiledRule, Grammar, InjectionPrecedence, ScanMatch};
use crate::tokenizer::StateStack;

/// Runs a scanner, reporting slow searches when the `debug` feature is on
#[cfg_attr(not(feature = "debug"), allow(unused_variables))]
pub(crate) fn search(
    grammar: &Grammar,
    scanner: &CompiledRule,
    text: &str,
    pos: usize,
) -> Option<ScanMatch> {
    #[cfg(feature = "debug")]
    let started = std::time::Instant::now();

    let found = scanner.find_next_match(text, pos);

    #[cfg(feature = "debug")]
    {
        let elapsed = started.elapsed();
        if elapsed > grammar.options().slow_match_threshold {
            log::warn!(
                "[{}] slow search: {elapsed:?} at {pos} in {:?}\n{scanner:?}",
                grammar.scope_name(),
                text
            );
        }
    }

    found
}

/// Matches injection patterns at the current position.
/// Returns the earliest match and whether it comes from a `L:` injection.
fn match_injections(
    grammar: &Grammar,
    text: &str,
    pos: usize,
    stack: &StateStack,
    anchors: AnchorActive,
) -> VerniceResult<Option<(ScanMatch, bool)>> {
    let scope_names = stack.content_name_scopes().scope_names();
    let mut best: Option<(ScanMatch, InjectionPrecedence)> = None;

    // Already sorted by precedence
    for injection in grammar.injections() {
        if !injection.matches(&scope_names) {
            continue;
        }
        let Ok(rule) = grammar.get_rule(injection.rule_id) else {
            #[cfg(feature = "debug")]
            log::debug!(
                "[match_injections] unknown rule {:?} for injection '{}', ignoring injections",
                injection.rule_id,
                injection.debug_selector
            );
            return Ok(None);
        };

        let scanner = rule.compile_ag(grammar.rules(), None, anchors)?;
        let Some(found) = search(grammar, &scanner, text, pos) else {
            continue;
        };
        if best.as_ref().is_some_and(|(b, _)| found.start() >= b.start()) {
            continue;
        }

        let is_done = found.start() == pos;
        #[cfg(feature = "debug")]
        log::debug!(
            "[match_injections] '{}' matched at {}",
            injection.debug_selector,
            found.start()
        );
        best = Some((found, injection.priority));
        if is_done {
            break;
        }
    }

    Ok(best.map(|(m, precedence)| (m, precedence == InjectionPrecedence::Left)))
}

/// Matches both regular rule patterns and injections, returning the best match.
/// An injection wins if it starts earlier, or at the same position for `L:` ones.
pub(crate) fn match_rule_or_injections(
    grammar: &Grammar,
    text: &str,
    is_first_line: bool,
    pos: usize,
    stack: &StateStack,
    anchor_position: Option<usize>,
) -> VerniceResult<Option<ScanMatch>> {
    let anchors = AnchorActive::at(is_first_line, anchor_position, pos);
    let rule = stack.rule(grammar)?;
    let scanner = rule.compile_ag(grammar.rules(), stack.end_rule(), anchors)?;
    let regular = search(grammar, &scanner, text, pos);

    if !grammar.has_injections() {
        return Ok(regular);
    }

    let Some((injection, is_left)) = match_injections(grammar, text, pos, stack, anchors)? else {
        return Ok(regular);
    };
    match regular {
        Some(regular)
            if injection.start() > regular.start()
                || (injection.start() == regular.start() && !is_left) =>
        {
            Ok(Some(regular))
        }
        _ => Ok(Some(injection)),
    }
}
