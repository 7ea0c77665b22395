use std::fmt;
use std::sync::Arc;

use crate::error::VerniceResult;
use crate::grammars::{Grammar, Rule, RuleId};
use crate::scope::ScopeList;

#[derive(Debug)]
struct StackFrame {
    parent: Option<StateStack>,
    /// Rule that created this stack element
    rule_id: RuleId,
    /// The position where this rule was entered during current line (for infinite loop detection)
    /// None at beginning of a line
    enter_position: Option<usize>,
    /// Where `\G` is allowed to match for this rule
    anchor_position: Option<usize>,
    /// The begin match captured the end of the line.
    /// This means that the next line should start with an anchor_position of 0.
    begin_rule_captured_eol: bool,
    /// Dynamic end/while pattern resolved with backreferences
    end_rule: Option<String>,
    /// "name" scopes - applied to begin/end delimiters
    name_scopes: ScopeList,
    /// "contentName" scopes - applied to content between delimiters
    content_name_scopes: ScopeList,
    /// Number of frames below this one
    depth: usize,
}

// Unlinks the chain one frame at a time, dropping a deep stack recursively would
// overflow the thread stack
impl Drop for StackFrame {
    fn drop(&mut self) {
        let mut parent = self.parent.take();
        while let Some(StateStack(frame)) = parent {
            match Arc::try_unwrap(frame) {
                Ok(mut frame) => parent = frame.parent.take(),
                Err(_) => break,
            }
        }
    }
}

/// Keeps track of nested context as well as how to exit that context and the captures
/// strings used in backreferences.
///
/// This is the value returned after tokenizing a line and given back for the next one.
/// It is immutable: pushing creates a new frame pointing to the previous one so a state
/// kept for an earlier line stays valid.
#[derive(Clone)]
pub struct StateStack(Arc<StackFrame>);

impl StateStack {
    /// The bottom frame, for the first line of a document
    pub fn root(rule_id: RuleId, scopes: ScopeList) -> Self {
        Self(Arc::new(StackFrame {
            parent: None,
            rule_id,
            enter_position: None,
            anchor_position: None,
            begin_rule_captured_eol: false,
            end_rule: None,
            name_scopes: scopes.clone(),
            content_name_scopes: scopes,
            depth: 0,
        }))
    }

    /// Called when entering a nested context: when a BeginEnd or BeginWhile begin pattern
    /// matches, or to hold a match rule while its captures are handled
    #[allow(clippy::too_many_arguments)]
    pub fn push(
        &self,
        rule_id: RuleId,
        enter_position: Option<usize>,
        anchor_position: Option<usize>,
        begin_rule_captured_eol: bool,
        end_rule: Option<String>,
        name_scopes: ScopeList,
        content_name_scopes: ScopeList,
    ) -> Self {
        Self(Arc::new(StackFrame {
            parent: Some(self.clone()),
            rule_id,
            enter_position,
            anchor_position,
            begin_rule_captured_eol,
            end_rule,
            name_scopes,
            content_name_scopes,
            depth: self.0.depth + 1,
        }))
    }

    /// Exits the current context, getting back to the parent.
    /// The root is never popped: popping it returns it.
    pub fn pop(&self) -> Self {
        self.parent().cloned().unwrap_or_else(|| self.clone())
    }

    /// Whether both are the very same frame, not just equal ones
    pub fn ptr_eq(&self, other: &StateStack) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn parent(&self) -> Option<&StateStack> {
        self.0.parent.as_ref()
    }

    /// The same stack with enter and anchor positions cleared on every frame, done
    /// between lines. Frames that have nothing to clear are shared.
    pub fn reset(&self) -> Self {
        let frames: Vec<&StateStack> = self.frames().collect();
        // rebuilt from the root up
        let mut rebuilt: Option<StateStack> = None;

        for frame in frames.into_iter().rev() {
            let parent = rebuilt.take();
            let parent_changed = match (&parent, frame.parent()) {
                (Some(new), Some(old)) => !new.ptr_eq(old),
                _ => false,
            };
            let next = if !parent_changed
                && frame.0.enter_position.is_none()
                && frame.0.anchor_position.is_none()
            {
                frame.clone()
            } else {
                Self(Arc::new(StackFrame {
                    parent,
                    rule_id: frame.0.rule_id,
                    enter_position: None,
                    anchor_position: None,
                    begin_rule_captured_eol: frame.0.begin_rule_captured_eol,
                    end_rule: frame.0.end_rule.clone(),
                    name_scopes: frame.0.name_scopes.clone(),
                    content_name_scopes: frame.0.content_name_scopes.clone(),
                    depth: frame.0.depth,
                }))
            };
            rebuilt = Some(next);
        }

        rebuilt.unwrap_or_else(|| self.clone())
    }

    pub fn rule<'g>(&self, grammar: &'g Grammar) -> VerniceResult<&'g Rule> {
        grammar.get_rule(self.0.rule_id)
    }

    pub fn rule_id(&self) -> RuleId {
        self.0.rule_id
    }

    pub fn enter_position(&self) -> Option<usize> {
        self.0.enter_position
    }

    pub fn anchor_position(&self) -> Option<usize> {
        self.0.anchor_position
    }

    pub fn begin_rule_captured_eol(&self) -> bool {
        self.0.begin_rule_captured_eol
    }

    pub fn end_rule(&self) -> Option<&str> {
        self.0.end_rule.as_deref()
    }

    pub fn name_scopes(&self) -> &ScopeList {
        &self.0.name_scopes
    }

    pub fn content_name_scopes(&self) -> &ScopeList {
        &self.0.content_name_scopes
    }

    /// 0 for the root
    pub fn depth(&self) -> usize {
        self.0.depth
    }

    /// Whether this frame or one of its ancestors entered at the same position as `other`
    /// is `other`'s rule. Used to detect a begin rule pushed again without advancing.
    pub fn has_same_rule_as(&self, other: &StateStack) -> bool {
        let mut current = Some(self);
        while let Some(frame) = current
            && frame.0.enter_position == other.0.enter_position
        {
            if frame.0.rule_id == other.0.rule_id {
                return true;
            }
            current = frame.parent();
        }
        false
    }

    pub fn with_content_name_scopes(&self, content_name_scopes: ScopeList) -> Self {
        if self.0.content_name_scopes == content_name_scopes {
            return self.clone();
        }
        self.replace_top(|frame| frame.content_name_scopes = content_name_scopes)
    }

    pub fn with_end_rule(&self, end_rule: String) -> Self {
        if self.0.end_rule.as_deref() == Some(end_rule.as_str()) {
            return self.clone();
        }
        self.replace_top(|frame| frame.end_rule = Some(end_rule))
    }

    fn replace_top(&self, update: impl FnOnce(&mut StackFrame)) -> Self {
        let mut frame = StackFrame {
            parent: self.0.parent.clone(),
            rule_id: self.0.rule_id,
            enter_position: self.0.enter_position,
            anchor_position: self.0.anchor_position,
            begin_rule_captured_eol: self.0.begin_rule_captured_eol,
            end_rule: self.0.end_rule.clone(),
            name_scopes: self.0.name_scopes.clone(),
            content_name_scopes: self.0.content_name_scopes.clone(),
            depth: self.0.depth,
        };
        update(&mut frame);
        Self(Arc::new(frame))
    }

    /// Iterates from this frame down to the root
    pub fn frames(&self) -> impl Iterator<Item = &StateStack> {
        std::iter::successors(Some(self), |s| s.parent())
    }
}

/// Two states are equal if continuing tokenizing from either gives the same result.
/// Positions are not compared, they only matter within a line.
impl PartialEq for StateStack {
    fn eq(&self, other: &Self) -> bool {
        let mut a = Some(self);
        let mut b = Some(other);
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if Arc::ptr_eq(&x.0, &y.0) {
                        return true;
                    }
                    if x.0.depth != y.0.depth
                        || x.0.rule_id != y.0.rule_id
                        || x.0.end_rule != y.0.end_rule
                        || x.0.content_name_scopes != y.0.content_name_scopes
                    {
                        return false;
                    }
                    a = x.parent();
                    b = y.parent();
                }
                _ => return false,
            }
        }
    }
}

impl Eq for StateStack {}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "StateStack:")?;
        let mut frames: Vec<_> = self.frames().collect();
        frames.reverse();

        for (depth, frame) in frames.into_iter().enumerate() {
            let indent = "  ".repeat(depth);
            write!(f, "{indent}rule={}", frame.0.rule_id.0)?;

            if !frame.0.name_scopes.is_empty() {
                write!(f, " name=[{}]", frame.0.name_scopes)?;
            }
            if !frame.0.content_name_scopes.is_empty() {
                write!(f, ", content=[{}]", frame.0.content_name_scopes)?;
            }
            if let Some(pattern) = &frame.0.end_rule {
                write!(f, ", end_rule=\"{pattern}\"")?;
            }
            write!(f, ", anchor_pos={:?}", frame.0.anchor_position)?;
            if let Some(enter_pos) = frame.0.enter_position
                && frame.0.anchor_position != Some(enter_pos)
            {
                write!(f, ", enter_pos={enter_pos}")?;
            }
            writeln!(
                f,
                ", begin_rule_captured_eol={}",
                frame.0.begin_rule_captured_eol
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(names: &[&str]) -> ScopeList {
        ScopeList::from_scopes(names)
    }

    fn push(stack: &StateStack, rule: u32, enter: Option<usize>, names: &[&str]) -> StateStack {
        stack.push(RuleId(rule), enter, enter, false, None, scopes(names), scopes(names))
    }

    #[test]
    fn deep_stacks_can_be_reset_and_dropped() {
        let root = StateStack::root(RuleId(1), ScopeList::new());
        let mut stack = root.clone();
        for i in 0..200_000 {
            stack = push(&stack, 2, Some(i), &[]);
        }
        let reset = stack.reset();
        assert_eq!(reset.depth(), 200_000);
        assert_eq!(reset.enter_position(), None);
        assert_eq!(reset, stack);
        drop(stack);
        drop(reset);
        assert_eq!(root.depth(), 0);
    }

    #[test]
    fn push_then_pop_gives_back_the_stack() {
        let root = StateStack::root(RuleId(1), ScopeList::new());
        let pushed = push(&root, 2, Some(0), &["string"]);
        assert_eq!(pushed.depth(), 1);
        assert_eq!(pushed.pop(), root);
        assert!(Arc::ptr_eq(&pushed.pop().0, &root.0));
        // older states are untouched
        assert_eq!(root.depth(), 0);
        assert_ne!(pushed, root);
    }

    #[test]
    fn popping_root_is_a_noop() {
        let root = StateStack::root(RuleId(1), scopes(&["source.x"]));
        let popped = root.pop();
        assert_eq!(popped, root);
        assert_eq!(popped.depth(), 0);
        assert_eq!(popped.pop().pop(), root);
    }

    #[test]
    fn reset_clears_positions_only() {
        let root = StateStack::root(RuleId(1), ScopeList::new());
        let a = push(&root, 2, Some(3), &["a"]);
        let b = a
            .push(RuleId(3), None, None, true, Some("x".into()), scopes(&["a", "b"]), scopes(&["a", "b"]));
        let reset = b.reset();
        assert!(reset.frames().all(|f| f.enter_position().is_none() && f.anchor_position().is_none()));
        assert!(reset.begin_rule_captured_eol());
        assert_eq!(reset.end_rule(), Some("x"));
        assert_eq!(reset, b);
        // the untouched root is shared
        assert!(Arc::ptr_eq(&reset.parent().unwrap().parent().unwrap().0, &root.0));
        // nothing to clear: same frames
        assert!(Arc::ptr_eq(&root.reset().0, &root.0));
    }

    #[test]
    fn detects_same_rule_at_same_position() {
        let root = StateStack::root(RuleId(1), ScopeList::new());
        let a = push(&root, 2, Some(4), &["a"]);
        let again = push(&a, 2, Some(4), &["a"]);
        assert!(a.has_same_rule_as(&again));
        let other = push(&a, 3, Some(4), &["a"]);
        assert!(!a.has_same_rule_as(&other));
        let later = push(&a, 2, Some(5), &["a"]);
        assert!(!a.has_same_rule_as(&later));
    }

    #[test]
    fn can_replace_top_values() {
        let root = StateStack::root(RuleId(1), ScopeList::new());
        let a = push(&root, 2, Some(0), &["a"]);
        let content = a.with_content_name_scopes(scopes(&["a", "inner"]));
        assert_eq!(content.content_name_scopes().to_vec(), vec!["a", "inner"]);
        assert_eq!(content.name_scopes().to_vec(), vec!["a"]);
        assert_eq!(content.depth(), 1);
        assert_eq!(a.content_name_scopes().to_vec(), vec!["a"]);

        let same = a.with_content_name_scopes(scopes(&["a"]));
        assert!(Arc::ptr_eq(&same.0, &a.0));

        let ended = a.with_end_rule("EOT".to_owned());
        assert_eq!(ended.end_rule(), Some("EOT"));
        assert_ne!(ended, a);
    }
}
