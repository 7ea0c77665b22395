use std::borrow::Cow;
use std::fmt;

/// Used to know which anchors should be active in regexes.
/// We don't want to enable \A or \G everywhere, it's context dependent:
/// `\A` only on the first line scanned and `\G` only at the anchor position.
#[derive(Copy, Clone, PartialEq, Hash, Eq)]
pub enum AnchorActive {
    /// Only \A is active
    A,
    /// Only \G is active
    G,
    /// Both \A and \G are active
    AG,
    /// Neither \A nor \G are active
    None,
}

impl AnchorActive {
    pub fn new(allow_a: bool, allow_g: bool) -> Self {
        match (allow_a, allow_g) {
            (true, true) => AnchorActive::AG,
            (true, false) => AnchorActive::A,
            (false, true) => AnchorActive::G,
            (false, false) => AnchorActive::None,
        }
    }

    /// `anchor_position` is `None` when no `\G` constraint applies
    pub fn at(is_first_line: bool, anchor_position: Option<usize>, current_pos: usize) -> Self {
        Self::new(is_first_line, anchor_position == Some(current_pos))
    }

    pub fn allow_a(self) -> bool {
        matches!(self, AnchorActive::A | AnchorActive::AG)
    }

    pub fn allow_g(self) -> bool {
        matches!(self, AnchorActive::G | AnchorActive::AG)
    }

    /// Slot used by the compiled pattern caches
    pub(crate) fn index(self) -> usize {
        match self {
            AnchorActive::None => 0,
            AnchorActive::G => 1,
            AnchorActive::A => 2,
            AnchorActive::AG => 3,
        }
    }

    /// Replaces the disabled anchors with `\u{FFFF}`, a noncharacter that never matches
    /// actual text. Escaped backslashes are skipped so `\\G` is left alone.
    pub fn replace_anchors<'a>(&self, pat: &'a str) -> Cow<'a, str> {
        if *self == AnchorActive::AG || !has_anchor(pat) {
            return Cow::Borrowed(pat);
        }

        let mut out = String::with_capacity(pat.len());
        let mut chars = pat.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('A') if !self.allow_a() => out.push('\u{FFFF}'),
                Some('G') if !self.allow_g() => out.push('\u{FFFF}'),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        }
        Cow::Owned(out)
    }
}

/// Whether the pattern uses `\A` or `\G`
pub(crate) fn has_anchor(pat: &str) -> bool {
    let bytes = pat.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\\' {
            if matches!(bytes[i + 1], b'A' | b'G') {
                return true;
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    false
}

impl fmt::Debug for AnchorActive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnchorActive::A => "allow_A=true, allow_G=false",
            AnchorActive::G => "allow_A=false, allow_G=true",
            AnchorActive::AG => "allow_A=true, allow_G=true",
            AnchorActive::None => "allow_A=false, allow_G=false",
        };
        f.write_str(s)
    }
}
