//! Brace matching for bare JSON objects embedded in free text.
//!
//! The scanner is a three-state machine driven one character at a time. Only
//! braces seen in [`ScanState::Normal`] change the depth, so braces inside
//! string values (including escaped quotes) never end an object early.

use std::borrow::Cow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Normal,
    InString,
    /// The previous character was a backslash inside a string
    Escaped,
}

/// Result of scanning for the end of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// `end` is exclusive, one past the matching closing brace
    Complete { end: usize },
    /// Content ended before the braces balanced, which is normal mid-stream
    Incomplete,
}

impl ScanOutcome {
    pub fn end(self) -> Option<usize> {
        match self {
            ScanOutcome::Complete { end } => Some(end),
            ScanOutcome::Incomplete => None,
        }
    }
}

/// Pure transition function of the scanner
pub fn step(state: ScanState, ch: char) -> ScanState {
    match (state, ch) {
        (ScanState::Normal, '"') => ScanState::InString,
        (ScanState::Normal, _) => ScanState::Normal,
        (ScanState::InString, '\\') => ScanState::Escaped,
        (ScanState::InString, '"') => ScanState::Normal,
        (ScanState::InString, _) => ScanState::InString,
        (ScanState::Escaped, _) => ScanState::InString,
    }
}

/// Find the extent of the object whose opening brace sits at byte offset `start`.
pub fn find_object_end(content: &str, start: usize) -> ScanOutcome {
    let Some(rest) = content.get(start..) else {
        return ScanOutcome::Incomplete;
    };
    if !rest.starts_with('{') {
        return ScanOutcome::Incomplete;
    }

    let mut state = ScanState::Normal;
    let mut depth: usize = 0;

    for (i, ch) in rest.char_indices() {
        if state == ScanState::Normal {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return ScanOutcome::Complete {
                            end: start + i + ch.len_utf8(),
                        };
                    }
                }
                _ => {}
            }
        }
        state = step(state, ch);
    }

    ScanOutcome::Incomplete
}

/// Drop commas that directly precede a closing `}` or `]`, ignoring string contents.
///
/// Returns the input unchanged (borrowed) when there is nothing to repair.
pub fn strip_trailing_commas(json: &str) -> Cow<'_, str> {
    let mut state = ScanState::Normal;
    let mut dropped = Vec::new();

    for (i, ch) in json.char_indices() {
        if state == ScanState::Normal && ch == ',' {
            let next = json[i + 1..].chars().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                dropped.push(i);
            }
        }
        state = step(state, ch);
    }

    if dropped.is_empty() {
        return Cow::Borrowed(json);
    }

    let mut repaired = String::with_capacity(json.len());
    let mut last = 0;
    for i in dropped {
        repaired.push_str(&json[last..i]);
        last = i + 1;
    }
    repaired.push_str(&json[last..]);
    Cow::Owned(repaired)
}
