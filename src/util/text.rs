use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const ESC: char = '\u{1b}';
const MARKER: char = '…';

/// Flatten feed-supplied text into a single printable line.
///
/// Escape sequences (CSI `ESC [ ... final`, OSC `ESC ] ... BEL|ST`) and other
/// control characters are dropped, and runs of whitespace (newlines included)
/// collapse to one space. Feed titles and descriptions are remote input, so
/// everything printed by `browse` and `fetch` goes through here first.
pub fn one_line(s: &str) -> Cow<'_, str> {
    let clean = !s.chars().any(|c| c.is_control())
        && !s.contains("  ")
        && s.trim().len() == s.len();
    if clean {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        if c == ESC {
            match chars.peek() {
                Some('[') => {
                    chars.next();
                    // Parameters run until a byte in @..=~
                    for p in chars.by_ref() {
                        if ('@'..='~').contains(&p) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(p) = chars.next() {
                        if p == '\u{7}' {
                            break;
                        }
                        if p == ESC && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
            continue;
        }

        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if c.is_control() {
            continue;
        }

        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }

    Cow::Owned(out)
}

/// Cut `s` so it occupies at most `max_columns` terminal columns, ending in
/// `…` when anything was removed. Wide (CJK, emoji) characters count as two.
pub fn excerpt(s: &str, max_columns: usize) -> Cow<'_, str> {
    if UnicodeWidthStr::width(s) <= max_columns {
        return Cow::Borrowed(s);
    }
    if max_columns == 0 {
        return Cow::Borrowed("");
    }

    let budget = max_columns - 1;
    let mut used = 0;
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        let w = c.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        end = idx + c.len_utf8();
    }
    // Grapheme-level width rules (emoji presentation) can exceed the per-char sum
    while end > 0 && UnicodeWidthStr::width(&s[..end]) > budget {
        end = s[..end].char_indices().last().map_or(0, |(i, _)| i);
    }

    let mut out = s[..end].trim_end().to_string();
    out.push(MARKER);
    Cow::Owned(out)
}
