//! Text normalization
//!
//! Canonicalizes the "smart" punctuation Moodle editors love to paste in,
//! drops non-printable code points and collapses whitespace. Applied to
//! post subjects, attachment filenames, and every text node the HTML
//! sanitizer visits.

/// Normalize a piece of user-entered text.
///
/// The function is total and idempotent: it never fails, and
/// `normalize(normalize(x)) == normalize(x)` for any input. Empty input
/// yields an empty string.
pub fn normalize(text: &str) -> String {
    let mut mapped = String::with_capacity(text.len());

    for c in text.chars() {
        match c {
            // Dashes: en dash, em dash, minus sign
            '\u{2013}' | '\u{2014}' | '\u{2212}' => mapped.push('-'),
            // Curly single quotes
            '\u{2018}' | '\u{2019}' => mapped.push('\''),
            // Curly double quotes
            '\u{201C}' | '\u{201D}' => mapped.push('"'),
            // Horizontal ellipsis
            '\u{2026}' => mapped.push_str("..."),
            // Non-breaking space
            '\u{00A0}' => mapped.push(' '),
            // Zero-width space
            '\u{200B}' => {},
            c if is_unicode_space(c) => mapped.push(' '),
            c if !is_printable(c) => {},
            c => mapped.push(c),
        }
    }

    // Collapse whitespace runs and trim
    let mut out = String::with_capacity(mapped.len());
    for word in mapped.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Exotic Unicode space separators mapped to an ordinary ASCII space.
fn is_unicode_space(c: char) -> bool {
    matches!(
        c,
        '\u{2000}'..='\u{200A}' | '\u{2028}' | '\u{2029}' | '\u{202F}' | '\u{205F}' | '\u{3000}'
    )
}

/// Printable test: control characters and invisible format characters
/// (soft hyphen, joiners, directional marks, BOM) are dropped outright.
/// Note that this removes newlines and tabs too; whitespace inside a
/// message survives only as ordinary spaces.
fn is_printable(c: char) -> bool {
    if c.is_control() {
        return false;
    }
    !matches!(
        c,
        '\u{00AD}'
            | '\u{200C}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2069}'
            | '\u{FEFF}'
    )
}
