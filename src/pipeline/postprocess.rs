//! Final polish applied to markdown just before it is rendered or written.
//!
//! Only layout changes: nothing here alters a visible character of the
//! paper. Rules run in order:
//!
//! 1. CRLF / CR → LF
//! 2. strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
//! 3. trim trailing whitespace per line
//! 4. collapse runs of 3+ blank lines to 2
//! 5. end with exactly one newline

use once_cell::sync::Lazy;
use regex::Regex;

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

const INVISIBLE: [char; 6] = [
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}',
];

/// Apply every polish rule.
pub fn polish(markdown: &str) -> String {
    let s = markdown.replace("\r\n", "\n").replace('\r', "\n");
    let s = s.replace(INVISIBLE, "");
    let s = s
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let s = RE_BLANK_RUN.replace_all(&s, "\n\n\n");
    final_newline(&s)
}

fn final_newline(s: &str) -> String {
    let body = s.trim_end();
    if body.is_empty() {
        "\n".to_string()
    } else {
        format!("{body}\n")
    }
}
