//! Rule-based treatment: the deterministic fallback that cannot fail.
//!
//! Used whenever no text service is configured, or when a service answer is
//! rejected. The engine only ever rewrites a line in place or appends a blank
//! line after it; it never deletes or merges lines. That is what keeps it on
//! the right side of the preservation guard for every input.
//!
//! Per line (outside fenced code blocks):
//! 1. trim surrounding whitespace
//! 2. expand typographic ligatures (`ﬁ` → `fi`, …)
//! 3. promote short ALL-CAPS lines to `## Title Case` headings: OCR tends to
//!    flatten section labels into plain upper-case text
//! 4. follow long paragraph lines with a blank line so renderers keep them
//!    as separate paragraphs

use tracing::debug;

/// Lines at least this long are never treated as section labels.
const HEADING_MAX_CHARS: usize = 100;
/// Lines must be longer than this to be promoted (skips "I", "II", "USA").
const HEADING_MIN_CHARS: usize = 3;
/// Plain lines longer than this get a blank line appended.
const PARAGRAPH_MIN_CHARS: usize = 50;

const LIGATURES: &[(char, &str)] = &[
    ('\u{FB00}', "ff"),
    ('\u{FB01}', "fi"),
    ('\u{FB02}', "fl"),
    ('\u{FB03}', "ffi"),
    ('\u{FB04}', "ffl"),
    ('\u{FB05}', "st"),
    ('\u{FB06}', "st"),
];

/// Apply the rule-based treatment.
///
/// `instruction` is accepted for signature parity with the AI path; the
/// rules are fixed and do not interpret it.
pub fn treat(markdown: &str, instruction: &str) -> String {
    let _ = instruction;
    let mut out: Vec<String> = Vec::with_capacity(markdown.len() / 40 + 1);
    let mut in_fence = false;
    let mut promoted = 0usize;

    for raw in markdown.split('\n') {
        let line = raw.trim();

        if line.starts_with("```") || line.starts_with("~~~") {
            in_fence = !in_fence;
            out.push(line.to_string());
            continue;
        }
        if in_fence {
            out.push(raw.to_string());
            continue;
        }

        let line = repair_ligatures(line);

        if is_section_label(&line) {
            out.push(format!("## {}", title_case(&line)));
            promoted += 1;
            continue;
        }

        let is_paragraph = !line.is_empty() && !is_structural(&line);
        let long = line.chars().count() > PARAGRAPH_MIN_CHARS;
        out.push(line);
        if is_paragraph && long {
            out.push(String::new());
        }
    }

    debug!("Rule-based treatment: {} lines out, {} headings promoted", out.len(), promoted);
    out.join("\n")
}

/// Replace every ligature code point with its letter sequence.
pub fn repair_ligatures(line: &str) -> String {
    if !line.chars().any(|c| ('\u{FB00}'..='\u{FB06}').contains(&c)) {
        return line.to_string();
    }
    let mut s = String::with_capacity(line.len() + 4);
    for c in line.chars() {
        match LIGATURES.iter().find(|(lig, _)| *lig == c) {
            Some((_, rep)) => s.push_str(rep),
            None => s.push(c),
        }
    }
    s
}

/// Upper-case the first letter of every word, lower-case the rest.
///
/// A "word" starts after any non-letter except an apostrophe, so
/// `"DON'T STOP"` becomes `"Don't Stop"` and `"2ND PASS"` becomes `"2Nd Pass"`.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_letter = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_letter = true;
        } else {
            out.push(c);
            prev_letter = c == '\'' && prev_letter;
        }
    }
    out
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Headings, list items, tables and quotes keep their own layout.
fn is_structural(line: &str) -> bool {
    line.starts_with('#')
        || line.starts_with('-')
        || line.starts_with('*')
        || line.starts_with('+')
        || line.starts_with('|')
        || line.starts_with('>')
        || is_ordered_item(line)
}

fn is_ordered_item(line: &str) -> bool {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && matches!(line[digits..].chars().next(), Some('.') | Some(')'))
        && line[digits + 1..].starts_with(' ')
}

fn is_section_label(line: &str) -> bool {
    let len = line.chars().count();
    len > HEADING_MIN_CHARS
        && len < HEADING_MAX_CHARS
        && !is_structural(line)
        && is_all_upper(line)
}

/// At least one cased letter and no lower-case ones.
fn is_all_upper(line: &str) -> bool {
    let mut cased = false;
    for c in line.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            cased = true;
        }
    }
    cased
}
