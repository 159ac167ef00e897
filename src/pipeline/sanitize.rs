//! Response sanitising: strip what a text service wraps around its answer.
//!
//! Even when told not to, models like to return
//!
//! ````text
//! ```markdown
//! # Title
//! ...
//! ```
//!
//! ---
//! Explanation: I fixed three OCR errors and ...
//! ````
//!
//! [`sanitize`] removes the wrapping fence and the trailing commentary so only
//! the document itself reaches the preservation guard. The commentary
//! detection is deliberately narrow: only the phrases in the allowlists below
//! are recognised, so a paper's own trailing "Notes" or "References" section
//! is never touched.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:```|~~~)[\w+.-]*\s*$").unwrap());

static RE_FENCE_BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:```|~~~)\s*$").unwrap());

static RE_HRULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:-{3,}|\*{3,}|_{3,})$").unwrap());

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+\S").unwrap());

static RE_EXPLANATION_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^#{1,6}\s+(?:\*\*|__)?(?:explanations?|changes made|summary of (?:the )?changes|notes? on (?:the )?changes|corrections made|treatment notes|processing notes|notes? (?:to|for) the (?:reader|user))(?:\*\*|__)?\s*:?\s*$",
    )
    .unwrap()
});

static RE_EXPLANATION_LEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:\*\*|__|\*|_)?(?:explanations?|changes made|summary of (?:the )?changes|notes? on (?:the )?changes|corrections made|treatment notes|processing notes)\s*(?::(?:\*\*|__|\*|_)?|(?:\*\*|__|\*|_)\s*:)",
    )
    .unwrap()
});

/// Strip wrapping fences and trailing commentary.
///
/// Applied to a fixed point, so `sanitize(sanitize(x)) == sanitize(x)` for
/// every input. Already-clean input comes back unchanged apart from
/// surrounding whitespace.
pub fn sanitize(raw: &str) -> String {
    let mut current = sanitize_once(raw);
    loop {
        let next = sanitize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// One pass: fences first, then trailing commentary, then trim.
/// Never grows the input, so the fixed-point loop terminates.
fn sanitize_once(raw: &str) -> String {
    let mut lines: Vec<&str> = raw.trim().split('\n').collect();

    strip_wrapping_fence(&mut lines);
    strip_trailing_commentary(&mut lines);

    lines.join("\n").trim().to_string()
}

/// Where the fence opened on the first line is closed.
#[derive(Debug, PartialEq)]
enum FirstBlock {
    /// First line is not a fence.
    None,
    /// Closed on this line.
    ClosedAt(usize),
    /// Never closed.
    Unclosed,
}

/// Walk the fences as nested blocks: a fence with an info string always
/// opens, a bare fence closes the innermost open block or opens one when
/// none is open.
///
/// Returns where the first line's block closes, and whether the last line
/// is a bare fence that opens a block of its own.
fn walk_fences(lines: &[&str]) -> (FirstBlock, bool) {
    let mut depth = 0usize;
    let mut first = FirstBlock::None;
    let mut stray_last = false;

    for (i, line) in lines.iter().enumerate() {
        let t = line.trim_end();
        if !RE_FENCE_OPEN.is_match(t) {
            continue;
        }
        if RE_FENCE_BARE.is_match(t) && depth > 0 {
            depth -= 1;
            if depth == 0 && first == FirstBlock::Unclosed {
                first = FirstBlock::ClosedAt(i);
            }
        } else {
            depth += 1;
            if i == 0 {
                first = FirstBlock::Unclosed;
            }
            stray_last = i + 1 == lines.len() && i > 0 && RE_FENCE_BARE.is_match(t);
        }
    }
    (first, stray_last)
}

fn strip_wrapping_fence(lines: &mut Vec<&str>) {
    let last = lines.len().saturating_sub(1);
    match walk_fences(lines) {
        (FirstBlock::ClosedAt(close), _) if close == last => {
            lines.pop();
            lines.remove(0);
        }
        // Truncated answer: opener without its closer.
        (FirstBlock::Unclosed, _) => {
            lines.remove(0);
        }
        (_, true) => {
            lines.pop();
        }
        _ => {}
    }
}

fn strip_trailing_commentary(lines: &mut Vec<&str>) {
    let mut in_fence = false;
    let mut headings: Vec<usize> = Vec::new();
    let mut last_rule: Option<usize> = None;

    for (i, line) in lines.iter().enumerate() {
        let t = line.trim();
        if RE_FENCE_OPEN.is_match(t) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if RE_HEADING.is_match(t) {
            headings.push(i);
        } else if RE_HRULE.is_match(t) {
            last_rule = Some(i);
        }
    }

    // Trailing run of allowlisted headings.
    let mut cut: Option<usize> = None;
    for &i in headings.iter().rev() {
        if RE_EXPLANATION_HEADING.is_match(lines[i].trim()) {
            cut = Some(i);
        } else {
            break;
        }
    }

    // Rule followed by a commentary lead, with no heading after the rule.
    if let Some(r) = last_rule {
        let heading_after = headings.last().is_some_and(|&h| h > r);
        let lead = lines[r + 1..].iter().map(|l| l.trim()).find(|l| !l.is_empty());
        if !heading_after && lead.is_some_and(|l| RE_EXPLANATION_LEAD.is_match(l)) {
            cut = Some(cut.map_or(r, |c| c.min(r)));
        }
    }

    if let Some(c) = cut {
        lines.truncate(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fence() {
        assert_eq!(sanitize("```markdown\n# T\nBody\n```"), "# T\nBody");
    }

    #[test]
    fn strips_bare_fence() {
        assert_eq!(sanitize("```\n# Hello\nWorld\n```"), "# Hello\nWorld");
    }

    #[test]
    fn strips_unclosed_opener() {
        assert_eq!(sanitize("```markdown\n# T\nBody"), "# T\nBody");
    }

    #[test]
    fn keeps_trailing_code_block() {
        let md = "# T\nExample:\n```rust\nfn main() {}\n```";
        assert_eq!(sanitize(md), md);
    }

    #[test]
    fn removes_explanation_heading() {
        let input = "# Main Content\nThis is the main content.\n\n### Explanation\nThis is an explanation that should be removed.";
        assert_eq!(sanitize(input), "# Main Content\nThis is the main content.");
    }

    #[test]
    fn removes_separator_explanation() {
        let input = "# Main Content\nReal content here.\n---\nExplanation: This part should be removed.";
        let out = sanitize(input);
        assert!(out.contains("Real content here."));
        assert!(!out.contains("Explanation:"));
        assert!(!out.ends_with("---"));
    }

    #[test]
    fn removes_bold_treatment_notes_after_rule() {
        let input = "# Doc\nBody\n\n---\n\n**Treatment Notes:**\n- fixed things";
        assert_eq!(sanitize(input), "# Doc\nBody");
    }

    #[test]
    fn preserves_academic_sections() {
        let input = "# Research Paper\n## Abstract\nImportant.\n## Introduction\nMore.\n## Notes\n1. A footnote.\n## References\n[1] X.";
        assert_eq!(sanitize(input), input);
    }

    #[test]
    fn preserves_trailing_notes_after_rule() {
        let input = "# Doc\nBody\n\n---\n\nNotes: all experiments ran on one GPU.";
        assert_eq!(sanitize(input), input);
    }

    #[test]
    fn rule_before_real_section_is_kept() {
        let input = "# Doc\n---\nHere is context.\n## Results\nNumbers.";
        assert_eq!(sanitize(input), input);
    }

    #[test]
    fn idempotent_on_tricky_inputs() {
        let cases = [
            "",
            "   ",
            "```",
            "```\n```\nx\n```\n```",
            "```markdown\n# T\n```\n---\nExplanation: x",
            "plain text",
            "# A\n### Explanation\n### Changes Made\nstuff",
            "~~~\ncode\n~~~",
            "---\nI have fixed the OCR errors.",
        ];
        for x in cases {
            let once = sanitize(x);
            assert_eq!(sanitize(&once), once, "not idempotent for {x:?}");
        }
    }

    #[test]
    fn clean_input_is_unchanged() {
        let md = "# Title\n\n## Section\n\nText with `code` and **bold**.";
        assert_eq!(sanitize(md), md);
    }

    #[test]
    fn separate_leading_and_trailing_blocks_are_kept() {
        let md = "```python\nx = 1\n```\nProse between blocks.\n```\ny = 2\n```";
        assert_eq!(sanitize(md), md);
    }

    #[test]
    fn wrapper_around_inner_code_block_is_stripped() {
        let input = "```markdown\n# T\n```python\nx = 1\n```\nAfter.\n```";
        assert_eq!(sanitize(input), "# T\n```python\nx = 1\n```\nAfter.");
    }

    #[test]
    fn stray_trailing_fence_is_dropped() {
        assert_eq!(sanitize("# T\nBody\n```"), "# T\nBody");
    }

    #[test]
    fn trailing_prose_after_rule_is_kept() {
        let md = "# Paper\n\n## Data\nWe collected data.\n\n---\n\nHere is the link to our public dataset: example.org/data";
        assert_eq!(sanitize(md), md);
        let md = "# Paper\nBody\n\n---\n\nI have no conflicts of interest to declare.";
        assert_eq!(sanitize(md), md);
    }

    #[test]
    fn bold_label_with_colon_outside_is_removed() {
        assert_eq!(sanitize("# Doc\nBody\n---\n**Changes Made**: none"), "# Doc\nBody");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn markdownish() -> impl Strategy<Value = String> {
            let line = prop_oneof![
                Just("```".to_string()),
                Just("```markdown".to_string()),
                Just("~~~".to_string()),
                Just("---".to_string()),
                Just("".to_string()),
                Just("Explanation: tidied".to_string()),
                Just("### Changes Made".to_string()),
                Just("## Results".to_string()),
                "[a-zA-Z #*:`-]{0,24}",
            ];
            prop::collection::vec(line, 0..16).prop_map(|lines| lines.join("\n"))
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(512))]

            #[test]
            fn idempotent_on_markdownish_input(input in markdownish()) {
                let once = sanitize(&input);
                prop_assert_eq!(sanitize(&once), once);
            }

            #[test]
            fn idempotent_on_arbitrary_input(input in "(?s).{0,200}") {
                let once = sanitize(&input);
                prop_assert_eq!(sanitize(&once), once);
            }

            #[test]
            fn never_grows(input in markdownish()) {
                prop_assert!(sanitize(&input).len() <= input.len());
            }
        }
    }
}
