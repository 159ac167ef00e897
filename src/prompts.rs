//! Prompts for AI treatment of extracted paper markdown.
//!
//! Every prompt lives here so that a wording change is a one-file edit and
//! so tests can inspect the exact text sent to the service. Callers override
//! the system instruction via
//! [`crate::config::TreatmentConfig::system_prompt`].

/// Fixed system instruction: improve the markdown, never shorten it.
pub const PRESERVATION_SYSTEM_PROMPT: &str = r#"You are an expert academic paper processor. Your task is to improve the quality of markdown extracted from PDFs while preserving ALL content. Focus on:
1. Fixing OCR errors and text recognition mistakes
2. Improving formatting and structure
3. Enhancing readability while preserving academic integrity
4. Correcting citation formats and references
5. Improving table and figure formatting

CRITICAL REQUIREMENTS:
- PRESERVE ALL ORIGINAL CONTENT - do not summarize, shorten, or omit any text
- Do NOT summarize any section, paragraph, table or reference list
- Fix errors but keep the same length and detail level
- Maintain the complete document structure and every heading
- Return the FULL corrected document from beginning to end, not a summary
- Do not wrap the output in code blocks
- Do not add explanations, notes or commentary before or after the document"#;

/// Instruction used when the caller supplies none.
pub const DEFAULT_INSTRUCTION: &str = r#"Read the given Markdown and correct it according to the following rules:
- Do not alter the meaning or context of the content.
- Do not paraphrase or rephrase sentences.
- If an image or text block is placed in the wrong position, move it to its correct location.
- Fix LaTeX or equation syntax errors to ensure proper rendering.
- Replace any incorrectly displayed symbols or special characters with their correct versions.
- Maintain valid Markdown formatting throughout.
- Fix common OCR errors while preserving academic terminology.
- Ensure proper heading hierarchy and document structure."#;

/// Build the single combined prompt sent to the text service.
///
/// Layout: system instruction, caller instruction, then the full markdown.
/// An empty `instruction` falls back to [`DEFAULT_INSTRUCTION`].
pub fn build_prompt(system_prompt: &str, instruction: &str, markdown: &str) -> String {
    let instruction = if instruction.trim().is_empty() {
        DEFAULT_INSTRUCTION
    } else {
        instruction.trim()
    };
    format!(
        "{system_prompt}\n\nUser instructions: {instruction}\n\nMarkdown to process:\n\n{markdown}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_all_parts_in_order() {
        let p = build_prompt(PRESERVATION_SYSTEM_PROMPT, "Fix OCR", "# Doc\nBody");
        let sys = p.find("PRESERVE ALL ORIGINAL CONTENT").unwrap();
        let ins = p.find("User instructions: Fix OCR").unwrap();
        let doc = p.find("# Doc\nBody").unwrap();
        assert!(sys < ins && ins < doc);
        assert!(p.ends_with("# Doc\nBody"));
    }

    #[test]
    fn empty_instruction_uses_default() {
        let p = build_prompt("sys", "  ", "md");
        assert!(p.contains("Do not paraphrase"));
    }

    #[test]
    fn system_prompt_forbids_summaries() {
        assert!(PRESERVATION_SYSTEM_PROMPT.contains("Do NOT summarize"));
        assert!(PRESERVATION_SYSTEM_PROMPT.contains("FULL corrected document"));
    }
}
