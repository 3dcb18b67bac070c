//! Lightweight message classification for prompt routing.
//!
//! Two heuristics feed the agent's branch decision: detecting
//! meta-questions about the workspace itself ("what documents do I
//! have?"), and spotting an explicit mention of a known document by
//! name. Both are plain substring checks; no model call is involved.

/// Phrases that mark a question as being about the workspace contents
/// rather than about any document's contents.
const META_PATTERNS: &[&str] = &[
    "what documents",
    "what files",
    "which documents",
    "which files",
    "documents do i have",
    "files do i have",
    "documents are uploaded",
    "files are uploaded",
    "documents have i uploaded",
    "files have i uploaded",
    "list my documents",
    "list my files",
    "list the documents",
    "list the files",
    "show my documents",
    "show my files",
    "how many documents",
    "how many files",
];

/// True when the message asks about the workspace inventory itself.
pub fn is_meta_question(message: &str) -> bool {
    let lowered = message.to_lowercase();
    META_PATTERNS.iter().any(|p| lowered.contains(p))
}

/// If the message names one of the known document filenames, return it.
/// Matching is case-insensitive and also accepts the stem without its
/// extension ("the budget spreadsheet" does not match; "budget.xlsx"
/// and "budget" both do).
pub fn mentioned_document(message: &str, filenames: &[String]) -> Option<String> {
    let lowered = message.to_lowercase();
    for name in filenames {
        let name_lower = name.to_lowercase();
        if lowered.contains(&name_lower) {
            return Some(name.clone());
        }
        if let Some(stem) = std::path::Path::new(&name_lower)
            .file_stem()
            .and_then(|s| s.to_str())
        {
            // Require the stem to appear as a whole word so "report"
            // does not fire on "reported".
            if contains_word(&lowered, stem) {
                return Some(name.clone());
            }
        }
    }
    None
}

fn contains_word(haystack: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(word) {
        let abs = start + pos;
        let before_ok = abs == 0
            || !haystack[..abs]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let after = abs + word.len();
        let after_ok = after >= haystack.len()
            || !haystack[after..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        // Advance one full character to keep the slice on a boundary.
        let step = haystack[abs..].chars().next().map_or(1, |c| c.len_utf8());
        start = abs + step;
    }
    false
}
