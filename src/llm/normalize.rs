//! Best-effort recovery of a JSON object from free-form model output.
//!
//! Models asked for strict JSON still occasionally wrap the payload in a
//! markdown fence or surround it with prose. This is a pure text transform:
//! it always returns some string, which may still fail to parse downstream.
//! Callers try a strict parse first and only reach for this on failure.

/// Extract the most plausible JSON-object substring from model output.
///
/// Strips a leading ```-fenced line and trailing fence, then cuts from the
/// first `{` to the last `}` inclusive. Input without a brace pair comes
/// back trimmed but otherwise unchanged, which makes the transform
/// idempotent.
pub fn normalize_json_candidate(s: &str) -> String {
    let mut trimmed = s.trim();

    // Strip common fenced JSON blocks: ```json\n{...}\n```
    if trimmed.starts_with("```") {
        if let Some(idx) = trimmed.find('\n') {
            trimmed = trimmed[idx + 1..].trim();
        }
        trimmed = trimmed.trim_end_matches("```").trim();
    }

    // If there's extra prose, cut out the outermost JSON object.
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            return trimmed[start..=end].trim().to_string();
        }
    }

    s.trim().to_string()
}
