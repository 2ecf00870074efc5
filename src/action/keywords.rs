//! Keyword tables for heuristic extraction.
//!
//! Kept as data so the lists can be tuned and tested on their own.

/// Keywords searched by the loose scan, with the raw type each one
/// produces. The earliest mention in the text wins. `extract` is recognized but is not a member of
/// the closed type set, so normalization discards it and the chain moves on.
pub const ACTION_KEYWORDS: &[(&str, &str)] = &[
    ("click", "click"),
    ("input", "input"),
    ("navigate", "navigate"),
    ("scroll", "scroll"),
    ("extract", "extract"),
    ("wait", "wait"),
    ("notes", "notes"),
    ("sendHumanMessage", "sendHumanMessage"),
    ("askHuman", "sendHumanMessage"),
    ("ask human", "sendHumanMessage"),
    ("ask the human", "sendHumanMessage"),
    ("ask the user", "sendHumanMessage"),
];

/// Phrases that signal the model wants a human to step in.
pub const HELP_PHRASES: &[&str] = &[
    "need help",
    "needs help",
    "not sure",
    "unsure",
    "confused",
    "unclear",
    "don't know",
    "do not know",
    "stuck",
    "help me",
    "cannot figure",
    "can't figure",
];

/// Keys recognized by the key-value scan, with the field each maps to.
///
/// `text` and `url` fill `value` only when no explicit `value` key was seen.
pub const KEY_VALUE_KEYS: &[(&str, &str)] = &[
    ("type", "type"),
    ("action", "action"),
    ("element", "element"),
    ("selector", "selector"),
    ("target", "target"),
    ("value", "value"),
    ("text", "text"),
    ("url", "url"),
    ("description", "description"),
    ("question", "question"),
    ("direction", "direction"),
    ("operation", "operation"),
    ("note", "note"),
    ("maxwait", "maxWait"),
    ("selectortype", "selectorType"),
    ("previousurl", "previousUrl"),
];

/// Maximum characters of the original text kept in a synthesized question.
pub const HUMAN_QUESTION_LIMIT: usize = 200;

/// Appended when a synthesized question is truncated.
pub const ELLIPSIS: &str = "...";

/// Raw type for a keyword as it appeared in the text.
pub fn keyword_type(found: &str) -> Option<&'static str> {
    ACTION_KEYWORDS
        .iter()
        .find(|(keyword, _)| keyword.eq_ignore_ascii_case(found))
        .map(|(_, raw_type)| *raw_type)
}

/// Look up the canonical field name for a key-value key.
pub fn canonical_key(key: &str) -> Option<&'static str> {
    let key = key.to_lowercase();
    KEY_VALUE_KEYS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, field)| *field)
}

/// Whether the text contains any help-seeking phrase (case-insensitive).
pub fn contains_help_phrase(text: &str) -> bool {
    let lower = text.to_lowercase();
    HELP_PHRASES.iter().any(|p| lower.contains(p))
}
