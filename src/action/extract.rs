//! Action extraction: free-form model text to a normalized [`Action`].
//!
//! Branches run in a fixed order and the first one that yields a valid
//! action wins:
//!
//! 1. direct JSON parse of the whole text (plus the `a.<url>` shorthand)
//! 2. first brace-delimited substring that parses as a JSON object
//! 3. `key: value` / `key=value` tokens with a `type` or `action` key
//! 4. loose action keyword anywhere in the text
//! 5. help-seeking phrase, escalated to a human
//!
//! Every branch funnels through [`Action::from_fields`], so a branch whose
//! type falls outside the closed set counts as a miss.

use super::keywords::{self, ACTION_KEYWORDS, ELLIPSIS, HUMAN_QUESTION_LIMIT};
use super::{apply_link_shorthand, Action, ActionType};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::debug;

type Branch = fn(&str) -> Option<Action>;

/// The extraction chain, in order.
const BRANCHES: &[(&str, Branch)] = &[
    ("direct", direct),
    ("embedded_json", embedded_json),
    ("key_value", key_value),
    ("loose_keyword", loose_keyword),
    ("defer_to_human", defer_to_human),
];

/// Turns raw model output into at most one action. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionExtractor;

impl ActionExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Run the chain. Returns `None` for blank input or when every branch misses.
    pub fn extract(&self, raw: &str) -> Option<Action> {
        if raw.trim().is_empty() {
            return None;
        }
        for (name, branch) in BRANCHES {
            if let Some(action) = branch(raw) {
                debug!("extracted {} via {}", action.action_type, name);
                return Some(action);
            }
        }
        debug!("no extraction branch matched");
        None
    }
}

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn json_object_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"\{[^{}]*\}")
}

fn key_value_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(
        &RE,
        r#"(?i)["']?\b([a-z]+)\b["']?\s*[:=]\s*(?:"([^"]*)"|'([^']*)'|((?:[^\s,;}\]"'\[]|\[[^\]]*\])+))"#,
    )
}

fn action_keyword_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = ACTION_KEYWORDS
            .iter()
            .map(|(keyword, _)| regex::escape(keyword))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).ok()
    })
    .as_ref()
}

fn element_field_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(
        &RE,
        r#"(?i)\b(?:element|selector)\b["']?\s*[:=]?\s*["']([^"']+)["']"#,
    )
}

fn value_field_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r#"(?i)\b(?:value|text)\b["']?\s*[:=]?\s*["']([^"']+)["']"#)
}

fn question_field_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r#"(?i)\bquestion\b["']?\s*[:=]?\s*["']([^"']+)["']"#)
}

/// Branch 1: the whole text is one JSON object.
pub fn direct(raw: &str) -> Option<Action> {
    let value: Value = serde_json::from_str(raw.trim()).ok()?;
    let mut fields = value.as_object()?.clone();
    apply_link_shorthand(&mut fields);
    Action::from_fields(&fields)
}

/// Branch 2: the first brace-delimited substring that parses as an object.
pub fn embedded_json(raw: &str) -> Option<Action> {
    let re = json_object_re()?;
    let fields = re
        .find_iter(raw)
        .filter_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .find_map(|v| v.as_object().cloned())?;
    Action::from_fields(&fields)
}

/// Branch 3: `key: value` / `key=value` tokens.
///
/// The first occurrence of each key wins. An `action` key stands in for
/// `type` only when no explicit `type` key is present.
pub fn key_value(raw: &str) -> Option<Action> {
    let re = key_value_re()?;
    let mut fields = Map::new();
    for caps in re.captures_iter(raw) {
        let Some(field) = caps.get(1).and_then(|k| keywords::canonical_key(k.as_str())) else {
            continue;
        };
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        fields
            .entry(field.to_string())
            .or_insert(Value::String(value));
    }

    if !fields.contains_key("type") {
        let action = fields.remove("action")?;
        fields.insert("type".into(), action);
    }
    for alias in ["text", "url"] {
        if let Some(v) = fields.remove(alias) {
            fields.entry("value".to_string()).or_insert(v);
        }
    }
    Action::from_fields(&fields)
}

/// Branch 4: the first action keyword in the text, with fields pulled
/// from quoted `element`/`selector`, `value`/`text` and `question` mentions.
pub fn loose_keyword(raw: &str) -> Option<Action> {
    let found = action_keyword_re()?.find(raw)?;
    let raw_type = keywords::keyword_type(found.as_str())?;

    let mut fields = Map::new();
    fields.insert("type".into(), Value::String(raw_type.to_string()));
    if let Some(element) = first_capture(element_field_re(), raw) {
        fields.insert("element".into(), Value::String(element));
    }
    if let Some(value) = first_capture(value_field_re(), raw) {
        fields.insert("value".into(), Value::String(value));
    }
    if ActionType::parse(raw_type) == Some(ActionType::SendHumanMessage) {
        if let Some(question) = first_capture(question_field_re(), raw) {
            fields.insert("question".into(), Value::String(question));
        }
    }
    Action::from_fields(&fields)
}

/// Branch 5: escalate help-seeking text to a human, quoting the text.
pub fn defer_to_human(raw: &str) -> Option<Action> {
    if !keywords::contains_help_phrase(raw) {
        return None;
    }
    let mut action = Action::new(ActionType::SendHumanMessage);
    action.question = Some(truncate_question(raw.trim()));
    Some(action)
}

fn first_capture(re: Option<&Regex>, raw: &str) -> Option<String> {
    re?.captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn truncate_question(text: &str) -> String {
    if text.chars().count() <= HUMAN_QUESTION_LIMIT {
        return text.to_string();
    }
    let mut out: String = text.chars().take(HUMAN_QUESTION_LIMIT).collect();
    out.push_str(ELLIPSIS);
    out
}
