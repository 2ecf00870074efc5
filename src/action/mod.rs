//! Action model: the normalized instruction the state machine executes.
//!
//! Every [`Action`] leaving this module is fully populated: the type is a
//! member of the closed [`ActionType`] set and `selector_type`/`max_wait`
//! always carry a value. Partially specified model output never gets past
//! [`Action::from_fields`].

pub mod extract;
pub mod keywords;
pub mod validate;

pub use extract::ActionExtractor;
pub use validate::{ActionValidator, ValidationContext};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Default upper bound for waits tied to an action, in milliseconds.
pub const DEFAULT_MAX_WAIT_MS: u64 = 5000;

/// Prefix that marks a click `value` as an anchor URL reference.
const LINK_SHORTHAND_PREFIX: &str = "a.";

/// Closed set of action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    Click,
    Input,
    Navigate,
    Wait,
    Scroll,
    Notes,
    /// Escalate to a human operator (`askHuman` is accepted as an alias).
    #[serde(alias = "askHuman")]
    SendHumanMessage,
}

impl ActionType {
    pub const ALL: [ActionType; 7] = [
        Self::Click,
        Self::Input,
        Self::Navigate,
        Self::Wait,
        Self::Scroll,
        Self::Notes,
        Self::SendHumanMessage,
    ];

    /// Case-insensitive lookup against the closed set.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "click" => Some(Self::Click),
            "input" => Some(Self::Input),
            "navigate" => Some(Self::Navigate),
            "wait" => Some(Self::Wait),
            "scroll" => Some(Self::Scroll),
            "notes" => Some(Self::Notes),
            "sendhumanmessage" | "send_human_message" | "askhuman" | "ask_human" => {
                Some(Self::SendHumanMessage)
            }
            _ => None,
        }
    }

    /// Canonical name, as the model is told to spell it.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Input => "input",
            Self::Navigate => "navigate",
            Self::Wait => "wait",
            Self::Scroll => "scroll",
            Self::Notes => "notes",
            Self::SendHumanMessage => "sendHumanMessage",
        }
    }

    /// Whether executing this type requires a resolved element.
    pub fn needs_element(&self) -> bool {
        matches!(self, Self::Click | Self::Input)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How `target` should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorType {
    #[default]
    Css,
    Xpath,
    Text,
}

impl SelectorType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "css" => Some(Self::Css),
            "xpath" => Some(Self::Xpath),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteOperation {
    Add,
    Read,
}

impl NoteOperation {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "add" => Some(Self::Add),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// A normalized instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Selector-like descriptor of the element to act on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// URL, input text, wait duration, or note content depending on the type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Only meaningful for [`ActionType::SendHumanMessage`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default)]
    pub selector_type: SelectorType,
    /// Positive, in milliseconds.
    #[serde(default = "default_max_wait")]
    pub max_wait: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<ScrollDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<NoteOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// URL before a navigation, kept for post-navigation verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_url: Option<String>,
}

fn default_max_wait() -> u64 {
    DEFAULT_MAX_WAIT_MS
}

impl Action {
    /// A bare action of the given type with all defaults applied.
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            target: None,
            value: None,
            description: None,
            question: None,
            selector_type: SelectorType::Css,
            max_wait: DEFAULT_MAX_WAIT_MS,
            direction: None,
            operation: None,
            note: None,
            previous_url: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Normalize a JSON value. Anything but an object is rejected.
    pub fn normalize(value: &Value) -> Option<Self> {
        value.as_object().and_then(Self::from_fields)
    }

    /// Shared normalization step for every extraction branch.
    ///
    /// `target` comes from `element`, then `selector`, then `target`.
    /// `type` is lower-cased and must land in the closed set, otherwise
    /// the whole result is discarded.
    pub fn from_fields(fields: &Map<String, Value>) -> Option<Self> {
        let action_type = field_str(fields, "type").and_then(|t| ActionType::parse(&t))?;

        let target = field_str(fields, "element")
            .or_else(|| field_str(fields, "selector"))
            .or_else(|| field_str(fields, "target"));

        let selector_type = field_str(fields, "selectorType")
            .and_then(|s| SelectorType::parse(&s))
            .unwrap_or_default();

        let max_wait = fields
            .get("maxWait")
            .and_then(positive_millis)
            .unwrap_or(DEFAULT_MAX_WAIT_MS);

        Some(Self {
            action_type,
            target,
            value: field_str(fields, "value"),
            description: field_str(fields, "description"),
            question: field_str(fields, "question"),
            selector_type,
            max_wait,
            direction: field_str(fields, "direction").and_then(|d| ScrollDirection::parse(&d)),
            operation: field_str(fields, "operation").and_then(|o| NoteOperation::parse(&o)),
            note: field_str(fields, "note"),
            previous_url: field_str(fields, "previousUrl"),
        })
    }

    /// Short human-readable form used in history entries.
    pub fn summary(&self) -> String {
        let target = self.target.as_deref().unwrap_or("?");
        match self.action_type {
            ActionType::Click => format!("click {}", target),
            ActionType::Input => format!(
                "input \"{}\" into {}",
                self.value.as_deref().unwrap_or(""),
                target
            ),
            ActionType::Navigate => {
                format!("navigate to {}", self.value.as_deref().unwrap_or("?"))
            }
            ActionType::Wait => format!("wait {}ms", self.value.as_deref().unwrap_or("?")),
            ActionType::Scroll => format!(
                "scroll {}",
                match self.direction {
                    Some(ScrollDirection::Up) => "up",
                    _ => "down",
                }
            ),
            ActionType::Notes => match self.operation {
                Some(NoteOperation::Read) => "read notes".to_string(),
                _ => "add note".to_string(),
            },
            ActionType::SendHumanMessage => format!(
                "ask human: {}",
                self.question.as_deref().unwrap_or("(no question)")
            ),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Rewrite `{"type":"click","value":"a.<url>"}` into an anchor selector.
///
/// Applies only when no `element`, `selector` or `target` is present. The
/// original value moves to `description` and `value` is dropped.
pub fn apply_link_shorthand(fields: &mut Map<String, Value>) {
    let is_click = field_str(fields, "type")
        .map(|t| t.trim().eq_ignore_ascii_case("click"))
        .unwrap_or(false);
    if !is_click {
        return;
    }
    if ["element", "selector", "target"]
        .iter()
        .any(|k| field_str(fields, k).is_some())
    {
        return;
    }
    let Some(value) = field_str(fields, "value") else {
        return;
    };
    let Some(url) = value.strip_prefix(LINK_SHORTHAND_PREFIX) else {
        return;
    };

    let selector = format!("a[href=\"{}\"]", css_escape_attr(url));
    fields.insert("target".into(), Value::String(selector));
    fields.insert("description".into(), Value::String(value.clone()));
    fields.remove("value");
}

/// Escape a string for use inside a double-quoted CSS attribute value.
pub fn css_escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\a "),
            '\r' => out.push_str("\\d "),
            c => out.push(c),
        }
    }
    out
}

/// Read a field as a string. Numbers and booleans are stringified; empty
/// strings and nulls count as absent.
fn field_str(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn positive_millis(v: &Value) -> Option<u64> {
    let ms = match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    (ms > 0).then_some(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_defaults() {
        let a = Action::normalize(&json!({"type": "click", "element": "#submit-button"})).unwrap();
        assert_eq!(a.action_type, ActionType::Click);
        assert_eq!(a.target.as_deref(), Some("#submit-button"));
        assert_eq!(a.selector_type, SelectorType::Css);
        assert_eq!(a.max_wait, 5000);
    }

    #[test]
    fn element_takes_precedence_over_selector() {
        let a = Action::normalize(&json!({
            "type": "click",
            "selector": ".second",
            "element": "#first"
        }))
        .unwrap();
        assert_eq!(a.target.as_deref(), Some("#first"));

        let a = Action::normalize(&json!({"type": "click", "selector": ".second"})).unwrap();
        assert_eq!(a.target.as_deref(), Some(".second"));
    }

    #[test]
    fn type_is_case_insensitive_and_closed() {
        let a = Action::normalize(&json!({"type": "NAVIGATE", "value": "https://x.io"})).unwrap();
        assert_eq!(a.action_type, ActionType::Navigate);

        assert!(Action::normalize(&json!({"type": "extract"})).is_none());
        assert!(Action::normalize(&json!({"element": "#x"})).is_none());
        assert!(Action::normalize(&json!(["click"])).is_none());
    }

    #[test]
    fn human_aliases() {
        for t in ["sendHumanMessage", "askHuman", "ask_human"] {
            let a = Action::normalize(&json!({"type": t})).unwrap();
            assert_eq!(a.action_type, ActionType::SendHumanMessage);
        }
    }

    #[test]
    fn max_wait_must_be_positive() {
        let a = Action::normalize(&json!({"type": "wait", "maxWait": 0})).unwrap();
        assert_eq!(a.max_wait, 5000);
        let a = Action::normalize(&json!({"type": "wait", "maxWait": "750"})).unwrap();
        assert_eq!(a.max_wait, 750);
        let a = Action::normalize(&json!({"type": "wait", "maxWait": -3})).unwrap();
        assert_eq!(a.max_wait, 5000);
    }

    #[test]
    fn numeric_value_is_stringified() {
        let a = Action::normalize(&json!({"type": "wait", "value": 2000})).unwrap();
        assert_eq!(a.value.as_deref(), Some("2000"));
    }

    #[test]
    fn copies_optional_fields() {
        let a = Action::normalize(&json!({
            "type": "notes",
            "operation": "ADD",
            "note": "price is 42",
            "description": "remember",
            "previousUrl": "https://a.b/"
        }))
        .unwrap();
        assert_eq!(a.operation, Some(NoteOperation::Add));
        assert_eq!(a.note.as_deref(), Some("price is 42"));
        assert_eq!(a.description.as_deref(), Some("remember"));
        assert_eq!(a.previous_url.as_deref(), Some("https://a.b/"));

        let a = Action::normalize(&json!({"type": "scroll", "direction": "Up"})).unwrap();
        assert_eq!(a.direction, Some(ScrollDirection::Up));
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            json!({"type": "click", "element": "#a", "selectorType": "xpath", "maxWait": 1200}),
            json!({"type": "input", "selector": "input[name=q]", "value": "rust"}),
            json!({"type": "scroll", "direction": "down"}),
            json!({"type": "askHuman", "question": "Which account?"}),
            json!({"type": "notes", "operation": "read"}),
            json!({"type": "navigate", "value": "https://example.com", "previousUrl": "about:blank"}),
        ];
        for input in inputs {
            let once = Action::normalize(&input).unwrap();
            let twice = Action::normalize(&serde_json::to_value(&once).unwrap()).unwrap();
            assert_eq!(once, twice, "input: {}", input);
        }
    }

    #[test]
    fn link_shorthand_rewrites_target() {
        let mut fields = json!({"type": "click", "value": "a.https://example.com/page"})
            .as_object()
            .cloned()
            .unwrap();
        apply_link_shorthand(&mut fields);
        let a = Action::from_fields(&fields).unwrap();
        assert_eq!(a.target.as_deref(), Some("a[href=\"https://example.com/page\"]"));
        assert_eq!(a.value, None);
        assert_eq!(a.description.as_deref(), Some("a.https://example.com/page"));
    }

    #[test]
    fn link_shorthand_skipped_with_explicit_target() {
        let mut fields = json!({"type": "click", "element": "#x", "value": "a.https://e.com"})
            .as_object()
            .cloned()
            .unwrap();
        apply_link_shorthand(&mut fields);
        assert_eq!(fields["value"], "a.https://e.com");
        assert_eq!(fields["element"], "#x");
    }

    #[test]
    fn css_escape() {
        assert_eq!(css_escape_attr(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(css_escape_attr("https://e.com/?q=1&x=2"), "https://e.com/?q=1&x=2");
    }

    #[test]
    fn serializes_camel_case() {
        let a = Action::new(ActionType::SendHumanMessage);
        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v["type"], "sendHumanMessage");
        assert_eq!(v["selectorType"], "css");
        assert_eq!(v["maxWait"], 5000);
        assert!(v.get("target").is_none());
    }
}
