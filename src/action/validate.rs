//! Contextual check and defaulting pass applied after extraction.

use super::{Action, ActionType, DEFAULT_MAX_WAIT_MS};
use crate::snapshot::PageSnapshot;
use crate::{Error, Result};
use tracing::{debug, warn};

/// Target given to a click that arrives without one.
pub const FALLBACK_CLICK_TARGET: &str = r#"button, [role="button"], input[type="submit"]"#;

/// Question given to a human escalation that arrives without one.
pub const DEFAULT_HUMAN_QUESTION: &str =
    "The agent is unsure how to proceed. What should it do next?";

/// What the validator knows about the page the action will run against.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    pub current_url: Option<String>,
    /// Selectors of the interactive elements in the last snapshot, if any.
    pub interactive_elements: Option<Vec<String>>,
}

impl ValidationContext {
    pub fn from_snapshot(snapshot: Option<&PageSnapshot>) -> Self {
        match snapshot {
            Some(s) => Self {
                current_url: Some(s.url.clone()).filter(|u| !u.is_empty()),
                interactive_elements: Some(s.elements.iter().map(|e| e.selector.clone()).collect()),
            },
            None => Self::default(),
        }
    }
}

/// Soft validation. Never fails outward.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionValidator;

impl ActionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check and default the action. Any internal error returns the input unchanged.
    pub fn validate(&self, action: Action, ctx: &ValidationContext) -> Action {
        match self.try_validate(action.clone(), ctx) {
            Ok(validated) => validated,
            Err(e) => {
                warn!("validation skipped for {}: {}", action.action_type, e);
                action
            }
        }
    }

    fn try_validate(&self, mut action: Action, ctx: &ValidationContext) -> Result<Action> {
        self.check_state(&action, ctx)?;
        self.apply_defaults(&mut action, ctx);
        Ok(action)
    }

    fn check_state(&self, action: &Action, ctx: &ValidationContext) -> Result<()> {
        match action.action_type {
            ActionType::Click | ActionType::Input => {
                if let (Some(known), Some(target)) = (&ctx.interactive_elements, &action.target) {
                    if !known.iter().any(|s| s == target) {
                        warn!(
                            "target '{}' not among {} known interactive elements",
                            target,
                            known.len()
                        );
                    }
                }
            }
            ActionType::Navigate => {
                let value = action
                    .value
                    .as_deref()
                    .ok_or_else(|| Error::Validation("navigate without a URL".into()))?;
                url::Url::parse(value)
                    .map_err(|e| Error::Validation(format!("invalid URL '{}': {}", value, e)))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_defaults(&self, action: &mut Action, ctx: &ValidationContext) {
        if action.max_wait == 0 {
            action.max_wait = DEFAULT_MAX_WAIT_MS;
        }
        match action.action_type {
            ActionType::Click if action.target.is_none() => {
                debug!("click without target, using fallback");
                action.target = Some(FALLBACK_CLICK_TARGET.to_string());
            }
            ActionType::Navigate => {
                if let Some(ref url) = ctx.current_url {
                    action.previous_url = Some(url.clone());
                }
            }
            ActionType::SendHumanMessage if action.question.is_none() => {
                action.question = Some(DEFAULT_HUMAN_QUESTION.to_string());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(url: &str, elements: &[&str]) -> ValidationContext {
        ValidationContext {
            current_url: Some(url.to_string()),
            interactive_elements: Some(elements.iter().map(|s| s.to_string()).collect()),
        }
    }

    #[test]
    fn unknown_target_is_not_blocked() {
        let a = Action::new(ActionType::Click).with_target("#missing");
        let v = ActionValidator::new().validate(a.clone(), &ctx("https://a.io", &["#present"]));
        assert_eq!(v, a);
    }

    #[test]
    fn click_without_target_gets_fallback() {
        let v = ActionValidator::new().validate(
            Action::new(ActionType::Click),
            &ValidationContext::default(),
        );
        assert_eq!(v.target.as_deref(), Some(FALLBACK_CLICK_TARGET));
    }

    #[test]
    fn navigate_records_previous_url() {
        let a = Action::new(ActionType::Navigate).with_value("https://rust-lang.org/");
        let v = ActionValidator::new().validate(a, &ctx("https://example.com/", &[]));
        assert_eq!(v.previous_url.as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn invalid_navigate_returns_original() {
        let a = Action::new(ActionType::Navigate).with_value("not a url");
        let v = ActionValidator::new().validate(a.clone(), &ctx("https://example.com/", &[]));
        assert_eq!(v, a);
        assert_eq!(v.previous_url, None);
        assert_eq!(v.max_wait, DEFAULT_MAX_WAIT_MS);
    }

    #[test]
    fn human_without_question_gets_prompt() {
        let v = ActionValidator::new().validate(
            Action::new(ActionType::SendHumanMessage),
            &ValidationContext::default(),
        );
        assert_eq!(v.question.as_deref(), Some(DEFAULT_HUMAN_QUESTION));
    }

    #[test]
    fn zero_max_wait_is_restored() {
        let mut a = Action::new(ActionType::Wait);
        a.max_wait = 0;
        let v = ActionValidator::new().validate(a, &ValidationContext::default());
        assert_eq!(v.max_wait, DEFAULT_MAX_WAIT_MS);
    }
}
