//! Fallbacks that run after every registered strategy has missed.
//!
//! First the action's purpose is guessed from keywords in its target and
//! value, and a fixed list of generic selectors for that purpose is probed.
//! Then, if the action carries descriptive text, candidate elements are
//! searched for one whose text contains it.

use super::ElementContext;
use crate::action::{Action, ActionType, SelectorType};
use crate::driver::{BrowserDriver, ElementHandle};
use crate::Result;
use std::fmt;
use tracing::debug;

/// Elements considered by the text-content search.
pub const TEXT_CANDIDATES: &str =
    r#"a, button, [role="button"], [role="link"], input[type="submit"], input[type="button"], label, [onclick]"#;

/// What an unresolved action was most likely trying to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    SearchInput,
    SearchButton,
    SubmitButton,
    NavigationLink,
    GenericInput,
    GenericButton,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Purpose::SearchInput => "search-input",
            Purpose::SearchButton => "search-button",
            Purpose::SubmitButton => "submit-button",
            Purpose::NavigationLink => "navigation-link",
            Purpose::GenericInput => "generic-input",
            Purpose::GenericButton => "generic-button",
        };
        f.write_str(s)
    }
}

const SEARCH_WORDS: &[&str] = &["search", "query", "find", "lookup"];
const SUBMIT_WORDS: &[&str] = &["submit", "login", "log in", "sign in", "signin", "continue", "send", "next", "confirm"];
const LINK_WORDS: &[&str] = &["link", "href", "nav", "menu", "a["];

/// Generic selectors per purpose, probed in order.
const PURPOSE_SELECTORS: &[(Purpose, &[&str])] = &[
    (
        Purpose::SearchInput,
        &[
            r#"input[type="search"]"#,
            r#"input[name="q"]"#,
            r#"input[name*="search" i]"#,
            r#"input[placeholder*="search" i]"#,
            r#"input[aria-label*="search" i]"#,
            r#"[role="searchbox"]"#,
        ],
    ),
    (
        Purpose::SearchButton,
        &[
            r#"button[type="submit"][aria-label*="search" i]"#,
            r#"input[type="submit"][value*="search" i]"#,
            r#"button[aria-label*="search" i]"#,
            r#"form[role="search"] button"#,
            r#"[role="search"] [type="submit"]"#,
        ],
    ),
    (
        Purpose::SubmitButton,
        &[
            r#"button[type="submit"]"#,
            r#"input[type="submit"]"#,
            "form button",
        ],
    ),
    (
        Purpose::NavigationLink,
        &["nav a[href]", r#"[role="navigation"] a[href]"#, "header a[href]"],
    ),
    (
        Purpose::GenericInput,
        &[
            r#"input[type="text"]"#,
            "input:not([type])",
            r#"input[type="email"]"#,
            "textarea",
            r#"[contenteditable="true"]"#,
        ],
    ),
    (
        Purpose::GenericButton,
        &["button", r#"[role="button"]"#, r#"input[type="button"]"#],
    ),
];

fn mentions(haystack: &str, words: &[&str]) -> bool {
    words.iter().any(|w| haystack.contains(w))
}

/// Guess the action's purpose from its target and value. Only click and
/// input actions have one.
pub fn classify(action: &Action) -> Option<Purpose> {
    let text = format!(
        "{} {}",
        action.target.as_deref().unwrap_or_default(),
        action.value.as_deref().unwrap_or_default()
    )
    .to_lowercase();

    match action.action_type {
        ActionType::Input if mentions(&text, SEARCH_WORDS) => Some(Purpose::SearchInput),
        ActionType::Input => Some(Purpose::GenericInput),
        ActionType::Click if mentions(&text, SEARCH_WORDS) => Some(Purpose::SearchButton),
        ActionType::Click if mentions(&text, SUBMIT_WORDS) => Some(Purpose::SubmitButton),
        ActionType::Click if mentions(&text, LINK_WORDS) => Some(Purpose::NavigationLink),
        ActionType::Click => Some(Purpose::GenericButton),
        _ => None,
    }
}

/// The selector list probed for `purpose`.
pub fn selectors_for(purpose: Purpose) -> &'static [&'static str] {
    PURPOSE_SELECTORS
        .iter()
        .find(|(p, _)| *p == purpose)
        .map(|(_, sels)| *sels)
        .unwrap_or(&[])
}

pub async fn find_by_purpose(
    driver: &dyn BrowserDriver,
    action: &Action,
    ctx: &mut ElementContext,
) -> Result<Option<ElementHandle>> {
    let Some(purpose) = classify(action) else {
        return Ok(None);
    };
    debug!("inferred purpose {} for {:?}", purpose, action.target);

    for sel in selectors_for(purpose) {
        ctx.attempt(*sel);
        if let Some(h) = driver.locate(sel, SelectorType::Css).await? {
            return Ok(Some(h));
        }
    }
    Ok(None)
}

pub async fn find_by_text(
    driver: &dyn BrowserDriver,
    action: &Action,
    ctx: &mut ElementContext,
) -> Result<Option<ElementHandle>> {
    let Some(needle) = action
        .value
        .as_deref()
        .or(action.description.as_deref())
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
    else {
        return Ok(None);
    };

    ctx.attempt(format!("text~={}", needle));
    let candidates = driver.query_all(TEXT_CANDIDATES).await?;
    Ok(candidates
        .into_iter()
        .find(|h| h.text.to_lowercase().contains(&needle)))
}
