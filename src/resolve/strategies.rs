//! The canonical strategy set.
//!
//! | Strategy        | Priority | Applies to                                    |
//! |-----------------|----------|-----------------------------------------------|
//! | DirectSelector  | 100      | any action with a target                      |
//! | IdSelector      | 90       | click/input whose target starts with `#`      |
//! | InputPattern    | 70       | input whose target mentions "input"           |
//! | LinkStrategy    | 65       | click whose target is an `a[href=...]` pattern|
//! | RoleBased       | 60       | click on a "button" target with a value       |
//! | SingleElement   | 40       | any action with a target                      |

use super::{ElementContext, Strategy};
use crate::action::{css_escape_attr, Action, ActionType, SelectorType};
use crate::driver::{BrowserDriver, ElementHandle};
use crate::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

/// Text-like inputs counted by [`SingleElement`].
pub const TEXT_INPUT_SELECTOR: &str =
    r#"input:not([type]), input[type="text"], input[type="search"], input[type="email"], textarea"#;

/// Buttons counted by [`SingleElement`].
pub const BUTTON_SELECTOR: &str =
    r#"button, input[type="submit"], input[type="button"], [role="button"]"#;

/// Common search/input selectors tried by [`InputPattern`], in order.
pub const COMMON_INPUT_SELECTORS: &[&str] = &[
    r#"input[type="search"]"#,
    r#"input[name="q"]"#,
    r#"input[name="search"]"#,
    r#"input[name="query"]"#,
    r#"input[type="text"]"#,
    "input:not([type])",
    "textarea",
];

pub fn defaults() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(DirectSelector),
        Box::new(IdSelector),
        Box::new(InputPattern),
        Box::new(LinkStrategy),
        Box::new(RoleBased),
        Box::new(SingleElement),
    ]
}

fn target(action: &Action) -> Option<&str> {
    action.target.as_deref().filter(|t| !t.trim().is_empty())
}

async fn probe(
    driver: &dyn BrowserDriver,
    selector: &str,
    ctx: &mut ElementContext,
) -> Result<Option<ElementHandle>> {
    ctx.attempt(selector);
    driver.locate(selector, SelectorType::Css).await
}

/// Target used verbatim as a locator of the action's selector type.
pub struct DirectSelector;

#[async_trait]
impl Strategy for DirectSelector {
    fn name(&self) -> &'static str {
        "DirectSelector"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn can_handle(&self, action: &Action) -> bool {
        target(action).is_some()
    }

    async fn find_element(
        &self,
        driver: &dyn BrowserDriver,
        action: &Action,
        ctx: &mut ElementContext,
    ) -> Result<Option<ElementHandle>> {
        let Some(t) = target(action) else {
            return Ok(None);
        };
        ctx.attempt(t);
        driver.locate(t, action.selector_type).await
    }
}

/// `#id` targets, waited for explicitly.
pub struct IdSelector;

#[async_trait]
impl Strategy for IdSelector {
    fn name(&self) -> &'static str {
        "IdSelector"
    }

    fn priority(&self) -> i32 {
        90
    }

    fn can_handle(&self, action: &Action) -> bool {
        action.action_type.needs_element()
            && target(action).map(|t| t.starts_with('#')).unwrap_or(false)
    }

    async fn find_element(
        &self,
        driver: &dyn BrowserDriver,
        action: &Action,
        ctx: &mut ElementContext,
    ) -> Result<Option<ElementHandle>> {
        let Some(t) = target(action) else {
            return Ok(None);
        };
        ctx.attempt(t);
        driver.wait_for_selector(t, ctx.timeout_ms()).await
    }
}

/// Input targets that only say "input": common search fields, then
/// ID-derived variants of the target.
pub struct InputPattern;

impl InputPattern {
    fn id_variants(t: &str) -> Vec<String> {
        let bare = t.trim().trim_start_matches(['#', '.']);
        if bare.is_empty() || bare.contains(char::is_whitespace) {
            return Vec::new();
        }
        let escaped = css_escape_attr(bare);
        vec![
            format!("[id=\"{}\"]", escaped),
            format!("[id^=\"{}\"]", escaped),
            format!("[id*=\"{}\"]", escaped),
            format!("[name=\"{}\"]", escaped),
        ]
    }
}

#[async_trait]
impl Strategy for InputPattern {
    fn name(&self) -> &'static str {
        "InputPattern"
    }

    fn priority(&self) -> i32 {
        70
    }

    fn can_handle(&self, action: &Action) -> bool {
        action.action_type == ActionType::Input
            && target(action)
                .map(|t| t.to_lowercase().contains("input"))
                .unwrap_or(false)
    }

    async fn find_element(
        &self,
        driver: &dyn BrowserDriver,
        action: &Action,
        ctx: &mut ElementContext,
    ) -> Result<Option<ElementHandle>> {
        for sel in COMMON_INPUT_SELECTORS {
            if let Some(h) = probe(driver, sel, ctx).await? {
                return Ok(Some(h));
            }
        }
        let Some(t) = target(action) else {
            return Ok(None);
        };
        for sel in Self::id_variants(t) {
            if let Some(h) = probe(driver, &sel, ctx).await? {
                return Ok(Some(h));
            }
        }
        Ok(None)
    }
}

/// Click targets shaped like `a[href="..."]`.
///
/// Tries the visible link text first, then partial href matches, then the
/// page's only link if there is exactly one.
pub struct LinkStrategy;

fn anchor_href_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^a\[href[*^$~|]?=\s*["']?([^"'\]]*)["']?\s*\]$"#).ok())
        .as_ref()
}

impl LinkStrategy {
    /// The URL inside an anchor-href target, if it is one.
    pub fn href(target: &str) -> Option<String> {
        anchor_href_re()?
            .captures(target.trim())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().replace("\\\"", "\"").replace("\\\\", "\\"))
    }

    /// Link text hint: value or description, unless it is the `a.` shorthand.
    fn link_text(action: &Action) -> Option<&str> {
        action
            .value
            .as_deref()
            .or(action.description.as_deref())
            .filter(|t| !t.starts_with("a.") && !t.trim().is_empty())
    }

    /// `https://host/path?x` -> `/path?x`, when there is a path at all.
    fn path_of(href: &str) -> Option<String> {
        let parsed = url::Url::parse(href).ok()?;
        let mut path = parsed.path().to_string();
        if let Some(q) = parsed.query() {
            path.push('?');
            path.push_str(q);
        }
        (path.len() > 1).then_some(path)
    }
}

#[async_trait]
impl Strategy for LinkStrategy {
    fn name(&self) -> &'static str {
        "LinkStrategy"
    }

    fn priority(&self) -> i32 {
        65
    }

    fn can_handle(&self, action: &Action) -> bool {
        action.action_type == ActionType::Click
            && target(action).and_then(Self::href).is_some()
    }

    async fn find_element(
        &self,
        driver: &dyn BrowserDriver,
        action: &Action,
        ctx: &mut ElementContext,
    ) -> Result<Option<ElementHandle>> {
        let Some(href) = target(action).and_then(Self::href) else {
            return Ok(None);
        };

        ctx.attempt("a[href]");
        let links = driver.query_all("a[href]").await?;

        if let Some(text) = Self::link_text(action) {
            let needle = text.to_lowercase();
            if let Some(h) = links
                .iter()
                .find(|l| l.text.to_lowercase().contains(&needle))
            {
                return Ok(Some(h.clone()));
            }
        }

        if !href.is_empty() {
            let partial = format!("a[href*=\"{}\"]", css_escape_attr(&href));
            if let Some(h) = probe(driver, &partial, ctx).await? {
                return Ok(Some(h));
            }
            if let Some(path) = Self::path_of(&href) {
                let partial = format!("a[href*=\"{}\"]", css_escape_attr(&path));
                if let Some(h) = probe(driver, &partial, ctx).await? {
                    return Ok(Some(h));
                }
            }
        }

        if links.len() == 1 {
            return Ok(links.into_iter().next());
        }
        Ok(None)
    }
}

/// Button targets resolved by accessible role and the action's value as name.
pub struct RoleBased;

#[async_trait]
impl Strategy for RoleBased {
    fn name(&self) -> &'static str {
        "RoleBased"
    }

    fn priority(&self) -> i32 {
        60
    }

    fn can_handle(&self, action: &Action) -> bool {
        action.action_type == ActionType::Click
            && action.value.as_deref().map(|v| !v.is_empty()).unwrap_or(false)
            && target(action)
                .map(|t| t.to_lowercase().contains("button"))
                .unwrap_or(false)
    }

    async fn find_element(
        &self,
        driver: &dyn BrowserDriver,
        action: &Action,
        ctx: &mut ElementContext,
    ) -> Result<Option<ElementHandle>> {
        let Some(name) = action.value.as_deref() else {
            return Ok(None);
        };
        ctx.attempt(format!("role=button[name~={}]", name));
        driver.find_by_role("button", name).await
    }
}

/// Lowest-priority catch-all: the page's only text input (for input) or
/// only button (for click).
pub struct SingleElement;

#[async_trait]
impl Strategy for SingleElement {
    fn name(&self) -> &'static str {
        "SingleElement"
    }

    fn priority(&self) -> i32 {
        40
    }

    fn can_handle(&self, action: &Action) -> bool {
        target(action).is_some()
    }

    async fn find_element(
        &self,
        driver: &dyn BrowserDriver,
        action: &Action,
        ctx: &mut ElementContext,
    ) -> Result<Option<ElementHandle>> {
        let selector = match action.action_type {
            ActionType::Input => TEXT_INPUT_SELECTOR,
            ActionType::Click => BUTTON_SELECTOR,
            _ => return Ok(None),
        };
        ctx.attempt(selector);
        let mut found = driver.query_all(selector).await?;
        if found.len() == 1 {
            return Ok(found.pop());
        }
        Ok(None)
    }
}
