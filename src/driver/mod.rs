//! Browser driver seam.
//!
//! The decision layer only talks to the browser through [`BrowserDriver`].
//! Every call may fail; callers turn failures into state-machine
//! transitions rather than propagating them.

pub mod eoka;
pub mod memory;

use crate::action::SelectorType;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A concrete element on the page, addressed by a unique CSS selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Selector that uniquely addresses this element right now.
    pub selector: String,
    /// Lower-case tag name.
    pub tag: String,
    /// Visible text, value, or accessible name (may be empty).
    #[serde(default)]
    pub text: String,
}

impl ElementHandle {
    pub fn new(selector: impl Into<String>, tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            tag: tag.into(),
            text: text.into(),
        }
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> {}", self.tag, self.selector)?;
        if !self.text.is_empty() {
            write!(f, " \"{}\"", self.text)?;
        }
        Ok(())
    }
}

/// Primitive browser operations consumed by the resolver and the handlers.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn current_url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    /// Navigate, giving up after `timeout_ms`.
    async fn goto(&self, url: &str, timeout_ms: u64) -> Result<()>;

    /// Evaluate a JavaScript expression and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value>;

    /// First element matching `selector` interpreted as `kind`. No waiting.
    async fn locate(&self, selector: &str, kind: SelectorType) -> Result<Option<ElementHandle>>;

    /// All elements matching a CSS selector, in document order.
    async fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>>;

    /// Poll for a CSS selector until it matches or `timeout_ms` elapses.
    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64)
        -> Result<Option<ElementHandle>>;

    /// First element with the given ARIA role (explicit or implicit) whose
    /// accessible name contains `name`, case-insensitively.
    async fn find_by_role(&self, role: &str, name: &str) -> Result<Option<ElementHandle>>;

    async fn remove_attribute(&self, handle: &ElementHandle, name: &str) -> Result<()>;

    async fn click(&self, handle: &ElementHandle) -> Result<()>;

    /// Clear the element and type `value` into it.
    async fn fill(&self, handle: &ElementHandle, value: &str) -> Result<()>;

    async fn press_key(&self, key: &str) -> Result<()>;

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<()>;

    /// Release the browser session.
    async fn close(&self) -> Result<()>;
}
