//! In-memory driver for offline runs and tests.
//!
//! The "page" is a table from selector string to the elements it matches.
//! No CSS is evaluated: a selector matches only if it was registered
//! verbatim. Every primitive call is recorded for later inspection.

use super::{BrowserDriver, ElementHandle};
use crate::action::SelectorType;
use crate::snapshot::{PageSnapshot, SnapshotConfig, SnapshotElement, SnapshotSource};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Mutable state of the fake page.
#[derive(Debug, Default, Clone)]
pub struct MemoryPage {
    pub url: String,
    pub title: String,
    pub content: String,
    pub loading: bool,
    /// Selector to matching elements, in document order.
    pub matches: BTreeMap<String, Vec<ElementHandle>>,
    /// Pages reachable by `goto`, keyed by URL.
    pub routes: BTreeMap<String, String>,
    pub fail_clicks: bool,
    pub fail_navigation: bool,
    pub closed: bool,
}

/// Scriptable [`BrowserDriver`] backed by a [`MemoryPage`].
#[derive(Debug, Default)]
pub struct MemoryDriver {
    page: Mutex<MemoryPage>,
    calls: Mutex<Vec<String>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current URL and title.
    pub fn at(self, url: &str, title: &str) -> Self {
        self.update(|p| {
            p.url = url.to_string();
            p.title = title.to_string();
        });
        self
    }

    /// Register an element matched by `selector`.
    pub fn with(self, selector: &str, handle: ElementHandle) -> Self {
        self.update(|p| {
            p.matches
                .entry(selector.to_string())
                .or_default()
                .push(handle)
        });
        self
    }

    /// Register a URL `goto` can reach, with the title it lands on.
    pub fn with_route(self, url: &str, title: &str) -> Self {
        self.update(|p| {
            p.routes.insert(url.to_string(), title.to_string());
        });
        self
    }

    /// Mutate the page in place.
    pub fn update<F: FnOnce(&mut MemoryPage)>(&self, f: F) {
        if let Ok(mut page) = self.page.lock() {
            f(&mut page);
        }
    }

    /// Copy of the current page state.
    pub fn page(&self) -> MemoryPage {
        self.page.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Recorded primitive calls, e.g. `click #submit`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryPage) -> T) -> Result<T> {
        self.page
            .lock()
            .map(|p| f(&p))
            .map_err(|_| Error::ActionFailed("memory page poisoned".into()))
    }

    fn all_elements(page: &MemoryPage) -> Vec<ElementHandle> {
        let mut seen: Vec<ElementHandle> = Vec::new();
        for handle in page.matches.values().flatten() {
            if !seen.iter().any(|h| h.selector == handle.selector) {
                seen.push(handle.clone());
            }
        }
        seen
    }
}

#[async_trait]
impl BrowserDriver for MemoryDriver {
    async fn current_url(&self) -> Result<String> {
        self.read(|p| p.url.clone())
    }

    async fn title(&self) -> Result<String> {
        self.read(|p| p.title.clone())
    }

    async fn goto(&self, url: &str, _timeout_ms: u64) -> Result<()> {
        self.record(format!("goto {}", url));
        let page = self.page();
        if page.fail_navigation {
            return Err(Error::ActionFailed(format!("navigation to {} failed", url)));
        }
        let title = page.routes.get(url).cloned().unwrap_or_default();
        self.update(|p| {
            p.url = url.to_string();
            p.title = title;
        });
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.record(format!("evaluate {}", expression.len()));
        Ok(Value::Null)
    }

    async fn locate(&self, selector: &str, kind: SelectorType) -> Result<Option<ElementHandle>> {
        self.record(format!("locate {}", selector));
        self.read(|p| match kind {
            SelectorType::Text => {
                let needle = selector.to_lowercase();
                Self::all_elements(p)
                    .into_iter()
                    .find(|h| h.text.to_lowercase().contains(&needle))
            }
            SelectorType::Css | SelectorType::Xpath => {
                p.matches.get(selector).and_then(|m| m.first().cloned())
            }
        })
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        self.record(format!("query_all {}", selector));
        self.read(|p| p.matches.get(selector).cloned().unwrap_or_default())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _timeout_ms: u64,
    ) -> Result<Option<ElementHandle>> {
        self.record(format!("wait_for {}", selector));
        self.read(|p| p.matches.get(selector).and_then(|m| m.first().cloned()))
    }

    async fn find_by_role(&self, role: &str, name: &str) -> Result<Option<ElementHandle>> {
        self.record(format!("find_by_role {} {}", role, name));
        let tag = match role {
            "link" => "a",
            "textbox" => "input",
            other => other,
        };
        let needle = name.to_lowercase();
        self.read(|p| {
            Self::all_elements(p)
                .into_iter()
                .find(|h| h.tag == tag && h.text.to_lowercase().contains(&needle))
        })
    }

    async fn remove_attribute(&self, handle: &ElementHandle, name: &str) -> Result<()> {
        self.record(format!("remove_attribute {} {}", handle.selector, name));
        Ok(())
    }

    async fn click(&self, handle: &ElementHandle) -> Result<()> {
        self.record(format!("click {}", handle.selector));
        if self.read(|p| p.fail_clicks)? {
            return Err(Error::ActionFailed(format!("click on {} failed", handle.selector)));
        }
        Ok(())
    }

    async fn fill(&self, handle: &ElementHandle, value: &str) -> Result<()> {
        self.record(format!("fill {} {}", handle.selector, value));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.record(format!("press_key {}", key));
        Ok(())
    }

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<()> {
        self.record(format!("scroll_by {} {}", dx, dy));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record("close".to_string());
        self.update(|p| p.closed = true);
        Ok(())
    }
}

/// Snapshot source that reads a [`MemoryDriver`]'s page directly.
///
/// It ignores the driver argument and reports what the wrapped driver holds.
pub struct MemorySnapshotter {
    driver: std::sync::Arc<MemoryDriver>,
}

impl MemorySnapshotter {
    pub fn new(driver: std::sync::Arc<MemoryDriver>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl SnapshotSource for MemorySnapshotter {
    async fn extract_snapshot(
        &self,
        _driver: &dyn BrowserDriver,
        config: &SnapshotConfig,
    ) -> Result<PageSnapshot> {
        let page = self.driver.page();
        let elements = MemoryDriver::all_elements(&page)
            .into_iter()
            .take(config.max_elements)
            .enumerate()
            .map(|(index, h)| SnapshotElement {
                index,
                tag: h.tag,
                role: None,
                text: h.text,
                placeholder: None,
                input_type: None,
                selector: h.selector,
            })
            .collect();
        Ok(PageSnapshot {
            url: page.url,
            title: page.title,
            timestamp: Utc::now(),
            elements,
            content: page.content.chars().take(config.max_content_chars).collect(),
            loading: page.loading,
        })
    }
}
