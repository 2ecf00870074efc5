//! Page snapshots: URL, title, interactive elements and visible text.
//!
//! The snapshot feeds the prompt and the progress check. It is produced by a
//! [`SnapshotSource`]; [`DomSnapshotter`] is the in-page implementation.

use crate::driver::BrowserDriver;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One interactive element as seen at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotElement {
    pub index: usize,
    pub tag: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub input_type: Option<String>,
    pub selector: String,
}

impl fmt::Display for SnapshotElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] <{}", self.index, self.tag)?;
        if let Some(ref t) = self.input_type {
            if t != "text" {
                write!(f, " type=\"{}\"", t)?;
            }
        }
        write!(f, "> {}", self.selector)?;
        if !self.text.is_empty() {
            write!(f, " \"{}\"", self.text)?;
        }
        if let Some(ref p) = self.placeholder {
            write!(f, " placeholder=\"{}\"", p)?;
        }
        if let Some(ref r) = self.role {
            let redundant = (r == "button" && self.tag == "button") || (r == "link" && self.tag == "a");
            if !redundant {
                write!(f, " role=\"{}\"", r)?;
            }
        }
        Ok(())
    }
}

/// Structured view of the page at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub elements: Vec<SnapshotElement>,
    /// Visible text, truncated.
    pub content: String,
    /// The document was still loading when the snapshot was taken.
    #[serde(default)]
    pub loading: bool,
}

impl PageSnapshot {
    /// Compact element list for the prompt, one element per line.
    pub fn element_list(&self) -> String {
        let mut out = String::with_capacity(self.elements.len() * 40);
        for el in &self.elements {
            out.push_str(&el.to_string());
            out.push('\n');
        }
        out
    }

    /// Element counts keyed by tag.
    pub fn counts_by_tag(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for el in &self.elements {
            *counts.entry(el.tag.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Tuning for snapshot extraction.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Only include elements inside the viewport.
    pub viewport_only: bool,
    pub max_elements: usize,
    pub max_content_chars: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            viewport_only: true,
            max_elements: 150,
            max_content_chars: 3000,
        }
    }
}

/// Produces page snapshots.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn extract_snapshot(
        &self,
        driver: &dyn BrowserDriver,
        config: &SnapshotConfig,
    ) -> Result<PageSnapshot>;
}

#[derive(Deserialize)]
struct RawSnapshot {
    url: String,
    title: String,
    loading: bool,
    content: String,
    elements: Vec<RawElement>,
}

#[derive(Deserialize)]
struct RawElement {
    tag: String,
    role: Option<String>,
    text: String,
    placeholder: Option<String>,
    input_type: Option<String>,
    selector: String,
}

/// JavaScript that collects the snapshot. Expects `__cfg` in scope.
const SNAPSHOT_JS: &str = r#"
    const INTERACTIVE = 'a, button, input, select, textarea, [role="button"], [role="link"], [role="tab"], [role="menuitem"], [role="searchbox"], [onclick], [contenteditable="true"]';
    const results = [];
    const seen = new Set();

    function labelFor(el) {
        if (el.id) {
            const label = document.querySelector('label[for=' + JSON.stringify(el.id) + ']');
            if (label) return label.textContent.trim();
        }
        const parent = el.closest('label');
        return parent ? parent.textContent.trim() : '';
    }

    function uniqueSelector(el) {
        if (el.id) return '#' + CSS.escape(el.id);
        const tag = el.tagName.toLowerCase();
        if (el.name && (tag === 'input' || tag === 'select' || tag === 'textarea')) {
            return tag + '[name=' + JSON.stringify(el.name) + ']';
        }
        const aria = el.getAttribute('aria-label');
        if (aria) return tag + '[aria-label=' + JSON.stringify(aria) + ']';
        const testId = el.getAttribute('data-testid');
        if (testId) return '[data-testid=' + JSON.stringify(testId) + ']';
        const parts = [];
        let node = el;
        while (node && node !== document.body && parts.length < 4) {
            let s = node.tagName.toLowerCase();
            if (node.id) { parts.unshift('#' + CSS.escape(node.id)); break; }
            const parent = node.parentElement;
            if (parent) {
                const sibs = Array.from(parent.children).filter(c => c.tagName === node.tagName);
                if (sibs.length > 1) s += ':nth-of-type(' + (sibs.indexOf(node) + 1) + ')';
            }
            parts.unshift(s);
            node = parent;
        }
        return parts.join(' > ');
    }

    for (const el of document.querySelectorAll(INTERACTIVE)) {
        if (results.length >= __cfg.maxElements) break;
        const rect = el.getBoundingClientRect();
        if (rect.width < 2 || rect.height < 2) continue;
        const style = getComputedStyle(el);
        if (style.display === 'none' || style.visibility === 'hidden') continue;
        if (__cfg.viewportOnly && (rect.bottom < 0 || rect.top > window.innerHeight)) continue;

        const tag = el.tagName.toLowerCase();
        const isForm = tag === 'input' || tag === 'select' || tag === 'textarea';
        let text = el.getAttribute('aria-label') || '';
        if (!text) text = isForm ? labelFor(el) : (el.textContent || '').trim().replace(/\s+/g, ' ');
        if (text.length > 60) text = text.substring(0, 57) + '...';

        const selector = uniqueSelector(el);
        if (seen.has(selector)) continue;
        seen.add(selector);

        results.push({
            tag,
            role: el.getAttribute('role'),
            text,
            placeholder: el.getAttribute('placeholder'),
            input_type: tag === 'input' ? (el.getAttribute('type') || 'text') : (tag === 'select' ? 'select' : null),
            selector,
        });
    }

    return JSON.stringify({
        url: location.href,
        title: document.title,
        loading: document.readyState !== 'complete',
        content: (document.body ? document.body.innerText : '').slice(0, __cfg.maxContentChars),
        elements: results,
    });
"#;

/// Snapshot source that runs an enumeration script in the page.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomSnapshotter;

#[async_trait]
impl SnapshotSource for DomSnapshotter {
    async fn extract_snapshot(
        &self,
        driver: &dyn BrowserDriver,
        config: &SnapshotConfig,
    ) -> Result<PageSnapshot> {
        let cfg = serde_json::json!({
            "viewportOnly": config.viewport_only,
            "maxElements": config.max_elements,
            "maxContentChars": config.max_content_chars,
        });
        let js = format!("(() => {{ const __cfg = {}; {} }})()", cfg, SNAPSHOT_JS);
        let value = driver.evaluate(&js).await?;
        let json_str = value
            .as_str()
            .ok_or_else(|| Error::ActionFailed("snapshot script returned no data".into()))?;
        let raw: RawSnapshot = serde_json::from_str(json_str)?;
        Ok(raw.into_snapshot())
    }
}

impl RawSnapshot {
    fn into_snapshot(self) -> PageSnapshot {
        PageSnapshot {
            url: self.url,
            title: self.title,
            timestamp: Utc::now(),
            loading: self.loading,
            content: self.content,
            elements: self
                .elements
                .into_iter()
                .enumerate()
                .map(|(index, r)| SnapshotElement {
                    index,
                    tag: r.tag,
                    role: r.role,
                    text: r.text,
                    placeholder: r.placeholder.filter(|p| !p.is_empty()),
                    input_type: r.input_type,
                    selector: r.selector,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(index: usize, tag: &str, text: &str, selector: &str) -> SnapshotElement {
        SnapshotElement {
            index,
            tag: tag.into(),
            role: None,
            text: text.into(),
            placeholder: None,
            input_type: None,
            selector: selector.into(),
        }
    }

    #[test]
    fn raw_snapshot_is_indexed() {
        let raw: RawSnapshot = serde_json::from_str(
            r##"{"url":"https://e.com/","title":"E","loading":false,"content":"hi",
                "elements":[
                  {"tag":"a","role":null,"text":"Home","placeholder":null,"input_type":null,"selector":"#home"},
                  {"tag":"input","role":null,"text":"","placeholder":"","input_type":"search","selector":"input[name=\"q\"]"}
                ]}"##,
        )
        .unwrap();
        let snap = raw.into_snapshot();
        assert_eq!(snap.elements.len(), 2);
        assert_eq!(snap.elements[1].index, 1);
        assert_eq!(snap.elements[1].placeholder, None);
        assert!(!snap.loading);
    }

    #[test]
    fn element_display() {
        let mut el = element(3, "input", "Search", "#q");
        el.input_type = Some("search".into());
        el.placeholder = Some("Find...".into());
        assert_eq!(
            el.to_string(),
            r##"[3] <input type="search"> #q "Search" placeholder="Find...""##
        );

        let mut btn = element(0, "button", "Go", "#go");
        btn.role = Some("button".into());
        assert_eq!(btn.to_string(), r##"[0] <button> #go "Go""##);
    }

    #[test]
    fn counts_by_tag() {
        let snap = PageSnapshot {
            url: String::new(),
            title: String::new(),
            timestamp: Utc::now(),
            elements: vec![
                element(0, "a", "", "#a"),
                element(1, "a", "", "#b"),
                element(2, "button", "", "#c"),
            ],
            content: String::new(),
            loading: false,
        };
        let counts = snap.counts_by_tag();
        assert_eq!(counts["a"], 2);
        assert_eq!(counts["button"], 1);
        assert_eq!(snap.element_list().lines().count(), 3);
    }
}
