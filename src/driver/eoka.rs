//! [`BrowserDriver`] over an eoka browser.
//!
//! Element lookups run as injected JavaScript that returns a unique selector
//! for the match, which later calls hand back to eoka's selector-based API.

use super::{BrowserDriver, ElementHandle};
use crate::action::SelectorType;
use crate::config::BrowserConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use eoka::{Browser, Page};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Poll interval for `wait_for_selector`.
const POLL_MS: u64 = 100;

/// Shared helpers injected ahead of every lookup script.
const HELPERS_JS: &str = r#"
const __pilot = (() => {
    function selector(el) {
        if (el.id) return '#' + CSS.escape(el.id);
        const path = [];
        let n = el;
        while (n && n.nodeType === 1) {
            let s = n.tagName.toLowerCase();
            if (n.id) { path.unshift('#' + CSS.escape(n.id)); break; }
            const p = n.parentElement;
            if (p) {
                const sibs = [...p.children].filter(c => c.tagName === n.tagName);
                if (sibs.length > 1) s += ':nth-of-type(' + (sibs.indexOf(n) + 1) + ')';
            }
            path.unshift(s);
            n = p;
        }
        return path.join(' > ');
    }
    function text(el) {
        return (el.innerText?.trim() || el.value || el.getAttribute('aria-label') || el.title || el.placeholder || '').slice(0, 80);
    }
    function describe(el) {
        return el ? { selector: selector(el), tag: el.tagName.toLowerCase(), text: text(el) } : null;
    }
    function visible(el) {
        const r = el.getBoundingClientRect();
        const s = getComputedStyle(el);
        return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
    }
    const INTERACTIVE = 'a,button,input,select,textarea,[role="button"],[role="link"],[onclick],[tabindex]';
    const IMPLICIT = {
        button: 'button,input[type="button"],input[type="submit"]',
        link: 'a[href]',
        textbox: 'input:not([type]),input[type="text"],input[type="search"],input[type="email"],textarea',
        searchbox: 'input[type="search"]',
        checkbox: 'input[type="checkbox"]',
    };
    return { selector, text, describe, visible, INTERACTIVE, IMPLICIT };
})();
"#;

/// Launches and owns an eoka browser with a single page.
pub struct EokaDriver {
    browser: Mutex<Option<Browser>>,
    page: Page,
}

impl EokaDriver {
    /// Launch a browser from config and open a blank page.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let stealth = eoka::StealthConfig {
            headless: config.headless,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            viewport_width: config.viewport.as_ref().map(|v| v.width).unwrap_or(1280),
            viewport_height: config.viewport.as_ref().map(|v| v.height).unwrap_or(720),
            ..Default::default()
        };

        debug!(
            "Launching browser (headless: {}, proxy: {:?})",
            config.headless, config.proxy
        );
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_page("about:blank").await?;
        Ok(Self::new(browser, page))
    }

    /// Wrap an already running browser and page.
    pub fn new(browser: Browser, page: Page) -> Self {
        Self {
            browser: Mutex::new(Some(browser)),
            page,
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Run a lookup script that returns `JSON.stringify(...)` of a value.
    async fn lookup<T: serde::de::DeserializeOwned>(&self, body: &str) -> Result<T> {
        let js = format!("(() => {{ {} {} }})()", HELPERS_JS, body);
        let json_str: String = self.page.evaluate(&js).await?;
        Ok(serde_json::from_str(&json_str)?)
    }
}

fn js_str(s: &str) -> Result<String> {
    Ok(serde_json::to_string(s)?)
}

#[async_trait]
impl BrowserDriver for EokaDriver {
    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?)
    }

    async fn title(&self) -> Result<String> {
        Ok(self.page.title().await?)
    }

    async fn goto(&self, url: &str, timeout_ms: u64) -> Result<()> {
        tokio::time::timeout(Duration::from_millis(timeout_ms), self.page.goto(url))
            .await
            .map_err(|_| Error::ActionFailed(format!("navigation to {} timed out", url)))??;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        Ok(self.page.evaluate(expression).await?)
    }

    async fn locate(&self, selector: &str, kind: SelectorType) -> Result<Option<ElementHandle>> {
        let sel = js_str(selector)?;
        let body = match kind {
            SelectorType::Css => format!(
                "let el = null; try {{ el = document.querySelector({sel}); }} catch (e) {{}}
                 return JSON.stringify(__pilot.describe(el));"
            ),
            SelectorType::Xpath => format!(
                "let el = null;
                 try {{ el = document.evaluate({sel}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue; }} catch (e) {{}}
                 return JSON.stringify(__pilot.describe(el));"
            ),
            SelectorType::Text => format!(
                "const needle = {sel}.toLowerCase().trim();
                 const el = [...document.querySelectorAll(__pilot.INTERACTIVE)]
                     .filter(__pilot.visible)
                     .find(e => __pilot.text(e).toLowerCase().includes(needle));
                 return JSON.stringify(__pilot.describe(el || null));"
            ),
        };
        self.lookup(&body).await
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        let body = format!(
            "let els = [];
             try {{ els = [...document.querySelectorAll({})]; }} catch (e) {{}}
             return JSON.stringify(els.filter(__pilot.visible).map(__pilot.describe));",
            js_str(selector)?
        );
        self.lookup(&body).await
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout_ms: u64,
    ) -> Result<Option<ElementHandle>> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Some(handle) = self.locate(selector, SelectorType::Css).await? {
                return Ok(Some(handle));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(POLL_MS)).await;
        }
    }

    async fn find_by_role(&self, role: &str, name: &str) -> Result<Option<ElementHandle>> {
        let body = format!(
            "const role = {role}; const name = {name}.toLowerCase().trim();
             const implicit = __pilot.IMPLICIT[role];
             const query = '[role=\"' + role + '\"]' + (implicit ? ',' + implicit : '');
             const el = [...document.querySelectorAll(query)]
                 .filter(__pilot.visible)
                 .find(e => __pilot.text(e).toLowerCase().includes(name));
             return JSON.stringify(__pilot.describe(el || null));",
            role = js_str(role)?,
            name = js_str(name)?
        );
        self.lookup(&body).await
    }

    async fn remove_attribute(&self, handle: &ElementHandle, name: &str) -> Result<()> {
        let js = format!(
            "document.querySelector({})?.removeAttribute({})",
            js_str(&handle.selector)?,
            js_str(name)?
        );
        self.page.execute(&js).await?;
        Ok(())
    }

    async fn click(&self, handle: &ElementHandle) -> Result<()> {
        Ok(self.page.click(&handle.selector).await?)
    }

    async fn fill(&self, handle: &ElementHandle, value: &str) -> Result<()> {
        Ok(self.page.fill(&handle.selector, value).await?)
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        Ok(self.page.human().press_key(key).await?)
    }

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<()> {
        self.page
            .execute(&format!("window.scrollBy({dx}, {dy})"))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(browser) = self.browser.lock().await.take() {
            browser.close().await?;
        }
        Ok(())
    }
}
