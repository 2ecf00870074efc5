//! Element resolution: from an action's target descriptor to one element.
//!
//! Registered [`Strategy`]s run in strictly descending priority; the first
//! non-empty result wins and no lower-priority strategy is consulted. When
//! every strategy misses, a purpose-inference table is tried, then a plain
//! text-content search. Resolution never retries on its own; a miss is
//! reported once as `None`.

pub mod purpose;
pub mod strategies;

use crate::action::{Action, ActionType};
use crate::driver::{BrowserDriver, ElementHandle};
use crate::Result;
use async_trait::async_trait;
use std::cmp::Reverse;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default probing budget per strategy.
pub const DEFAULT_STRATEGY_TIMEOUT_MS: u64 = 3000;

/// Default budget for one whole resolution.
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 15_000;

/// Per-call bookkeeping for one resolution attempt.
#[derive(Debug, Clone)]
pub struct ElementContext {
    /// Selectors probed so far, in order.
    pub tried: Vec<String>,
    pub started: Instant,
    pub timeout_per_strategy: Duration,
    /// No probe runs past this point.
    pub deadline: Instant,
    pub last_error: Option<String>,
}

impl ElementContext {
    pub fn new(timeout_per_strategy: Duration) -> Self {
        let started = Instant::now();
        Self {
            tried: Vec::new(),
            started,
            timeout_per_strategy,
            deadline: started + Duration::from_millis(DEFAULT_ACTION_TIMEOUT_MS),
            last_error: None,
        }
    }

    /// Cap the whole resolution at `budget` from the start.
    pub fn with_action_budget(mut self, budget: Duration) -> Self {
        self.deadline = self.started + budget;
        self
    }

    /// Budget for the next probe: the per-strategy slice, cut short by the
    /// deadline. `None` once the deadline has passed.
    pub fn next_slice(&self) -> Option<Duration> {
        let left = self.deadline.saturating_duration_since(Instant::now());
        (!left.is_zero()).then(|| left.min(self.timeout_per_strategy))
    }

    /// Record a selector about to be probed.
    pub fn attempt(&mut self, selector: impl Into<String>) {
        self.tried.push(selector.into());
    }

    /// [`next_slice`](Self::next_slice) in milliseconds, for driver waits.
    pub fn timeout_ms(&self) -> u64 {
        self.next_slice().unwrap_or_default().as_millis() as u64
    }
}

impl Default for ElementContext {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_STRATEGY_TIMEOUT_MS))
    }
}

/// A named, prioritized policy for locating an element. Stateless.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Higher runs first.
    fn priority(&self) -> i32;

    fn can_handle(&self, action: &Action) -> bool;

    async fn find_element(
        &self,
        driver: &dyn BrowserDriver,
        action: &Action,
        ctx: &mut ElementContext,
    ) -> Result<Option<ElementHandle>>;
}

/// Priority-ordered strategy registry.
pub struct ElementResolver {
    strategies: Vec<Box<dyn Strategy>>,
}

impl Default for ElementResolver {
    fn default() -> Self {
        Self::with_default_strategies()
    }
}

impl ElementResolver {
    /// An empty registry. Only the fallbacks run until strategies are added.
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Registry holding the canonical strategy set.
    pub fn with_default_strategies() -> Self {
        let mut resolver = Self::new();
        for strategy in strategies::defaults() {
            resolver.register(strategy);
        }
        resolver
    }

    /// Add a strategy. Equal priorities keep registration order.
    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| Reverse(s.priority()));
    }

    /// Strategy names in the order they will run.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Resolve the action's target to one element, or `None`.
    pub async fn find_element(
        &self,
        driver: &dyn BrowserDriver,
        action: &Action,
        ctx: &mut ElementContext,
    ) -> Option<ElementHandle> {
        let found = match self.run_strategies(driver, action, ctx).await {
            Some(handle) => Some(handle),
            None => self.run_fallbacks(driver, action, ctx).await,
        };

        let handle = found?;
        if action.action_type == ActionType::Input {
            if let Err(e) = driver.remove_attribute(&handle, "readonly").await {
                warn!("could not clear readonly on {}: {}", handle.selector, e);
            }
        }
        info!(
            "resolved {} -> {} in {}ms",
            action.target.as_deref().unwrap_or("?"),
            handle.selector,
            ctx.started.elapsed().as_millis()
        );
        Some(handle)
    }

    async fn run_strategies(
        &self,
        driver: &dyn BrowserDriver,
        action: &Action,
        ctx: &mut ElementContext,
    ) -> Option<ElementHandle> {
        for strategy in &self.strategies {
            if !strategy.can_handle(action) {
                continue;
            }
            let Some(budget) = ctx.next_slice() else {
                debug!("action budget spent before {}", strategy.name());
                ctx.last_error = Some("action budget spent".into());
                return None;
            };
            debug!("trying strategy {} ({})", strategy.name(), strategy.priority());
            let outcome = bounded(budget, strategy.find_element(driver, action, ctx)).await;
            if let Some(handle) = settle(strategy.name(), outcome, ctx) {
                return Some(handle);
            }
        }
        None
    }

    async fn run_fallbacks(
        &self,
        driver: &dyn BrowserDriver,
        action: &Action,
        ctx: &mut ElementContext,
    ) -> Option<ElementHandle> {
        let Some(budget) = ctx.next_slice() else {
            return spent(ctx);
        };
        let outcome = bounded(budget, purpose::find_by_purpose(driver, action, ctx)).await;
        if let Some(handle) = settle("purpose", outcome, ctx) {
            return Some(handle);
        }

        let Some(budget) = ctx.next_slice() else {
            return spent(ctx);
        };
        let outcome = bounded(budget, purpose::find_by_text(driver, action, ctx)).await;
        if let Some(handle) = settle("text_content", outcome, ctx) {
            return Some(handle);
        }

        debug!(
            "all strategies exhausted for {:?} after {} probes",
            action.target,
            ctx.tried.len()
        );
        None
    }
}

fn spent(ctx: &mut ElementContext) -> Option<ElementHandle> {
    debug!("action budget spent after {} probes", ctx.tried.len());
    ctx.last_error = Some("action budget spent".into());
    None
}

/// Run a probe under the per-strategy budget. Elapsed counts as not found.
async fn bounded<F>(budget: Duration, probe: F) -> Option<Result<Option<ElementHandle>>>
where
    F: Future<Output = Result<Option<ElementHandle>>>,
{
    tokio::time::timeout(budget, probe).await.ok()
}

fn settle(
    name: &str,
    outcome: Option<Result<Option<ElementHandle>>>,
    ctx: &mut ElementContext,
) -> Option<ElementHandle> {
    match outcome {
        Some(Ok(Some(handle))) => {
            debug!("{} matched {}", name, handle.selector);
            Some(handle)
        }
        Some(Ok(None)) => None,
        Some(Err(e)) => {
            debug!("{} failed: {}", name, e);
            ctx.last_error = Some(e.to_string());
            None
        }
        None => {
            debug!("{} ran out of time", name);
            ctx.last_error = Some(format!("{} timed out", name));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryDriver;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        name: &'static str,
        priority: i32,
        handles: bool,
        hit: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Strategy for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn can_handle(&self, _action: &Action) -> bool {
            self.handles
        }

        async fn find_element(
            &self,
            _driver: &dyn BrowserDriver,
            _action: &Action,
            _ctx: &mut ElementContext,
        ) -> Result<Option<ElementHandle>> {
            self.log.lock().unwrap().push(self.name);
            Ok(self
                .hit
                .then(|| ElementHandle::new(format!("#{}", self.name), "div", "")))
        }
    }

    fn recorder(
        name: &'static str,
        priority: i32,
        hit: bool,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Box<dyn Strategy> {
        Box::new(Recorder {
            name,
            priority,
            handles: true,
            hit,
            log: log.clone(),
        })
    }

    fn click(target: &str) -> Action {
        Action::new(ActionType::Click).with_target(target)
    }

    #[test]
    fn registration_sorts_by_priority_stably() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut r = ElementResolver::new();
        r.register(recorder("low", 10, false, &log));
        r.register(recorder("first_50", 50, false, &log));
        r.register(recorder("high", 90, false, &log));
        r.register(recorder("second_50", 50, false, &log));
        assert_eq!(r.strategy_names(), vec!["high", "first_50", "second_50", "low"]);
    }

    #[test]
    fn default_strategy_order() {
        let r = ElementResolver::with_default_strategies();
        assert_eq!(
            r.strategy_names(),
            vec![
                "DirectSelector",
                "IdSelector",
                "InputPattern",
                "LinkStrategy",
                "RoleBased",
                "SingleElement"
            ]
        );
    }

    #[tokio::test]
    async fn stops_at_first_hit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut r = ElementResolver::new();
        r.register(recorder("c", 10, true, &log));
        r.register(recorder("a", 90, false, &log));
        r.register(recorder("b", 50, true, &log));

        let driver = MemoryDriver::new();
        let mut ctx = ElementContext::default();
        let found = r.find_element(&driver, &click("x"), &mut ctx).await.unwrap();

        assert_eq!(found.selector, "#b");
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn skips_strategies_that_cannot_handle() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut r = ElementResolver::new();
        r.register(Box::new(Recorder {
            name: "picky",
            priority: 100,
            handles: false,
            hit: true,
            log: log.clone(),
        }));
        r.register(recorder("general", 1, true, &log));

        let driver = MemoryDriver::new();
        let found = r
            .find_element(&driver, &click("x"), &mut ElementContext::default())
            .await
            .unwrap();
        assert_eq!(found.selector, "#general");
        assert_eq!(*log.lock().unwrap(), vec!["general"]);
    }

    struct Slow;

    #[async_trait]
    impl Strategy for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn priority(&self) -> i32 {
            100
        }
        fn can_handle(&self, _action: &Action) -> bool {
            true
        }
        async fn find_element(
            &self,
            _driver: &dyn BrowserDriver,
            _action: &Action,
            _ctx: &mut ElementContext,
        ) -> Result<Option<ElementHandle>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some(ElementHandle::new("#late", "div", "")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_not_found() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut r = ElementResolver::new();
        r.register(Box::new(Slow));
        r.register(recorder("next", 1, true, &log));

        let driver = MemoryDriver::new();
        let mut ctx = ElementContext::new(Duration::from_millis(50));
        let found = r.find_element(&driver, &click("x"), &mut ctx).await.unwrap();
        assert_eq!(found.selector, "#next");
        assert_eq!(ctx.last_error.as_deref(), Some("slow timed out"));
    }

    struct Hang(&'static str);

    #[async_trait]
    impl Strategy for Hang {
        fn name(&self) -> &'static str {
            self.0
        }
        fn priority(&self) -> i32 {
            50
        }
        fn can_handle(&self, _action: &Action) -> bool {
            true
        }
        async fn find_element(
            &self,
            _driver: &dyn BrowserDriver,
            _action: &Action,
            _ctx: &mut ElementContext,
        ) -> Result<Option<ElementHandle>> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_strategies_share_the_action_budget() {
        let mut r = ElementResolver::new();
        for name in ["a", "b", "c", "d", "e", "f"] {
            r.register(Box::new(Hang(name)));
        }

        let driver = MemoryDriver::new();
        let mut ctx = ElementContext::new(Duration::from_millis(DEFAULT_STRATEGY_TIMEOUT_MS))
            .with_action_budget(Duration::from_millis(DEFAULT_ACTION_TIMEOUT_MS));
        let start = Instant::now();
        let found = r.find_element(&driver, &click("x"), &mut ctx).await;

        assert!(found.is_none());
        assert_eq!(start.elapsed(), Duration::from_millis(DEFAULT_ACTION_TIMEOUT_MS));
        assert_eq!(ctx.last_error.as_deref(), Some("action budget spent"));
    }

    #[tokio::test(start_paused = true)]
    async fn last_slice_is_cut_to_the_deadline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut r = ElementResolver::new();
        r.register(Box::new(Hang("stuck")));
        r.register(recorder("never", 1, true, &log));

        let driver = MemoryDriver::new();
        let mut ctx = ElementContext::new(Duration::from_millis(3000))
            .with_action_budget(Duration::from_millis(1000));
        let start = Instant::now();
        assert!(r.find_element(&driver, &click("x"), &mut ctx).await.is_none());
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_button_fallback() {
        let driver = MemoryDriver::new().with(
            strategies::BUTTON_SELECTOR,
            ElementHandle::new("#only", "button", "Go"),
        );
        let r = ElementResolver::with_default_strategies();
        let found = r
            .find_element(&driver, &click("button-generic"), &mut ElementContext::default())
            .await
            .unwrap();
        assert_eq!(found.selector, "#only");
    }

    #[tokio::test]
    async fn direct_selector_wins() {
        let driver = MemoryDriver::new()
            .with("#submit", ElementHandle::new("#submit", "button", "Submit"))
            .with(
                strategies::BUTTON_SELECTOR,
                ElementHandle::new("#other", "button", "Other"),
            );
        let r = ElementResolver::with_default_strategies();
        let found = r
            .find_element(&driver, &click("#submit"), &mut ElementContext::default())
            .await
            .unwrap();
        assert_eq!(found.selector, "#submit");
        assert!(!driver.calls().iter().any(|c| c.starts_with("query_all")));
    }

    #[tokio::test]
    async fn input_clears_readonly() {
        let driver =
            MemoryDriver::new().with("#q", ElementHandle::new("#q", "input", ""));
        let r = ElementResolver::with_default_strategies();
        let action = Action::new(ActionType::Input)
            .with_target("#q")
            .with_value("rust");
        r.find_element(&driver, &action, &mut ElementContext::default())
            .await
            .unwrap();
        assert!(driver
            .calls()
            .contains(&"remove_attribute #q readonly".to_string()));
    }

    #[tokio::test]
    async fn click_does_not_touch_attributes() {
        let driver =
            MemoryDriver::new().with("#go", ElementHandle::new("#go", "button", "Go"));
        let r = ElementResolver::with_default_strategies();
        r.find_element(&driver, &click("#go"), &mut ElementContext::default())
            .await
            .unwrap();
        assert!(!driver.calls().iter().any(|c| c.starts_with("remove_attribute")));
    }

    #[tokio::test]
    async fn text_content_fallback() {
        let driver = MemoryDriver::new()
            .with(
                purpose::TEXT_CANDIDATES,
                ElementHandle::new("#a", "a", "Home"),
            )
            .with(
                purpose::TEXT_CANDIDATES,
                ElementHandle::new("#b", "a", "Pricing Plans"),
            );
        let r = ElementResolver::new();
        let action = click("nothing-matches").with_description("pricing");
        let found = r
            .find_element(&driver, &action, &mut ElementContext::default())
            .await
            .unwrap();
        assert_eq!(found.selector, "#b");
    }

    #[tokio::test]
    async fn exhausted_resolution_is_none() {
        let driver = MemoryDriver::new();
        let r = ElementResolver::with_default_strategies();
        let mut ctx = ElementContext::default();
        assert!(r
            .find_element(&driver, &click("#ghost"), &mut ctx)
            .await
            .is_none());
        assert!(ctx.tried.contains(&"#ghost".to_string()));
    }
}
