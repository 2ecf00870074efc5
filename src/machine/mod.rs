//! The execution state machine.
//!
//! One state runs at a time. Each handler mutates the [`ExecutionContext`]
//! in place and returns the next [`State`]. Failures never leave the loop:
//! they are recorded and routed to [`State::HandleFailure`], the only place
//! retries are counted.

pub mod context;
pub mod progress;
pub mod prompt;

pub use context::{ActionRecord, ExecutionContext};
pub use progress::{PageState, Progress};

use crate::action::{
    Action, ActionExtractor, ActionType, ActionValidator, NoteOperation, ScrollDirection,
    ValidationContext,
};
use crate::config::{AgentConfig, Config};
use crate::driver::{BrowserDriver, ElementHandle};
use crate::human::{HumanChannel, TerminalHuman};
use crate::llm::LanguageModel;
use crate::notes::{FileNoteStore, MemoryNoteStore, NoteStore};
use crate::resolve::{purpose, ElementContext, ElementResolver};
use crate::snapshot::{DomSnapshotter, SnapshotConfig, SnapshotSource};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Failures tolerated before the session terminates.
pub const MAX_RETRIES: u32 = 7;

/// Exit reason reported for every finished session.
pub const EXIT_REASON: &str = "terminated";

/// Pixels moved by one scroll action.
pub const SCROLL_STEP_PX: i64 = 600;

const DEFAULT_WAIT_MS: u64 = 1000;
const MAX_WAIT_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum State {
    ChooseAction,
    Navigate,
    Click,
    Input,
    Wait,
    Scroll,
    Notes,
    SendHumanMessage,
    GetPageState,
    HandleFailure,
    Terminate,
    Terminated,
}

impl State {
    /// Handler state for an action type.
    pub fn for_action(action_type: ActionType) -> Self {
        match action_type {
            ActionType::Click => State::Click,
            ActionType::Input => State::Input,
            ActionType::Navigate => State::Navigate,
            ActionType::Wait => State::Wait,
            ActionType::Scroll => State::Scroll,
            ActionType::Notes => State::Notes,
            ActionType::SendHumanMessage => State::SendHumanMessage,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            State::ChooseAction => "chooseAction",
            State::Navigate => "navigate",
            State::Click => "click",
            State::Input => "input",
            State::Wait => "wait",
            State::Scroll => "scroll",
            State::Notes => "notes",
            State::SendHumanMessage => "sendHumanMessage",
            State::GetPageState => "getPageState",
            State::HandleFailure => "handleFailure",
            State::Terminate => "terminate",
            State::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == State::Terminated
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why the loop headed for `terminate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    RetryBudgetExceeded,
    StepLimit,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::RetryBudgetExceeded => "retry budget exceeded",
            StopReason::StepLimit => "step limit reached",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Snapshot of externally visible progress, published after every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub step: u32,
    pub state: State,
    pub history_len: usize,
    pub action_feedback: String,
    pub recognized_milestones: Vec<String>,
    pub retries: u32,
}

impl Default for Observation {
    fn default() -> Self {
        Self {
            step: 0,
            state: State::GetPageState,
            history_len: 0,
            action_feedback: String::new(),
            recognized_milestones: Vec::new(),
            retries: 0,
        }
    }
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Always [`EXIT_REASON`].
    pub exit_reason: &'static str,
    pub stop_reason: StopReason,
    /// Transitions taken in this run.
    pub steps: u32,
    pub retries: u32,
    pub success_count: u32,
    pub milestones: Vec<String>,
    pub recognized_milestones: Vec<String>,
    pub history: Vec<String>,
}

impl RunOutcome {
    pub fn budget_exceeded(&self) -> bool {
        self.stop_reason == StopReason::RetryBudgetExceeded
    }
}

/// Assembles a [`StateMachine`] with default collaborators where none are given.
pub struct StateMachineBuilder {
    driver: Arc<dyn BrowserDriver>,
    llm: Arc<dyn LanguageModel>,
    snapshots: Option<Arc<dyn SnapshotSource>>,
    human: Option<Arc<dyn HumanChannel>>,
    notes: Option<Arc<dyn NoteStore>>,
    resolver: Option<ElementResolver>,
    cancel: Option<CancellationToken>,
    snapshot_config: SnapshotConfig,
    agent: AgentConfig,
    goal: String,
    start_url: Option<String>,
    notes_path: Option<PathBuf>,
    state_file: Option<PathBuf>,
}

impl StateMachineBuilder {
    pub fn snapshot_source(mut self, source: Arc<dyn SnapshotSource>) -> Self {
        self.snapshots = Some(source);
        self
    }

    pub fn human(mut self, human: Arc<dyn HumanChannel>) -> Self {
        self.human = Some(human);
        self
    }

    pub fn notes(mut self, notes: Arc<dyn NoteStore>) -> Self {
        self.notes = Some(notes);
        self
    }

    pub fn resolver(mut self, resolver: ElementResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn snapshot_config(mut self, config: SnapshotConfig) -> Self {
        self.snapshot_config = config;
        self
    }

    /// Override the goal from the config.
    pub fn goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    pub fn build(self) -> StateMachine {
        let notes: Arc<dyn NoteStore> = match (self.notes, self.notes_path) {
            (Some(n), _) => n,
            (None, Some(path)) => Arc::new(FileNoteStore::new(path)),
            (None, None) => Arc::new(MemoryNoteStore::new()),
        };
        let (observer, _) = watch::channel(Observation::default());

        StateMachine {
            driver: self.driver,
            llm: self.llm,
            snapshots: self.snapshots.unwrap_or_else(|| Arc::new(DomSnapshotter)),
            human: self.human.unwrap_or_else(|| Arc::new(TerminalHuman)),
            notes,
            resolver: self
                .resolver
                .unwrap_or_else(ElementResolver::with_default_strategies),
            extractor: ActionExtractor::new(),
            validator: ActionValidator::new(),
            cancel: self.cancel.unwrap_or_default(),
            observer,
            snapshot_config: self.snapshot_config,
            agent: self.agent,
            start_url: self.start_url,
            state_file: self.state_file,
            ctx: ExecutionContext::new(self.goal),
            state: State::GetPageState,
            stop: None,
            steps: 0,
        }
    }
}

/// Drives one browser session to termination.
pub struct StateMachine {
    driver: Arc<dyn BrowserDriver>,
    llm: Arc<dyn LanguageModel>,
    snapshots: Arc<dyn SnapshotSource>,
    human: Arc<dyn HumanChannel>,
    notes: Arc<dyn NoteStore>,
    resolver: ElementResolver,
    extractor: ActionExtractor,
    validator: ActionValidator,
    cancel: CancellationToken,
    observer: watch::Sender<Observation>,
    snapshot_config: SnapshotConfig,
    agent: AgentConfig,
    start_url: Option<String>,
    state_file: Option<PathBuf>,
    ctx: ExecutionContext,
    state: State,
    stop: Option<StopReason>,
    steps: u32,
}

impl StateMachine {
    pub fn builder(
        config: &Config,
        driver: Arc<dyn BrowserDriver>,
        llm: Arc<dyn LanguageModel>,
    ) -> StateMachineBuilder {
        StateMachineBuilder {
            driver,
            llm,
            snapshots: None,
            human: None,
            notes: None,
            resolver: None,
            cancel: None,
            snapshot_config: SnapshotConfig::default(),
            agent: config.agent.clone(),
            goal: config.goal.clone(),
            start_url: config.start_url.clone(),
            notes_path: config.notes.as_ref().map(|n| n.path.clone()),
            state_file: config.state_file.clone(),
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Token that stops the loop at the next state boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Observation> {
        self.observer.subscribe()
    }

    /// Run until `terminated`.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        self.restore().await;
        self.open_start_url().await;

        while !self.state.is_terminal() {
            if self.state != State::Terminate {
                if self.cancel.is_cancelled() {
                    info!("stop requested, terminating");
                    self.stop = Some(StopReason::Cancelled);
                    self.state = State::Terminate;
                } else if self.steps >= self.agent.max_steps {
                    warn!("step limit {} reached", self.agent.max_steps);
                    self.stop = Some(StopReason::StepLimit);
                    self.state = State::Terminate;
                }
            }

            let next = self.step(self.state).await;
            debug!("{} -> {}", self.state, next);
            self.steps += 1;
            self.state = next;
            self.publish();
        }

        Ok(self.outcome())
    }

    /// Run one handler and return the state it chose.
    pub async fn step(&mut self, state: State) -> State {
        match state {
            State::ChooseAction => self.choose_action().await,
            State::Navigate => self.navigate().await,
            State::Click => self.click().await,
            State::Input => self.input().await,
            State::Wait => self.wait().await,
            State::Scroll => self.scroll().await,
            State::Notes => self.notes().await,
            State::SendHumanMessage => self.send_human_message().await,
            State::GetPageState => self.get_page_state().await,
            State::HandleFailure => self.handle_failure(),
            State::Terminate => self.terminate().await,
            State::Terminated => State::Terminated,
        }
    }

    async fn restore(&mut self) {
        let Some(ref path) = self.state_file else {
            return;
        };
        let loaded = match ExecutionContext::load(path).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("could not read saved session {}: {}, starting fresh", path.display(), e);
                None
            }
        };
        match loaded {
            Some(saved) if saved.goal == self.ctx.goal => {
                info!(
                    "resuming session from {} ({} history entries)",
                    path.display(),
                    saved.history.len()
                );
                self.ctx = saved;
                self.ctx.retries = 0;
                self.ctx.page_stale = true;
            }
            Some(_) => info!("saved session in {} has a different goal, starting fresh", path.display()),
            None => {}
        }
    }

    async fn open_start_url(&mut self) {
        let Some(url) = self.start_url.clone() else {
            return;
        };
        info!("opening {}", url);
        if let Err(e) = self.driver.goto(&url, self.agent.action_timeout_ms).await {
            warn!("could not open start url {}: {}", url, e);
            self.ctx.action_feedback = format!("Could not open {}: {}", url, e);
        }
        self.ctx.page_stale = true;
    }

    fn publish(&self) {
        self.observer.send_replace(Observation {
            step: self.steps,
            state: self.state,
            history_len: self.ctx.history.len(),
            action_feedback: self.ctx.action_feedback.clone(),
            recognized_milestones: self.ctx.recognized_milestones.clone(),
            retries: self.ctx.retries,
        });
    }

    fn outcome(&self) -> RunOutcome {
        RunOutcome {
            exit_reason: EXIT_REASON,
            stop_reason: self.stop.unwrap_or(StopReason::Cancelled),
            steps: self.steps,
            retries: self.ctx.retries,
            success_count: self.ctx.success_count,
            milestones: self.ctx.milestones.clone(),
            recognized_milestones: self.ctx.recognized_milestones.clone(),
            history: self.ctx.history.clone(),
        }
    }

    /// Run a driver call under the per-action budget.
    async fn within<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let budget = self.agent.action_timeout_ms;
        tokio::time::timeout(Duration::from_millis(budget), call)
            .await
            .map_err(|_| Error::ActionFailed(format!("timed out after {}ms", budget)))?
    }

    fn fail(&mut self, reason: impl Into<String>) -> State {
        let reason = reason.into();
        warn!("action failed: {}", reason);
        self.ctx.record_failure(reason);
        State::HandleFailure
    }

    fn succeed(&mut self, result: String, feedback: String, page_changed: bool) {
        info!("{}", result);
        self.ctx.record_success(result, feedback);
        if page_changed {
            self.ctx.page_stale = true;
        }
    }

    fn current_action(&self) -> Option<Action> {
        self.ctx.action.clone()
    }

    async fn resolve(&self, action: &Action) -> std::result::Result<ElementHandle, String> {
        let mut ectx = ElementContext::new(Duration::from_millis(self.agent.strategy_timeout_ms))
            .with_action_budget(Duration::from_millis(self.agent.action_timeout_ms));
        match self.resolver.find_element(self.driver.as_ref(), action, &mut ectx).await {
            Some(handle) => Ok(handle),
            None => Err(match ectx.last_error {
                Some(e) => format!(
                    "no element found for {} after {} probes ({})",
                    action.target.as_deref().unwrap_or("?"),
                    ectx.tried.len(),
                    e
                ),
                None => format!(
                    "no element found for {} after {} probes",
                    action.target.as_deref().unwrap_or("?"),
                    ectx.tried.len()
                ),
            }),
        }
    }

    async fn choose_action(&mut self) -> State {
        if self.ctx.page_stale {
            return State::GetPageState;
        }

        let prompt = prompt::build(&self.ctx, self.agent.history_window);
        let raw = match self.llm.complete(prompt::SYSTEM_PROMPT, &prompt).await {
            Ok(text) => text,
            Err(e) => {
                self.ctx.action = None;
                return self.fail(format!("model request failed: {}", e));
            }
        };

        let Some(action) = self.extractor.extract(&raw) else {
            self.ctx.action = None;
            let excerpt: String = raw.chars().take(80).collect();
            return self.fail(format!("could not read an action from model output: {}", excerpt.trim()));
        };

        let vctx = ValidationContext::from_snapshot(self.ctx.current_page.as_ref());
        let action = self.validator.validate(action, &vctx);
        info!("chose: {}", action);
        let next = State::for_action(action.action_type);
        self.ctx.action = Some(action);
        next
    }

    async fn navigate(&mut self) -> State {
        let Some(action) = self.current_action() else {
            return self.fail("no current action");
        };
        let Some(url) = action.value.clone().or_else(|| action.target.clone()) else {
            return self.fail("navigate without a URL");
        };
        if let Err(e) = url::Url::parse(&url) {
            return self.fail(format!("invalid URL {}: {}", url, e));
        }

        if let Err(e) = self.within(self.driver.goto(&url, self.agent.action_timeout_ms)).await {
            return self.fail(format!("navigation to {} failed: {}", url, e));
        }

        let landed = match self.driver.current_url().await {
            Ok(u) => u,
            Err(e) => return self.fail(format!("could not read URL after navigation: {}", e)),
        };
        if landed.is_empty() || landed == "about:blank" {
            return self.fail(format!("navigation to {} did not load a page", url));
        }
        let title = self.driver.title().await.unwrap_or_default();

        let moved = action.previous_url.as_deref() != Some(landed.as_str());
        let feedback = if moved {
            format!("Navigated to {} (\"{}\").", landed, title)
        } else {
            format!("Navigated, but the URL is unchanged: {}.", landed)
        };
        self.succeed(format!("navigate to {}", landed), feedback, true);
        State::ChooseAction
    }

    async fn click(&mut self) -> State {
        let Some(action) = self.current_action() else {
            return self.fail("no current action");
        };
        let handle = match self.resolve(&action).await {
            Ok(h) => h,
            Err(reason) => return self.fail(reason),
        };
        if let Err(e) = self.within(self.driver.click(&handle)).await {
            return self.fail(format!("click on {} failed: {}", handle.selector, e));
        }
        self.succeed(
            format!("click {}", handle),
            format!("Clicked {}.", handle),
            true,
        );
        State::ChooseAction
    }

    async fn input(&mut self) -> State {
        let Some(action) = self.current_action() else {
            return self.fail("no current action");
        };
        let Some(value) = action.value.clone() else {
            return self.fail("input without a value");
        };
        let handle = match self.resolve(&action).await {
            Ok(h) => h,
            Err(reason) => return self.fail(reason),
        };
        if let Err(e) = self.within(self.driver.fill(&handle, &value)).await {
            return self.fail(format!("typing into {} failed: {}", handle.selector, e));
        }

        let submitted = purpose::classify(&action) == Some(purpose::Purpose::SearchInput);
        if submitted {
            if let Err(e) = self.within(self.driver.press_key("Enter")).await {
                return self.fail(format!("submitting {} failed: {}", handle.selector, e));
            }
        }

        let feedback = if submitted {
            format!("Typed \"{}\" into {} and pressed Enter.", value, handle)
        } else {
            format!("Typed \"{}\" into {}.", value, handle)
        };
        self.succeed(
            format!("input \"{}\" into {}", value, handle.selector),
            feedback,
            true,
        );
        State::ChooseAction
    }

    async fn wait(&mut self) -> State {
        let Some(action) = self.current_action() else {
            return self.fail("no current action");
        };

        if let Some(ref target) = action.target {
            let found = self
                .driver
                .wait_for_selector(target, action.max_wait)
                .await;
            return match found {
                Ok(Some(h)) => {
                    self.succeed(
                        format!("wait for {}", target),
                        format!("{} is present.", h),
                        true,
                    );
                    State::ChooseAction
                }
                Ok(None) => self.fail(format!("{} did not appear within {}ms", target, action.max_wait)),
                Err(e) => self.fail(format!("waiting for {} failed: {}", target, e)),
            };
        }

        let ms = wait_millis(action.value.as_deref());
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.succeed(format!("wait {}ms", ms), format!("Waited {}ms.", ms), true);
        State::ChooseAction
    }

    async fn scroll(&mut self) -> State {
        let Some(action) = self.current_action() else {
            return self.fail("no current action");
        };
        let (word, dy) = match action.direction {
            Some(ScrollDirection::Up) => ("up", -SCROLL_STEP_PX),
            _ => ("down", SCROLL_STEP_PX),
        };
        if let Err(e) = self.within(self.driver.scroll_by(0, dy)).await {
            return self.fail(format!("scroll {} failed: {}", word, e));
        }
        self.succeed(format!("scroll {}", word), format!("Scrolled {}.", word), true);
        State::GetPageState
    }

    async fn notes(&mut self) -> State {
        let Some(action) = self.current_action() else {
            return self.fail("no current action");
        };
        let note = action.note.clone().or_else(|| action.value.clone());
        let operation = action.operation.unwrap_or(if note.is_some() {
            NoteOperation::Add
        } else {
            NoteOperation::Read
        });

        match operation {
            NoteOperation::Add => {
                let Some(note) = note else {
                    return self.fail("notes add without a note");
                };
                if let Err(e) = self.notes.add(&note).await {
                    return self.fail(format!("saving note failed: {}", e));
                }
                self.succeed(format!("note added: {}", note), "Note saved.".into(), false);
            }
            NoteOperation::Read => match self.notes.read().await {
                Ok(text) => {
                    let feedback = if text.is_empty() {
                        "No notes yet.".to_string()
                    } else {
                        format!("Notes:\n{}", text)
                    };
                    self.succeed("notes read".into(), feedback, false);
                }
                Err(e) => return self.fail(format!("reading notes failed: {}", e)),
            },
        }
        State::ChooseAction
    }

    async fn send_human_message(&mut self) -> State {
        let Some(action) = self.current_action() else {
            return self.fail("no current action");
        };
        let question = action
            .question
            .clone()
            .unwrap_or_else(|| crate::action::validate::DEFAULT_HUMAN_QUESTION.to_string());
        info!("asking human: {}", question);
        match self.human.ask(&question).await {
            Ok(answer) => {
                self.succeed(
                    format!("asked human: {}", question),
                    format!("Human answered: {}", answer),
                    false,
                );
                State::ChooseAction
            }
            Err(e) => self.fail(format!("no answer from human: {}", e)),
        }
    }

    async fn get_page_state(&mut self) -> State {
        let snapshot = match self
            .snapshots
            .extract_snapshot(self.driver.as_ref(), &self.snapshot_config)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                self.ctx.page_stale = false;
                return self.fail(format!("page snapshot failed: {}", e));
            }
        };

        self.ctx.page_stale = false;
        self.ctx.visit(&snapshot.url);

        if snapshot.loading {
            debug!("{} still loading, deferring evaluation", snapshot.url);
            tokio::time::sleep(Duration::from_millis(self.agent.loading_retry_ms)).await;
            self.ctx.current_page = Some(snapshot);
            return State::ChooseAction;
        }

        let page = PageState::from(&snapshot);
        let progress = Progress::detect(self.ctx.previous_page_state.as_ref(), &page);
        let reached = progress::evaluate_milestones(&mut self.ctx, &page);

        for m in &reached {
            info!("milestone reached: {}", m);
        }

        if !self.ctx.history.is_empty() {
            let mut feedback = self.ctx.action_feedback.clone();
            if self.ctx.last_action_success {
                push_sentence(&mut feedback, &progress.describe(&page));
            }
            if !reached.is_empty() {
                push_sentence(&mut feedback, &format!("Milestone reached: {}.", reached.join(", ")));
            }
            self.ctx.action_feedback = feedback;
        }

        self.ctx.previous_page_state = Some(page);
        self.ctx.current_page = Some(snapshot);
        State::ChooseAction
    }

    fn handle_failure(&mut self) -> State {
        self.ctx.retries += 1;
        if self.ctx.retries > self.agent.max_retries {
            warn!(
                "{} consecutive failures, giving up (max {})",
                self.ctx.retries, self.agent.max_retries
            );
            self.stop = Some(StopReason::RetryBudgetExceeded);
            return State::Terminate;
        }
        debug!("retry {}/{}", self.ctx.retries, self.agent.max_retries);
        State::ChooseAction
    }

    async fn terminate(&mut self) -> State {
        if let Some(ref path) = self.state_file {
            if let Err(e) = self.ctx.save(path).await {
                warn!("could not save session to {}: {}", path.display(), e);
            }
        }
        if let Err(e) = self.driver.close().await {
            warn!("closing browser failed: {}", e);
        }
        info!(
            "terminated after {} steps ({} history entries, {} milestones)",
            self.steps,
            self.ctx.history.len(),
            self.ctx.recognized_milestones.len()
        );
        State::Terminated
    }
}

/// Milliseconds for a plain wait: `value` if numeric, capped.
pub fn wait_millis(value: Option<&str>) -> u64 {
    value
        .and_then(|v| v.trim().trim_end_matches("ms").trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_WAIT_MS)
        .min(MAX_WAIT_MS)
}

fn push_sentence(buf: &mut String, sentence: &str) {
    if !buf.is_empty() {
        buf.push(' ');
    }
    buf.push_str(sentence);
}
