//! The session record owned by the state machine.

use super::progress::{self, PageState};
use crate::action::Action;
use crate::snapshot::PageSnapshot;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Structured outcome of one executed (or attempted) action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    /// `None` when the model's output could not be turned into an action.
    pub action: Option<Action>,
    pub success: bool,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

/// All mutable session state.
///
/// Only the machine writes to it, and it is updated in place so readers
/// see counters move monotonically between transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionContext {
    pub goal: String,
    /// The action currently being executed.
    pub action: Option<Action>,
    /// Human-readable outcome log, append-only.
    pub history: Vec<String>,
    pub action_history: Vec<ActionRecord>,
    /// Successes since the last failure.
    pub success_count: u32,
    /// Failures since the last success.
    pub retries: u32,
    pub last_action_success: bool,
    /// Checkpoints inferred from the goal, in order.
    pub milestones: Vec<String>,
    /// Achieved subset of `milestones`, in the order they were reached.
    pub recognized_milestones: Vec<String>,
    /// Baseline for progress detection.
    pub previous_page_state: Option<PageState>,
    /// Latest snapshot, used for prompting and validation.
    pub current_page: Option<PageSnapshot>,
    /// Distinct URLs seen, in first-visit order.
    pub visited_urls: Vec<String>,
    /// Status line surfaced in the next prompt.
    pub action_feedback: String,
    /// A page-mutating action ran since the last snapshot.
    pub page_stale: bool,
}

impl ExecutionContext {
    pub fn new(goal: impl Into<String>) -> Self {
        let goal = goal.into();
        Self {
            milestones: progress::infer_milestones(&goal),
            goal,
            page_stale: true,
            ..Default::default()
        }
    }

    pub fn record_success(&mut self, result: impl Into<String>, feedback: impl Into<String>) {
        let result = result.into();
        self.last_action_success = true;
        self.success_count += 1;
        self.retries = 0;
        self.history.push(format!("OK: {}", result));
        self.push_record(true, result);
        self.action_feedback = feedback.into();
    }

    pub fn record_failure(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.last_action_success = false;
        self.success_count = 0;
        self.history.push(format!("FAILED: {}", reason));
        self.action_feedback = format!("Last action failed: {}", reason);
        self.push_record(false, reason);
    }

    fn push_record(&mut self, success: bool, result: String) {
        self.action_history.push(ActionRecord {
            action: self.action.clone(),
            success,
            result,
            timestamp: Utc::now(),
        });
    }

    pub fn is_recognized(&self, milestone: &str) -> bool {
        self.recognized_milestones.iter().any(|m| m == milestone)
    }

    /// Mark a milestone achieved. Returns false if unknown or already achieved.
    pub fn recognize(&mut self, milestone: &str) -> bool {
        if self.is_recognized(milestone) || !self.milestones.iter().any(|m| m == milestone) {
            return false;
        }
        self.recognized_milestones.push(milestone.to_string());
        true
    }

    /// Remember a URL if it has not been seen before.
    pub fn visit(&mut self, url: &str) {
        if !url.is_empty() && url != "about:blank" && !self.visited_urls.iter().any(|u| u == url) {
            self.visited_urls.push(url.to_string());
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        debug!("saved context to {}", path.display());
        Ok(())
    }

    /// Read a saved context. A missing file is `Ok(None)`.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;

    #[test]
    fn success_resets_retries() {
        let mut ctx = ExecutionContext::new("click things");
        ctx.action = Some(Action::new(ActionType::Click).with_target("#a"));
        ctx.record_failure("not found");
        ctx.retries = 2;
        assert_eq!(ctx.success_count, 0);
        assert!(!ctx.last_action_success);

        ctx.record_success("clicked #a", "Clicked #a");
        assert_eq!(ctx.retries, 0);
        assert_eq!(ctx.success_count, 1);
        assert!(ctx.last_action_success);
        assert_eq!(ctx.history, vec!["FAILED: not found", "OK: clicked #a"]);
        assert_eq!(ctx.action_history.len(), 2);
        assert!(ctx.action_history[1].success);
    }

    #[test]
    fn failure_resets_success_count() {
        let mut ctx = ExecutionContext::default();
        ctx.record_success("a", "a");
        ctx.record_success("b", "b");
        assert_eq!(ctx.success_count, 2);
        ctx.record_failure("boom");
        assert_eq!(ctx.success_count, 0);
        assert_eq!(ctx.action_feedback, "Last action failed: boom");
    }

    #[test]
    fn milestones_are_append_only() {
        let mut ctx = ExecutionContext::new("search for rust");
        let first = ctx.milestones[0].clone();
        assert!(ctx.recognize(&first));
        assert!(!ctx.recognize(&first));
        assert!(!ctx.recognize("not-a-milestone"));
        assert_eq!(ctx.recognized_milestones, vec![first]);
    }

    #[test]
    fn visit_dedups() {
        let mut ctx = ExecutionContext::default();
        ctx.visit("about:blank");
        ctx.visit("https://a.com/");
        ctx.visit("https://a.com/");
        ctx.visit("https://b.com/");
        assert_eq!(ctx.visited_urls, vec!["https://a.com/", "https://b.com/"]);
    }

    #[tokio::test]
    async fn save_and_load() {
        let path = std::env::temp_dir().join(format!("eoka-pilot-ctx-{}.json", std::process::id()));
        let mut ctx = ExecutionContext::new("find the docs");
        ctx.action = Some(Action::new(ActionType::Navigate).with_value("https://docs.rs"));
        ctx.record_success("navigated", "ok");
        ctx.save(&path).await.unwrap();

        let loaded = ExecutionContext::load(&path).await.unwrap().unwrap();
        assert_eq!(loaded.goal, "find the docs");
        assert_eq!(loaded.history, ctx.history);
        assert_eq!(loaded.action_history, ctx.action_history);
        assert_eq!(loaded.milestones, ctx.milestones);

        let _ = tokio::fs::remove_file(&path).await;
        assert!(ExecutionContext::load(&path).await.unwrap().is_none());
    }
}
