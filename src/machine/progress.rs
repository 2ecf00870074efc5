//! Progress detection between snapshots, and goal milestones.
//!
//! Milestones are inferred once from the goal text through [`MILESTONE_RULES`]
//! and checked after every fresh snapshot against cumulative signals.

use super::context::ExecutionContext;
use crate::action::ActionType;
use crate::snapshot::PageSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The parts of a snapshot progress is measured on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub element_counts: BTreeMap<String, usize>,
}

impl From<&PageSnapshot> for PageState {
    fn from(snapshot: &PageSnapshot) -> Self {
        Self {
            url: snapshot.url.clone(),
            title: snapshot.title.clone(),
            element_counts: snapshot.counts_by_tag(),
        }
    }
}

/// Difference between two page states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub url_changed: bool,
    pub title_changed: bool,
    /// Tags whose interactive-element count grew, with the increase.
    pub new_elements: Vec<(String, usize)>,
}

impl Progress {
    /// Compare `next` against the previous state. Without a baseline
    /// everything counts as new.
    pub fn detect(previous: Option<&PageState>, next: &PageState) -> Self {
        let Some(prev) = previous else {
            return Self {
                url_changed: true,
                title_changed: !next.title.is_empty(),
                new_elements: next
                    .element_counts
                    .iter()
                    .map(|(tag, n)| (tag.clone(), *n))
                    .collect(),
            };
        };

        let new_elements = next
            .element_counts
            .iter()
            .filter_map(|(tag, n)| {
                let before = prev.element_counts.get(tag).copied().unwrap_or(0);
                (*n > before).then(|| (tag.clone(), n - before))
            })
            .collect();

        Self {
            url_changed: prev.url != next.url,
            title_changed: prev.title != next.title,
            new_elements,
        }
    }

    pub fn any(&self) -> bool {
        self.url_changed || self.title_changed || !self.new_elements.is_empty()
    }

    /// One-line description for the model.
    pub fn describe(&self, next: &PageState) -> String {
        if !self.any() {
            return "No visible page change.".to_string();
        }
        let mut parts = Vec::new();
        if self.url_changed {
            parts.push(format!("URL is now {}", next.url));
        }
        if self.title_changed {
            parts.push(format!("title is now \"{}\"", next.title));
        }
        if !self.new_elements.is_empty() {
            let added: Vec<String> = self
                .new_elements
                .iter()
                .map(|(tag, n)| format!("+{} {}", n, tag))
                .collect();
            parts.push(format!("new elements: {}", added.join(", ")));
        }
        format!("Page changed: {}.", parts.join("; "))
    }
}

/// Observable evidence a milestone check can use.
#[derive(Debug, Clone, Copy)]
pub enum Check {
    /// A successful action of this type has been executed.
    ActionTaken(ActionType),
    /// The current URL contains one of these fragments (case-insensitive).
    UrlContains(&'static [&'static str]),
    /// The current title contains one of these fragments (case-insensitive).
    TitleContains(&'static [&'static str]),
    /// At least this many distinct URLs have been visited.
    DistinctUrls(usize),
    /// The history has at least this many entries.
    HistoryAtLeast(usize),
    AnyOf(&'static [Check]),
    AllOf(&'static [Check]),
}

/// A goal checkpoint: applies when the goal mentions any trigger word
/// (always, when there are none).
pub struct MilestoneRule {
    pub id: &'static str,
    pub triggers: &'static [&'static str],
    pub check: Check,
}

const SEARCH_WORDS: &[&str] = &["search", "find", "look up", "lookup", "query"];

pub const MILESTONE_RULES: &[MilestoneRule] = &[
    MilestoneRule {
        id: "first_action",
        triggers: &[],
        check: Check::HistoryAtLeast(1),
    },
    MilestoneRule {
        id: "site_reached",
        triggers: &["go to", "open", "visit", "navigate", "http", "www.", ".com", ".org", ".io"],
        check: Check::AnyOf(&[Check::ActionTaken(ActionType::Navigate), Check::DistinctUrls(2)]),
    },
    MilestoneRule {
        id: "search_entered",
        triggers: SEARCH_WORDS,
        check: Check::ActionTaken(ActionType::Input),
    },
    MilestoneRule {
        id: "results_shown",
        triggers: SEARCH_WORDS,
        check: Check::AnyOf(&[
            Check::UrlContains(&["search", "q=", "query=", "results"]),
            Check::TitleContains(&["search", "results"]),
        ]),
    },
    MilestoneRule {
        id: "logged_in",
        triggers: &["log in", "login", "sign in", "signin"],
        check: Check::AllOf(&[
            Check::ActionTaken(ActionType::Input),
            Check::ActionTaken(ActionType::Click),
            Check::DistinctUrls(2),
        ]),
    },
    MilestoneRule {
        id: "form_filled",
        triggers: &["fill", "form", "sign up", "register", "enter ", "type "],
        check: Check::ActionTaken(ActionType::Input),
    },
    MilestoneRule {
        id: "item_opened",
        triggers: &["click", "open", "select", "view", "read", "article", "product"],
        check: Check::AllOf(&[Check::ActionTaken(ActionType::Click), Check::DistinctUrls(2)]),
    },
    MilestoneRule {
        id: "page_explored",
        triggers: &["scroll", "browse", "explore", "all "],
        check: Check::ActionTaken(ActionType::Scroll),
    },
    MilestoneRule {
        id: "information_recorded",
        triggers: &["note", "record", "extract", "save", "collect", "list", "price", "summar"],
        check: Check::ActionTaken(ActionType::Notes),
    },
];

/// Ordered milestone ids that apply to `goal`.
pub fn infer_milestones(goal: &str) -> Vec<String> {
    let goal = goal.to_lowercase();
    MILESTONE_RULES
        .iter()
        .filter(|r| r.triggers.is_empty() || r.triggers.iter().any(|t| goal.contains(t)))
        .map(|r| r.id.to_string())
        .collect()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let haystack = haystack.to_lowercase();
    needles.iter().any(|n| haystack.contains(n))
}

fn holds(check: &Check, ctx: &ExecutionContext, page: &PageState) -> bool {
    match check {
        Check::ActionTaken(kind) => ctx.action_history.iter().any(|r| {
            r.success && r.action.as_ref().map(|a| a.action_type) == Some(*kind)
        }),
        Check::UrlContains(frags) => contains_any(&page.url, frags),
        Check::TitleContains(frags) => contains_any(&page.title, frags),
        Check::DistinctUrls(n) => ctx.visited_urls.len() >= *n,
        Check::HistoryAtLeast(n) => ctx.history.len() >= *n,
        Check::AnyOf(checks) => checks.iter().any(|c| holds(c, ctx, page)),
        Check::AllOf(checks) => checks.iter().all(|c| holds(c, ctx, page)),
    }
}

/// Record every pending milestone whose check now holds. Returns the newly
/// achieved ids in milestone order.
pub fn evaluate_milestones(ctx: &mut ExecutionContext, page: &PageState) -> Vec<String> {
    let pending: Vec<String> = ctx
        .milestones
        .iter()
        .filter(|m| !ctx.is_recognized(m))
        .cloned()
        .collect();

    let mut reached = Vec::new();
    for id in pending {
        let Some(rule) = MILESTONE_RULES.iter().find(|r| r.id == id) else {
            continue;
        };
        if holds(&rule.check, ctx, page) && ctx.recognize(&id) {
            reached.push(id);
        }
    }
    reached
}
