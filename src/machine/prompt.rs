//! Prompt assembly for the next decision.

use super::context::ExecutionContext;

pub const SYSTEM_PROMPT: &str = r#"You control a web browser to accomplish a goal. Each turn you choose exactly ONE next action.

Answer with a single JSON object and nothing else:
{"type": "<action>", "element": "<css selector>", "value": "<text>", "description": "<why>"}

Actions:
- click: "element" is a CSS selector from the element list. To follow a link by URL use {"type":"click","value":"a.<url>"}.
- input: "element" is the field, "value" is the text to type. Search fields are submitted automatically.
- navigate: "value" is an absolute URL.
- wait: "value" is milliseconds; optionally "element" to wait for.
- scroll: "direction" is "up" or "down".
- notes: {"type":"notes","operation":"add","note":"..."} to remember a finding, {"type":"notes","operation":"read"} to recall them.
- sendHumanMessage: {"type":"sendHumanMessage","question":"..."} when you are blocked (login, captcha, missing information).

Prefer selectors exactly as listed. If an action failed, try a different element or approach instead of repeating it."#;

/// History entries longer than this are cut in the prompt.
const HISTORY_ENTRY_LIMIT: usize = 160;

/// The last `window` history entries with consecutive repeats folded into
/// `entry (xN)`.
pub fn compress_history(history: &[String], window: usize) -> Vec<String> {
    let start = history.len().saturating_sub(window);
    let mut out: Vec<(String, usize)> = Vec::new();
    for entry in &history[start..] {
        let entry = truncate(entry, HISTORY_ENTRY_LIMIT);
        match out.last_mut() {
            Some((last, n)) if *last == entry => *n += 1,
            _ => out.push((entry, 1)),
        }
    }
    out.into_iter()
        .map(|(e, n)| if n > 1 { format!("{} (x{})", e, n) } else { e })
        .collect()
}

fn truncate(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let mut cut: String = s.chars().take(limit).collect();
    cut.push_str("...");
    cut
}

/// User prompt for the current context.
pub fn build(ctx: &ExecutionContext, history_window: usize) -> String {
    let mut p = String::with_capacity(4096);

    p.push_str("GOAL: ");
    p.push_str(&ctx.goal);
    p.push_str("\n\n");

    if !ctx.milestones.is_empty() {
        p.push_str(&format!(
            "MILESTONES: {}/{} reached",
            ctx.recognized_milestones.len(),
            ctx.milestones.len()
        ));
        if !ctx.recognized_milestones.is_empty() {
            p.push_str(&format!(" ({})", ctx.recognized_milestones.join(", ")));
        }
        p.push_str("\n\n");
    }

    if !ctx.action_feedback.is_empty() {
        p.push_str("LAST RESULT: ");
        p.push_str(&ctx.action_feedback);
        p.push_str("\n\n");
    }

    match ctx.current_page {
        Some(ref page) => {
            p.push_str(&format!("CURRENT PAGE: {}\nTITLE: {}\n", page.url, page.title));
            if page.loading {
                p.push_str("(page still loading)\n");
            }
            p.push_str("\nINTERACTIVE ELEMENTS:\n");
            if page.elements.is_empty() {
                p.push_str("(none)\n");
            } else {
                p.push_str(&page.element_list());
            }
            if !page.content.trim().is_empty() {
                p.push_str("\nPAGE TEXT:\n");
                p.push_str(page.content.trim());
                p.push('\n');
            }
            p.push('\n');
        }
        None => p.push_str("CURRENT PAGE: unknown\n\n"),
    }

    let recent = compress_history(&ctx.history, history_window);
    if !recent.is_empty() {
        p.push_str(&format!(
            "RECENT HISTORY (last {} of {}):\n",
            ctx.history.len().min(history_window),
            ctx.history.len()
        ));
        for entry in recent {
            p.push_str("- ");
            p.push_str(&entry);
            p.push('\n');
        }
        p.push('\n');
    }

    p.push_str("What is the next action? Answer with one JSON object.");
    p
}
