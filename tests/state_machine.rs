//! Drives the whole state machine against in-memory collaborators.

use eoka_pilot::driver::memory::{MemoryDriver, MemorySnapshotter};
use eoka_pilot::machine::StateMachineBuilder;
use eoka_pilot::{
    Config, ElementHandle, MemoryNoteStore, ScriptedHuman, ScriptedModel, State, StateMachine,
    StopReason,
};
use std::sync::Arc;

fn config(extra: &str) -> Config {
    Config::parse(&format!("name: test\ngoal: search for tokio\n{}", extra)).unwrap()
}

fn builder(
    config: &Config,
    driver: &Arc<MemoryDriver>,
    model: &Arc<ScriptedModel>,
) -> StateMachineBuilder {
    StateMachine::builder(config, driver.clone(), model.clone())
        .snapshot_source(Arc::new(MemorySnapshotter::new(driver.clone())))
        .human(Arc::new(ScriptedHuman::new(Vec::<String>::new())))
        .notes(Arc::new(MemoryNoteStore::new()))
}

fn failed(history: &[String]) -> usize {
    history.iter().filter(|h| h.starts_with("FAILED")).count()
}

#[tokio::test]
async fn eight_consecutive_failures_terminate() {
    let driver = Arc::new(MemoryDriver::new().at("https://example.com/", "Example"));
    let model = Arc::new(ScriptedModel::new(vec![
        r##"{"type":"click","element":"#missing"}"##;
        8
    ]));
    let config = config("");
    let mut machine = builder(&config, &driver, &model).build();
    let observed = machine.subscribe();

    let outcome = machine.run().await.unwrap();

    assert_eq!(outcome.exit_reason, "terminated");
    assert_eq!(outcome.stop_reason, StopReason::RetryBudgetExceeded);
    assert!(outcome.budget_exceeded());
    assert_eq!(outcome.retries, 8);
    assert_eq!(outcome.history.len(), 8);
    assert_eq!(failed(&outcome.history), 8);
    assert_eq!(model.remaining(), 0);
    assert_eq!(model.prompts().len(), 8);
    assert!(driver.page().closed);
    assert_eq!(machine.state(), State::Terminated);
    assert_eq!(observed.borrow().state, State::Terminated);
    assert_eq!(observed.borrow().retries, 8);
}

#[tokio::test]
async fn success_resets_retries() {
    let driver = Arc::new(
        MemoryDriver::new()
            .at("https://example.com/", "Example")
            .with("#go", ElementHandle::new("#go", "button", "Go")),
    );
    let model = Arc::new(ScriptedModel::new([
        r##"{"type":"click","element":"#missing"}"##,
        r##"{"type":"click","element":"#go"}"##,
    ]));
    let config = config("");
    let mut machine = builder(&config, &driver, &model).build();

    let outcome = machine.run().await.unwrap();

    assert!(outcome.history[0].starts_with("FAILED: no element found for #missing"));
    assert!(outcome.history[1].starts_with("OK: click <button> #go"));
    // Script exhausted after the success: eight fresh failures end the run.
    assert_eq!(failed(&outcome.history), 9);
    assert_eq!(outcome.retries, 8);
    assert!(driver.calls().contains(&"click #go".to_string()));
    let record = &machine.context().action_history[1];
    assert!(record.success);
}

#[tokio::test]
async fn search_flow_reaches_milestones() {
    let driver = Arc::new(
        MemoryDriver::new()
            .with_route("https://crates.io/", "crates.io")
            .with_route("https://crates.io/search?q=tokio", "Search Results")
            .with("#search", ElementHandle::new("#search", "input", "")),
    );
    let model = Arc::new(ScriptedModel::new([
        r##"{"type":"input","element":"#search","value":"tokio"}"##,
        r#"{"type":"navigate","value":"https://crates.io/search?q=tokio"}"#,
    ]));
    let config = config("start_url: \"https://crates.io/\"\n");
    let mut machine = builder(&config, &driver, &model).build();

    let outcome = machine.run().await.unwrap();
    let calls = driver.calls();

    assert_eq!(calls[0], "goto https://crates.io/");
    assert!(calls.contains(&"remove_attribute #search readonly".to_string()));
    assert!(calls.contains(&"fill #search tokio".to_string()));
    assert!(calls.contains(&"press_key Enter".to_string()));
    assert!(calls.contains(&"goto https://crates.io/search?q=tokio".to_string()));
    assert_eq!(
        outcome.recognized_milestones,
        vec!["first_action", "search_entered", "results_shown"]
    );
    assert_eq!(outcome.milestones, outcome.recognized_milestones);

    let prompts = model.prompts();
    assert!(prompts[0].contains("CURRENT PAGE: https://crates.io/"));
    assert!(prompts[1].contains("Milestone reached: first_action, search_entered."));
    assert!(prompts[2].contains("URL is now https://crates.io/search?q=tokio"));
    assert_eq!(
        machine.context().visited_urls,
        vec!["https://crates.io/", "https://crates.io/search?q=tokio"]
    );
}

#[tokio::test]
async fn help_request_goes_to_human() {
    let driver = Arc::new(MemoryDriver::new().at("https://example.com/", "Example"));
    let model = Arc::new(ScriptedModel::new([
        "I'm not sure what to do here, need help",
    ]));
    let human = Arc::new(ScriptedHuman::new(["use the search box"]));
    let config = config("");
    let mut machine = builder(&config, &driver, &model)
        .human(human.clone())
        .build();

    let outcome = machine.run().await.unwrap();

    assert_eq!(human.asked(), vec!["I'm not sure what to do here, need help"]);
    assert!(outcome.history[0].starts_with("OK: asked human"));
    assert!(model.prompts()[1].contains("LAST RESULT: Human answered: use the search box"));
}

#[tokio::test]
async fn notes_round_trip_through_feedback() {
    let driver = Arc::new(MemoryDriver::new().at("https://example.com/", "Example"));
    let model = Arc::new(ScriptedModel::new([
        r#"{"type":"notes","operation":"add","note":"price is $10"}"#,
        r#"{"type":"notes","operation":"read"}"#,
    ]));
    let config = config("");
    let mut machine = builder(&config, &driver, &model).build();

    machine.run().await.unwrap();

    let prompts = model.prompts();
    assert!(prompts[1].contains("LAST RESULT: Note saved."));
    assert!(prompts[2].contains("Notes:\nprice is $10"));
    assert_eq!(machine.context().action_history[1].result, "notes read");
}

#[tokio::test]
async fn unreadable_output_is_a_failure() {
    let driver = Arc::new(MemoryDriver::new().at("https://example.com/", "Example"));
    let model = Arc::new(ScriptedModel::new(["blah blah"]));
    let config = config("agent: { max_retries: 1 }\n");
    let mut machine = builder(&config, &driver, &model).build();

    let outcome = machine.run().await.unwrap();

    assert!(outcome.history[0].starts_with("FAILED: could not read an action"));
    assert!(outcome.history[1].starts_with("FAILED: model request failed"));
    assert_eq!(outcome.retries, 2);
    assert!(machine.context().action.is_none());
}

#[tokio::test]
async fn scroll_refreshes_page_state() {
    let driver = Arc::new(MemoryDriver::new().at("https://example.com/", "Example"));
    let model = Arc::new(ScriptedModel::new([r#"{"type":"scroll","direction":"up"}"#]));
    let config = config("agent: { max_retries: 1 }\n");
    let mut machine = builder(&config, &driver, &model).build();

    let outcome = machine.run().await.unwrap();

    assert!(driver.calls().contains(&"scroll_by 0 -600".to_string()));
    assert_eq!(outcome.history[0], "OK: scroll up");
    assert!(model.prompts()[1].contains("LAST RESULT: Scrolled up. No visible page change."));
}

#[tokio::test]
async fn cancellation_stops_at_boundary() {
    let driver = Arc::new(MemoryDriver::new().at("https://example.com/", "Example"));
    let model = Arc::new(ScriptedModel::new([r#"{"type":"wait"}"#]));
    let config = config("");
    let mut machine = builder(&config, &driver, &model).build();
    machine.cancellation_token().cancel();

    let outcome = machine.run().await.unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    assert!(!outcome.budget_exceeded());
    assert_eq!(outcome.steps, 1);
    assert_eq!(model.remaining(), 1);
    assert!(driver.page().closed);
}

#[tokio::test(start_paused = true)]
async fn step_limit_terminates() {
    let driver = Arc::new(MemoryDriver::new().at("https://example.com/", "Example"));
    let model = Arc::new(ScriptedModel::new(vec![r#"{"type":"wait","value":"10"}"#; 50]));
    let config = config("agent: { max_steps: 6 }\n");
    let mut machine = builder(&config, &driver, &model).build();

    let outcome = machine.run().await.unwrap();

    assert_eq!(outcome.stop_reason, StopReason::StepLimit);
    assert_eq!(outcome.steps, 7);
    assert_eq!(outcome.retries, 0);
}

#[tokio::test(start_paused = true)]
async fn loading_page_defers_evaluation() {
    let driver = Arc::new(MemoryDriver::new().at("https://example.com/", "Example"));
    driver.update(|p| p.loading = true);
    let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
    let config = config("");
    let mut machine = builder(&config, &driver, &model).build();

    assert_eq!(machine.step(State::GetPageState).await, State::ChooseAction);
    assert!(machine.context().previous_page_state.is_none());
    assert!(machine.context().current_page.as_ref().unwrap().loading);

    driver.update(|p| p.loading = false);
    assert_eq!(machine.step(State::GetPageState).await, State::ChooseAction);
    let baseline = machine.context().previous_page_state.as_ref().unwrap();
    assert_eq!(baseline.url, "https://example.com/");
}

#[tokio::test]
async fn session_is_restored_for_the_same_goal() {
    let path = std::env::temp_dir().join(format!("eoka-pilot-session-{}.json", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let extra = format!("state_file: {:?}\nagent: {{ max_steps: 4 }}\n", path.display().to_string());

    let driver = Arc::new(MemoryDriver::new().at("https://example.com/", "Example"));
    let model = Arc::new(ScriptedModel::new([
        r#"{"type":"notes","operation":"add","note":"x"}"#,
    ]));
    let config = config(&extra);
    let mut first = builder(&config, &driver, &model).build();
    let outcome = first.run().await.unwrap();
    assert_eq!(outcome.history.len(), 2);
    assert!(path.exists());

    let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
    let mut second = builder(&config, &driver, &model).build();
    second.cancellation_token().cancel();
    second.run().await.unwrap();
    assert_eq!(second.context().history, outcome.history);
    assert_eq!(second.context().retries, 0);

    let other = Config::parse(&format!("name: test\ngoal: something else\n{}", extra)).unwrap();
    let mut third = builder(&other, &driver, &model).build();
    third.cancellation_token().cancel();
    third.run().await.unwrap();
    assert!(third.context().history.is_empty());

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn corrupt_session_file_starts_fresh() {
    let path = std::env::temp_dir().join(format!("eoka-pilot-corrupt-{}.json", std::process::id()));
    std::fs::write(&path, "{ not json").unwrap();
    let extra = format!("state_file: {:?}\n", path.display().to_string());

    let driver = Arc::new(MemoryDriver::new().at("https://example.com/", "Example"));
    let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
    let config = config(&extra);
    let mut machine = builder(&config, &driver, &model).build();
    machine.cancellation_token().cancel();

    let outcome = machine.run().await.unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    assert!(machine.context().history.is_empty());
    assert!(driver.page().closed);
    let rewritten = std::fs::read_to_string(&path).unwrap();
    assert!(rewritten.contains("search for tokio"));

    let _ = std::fs::remove_file(&path);
}
