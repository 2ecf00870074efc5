use clap::Parser;
use eoka_pilot::{Config, EokaDriver, OpenAiClient, Params, StateMachine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "eoka-pilot")]
#[command(about = "LLM-driven browser agent")]
#[command(version)]
struct Cli {
    /// Task config file
    config: PathBuf,

    /// Run in headless mode (overrides config)
    #[arg(long)]
    headless: bool,

    /// Set a parameter (can be used multiple times)
    #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Replace the goal from the config
    #[arg(long)]
    goal: Option<String>,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Validate config without running
    #[arg(long)]
    check: bool,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(cli: &Cli) {
    if std::env::var_os("RUST_LOG").is_some() {
        FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .compact()
            .init();
        return;
    }

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn print_summary(config: &Config) {
    println!("Config valid: {}", config.name);
    println!("  Goal: {}", config.goal);
    if let Some(ref url) = config.start_url {
        println!("  Start URL: {}", url);
    }
    println!(
        "  Model: {} @ {}",
        config.llm.model, config.llm.base_url
    );
    println!(
        "  Limits: {} retries, {} steps, {}ms per action",
        config.agent.max_retries, config.agent.max_steps, config.agent.action_timeout_ms
    );
    if !config.params.is_empty() {
        println!("  Parameters: {}", config.params.len());
        for (name, def) in &config.params {
            let req = if def.required { " (required)" } else { "" };
            let desc = def.description.as_deref().unwrap_or("");
            println!("    - {}{}: {}", name, req, desc);
        }
    }
    if let Some(ref path) = config.state_file {
        println!("  State file: {}", path.display());
    }
}

#[tokio::main]
async fn main() -> eoka_pilot::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let params = Params::from_args(&cli.params)?;
    let mut config = Config::load_with_params(&cli.config, &params)?;

    if let Some(ref goal) = cli.goal {
        config.goal = goal.clone();
        config.validate()?;
    }

    if cli.check {
        print_summary(&config);
        return Ok(());
    }

    if cli.headless {
        config.browser.headless = true;
    }

    println!("Running: {}", config.name);

    let driver = Arc::new(EokaDriver::launch(&config.browser).await?);
    let llm = Arc::new(OpenAiClient::from_config(&config.llm)?);
    let mut machine = StateMachine::builder(&config, driver, llm).build();

    let token = machine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            token.cancel();
        }
    });

    let outcome = machine.run().await?;

    println!();
    if outcome.budget_exceeded() {
        println!("✗ {} ({})", outcome.exit_reason, outcome.stop_reason);
    } else {
        println!("✓ {} ({})", outcome.exit_reason, outcome.stop_reason);
    }
    println!("  Steps: {}", outcome.steps);
    println!("  Successful actions in a row: {}", outcome.success_count);
    if outcome.retries > 0 {
        println!("  Retries: {}", outcome.retries);
    }
    println!(
        "  Milestones: {}/{}",
        outcome.recognized_milestones.len(),
        outcome.milestones.len()
    );
    for m in &outcome.recognized_milestones {
        println!("    - {}", m);
    }

    if outcome.budget_exceeded() {
        std::process::exit(1);
    }

    Ok(())
}
