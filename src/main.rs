use clap::Parser;
use fatal_guard::config::Config;
use fatal_guard::hooks::CommandHook;
use fatal_guard::{FatalErrorGuard, ProcessHub};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Run an idle long-lived process under the fatal error guard: on SIGHUP,
/// SIGINT, SIGTERM or a panic, run the configured shutdown commands (bounded
/// by the timeout) and then let the process terminate.
#[derive(Parser, Debug)]
#[command(name = "fatal-guard", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "fatal-guard.toml")]
    config: PathBuf,

    /// Shutdown hook timeout in milliseconds (overrides config)
    #[arg(long)]
    timeout: Option<u64>,

    /// Do not print an alert line for fatal events
    #[arg(long)]
    no_alert: bool,

    /// Shutdown command to run (repeatable, appended to the config's commands)
    #[arg(long = "on-shutdown", value_name = "COMMAND")]
    on_shutdown: Vec<String>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (listener registration, stale completions)
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "fatal-guard failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(&cli.config)?;
    if let Some(timeout) = cli.timeout {
        config.guard.timeout_ms = timeout;
    }
    if cli.no_alert {
        config.guard.alert = false;
    }
    config.hooks.on_shutdown.extend(cli.on_shutdown);

    let hub = ProcessHub::start()?;
    let guard = FatalErrorGuard::new(hub)?;
    guard.apply_config(&config.guard);

    let hook = CommandHook::from_config(&config.hooks);
    if !hook.is_empty() {
        guard.set_shutdown_hook(move |error| {
            let hook = hook.clone();
            async move {
                hook.run(&error).await;
            }
        });
    }

    if cli.dry_run {
        println!("{}", serde_json::to_string_pretty(&guard.status())?);
        println!("shutdown commands: {:?}", config.hooks.on_shutdown);
        return Ok(());
    }

    guard.install();
    tracing::info!(
        pid = std::process::id(),
        timeout_ms = config.guard.timeout_ms,
        commands = config.hooks.on_shutdown.len(),
        "fatal-guard running, waiting for a termination signal"
    );

    // Exit happens through the re-raised signal's default disposition.
    std::future::pending::<()>().await;
    Ok(())
}
