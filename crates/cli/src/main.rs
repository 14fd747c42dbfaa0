use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use viitjee_api::HttpActorResolver;
use viitjee_engine::{ConnectionProvider, DEFAULT_GREETING_NAME, GreetingQuery, QueryClient};
use viitjee_types::{ConnectionPresence, QueryStatus};
use viitjee_util::{
    config::{AppConfig, read_config, read_config_from_path, validate_config},
    expand_tilde,
};

const GC_INTERVAL: Duration = Duration::from_secs(30);

/// Check connectivity with the viitjee backend.
#[derive(Parser, Debug)]
#[command(name = "viitjee", version, about)]
struct Cli {
    /// Backend base URL; overrides the config file and VIITJEE_API_BASE
    #[arg(long, global = true, value_name = "URL")]
    api_base: Option<String>,

    /// Request and overall deadline in seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Path to the configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the backend to greet someone
    Greet {
        #[arg(long, default_value = DEFAULT_GREETING_NAME)]
        name: String,

        /// Print the full query result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve the backend connection and report its presence
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_settings(&cli)?;
    debug!(base_url = %config.api.base_url, "configuration loaded");

    let client = QueryClient::new((&config.query).into());
    let connection = ConnectionProvider::new(Arc::new(HttpActorResolver::new(config.api.actor_config())));
    let gc = client.spawn_gc(GC_INTERVAL);
    let deadline = Duration::from_secs(config.api.timeout_secs);

    let outcome = match cli.command {
        Command::Greet { name, json } => run_greet(&client, &connection, name, json, deadline).await,
        Command::Status { json } => run_status(&connection, json, deadline).await,
    };

    gc.abort();
    client.clear();
    outcome
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// `RUST_LOG` directives, `info` when unset or unparsable.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Config file, then environment, then command line flags. Validation runs
/// once all three are merged.
fn load_settings(cli: &Cli) -> Result<AppConfig> {
    let mut config = match cli.config.as_deref() {
        Some(path) => {
            let path: PathBuf = expand_tilde(path);
            read_config_from_path(&path).with_context(|| format!("failed to load config from {}", path.display()))?
        }
        None => read_config().context("failed to load config")?,
    };
    apply_flag_overrides(&mut config, cli);
    validate_config(&config)?;
    Ok(config)
}

fn apply_flag_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(base_url) = cli.api_base.as_deref() {
        config.api.base_url = base_url.trim().to_string();
    }
    if let Some(timeout_secs) = cli.timeout_secs {
        config.api.timeout_secs = timeout_secs;
    }
}

async fn run_greet(
    client: &QueryClient,
    connection: &ConnectionProvider,
    name: String,
    json: bool,
    deadline: Duration,
) -> Result<()> {
    connection.start();
    let mut greeting = GreetingQuery::new(client, connection, name);
    let result = tokio::time::timeout(deadline, greeting.settled())
        .await
        .context("timed out waiting for the greeting")??;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    match result.status {
        QueryStatus::Success => {
            let text = greeting.data().unwrap_or_default();
            info!(name = %greeting.name(), "greeting received");
            if !json {
                println!("{}", text);
            }
            Ok(())
        }
        QueryStatus::Error => bail!("greeting failed: {}", result.error.unwrap_or_default()),
        status => bail!("greeting did not run (status: {})", status),
    }
}

async fn run_status(connection: &ConnectionProvider, json: bool, deadline: Duration) -> Result<()> {
    connection.start();
    let state = tokio::time::timeout(deadline, connection.wait_settled())
        .await
        .context("timed out resolving the backend connection")?;
    let presence = state.presence();

    if json {
        let out = json!({
            "presence": presence,
            "error": state.last_error,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", presence);
    }

    if presence != ConnectionPresence::Resolved {
        bail!("backend unreachable: {}", state.last_error.unwrap_or_else(|| presence.to_string()));
    }
    Ok(())
}
