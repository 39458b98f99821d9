//! Badger - sync agent between the Badger CRM API and a local SQL database.

use badger_engine::RunRequest;
use badger_server::progress::ConsoleProgress;
use badger_server::{app, Agent, AppState, Config};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "badger", version, about = "Sync the Badger CRM with a local database")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Pull accounts, check-ins, routes and the user profile
    Pull {
        /// Only pull the first N accounts (0 = all)
        #[arg(long, default_value_t = 0)]
        top: usize,
    },
    /// Replay pending local changes to the remote API
    Push,
    /// Show recent sync runs
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Run the HTTP and WebSocket server
    Serve,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "badger_server=info,badger_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let agent = Agent::start(config).await?;

    let outcome = run(cli.command, &agent).await;
    agent.shutdown().await;
    outcome
}

async fn run(command: Command, agent: &Agent) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Pull { top } => {
            let request = RunRequest::new("cli");
            let entry = agent
                .coordinator
                .run_pull_all(&request, top, &ConsoleProgress)
                .await?;
            println!(
                "{} ({} items, {} errors, {}s)",
                entry.summary, entry.items_processed, entry.error_count, entry.duration_seconds
            );
        }
        Command::Push => {
            let request = RunRequest::new("cli");
            let entry = agent
                .coordinator
                .run_push_all(&request, &ConsoleProgress)
                .await?;
            println!(
                "{} ({} items, {} errors)",
                entry.summary, entry.items_processed, entry.error_count
            );
        }
        Command::History { limit } => {
            for entry in agent.coordinator.history(limit).await? {
                println!(
                    "{}  {:<4}  {:<9}  items={:<5} errors={:<4} {}",
                    entry.started_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.direction,
                    entry.status,
                    entry.items_processed,
                    entry.error_count,
                    entry.summary
                );
            }
        }
        Command::Serve => serve(agent).await?,
    }
    Ok(())
}

async fn serve(agent: &Agent) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::new(agent);
    let addr = format!("{}:{}", agent.config.host, agent.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    Ok(())
}
