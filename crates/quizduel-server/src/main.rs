//! QuizDuel server process.
//!
//! ```text
//! quizduel-server run --bind 0.0.0.0:8080 --seed-users alice,bob
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use quizduel::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quizduel-server", version, about = "Real-time trivia duel server")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Accept connections until Ctrl-C
    Run {
        /// Address to listen on
        #[arg(long, env = "QUIZDUEL_BIND", default_value = "127.0.0.1:8080")]
        bind: String,

        /// Accounts to create in the in-memory store
        #[arg(long, value_delimiter = ',')]
        seed_users: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.cmd {
        Cmd::Run { bind, seed_users } => run(&bind, seed_users).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(bind: &str, seed_users: Vec<String>) -> Result<(), QuizDuelError> {
    let mut names = Vec::with_capacity(seed_users.len());
    for raw in &seed_users {
        let username = Username::parse(raw)?;
        names.push(username.as_str().to_string());
    }
    tracing::info!(users = names.len(), "seeding account store");
    let store = Arc::new(InMemoryAccountStore::with_users(names));

    let server = QuizDuelServerBuilder::new()
        .bind(bind)
        .build(store)
        .await?;
    server.run_until(shutdown_signal()).await
}

/// Resolves on Ctrl-C. If the handler can't be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
