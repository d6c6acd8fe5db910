//! Opal CLI entry point.

mod cli;
mod helpers;
mod oneshot;
mod renderer;
mod repl;

use anyhow::Result;
use clap::Parser;

use opal_web::{WebConfig, WebServer};

use crate::cli::{Cli, Commands, SessionAction};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { task } => {
            helpers::init_tracing("warn");
            let code = oneshot::cmd_run(task).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }

        Commands::Chat { session } => {
            helpers::init_tracing("warn");
            repl::cmd_chat(session).await?;
        }

        Commands::Serve { bind, port } => {
            helpers::init_tracing("info");
            let runtime = helpers::build_runtime().await?;
            let server = WebServer::new(
                WebConfig {
                    bind_addr: bind,
                    port,
                },
                runtime.coordinator,
            );
            println!("listening on http://{}", server.addr());
            server.start().await?;
        }

        Commands::Sessions { action } => {
            helpers::init_tracing("warn");
            let runtime = helpers::build_runtime().await?;
            match action {
                SessionAction::List => {
                    let sessions = runtime.coordinator.store().list().await?;
                    if sessions.is_empty() {
                        println!("no sessions");
                    }
                    for s in sessions {
                        let updated = chrono::DateTime::from_timestamp(s.updated_at, 0)
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_default();
                        println!("{}  {}  (updated {})", s.id, s.working_dir, updated);
                    }
                }
                SessionAction::Delete { id } => {
                    runtime.coordinator.delete_session(&id).await?;
                    println!("deleted {id}");
                }
            }
        }
    }

    Ok(())
}
