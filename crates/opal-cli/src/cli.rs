//! CLI argument definitions for Opal.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use clap::{Parser, Subcommand};

/// Opal -- an AI coding agent for your terminal.
#[derive(Parser)]
#[command(
    name = "opal",
    version,
    about = "Opal -- AI coding agent",
    long_about = "An interactive AI agent that takes a task, reasons with an LLM, \
                  invokes tools, and streams progress to your terminal or browser."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single task to completion and exit.
    Run {
        /// The task to execute.
        task: String,
    },

    /// Start an interactive chat session.
    Chat {
        /// Resume an existing session by id.
        #[arg(long, short)]
        session: Option<String>,
    },

    /// Start the HTTP server (REST + SSE).
    Serve {
        /// Address to bind the HTTP server to.
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,

        /// Port to listen on.
        #[arg(long, short, default_value_t = 7717)]
        port: u16,
    },

    /// Manage conversation sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
pub enum SessionAction {
    /// List all sessions.
    List,
    /// Delete a session by id.
    Delete {
        /// The session id to delete.
        id: String,
    },
}
