//! # opal-web
//!
//! HTTP surface for the Opal agent core:
//!
//! - **REST** -- session CRUD, task submission, task cancellation.
//! - **SSE** -- per-session live event stream
//!   (`event: <type>\ndata: <json>\n\n` frames) with bounded per-subscriber
//!   queues; a subscriber that cannot keep up is disconnected rather than
//!   stalling the engine.

pub mod api;
pub mod error;
pub mod server;
pub mod sse;
pub mod state;

pub use error::{Result, WebError};
pub use server::{WebConfig, WebServer};
pub use state::AppState;
