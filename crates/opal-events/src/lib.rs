//! # opal-events
//!
//! Event fabric for the Opal agent core:
//!
//! - **[`event`]** -- the [`AgentEvent`] envelope and tagged [`EventKind`]
//!   union covering every task lifecycle point, plus the [`EventListener`]
//!   contract.
//! - **[`bus`]** -- registration-order listener fan-out with panic recovery,
//!   and bounded per-subscriber queues for streaming sinks.
//! - **[`dedup`]** -- drops duplicate events keyed by
//!   `(event_type, session, run, call, content-hash)`.
//! - **[`subagent`]** -- derives `subagent_progress` / `subagent_complete`
//!   from per-subtask completions.
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod bus;
pub mod dedup;
pub mod error;
pub mod event;
pub mod subagent;

// Re-export the most commonly used types at the crate root for convenience.
pub use bus::{EventBus, ListenerId};
pub use dedup::DedupPipeline;
pub use error::{EventError, Result};
pub use event::{AgentEvent, AgentLevel, ErrorPhase, EventKind, EventListener, StopReason};
pub use subagent::SubagentTracker;
