//! Integration tests for the opal-events crate.
//!
//! These tests exercise listener fan-out ordering, panic isolation,
//! deduplication, subscriber back-pressure, and subagent derivation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Map;

use opal_events::{
    AgentEvent, AgentLevel, EventBus, EventKind, EventListener, StopReason, SubagentTracker,
};

// ═══════════════════════════════════════════════════════════════════════
//  Helpers
// ═══════════════════════════════════════════════════════════════════════

/// Records every observed event, optionally tagging a shared order log.
struct Recorder {
    name: String,
    events: Arc<Mutex<Vec<AgentEvent>>>,
    order_log: Option<Arc<Mutex<Vec<String>>>>,
}

impl Recorder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            events: Arc::new(Mutex::new(Vec::new())),
            order_log: None,
        }
    }

    fn with_order_log(name: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_owned(),
            events: Arc::new(Mutex::new(Vec::new())),
            order_log: Some(log),
        }
    }
}

#[async_trait::async_trait]
impl EventListener for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: &AgentEvent) {
        self.events.lock().unwrap().push(event.clone());
        if let Some(log) = &self.order_log {
            log.lock().unwrap().push(self.name.clone());
        }
    }
}

/// Panics on every event.
struct Panicker;

#[async_trait::async_trait]
impl EventListener for Panicker {
    fn name(&self) -> &str {
        "panicker"
    }

    async fn on_event(&self, _event: &AgentEvent) {
        panic!("listener exploded");
    }
}

fn thinking(session: &str, run: &str, iter: u32) -> AgentEvent {
    AgentEvent::new(session, run, EventKind::Thinking { iter })
}

/// A subtask run's terminal event, as the engine emits it: subagent level,
/// child session, `parent_run_id` pointing at the delegating run.
fn subtask_complete(
    child_session: &str,
    child_run: &str,
    parent_run: &str,
    tokens: u32,
    stop_reason: StopReason,
) -> AgentEvent {
    AgentEvent::new(
        child_session,
        child_run,
        EventKind::TaskComplete {
            final_answer: "sub answer".into(),
            total_iterations: 1,
            total_tokens: tokens,
            stop_reason,
            duration_ms: 5,
            attachment_names: Vec::new(),
            stream_finished: false,
        },
    )
    .from_subagent(parent_run)
}

/// A tool completion inside a subtask run.
fn subtask_tool_complete(
    child_session: &str,
    child_run: &str,
    parent_run: &str,
    call_id: &str,
) -> AgentEvent {
    AgentEvent::new(
        child_session,
        child_run,
        EventKind::ToolCallComplete {
            call_id: call_id.into(),
            tool_name: "probe".into(),
            result: Some("ok".into()),
            error: None,
            duration_ms: 5,
            attachment_names: Vec::new(),
            metadata: Map::new(),
        },
    )
    .from_subagent(parent_run)
}

// ═══════════════════════════════════════════════════════════════════════
//  Listener fan-out
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn listeners_run_in_registration_order() {
    let bus = EventBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    bus.register(Arc::new(Recorder::with_order_log("first", Arc::clone(&log))));
    bus.register(Arc::new(Recorder::with_order_log("second", Arc::clone(&log))));
    bus.register(Arc::new(Recorder::with_order_log("third", Arc::clone(&log))));

    bus.publish(thinking("s1", "r1", 1)).await;
    bus.publish(thinking("s1", "r1", 2)).await;

    let observed = log.lock().unwrap().clone();
    assert_eq!(
        observed,
        vec!["first", "second", "third", "first", "second", "third"]
    );
}

#[tokio::test]
async fn panicking_listener_does_not_block_others() {
    let bus = EventBus::new();
    let recorder = Arc::new(Recorder::new("survivor"));

    bus.register(Arc::new(Panicker));
    bus.register(Arc::clone(&recorder) as Arc<dyn EventListener>);

    let delivered = bus.publish(thinking("s1", "r1", 1)).await;

    // The panicker does not count as a delivery; the survivor does.
    assert_eq!(delivered, 1);
    assert_eq!(recorder.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unregistered_listener_stops_receiving() {
    let bus = EventBus::new();
    let recorder = Arc::new(Recorder::new("detachable"));
    let id = bus.register(Arc::clone(&recorder) as Arc<dyn EventListener>);

    bus.publish(thinking("s1", "r1", 1)).await;
    bus.unregister(id);
    bus.publish(thinking("s1", "r1", 2)).await;

    assert_eq!(recorder.events.lock().unwrap().len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════
//  Deduplication
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn duplicate_events_are_dropped_before_fanout() {
    let bus = EventBus::new();
    let recorder = Arc::new(Recorder::new("recorder"));
    bus.register(Arc::clone(&recorder) as Arc<dyn EventListener>);

    assert_eq!(bus.publish(thinking("s1", "r1", 1)).await, 1);
    assert_eq!(bus.publish(thinking("s1", "r1", 1)).await, 0);

    assert_eq!(recorder.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn second_terminal_with_stream_finished_is_delivered() {
    let bus = EventBus::new();
    let recorder = Arc::new(Recorder::new("recorder"));
    bus.register(Arc::clone(&recorder) as Arc<dyn EventListener>);

    let complete = |stream_finished| {
        AgentEvent::new(
            "s1",
            "r1",
            EventKind::TaskComplete {
                final_answer: "42".into(),
                total_iterations: 1,
                total_tokens: 10,
                stop_reason: StopReason::FinalAnswer,
                duration_ms: 3,
                attachment_names: Vec::new(),
                stream_finished,
            },
        )
    };

    assert_eq!(bus.publish(complete(false)).await, 1);
    assert_eq!(bus.publish(complete(false)).await, 0);
    assert_eq!(bus.publish(complete(true)).await, 1);
}

// ═══════════════════════════════════════════════════════════════════════
//  Subscriber queues
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn subscriber_receives_only_its_session() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe("s1", 16);

    bus.publish(thinking("s1", "r1", 1)).await;
    bus.publish(thinking("s2", "r9", 1)).await;
    bus.publish(thinking("s1", "r1", 2)).await;

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.session_id, "s1");
    assert!(matches!(first.kind, EventKind::Thinking { iter: 1 }));
    assert!(matches!(second.kind, EventKind::Thinking { iter: 2 }));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn slow_subscriber_is_dropped_on_overflow() {
    let bus = EventBus::new();
    // Capacity 1 and nobody draining: the second publish overflows.
    let mut rx = bus.subscribe("s1", 1);

    bus.publish(thinking("s1", "r1", 1)).await;
    bus.publish(thinking("s1", "r1", 2)).await;

    // The queued event is still readable, after which the channel is closed
    // because the bus dropped its sender.
    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_none());

    // Later events no longer reach any subscriber.
    assert_eq!(bus.publish(thinking("s1", "r1", 3)).await, 0);
}

// ═══════════════════════════════════════════════════════════════════════
//  Subagent derivation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn subagent_completions_derive_progress_and_complete() {
    let bus = EventBus::new();
    let recorder = Arc::new(Recorder::new("recorder"));
    bus.register(Arc::clone(&recorder) as Arc<dyn EventListener>);
    let tracker = Arc::new(SubagentTracker::new(bus.clone()));
    bus.register(Arc::clone(&tracker) as Arc<dyn EventListener>);

    // The subagent tool declares the fan-out before dispatching; each
    // subtask then runs in its own child session.
    tracker.declare_total("r1", "s1", 3);
    bus.publish(subtask_complete("child-a", "sub-a", "r1", 100, StopReason::FinalAnswer))
        .await;
    bus.publish(subtask_complete("child-b", "sub-b", "r1", 100, StopReason::ToolFailures))
        .await;
    bus.publish(subtask_complete("child-c", "sub-c", "r1", 100, StopReason::FinalAnswer))
        .await;

    // Derived events republish from a background task.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = recorder.events.lock().unwrap().clone();
    let progress: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::SubagentProgress {
                completed, total, ..
            } => Some((e.session_id.clone(), *completed, *total)),
            _ => None,
        })
        .collect();
    // Counters are monotone and pinned to the parent's session.
    assert_eq!(
        progress,
        vec![
            ("s1".to_string(), 1, 3),
            ("s1".to_string(), 2, 3),
            ("s1".to_string(), 3, 3),
        ]
    );

    let complete: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::SubagentComplete {
                total,
                success,
                failed,
                tokens,
                ..
            } => Some((*total, *success, *failed, *tokens)),
            _ => None,
        })
        .collect();
    assert_eq!(complete, vec![(3, 2, 1, 300)]);
}

#[tokio::test]
async fn subtask_tool_calls_tally_toward_parent() {
    let bus = EventBus::new();
    let recorder = Arc::new(Recorder::new("recorder"));
    bus.register(Arc::clone(&recorder) as Arc<dyn EventListener>);
    let tracker = Arc::new(SubagentTracker::new(bus.clone()));
    bus.register(Arc::clone(&tracker) as Arc<dyn EventListener>);

    tracker.declare_total("r1", "s1", 1);
    bus.publish(subtask_tool_complete("child-a", "sub-a", "r1", "c1"))
        .await;
    bus.publish(subtask_tool_complete("child-a", "sub-a", "r1", "c2"))
        .await;
    bus.publish(subtask_complete("child-a", "sub-a", "r1", 40, StopReason::FinalAnswer))
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = recorder.events.lock().unwrap().clone();
    let complete = events
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::SubagentComplete {
                total,
                success,
                tool_calls,
                ..
            } => Some((*total, *success, *tool_calls)),
            _ => None,
        })
        .expect("subagent_complete derived");
    assert_eq!(complete, (1, 1, 2));
}

#[tokio::test]
async fn subagent_task_completions_count_toward_parent() {
    let bus = EventBus::new();
    let recorder = Arc::new(Recorder::new("recorder"));
    bus.register(Arc::clone(&recorder) as Arc<dyn EventListener>);
    bus.register(Arc::new(SubagentTracker::new(bus.clone())));

    let ev = AgentEvent::new(
        "s1",
        "sub-run-1",
        EventKind::TaskComplete {
            final_answer: "sub answer".into(),
            total_iterations: 2,
            total_tokens: 55,
            stop_reason: StopReason::FinalAnswer,
            duration_ms: 9,
            attachment_names: Vec::new(),
            stream_finished: false,
        },
    )
    .from_subagent("r1");
    assert_eq!(ev.agent_level, AgentLevel::Subagent);
    bus.publish(ev).await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = recorder.events.lock().unwrap().clone();
    let progress = events
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::SubagentProgress {
                parent_run_id,
                completed,
                tokens,
                ..
            } => Some((parent_run_id.clone(), *completed, *tokens)),
            _ => None,
        })
        .expect("progress derived from subagent task completion");
    assert_eq!(progress, ("r1".to_string(), 1, 55));
}
