//! Append-only event log and the listener contract.
//!
//! Listeners are notified by the orchestrator between stages only, after the
//! stage's output has been aggregated into the context.

use chrono::{DateTime, Utc};
use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::context::PipelineContext;
use crate::models::StageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    RunStarted,
    VariantsAnnotated,
    CandidatesGenerated,
    ValidationComplete,
    ValidationSuperseded,
    /// Advisory: the Engineer produced nothing, the Regulator was skipped.
    NoCandidates,
    StageFailed,
    RunCancelled,
    RunCompleted,
}

impl EventKind {
    /// Whether this event closes a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::NoCandidates | Self::StageFailed | Self::RunCancelled | Self::RunCompleted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the log, starting at 0.
    pub sequence: u64,
    pub kind: EventKind,
    pub stage: Option<StageKind>,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return a reference to it.
    pub fn append(&mut self, kind: EventKind, stage: Option<StageKind>, payload: Value) -> &Event {
        let event = Event {
            sequence: self.events.len() as u64,
            kind,
            stage,
            payload,
            timestamp: Utc::now(),
        };
        self.events.push(event);
        &self.events[self.events.len() - 1]
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    /// The latest terminal event, if the run has closed.
    pub fn terminal(&self) -> Option<&Event> {
        self.events.iter().rev().find(|e| e.kind.is_terminal())
    }

    pub fn of_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |e| e.kind == kind)
    }
}

/// Read-only observer of pipeline progress.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event, context: &PipelineContext);
}

/// Mirrors events into the `tracing` log.
#[derive(Debug, Default)]
pub struct TracingListener;

impl EventListener for TracingListener {
    fn on_event(&self, event: &Event, _context: &PipelineContext) {
        let stage = event.stage.map(|s| s.to_string()).unwrap_or_else(|| "orchestrator".to_string());
        match event.kind {
            EventKind::StageFailed => error!("[{}] {:?} {}", stage, event.kind, event.payload),
            EventKind::NoCandidates | EventKind::RunCancelled => {
                warn!("[{}] {:?} {}", stage, event.kind, event.payload)
            }
            _ => info!("[{}] {:?} {}", stage, event.kind, event.payload),
        }
    }
}

/// Forwards a copy of every event over a channel, e.g. to a UI thread.
#[derive(Debug)]
pub struct ChannelListener {
    sender: Sender<Event>,
}

impl ChannelListener {
    pub fn new(sender: Sender<Event>) -> Self {
        Self { sender }
    }
}

impl EventListener for ChannelListener {
    fn on_event(&self, event: &Event, _context: &PipelineContext) {
        if self.sender.send(event.clone()).is_err() {
            warn!("Event receiver dropped, event {} not forwarded", event.sequence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_numbers_events_in_order() {
        let mut log = EventLog::new();
        log.append(EventKind::RunStarted, None, json!({}));
        log.append(EventKind::VariantsAnnotated, Some(StageKind::Diagnostician), json!({"pathogenic": 1}));
        let seqs: Vec<u64> = log.events().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![0, 1]);
        assert!(log.terminal().is_none());

        log.append(EventKind::RunCompleted, None, json!({}));
        assert_eq!(log.terminal().map(|e| e.kind), Some(EventKind::RunCompleted));
        assert_eq!(log.of_kind(EventKind::VariantsAnnotated).count(), 1);
    }

    #[test]
    fn timestamps_do_not_go_backwards() {
        let mut log = EventLog::new();
        for _ in 0..5 {
            log.append(EventKind::RunStarted, None, Value::Null);
        }
        assert!(log.events().windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
