//! Per-execution event queues with bounded telemetry.
//!
//! Each execution owns an [`ExecutionStream`]. Telemetry and heartbeats are
//! bounded per execution and per attempt and drop oldest-first; every other
//! event is always queued. Sequence numbers are assigned on delivery, so the
//! delivered stream is `1..=N` without gaps and `drops` explains what was
//! lost between two consecutive numbers.

use crate::events::envelope::{Drops, EventEnvelope, EventKind, EventPayload};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

pub const DEFAULT_PER_EXECUTION: usize = 200;
pub const DEFAULT_PER_ATTEMPT: usize = 50;

fn default_per_execution() -> usize {
    DEFAULT_PER_EXECUTION
}

fn default_per_attempt() -> usize {
    DEFAULT_PER_ATTEMPT
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventBufferLimits {
    #[serde(default = "default_per_execution")]
    pub per_execution: usize,
    #[serde(default = "default_per_attempt")]
    pub per_attempt: usize,
}

impl Default for EventBufferLimits {
    fn default() -> Self {
        Self {
            per_execution: DEFAULT_PER_EXECUTION,
            per_attempt: DEFAULT_PER_ATTEMPT,
        }
    }
}

#[derive(Debug, Default)]
struct StreamState {
    queue: VecDeque<EventEnvelope>,
    next_sequence: u64,
    admitted: u64,
    dropped_total: u64,
    pending: Option<Drops>,
    closed: bool,
}

impl StreamState {
    fn record_drop(&mut self, lost: &EventEnvelope) {
        self.dropped_total += 1;
        self.pending = Some(match self.pending.take() {
            Some(drops) => Drops {
                dropped: drops.dropped + 1,
                oldest_dropped_at: drops.oldest_dropped_at.min(lost.timestamp),
            },
            None => Drops {
                dropped: 1,
                oldest_dropped_at: lost.timestamp,
            },
        });
    }

    /// Evict the oldest droppable envelope matching `filter`. Returns false
    /// when there is none.
    fn evict_oldest<F>(&mut self, filter: F) -> bool
    where
        F: Fn(&EventEnvelope) -> bool,
    {
        let position = self
            .queue
            .iter()
            .position(|e| e.kind.is_droppable() && filter(e));
        match position.and_then(|pos| self.queue.remove(pos)) {
            Some(evicted) => {
                self.admitted -= 1;
                self.record_drop(&evicted);
                true
            }
            None => false,
        }
    }

    fn deliver(&mut self) -> Option<EventEnvelope> {
        let mut envelope = self.queue.pop_front()?;
        self.next_sequence += 1;
        envelope.sequence = self.next_sequence;
        envelope.drops = self.pending.take();
        Some(envelope)
    }
}

pub struct ExecutionStream {
    execution_id: Uuid,
    workflow_id: Uuid,
    limits: EventBufferLimits,
    state: Mutex<StreamState>,
    notify: Notify,
}

impl ExecutionStream {
    pub fn new(execution_id: Uuid, workflow_id: Uuid, limits: EventBufferLimits) -> Self {
        Self {
            execution_id,
            workflow_id,
            limits,
            state: Mutex::new(StreamState::default()),
            notify: Notify::new(),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    /// Queue an event. Returns false when a droppable event was discarded
    /// instead of queued.
    pub fn emit(&self, kind: EventKind, step: Option<(usize, u32)>, payload: EventPayload) -> bool {
        let envelope = EventEnvelope::new(kind, self.execution_id, self.workflow_id, step, payload);
        let admitted = {
            let mut state = self.state.lock();
            if state.closed {
                tracing::warn!(execution_id = %self.execution_id, kind = %kind, "event emitted after stream closed");
                return false;
            }
            let admitted = self.admit(&mut state, &envelope);
            if admitted {
                state.admitted += 1;
                state.queue.push_back(envelope);
            } else {
                state.record_drop(&envelope);
            }
            admitted
        };
        if admitted {
            self.notify.notify_one();
        } else {
            tracing::debug!(execution_id = %self.execution_id, kind = %kind, "telemetry dropped under backpressure");
        }
        admitted
    }

    fn admit(&self, state: &mut StreamState, envelope: &EventEnvelope) -> bool {
        if !envelope.kind.is_droppable() {
            return true;
        }
        let key = (envelope.step_index, envelope.attempt);
        let same_attempt = |e: &EventEnvelope| (e.step_index, e.attempt) == key;
        let attempt_len = state
            .queue
            .iter()
            .filter(|e| e.kind.is_droppable() && same_attempt(e))
            .count();
        if attempt_len >= self.limits.per_attempt && !state.evict_oldest(same_attempt) {
            return false;
        }
        if state.queue.len() >= self.limits.per_execution && !state.evict_oldest(|_| true) {
            return false;
        }
        true
    }

    pub fn try_recv(&self) -> Option<EventEnvelope> {
        self.state.lock().deliver()
    }

    /// Next envelope in order. `None` once the stream is closed and drained.
    pub async fn recv(&self) -> Option<EventEnvelope> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(envelope) = state.deliver() {
                    return Some(envelope);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Deliver everything queued right now.
    pub fn drain(&self) -> Vec<EventEnvelope> {
        let mut state = self.state.lock();
        std::iter::from_fn(|| state.deliver()).collect()
    }

    /// Stop accepting events. Queued envelopes remain receivable.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Sequence the last admitted envelope will carry once delivered.
    pub fn final_sequence(&self) -> u64 {
        self.state.lock().admitted
    }

    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped_total
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }
}

/// Registry of live execution streams shared by all executions.
pub struct EventBus {
    limits: EventBufferLimits,
    streams: RwLock<HashMap<Uuid, Arc<ExecutionStream>>>,
}

impl EventBus {
    pub fn new(limits: EventBufferLimits) -> Self {
        Self {
            limits,
            streams: RwLock::new(HashMap::new()),
        }
    }

    pub fn open(&self, execution_id: Uuid, workflow_id: Uuid) -> Arc<ExecutionStream> {
        let stream = Arc::new(ExecutionStream::new(execution_id, workflow_id, self.limits));
        self.streams.write().insert(execution_id, Arc::clone(&stream));
        stream
    }

    pub fn get(&self, execution_id: &Uuid) -> Option<Arc<ExecutionStream>> {
        self.streams.read().get(execution_id).cloned()
    }

    pub fn remove(&self, execution_id: &Uuid) -> Option<Arc<ExecutionStream>> {
        self.streams.write().remove(execution_id)
    }

    pub fn active_count(&self) -> usize {
        self.streams.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBufferLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::envelope::{ExecutionEvent, ExecutionStatus, StepStartedEvent};
    use crate::events::telemetry::AttemptTelemetry;

    fn stream(per_execution: usize, per_attempt: usize) -> ExecutionStream {
        ExecutionStream::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            EventBufferLimits {
                per_execution,
                per_attempt,
            },
        )
    }

    fn execution(status: ExecutionStatus) -> EventPayload {
        EventPayload::Execution(ExecutionEvent {
            status,
            failure: None,
            steps_run: 0,
        })
    }

    fn heartbeat(s: &ExecutionStream, telemetry: &mut AttemptTelemetry, step: usize) -> bool {
        s.emit(
            EventKind::StepHeartbeat,
            Some((step, 1)),
            EventPayload::Telemetry(telemetry.heartbeat()),
        )
    }

    #[test]
    fn test_sequences_are_gap_free_in_delivery_order() {
        let s = stream(200, 50);
        s.emit(EventKind::ExecutionStarted, None, execution(ExecutionStatus::Running));
        s.emit(
            EventKind::StepStarted,
            Some((0, 1)),
            EventPayload::StepStarted(StepStartedEvent {
                node_id: "n0".into(),
                step_type: "click".into(),
            }),
        );
        s.emit(EventKind::ExecutionCompleted, None, execution(ExecutionStatus::Completed));
        let delivered = s.drain();
        let sequences: Vec<u64> = delivered.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(s.final_sequence(), 3);
        assert!(delivered.last().unwrap().kind.is_terminal());
    }

    #[test]
    fn test_per_attempt_limit_drops_oldest_telemetry() {
        let s = stream(200, 3);
        let mut telemetry = AttemptTelemetry::new(s.execution_id(), 0, 1);
        for _ in 0..5 {
            assert!(heartbeat(&s, &mut telemetry, 0));
        }
        assert_eq!(s.queued(), 3);
        assert_eq!(s.dropped(), 2);

        let delivered = s.drain();
        let beats: Vec<u64> = delivered
            .iter()
            .map(|e| e.telemetry().unwrap().sequence)
            .collect();
        assert_eq!(beats, vec![3, 4, 5]);
        assert_eq!(delivered[0].drops.map(|d| d.dropped), Some(2));
        assert!(delivered[1].drops.is_none());
        assert_eq!(
            delivered.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_per_attempt_limit_counts_only_telemetry() {
        let s = stream(200, 2);
        s.emit(
            EventKind::StepStarted,
            Some((0, 1)),
            EventPayload::StepStarted(StepStartedEvent {
                node_id: "n0".into(),
                step_type: "click".into(),
            }),
        );
        let mut telemetry = AttemptTelemetry::new(s.execution_id(), 0, 1);
        assert!(heartbeat(&s, &mut telemetry, 0));
        assert!(heartbeat(&s, &mut telemetry, 0));
        assert_eq!(s.dropped(), 0);
        assert_eq!(s.queued(), 3);

        assert!(heartbeat(&s, &mut telemetry, 0));
        assert_eq!(s.dropped(), 1);

        let delivered = s.drain();
        assert_eq!(delivered[0].kind, EventKind::StepStarted);
        let beats: Vec<u64> = delivered[1..]
            .iter()
            .map(|e| e.telemetry().unwrap().sequence)
            .collect();
        assert_eq!(beats, vec![2, 3]);
        let drops = delivered[0].drops.unwrap();
        assert_eq!(drops.dropped, 1);
        assert!(drops.oldest_dropped_at <= delivered[1].timestamp);
        let wire = serde_json::to_value(drops).unwrap();
        assert!(wire.get("oldest_dropped").is_some());
    }

    #[test]
    fn test_completion_events_are_never_dropped() {
        let s = stream(2, 50);
        for _ in 0..5 {
            s.emit(EventKind::ExecutionStarted, None, execution(ExecutionStatus::Running));
        }
        assert_eq!(s.queued(), 5);

        let mut telemetry = AttemptTelemetry::new(s.execution_id(), 1, 1);
        assert!(!heartbeat(&s, &mut telemetry, 1));
        assert_eq!(s.dropped(), 1);

        s.emit(EventKind::ExecutionFailed, None, execution(ExecutionStatus::Failed));
        let delivered = s.drain();
        assert_eq!(delivered.len(), 6);
        assert_eq!(delivered.last().unwrap().kind, EventKind::ExecutionFailed);
        assert_eq!(delivered.last().unwrap().sequence, 6);
    }

    #[test]
    fn test_per_execution_limit_evicts_any_attempt() {
        let s = stream(2, 50);
        let mut a = AttemptTelemetry::new(s.execution_id(), 0, 1);
        let mut b = AttemptTelemetry::new(s.execution_id(), 1, 1);
        heartbeat(&s, &mut a, 0);
        heartbeat(&s, &mut a, 0);
        heartbeat(&s, &mut b, 1);
        let delivered = s.drain();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].step_index, Some(0));
        assert_eq!(delivered[1].step_index, Some(1));
    }

    #[tokio::test]
    async fn test_recv_waits_for_events_and_ends_on_close() {
        let s = Arc::new(stream(200, 50));
        let reader = {
            let s = Arc::clone(&s);
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(envelope) = s.recv().await {
                    seen.push(envelope.sequence);
                }
                seen
            })
        };
        tokio::task::yield_now().await;
        s.emit(EventKind::ExecutionStarted, None, execution(ExecutionStatus::Running));
        s.emit(EventKind::ExecutionCompleted, None, execution(ExecutionStatus::Completed));
        s.close();
        assert_eq!(reader.await.unwrap(), vec![1, 2]);
        assert!(!s.emit(EventKind::ExecutionStarted, None, execution(ExecutionStatus::Running)));
    }

    #[test]
    fn test_bus_registry() {
        let bus = EventBus::default();
        let id = Uuid::new_v4();
        let stream = bus.open(id, Uuid::new_v4());
        assert_eq!(stream.execution_id(), id);
        assert!(bus.get(&id).is_some());
        assert_eq!(bus.active_count(), 1);
        bus.remove(&id);
        assert_eq!(bus.active_count(), 0);
    }
}
