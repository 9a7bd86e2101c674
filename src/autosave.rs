//! Debounced per-field autosave.
//!
//! Each field owns at most one armed timer. A new edit to the same field
//! replaces the pending value and restarts the timer; edits to other fields
//! are unaffected. A fired timer first takes the field's write slot, so a
//! field never has two requests in flight and its writes land in edit order.
//! The value leaves the pending map only once the slot is held; from then on
//! the request is never aborted. `flush` sends what is pending and then waits
//! for every request already on the wire.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex as WriteSlot;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::backend::{ContentBackend, ProgramId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled,
    /// No usable record id is bound; nothing will be sent.
    Skipped,
}

impl ScheduleOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleOutcome::Scheduled => "scheduled",
            ScheduleOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SaveState {
    Pending,
    Saving,
    Saved,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSaveStatus {
    #[serde(flatten)]
    pub state: SaveState,
    pub updated_at: String,
    #[serde(skip)]
    generation: u64,
}

struct PendingSave {
    generation: u64,
    value: Value,
    timer: Option<AbortHandle>,
}

struct Inner {
    backend: Arc<dyn ContentBackend>,
    record_id: Option<ProgramId>,
    debounce: Duration,
    next_generation: AtomicU64,
    pending: Mutex<HashMap<String, PendingSave>>,
    statuses: Mutex<BTreeMap<String, FieldSaveStatus>>,
    slots: Mutex<HashMap<String, Arc<WriteSlot<()>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Inner {
    fn set_status(&self, field: &str, generation: u64, state: SaveState) {
        let mut statuses = lock(&self.statuses);
        if let Some(existing) = statuses.get(field) {
            if existing.generation > generation {
                return;
            }
        }
        statuses.insert(
            field.to_string(),
            FieldSaveStatus {
                state,
                updated_at: now_ts(),
                generation,
            },
        );
    }

    fn slot(&self, field: &str) -> Arc<WriteSlot<()>> {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(field.to_string()).or_default())
    }

    /// Claim the pending value if it still belongs to `generation`.
    fn take_pending(&self, field: &str, generation: u64) -> Option<Value> {
        let mut pending = lock(&self.pending);
        match pending.get(field) {
            Some(p) if p.generation == generation => pending.remove(field).map(|p| p.value),
            _ => None,
        }
    }

    async fn persist(&self, id: ProgramId, field: &str, generation: u64, value: Value) {
        self.set_status(field, generation, SaveState::Saving);
        match self.backend.update_program_field(id, field, &value).await {
            Ok(()) => {
                info!(program_id = %id, field, "autosaved");
                self.set_status(field, generation, SaveState::Saved);
            }
            Err(e) => {
                error!(program_id = %id, field, error = %e, "autosave failed");
                self.set_status(
                    field,
                    generation,
                    SaveState::Failed {
                        message: e.to_string(),
                    },
                );
            }
        }
    }
}

/// Per-session autosave coordinator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AutosaveCoordinator {
    inner: Arc<Inner>,
}

impl AutosaveCoordinator {
    pub fn new(
        backend: Arc<dyn ContentBackend>,
        record_id: Option<ProgramId>,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                record_id,
                debounce,
                next_generation: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                statuses: Mutex::new(BTreeMap::new()),
                slots: Mutex::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn record_id(&self) -> Option<ProgramId> {
        self.inner.record_id
    }

    /// Queue `value` for `field`, replacing any unsaved value for the same
    /// field. Must be called from within a tokio runtime.
    pub fn schedule(&self, field: &str, value: Value) -> ScheduleOutcome {
        let Some(id) = self.inner.record_id else {
            warn!(field, "autosave skipped: no program id bound");
            return ScheduleOutcome::Skipped;
        };
        if field.trim().is_empty() {
            warn!("autosave skipped: empty field name");
            return ScheduleOutcome::Skipped;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = lock(&self.inner.pending);
            let previous = pending.insert(
                field.to_string(),
                PendingSave {
                    generation,
                    value,
                    timer: None,
                },
            );
            if let Some(timer) = previous.and_then(|p| p.timer) {
                timer.abort();
                debug!(field, "superseded pending autosave");
            }
        }
        self.inner.set_status(field, generation, SaveState::Pending);

        let inner = Arc::clone(&self.inner);
        let owned_field = field.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            let slot = inner.slot(&owned_field);
            let _turn = slot.lock().await;
            let Some(value) = inner.take_pending(&owned_field, generation) else {
                return;
            };
            inner.persist(id, &owned_field, generation, value).await;
        });

        {
            let mut pending = lock(&self.inner.pending);
            if let Some(p) = pending.get_mut(field) {
                if p.generation == generation {
                    p.timer = Some(task.abort_handle());
                }
            }
        }
        let mut tasks = lock(&self.inner.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
        ScheduleOutcome::Scheduled
    }

    /// Send every pending value now instead of waiting for its timer, then
    /// wait until no request for this session is still outstanding.
    pub async fn flush(&self) -> usize {
        let Some(id) = self.inner.record_id else {
            return 0;
        };
        let drained: Vec<(String, PendingSave)> = lock(&self.inner.pending).drain().collect();
        let count = drained.len();
        for (field, save) in drained {
            if let Some(timer) = save.timer {
                timer.abort();
            }
            let slot = self.inner.slot(&field);
            let _turn = slot.lock().await;
            self.inner
                .persist(id, &field, save.generation, save.value)
                .await;
        }
        if count > 0 {
            info!(program_id = %id, count, "flushed pending autosaves");
        }

        let outstanding: Vec<JoinHandle<()>> = lock(&self.inner.tasks).drain(..).collect();
        for task in outstanding {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(program_id = %id, error = %e, "autosave task ended abnormally");
                }
            }
        }
        count
    }

    pub fn pending_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = lock(&self.inner.pending).keys().cloned().collect();
        fields.sort();
        fields
    }

    pub fn statuses(&self) -> BTreeMap<String, FieldSaveStatus> {
        lock(&self.inner.statuses).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MemoryBackend;
    use serde_json::json;

    fn coordinator(backend: &Arc<MemoryBackend>, id: Option<u64>) -> AutosaveCoordinator {
        let dyn_backend: Arc<dyn ContentBackend> = backend.clone();
        AutosaveCoordinator::new(dyn_backend, id.map(ProgramId), Duration::from_millis(1000))
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_on_one_field_sends_only_last_value() {
        let backend = Arc::new(MemoryBackend::default());
        let autosave = coordinator(&backend, Some(42));

        assert_eq!(autosave.schedule("title", json!("D")), ScheduleOutcome::Scheduled);
        settle(400).await;
        autosave.schedule("title", json!("Dr"));
        settle(400).await;
        autosave.schedule("title", json!("Draft"));
        settle(900).await;
        assert!(backend.updates().is_empty(), "window restarts on each edit");

        settle(200).await;
        assert_eq!(
            backend.updates(),
            vec![(ProgramId(42), "title".to_string(), json!("Draft"))]
        );
        assert!(autosave.pending_fields().is_empty());
        assert_eq!(autosave.statuses()["title"].state, SaveState::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn different_fields_do_not_cancel_each_other() {
        let backend = Arc::new(MemoryBackend::default());
        let autosave = coordinator(&backend, Some(1));

        autosave.schedule("title", json!("Identity"));
        autosave.schedule("rubric", json!("<p>A-E</p>"));
        assert_eq!(autosave.pending_fields(), vec!["rubric".to_string(), "title".to_string()]);
        settle(1100).await;

        let mut updates = backend.updates();
        updates.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            updates,
            vec![
                (ProgramId(1), "rubric".to_string(), json!("<p>A-E</p>")),
                (ProgramId(1), "title".to_string(), json!("Identity")),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_record_id_makes_no_calls() {
        let backend = Arc::new(MemoryBackend::default());
        let autosave = coordinator(&backend, None);

        assert_eq!(autosave.schedule("title", json!("x")), ScheduleOutcome::Skipped);
        settle(2000).await;
        assert!(backend.updates().is_empty());
        assert!(autosave.statuses().is_empty());
        assert_eq!(autosave.flush().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_is_recorded_and_not_retried() {
        let backend = Arc::new(MemoryBackend::default());
        backend.state.lock().unwrap().fail_updates = true;
        let autosave = coordinator(&backend, Some(9));

        autosave.schedule("rubric", json!("r"));
        settle(1100).await;
        match &autosave.statuses()["rubric"].state {
            SaveState::Failed { message } => assert!(message.contains("500")),
            other => panic!("expected failure, got {other:?}"),
        }

        backend.state.lock().unwrap().fail_updates = false;
        settle(5000).await;
        assert!(backend.updates().is_empty(), "no retry after failure");
    }

    #[tokio::test(start_paused = true)]
    async fn edit_after_fire_arms_a_new_save() {
        let backend = Arc::new(MemoryBackend::default());
        let autosave = coordinator(&backend, Some(3));

        autosave.schedule("stage", json!("S2"));
        settle(1100).await;
        autosave.schedule("stage", json!("S3"));
        assert_eq!(autosave.statuses()["stage"].state, SaveState::Pending);
        settle(1100).await;

        let values: Vec<Value> = backend.updates().into_iter().map(|u| u.2).collect();
        assert_eq!(values, vec![json!("S2"), json!("S3")]);
    }

    #[tokio::test(start_paused = true)]
    async fn edit_during_slow_save_lands_after_it() {
        let backend = Arc::new(MemoryBackend::default());
        backend.state.lock().unwrap().update_delays = vec![
            (json!("old"), Duration::from_millis(3000)),
            (json!("new"), Duration::from_millis(100)),
        ];
        let autosave = coordinator(&backend, Some(4));

        autosave.schedule("title", json!("old"));
        settle(1100).await;
        autosave.schedule("title", json!("new"));
        settle(1100).await;
        assert!(backend.updates().is_empty(), "second write waits for the first");
        assert_eq!(autosave.statuses()["title"].state, SaveState::Pending);

        settle(5000).await;
        let values: Vec<Value> = backend.updates().into_iter().map(|u| u.2).collect();
        assert_eq!(values, vec![json!("old"), json!("new")]);
        assert_eq!(autosave.statuses()["title"].state, SaveState::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_waits_for_requests_already_sent() {
        let backend = Arc::new(MemoryBackend::default());
        backend.state.lock().unwrap().update_delays =
            vec![(json!("S2"), Duration::from_millis(2000))];
        let autosave = coordinator(&backend, Some(6));

        autosave.schedule("stage", json!("S2"));
        settle(1100).await;
        assert!(autosave.pending_fields().is_empty());
        assert!(backend.updates().is_empty());
        autosave.schedule("rubric", json!("r"));

        assert_eq!(autosave.flush().await, 1);
        let mut fields: Vec<String> = backend.updates().into_iter().map(|u| u.1).collect();
        fields.sort();
        assert_eq!(fields, vec!["rubric".to_string(), "stage".to_string()]);
        assert_eq!(autosave.statuses()["stage"].state, SaveState::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_of_same_field_follows_the_in_flight_write() {
        let backend = Arc::new(MemoryBackend::default());
        backend.state.lock().unwrap().update_delays =
            vec![(json!("a"), Duration::from_millis(2000))];
        let autosave = coordinator(&backend, Some(8));

        autosave.schedule("title", json!("a"));
        settle(1100).await;
        autosave.schedule("title", json!("b"));
        assert_eq!(autosave.flush().await, 1);

        let values: Vec<Value> = backend.updates().into_iter().map(|u| u.2).collect();
        assert_eq!(values, vec![json!("a"), json!("b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_sends_pending_immediately() {
        let backend = Arc::new(MemoryBackend::default());
        let autosave = coordinator(&backend, Some(5));

        autosave.schedule("teacher_name", json!("A. Teacher"));
        assert_eq!(autosave.flush().await, 1);
        assert_eq!(backend.updates().len(), 1);

        settle(2000).await;
        assert_eq!(backend.updates().len(), 1, "aborted timer must not fire again");
    }
}
