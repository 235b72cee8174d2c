use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::domain::{FieldMap, RegistrationDraft, RegistrationMode};
use super::sequencer::StepSequencer;
use super::store::{DraftStore, StorageError};

pub const DEFAULT_NAMESPACE: &str = "member-registration";
const DEFAULT_AUTOSAVE_WINDOW_MS: i64 = 1_000;
const DEFAULT_DRAFT_TTL_HOURS: i64 = 24;

/// Timing knobs for autosave and draft expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DraftPolicy {
    pub autosave_window: Duration,
    pub ttl: Duration,
}

impl Default for DraftPolicy {
    fn default() -> Self {
        Self {
            autosave_window: Duration::milliseconds(DEFAULT_AUTOSAVE_WINDOW_MS),
            ttl: Duration::hours(DEFAULT_DRAFT_TTL_HOURS),
        }
    }
}

/// Wire shape of a persisted draft; fields stay raw until the schema has vetted them.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDraft {
    fields: serde_json::Map<String, serde_json::Value>,
    current_step_index: usize,
    #[serde(default)]
    completed_step_ids: Vec<String>,
    timestamp: DateTime<Utc>,
    mode: RegistrationMode,
}

/// A draft that passed every restore gate.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredDraft {
    pub fields: FieldMap,
    pub sequencer: StepSequencer,
    pub saved_at: DateTime<Utc>,
}

/// Snapshot/restore of wizard state, one slot per namespace and mode.
pub struct DraftPersistence<D> {
    store: Arc<D>,
    namespace: String,
    policy: DraftPolicy,
}

impl<D> Clone for DraftPersistence<D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
            policy: self.policy,
        }
    }
}

impl<D> DraftPersistence<D>
where
    D: DraftStore + 'static,
{
    pub fn new(store: Arc<D>) -> Self {
        Self::with_namespace(store, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(store: Arc<D>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            policy: DraftPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DraftPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> DraftPolicy {
        self.policy
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn slot_key(&self, mode: RegistrationMode) -> String {
        format!("{}:registration-draft:{}", self.namespace, mode.label())
    }

    pub fn save(&self, draft: &RegistrationDraft) -> Result<(), StorageError> {
        let payload = serde_json::to_string(draft)?;
        self.store.set(&self.slot_key(draft.mode), payload)?;
        debug!(
            mode = %draft.mode,
            step = draft.current_step_index,
            "registration draft saved"
        );
        Ok(())
    }

    /// Load the slot for `mode`, or `None` when it is absent, expired, foreign, or unreadable.
    pub fn restore(
        &self,
        mode: RegistrationMode,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Option<RestoredDraft> {
        let key = self.slot_key(mode);
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(%mode, error = %err, "draft storage read failed; starting fresh");
                return None;
            }
        };

        match self.decode(&raw, mode, now, today) {
            Ok(Some(restored)) => {
                info!(%mode, step = restored.sequencer.current_index(), "registration draft restored");
                Some(restored)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(%mode, error = %err, "discarding unreadable registration draft");
                None
            }
        }
    }

    pub fn clear(&self, mode: RegistrationMode) -> Result<(), StorageError> {
        self.store.delete(&self.slot_key(mode))?;
        debug!(%mode, "registration draft cleared");
        Ok(())
    }

    fn decode(
        &self,
        raw: &str,
        mode: RegistrationMode,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<Option<RestoredDraft>, StorageError> {
        let stored: StoredDraft = serde_json::from_str(raw)
            .map_err(|err| StorageError::Corrupt(err.to_string()))?;

        if stored.mode != mode {
            debug!(expected = %mode, found = %stored.mode, "ignoring draft saved for another mode");
            return Ok(None);
        }

        let age = now.signed_duration_since(stored.timestamp);
        if age < Duration::zero() {
            debug!(
                %mode,
                saved_at = %stored.timestamp,
                "ignoring registration draft saved in the future"
            );
            return Ok(None);
        }
        if age > self.policy.ttl {
            debug!(%mode, age_minutes = age.num_minutes(), "ignoring expired registration draft");
            return Ok(None);
        }

        let fields = FieldMap::from_stored(stored.fields, today)
            .map_err(|err| StorageError::Corrupt(err.to_string()))?;
        let sequencer =
            StepSequencer::restore(stored.current_step_index, &stored.completed_step_ids)
                .ok_or_else(|| {
                    StorageError::Corrupt(format!(
                        "step position {} is out of range",
                        stored.current_step_index
                    ))
                })?;

        Ok(Some(RestoredDraft {
            fields,
            sequencer,
            saved_at: stored.timestamp,
        }))
    }
}

/// Trailing-edge debounce for autosave: every mutation pushes the deadline out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Autosave {
    window: Duration,
    deadline: Option<DateTime<Utc>>,
}

impl Autosave {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn schedule(&mut self, now: DateTime<Utc>) {
        self.deadline = Some(now + self.window);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn due(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map_or(false, |deadline| now >= deadline)
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}
