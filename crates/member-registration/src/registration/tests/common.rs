use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::registration::clock::Clock;
use crate::registration::domain::{FieldMap, FieldValue, MemberRecord, RegistrationMode};
use crate::registration::notify::{NotificationLevel, NotificationSink};
use crate::registration::persistence::DraftPersistence;
use crate::registration::store::MemoryDraftStore;
use crate::registration::submission::{MemberPayload, MemberService, ServiceError};
use crate::registration::validation::ValidationContext;
use crate::registration::wizard::RegistrationWizard;

pub(super) fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).expect("valid date")
}

pub(super) fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
}

pub(super) fn ctx(mode: RegistrationMode, bypass: bool) -> ValidationContext {
    ValidationContext::new(mode, bypass, today())
}

/// Clock that only moves when told to.
pub(super) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub(super) fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub(super) fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().expect("clock mutex poisoned");
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    events: Mutex<Vec<(String, NotificationLevel)>>,
}

impl RecordingNotifier {
    pub(super) fn events(&self) -> Vec<(String, NotificationLevel)> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }

    pub(super) fn levels(&self) -> Vec<NotificationLevel> {
        self.events().into_iter().map(|(_, level)| level).collect()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, message: &str, level: NotificationLevel) {
        self.events
            .lock()
            .expect("notifier mutex poisoned")
            .push((message.to_string(), level));
    }
}

/// Member service that records every payload and answers with a canned result.
#[derive(Default)]
pub(super) struct RecordingMemberService {
    calls: AtomicUsize,
    payloads: Mutex<Vec<MemberPayload>>,
    failure: Option<ServiceError>,
}

impl RecordingMemberService {
    pub(super) fn failing(error: ServiceError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(super) fn payloads(&self) -> Vec<MemberPayload> {
        self.payloads.lock().expect("payload mutex poisoned").clone()
    }
}

#[async_trait]
impl MemberService for RecordingMemberService {
    async fn create_member(&self, payload: MemberPayload) -> Result<MemberRecord, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let record = MemberRecord {
            id: format!("mbr-{:03}", self.calls()),
            first_name: payload.text("firstName").unwrap_or_default().to_string(),
            last_name: payload.text("lastName").unwrap_or_default().to_string(),
            email: payload.text("email").map(str::to_string),
            created_at: payload.submitted_at,
        };
        self.payloads
            .lock()
            .expect("payload mutex poisoned")
            .push(payload);

        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(record),
        }
    }
}

pub(super) fn text(value: &str) -> FieldValue {
    FieldValue::text(value)
}

/// Every field a public visitor must supply, keyed by step order.
pub(super) fn valid_public_fields() -> BTreeMap<String, FieldValue> {
    let mut values = BTreeMap::new();
    for (name, value) in [
        ("firstName", text("Ada")),
        ("lastName", text("Lovelace")),
        ("email", text("ada@example.org")),
        ("dateOfBirth", text("1985-12-10")),
        ("gender", text("female")),
        ("phone", text("+1 515 555 0100")),
        ("address", text("12 Chapel Street")),
        ("emergencyContactName", text("Mary Somerville")),
        ("emergencyContactPhone", text("515-555-0199")),
        ("privacyPolicyAgreed", FieldValue::Bool(true)),
    ] {
        values.insert(name.to_string(), value);
    }
    values
}

pub(super) fn field_map(values: &[(&str, FieldValue)]) -> FieldMap {
    let mut fields = FieldMap::new();
    for (name, value) in values {
        fields
            .set(name, value.clone())
            .expect("fixture field accepted");
    }
    fields
}

pub(super) fn valid_public_field_map() -> FieldMap {
    let mut fields = FieldMap::new();
    for (name, value) in valid_public_fields() {
        fields.set(&name, value).expect("fixture field accepted");
    }
    fields
}

pub(super) type TestWizard = RegistrationWizard<MemoryDraftStore, RecordingNotifier>;

pub(super) struct Harness {
    pub(super) store: Arc<MemoryDraftStore>,
    pub(super) clock: Arc<ManualClock>,
    pub(super) notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub(super) fn new() -> Self {
        Self {
            store: Arc::new(MemoryDraftStore::new()),
            clock: ManualClock::at(noon()),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub(super) fn persistence(&self) -> DraftPersistence<MemoryDraftStore> {
        DraftPersistence::with_namespace(Arc::clone(&self.store), "test-client")
    }

    pub(super) fn mount(&self, mode: RegistrationMode) -> TestWizard {
        let clock: Arc<dyn Clock> = self.clock.clone();
        RegistrationWizard::mount(mode, self.persistence(), Arc::clone(&self.notifier), clock)
    }
}

/// Fill every required field and walk the wizard to the confirmation step.
pub(super) fn advance_to_confirmation(wizard: &mut TestWizard) {
    wizard
        .set_fields(valid_public_fields())
        .expect("fields accepted");
    while !wizard.sequencer().is_terminal() {
        wizard.next().expect("valid step advances");
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 256 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
