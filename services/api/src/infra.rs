use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use member_registration::config::RegistrationConfig;
use member_registration::registration::{
    Clock, DraftStore, FileDraftStore, MemberPayload, MemberRecord, MemberService,
    MemoryDraftStore, RegistrationService, ServiceError, StorageError,
    SystemClock, TracingNotifier,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

pub(crate) type ApiRegistrationService =
    RegistrationService<ConfiguredDraftStore, TracingNotifier, InMemoryMemberService>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Draft store picked from configuration: files when a directory is set, memory otherwise.
#[derive(Debug, Clone)]
pub(crate) enum ConfiguredDraftStore {
    Memory(MemoryDraftStore),
    File(FileDraftStore),
}

impl ConfiguredDraftStore {
    pub(crate) fn from_config(config: &RegistrationConfig) -> Self {
        match &config.draft_dir {
            Some(dir) => {
                info!(dir = %dir.display(), "registration drafts stored on disk");
                Self::File(FileDraftStore::new(dir.clone()))
            }
            None => {
                info!("registration drafts kept in memory");
                Self::Memory(MemoryDraftStore::new())
            }
        }
    }
}

impl DraftStore for ConfiguredDraftStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self {
            Self::Memory(store) => store.get(key),
            Self::File(store) => store.get(key),
        }
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        match self {
            Self::Memory(store) => store.set(key, value),
            Self::File(store) => store.set(key, value),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self {
            Self::Memory(store) => store.delete(key),
            Self::File(store) => store.delete(key),
        }
    }
}

static MEMBER_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_member_id() -> String {
    let id = MEMBER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("mbr-{id:06}")
}

/// Member directory held in process memory; rejects a second registration for the same email.
#[derive(Default, Clone)]
pub(crate) struct InMemoryMemberService {
    records: Arc<Mutex<Vec<MemberRecord>>>,
}

impl InMemoryMemberService {
    pub(crate) fn records(&self) -> Vec<MemberRecord> {
        self.records.lock().expect("member mutex poisoned").clone()
    }
}

#[async_trait]
impl MemberService for InMemoryMemberService {
    async fn create_member(&self, payload: MemberPayload) -> Result<MemberRecord, ServiceError> {
        let email = payload
            .text("email")
            .map(|email| email.to_ascii_lowercase());

        let mut guard = self.records.lock().expect("member mutex poisoned");
        if let Some(email) = &email {
            let taken = guard
                .iter()
                .any(|record| record.email.as_deref() == Some(email.as_str()));
            if taken {
                return Err(ServiceError::new("A member with this email already exists")
                    .with_field_error("email", "This email is already registered"));
            }
        }

        let record = MemberRecord {
            id: next_member_id(),
            first_name: payload.text("firstName").unwrap_or_default().to_string(),
            last_name: payload.text("lastName").unwrap_or_default().to_string(),
            email,
            created_at: Utc::now(),
        };
        guard.push(record.clone());
        Ok(record)
    }
}

pub(crate) fn build_registration_service(
    config: &RegistrationConfig,
) -> Arc<ApiRegistrationService> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    Arc::new(RegistrationService::new(
        Arc::new(ConfiguredDraftStore::from_config(config)),
        Arc::new(TracingNotifier),
        Arc::new(InMemoryMemberService::default()),
        clock,
        config.policy(),
    ))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
