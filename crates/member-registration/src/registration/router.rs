use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::clock::Clock;
use super::domain::{FieldValue, RegistrationMode};
use super::family::{FamilyError, FamilyMemberField, MemberId};
use super::notify::NotificationSink;
use super::persistence::{DraftPersistence, DraftPolicy, DEFAULT_NAMESPACE};
use super::schema::SchemaError;
use super::store::DraftStore;
use super::submission::{MemberService, SubmissionError, SubmissionOutcome, SubmissionState};
use super::wizard::{RegistrationWizard, SessionError, WizardView};

/// Server-side handle for one wizard session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct SessionEntry<D, N> {
    wizard: RegistrationWizard<D, N>,
    last_active: DateTime<Utc>,
}

/// Live wizard sessions plus the ports they share.
///
/// Sessions leave the registry when closed or once they sit idle for longer than the draft TTL.
pub struct RegistrationService<D, N, M> {
    sessions: Mutex<HashMap<SessionId, SessionEntry<D, N>>>,
    store: Arc<D>,
    notifier: Arc<N>,
    members: Arc<M>,
    clock: Arc<dyn Clock>,
    policy: DraftPolicy,
}

impl<D, N, M> RegistrationService<D, N, M>
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
    M: MemberService + 'static,
{
    pub fn new(
        store: Arc<D>,
        notifier: Arc<N>,
        members: Arc<M>,
        clock: Arc<dyn Clock>,
        policy: DraftPolicy,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            store,
            notifier,
            members,
            clock,
            policy,
        }
    }

    /// Mount a new wizard, restoring the namespace's draft for `mode` when one is live.
    pub fn open(&self, mode: RegistrationMode, namespace: Option<&str>) -> (SessionId, WizardView) {
        let persistence = DraftPersistence::with_namespace(
            Arc::clone(&self.store),
            namespace.unwrap_or(DEFAULT_NAMESPACE),
        )
        .with_policy(self.policy);
        let wizard = RegistrationWizard::mount(
            mode,
            persistence,
            Arc::clone(&self.notifier),
            Arc::clone(&self.clock),
        );
        let view = wizard.view();

        let id = SessionId::generate();
        let entry = SessionEntry {
            wizard,
            last_active: self.clock.now(),
        };
        let mut guard = self.sessions.lock().expect("session mutex poisoned");
        guard.insert(id.clone(), entry);
        info!(session = %id, %mode, "registration session opened");
        (id, view)
    }

    /// Run `op` against a session while holding the registry lock.
    pub fn with_session<T, F>(&self, id: &SessionId, op: F) -> Result<T, SessionError>
    where
        F: FnOnce(&mut RegistrationWizard<D, N>) -> Result<T, SessionError>,
    {
        let mut guard = self.sessions.lock().expect("session mutex poisoned");
        let entry = guard
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownSession(id.0.clone()))?;
        entry.last_active = self.clock.now();
        op(&mut entry.wizard)
    }

    pub fn view(&self, id: &SessionId) -> Result<WizardView, SessionError> {
        self.with_session(id, |wizard| Ok(wizard.view()))
    }

    /// Drop a session from the registry. Its saved draft, if any, stays in the store.
    pub fn close(&self, id: &SessionId) -> bool {
        let mut guard = self.sessions.lock().expect("session mutex poisoned");
        let closed = guard.remove(id).is_some();
        if closed {
            info!(session = %id, "registration session closed");
        }
        closed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("session mutex poisoned").len()
    }

    /// Submit a session. The registry lock is released while the member service is called.
    pub async fn submit(&self, id: &SessionId) -> Result<SubmissionOutcome, SessionError> {
        let ticket = self.with_session(id, |wizard| wizard.begin_submission())?;

        let result = self.members.create_member(ticket.payload().clone()).await;

        self.with_session(id, |wizard| wizard.complete_submission(ticket, result))
            .map_err(|err| {
                if matches!(err, SessionError::UnknownSession(_)) {
                    debug!(session = %id, "submission result ignored for discarded session");
                }
                err
            })
    }

    /// Save every session whose autosave window has elapsed; returns how many were written.
    pub fn flush_autosaves(&self) -> usize {
        let mut guard = self.sessions.lock().expect("session mutex poisoned");
        guard
            .values_mut()
            .map(|entry| entry.wizard.flush_autosave())
            .filter(|saved| *saved)
            .count()
    }

    /// Drop sessions untouched for longer than the draft TTL; returns how many were removed.
    ///
    /// A session with a submission in flight is kept until the service call resolves.
    pub fn evict_idle_sessions(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.policy.ttl;
        let mut guard = self.sessions.lock().expect("session mutex poisoned");
        let before = guard.len();
        guard.retain(|id, entry| {
            let idle = now.signed_duration_since(entry.last_active) > ttl;
            let in_flight = entry.wizard.submission_state() == SubmissionState::Submitting;
            if idle && !in_flight {
                debug!(
                    session = %id,
                    mode = %entry.wizard.mode(),
                    "idle registration session evicted"
                );
                false
            } else {
                true
            }
        });
        before - guard.len()
    }
}

/// Router builder exposing the wizard session endpoints.
pub fn registration_router<D, N, M>(service: Arc<RegistrationService<D, N, M>>) -> Router
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
    M: MemberService + 'static,
{
    Router::new()
        .route(
            "/api/v1/registrations",
            post(create_session_handler::<D, N, M>),
        )
        .route(
            "/api/v1/registrations/:session_id",
            get(view_handler::<D, N, M>).delete(close_handler::<D, N, M>),
        )
        .route(
            "/api/v1/registrations/:session_id/fields",
            put(fields_handler::<D, N, M>),
        )
        .route(
            "/api/v1/registrations/:session_id/next",
            post(next_handler::<D, N, M>),
        )
        .route(
            "/api/v1/registrations/:session_id/previous",
            post(previous_handler::<D, N, M>),
        )
        .route(
            "/api/v1/registrations/:session_id/bypass",
            put(bypass_handler::<D, N, M>),
        )
        .route(
            "/api/v1/registrations/:session_id/family",
            post(add_family_handler::<D, N, M>),
        )
        .route(
            "/api/v1/registrations/:session_id/family/:member_id",
            delete(remove_family_handler::<D, N, M>).patch(update_family_handler::<D, N, M>),
        )
        .route(
            "/api/v1/registrations/:session_id/submit",
            post(submit_handler::<D, N, M>),
        )
        .route(
            "/api/v1/registrations/:session_id/reset",
            post(reset_handler::<D, N, M>),
        )
        .with_state(service)
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub mode: RegistrationMode,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BypassRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FamilyUpdateRequest {
    pub field: FamilyMemberField,
    #[serde(default)]
    pub value: String,
}

type Shared<D, N, M> = State<Arc<RegistrationService<D, N, M>>>;

pub(crate) async fn create_session_handler<D, N, M>(
    State(service): Shared<D, N, M>,
    axum::Json(request): axum::Json<CreateSessionRequest>,
) -> Response
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
    M: MemberService + 'static,
{
    let (id, view) = service.open(request.mode, request.namespace.as_deref());
    let payload = json!({
        "sessionId": id,
        "session": view,
    });
    (StatusCode::CREATED, axum::Json(payload)).into_response()
}

pub(crate) async fn view_handler<D, N, M>(
    State(service): Shared<D, N, M>,
    Path(session_id): Path<String>,
) -> Response
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
    M: MemberService + 'static,
{
    view_response(service.view(&SessionId(session_id)))
}

pub(crate) async fn close_handler<D, N, M>(
    State(service): Shared<D, N, M>,
    Path(session_id): Path<String>,
) -> Response
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
    M: MemberService + 'static,
{
    if service.close(&SessionId(session_id.clone())) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        session_error_response(SessionError::UnknownSession(session_id))
    }
}

pub(crate) async fn fields_handler<D, N, M>(
    State(service): Shared<D, N, M>,
    Path(session_id): Path<String>,
    axum::Json(body): axum::Json<serde_json::Map<String, Value>>,
) -> Response
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
    M: MemberService + 'static,
{
    let mut values = BTreeMap::new();
    for (name, raw) in body {
        match FieldValue::from_json(raw) {
            Some(value) => {
                values.insert(name, value);
            }
            None => {
                let payload = json!({
                    "error": format!("'{name}' must be a boolean, text, or list value"),
                });
                return (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response();
            }
        }
    }

    view_response(service.with_session(&SessionId(session_id), |wizard| {
        wizard.set_fields(values)?;
        Ok(wizard.view())
    }))
}

pub(crate) async fn next_handler<D, N, M>(
    State(service): Shared<D, N, M>,
    Path(session_id): Path<String>,
) -> Response
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
    M: MemberService + 'static,
{
    view_response(service.with_session(&SessionId(session_id), |wizard| {
        wizard.next()?;
        Ok(wizard.view())
    }))
}

pub(crate) async fn previous_handler<D, N, M>(
    State(service): Shared<D, N, M>,
    Path(session_id): Path<String>,
) -> Response
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
    M: MemberService + 'static,
{
    view_response(service.with_session(&SessionId(session_id), |wizard| {
        wizard.previous();
        Ok(wizard.view())
    }))
}

pub(crate) async fn bypass_handler<D, N, M>(
    State(service): Shared<D, N, M>,
    Path(session_id): Path<String>,
    axum::Json(request): axum::Json<BypassRequest>,
) -> Response
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
    M: MemberService + 'static,
{
    view_response(service.with_session(&SessionId(session_id), |wizard| {
        wizard.set_bypass(request.enabled)?;
        Ok(wizard.view())
    }))
}

pub(crate) async fn add_family_handler<D, N, M>(
    State(service): Shared<D, N, M>,
    Path(session_id): Path<String>,
) -> Response
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
    M: MemberService + 'static,
{
    let result = service.with_session(&SessionId(session_id), |wizard| {
        let member_id = wizard.add_family_member();
        Ok((member_id, wizard.view()))
    });

    match result {
        Ok((member_id, view)) => {
            let payload = json!({
                "memberId": member_id,
                "session": view,
            });
            (StatusCode::CREATED, axum::Json(payload)).into_response()
        }
        Err(error) => session_error_response(error),
    }
}

pub(crate) async fn update_family_handler<D, N, M>(
    State(service): Shared<D, N, M>,
    Path((session_id, member_id)): Path<(String, String)>,
    axum::Json(request): axum::Json<FamilyUpdateRequest>,
) -> Response
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
    M: MemberService + 'static,
{
    let member_id = MemberId(member_id);
    view_response(service.with_session(&SessionId(session_id), |wizard| {
        wizard.update_family_member(&member_id, request.field, &request.value)?;
        Ok(wizard.view())
    }))
}

pub(crate) async fn remove_family_handler<D, N, M>(
    State(service): Shared<D, N, M>,
    Path((session_id, member_id)): Path<(String, String)>,
) -> Response
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
    M: MemberService + 'static,
{
    let member_id = MemberId(member_id);
    view_response(service.with_session(&SessionId(session_id), |wizard| {
        wizard
            .remove_family_member(&member_id)
            .ok_or_else(|| FamilyError::UnknownMember(member_id.clone()))?;
        Ok(wizard.view())
    }))
}

pub(crate) async fn submit_handler<D, N, M>(
    State(service): Shared<D, N, M>,
    Path(session_id): Path<String>,
) -> Response
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
    M: MemberService + 'static,
{
    match service.submit(&SessionId(session_id)).await {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(error) => session_error_response(error),
    }
}

pub(crate) async fn reset_handler<D, N, M>(
    State(service): Shared<D, N, M>,
    Path(session_id): Path<String>,
) -> Response
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
    M: MemberService + 'static,
{
    view_response(service.with_session(&SessionId(session_id), |wizard| {
        wizard.clear_for_next()?;
        Ok(wizard.view())
    }))
}

fn view_response(result: Result<WizardView, SessionError>) -> Response {
    match result {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(error) => session_error_response(error),
    }
}

/// Status code for a session error; shared with the service-level error mapping.
pub fn session_error_status(error: &SessionError) -> StatusCode {
    match error {
        SessionError::Schema(_) => StatusCode::BAD_REQUEST,
        SessionError::Family(FamilyError::UnknownMember(_)) => StatusCode::NOT_FOUND,
        SessionError::Family(_) => StatusCode::BAD_REQUEST,
        SessionError::StepInvalid { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::Submission(SubmissionError::Invalid { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SessionError::Submission(SubmissionError::Service { .. }) => StatusCode::BAD_GATEWAY,
        SessionError::Submission(_) => StatusCode::CONFLICT,
        SessionError::AdminOnly(_) => StatusCode::FORBIDDEN,
        SessionError::UnknownSession(_) => StatusCode::NOT_FOUND,
        SessionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn session_error_response(error: SessionError) -> Response {
    let status = session_error_status(&error);
    let payload = match &error {
        SessionError::StepInvalid { step, errors } => json!({
            "error": error.to_string(),
            "step": step,
            "errors": errors,
        }),
        SessionError::Submission(SubmissionError::Invalid {
            errors,
            first_invalid_step,
        }) => json!({
            "error": error.to_string(),
            "errors": errors,
            "firstInvalidStep": first_invalid_step,
        }),
        SessionError::Submission(SubmissionError::Service { error: cause, errors }) => json!({
            "error": cause.message,
            "errors": errors,
        }),
        SessionError::Schema(SchemaError::TypeMismatch { field, .. }) => json!({
            "error": error.to_string(),
            "field": field,
        }),
        _ => json!({
            "error": error.to_string(),
        }),
    };
    (status, axum::Json(payload)).into_response()
}
