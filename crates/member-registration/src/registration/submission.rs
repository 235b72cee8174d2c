use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::domain::{FieldMap, FieldValue, MemberRecord, RegistrationMode, StepId};
use super::family::{FamilyMember, Gender, MemberId, Relationship};
use super::schema::{self, FieldType};
use super::validation::{parse_amount, validate_all, ErrorMap, IssueKind, ValidationContext};

/// Where a public visitor lands after a successful registration.
pub const CONFIRMATION_PATH: &str = "/registration/confirmation";

/// Outbound port to the member-creation backend.
#[async_trait]
pub trait MemberService: Send + Sync {
    async fn create_member(&self, payload: MemberPayload) -> Result<MemberRecord, ServiceError>;
}

/// Backend rejection or transport failure, optionally itemized per field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    pub message: String,
    pub field_errors: BTreeMap<String, String>,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field_errors: BTreeMap::new(),
        }
    }

    pub fn with_field_error(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.field_errors.insert(field.into(), message.into());
        self
    }

    /// Field errors reported by the backend, mapped one to one.
    pub fn to_error_map(&self) -> ErrorMap {
        let mut errors = ErrorMap::new();
        for (field, message) in &self.field_errors {
            errors.insert(field.clone(), IssueKind::Service, message.clone());
        }
        errors
    }
}

/// Coerced value as sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyMemberPayload {
    pub id: MemberId,
    pub first_name: String,
    pub last_name: String,
    pub relationship: Option<Relationship>,
    pub date_of_birth: Option<NaiveDate>,
    pub age: Option<i64>,
    pub is_child: bool,
    pub gender: Option<Gender>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

impl FamilyMemberPayload {
    fn from_member(member: &FamilyMember, today: NaiveDate) -> Self {
        Self {
            id: member.id().clone(),
            first_name: member.first_name().to_string(),
            last_name: member.last_name().to_string(),
            relationship: member.relationship(),
            date_of_birth: member.date_of_birth(),
            age: member.age_on(today).map(i64::from),
            is_child: member.is_child(),
            gender: member.gender(),
            email: member.email().map(str::to_string),
            phone: member.phone().map(str::to_string),
            notes: member.notes().map(str::to_string),
        }
    }
}

/// Body handed to the member-creation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPayload {
    pub mode: RegistrationMode,
    pub fields: BTreeMap<String, PayloadValue>,
    pub family_members: Vec<FamilyMemberPayload>,
    pub submitted_at: DateTime<Utc>,
}

impl MemberPayload {
    pub fn text(&self, field: &str) -> Option<&str> {
        match self.fields.get(field) {
            Some(PayloadValue::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }
}

/// Aggregate pre-submission check.
///
/// Public sessions always re-run every step validator; an admin with the bypass switched on
/// skips the check entirely.
pub fn finalize(fields: &FieldMap, ctx: &ValidationContext) -> ErrorMap {
    if ctx.bypass_active() {
        debug!("aggregate validation skipped by admin bypass");
        return ErrorMap::new();
    }
    validate_all(fields, ctx)
}

/// Build the service payload, coercing amounts to floats and counts to integers.
///
/// Blank fields are left out. Values that cannot be coerced come back as format errors, which
/// only happens when the aggregate check was bypassed.
pub fn assemble_payload(
    fields: &FieldMap,
    mode: RegistrationMode,
    today: NaiveDate,
    submitted_at: DateTime<Utc>,
) -> Result<MemberPayload, ErrorMap> {
    let mut errors = ErrorMap::new();
    let mut values = BTreeMap::new();

    for (name, value) in fields.values() {
        if value.is_blank() && !matches!(value, FieldValue::Bool(_)) {
            continue;
        }
        let Some(spec) = schema::lookup(name) else {
            continue;
        };

        let coerced = match (spec.kind, value) {
            (_, FieldValue::Bool(flag)) => Some(PayloadValue::Bool(*flag)),
            (_, FieldValue::List(items)) => Some(PayloadValue::List(items.clone())),
            (FieldType::Amount, FieldValue::Text(raw)) => {
                parse_amount(raw).map(PayloadValue::Number)
            }
            (FieldType::Integer, FieldValue::Text(raw)) => {
                raw.trim().parse::<i64>().ok().map(PayloadValue::Integer)
            }
            (_, FieldValue::Text(raw)) => Some(PayloadValue::Text(raw.trim().to_string())),
        };

        match coerced {
            Some(coerced) => {
                values.insert(name.to_string(), coerced);
            }
            None => errors.insert(
                name,
                IssueKind::Format,
                format!("{} could not be converted for submission", spec.label),
            ),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let family_members = fields
        .family()
        .iter()
        .map(|member| FamilyMemberPayload::from_member(member, today))
        .collect();

    Ok(MemberPayload {
        mode,
        fields: values,
        family_members,
        submitted_at,
    })
}

/// Lifecycle of the single outstanding submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionEvent {
    Begin,
    ValidationPassed,
    ValidationFailed,
    ServiceSucceeded,
    ServiceFailed,
    Reset,
}

/// The one transition function for submission state.
pub fn transition(
    state: SubmissionState,
    event: SubmissionEvent,
) -> Result<SubmissionState, SubmissionError> {
    use SubmissionEvent as E;
    use SubmissionState as S;

    match (state, event) {
        (S::Submitting, E::Begin | E::Reset) => Err(SubmissionError::InFlight),
        (S::Succeeded, E::Begin) => Err(SubmissionError::AlreadySubmitted),
        (S::Idle | S::Failed, E::Begin) => Ok(S::Validating),
        (S::Validating, E::ValidationPassed) => Ok(S::Submitting),
        (S::Validating, E::ValidationFailed) => Ok(S::Idle),
        (S::Submitting, E::ServiceSucceeded) => Ok(S::Succeeded),
        (S::Submitting, E::ServiceFailed) => Ok(S::Failed),
        (_, E::Reset) => Ok(S::Idle),
        (state, event) => Err(SubmissionError::InvalidTransition { state, event }),
    }
}

/// Proof that validation passed and a request may go out; carries the assembled payload.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct SubmissionTicket {
    payload: MemberPayload,
}

impl SubmissionTicket {
    pub fn payload(&self) -> &MemberPayload {
        &self.payload
    }

    pub fn into_payload(self) -> MemberPayload {
        self.payload
    }
}

/// Summary shown on the public confirmation page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRoute {
    pub path: String,
    pub name: String,
    pub email: Option<String>,
}

/// Result of a successful submission, by mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// Public visitor: draft cleared, navigate to the confirmation page.
    Confirmed { route: ConfirmationRoute },
    /// Staff entry: record handed to the caller, which decides what happens next.
    Created { record: MemberRecord },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubmissionError {
    #[error("a submission is already in flight")]
    InFlight,
    #[error("this registration has already been submitted")]
    AlreadySubmitted,
    #[error("submission is only available from the confirmation step")]
    NotOnFinalStep,
    #[error("registration has {} invalid field(s)", .errors.len())]
    Invalid {
        errors: ErrorMap,
        first_invalid_step: Option<StepId>,
    },
    #[error("member service rejected the registration: {error}")]
    Service { error: ServiceError, errors: ErrorMap },
    #[error("cannot apply {event:?} while {state:?}")]
    InvalidTransition {
        state: SubmissionState,
        event: SubmissionEvent,
    },
}

/// Owns the submission state machine and the validate/assemble/resolve sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionCoordinator {
    state: SubmissionState,
}

impl Default for SubmissionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionCoordinator {
    pub fn new() -> Self {
        Self {
            state: SubmissionState::Idle,
        }
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    pub fn in_flight(&self) -> bool {
        self.state == SubmissionState::Submitting
    }

    fn apply(&mut self, event: SubmissionEvent) -> Result<SubmissionState, SubmissionError> {
        let next = transition(self.state, event)?;
        debug!(from = ?self.state, to = ?next, ?event, "submission state changed");
        self.state = next;
        Ok(next)
    }

    /// Run the aggregate check and assemble the payload; on success the request is in flight.
    pub fn begin(
        &mut self,
        fields: &FieldMap,
        ctx: &ValidationContext,
        submitted_at: DateTime<Utc>,
    ) -> Result<SubmissionTicket, SubmissionError> {
        self.apply(SubmissionEvent::Begin)?;

        let errors = finalize(fields, ctx);
        let payload = if errors.is_empty() {
            assemble_payload(fields, ctx.mode, ctx.today, submitted_at)
        } else {
            Err(errors)
        };

        match payload {
            Ok(payload) => {
                self.apply(SubmissionEvent::ValidationPassed)?;
                info!(mode = %ctx.mode, bypass = ctx.bypass_active(), "member submission started");
                Ok(SubmissionTicket { payload })
            }
            Err(errors) => {
                self.apply(SubmissionEvent::ValidationFailed)?;
                let first_invalid_step = errors.first_step();
                debug!(errors = errors.len(), ?first_invalid_step, "member submission blocked");
                Err(SubmissionError::Invalid {
                    errors,
                    first_invalid_step,
                })
            }
        }
    }

    /// Settle the in-flight request with the service's answer.
    pub fn resolve(
        &mut self,
        result: Result<MemberRecord, ServiceError>,
    ) -> Result<MemberRecord, SubmissionError> {
        match result {
            Ok(record) => {
                self.apply(SubmissionEvent::ServiceSucceeded)?;
                info!(member_id = %record.id, "member created");
                Ok(record)
            }
            Err(error) => {
                self.apply(SubmissionEvent::ServiceFailed)?;
                warn!(error = %error, fields = error.field_errors.len(), "member service rejected submission");
                let errors = error.to_error_map();
                Err(SubmissionError::Service { error, errors })
            }
        }
    }

    pub fn reset(&mut self) -> Result<(), SubmissionError> {
        self.apply(SubmissionEvent::Reset).map(|_| ())
    }
}
