use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::domain::{FieldMap, FieldValue, MemberRecord, RegistrationDraft, RegistrationMode, StepId};
use super::family::{FamilyError, FamilyMember, FamilyMemberField, MemberId};
use super::notify::{NotificationLevel, NotificationSink};
use super::persistence::{Autosave, DraftPersistence};
use super::schema::{self, SchemaError};
use super::sequencer::StepSequencer;
use super::store::{DraftStore, StorageError};
use super::submission::{
    ConfirmationRoute, MemberService, ServiceError, SubmissionCoordinator, SubmissionError,
    SubmissionOutcome, SubmissionState, SubmissionTicket, CONFIRMATION_PATH,
};
use super::validation::{ErrorMap, ValidationContext};

const RESTORED_MESSAGE: &str = "Your saved progress has been restored.";
const BYPASS_MESSAGE: &str =
    "Validation bypass is on: required fields will not be enforced for this registration.";
const BYPASS_OFF_MESSAGE: &str = "Validation bypass is off: all required fields are enforced again.";
const WELCOME_MESSAGE: &str = "Registration complete. Welcome to the church family!";

/// Called with the created record after a successful staff submission.
pub type SuccessCallback = Box<dyn Fn(&MemberRecord) + Send + Sync>;

/// One live registration session: form state, navigation, drafts, and submission.
pub struct RegistrationWizard<D, N> {
    mode: RegistrationMode,
    bypass: bool,
    fields: FieldMap,
    sequencer: StepSequencer,
    submission: SubmissionCoordinator,
    errors: ErrorMap,
    persistence: DraftPersistence<D>,
    autosave: Autosave,
    notifier: Arc<N>,
    clock: Arc<dyn Clock>,
    on_admin_success: Option<SuccessCallback>,
}

impl<D, N> fmt::Debug for RegistrationWizard<D, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationWizard")
            .field("mode", &self.mode)
            .field("bypass", &self.bypass)
            .field("step", &self.sequencer.current_index())
            .field("submission", &self.submission.state())
            .finish_non_exhaustive()
    }
}

impl<D, N> RegistrationWizard<D, N>
where
    D: DraftStore + 'static,
    N: NotificationSink + 'static,
{
    /// Start a session, picking up any live draft saved for this mode.
    pub fn mount(
        mode: RegistrationMode,
        persistence: DraftPersistence<D>,
        notifier: Arc<N>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let autosave = Autosave::new(persistence.policy().autosave_window);
        let mut wizard = Self {
            mode,
            bypass: false,
            fields: FieldMap::new(),
            sequencer: StepSequencer::new(),
            submission: SubmissionCoordinator::new(),
            errors: ErrorMap::new(),
            persistence,
            autosave,
            notifier,
            clock,
            on_admin_success: None,
        };

        if let Some(restored) = wizard
            .persistence
            .restore(mode, wizard.clock.now(), wizard.clock.today())
        {
            wizard.fields = restored.fields;
            wizard.sequencer = restored.sequencer;
            wizard
                .notifier
                .notify(RESTORED_MESSAGE, NotificationLevel::Info);
        }

        wizard
    }

    pub fn with_admin_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&MemberRecord) + Send + Sync + 'static,
    {
        self.on_admin_success = Some(Box::new(callback));
        self
    }

    pub fn mode(&self) -> RegistrationMode {
        self.mode
    }

    pub fn bypass(&self) -> bool {
        self.bypass
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn sequencer(&self) -> &StepSequencer {
        &self.sequencer
    }

    pub fn current_step(&self) -> StepId {
        self.sequencer.current_step().id
    }

    /// Inline errors from the last blocked advance or submission.
    pub fn errors(&self) -> &ErrorMap {
        &self.errors
    }

    pub fn submission_state(&self) -> SubmissionState {
        self.submission.state()
    }

    pub fn autosave(&self) -> &Autosave {
        &self.autosave
    }

    pub fn family_issues(&self) -> BTreeMap<MemberId, ErrorMap> {
        self.fields.family().issues(self.clock.today())
    }

    fn context(&self) -> ValidationContext {
        ValidationContext::new(self.mode, self.bypass, self.clock.today())
    }

    /// Schedule an autosave. A submitted registration is never written back to storage.
    fn is_submitted(&self) -> bool {
        self.submission.state() == SubmissionState::Succeeded
    }

    fn touch(&mut self) {
        if self.is_submitted() {
            return;
        }
        self.autosave.schedule(self.clock.now());
    }

    fn discard_draft(&mut self) {
        self.autosave.cancel();
        if let Err(err) = self.persistence.clear(self.mode) {
            warn!(mode = %self.mode, error = %err, "could not clear registration draft");
        }
    }

    pub fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), SessionError> {
        self.fields.set(name, value)?;
        self.errors.remove(name);
        self.touch();
        Ok(())
    }

    /// Apply a batch of writes; nothing is written unless every entry passes the schema.
    pub fn set_fields(
        &mut self,
        values: BTreeMap<String, FieldValue>,
    ) -> Result<(), SessionError> {
        for (name, value) in &values {
            schema::check(name, value)?;
        }
        for (name, value) in values {
            self.fields.set(&name, value)?;
            self.errors.remove(&name);
        }
        self.touch();
        Ok(())
    }

    pub fn set_bypass(&mut self, enabled: bool) -> Result<(), SessionError> {
        if self.mode != RegistrationMode::Admin {
            return Err(SessionError::AdminOnly("validation bypass"));
        }
        if self.bypass == enabled {
            return Ok(());
        }

        self.bypass = enabled;
        if enabled {
            warn!(mode = %self.mode, "validation bypass enabled");
            self.notifier
                .notify(BYPASS_MESSAGE, NotificationLevel::Warning);
        } else {
            info!(mode = %self.mode, "validation bypass disabled");
            self.notifier
                .notify(BYPASS_OFF_MESSAGE, NotificationLevel::Info);
        }
        Ok(())
    }

    pub fn add_family_member(&mut self) -> MemberId {
        let id = self.fields.family_mut().add();
        debug!(member = %id, "family member added");
        self.touch();
        id
    }

    /// Unknown ids are ignored and yield `None`.
    pub fn remove_family_member(&mut self, id: &MemberId) -> Option<FamilyMember> {
        let removed = self.fields.family_mut().remove(id)?;
        debug!(member = %id, "family member removed");
        self.touch();
        Some(removed)
    }

    pub fn update_family_member(
        &mut self,
        id: &MemberId,
        field: FamilyMemberField,
        value: &str,
    ) -> Result<&FamilyMember, SessionError> {
        let today = self.clock.today();
        self.fields.family_mut().update(id, field, value, today)?;
        self.touch();
        self.fields
            .family()
            .get(id)
            .ok_or_else(|| FamilyError::UnknownMember(id.clone()).into())
    }

    pub fn expand_family_member(&mut self, id: &MemberId) -> bool {
        self.fields.family_mut().expand(id)
    }

    pub fn collapse_family_member(&mut self) {
        self.fields.family_mut().collapse();
    }

    pub fn next(&mut self) -> Result<usize, SessionError> {
        let step = self.current_step();
        let ctx = self.context();
        match self.sequencer.next(&self.fields, &ctx) {
            Ok(index) => {
                self.errors.clear();
                self.touch();
                Ok(index)
            }
            Err(errors) => {
                self.notifier.notify(
                    &format!("Please fix {} field(s) before continuing.", errors.len()),
                    NotificationLevel::Warning,
                );
                self.errors = errors.clone();
                Err(SessionError::StepInvalid { step, errors })
            }
        }
    }

    pub fn previous(&mut self) -> usize {
        let index = self.sequencer.previous();
        self.errors.clear();
        self.touch();
        index
    }

    pub fn snapshot(&self) -> RegistrationDraft {
        RegistrationDraft {
            fields: self.fields.clone(),
            current_step_index: self.sequencer.current_index(),
            completed_step_ids: self.sequencer.completed().to_vec(),
            timestamp: self.clock.now(),
            mode: self.mode,
        }
    }

    /// Write the draft immediately and drop any pending autosave.
    pub fn save_now(&mut self) -> Result<(), StorageError> {
        self.autosave.cancel();
        if self.is_submitted() {
            debug!(mode = %self.mode, "draft save skipped for a submitted registration");
            return Ok(());
        }
        self.persistence.save(&self.snapshot())
    }

    /// Write the draft when the debounce window has elapsed; returns whether a save happened.
    ///
    /// Storage failures are logged and swallowed so they never interrupt the visitor.
    pub fn flush_autosave(&mut self) -> bool {
        if !self.autosave.due(self.clock.now()) {
            return false;
        }
        match self.save_now() {
            Ok(()) => true,
            Err(err) => {
                warn!(mode = %self.mode, error = %err, "autosave failed");
                false
            }
        }
    }

    /// Validate and assemble the payload; only allowed from the confirmation step.
    pub fn begin_submission(&mut self) -> Result<SubmissionTicket, SessionError> {
        if !self.sequencer.is_terminal() {
            return Err(SubmissionError::NotOnFinalStep.into());
        }

        let ctx = self.context();
        match self.submission.begin(&self.fields, &ctx, self.clock.now()) {
            Ok(ticket) => {
                self.errors.clear();
                Ok(ticket)
            }
            Err(SubmissionError::Invalid {
                errors,
                first_invalid_step,
            }) => {
                self.notifier.notify(
                    &format!("Please review {} field(s) before submitting.", errors.len()),
                    NotificationLevel::Warning,
                );
                self.errors = errors.clone();
                Err(SubmissionError::Invalid {
                    errors,
                    first_invalid_step,
                }
                .into())
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Settle a submission started with [`begin_submission`](Self::begin_submission).
    pub fn complete_submission(
        &mut self,
        ticket: SubmissionTicket,
        result: Result<MemberRecord, ServiceError>,
    ) -> Result<SubmissionOutcome, SessionError> {
        let record = match self.submission.resolve(result) {
            Ok(record) => record,
            Err(SubmissionError::Service { error, errors }) => {
                self.notifier
                    .notify(&error.message, NotificationLevel::Error);
                self.errors = errors.clone();
                return Err(SubmissionError::Service { error, errors }.into());
            }
            Err(other) => return Err(other.into()),
        };

        self.discard_draft();
        match self.mode {
            RegistrationMode::Public => {
                self.notifier
                    .notify(WELCOME_MESSAGE, NotificationLevel::Success);

                let email = record
                    .email
                    .clone()
                    .or_else(|| ticket.payload().text("email").map(str::to_string));
                Ok(SubmissionOutcome::Confirmed {
                    route: ConfirmationRoute {
                        path: CONFIRMATION_PATH.to_string(),
                        name: record.display_name(),
                        email,
                    },
                })
            }
            RegistrationMode::Admin => {
                self.notifier.notify(
                    &format!("Member {} created.", record.display_name()),
                    NotificationLevel::Success,
                );
                if let Some(callback) = &self.on_admin_success {
                    callback(&record);
                }
                Ok(SubmissionOutcome::Created { record })
            }
        }
    }

    /// Full submission: validate, call the service once, then settle the result.
    pub async fn submit<M>(&mut self, service: &M) -> Result<SubmissionOutcome, SessionError>
    where
        M: MemberService + ?Sized,
    {
        let ticket = self.begin_submission()?;
        let result = service.create_member(ticket.payload().clone()).await;
        self.complete_submission(ticket, result)
    }

    /// Staff-only reset so the next member can be entered from a blank form.
    pub fn clear_for_next(&mut self) -> Result<(), SessionError> {
        if self.mode != RegistrationMode::Admin {
            return Err(SessionError::AdminOnly("clear for next"));
        }

        self.submission.reset()?;
        self.fields = FieldMap::new();
        self.sequencer = StepSequencer::new();
        self.errors.clear();
        self.discard_draft();
        info!(mode = %self.mode, "registration form cleared for next member");
        Ok(())
    }

    pub fn view(&self) -> WizardView {
        let step = self.sequencer.current_step();
        WizardView {
            mode: self.mode,
            bypass: self.bypass,
            current_step_index: self.sequencer.current_index(),
            current_step: step.id,
            title: step.title,
            completed_step_ids: self.sequencer.completed().to_vec(),
            progress_percent: self.sequencer.progress_percent(),
            remaining_minutes: self.sequencer.remaining_minutes(),
            fields: self.fields.clone(),
            errors: self.errors.clone(),
            family_issues: self.family_issues(),
            expanded_family_member: self.fields.family().expanded().cloned(),
            submission: self.submission.state(),
            autosave_pending: self.autosave.is_pending(),
        }
    }
}

/// Serializable snapshot of a session for API responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardView {
    pub mode: RegistrationMode,
    pub bypass: bool,
    pub current_step_index: usize,
    pub current_step: StepId,
    pub title: &'static str,
    pub completed_step_ids: Vec<StepId>,
    pub progress_percent: u8,
    pub remaining_minutes: u32,
    pub fields: FieldMap,
    pub errors: ErrorMap,
    pub family_issues: BTreeMap<MemberId, ErrorMap>,
    pub expanded_family_member: Option<MemberId>,
    pub submission: SubmissionState,
    pub autosave_pending: bool,
}

/// Error raised by wizard session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Family(#[from] FamilyError),
    #[error("step '{step}' has {} invalid field(s)", .errors.len())]
    StepInvalid { step: StepId, errors: ErrorMap },
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error("{0} is only available to admin sessions")]
    AdminOnly(&'static str),
    #[error("registration session {0} not found")]
    UnknownSession(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
