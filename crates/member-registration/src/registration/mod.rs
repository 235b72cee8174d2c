//! Multi-step member registration wizard.
//!
//! A session walks a visitor (or a staff member entering someone else) through six pages:
//! personal details, contact, ministry interests, pledge, family, and confirmation. Each page
//! is validated before the next one opens, drafts are autosaved per client and mode, and the
//! final page hands a typed payload to the member-creation service exactly once.

pub mod clock;
pub mod domain;
pub mod family;
pub mod notify;
pub mod persistence;
pub mod router;
pub mod schema;
pub mod sequencer;
pub mod store;
pub mod submission;
pub mod validation;
pub mod wizard;

#[cfg(test)]
mod tests;

pub use clock::{Clock, SystemClock};
pub use domain::{
    FieldMap, FieldValue, MemberRecord, RegistrationDraft, RegistrationMode, StepId,
    StoredFieldError,
};
pub use family::{
    FamilyError, FamilyMember, FamilyMemberCollection, FamilyMemberField, Gender, MemberId,
    Relationship,
};
pub use notify::{NotificationLevel, NotificationSink, TracingNotifier};
pub use persistence::{Autosave, DraftPersistence, DraftPolicy, RestoredDraft, DEFAULT_NAMESPACE};
pub use router::{registration_router, RegistrationService, SessionId};
pub use schema::{FieldSpec, FieldType, Requirement, SchemaError};
pub use sequencer::{StepDefinition, StepSequencer, MINUTES_PER_STEP};
pub use store::{DraftStore, FileDraftStore, MemoryDraftStore, StorageError};
pub use submission::{
    ConfirmationRoute, MemberPayload, MemberService, PayloadValue, ServiceError,
    SubmissionCoordinator, SubmissionError, SubmissionOutcome, SubmissionState,
    SubmissionTicket, CONFIRMATION_PATH,
};
pub use validation::{ErrorMap, FieldIssue, IssueKind, ValidationContext};
pub use wizard::{RegistrationWizard, SessionError, SuccessCallback, WizardView};
