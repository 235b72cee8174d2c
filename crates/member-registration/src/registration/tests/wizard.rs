use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Duration;

use super::common::*;

use crate::registration::domain::{FieldValue, RegistrationMode, StepId};
use crate::registration::notify::NotificationLevel;
use crate::registration::submission::{
    ServiceError, SubmissionError, SubmissionOutcome, SubmissionState, CONFIRMATION_PATH,
};
use crate::registration::wizard::SessionError;

#[tokio::test]
async fn valid_public_run_submits_once_and_clears_the_draft() {
    let harness = Harness::new();
    let mut wizard = harness.mount(RegistrationMode::Public);
    advance_to_confirmation(&mut wizard);
    wizard.save_now().expect("draft saved");
    assert_eq!(harness.store.keys().len(), 1);

    let service = RecordingMemberService::default();
    let outcome = wizard.submit(&service).await.expect("submission succeeds");

    assert_eq!(service.calls(), 1);
    match outcome {
        SubmissionOutcome::Confirmed { route } => {
            assert_eq!(route.path, CONFIRMATION_PATH);
            assert_eq!(route.name, "Ada Lovelace");
            assert_eq!(route.email.as_deref(), Some("ada@example.org"));
        }
        other => panic!("expected Confirmed, got {other:?}"),
    }
    assert_eq!(wizard.submission_state(), SubmissionState::Succeeded);
    assert!(harness.store.keys().is_empty());
    assert!(!wizard.autosave().is_pending());
    assert_eq!(
        harness.notifier.levels().last(),
        Some(&NotificationLevel::Success)
    );

    match wizard.submit(&service).await {
        Err(SessionError::Submission(SubmissionError::AlreadySubmitted)) => {}
        other => panic!("expected AlreadySubmitted, got {other:?}"),
    }
    assert_eq!(service.calls(), 1);
}

#[tokio::test]
async fn submission_is_refused_before_the_confirmation_step() {
    let harness = Harness::new();
    let mut wizard = harness.mount(RegistrationMode::Public);
    wizard
        .set_fields(valid_public_fields())
        .expect("fields accepted");

    let service = RecordingMemberService::default();
    match wizard.submit(&service).await {
        Err(SessionError::Submission(SubmissionError::NotOnFinalStep)) => {}
        other => panic!("expected NotOnFinalStep, got {other:?}"),
    }
    assert_eq!(service.calls(), 0);
    assert_eq!(wizard.submission_state(), SubmissionState::Idle);
}

#[test]
fn blocked_step_surfaces_errors_and_a_warning() {
    let harness = Harness::new();
    let mut wizard = harness.mount(RegistrationMode::Public);
    wizard
        .set_field("firstName", FieldValue::text("Ada"))
        .expect("field accepted");

    match wizard.next() {
        Err(SessionError::StepInvalid { step, errors }) => {
            assert_eq!(step, StepId::Personal);
            assert!(errors.contains("lastName"));
            assert!(!errors.contains("firstName"));
        }
        other => panic!("expected StepInvalid, got {other:?}"),
    }
    assert_eq!(wizard.current_step(), StepId::Personal);
    assert!(wizard.errors().contains("email"));
    assert_eq!(
        harness.notifier.events().last(),
        Some(&(
            "Please fix 4 field(s) before continuing.".to_string(),
            NotificationLevel::Warning
        ))
    );

    wizard
        .set_field("email", FieldValue::text("ada@example.org"))
        .expect("field accepted");
    assert!(!wizard.errors().contains("email"), "editing clears the inline error");
    assert!(wizard.errors().contains("lastName"));
}

#[test]
fn invalid_batches_are_not_partially_applied() {
    let harness = Harness::new();
    let mut wizard = harness.mount(RegistrationMode::Public);

    let mut values = BTreeMap::new();
    values.insert("firstName".to_string(), FieldValue::text("Ada"));
    values.insert("baptized".to_string(), FieldValue::text("yes"));
    match wizard.set_fields(values) {
        Err(SessionError::Schema(_)) => {}
        other => panic!("expected Schema, got {other:?}"),
    }
    assert!(wizard.fields().get("firstName").is_none());
    assert!(!wizard.autosave().is_pending());
}

#[test]
fn bypass_is_reserved_for_admin_sessions() {
    let harness = Harness::new();
    let mut public = harness.mount(RegistrationMode::Public);
    match public.set_bypass(true) {
        Err(SessionError::AdminOnly(_)) => {}
        other => panic!("expected AdminOnly, got {other:?}"),
    }
    assert!(!public.bypass());

    let mut admin = harness.mount(RegistrationMode::Admin);
    admin.set_bypass(true).expect("admin may bypass");
    admin.set_bypass(true).expect("idempotent");
    assert!(admin.bypass());
    let warnings = harness
        .notifier
        .levels()
        .into_iter()
        .filter(|level| *level == NotificationLevel::Warning)
        .count();
    assert_eq!(warnings, 1);

    admin.set_bypass(false).expect("admin may turn bypass off");
    assert!(!admin.bypass());
    assert_eq!(
        harness.notifier.levels().last(),
        Some(&NotificationLevel::Info)
    );
}

#[tokio::test]
async fn bypassed_admin_entry_reaches_the_service_and_callback() {
    let harness = Harness::new();
    let created = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&created);
    let mut wizard = harness
        .mount(RegistrationMode::Admin)
        .with_admin_success(move |record| {
            sink.lock().expect("callback mutex").push(record.id.clone());
        });

    wizard.set_bypass(true).expect("bypass enabled");
    for (name, value) in [
        ("firstName", "A"),
        ("lastName", "B"),
        ("email", "a@b.com"),
        ("dateOfBirth", ""),
    ] {
        wizard
            .set_field(name, FieldValue::text(value))
            .expect("field accepted");
    }
    while !wizard.sequencer().is_terminal() {
        wizard.next().expect("bypassed steps advance");
    }

    let service = RecordingMemberService::default();
    match wizard.submit(&service).await {
        Ok(SubmissionOutcome::Created { record }) => {
            assert_eq!(record.id, "mbr-001");
            assert_eq!(record.display_name(), "A B");
        }
        other => panic!("expected Created, got {other:?}"),
    }
    assert_eq!(
        created.lock().expect("callback mutex").as_slice(),
        &["mbr-001".to_string()]
    );
    assert_eq!(service.payloads()[0].mode, RegistrationMode::Admin);
}

#[tokio::test]
async fn service_failure_keeps_the_draft_and_reports_errors() {
    let harness = Harness::new();
    let mut wizard = harness.mount(RegistrationMode::Public);
    advance_to_confirmation(&mut wizard);
    wizard.save_now().expect("draft saved");

    let service = RecordingMemberService::failing(
        ServiceError::new("Email already registered")
            .with_field_error("email", "This email is already in use"),
    );
    match wizard.submit(&service).await {
        Err(SessionError::Submission(SubmissionError::Service { errors, .. })) => {
            assert!(errors.contains("email"));
        }
        other => panic!("expected Service, got {other:?}"),
    }

    assert_eq!(wizard.submission_state(), SubmissionState::Failed);
    assert_eq!(
        wizard.errors().message("email"),
        Some("This email is already in use")
    );
    assert_eq!(harness.store.keys().len(), 1, "draft survives a failure");
    assert_eq!(
        harness.notifier.events().last(),
        Some(&(
            "Email already registered".to_string(),
            NotificationLevel::Error
        ))
    );
}

#[tokio::test]
async fn clear_for_next_resets_an_admin_session() {
    let harness = Harness::new();
    let mut wizard = harness.mount(RegistrationMode::Admin);
    advance_to_confirmation(&mut wizard);
    let service = RecordingMemberService::default();
    wizard.submit(&service).await.expect("created");

    wizard.clear_for_next().expect("reset allowed");
    assert_eq!(wizard.current_step(), StepId::Personal);
    assert!(wizard.fields().get("firstName").is_none());
    assert!(wizard.sequencer().completed().is_empty());
    assert_eq!(wizard.submission_state(), SubmissionState::Idle);

    let mut public = harness.mount(RegistrationMode::Public);
    match public.clear_for_next() {
        Err(SessionError::AdminOnly(_)) => {}
        other => panic!("expected AdminOnly, got {other:?}"),
    }
}

#[test]
fn view_reports_progress_and_family_state() {
    let harness = Harness::new();
    let mut wizard = harness.mount(RegistrationMode::Public);
    wizard
        .set_fields(valid_public_fields())
        .expect("fields accepted");
    wizard.next().expect("advances");
    let member = wizard.add_family_member();

    let view = wizard.view();
    assert_eq!(view.current_step, StepId::Contact);
    assert_eq!(view.title, "Contact Details");
    assert_eq!(view.completed_step_ids, vec![StepId::Personal]);
    assert_eq!(view.progress_percent, 16);
    assert_eq!(view.remaining_minutes, 10);
    assert_eq!(view.expanded_family_member, Some(member.clone()));
    assert!(view.family_issues.contains_key(&member));
    assert!(view.autosave_pending);

    let json = serde_json::to_value(&view).expect("serializes");
    assert_eq!(json["currentStep"], "contact");
    assert_eq!(json["submission"], "idle");
    assert_eq!(json["fields"]["firstName"], "Ada");
    assert_eq!(json["fields"]["familyMembers"][0]["id"], member.0.as_str());
}

#[tokio::test]
async fn admin_success_discards_the_draft_so_the_next_mount_is_blank() {
    let harness = Harness::new();
    let mut wizard = harness.mount(RegistrationMode::Admin);
    wizard.set_bypass(true).expect("bypass enabled");
    for (name, value) in [("firstName", "A"), ("lastName", "B"), ("email", "a@b.com")] {
        wizard
            .set_field(name, FieldValue::text(value))
            .expect("field accepted");
    }
    while !wizard.sequencer().is_terminal() {
        wizard.next().expect("bypassed steps advance");
    }
    wizard.save_now().expect("draft saved");
    wizard
        .set_field("occupation", FieldValue::text("Engineer"))
        .expect("field accepted");
    assert!(wizard.autosave().is_pending());

    let service = RecordingMemberService::default();
    wizard.submit(&service).await.expect("member created");
    assert!(!wizard.autosave().is_pending());
    assert!(harness.store.keys().is_empty());

    harness.clock.advance(Duration::seconds(2));
    assert!(!wizard.flush_autosave());
    assert!(harness.store.keys().is_empty());

    let next = harness.mount(RegistrationMode::Admin);
    assert!(next.fields().get("firstName").is_none());
    assert_eq!(next.current_step(), StepId::Personal);
    assert!(!harness
        .notifier
        .events()
        .iter()
        .any(|(message, _)| message.contains("restored")));
}

#[tokio::test]
async fn edits_after_a_public_success_are_not_written_back() {
    let harness = Harness::new();
    let mut wizard = harness.mount(RegistrationMode::Public);
    advance_to_confirmation(&mut wizard);
    let service = RecordingMemberService::default();
    wizard.submit(&service).await.expect("registration succeeds");

    wizard
        .set_field("occupation", FieldValue::text("Engineer"))
        .expect("field accepted");
    wizard.previous();
    wizard.add_family_member();
    assert!(!wizard.autosave().is_pending());

    harness.clock.advance(Duration::seconds(2));
    assert!(!wizard.flush_autosave());
    wizard.save_now().expect("explicit save is a no-op");
    assert!(harness.store.keys().is_empty());
}
