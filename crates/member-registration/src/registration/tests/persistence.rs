use std::sync::Arc;

use chrono::Duration;
use serde_json::json;

use super::common::*;

use crate::registration::domain::{FieldValue, RegistrationDraft, RegistrationMode, StepId};
use crate::registration::family::FamilyMemberField;
use crate::registration::notify::NotificationLevel;
use crate::registration::persistence::{Autosave, DraftPersistence, DraftPolicy};
use crate::registration::sequencer::StepSequencer;
use crate::registration::store::{DraftStore, MemoryDraftStore};

fn draft(mode: RegistrationMode) -> RegistrationDraft {
    RegistrationDraft {
        fields: valid_public_field_map(),
        current_step_index: 2,
        completed_step_ids: vec![StepId::Personal, StepId::Contact],
        timestamp: noon(),
        mode,
    }
}

#[test]
fn slot_keys_are_scoped_by_namespace_and_mode() {
    let persistence = DraftPersistence::with_namespace(
        Arc::new(MemoryDraftStore::new()),
        "kiosk-2",
    );
    assert_eq!(
        persistence.slot_key(RegistrationMode::Public),
        "kiosk-2:registration-draft:public"
    );
    assert_eq!(
        persistence.slot_key(RegistrationMode::Admin),
        "kiosk-2:registration-draft:admin"
    );
}

#[test]
fn saved_draft_restores_fields_and_position() {
    let store = Arc::new(MemoryDraftStore::new());
    let persistence = DraftPersistence::with_namespace(Arc::clone(&store), "kiosk");
    persistence
        .save(&draft(RegistrationMode::Public))
        .expect("draft saved");

    let restored = persistence
        .restore(RegistrationMode::Public, noon(), today())
        .expect("draft restored");
    assert_eq!(restored.fields, valid_public_field_map());
    assert_eq!(restored.sequencer.current_index(), 2);
    assert_eq!(
        restored.sequencer.completed(),
        &[StepId::Personal, StepId::Contact]
    );
    assert_eq!(restored.saved_at, noon());
}

#[test]
fn drafts_expire_after_twenty_four_hours() {
    let persistence =
        DraftPersistence::with_namespace(Arc::new(MemoryDraftStore::new()), "kiosk");
    persistence
        .save(&draft(RegistrationMode::Public))
        .expect("draft saved");

    let almost = noon() + Duration::hours(23) + Duration::minutes(59);
    assert!(persistence
        .restore(RegistrationMode::Public, almost, today())
        .is_some());

    let exactly = noon() + Duration::hours(24);
    assert!(persistence
        .restore(RegistrationMode::Public, exactly, today())
        .is_some());

    let late = noon() + Duration::hours(24) + Duration::minutes(1);
    assert!(persistence
        .restore(RegistrationMode::Public, late, today())
        .is_none());
}

#[test]
fn drafts_stamped_in_the_future_are_not_restored() {
    let store = Arc::new(MemoryDraftStore::new());
    let persistence = DraftPersistence::with_namespace(Arc::clone(&store), "kiosk");
    let mut ahead = draft(RegistrationMode::Public);
    ahead.timestamp = noon() + Duration::hours(1);
    persistence.save(&ahead).expect("draft saved");

    assert!(persistence
        .restore(RegistrationMode::Public, noon(), today())
        .is_none());
    assert!(persistence
        .restore(RegistrationMode::Public, noon() + Duration::hours(1), today())
        .is_some());

    let harness = Harness::new();
    let mut skewed = draft(RegistrationMode::Public);
    skewed.timestamp = noon() + Duration::days(365);
    harness.persistence().save(&skewed).expect("draft saved");
    let wizard = harness.mount(RegistrationMode::Public);
    assert!(wizard.fields().get("firstName").is_none());
    assert_eq!(wizard.current_step(), StepId::Personal);
}

#[test]
fn custom_ttl_is_honored() {
    let persistence =
        DraftPersistence::with_namespace(Arc::new(MemoryDraftStore::new()), "kiosk")
            .with_policy(DraftPolicy {
                ttl: Duration::hours(1),
                ..DraftPolicy::default()
            });
    persistence
        .save(&draft(RegistrationMode::Public))
        .expect("draft saved");

    assert!(persistence
        .restore(RegistrationMode::Public, noon() + Duration::minutes(61), today())
        .is_none());
}

#[test]
fn drafts_from_another_mode_are_ignored() {
    let store = Arc::new(MemoryDraftStore::new());
    let persistence = DraftPersistence::with_namespace(Arc::clone(&store), "kiosk");
    let admin = draft(RegistrationMode::Admin);
    let payload = serde_json::to_string(&admin).expect("serializes");
    store
        .set(&persistence.slot_key(RegistrationMode::Public), payload)
        .expect("planted");

    assert!(persistence
        .restore(RegistrationMode::Public, noon(), today())
        .is_none());
}

#[test]
fn corrupt_drafts_are_discarded() {
    let store = Arc::new(MemoryDraftStore::new());
    let persistence = DraftPersistence::with_namespace(Arc::clone(&store), "kiosk");
    let key = persistence.slot_key(RegistrationMode::Public);

    store.set(&key, "{not json".to_string()).expect("planted");
    assert!(persistence
        .restore(RegistrationMode::Public, noon(), today())
        .is_none());

    let bad_shape = json!({
        "fields": { "baptized": "definitely" },
        "currentStepIndex": 0,
        "completedStepIds": [],
        "timestamp": noon(),
        "mode": "public",
    });
    store.set(&key, bad_shape.to_string()).expect("planted");
    assert!(persistence
        .restore(RegistrationMode::Public, noon(), today())
        .is_none());

    let bad_step = json!({
        "fields": {},
        "currentStepIndex": 9,
        "completedStepIds": [],
        "timestamp": noon(),
        "mode": "public",
    });
    store.set(&key, bad_step.to_string()).expect("planted");
    assert!(persistence
        .restore(RegistrationMode::Public, noon(), today())
        .is_none());
}

#[test]
fn unknown_stored_fields_are_dropped() {
    let store = Arc::new(MemoryDraftStore::new());
    let persistence = DraftPersistence::with_namespace(Arc::clone(&store), "kiosk");
    let stored = json!({
        "fields": {
            "firstName": "Ada",
            "householdSize": 4,
            "legacyNickname": "Countess",
        },
        "currentStepIndex": 1,
        "completedStepIds": ["personal"],
        "timestamp": noon(),
        "mode": "public",
    });
    store
        .set(&persistence.slot_key(RegistrationMode::Public), stored.to_string())
        .expect("planted");

    let restored = persistence
        .restore(RegistrationMode::Public, noon(), today())
        .expect("draft restored");
    assert_eq!(restored.fields.text("firstName"), "Ada");
    assert_eq!(restored.fields.text("householdSize"), "4");
    assert!(restored.fields.get("legacyNickname").is_none());
}

#[test]
fn clear_removes_only_the_mode_slot() {
    let store = Arc::new(MemoryDraftStore::new());
    let persistence = DraftPersistence::with_namespace(Arc::clone(&store), "kiosk");
    persistence
        .save(&draft(RegistrationMode::Public))
        .expect("saved");
    persistence
        .save(&draft(RegistrationMode::Admin))
        .expect("saved");

    persistence
        .clear(RegistrationMode::Public)
        .expect("cleared");
    assert_eq!(store.keys(), vec!["kiosk:registration-draft:admin".to_string()]);
}

#[test]
fn autosave_debounce_uses_the_latest_mutation() {
    let mut autosave = Autosave::new(Duration::seconds(1));
    assert!(!autosave.due(noon()));

    autosave.schedule(noon());
    autosave.schedule(noon() + Duration::milliseconds(800));
    assert!(!autosave.due(noon() + Duration::milliseconds(1_500)));
    assert!(autosave.due(noon() + Duration::milliseconds(1_800)));

    autosave.cancel();
    assert!(!autosave.is_pending());
}

#[test]
fn wizard_autosaves_after_the_debounce_window() {
    let harness = Harness::new();
    let mut wizard = harness.mount(RegistrationMode::Public);

    wizard
        .set_field("firstName", FieldValue::text("Ada"))
        .expect("field accepted");
    assert!(!wizard.flush_autosave(), "window has not elapsed");
    assert!(harness.store.keys().is_empty());

    harness.clock.advance(Duration::milliseconds(600));
    wizard
        .set_field("lastName", FieldValue::text("Lovelace"))
        .expect("field accepted");
    harness.clock.advance(Duration::milliseconds(600));
    assert!(!wizard.flush_autosave(), "second edit pushed the deadline out");

    harness.clock.advance(Duration::milliseconds(400));
    assert!(wizard.flush_autosave());
    assert!(!wizard.autosave().is_pending());
    assert_eq!(
        harness.store.keys(),
        vec!["test-client:registration-draft:public".to_string()]
    );
}

#[test]
fn mounting_restores_the_draft_with_a_notice() {
    let harness = Harness::new();
    let mut first = harness.mount(RegistrationMode::Public);
    first
        .set_fields(valid_public_fields())
        .expect("fields accepted");
    first.next().expect("advances");
    let member = first.add_family_member();
    first
        .update_family_member(&member, FamilyMemberField::Relationship, "child")
        .expect("relationship accepted");
    first.save_now().expect("saved");

    harness.clock.advance(Duration::hours(3));
    let restored = harness.mount(RegistrationMode::Public);
    assert_eq!(restored.current_step(), StepId::Contact);
    assert_eq!(restored.fields().text("email"), "ada@example.org");
    let family = restored.fields().family();
    assert_eq!(family.len(), 1);
    assert!(family.get(&member).expect("member restored").is_child());
    assert!(harness.notifier.events().contains(&(
        "Your saved progress has been restored.".to_string(),
        NotificationLevel::Info
    )));

    let admin = harness.mount(RegistrationMode::Admin);
    assert_eq!(admin.current_step(), StepId::Personal);
    assert!(admin.fields().get("email").is_none());
}

#[test]
fn restored_sequencer_matches_a_fresh_one_when_slot_is_empty() {
    let persistence =
        DraftPersistence::with_namespace(Arc::new(MemoryDraftStore::new()), "kiosk");
    assert!(persistence
        .restore(RegistrationMode::Public, noon(), today())
        .is_none());
    assert_eq!(StepSequencer::default(), StepSequencer::new());
}
