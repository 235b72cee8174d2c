use crate::infra::InMemoryMemberService;
use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::Args;
use member_registration::error::AppError;
use member_registration::registration::{
    Clock, DraftPersistence, FamilyMemberField, FieldValue, MemberService, MemoryDraftStore,
    NotificationLevel, NotificationSink, RegistrationMode, RegistrationWizard, SessionError,
    SubmissionOutcome,
};
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Registration date (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Skip the staff entry portion of the demo.
    #[arg(long)]
    pub(crate) skip_admin: bool,
    /// Print the payload sent to the member service.
    #[arg(long)]
    pub(crate) show_payload: bool,
}

struct ConsoleNotifier;

impl NotificationSink for ConsoleNotifier {
    fn notify(&self, message: &str, level: NotificationLevel) {
        println!("  [{}] {}", level.label(), message);
    }
}

struct DemoClock {
    now: DateTime<Utc>,
}

impl Clock for DemoClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

type DemoWizard = RegistrationWizard<MemoryDraftStore, ConsoleNotifier>;

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        today,
        skip_admin,
        show_payload,
    } = args;

    let today = today.unwrap_or_else(|| Local::now().date_naive());
    let now = today
        .and_hms_opt(12, 0, 0)
        .map(|noon| noon.and_utc())
        .unwrap_or_else(Utc::now);
    let clock: Arc<dyn Clock> = Arc::new(DemoClock { now });
    let store = Arc::new(MemoryDraftStore::new());
    let notifier = Arc::new(ConsoleNotifier);
    let members = InMemoryMemberService::default();

    println!("Member registration demo ({today})");
    println!("\nPublic self-registration");
    let mut wizard: DemoWizard = RegistrationWizard::mount(
        RegistrationMode::Public,
        DraftPersistence::with_namespace(Arc::clone(&store), "demo-kiosk"),
        Arc::clone(&notifier),
        Arc::clone(&clock),
    );

    if let Err(SessionError::StepInvalid { step, errors }) = wizard.next() {
        println!("- Advancing from '{step}' with an empty form is blocked:");
        for (field, issue) in errors.iter() {
            println!("    {field}: {}", issue.message);
        }
    }

    fill_public_registration(&mut wizard)?;
    wizard.save_now().map_err(SessionError::from)?;
    println!(
        "- Draft saved at step {} ({}% complete)",
        wizard.current_step(),
        wizard.sequencer().progress_percent()
    );

    let mut resumed: DemoWizard = RegistrationWizard::mount(
        RegistrationMode::Public,
        DraftPersistence::with_namespace(Arc::clone(&store), "demo-kiosk"),
        Arc::clone(&notifier),
        Arc::clone(&clock),
    );
    println!(
        "- Reopened session resumes at step {} with {} family member(s)",
        resumed.current_step(),
        resumed.fields().family().len()
    );

    resumed.set_field("privacyPolicyAgreed", FieldValue::Bool(true))?;
    resumed.set_field("communicationOptIn", FieldValue::Bool(true))?;
    resumed.next()?;

    if show_payload {
        let ticket = resumed.begin_submission()?;
        match serde_json::to_string_pretty(ticket.payload()) {
            Ok(json) => println!("  Member payload:\n{json}"),
            Err(err) => println!("  Member payload unavailable: {err}"),
        }
        let result = members.create_member(ticket.payload().clone()).await;
        report_outcome(resumed.complete_submission(ticket, result));
    } else {
        report_outcome(resumed.submit(&members).await);
    }

    if skip_admin {
        return Ok(());
    }

    println!("\nStaff entry with validation bypass");
    let mut admin: DemoWizard = RegistrationWizard::mount(
        RegistrationMode::Admin,
        DraftPersistence::with_namespace(Arc::clone(&store), "front-office"),
        Arc::clone(&notifier),
        Arc::clone(&clock),
    )
    .with_admin_success(|record| {
        println!("  Callback received member {} ({})", record.id, record.display_name());
    });

    admin.set_bypass(true)?;
    admin.set_field("firstName", FieldValue::text("Grace"))?;
    admin.set_field("lastName", FieldValue::text("Hopper"))?;
    admin.set_field("email", FieldValue::text("grace@example.org"))?;
    while !admin.sequencer().is_terminal() {
        admin.next()?;
    }
    report_outcome(admin.submit(&members).await);
    admin.clear_for_next()?;
    println!(
        "- Form cleared for the next member (step {})",
        admin.current_step()
    );

    println!("\nMembers on file: {}", members.records().len());
    Ok(())
}

fn fill_public_registration(wizard: &mut DemoWizard) -> Result<(), SessionError> {
    wizard.set_field("firstName", FieldValue::text("Ada"))?;
    wizard.set_field("lastName", FieldValue::text("Lovelace"))?;
    wizard.set_field("email", FieldValue::text("ada@example.org"))?;
    wizard.set_field("dateOfBirth", FieldValue::text("1985-12-10"))?;
    wizard.set_field("gender", FieldValue::text("female"))?;
    wizard.next()?;

    wizard.set_field("phone", FieldValue::text("+1 515 555 0100"))?;
    wizard.set_field("address", FieldValue::text("12 Chapel Street"))?;
    wizard.set_field("preferredContactMethod", FieldValue::text("email"))?;
    wizard.next()?;

    wizard.set_field(
        "ministryInterests",
        FieldValue::List(vec!["choir".to_string(), "youth".to_string()]),
    )?;
    wizard.next()?;

    wizard.set_field("pledgeAmount", FieldValue::text("50"))?;
    if let Err(SessionError::StepInvalid { errors, .. }) = wizard.next() {
        if let Some(message) = errors.message("pledgeFrequency") {
            println!("- Pledge check: {message}");
        }
    }
    wizard.set_field("pledgeFrequency", FieldValue::text("monthly"))?;
    wizard.next()?;

    let child = wizard.add_family_member();
    wizard.update_family_member(&child, FamilyMemberField::FirstName, "Byron")?;
    wizard.update_family_member(&child, FamilyMemberField::LastName, "Lovelace")?;
    wizard.update_family_member(&child, FamilyMemberField::Relationship, "child")?;
    let member =
        wizard.update_family_member(&child, FamilyMemberField::DateOfBirth, "2015-05-01")?;
    println!(
        "- Family member {} added (child: {})",
        member.first_name(),
        member.is_child()
    );
    wizard.set_field("emergencyContactName", FieldValue::text("Mary Somerville"))?;
    wizard.set_field("emergencyContactPhone", FieldValue::text("515-555-0199"))?;
    wizard.next()?;
    Ok(())
}

fn report_outcome(outcome: Result<SubmissionOutcome, SessionError>) {
    match outcome {
        Ok(SubmissionOutcome::Confirmed { route }) => println!(
            "- Confirmed: {} -> {} ({})",
            route.name,
            route.path,
            route.email.as_deref().unwrap_or("no email")
        ),
        Ok(SubmissionOutcome::Created { record }) => {
            println!("- Created member {} for staff review", record.id)
        }
        Err(err) => println!("- Submission failed: {err}"),
    }
}
