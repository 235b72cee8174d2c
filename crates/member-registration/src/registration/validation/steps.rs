use super::super::domain::{FieldMap, StepId};
use super::super::schema::{self, FieldSpec, FieldType};
use super::rules::{check_format, check_required, format_problem, parse_iso_date};
use super::{ErrorMap, IssueKind, ValidationContext};

fn check_step_fields<F>(
    step: StepId,
    fields: &FieldMap,
    ctx: &ValidationContext,
    errors: &mut ErrorMap,
    include: F,
) where
    F: Fn(&FieldSpec) -> bool,
{
    for spec in schema::fields_for_step(step) {
        if spec.kind == FieldType::FamilyMembers || !include(spec) {
            continue;
        }
        check_required(fields, spec, ctx, errors);
        check_format(fields, spec, ctx, errors);
    }
}

/// Names, email, and (unless bypassed) date of birth and gender.
pub fn validate_personal(fields: &FieldMap, ctx: &ValidationContext) -> ErrorMap {
    let mut errors = ErrorMap::new();
    check_step_fields(StepId::Personal, fields, ctx, &mut errors, |_| true);
    errors
}

pub fn validate_contact(fields: &FieldMap, ctx: &ValidationContext) -> ErrorMap {
    let mut errors = ErrorMap::new();
    check_step_fields(StepId::Contact, fields, ctx, &mut errors, |_| true);
    errors
}

/// Ministry interests are entirely optional.
pub fn validate_ministry(_fields: &FieldMap, _ctx: &ValidationContext) -> ErrorMap {
    ErrorMap::new()
}

/// A pledge amount requires a frequency; without an amount the frequency is ignored.
pub fn validate_pledge(fields: &FieldMap, ctx: &ValidationContext) -> ErrorMap {
    let mut errors = ErrorMap::new();
    check_step_fields(StepId::Pledge, fields, ctx, &mut errors, |spec| {
        spec.name != "pledgeFrequency"
    });

    if !fields.is_blank("pledgeAmount") {
        let frequency = fields.text("pledgeFrequency");
        if frequency.is_empty() {
            errors.insert(
                "pledgeFrequency",
                IssueKind::CrossField,
                "Pledge frequency is required when a pledge amount is entered",
            );
        } else if let Some(spec) = schema::lookup("pledgeFrequency") {
            if let Some(message) = format_problem(spec, frequency, ctx.today) {
                errors.insert("pledgeFrequency", IssueKind::Format, message);
            }
        }
    }

    let start = parse_iso_date(fields.text("pledgeStartDate"));
    let end = parse_iso_date(fields.text("pledgeEndDate"));
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            errors.insert(
                "pledgeEndDate",
                IssueKind::CrossField,
                "Pledge end date cannot be before the start date",
            );
        }
    }

    errors
}

/// Emergency contact only. Family member rows are flagged separately and never block.
pub fn validate_family(fields: &FieldMap, ctx: &ValidationContext) -> ErrorMap {
    let mut errors = ErrorMap::new();
    check_step_fields(StepId::Family, fields, ctx, &mut errors, |_| true);
    errors
}

pub fn validate_confirmation(fields: &FieldMap, ctx: &ValidationContext) -> ErrorMap {
    let mut errors = ErrorMap::new();
    check_step_fields(StepId::Confirmation, fields, ctx, &mut errors, |_| true);
    errors
}
