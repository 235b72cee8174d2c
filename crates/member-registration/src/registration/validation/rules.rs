use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use super::super::domain::{FieldMap, FieldValue};
use super::super::schema::{FieldSpec, FieldType, Requirement};
use super::{ErrorMap, IssueKind, ValidationContext};

const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

fn email_regex() -> &'static Regex {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    EMAIL_REGEX.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"))
}

fn phone_regex() -> &'static Regex {
    static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
    PHONE_REGEX.get_or_init(|| Regex::new(r"^\+?[0-9()\s.\-]{7,20}$").expect("valid regex"))
}

fn url_regex() -> &'static Regex {
    static URL_REGEX: OnceLock<Regex> = OnceLock::new();
    URL_REGEX.get_or_init(|| {
        Regex::new(r"^https?://[^\s/$.?#]+\.[^\s/?#]+(?:[/?#]\S*)?$").expect("valid regex")
    })
}

pub fn is_valid_email(raw: &str) -> bool {
    email_regex().is_match(raw.trim())
}

pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), ISO_DATE_FORMAT).ok()
}

/// Whether the field must be filled in under the given context.
pub(crate) fn is_required(spec: &FieldSpec, ctx: &ValidationContext) -> bool {
    match spec.requirement {
        Requirement::Always => true,
        Requirement::UnlessBypassed => !ctx.bypass_active(),
        Requirement::Optional => false,
    }
}

pub(crate) fn check_required(
    fields: &FieldMap,
    spec: &FieldSpec,
    ctx: &ValidationContext,
    errors: &mut ErrorMap,
) {
    if !is_required(spec, ctx) || !fields.is_blank(spec.name) {
        return;
    }

    let message = match spec.kind {
        FieldType::Boolean => format!("{} must be accepted", spec.label),
        _ => format!("{} is required", spec.label),
    };
    errors.insert(spec.name, IssueKind::Required, message);
}

/// Shape check for a non-empty value; applies whether or not the field is required.
pub(crate) fn check_format(
    fields: &FieldMap,
    spec: &FieldSpec,
    ctx: &ValidationContext,
    errors: &mut ErrorMap,
) {
    let Some(FieldValue::Text(raw)) = fields.get(spec.name) else {
        return;
    };
    let value = raw.trim();
    if value.is_empty() {
        return;
    }

    if let Some(message) = format_problem(spec, value, ctx.today) {
        errors.insert(spec.name, IssueKind::Format, message);
    }
}

pub(crate) fn format_problem(spec: &FieldSpec, value: &str, today: NaiveDate) -> Option<String> {
    match spec.kind {
        FieldType::Email if !is_valid_email(value) => {
            Some(format!("{} must look like name@example.org", spec.label))
        }
        FieldType::Phone if !phone_regex().is_match(value) => {
            Some(format!("{} must be a valid phone number", spec.label))
        }
        FieldType::Url if !url_regex().is_match(value) => {
            Some(format!("{} must be a valid http(s) address", spec.label))
        }
        FieldType::Choice(options) if !options.contains(&value) => Some(format!(
            "{} must be one of: {}",
            spec.label,
            options.join(", ")
        )),
        FieldType::PastDate => match parse_iso_date(value) {
            None => Some(format!("{} must be a date (YYYY-MM-DD)", spec.label)),
            Some(date) if date > today => Some(format!("{} cannot be in the future", spec.label)),
            Some(_) => None,
        },
        FieldType::Date if parse_iso_date(value).is_none() => {
            Some(format!("{} must be a date (YYYY-MM-DD)", spec.label))
        }
        FieldType::Amount => match parse_amount(value) {
            Some(amount) if amount > 0.0 => None,
            _ => Some(format!("{} must be a positive amount", spec.label)),
        },
        FieldType::Integer => match value.parse::<i64>() {
            Ok(number) if number >= 0 => None,
            _ => Some(format!("{} must be a whole number", spec.label)),
        },
        _ => None,
    }
}

/// Parse a currency-style amount, tolerating a leading `$` and thousands separators.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|ch| *ch != ',')
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|amount| amount.is_finite())
}
