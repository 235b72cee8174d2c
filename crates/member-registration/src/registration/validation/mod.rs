mod rules;
mod steps;

pub use rules::{is_valid_email, parse_amount, parse_iso_date};
pub use steps::{
    validate_confirmation, validate_contact, validate_family, validate_ministry,
    validate_personal, validate_pledge,
};

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::{FieldMap, RegistrationMode, StepId};
use super::schema;

/// Classification of a field problem, so callers can style and route it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Required,
    Format,
    CrossField,
    /// Reported by the member-creation backend.
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub kind: IssueKind,
    pub message: String,
}

/// Field name to problem. An absent key means the field is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorMap(BTreeMap<String, FieldIssue>);

impl ErrorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an issue unless the field already has one; the first problem found wins.
    pub fn insert(&mut self, field: impl Into<String>, kind: IssueKind, message: impl Into<String>) {
        self.0.entry(field.into()).or_insert_with(|| FieldIssue {
            kind,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&FieldIssue> {
        self.0.get(field)
    }

    pub fn message(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(|issue| issue.message.as_str())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldIssue)> {
        self.0.iter().map(|(field, issue)| (field.as_str(), issue))
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldIssue> {
        self.0.remove(field)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn merge(&mut self, other: ErrorMap) {
        for (field, issue) in other.0 {
            self.0.entry(field).or_insert(issue);
        }
    }

    /// First offending field in form order (falls back to name order for unknown fields).
    pub fn first_field(&self) -> Option<&str> {
        schema::field_schema()
            .iter()
            .map(|spec| spec.name)
            .find(|name| self.0.contains_key(*name))
            .or_else(|| self.0.keys().next().map(String::as_str))
    }

    /// Step owning the first offending field, used to send the user back to it.
    pub fn first_step(&self) -> Option<StepId> {
        self.first_field()
            .and_then(schema::lookup)
            .map(|spec| spec.step)
    }
}

/// Parameters shared by every validator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationContext {
    pub mode: RegistrationMode,
    pub bypass: bool,
    pub today: NaiveDate,
}

impl ValidationContext {
    pub fn new(mode: RegistrationMode, bypass: bool, today: NaiveDate) -> Self {
        Self {
            mode,
            bypass,
            today,
        }
    }

    /// The bypass only takes effect for staff sessions; a public caller cannot switch it on.
    pub fn bypass_active(&self) -> bool {
        self.mode == RegistrationMode::Admin && self.bypass
    }
}

/// Signature shared by the per-step validators.
pub type StepValidator = fn(&FieldMap, &ValidationContext) -> ErrorMap;

pub fn validator_for(step: StepId) -> StepValidator {
    match step {
        StepId::Personal => validate_personal,
        StepId::Contact => validate_contact,
        StepId::Ministry => validate_ministry,
        StepId::Pledge => validate_pledge,
        StepId::Family => validate_family,
        StepId::Confirmation => validate_confirmation,
    }
}

pub fn validate_step(step: StepId, fields: &FieldMap, ctx: &ValidationContext) -> ErrorMap {
    validator_for(step)(fields, ctx)
}

/// Union of every step validator over the complete field set.
pub fn validate_all(fields: &FieldMap, ctx: &ValidationContext) -> ErrorMap {
    let mut errors = ErrorMap::new();
    for step in StepId::ALL {
        errors.merge(validate_step(step, fields, ctx));
    }
    errors
}
