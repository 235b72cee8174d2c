//! Field schema for the registration form.
//!
//! Every field the wizard accepts is declared here with its owning step, value type, and
//! requirement. Writes, restores, validation, and payload coercion all consult this table
//! instead of probing the field map at runtime.

use super::domain::{FieldValue, StepId};

/// Reserved key holding the family member collection.
pub const FAMILY_MEMBERS_KEY: &str = "familyMembers";

pub const GENDER_OPTIONS: &[&str] = &["male", "female", "other", "prefer_not_to_say"];
pub const MARITAL_STATUS_OPTIONS: &[&str] =
    &["single", "married", "widowed", "divorced", "separated"];
pub const CONTACT_METHOD_OPTIONS: &[&str] = &["email", "phone", "text", "mail"];
pub const PLEDGE_FREQUENCY_OPTIONS: &[&str] =
    &["weekly", "biweekly", "monthly", "quarterly", "annually"];
pub const GIVING_METHOD_OPTIONS: &[&str] = &["cash", "check", "online", "bank_transfer"];

/// Value type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Email,
    Phone,
    Url,
    Choice(&'static [&'static str]),
    /// ISO date that may not lie after today.
    PastDate,
    /// ISO date without a temporal bound.
    Date,
    /// Positive decimal, sent to the backend as a float.
    Amount,
    /// Whole number, sent to the backend as an integer.
    Integer,
    Boolean,
    List,
    FamilyMembers,
}

impl FieldType {
    pub const fn label(self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::List => "list",
            FieldType::FamilyMembers => "family members",
            _ => "text",
        }
    }

    pub fn accepts(self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (FieldType::Boolean, FieldValue::Bool(_))
                | (FieldType::List, FieldValue::List(_))
                | (
                    FieldType::Text
                        | FieldType::Email
                        | FieldType::Phone
                        | FieldType::Url
                        | FieldType::Choice(_)
                        | FieldType::PastDate
                        | FieldType::Date
                        | FieldType::Amount
                        | FieldType::Integer,
                    FieldValue::Text(_)
                )
        )
    }
}

/// When a field must be filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Always,
    /// Required except when an admin has switched the validation bypass on.
    UnlessBypassed,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub step: StepId,
    pub kind: FieldType,
    pub requirement: Requirement,
}

const fn field(
    name: &'static str,
    label: &'static str,
    step: StepId,
    kind: FieldType,
    requirement: Requirement,
) -> FieldSpec {
    FieldSpec {
        name,
        label,
        step,
        kind,
        requirement,
    }
}

use FieldType as T;
use Requirement as R;

static FIELD_SCHEMA: &[FieldSpec] = &[
    field("firstName", "First name", StepId::Personal, T::Text, R::Always),
    field("lastName", "Last name", StepId::Personal, T::Text, R::Always),
    field("email", "Email", StepId::Personal, T::Email, R::Always),
    field("dateOfBirth", "Date of birth", StepId::Personal, T::PastDate, R::UnlessBypassed),
    field("gender", "Gender", StepId::Personal, T::Choice(GENDER_OPTIONS), R::UnlessBypassed),
    field(
        "maritalStatus",
        "Marital status",
        StepId::Personal,
        T::Choice(MARITAL_STATUS_OPTIONS),
        R::Optional,
    ),
    field("occupation", "Occupation", StepId::Personal, T::Text, R::Optional),
    field("phone", "Phone", StepId::Contact, T::Phone, R::UnlessBypassed),
    field("address", "Address", StepId::Contact, T::Text, R::UnlessBypassed),
    field("city", "City", StepId::Contact, T::Text, R::Optional),
    field("state", "State", StepId::Contact, T::Text, R::Optional),
    field("postalCode", "Postal code", StepId::Contact, T::Text, R::Optional),
    field("website", "Website", StepId::Contact, T::Url, R::Optional),
    field(
        "preferredContactMethod",
        "Preferred contact method",
        StepId::Contact,
        T::Choice(CONTACT_METHOD_OPTIONS),
        R::Optional,
    ),
    field("ministryInterests", "Ministry interests", StepId::Ministry, T::List, R::Optional),
    field(
        "volunteerAvailability",
        "Volunteer availability",
        StepId::Ministry,
        T::List,
        R::Optional,
    ),
    field("previousChurch", "Previous church", StepId::Ministry, T::Text, R::Optional),
    field("baptized", "Baptized", StepId::Ministry, T::Boolean, R::Optional),
    field("pledgeAmount", "Pledge amount", StepId::Pledge, T::Amount, R::Optional),
    field(
        "pledgeFrequency",
        "Pledge frequency",
        StepId::Pledge,
        T::Choice(PLEDGE_FREQUENCY_OPTIONS),
        R::Optional,
    ),
    field("pledgeStartDate", "Pledge start date", StepId::Pledge, T::Date, R::Optional),
    field("pledgeEndDate", "Pledge end date", StepId::Pledge, T::Date, R::Optional),
    field(
        "givingMethod",
        "Giving method",
        StepId::Pledge,
        T::Choice(GIVING_METHOD_OPTIONS),
        R::Optional,
    ),
    field(
        "emergencyContactName",
        "Emergency contact name",
        StepId::Family,
        T::Text,
        R::UnlessBypassed,
    ),
    field(
        "emergencyContactPhone",
        "Emergency contact phone",
        StepId::Family,
        T::Phone,
        R::UnlessBypassed,
    ),
    field(
        "emergencyContactRelationship",
        "Emergency contact relationship",
        StepId::Family,
        T::Text,
        R::Optional,
    ),
    field("householdSize", "Household size", StepId::Family, T::Integer, R::Optional),
    field(
        FAMILY_MEMBERS_KEY,
        "Family members",
        StepId::Family,
        T::FamilyMembers,
        R::Optional,
    ),
    field(
        "privacyPolicyAgreed",
        "Privacy policy agreement",
        StepId::Confirmation,
        T::Boolean,
        R::UnlessBypassed,
    ),
    field("photoConsent", "Photo consent", StepId::Confirmation, T::Boolean, R::Optional),
    field(
        "communicationOptIn",
        "Communication opt-in",
        StepId::Confirmation,
        T::Boolean,
        R::Optional,
    ),
    field("howDidYouHear", "How did you hear about us", StepId::Confirmation, T::Text, R::Optional),
];

/// All declared fields in form order.
pub fn field_schema() -> &'static [FieldSpec] {
    FIELD_SCHEMA
}

pub fn lookup(name: &str) -> Option<&'static FieldSpec> {
    FIELD_SCHEMA.iter().find(|spec| spec.name == name)
}

pub fn fields_for_step(step: StepId) -> impl Iterator<Item = &'static FieldSpec> {
    FIELD_SCHEMA.iter().filter(move |spec| spec.step == step)
}

/// Boundary check for a single field write.
pub fn check(name: &str, value: &FieldValue) -> Result<&'static FieldSpec, SchemaError> {
    let spec = lookup(name).ok_or_else(|| SchemaError::UnknownField(name.to_string()))?;

    if spec.kind == FieldType::FamilyMembers {
        return Err(SchemaError::ReservedField(name.to_string()));
    }

    if !spec.kind.accepts(value) {
        return Err(SchemaError::TypeMismatch {
            field: name.to_string(),
            expected: spec.kind.label(),
            found: value.shape(),
        });
    }

    Ok(spec)
}

/// Rejections raised at the field-write boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("'{0}' is not a registration field")]
    UnknownField(String),
    #[error("'{0}' is managed through the family member operations")]
    ReservedField(String),
    #[error("'{field}' expects a {expected} value, got {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}
