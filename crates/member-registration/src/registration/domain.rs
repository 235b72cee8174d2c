use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::family::{FamilyError, FamilyMember, FamilyMemberCollection};
use super::schema::{self, SchemaError, FAMILY_MEMBERS_KEY};

/// Which intake path a wizard session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationMode {
    /// Self-service registration by a visitor.
    Public,
    /// Staff registering a member on someone's behalf.
    Admin,
}

impl RegistrationMode {
    pub const fn label(self) -> &'static str {
        match self {
            RegistrationMode::Public => "public",
            RegistrationMode::Admin => "admin",
        }
    }
}

impl fmt::Display for RegistrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The six wizard pages, in presentation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepId {
    Personal,
    Contact,
    Ministry,
    Pledge,
    Family,
    Confirmation,
}

impl StepId {
    pub const ALL: [StepId; 6] = [
        StepId::Personal,
        StepId::Contact,
        StepId::Ministry,
        StepId::Pledge,
        StepId::Family,
        StepId::Confirmation,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            StepId::Personal => "personal",
            StepId::Contact => "contact",
            StepId::Ministry => "ministry",
            StepId::Pledge => "pledge",
            StepId::Family => "family",
            StepId::Confirmation => "confirmation",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == raw.trim())
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single form value. Numbers travel as text until payload assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Accept loosely-typed JSON input, turning bare numbers into their text form.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Bool(flag) => Some(Self::Bool(flag)),
            Value::String(text) => Some(Self::Text(text)),
            Value::Number(number) => Some(Self::Text(number.to_string())),
            Value::Null => Some(Self::Text(String::new())),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(text) => Some(text),
                    Value::Number(number) => Some(number.to_string()),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(Self::List),
            Value::Object(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Empty text, an unchecked box, or an empty list all count as "not provided".
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Bool(flag) => !flag,
            FieldValue::Text(text) => text.trim().is_empty(),
            FieldValue::List(items) => items.iter().all(|item| item.trim().is_empty()),
        }
    }

    pub(crate) const fn shape(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "boolean",
            FieldValue::Text(_) => "text",
            FieldValue::List(_) => "list",
        }
    }
}

/// Shared form state for every step. Writes go through the field schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldMap {
    #[serde(flatten)]
    values: BTreeMap<String, FieldValue>,
    #[serde(rename = "familyMembers")]
    family_members: FamilyMemberCollection,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Trimmed text of a field, empty when unset or not textual.
    pub fn text(&self, name: &str) -> &str {
        self.values
            .get(name)
            .and_then(FieldValue::as_text)
            .map(str::trim)
            .unwrap_or_default()
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(FieldValue::Bool(true)))
    }

    pub fn is_blank(&self, name: &str) -> bool {
        self.values.get(name).map_or(true, FieldValue::is_blank)
    }

    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<(), SchemaError> {
        schema::check(name, &value)?;
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.values.remove(name)
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn family(&self) -> &FamilyMemberCollection {
        &self.family_members
    }

    pub fn family_mut(&mut self) -> &mut FamilyMemberCollection {
        &mut self.family_members
    }

    /// Rebuild a field map from persisted JSON, keeping only schema-recognized fields.
    ///
    /// A recognized field with the wrong shape, or a malformed family list, rejects the whole
    /// map so a draft is never half-restored.
    pub fn from_stored(
        stored: serde_json::Map<String, Value>,
        today: NaiveDate,
    ) -> Result<Self, StoredFieldError> {
        let mut fields = FieldMap::new();

        for (name, raw) in stored {
            if name == FAMILY_MEMBERS_KEY {
                let members: Vec<FamilyMember> = serde_json::from_value(raw)
                    .map_err(|err| StoredFieldError::Family(err.to_string()))?;
                fields.family_members = FamilyMemberCollection::from_members(members, today)?;
                continue;
            }

            if schema::lookup(&name).is_none() {
                continue;
            }

            let value = FieldValue::from_json(raw)
                .ok_or_else(|| StoredFieldError::Shape(name.clone()))?;
            fields.set(&name, value)?;
        }

        Ok(fields)
    }
}

/// Reasons a persisted field map could not be taken over.
#[derive(Debug, thiserror::Error)]
pub enum StoredFieldError {
    #[error("stored field '{0}' has an unsupported shape")]
    Shape(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("stored family members are malformed: {0}")]
    Family(String),
    #[error(transparent)]
    Collection(#[from] FamilyError),
}

/// Snapshot of an in-progress registration, as written to draft storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationDraft {
    pub fields: FieldMap,
    pub current_step_index: usize,
    pub completed_step_ids: Vec<StepId>,
    pub timestamp: DateTime<Utc>,
    pub mode: RegistrationMode,
}

/// Record returned by the member-creation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MemberRecord {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}
