use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use super::validation::{is_valid_email, parse_iso_date, ErrorMap, IssueKind};

/// Age at which a relative stops counting as a child.
pub const ADULT_AGE: i32 = 18;

/// Opaque identifier for a family member row, unique within its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(pub String);

impl MemberId {
    fn generate() -> Self {
        Self(format!("fm-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relationship {
    Spouse,
    Child,
    Parent,
    Sibling,
    Grandparent,
    Grandchild,
    Guardian,
    Dependent,
    Other,
}

impl Relationship {
    pub const ALL: [Relationship; 9] = [
        Relationship::Spouse,
        Relationship::Child,
        Relationship::Parent,
        Relationship::Sibling,
        Relationship::Grandparent,
        Relationship::Grandchild,
        Relationship::Guardian,
        Relationship::Dependent,
        Relationship::Other,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Relationship::Spouse => "spouse",
            Relationship::Child => "child",
            Relationship::Parent => "parent",
            Relationship::Sibling => "sibling",
            Relationship::Grandparent => "grandparent",
            Relationship::Grandchild => "grandchild",
            Relationship::Guardian => "guardian",
            Relationship::Dependent => "dependent",
            Relationship::Other => "other",
        }
    }
}

impl FromStr for Relationship {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|relationship| relationship.as_str().eq_ignore_ascii_case(raw))
            .ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
    PreferNotToSay,
}

impl FromStr for Gender {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            "prefer_not_to_say" => Ok(Gender::PreferNotToSay),
            _ => Err(()),
        }
    }
}

/// Editable attributes of a family member row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FamilyMemberField {
    FirstName,
    LastName,
    Relationship,
    DateOfBirth,
    Gender,
    Email,
    Phone,
    Notes,
}

impl FamilyMemberField {
    pub const fn as_str(self) -> &'static str {
        match self {
            FamilyMemberField::FirstName => "firstName",
            FamilyMemberField::LastName => "lastName",
            FamilyMemberField::Relationship => "relationship",
            FamilyMemberField::DateOfBirth => "dateOfBirth",
            FamilyMemberField::Gender => "gender",
            FamilyMemberField::Email => "email",
            FamilyMemberField::Phone => "phone",
            FamilyMemberField::Notes => "notes",
        }
    }
}

/// A relative registered alongside the member. `is_child` is derived, never accepted as input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyMember {
    id: MemberId,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    relationship: Option<Relationship>,
    #[serde(default)]
    date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    gender: Option<Gender>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(skip_deserializing)]
    is_child: bool,
}

impl FamilyMember {
    fn empty(id: MemberId) -> Self {
        Self {
            id,
            first_name: String::new(),
            last_name: String::new(),
            relationship: None,
            date_of_birth: None,
            gender: None,
            email: None,
            phone: None,
            notes: None,
            is_child: false,
        }
    }

    pub fn id(&self) -> &MemberId {
        &self.id
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn relationship(&self) -> Option<Relationship> {
        self.relationship
    }

    pub fn date_of_birth(&self) -> Option<NaiveDate> {
        self.date_of_birth
    }

    pub fn gender(&self) -> Option<Gender> {
        self.gender
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn is_child(&self) -> bool {
        self.is_child
    }

    pub fn age_on(&self, today: NaiveDate) -> Option<i32> {
        self.date_of_birth.map(|dob| age_on(dob, today))
    }

    fn recompute_is_child(&mut self, today: NaiveDate) {
        let by_relationship = self.relationship == Some(Relationship::Child);
        let by_age = self
            .age_on(today)
            .map(|age| age < ADULT_AGE)
            .unwrap_or(false);
        self.is_child = by_relationship || by_age;
    }

    fn with_field(&self, field: FamilyMemberField, raw: &str) -> Result<Self, FamilyError> {
        let mut next = self.clone();
        let value = raw.trim();
        let invalid = || FamilyError::InvalidValue {
            field: field.as_str(),
            value: value.to_string(),
        };

        match field {
            FamilyMemberField::FirstName => next.first_name = value.to_string(),
            FamilyMemberField::LastName => next.last_name = value.to_string(),
            FamilyMemberField::Relationship => {
                next.relationship = optional(value)
                    .map(|raw| raw.parse().map_err(|_| invalid()))
                    .transpose()?;
            }
            FamilyMemberField::DateOfBirth => {
                next.date_of_birth = optional(value)
                    .map(|raw| parse_iso_date(raw).ok_or_else(invalid))
                    .transpose()?;
            }
            FamilyMemberField::Gender => {
                next.gender = optional(value)
                    .map(|raw| raw.parse().map_err(|_| invalid()))
                    .transpose()?;
            }
            FamilyMemberField::Email => next.email = optional(value).map(str::to_string),
            FamilyMemberField::Phone => next.phone = optional(value).map(str::to_string),
            FamilyMemberField::Notes => next.notes = optional(value).map(str::to_string),
        }

        Ok(next)
    }
}

fn optional(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Whole years between `date_of_birth` and `today`, counting a birthday only once reached.
pub fn age_on(date_of_birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - date_of_birth.year();
    if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
        age -= 1;
    }
    age
}

/// Row-level check used to flag a family member; it never blocks the wizard.
pub fn validate_member(member: &FamilyMember, today: NaiveDate) -> ErrorMap {
    let mut errors = ErrorMap::new();

    if member.first_name.trim().is_empty() {
        errors.insert("firstName", IssueKind::Required, "First name is required");
    }
    if member.last_name.trim().is_empty() {
        errors.insert("lastName", IssueKind::Required, "Last name is required");
    }
    if member.relationship.is_none() {
        errors.insert("relationship", IssueKind::Required, "Relationship is required");
    }
    match member.date_of_birth {
        None => errors.insert("dateOfBirth", IssueKind::Required, "Date of birth is required"),
        Some(dob) if dob > today => errors.insert(
            "dateOfBirth",
            IssueKind::Format,
            "Date of birth cannot be in the future",
        ),
        Some(_) => {}
    }
    if let Some(email) = member.email() {
        if !is_valid_email(email) {
            errors.insert(
                "email",
                IssueKind::Format,
                "Email must look like name@example.org",
            );
        }
    }

    errors
}

/// Ordered family members kept in an arena keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FamilyMemberCollection {
    members: HashMap<MemberId, FamilyMember>,
    order: Vec<MemberId>,
    expanded: Option<MemberId>,
}

impl FamilyMemberCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a collection from stored rows, recomputing derived fields as of `today`.
    pub fn from_members(
        members: Vec<FamilyMember>,
        today: NaiveDate,
    ) -> Result<Self, FamilyError> {
        let mut collection = Self::new();
        for mut member in members {
            if collection.members.contains_key(&member.id) {
                return Err(FamilyError::DuplicateMember(member.id));
            }
            member.recompute_is_child(today);
            collection.order.push(member.id.clone());
            collection.members.insert(member.id.clone(), member);
        }
        Ok(collection)
    }

    /// Append an empty member and expand it for editing.
    pub fn add(&mut self) -> MemberId {
        let mut id = MemberId::generate();
        while self.members.contains_key(&id) {
            id = MemberId::generate();
        }

        self.members
            .insert(id.clone(), FamilyMember::empty(id.clone()));
        self.order.push(id.clone());
        self.expanded = Some(id.clone());
        id
    }

    /// Remove a member; unknown ids are ignored.
    pub fn remove(&mut self, id: &MemberId) -> Option<FamilyMember> {
        let removed = self.members.remove(id)?;
        self.order.retain(|existing| existing != id);
        if self.expanded.as_ref() == Some(id) {
            self.expanded = None;
        }
        Some(removed)
    }

    pub fn update(
        &mut self,
        id: &MemberId,
        field: FamilyMemberField,
        value: &str,
        today: NaiveDate,
    ) -> Result<&FamilyMember, FamilyError> {
        let current = self
            .members
            .get(id)
            .ok_or_else(|| FamilyError::UnknownMember(id.clone()))?;

        let mut next = current.with_field(field, value)?;
        if matches!(
            field,
            FamilyMemberField::Relationship | FamilyMemberField::DateOfBirth
        ) {
            next.recompute_is_child(today);
        }

        let slot = self
            .members
            .get_mut(id)
            .ok_or_else(|| FamilyError::UnknownMember(id.clone()))?;
        *slot = next;
        Ok(&*slot)
    }

    pub fn get(&self, id: &MemberId) -> Option<&FamilyMember> {
        self.members.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FamilyMember> {
        self.order.iter().filter_map(|id| self.members.get(id))
    }

    pub fn ids(&self) -> &[MemberId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn expanded(&self) -> Option<&MemberId> {
        self.expanded.as_ref()
    }

    pub fn expand(&mut self, id: &MemberId) -> bool {
        if self.members.contains_key(id) {
            self.expanded = Some(id.clone());
            true
        } else {
            false
        }
    }

    pub fn collapse(&mut self) {
        self.expanded = None;
    }

    /// Per-row problems keyed by member id; valid rows are omitted.
    pub fn issues(&self, today: NaiveDate) -> BTreeMap<MemberId, ErrorMap> {
        self.iter()
            .map(|member| (member.id.clone(), validate_member(member, today)))
            .filter(|(_, errors)| !errors.is_empty())
            .collect()
    }
}

impl Serialize for FamilyMemberCollection {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FamilyError {
    #[error("family member {0} does not exist")]
    UnknownMember(MemberId),
    #[error("family member {0} appears more than once")]
    DuplicateMember(MemberId),
    #[error("'{value}' is not a valid {field}")]
    InvalidValue { field: &'static str, value: String },
}
