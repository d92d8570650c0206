use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::eligibility::{self, CategoryBrackets};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Kids bracket.
    Junior,
    /// Teens bracket.
    Senior,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Junior => "junior",
            Self::Senior => "senior",
        }
    }

    /// Label printed on the ID card and roster.
    pub fn label(self) -> &'static str {
        match self {
            Self::Junior => "Kids",
            Self::Senior => "Teens",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "junior" | "kids" => Ok(Self::Junior),
            "senior" | "teens" | "teen" => Ok(Self::Senior),
            other => Err(format!("unknown category '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MedicalCondition {
    #[serde(rename = "N/A")]
    NotApplicable,
    Asthma,
    Diabetes,
    Allergies,
    Epilepsy,
    Other,
}

impl MedicalCondition {
    pub const ALL: [MedicalCondition; 6] = [
        Self::NotApplicable,
        Self::Asthma,
        Self::Diabetes,
        Self::Allergies,
        Self::Epilepsy,
        Self::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotApplicable => "N/A",
            Self::Asthma => "Asthma",
            Self::Diabetes => "Diabetes",
            Self::Allergies => "Allergies",
            Self::Epilepsy => "Epilepsy",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for MedicalCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MedicalCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|condition| condition.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown medical condition '{wanted}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MedicalProfile {
    pub conditions: BTreeSet<MedicalCondition>,
    /// Required when `conditions` contains `Other`.
    pub other_condition: String,
    pub medical_notes: String,
}

impl MedicalProfile {
    pub fn not_applicable() -> Self {
        Self {
            conditions: BTreeSet::from([MedicalCondition::NotApplicable]),
            ..Self::default()
        }
    }

    pub fn has(&self, condition: MedicalCondition) -> bool {
        self.conditions.contains(&condition)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardianContacts {
    pub father_name: String,
    pub mother_name: String,
    pub father_mobile: String,
    pub mother_mobile: String,
    pub email: String,
    pub residence: String,
    pub primary_contact_number: String,
    pub primary_contact_relationship: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantRecord {
    pub participant_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub age: Option<u32>,
    pub category: Option<Category>,
    pub guardian: GuardianContacts,
    /// A sibling's own phone number.
    pub contact_number: Option<String>,
    pub medical: MedicalProfile,
    pub parent_agreement: bool,
    pub parent_signature: String,
}

impl ParticipantRecord {
    /// Sets the age and recomputes the category from it.
    pub fn with_age(self, age: Option<u32>, brackets: &CategoryBrackets) -> Self {
        Self {
            age,
            category: age.and_then(|age| eligibility::derive_category(age, brackets)),
            ..self
        }
    }

    /// Sets the date of birth and recomputes age and category from it.
    pub fn with_date_of_birth(
        self,
        date_of_birth: Option<NaiveDate>,
        today: NaiveDate,
        brackets: &CategoryBrackets,
    ) -> Self {
        let age = date_of_birth.and_then(|dob| eligibility::derive_age(dob, today));
        Self {
            date_of_birth,
            ..self
        }
        .with_age(age, brackets)
    }
}

/// Opaque handle assigned by the store after a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub Uuid);

impl DocId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DocId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A record with its identifier assigned, ready to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub student_id: String,
    pub family_id: String,
    pub sequence: u64,
    pub is_primary: bool,
    pub record: ParticipantRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    pub doc_id: DocId,
    pub student_id: String,
    pub family_id: String,
    pub sequence: u64,
    pub is_primary: bool,
    #[serde(flatten)]
    pub record: ParticipantRecord,
    pub created_at: DateTime<Utc>,
    pub id_generated: bool,
    pub generated_id: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
}

/// Fields written once the ID card image exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdCardMarker {
    pub generated_id: String,
    pub generated_at: DateTime<Utc>,
}

/// What the ID card screen receives after a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdCardHandoff {
    pub form_data: PersistedRecord,
    pub siblings: Vec<PersistedRecord>,
}

impl IdCardHandoff {
    pub fn participants(&self) -> impl Iterator<Item = &PersistedRecord> {
        std::iter::once(&self.form_data).chain(self.siblings.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySummary {
    pub category: Option<Category>,
    pub count: usize,
    pub pending_cards: usize,
}
