use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::eligibility::CategoryBrackets;
use crate::error::ValidationErrors;
use crate::models::{GuardianContacts, MedicalCondition, ParticipantRecord};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("there is nobody to register")]
    EmptySubmission,
    #[error("participant name is required")]
    MissingName,
    #[error("date of birth is required")]
    MissingDateOfBirth,
    #[error("age is missing")]
    MissingAge,
    #[error("age {age} is outside the eligible window {min}-{max}")]
    AgeOutOfRange { age: u32, min: u32, max: u32 },
    #[error("no category for this age")]
    MissingCategory,
    #[error("a primary contact number is required")]
    MissingPrimaryContact,
    #[error("{field} is not a valid phone number")]
    InvalidPhone { field: &'static str },
    #[error("guardian email is not a valid address")]
    InvalidEmail,
    #[error("describe the 'Other' medical condition")]
    MissingOtherConditionNote,
    #[error("'N/A' cannot be combined with other medical conditions")]
    NotApplicableWithOthers,
    #[error("parental agreement must be accepted")]
    MissingConsent,
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").expect("Invalid email pattern")
    })
}

fn guardian_phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\+?\d{7,15}$").expect("Invalid phone pattern"))
}

fn sibling_phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{8,10}$").expect("Invalid phone pattern"))
}

impl GuardianContacts {
    /// The number the coordinators call first: the explicit primary contact,
    /// else the father's mobile, else the mother's.
    pub fn primary_contact(&self) -> Option<&str> {
        [
            &self.primary_contact_number,
            &self.father_mobile,
            &self.mother_mobile,
        ]
        .into_iter()
        .map(|number| number.trim())
        .find(|number| !number.is_empty())
    }
}

/// Collects every problem with one participant. Primary participants carry
/// the guardian details and consent for the whole family, so they are held to
/// the stricter rules.
pub fn validate(
    record: &ParticipantRecord,
    is_primary: bool,
    brackets: &CategoryBrackets,
) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    if record.participant_name.trim().is_empty() {
        issues.push(ValidationIssue::MissingName);
    }

    match record.age {
        None => issues.push(ValidationIssue::MissingAge),
        Some(age) if !brackets.is_eligible(age) => issues.push(ValidationIssue::AgeOutOfRange {
            age,
            min: brackets.min_age(),
            max: brackets.max_age(),
        }),
        Some(_) => {}
    }

    if record.category.is_none() {
        issues.push(ValidationIssue::MissingCategory);
    }

    let medical = &record.medical;
    if medical.has(MedicalCondition::NotApplicable) && medical.conditions.len() > 1 {
        issues.push(ValidationIssue::NotApplicableWithOthers);
    }
    if medical.has(MedicalCondition::Other) && medical.other_condition.trim().is_empty() {
        issues.push(ValidationIssue::MissingOtherConditionNote);
    }

    if let Some(contact) = record.contact_number.as_deref().map(str::trim) {
        if !contact.is_empty() && !sibling_phone_pattern().is_match(contact) {
            issues.push(ValidationIssue::InvalidPhone {
                field: "contact number",
            });
        }
    }

    if is_primary {
        if record.date_of_birth.is_none() {
            issues.push(ValidationIssue::MissingDateOfBirth);
        }
        check_guardian(&record.guardian, &mut issues);
        if !record.parent_agreement {
            issues.push(ValidationIssue::MissingConsent);
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

fn check_guardian(guardian: &GuardianContacts, issues: &mut Vec<ValidationIssue>) {
    match guardian.primary_contact() {
        None => issues.push(ValidationIssue::MissingPrimaryContact),
        Some(number) if !guardian_phone_pattern().is_match(number) => {
            issues.push(ValidationIssue::InvalidPhone {
                field: "primary contact number",
            });
        }
        Some(_) => {}
    }

    for (field, number) in [
        ("father's mobile", &guardian.father_mobile),
        ("mother's mobile", &guardian.mother_mobile),
    ] {
        let number = number.trim();
        if !number.is_empty() && !guardian_phone_pattern().is_match(number) {
            issues.push(ValidationIssue::InvalidPhone { field });
        }
    }

    let email = guardian.email.trim();
    if !email.is_empty() && !email_pattern().is_match(&email.to_ascii_lowercase()) {
        issues.push(ValidationIssue::InvalidEmail);
    }
}

pub fn is_valid(record: &ParticipantRecord, is_primary: bool, brackets: &CategoryBrackets) -> bool {
    validate(record, is_primary, brackets).is_ok()
}

/// Validates a whole submission; the first record is the primary participant.
/// Either every record passes or every issue is reported.
pub fn validate_batch(
    records: &[ParticipantRecord],
    brackets: &CategoryBrackets,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if records.is_empty() {
        errors.issues.push((0, ValidationIssue::EmptySubmission));
    }
    for (index, record) in records.iter().enumerate() {
        if let Err(issues) = validate(record, index == 0, brackets) {
            errors
                .issues
                .extend(issues.into_iter().map(|issue| (index, issue)));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
