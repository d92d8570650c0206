//! Registration form state.
//!
//! The form is an immutable value: every user action is a [`FormEvent`] and
//! [`RegistrationForm::apply`] returns the next form. Age and category are
//! never edited directly; they are recomputed whenever the date of birth (or a
//! sibling's age) changes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::eligibility::CategoryBrackets;
use crate::models::{GuardianContacts, MedicalCondition, MedicalProfile, ParticipantRecord};

/// What the form needs from the outside world to derive fields.
#[derive(Debug, Clone)]
pub struct FormContext {
    pub today: NaiveDate,
    pub brackets: CategoryBrackets,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiblingEntry {
    pub name: String,
    pub age: Option<u32>,
    pub contact: String,
}

impl SiblingEntry {
    /// A row is complete once it has a name, an eligible age and an 8–10 digit phone.
    pub fn is_complete(&self, brackets: &CategoryBrackets) -> bool {
        !self.name.trim().is_empty()
            && self.age.is_some_and(|age| brackets.is_eligible(age))
            && (8..=10).contains(&self.contact.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardianField {
    FatherName,
    MotherName,
    FatherMobile,
    MotherMobile,
    Email,
    Residence,
    PrimaryContactNumber,
    PrimaryContactRelationship,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiblingField {
    Name(String),
    Age(Option<u32>),
    Contact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormEvent {
    SetName(String),
    SetDateOfBirth(Option<NaiveDate>),
    SetGuardian(GuardianField, String),
    ToggleMedical(MedicalCondition),
    SetOtherCondition(String),
    SetMedicalNotes(String),
    SetAgreement(bool),
    SetSignature(String),
    SetHasSibling(bool),
    AddSibling,
    UpdateSibling { index: usize, field: SiblingField },
    RemoveSibling(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationForm {
    pub primary: ParticipantRecord,
    pub has_sibling: bool,
    pub siblings: Vec<SiblingEntry>,
}

impl RegistrationForm {
    pub fn apply(self, event: FormEvent, ctx: &FormContext) -> Self {
        let Self {
            primary,
            has_sibling,
            siblings,
        } = self;

        match event {
            FormEvent::SetName(name) => Self {
                primary: ParticipantRecord {
                    participant_name: name,
                    ..primary
                },
                has_sibling,
                siblings,
            },
            FormEvent::SetDateOfBirth(dob) => Self {
                primary: primary.with_date_of_birth(dob, ctx.today, &ctx.brackets),
                has_sibling,
                siblings,
            },
            FormEvent::SetGuardian(field, value) => Self {
                primary: ParticipantRecord {
                    guardian: with_guardian_field(primary.guardian, field, value),
                    ..primary
                },
                has_sibling,
                siblings,
            },
            FormEvent::ToggleMedical(condition) => Self {
                primary: ParticipantRecord {
                    medical: toggle_condition(primary.medical, condition),
                    ..primary
                },
                has_sibling,
                siblings,
            },
            FormEvent::SetOtherCondition(note) => Self {
                primary: ParticipantRecord {
                    medical: MedicalProfile {
                        other_condition: note,
                        ..primary.medical
                    },
                    ..primary
                },
                has_sibling,
                siblings,
            },
            FormEvent::SetMedicalNotes(notes) => {
                // Notes are locked while N/A is ticked.
                let medical = if primary.medical.has(MedicalCondition::NotApplicable) {
                    primary.medical
                } else {
                    MedicalProfile {
                        medical_notes: notes,
                        ..primary.medical
                    }
                };
                Self {
                    primary: ParticipantRecord { medical, ..primary },
                    has_sibling,
                    siblings,
                }
            }
            FormEvent::SetAgreement(agreed) => Self {
                primary: ParticipantRecord {
                    parent_agreement: agreed,
                    ..primary
                },
                has_sibling,
                siblings,
            },
            FormEvent::SetSignature(signature) => Self {
                primary: ParticipantRecord {
                    parent_signature: signature,
                    ..primary
                },
                has_sibling,
                siblings,
            },
            FormEvent::SetHasSibling(yes) => Self {
                primary,
                has_sibling: yes,
                siblings: if yes {
                    vec![SiblingEntry::default()]
                } else {
                    Vec::new()
                },
            },
            FormEvent::AddSibling => {
                let can_add = has_sibling
                    && siblings
                        .last()
                        .map_or(true, |last| last.is_complete(&ctx.brackets));
                let siblings = if can_add {
                    siblings
                        .into_iter()
                        .chain(std::iter::once(SiblingEntry::default()))
                        .collect()
                } else {
                    siblings
                };
                Self {
                    primary,
                    has_sibling,
                    siblings,
                }
            }
            FormEvent::UpdateSibling { index, field } => Self {
                primary,
                has_sibling,
                siblings: siblings
                    .into_iter()
                    .enumerate()
                    .map(|(i, sibling)| {
                        if i == index {
                            with_sibling_field(sibling, field.clone())
                        } else {
                            sibling
                        }
                    })
                    .collect(),
            },
            FormEvent::RemoveSibling(index) => Self {
                primary,
                has_sibling,
                siblings: siblings
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| *i != index)
                    .map(|(_, sibling)| sibling)
                    .collect(),
            },
        }
    }

    /// Re-derives age and category, e.g. after loading a saved form.
    pub fn refresh(self, ctx: &FormContext) -> Self {
        let dob = self.primary.date_of_birth;
        self.apply(FormEvent::SetDateOfBirth(dob), ctx)
    }

    /// The primary participant followed by one record per sibling. Siblings
    /// take the primary's guardian details, consent and medical answers.
    pub fn into_batch(self, ctx: &FormContext) -> Vec<ParticipantRecord> {
        let Self {
            primary,
            has_sibling,
            siblings,
        } = self.refresh(ctx);

        let sibling_records: Vec<ParticipantRecord> = if has_sibling {
            siblings
                .into_iter()
                .map(|sibling| {
                    let contact = sibling.contact.trim().to_string();
                    ParticipantRecord {
                        participant_name: sibling.name,
                        date_of_birth: None,
                        guardian: primary.guardian.clone(),
                        contact_number: (!contact.is_empty()).then_some(contact),
                        medical: primary.medical.clone(),
                        parent_agreement: primary.parent_agreement,
                        parent_signature: primary.parent_signature.clone(),
                        ..ParticipantRecord::default()
                    }
                    .with_age(sibling.age, &ctx.brackets)
                })
                .collect()
        } else {
            Vec::new()
        };

        std::iter::once(primary).chain(sibling_records).collect()
    }
}

fn with_guardian_field(guardian: GuardianContacts, field: GuardianField, value: String) -> GuardianContacts {
    match field {
        GuardianField::FatherName => GuardianContacts {
            father_name: value,
            ..guardian
        },
        GuardianField::MotherName => GuardianContacts {
            mother_name: value,
            ..guardian
        },
        GuardianField::FatherMobile => GuardianContacts {
            father_mobile: sanitize_phone(&value),
            ..guardian
        },
        GuardianField::MotherMobile => GuardianContacts {
            mother_mobile: sanitize_phone(&value),
            ..guardian
        },
        GuardianField::Email => GuardianContacts {
            email: value.trim().to_string(),
            ..guardian
        },
        GuardianField::Residence => GuardianContacts {
            residence: value,
            ..guardian
        },
        GuardianField::PrimaryContactNumber => GuardianContacts {
            primary_contact_number: sanitize_phone(&value),
            ..guardian
        },
        GuardianField::PrimaryContactRelationship => GuardianContacts {
            primary_contact_relationship: value,
            ..guardian
        },
    }
}

fn with_sibling_field(sibling: SiblingEntry, field: SiblingField) -> SiblingEntry {
    match field {
        SiblingField::Name(name) => SiblingEntry {
            name: sanitize_sibling_name(&name),
            ..sibling
        },
        SiblingField::Age(age) => SiblingEntry { age, ..sibling },
        SiblingField::Contact(contact) => SiblingEntry {
            contact: sanitize_sibling_contact(&contact),
            ..sibling
        },
    }
}

/// N/A clears every other tag; other tags cannot be ticked while N/A is.
fn toggle_condition(medical: MedicalProfile, condition: MedicalCondition) -> MedicalProfile {
    let mut conditions = medical.conditions;
    if conditions.contains(&condition) {
        conditions.remove(&condition);
    } else if condition == MedicalCondition::NotApplicable {
        conditions.clear();
        conditions.insert(condition);
    } else if !conditions.contains(&MedicalCondition::NotApplicable) {
        conditions.insert(condition);
    }
    MedicalProfile {
        conditions,
        ..medical
    }
}

/// Digits only, keeping a leading `+`.
pub fn sanitize_phone(raw: &str) -> String {
    let raw = raw.trim();
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if raw.starts_with('+') {
        format!("+{digits}")
    } else {
        digits
    }
}

/// Letters and spaces only, each word capitalised.
pub fn sanitize_sibling_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut at_word_start = true;
    for c in raw.chars().filter(|c| c.is_ascii_alphabetic() || c.is_whitespace()) {
        if c.is_whitespace() {
            at_word_start = true;
            out.push(c);
        } else if at_word_start {
            at_word_start = false;
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// At most ten digits.
pub fn sanitize_sibling_contact(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).take(10).collect()
}

/// The review screen: participants can be corrected or dropped before the
/// final submit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReviewBatch {
    pub participants: Vec<ParticipantRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewEdit {
    Rename { index: usize, name: String },
    SetDateOfBirth { index: usize, date_of_birth: Option<NaiveDate> },
    SetAge { index: usize, age: Option<u32> },
    SetContact { index: usize, contact: String },
    Remove(usize),
}

impl ReviewBatch {
    pub fn new(participants: Vec<ParticipantRecord>) -> Self {
        Self { participants }
    }

    pub fn apply(self, edit: ReviewEdit, ctx: &FormContext) -> Self {
        let participants = self.participants;
        let participants = match edit {
            ReviewEdit::Rename { index, name } => replace_at(participants, index, |p| {
                ParticipantRecord {
                    participant_name: name,
                    ..p
                }
            }),
            ReviewEdit::SetDateOfBirth {
                index,
                date_of_birth,
            } => replace_at(participants, index, |p| {
                p.with_date_of_birth(date_of_birth, ctx.today, &ctx.brackets)
            }),
            ReviewEdit::SetAge { index, age } => {
                replace_at(participants, index, |p| p.with_age(age, &ctx.brackets))
            }
            ReviewEdit::SetContact { index, contact } => replace_at(participants, index, |p| {
                let contact = sanitize_sibling_contact(&contact);
                ParticipantRecord {
                    contact_number: (!contact.is_empty()).then_some(contact),
                    ..p
                }
            }),
            ReviewEdit::Remove(index) => participants
                .into_iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, p)| p)
                .collect(),
        };
        Self { participants }
    }
}

fn replace_at(
    mut participants: Vec<ParticipantRecord>,
    index: usize,
    change: impl FnOnce(ParticipantRecord) -> ParticipantRecord,
) -> Vec<ParticipantRecord> {
    if index < participants.len() {
        let current = participants.remove(index);
        participants.insert(index, change(current));
    }
    participants
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::BracketProfile;
    use crate::models::Category;

    fn ctx() -> FormContext {
        FormContext {
            today: NaiveDate::from_ymd_opt(2025, 12, 20).expect("date"),
            brackets: BracketProfile::Retreat.brackets(),
        }
    }

    fn filled_form() -> RegistrationForm {
        let ctx = ctx();
        [
            FormEvent::SetName("MARIA THOMAS".to_string()),
            FormEvent::SetDateOfBirth(NaiveDate::from_ymd_opt(2015, 3, 1)),
            FormEvent::SetGuardian(GuardianField::FatherName, "Thomas Varghese".to_string()),
            FormEvent::SetGuardian(GuardianField::FatherMobile, "+971 50-123 4567".to_string()),
            FormEvent::SetGuardian(GuardianField::Email, " thomas@example.com ".to_string()),
            FormEvent::ToggleMedical(MedicalCondition::NotApplicable),
            FormEvent::SetAgreement(true),
        ]
        .into_iter()
        .fold(RegistrationForm::default(), |form, event| form.apply(event, &ctx))
    }

    #[test]
    fn date_of_birth_sets_age_and_category() {
        let form = filled_form();
        assert_eq!(form.primary.age, Some(10));
        assert_eq!(form.primary.category, Some(Category::Junior));

        let cleared = form.apply(FormEvent::SetDateOfBirth(None), &ctx());
        assert_eq!(cleared.primary.age, None);
        assert_eq!(cleared.primary.category, None);
    }

    #[test]
    fn apply_leaves_the_previous_form_untouched() {
        let before = filled_form();
        let after = before.clone().apply(FormEvent::SetName("ANNA".to_string()), &ctx());
        assert_eq!(before.primary.participant_name, "MARIA THOMAS");
        assert_eq!(after.primary.participant_name, "ANNA");
    }

    #[test]
    fn guardian_phone_and_email_are_cleaned() {
        let form = filled_form();
        assert_eq!(form.primary.guardian.father_mobile, "+971501234567");
        assert_eq!(form.primary.guardian.email, "thomas@example.com");
    }

    #[test]
    fn not_applicable_excludes_other_conditions() {
        let ctx = ctx();
        let form = RegistrationForm::default()
            .apply(FormEvent::ToggleMedical(MedicalCondition::Asthma), &ctx)
            .apply(FormEvent::ToggleMedical(MedicalCondition::NotApplicable), &ctx);
        assert_eq!(
            form.primary.medical.conditions,
            [MedicalCondition::NotApplicable].into()
        );

        let form = form.apply(FormEvent::ToggleMedical(MedicalCondition::Diabetes), &ctx);
        assert!(!form.primary.medical.has(MedicalCondition::Diabetes));

        let form = form
            .apply(FormEvent::ToggleMedical(MedicalCondition::NotApplicable), &ctx)
            .apply(FormEvent::ToggleMedical(MedicalCondition::Diabetes), &ctx);
        assert_eq!(
            form.primary.medical.conditions,
            [MedicalCondition::Diabetes].into()
        );
    }

    #[test]
    fn medical_notes_locked_while_not_applicable() {
        let form = filled_form().apply(FormEvent::SetMedicalNotes("Peanuts".to_string()), &ctx());
        assert!(form.primary.medical.medical_notes.is_empty());
    }

    #[test]
    fn sibling_rows_follow_yes_no_answer() {
        let ctx = ctx();
        let form = filled_form().apply(FormEvent::SetHasSibling(true), &ctx);
        assert_eq!(form.siblings.len(), 1);

        // The blank row must be completed before another can be added.
        let form = form.apply(FormEvent::AddSibling, &ctx);
        assert_eq!(form.siblings.len(), 1);

        let form = form
            .apply(
                FormEvent::UpdateSibling {
                    index: 0,
                    field: SiblingField::Name("john  thomas 2".to_string()),
                },
                &ctx,
            )
            .apply(
                FormEvent::UpdateSibling {
                    index: 0,
                    field: SiblingField::Age(Some(14)),
                },
                &ctx,
            )
            .apply(
                FormEvent::UpdateSibling {
                    index: 0,
                    field: SiblingField::Contact("050-123-45678".to_string()),
                },
                &ctx,
            );
        assert_eq!(form.siblings[0].name, "John  Thomas ");
        assert_eq!(form.siblings[0].contact, "0501234567");

        let form = form.apply(FormEvent::AddSibling, &ctx);
        assert_eq!(form.siblings.len(), 2);

        let form = form.apply(FormEvent::RemoveSibling(1), &ctx);
        assert_eq!(form.siblings.len(), 1);

        let form = form.apply(FormEvent::SetHasSibling(false), &ctx);
        assert!(form.siblings.is_empty());
    }

    #[test]
    fn batch_siblings_inherit_guardian_details() {
        let ctx = ctx();
        let form = filled_form()
            .apply(FormEvent::SetHasSibling(true), &ctx)
            .apply(
                FormEvent::UpdateSibling {
                    index: 0,
                    field: SiblingField::Name("John Thomas".to_string()),
                },
                &ctx,
            )
            .apply(
                FormEvent::UpdateSibling {
                    index: 0,
                    field: SiblingField::Age(Some(14)),
                },
                &ctx,
            );

        let batch = form.into_batch(&ctx);
        assert_eq!(batch.len(), 2);
        let sibling = &batch[1];
        assert_eq!(sibling.participant_name, "John Thomas");
        assert_eq!(sibling.category, Some(Category::Senior));
        assert_eq!(sibling.guardian, batch[0].guardian);
        assert_eq!(sibling.contact_number, None);
        assert!(sibling.parent_agreement);
    }

    #[test]
    fn siblings_dropped_when_answer_is_no() {
        let mut form = filled_form();
        form.siblings.push(SiblingEntry {
            name: "Ghost".to_string(),
            age: Some(9),
            contact: String::new(),
        });
        assert_eq!(form.into_batch(&ctx()).len(), 1);
    }

    #[test]
    fn review_edits_recompute_category() {
        let ctx = ctx();
        let review = ReviewBatch::new(filled_form().into_batch(&ctx))
            .apply(
                ReviewEdit::SetDateOfBirth {
                    index: 0,
                    date_of_birth: NaiveDate::from_ymd_opt(2010, 1, 5),
                },
                &ctx,
            )
            .apply(
                ReviewEdit::Rename {
                    index: 0,
                    name: "MARIA T".to_string(),
                },
                &ctx,
            );
        let primary = &review.participants[0];
        assert_eq!(primary.age, Some(15));
        assert_eq!(primary.category, Some(Category::Senior));
        assert_eq!(primary.participant_name, "MARIA T");
    }

    #[test]
    fn review_can_drop_a_participant() {
        let ctx = ctx();
        let mut batch = filled_form().into_batch(&ctx);
        batch.push(
            ParticipantRecord {
                participant_name: "John".to_string(),
                ..ParticipantRecord::default()
            }
            .with_age(Some(30), &ctx.brackets),
        );
        let review = ReviewBatch::new(batch).apply(ReviewEdit::Remove(1), &ctx);
        assert_eq!(review.participants.len(), 1);
        assert_eq!(review.participants[0].participant_name, "MARIA THOMAS");

        let untouched = review.clone().apply(ReviewEdit::Remove(5), &ctx);
        assert_eq!(untouched, review);
    }
}
