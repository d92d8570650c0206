//! Turns submitted participants into persisted, numbered records.

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::eligibility;
use crate::error::{Error, Result, ValidationErrors};
use crate::form::{FormContext, RegistrationForm};
use crate::ids;
use crate::models::{
    Category, DocId, IdCardHandoff, IdCardMarker, NewRecord, ParticipantRecord,
};
use crate::store::RecordStore;
use crate::validate::{self, ValidationIssue};

#[derive(Debug)]
pub struct RegistrationAssembler<S> {
    store: S,
    settings: Settings,
    today: NaiveDate,
}

impl<S: RecordStore> RegistrationAssembler<S> {
    pub fn new(store: S, settings: Settings) -> Self {
        Self {
            store,
            settings,
            today: eligibility::today(),
        }
    }

    /// Pins the date ages are computed against.
    pub fn with_today(self, today: NaiveDate) -> Self {
        Self { today, ..self }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn context(&self) -> FormContext {
        FormContext {
            today: self.today,
            brackets: self.settings.brackets(),
        }
    }

    pub fn validate(
        &self,
        record: &ParticipantRecord,
        is_primary: bool,
    ) -> std::result::Result<(), Vec<ValidationIssue>> {
        validate::validate(record, is_primary, &self.settings.brackets())
    }

    /// The id the next participant of `category` would get right now. Nothing
    /// is reserved.
    pub async fn next_id(&self, category: Category) -> Result<String> {
        ids::assign_sequential_id(
            &self.store,
            self.settings.prefix_for(category),
            self.settings.registration.id_scope,
            self.settings.registration.id_padding,
        )
        .await
    }

    /// Appends one numbered record. A taken student id fails with
    /// `Error::DuplicateId` and is not retried.
    pub async fn persist(&self, record: &NewRecord) -> Result<DocId> {
        self.store.append(record).await
    }

    pub async fn submit_form(&self, form: RegistrationForm) -> Result<IdCardHandoff> {
        let participants = form.into_batch(&self.context());
        self.submit(participants).await
    }

    /// Validates every participant, numbers them in order and appends them as
    /// one batch. Nothing is written unless every step succeeds.
    pub async fn submit(&self, participants: Vec<ParticipantRecord>) -> Result<IdCardHandoff> {
        let brackets = self.settings.brackets();
        let participants: Vec<ParticipantRecord> = participants
            .into_iter()
            .map(|participant| {
                let age = participant.age;
                participant.with_age(age, &brackets)
            })
            .collect();

        validate::validate_batch(&participants, &brackets)?;

        let prefixes = participants
            .iter()
            .enumerate()
            .map(|(index, participant)| {
                participant
                    .category
                    .map(|category| self.settings.prefix_for(category))
                    .ok_or_else(|| ValidationErrors {
                        issues: vec![(index, ValidationIssue::MissingCategory)],
                    })
            })
            .collect::<std::result::Result<Vec<&str>, _>>()?;

        let assigned = self
            .settings
            .allocator()
            .allocate(&self.store, &prefixes)
            .await?;

        let batch: Vec<NewRecord> = participants
            .into_iter()
            .zip(assigned)
            .enumerate()
            .map(|(index, (record, (student_id, sequence)))| NewRecord {
                family_id: student_id.clone(),
                student_id,
                sequence,
                is_primary: index == 0,
                record,
            })
            .collect();

        let saved = self.store.append_batch(&batch).await.map_err(|err| {
            warn!(error = %err, "Registration was not saved");
            err
        })?;

        let mut saved = saved.into_iter();
        let form_data = saved.next().ok_or_else(|| {
            Error::Validation(ValidationErrors {
                issues: vec![(0, ValidationIssue::EmptySubmission)],
            })
        })?;
        let handoff = IdCardHandoff {
            form_data,
            siblings: saved.collect(),
        };

        let student_ids: Vec<&str> = handoff
            .participants()
            .map(|participant| participant.student_id.as_str())
            .collect();
        info!(?student_ids, "Registered participants");
        Ok(handoff)
    }

    /// Records that an ID card image exists. Failures are logged, never
    /// raised; the return value says whether the update landed.
    pub async fn mark_id_generated(&self, doc_id: DocId, generated_id: &str) -> bool {
        let marker = IdCardMarker {
            generated_id: generated_id.to_string(),
            generated_at: Utc::now(),
        };
        match self.store.mark_id_generated(doc_id, &marker).await {
            Ok(()) => {
                debug!(%doc_id, generated_id, "Marked ID card as generated");
                true
            }
            Err(err) => {
                warn!(%doc_id, error = %err, "Could not mark ID card as generated");
                false
            }
        }
    }

    pub async fn mark_handoff_generated(&self, handoff: &IdCardHandoff) {
        for participant in handoff.participants() {
            self.mark_id_generated(participant.doc_id, &participant.family_id)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::BracketProfile;
    use crate::form::{FormEvent, GuardianField, SiblingField};
    use crate::ids::IdStrategy;
    use crate::models::{GuardianContacts, MedicalCondition, MedicalProfile};
    use crate::store::MemoryStore;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 20).expect("date")
    }

    fn assembler(settings: Settings) -> RegistrationAssembler<MemoryStore> {
        RegistrationAssembler::new(MemoryStore::new(), settings).with_today(today())
    }

    fn primary(dob: NaiveDate) -> ParticipantRecord {
        ParticipantRecord {
            participant_name: "MARIA THOMAS".to_string(),
            guardian: GuardianContacts {
                father_name: "Thomas Varghese".to_string(),
                father_mobile: "0501234567".to_string(),
                email: "thomas@example.com".to_string(),
                ..GuardianContacts::default()
            },
            medical: MedicalProfile::not_applicable(),
            parent_agreement: true,
            ..ParticipantRecord::default()
        }
        .with_date_of_birth(Some(dob), today(), &BracketProfile::Retreat.brackets())
    }

    async fn seed(store: &MemoryStore, student_id: &str) {
        store
            .append(&NewRecord {
                student_id: student_id.to_string(),
                family_id: student_id.to_string(),
                sequence: ids::parse_sequence(student_id).unwrap_or(0),
                is_primary: true,
                record: ParticipantRecord::default(),
            })
            .await
            .expect("seed");
    }

    #[tokio::test]
    async fn ten_year_old_without_siblings() {
        let assembler = assembler(Settings::default());
        seed(assembler.store(), "DGT-041").await;

        let dob = NaiveDate::from_ymd_opt(2015, 6, 1).expect("date");
        let handoff = assembler.submit(vec![primary(dob)]).await.expect("submit");

        assert!(handoff.siblings.is_empty());
        let saved = &handoff.form_data;
        assert_eq!(saved.record.age, Some(10));
        assert_eq!(saved.record.category, Some(Category::Junior));
        assert_eq!(saved.student_id, "DGK-042");
        assert_eq!(saved.family_id, saved.student_id);
        assert!(saved.is_primary);
        assert!(saved.record.medical.has(MedicalCondition::NotApplicable));

        let stored = assembler.store().list().await.expect("list");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1], *saved);
    }

    #[tokio::test]
    async fn invalid_submission_writes_nothing() {
        let assembler = assembler(Settings::default());
        let mut record = primary(NaiveDate::from_ymd_opt(2015, 6, 1).expect("date"));
        record.medical = MedicalProfile {
            conditions: [MedicalCondition::Other].into(),
            ..MedicalProfile::default()
        };

        let err = assembler.submit(vec![record]).await.unwrap_err();
        assert!(err.is_validation());
        assert!(assembler.store().is_empty());
    }

    #[tokio::test]
    async fn category_is_recomputed_from_age() {
        let assembler = assembler(Settings::default());
        let mut record = primary(NaiveDate::from_ymd_opt(2010, 1, 1).expect("date"));
        record.category = Some(Category::Junior);

        let handoff = assembler.submit(vec![record]).await.expect("submit");
        assert_eq!(handoff.form_data.record.category, Some(Category::Senior));
        assert_eq!(handoff.form_data.student_id, "DGT-001");
    }

    #[tokio::test]
    async fn family_is_numbered_in_order() {
        let assembler = assembler(Settings::default());
        seed(assembler.store(), "DGK-007").await;
        let ctx = assembler.context();

        let form = RegistrationForm {
            primary: primary(NaiveDate::from_ymd_opt(2015, 6, 1).expect("date")),
            ..RegistrationForm::default()
        }
        .apply(FormEvent::SetHasSibling(true), &ctx)
        .apply(
            FormEvent::UpdateSibling {
                index: 0,
                field: SiblingField::Name("john thomas".to_string()),
            },
            &ctx,
        )
        .apply(
            FormEvent::UpdateSibling {
                index: 0,
                field: SiblingField::Age(Some(15)),
            },
            &ctx,
        );

        let handoff = assembler.submit_form(form).await.expect("submit");
        assert_eq!(handoff.form_data.student_id, "DGK-008");
        assert_eq!(handoff.siblings.len(), 1);
        let sibling = &handoff.siblings[0];
        assert_eq!(sibling.student_id, "DGT-009");
        assert_eq!(sibling.record.participant_name, "John Thomas");
        assert!(!sibling.is_primary);
        assert_eq!(sibling.record.guardian, handoff.form_data.record.guardian);
    }

    #[tokio::test]
    async fn colliding_id_aborts_whole_batch() {
        let assembler = assembler(Settings::default());
        // Newest record says 3, but 4 is already taken.
        seed(assembler.store(), "DGK-004").await;
        seed(assembler.store(), "DGT-003").await;

        let ctx = assembler.context();
        let form = RegistrationForm {
            primary: primary(NaiveDate::from_ymd_opt(2015, 6, 1).expect("date")),
            ..RegistrationForm::default()
        }
        .apply(FormEvent::SetHasSibling(true), &ctx)
        .apply(
            FormEvent::UpdateSibling {
                index: 0,
                field: SiblingField::Name("Anna".to_string()),
            },
            &ctx,
        )
        .apply(
            FormEvent::UpdateSibling {
                index: 0,
                field: SiblingField::Age(Some(9)),
            },
            &ctx,
        );

        let err = assembler.submit_form(form).await.unwrap_err();
        assert!(err.is_duplicate_id());
        assert_eq!(assembler.store().len(), 2);
    }

    #[tokio::test]
    async fn counter_strategy_avoids_the_collision() {
        let mut settings = Settings::default();
        settings.registration.id_strategy = IdStrategy::Counter;
        let assembler = assembler(settings);
        seed(assembler.store(), "DGK-004").await;
        seed(assembler.store(), "DGT-003").await;

        let handoff = assembler
            .submit(vec![primary(NaiveDate::from_ymd_opt(2015, 6, 1).expect("date"))])
            .await
            .expect("submit");
        assert_eq!(handoff.form_data.student_id, "DGK-005");
    }

    #[tokio::test]
    async fn next_id_peeks_without_reserving() {
        let assembler = assembler(Settings::default());
        seed(assembler.store(), "DGK-007").await;

        assert_eq!(assembler.next_id(Category::Senior).await.expect("peek"), "DGT-008");
        assert_eq!(assembler.next_id(Category::Senior).await.expect("peek"), "DGT-008");
    }

    #[tokio::test]
    async fn marking_generated_ids() {
        let assembler = assembler(Settings::default());
        let handoff = assembler
            .submit(vec![primary(NaiveDate::from_ymd_opt(2015, 6, 1).expect("date"))])
            .await
            .expect("submit");

        assembler.mark_handoff_generated(&handoff).await;
        let stored = assembler.store().list().await.expect("list");
        assert!(stored[0].id_generated);
        assert_eq!(stored[0].generated_id.as_deref(), Some("DGK-001"));

        // Unknown handles are logged, not raised.
        assert!(!assembler.mark_id_generated(DocId::new(), "DGK-999").await);
        assert!(assembler.mark_id_generated(stored[0].doc_id, "DGK-001").await);
    }

    #[tokio::test]
    async fn persist_appends_once_and_rejects_a_taken_id() {
        let assembler = assembler(Settings::default());
        let record = NewRecord {
            student_id: "DGK-001".to_string(),
            family_id: "DGK-001".to_string(),
            sequence: 1,
            is_primary: true,
            record: primary(NaiveDate::from_ymd_opt(2015, 6, 1).expect("date")),
        };

        let doc_id = assembler.persist(&record).await.expect("persist");
        let stored = assembler.store().list().await.expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].doc_id, doc_id);
        assert_eq!(stored[0].student_id, "DGK-001");

        let again = assembler.persist(&record).await;
        assert!(matches!(again, Err(Error::DuplicateId { ref student_id }) if student_id == "DGK-001"));
        assert_eq!(assembler.store().list().await.expect("list"), stored);
    }

    #[tokio::test]
    async fn guardian_edits_flow_into_persisted_record() {
        let assembler = assembler(Settings::default());
        let ctx = assembler.context();
        let form = RegistrationForm {
            primary: primary(NaiveDate::from_ymd_opt(2012, 12, 25).expect("date")),
            ..RegistrationForm::default()
        }
        .apply(
            FormEvent::SetGuardian(GuardianField::MotherMobile, "+971 55 765 4321".to_string()),
            &ctx,
        );

        let handoff = assembler.submit_form(form).await.expect("submit");
        let record = &handoff.form_data.record;
        assert_eq!(record.age, Some(12));
        assert_eq!(record.guardian.mother_mobile, "+971557654321");
    }
}
