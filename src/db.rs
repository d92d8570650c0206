use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assembler::RegistrationAssembler;
use crate::error::{Error, Result};
use crate::form::{sanitize_phone, FormContext};
use crate::models::{
    DocId, GuardianContacts, IdCardMarker, MedicalCondition, MedicalProfile, NewRecord,
    ParticipantRecord, PersistedRecord,
};
use crate::store::RecordStore;

const SELECT_COLUMNS: &str = "id, student_id, family_id, sequence_number, is_primary, \
     participant_name, date_of_birth, age, category, father_name, mother_name, \
     father_mobile, mother_mobile, email, residence, primary_contact_number, \
     primary_contact_relationship, contact_number, medical_conditions, other_condition, \
     medical_notes, parent_agreement, parent_signature, created_at, id_generated, \
     generated_id, generated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> Result<()> {
        init_db(&self.pool).await
    }
}

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn insert_error(err: sqlx::Error, student_id: &str) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return Error::DuplicateId {
                student_id: student_id.to_string(),
            };
        }
    }
    Error::Database(err)
}

fn row_to_record(row: &PgRow) -> Result<PersistedRecord> {
    let id: Uuid = row.try_get("id")?;
    let sequence: i64 = row.try_get("sequence_number")?;
    let age: Option<i32> = row.try_get("age")?;
    let category: Option<String> = row.try_get("category")?;
    let conditions: Vec<String> = row.try_get("medical_conditions")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(PersistedRecord {
        doc_id: DocId(id),
        student_id: row.try_get("student_id")?,
        family_id: row.try_get("family_id")?,
        sequence: u64::try_from(sequence).unwrap_or(0),
        is_primary: row.try_get("is_primary")?,
        record: ParticipantRecord {
            participant_name: row.try_get("participant_name")?,
            date_of_birth: row.try_get::<Option<NaiveDate>, _>("date_of_birth")?,
            age: age.and_then(|age| u32::try_from(age).ok()),
            category: category.and_then(|category| category.parse().ok()),
            guardian: GuardianContacts {
                father_name: row.try_get("father_name")?,
                mother_name: row.try_get("mother_name")?,
                father_mobile: row.try_get("father_mobile")?,
                mother_mobile: row.try_get("mother_mobile")?,
                email: row.try_get("email")?,
                residence: row.try_get("residence")?,
                primary_contact_number: row.try_get("primary_contact_number")?,
                primary_contact_relationship: row.try_get("primary_contact_relationship")?,
            },
            contact_number: row.try_get("contact_number")?,
            medical: MedicalProfile {
                conditions: conditions
                    .iter()
                    .filter_map(|condition| condition.parse::<MedicalCondition>().ok())
                    .collect::<BTreeSet<_>>(),
                other_condition: row.try_get("other_condition")?,
                medical_notes: row.try_get("medical_notes")?,
            },
            parent_agreement: row.try_get("parent_agreement")?,
            parent_signature: row.try_get("parent_signature")?,
        },
        created_at,
        id_generated: row.try_get("id_generated")?,
        generated_id: row.try_get("generated_id")?,
        generated_at: row.try_get("generated_at")?,
    })
}

#[async_trait]
impl RecordStore for PgStore {
    async fn latest(&self, prefix: Option<&str>) -> Result<Option<PersistedRecord>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM retreat_registration.participants \
             WHERE ($1::text IS NULL OR student_id LIKE ($1 || '-%')) \
             ORDER BY created_at DESC, sequence_number DESC \
             LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(prefix)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn append_batch(&self, records: &[NewRecord]) -> Result<Vec<PersistedRecord>> {
        let mut tx = self.pool.begin().await?;
        let mut saved = Vec::with_capacity(records.len());

        for new in records {
            let record = &new.record;
            let guardian = &record.guardian;
            let conditions: Vec<String> = record
                .medical
                .conditions
                .iter()
                .map(|condition| condition.as_str().to_string())
                .collect();

            let doc_id = Uuid::new_v4();
            let row = sqlx::query(
                r#"
                INSERT INTO retreat_registration.participants
                (id, student_id, family_id, sequence_number, is_primary, participant_name,
                 date_of_birth, age, category, father_name, mother_name, father_mobile,
                 mother_mobile, email, residence, primary_contact_number,
                 primary_contact_relationship, contact_number, medical_conditions,
                 other_condition, medical_notes, parent_agreement, parent_signature)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                        $16, $17, $18, $19, $20, $21, $22, $23)
                RETURNING created_at
                "#,
            )
            .bind(doc_id)
            .bind(&new.student_id)
            .bind(&new.family_id)
            .bind(i64::try_from(new.sequence).unwrap_or(i64::MAX))
            .bind(new.is_primary)
            .bind(&record.participant_name)
            .bind(record.date_of_birth)
            .bind(record.age.and_then(|age| i32::try_from(age).ok()))
            .bind(record.category.map(|category| category.as_str()))
            .bind(&guardian.father_name)
            .bind(&guardian.mother_name)
            .bind(&guardian.father_mobile)
            .bind(&guardian.mother_mobile)
            .bind(&guardian.email)
            .bind(&guardian.residence)
            .bind(&guardian.primary_contact_number)
            .bind(&guardian.primary_contact_relationship)
            .bind(&record.contact_number)
            .bind(&conditions)
            .bind(&record.medical.other_condition)
            .bind(&record.medical.medical_notes)
            .bind(record.parent_agreement)
            .bind(&record.parent_signature)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| insert_error(err, &new.student_id))?;

            saved.push(PersistedRecord {
                doc_id: DocId(doc_id),
                student_id: new.student_id.clone(),
                family_id: new.family_id.clone(),
                sequence: new.sequence,
                is_primary: new.is_primary,
                record: record.clone(),
                created_at: row.try_get("created_at")?,
                id_generated: false,
                generated_id: None,
                generated_at: None,
            });
        }

        tx.commit().await?;
        debug!("Appended {} participant row(s)", saved.len());
        Ok(saved)
    }

    async fn mark_id_generated(&self, doc_id: DocId, marker: &IdCardMarker) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE retreat_registration.participants
            SET id_generated = TRUE, generated_id = $2, generated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(doc_id.0)
        .bind(&marker.generated_id)
        .bind(marker.generated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::RecordNotFound {
                doc_id: doc_id.to_string(),
            });
        }
        Ok(())
    }

    async fn reserve_sequence(&self, count: u64) -> Result<u64> {
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        let value: i64 = sqlx::query(
            r#"
            INSERT INTO retreat_registration.sequence_counter (id, value)
            VALUES (1, (SELECT COALESCE(MAX(sequence_number), 0)
                        FROM retreat_registration.participants) + $1)
            ON CONFLICT (id) DO UPDATE
            SET value = GREATEST(
                    retreat_registration.sequence_counter.value,
                    (SELECT COALESCE(MAX(sequence_number), 0)
                     FROM retreat_registration.participants)
                ) + $1
            RETURNING value
            "#,
        )
        .bind(count)
        .fetch_one(&self.pool)
        .await?
        .try_get("value")?;

        Ok(u64::try_from(value - count).unwrap_or(0))
    }

    async fn list(&self) -> Result<Vec<PersistedRecord>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM retreat_registration.participants \
             ORDER BY created_at, sequence_number"
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub registered: usize,
    pub skipped: usize,
}

#[derive(serde::Deserialize)]
struct CsvRow {
    participant_name: String,
    date_of_birth: String,
    #[serde(default)]
    father_name: String,
    #[serde(default)]
    mother_name: String,
    #[serde(default)]
    father_mobile: String,
    #[serde(default)]
    mother_mobile: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    residence: String,
    #[serde(default)]
    primary_contact_number: String,
    #[serde(default)]
    primary_contact_relationship: String,
    /// Semicolon separated, e.g. `Asthma;Other`.
    #[serde(default)]
    medical_conditions: String,
    #[serde(default)]
    other_condition: String,
    #[serde(default)]
    medical_notes: String,
    #[serde(default)]
    parent_signature: String,
}

impl CsvRow {
    fn into_record(self, ctx: &FormContext) -> Result<ParticipantRecord> {
        let date_of_birth = NaiveDate::parse_from_str(self.date_of_birth.trim(), "%Y-%m-%d")
            .map_err(|_| Error::InvalidDate {
                value: self.date_of_birth.clone(),
            })?;

        let mut conditions = BTreeSet::new();
        for raw in self.medical_conditions.split(';').map(str::trim) {
            if raw.is_empty() {
                continue;
            }
            match raw.parse::<MedicalCondition>() {
                Ok(condition) => {
                    conditions.insert(condition);
                }
                Err(message) => warn!(participant = %self.participant_name, "{message}"),
            }
        }

        let record = ParticipantRecord {
            participant_name: self.participant_name,
            guardian: GuardianContacts {
                father_name: self.father_name,
                mother_name: self.mother_name,
                father_mobile: sanitize_phone(&self.father_mobile),
                mother_mobile: sanitize_phone(&self.mother_mobile),
                email: self.email.trim().to_string(),
                residence: self.residence,
                primary_contact_number: sanitize_phone(&self.primary_contact_number),
                primary_contact_relationship: self.primary_contact_relationship,
            },
            medical: MedicalProfile {
                conditions,
                other_condition: self.other_condition,
                medical_notes: self.medical_notes,
            },
            // Paper forms are only accepted with a signature.
            parent_agreement: !self.parent_signature.trim().is_empty(),
            parent_signature: self.parent_signature,
            ..ParticipantRecord::default()
        };
        Ok(record.with_date_of_birth(Some(date_of_birth), ctx.today, &ctx.brackets))
    }
}

pub async fn import_csv<S: RecordStore>(
    assembler: &RegistrationAssembler<S>,
    csv_path: &Path,
) -> Result<ImportSummary> {
    let file = std::fs::File::open(csv_path)?;
    import_reader(assembler, file).await
}

/// Registers one participant per row. Rows that cannot be read, fail
/// validation or collide with an existing id are skipped; database and I/O
/// failures stop the import.
pub async fn import_reader<S: RecordStore, R: Read>(
    assembler: &RegistrationAssembler<S>,
    reader: R,
) -> Result<ImportSummary> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut summary = ImportSummary::default();
    let ctx = assembler.context();

    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(err) if err.is_io_error() => return Err(err.into()),
            Err(err) => {
                warn!(row = line + 1, error = %err, "Skipping malformed row");
                summary.skipped += 1;
                continue;
            }
        };
        let record = match row.into_record(&ctx) {
            Ok(record) => record,
            Err(err) => {
                warn!(row = line + 1, error = %err, "Skipping row");
                summary.skipped += 1;
                continue;
            }
        };

        match assembler.submit(vec![record]).await {
            Ok(handoff) => {
                debug!(row = line + 1, student_id = %handoff.form_data.student_id, "Imported");
                summary.registered += 1;
            }
            Err(err) if err.is_validation() || err.is_duplicate_id() => {
                warn!(row = line + 1, error = %err, "Skipping row");
                summary.skipped += 1;
            }
            Err(err) => return Err(err),
        }
    }

    info!(
        registered = summary.registered,
        skipped = summary.skipped,
        "CSV import finished"
    );
    Ok(summary)
}
