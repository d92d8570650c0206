use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;
use crate::models::{Category, CategorySummary, PersistedRecord};

pub fn summarize_by_category(records: &[PersistedRecord]) -> Vec<CategorySummary> {
    let mut map: BTreeMap<Option<Category>, (usize, usize)> = BTreeMap::new();

    for record in records {
        let entry = map.entry(record.record.category).or_insert((0, 0));
        entry.0 += 1;
        if !record.id_generated {
            entry.1 += 1;
        }
    }

    map.into_iter()
        .map(|(category, (count, pending_cards))| CategorySummary {
            category,
            count,
            pending_cards,
        })
        .collect()
}

fn display_name(record: &PersistedRecord) -> &str {
    record.record.participant_name.trim()
}

pub fn build_roster(event: &str, generated_on: NaiveDate, records: &[PersistedRecord]) -> String {
    let summaries = summarize_by_category(records);

    let mut output = String::new();
    let _ = writeln!(output, "# {event} Roster");
    let _ = writeln!(
        output,
        "Generated on {} ({} participants)",
        generated_on,
        records.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Categories");

    if summaries.is_empty() {
        let _ = writeln!(output, "No participants registered yet.");
    } else {
        for summary in &summaries {
            let label = summary.category.map_or("Uncategorised", Category::label);
            let _ = writeln!(
                output,
                "- {}: {} participants ({} ID cards pending)",
                label, summary.count, summary.pending_cards
            );
        }
    }

    let mut by_id: Vec<&PersistedRecord> = records.iter().collect();
    by_id.sort_by(|a, b| {
        a.sequence
            .cmp(&b.sequence)
            .then_with(|| a.student_id.cmp(&b.student_id))
    });

    let _ = writeln!(output);
    let _ = writeln!(output, "## Participants");
    if by_id.is_empty() {
        let _ = writeln!(output, "No participants registered yet.");
    } else {
        for record in &by_id {
            let age = record
                .record
                .age
                .map_or_else(|| "?".to_string(), |age| age.to_string());
            let sibling = if record.is_primary { "" } else { " (sibling)" };
            let _ = writeln!(
                output,
                "- {} {}, age {}, family {}{}",
                record.student_id,
                display_name(record),
                age,
                record.family_id,
                sibling
            );
        }
    }

    let pending: Vec<&&PersistedRecord> = by_id.iter().filter(|r| !r.id_generated).collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## ID Cards Pending");
    if pending.is_empty() {
        let _ = writeln!(output, "Every participant has an ID card.");
    } else {
        for record in pending {
            let _ = writeln!(output, "- {} {}", record.student_id, display_name(record));
        }
    }

    output
}

#[derive(Serialize)]
struct RosterRow<'a> {
    student_id: &'a str,
    family_id: &'a str,
    participant_name: &'a str,
    age: Option<u32>,
    category: &'a str,
    primary: bool,
    contact: &'a str,
    email: &'a str,
    medical_conditions: String,
    other_condition: &'a str,
    id_generated: bool,
}

/// One row per participant, in id order.
pub fn export_csv<W: std::io::Write>(records: &[PersistedRecord], writer: W) -> Result<()> {
    let mut sorted: Vec<&PersistedRecord> = records.iter().collect();
    sorted.sort_by_key(|record| record.sequence);

    let mut csv = csv::Writer::from_writer(writer);
    for record in sorted {
        let participant = &record.record;
        let contact = participant
            .contact_number
            .as_deref()
            .or_else(|| participant.guardian.primary_contact())
            .unwrap_or("");
        csv.serialize(RosterRow {
            student_id: &record.student_id,
            family_id: &record.family_id,
            participant_name: display_name(record),
            age: participant.age,
            category: participant.category.map_or("", Category::label),
            primary: record.is_primary,
            contact,
            email: &participant.guardian.email,
            medical_conditions: participant
                .medical
                .conditions
                .iter()
                .map(|condition| condition.as_str())
                .collect::<Vec<_>>()
                .join(";"),
            other_condition: &participant.medical.other_condition,
            id_generated: record.id_generated,
        })?;
    }
    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocId, GuardianContacts, MedicalProfile, ParticipantRecord};
    use chrono::Utc;

    fn saved(student_id: &str, sequence: u64, category: Category, is_primary: bool) -> PersistedRecord {
        PersistedRecord {
            doc_id: DocId::new(),
            student_id: student_id.to_string(),
            family_id: student_id.to_string(),
            sequence,
            is_primary,
            record: ParticipantRecord {
                participant_name: format!("Participant {sequence}"),
                age: Some(if category == Category::Junior { 9 } else { 14 }),
                category: Some(category),
                guardian: GuardianContacts {
                    father_mobile: "0501234567".to_string(),
                    email: "family@example.com".to_string(),
                    ..GuardianContacts::default()
                },
                medical: MedicalProfile::not_applicable(),
                ..ParticipantRecord::default()
            },
            created_at: Utc::now(),
            id_generated: false,
            generated_id: None,
            generated_at: None,
        }
    }

    fn sample() -> Vec<PersistedRecord> {
        let mut printed = saved("DGK-001", 1, Category::Junior, true);
        printed.id_generated = true;
        vec![
            saved("DGT-003", 3, Category::Senior, false),
            printed,
            saved("DGK-002", 2, Category::Junior, true),
        ]
    }

    #[test]
    fn summary_counts_pending_cards() {
        let summaries = summarize_by_category(&sample());
        assert_eq!(
            summaries,
            vec![
                CategorySummary {
                    category: Some(Category::Junior),
                    count: 2,
                    pending_cards: 1
                },
                CategorySummary {
                    category: Some(Category::Senior),
                    count: 1,
                    pending_cards: 1
                },
            ]
        );
    }

    #[test]
    fn roster_lists_participants_in_id_order() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 20).expect("date");
        let roster = build_roster("Deo Gratias", date, &sample());

        assert!(roster.starts_with("# Deo Gratias Roster"));
        assert!(roster.contains("- Kids: 2 participants (1 ID cards pending)"));
        let first = roster.find("- DGK-001").expect("DGK-001 listed");
        let third = roster.find("- DGT-003").expect("DGT-003 listed");
        assert!(first < third);
        assert!(roster.contains("DGT-003 Participant 3, age 14, family DGT-003 (sibling)"));

        let pending = roster.split("## ID Cards Pending").nth(1).expect("section");
        assert!(!pending.contains("DGK-001"));
        assert!(pending.contains("DGK-002"));
    }

    #[test]
    fn empty_roster() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 20).expect("date");
        let roster = build_roster("Deo Gratias", date, &[]);
        assert!(roster.contains("No participants registered yet."));
        assert!(roster.contains("Every participant has an ID card."));
    }

    #[test]
    fn csv_export_has_one_row_per_participant() {
        let mut out = Vec::new();
        export_csv(&sample(), &mut out).expect("export");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("student_id,family_id,participant_name"));
        assert!(lines[1].starts_with("DGK-001,DGK-001,Participant 1,9,Kids,true,0501234567"));
        assert!(lines[3].contains("N/A"));
    }
}
