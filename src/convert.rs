//! Directory orchestrator: the subject → session → series traversal that
//! wires the index, the procedures and the aggregation engine together
//! and writes the three tabular outputs at their boundaries.

use std::path::PathBuf;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;

use crate::index::{IndexTag, Scope, StudyIndex};
use crate::procedures::{Procedure, ProcedureContext, ScanTable};
use crate::tables::{self, PARTICIPANT_COLUMNS, Row, SESSION_COLUMNS};
use crate::tsv;

/// Run configuration for one conversion.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Root of the output dataset.
    pub output: PathBuf,
    /// Body part label describing the dataset, used as fallback whenever
    /// a record carries no BodyPartExamined.
    pub body_part: String,
    /// Apply the fixed BIDS naming standard where it applies.
    pub bids: bool,
    /// Fan subjects out over a thread pool. Subjects have no data
    /// dependency on one another and never write the same output path.
    pub parallel: bool,
    /// Show a progress bar over subjects.
    pub progress: bool,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertSummary {
    pub participants: usize,
    pub sessions: usize,
    pub scans: usize,
    pub skipped: usize,
}

struct SubjectOutcome {
    participant: Row,
    sessions: usize,
    scans: usize,
    skipped: usize,
}

/// Convert the whole indexed collection into the MIDS directory tree.
///
/// The two dataset-wide naming flags are computed once, before any
/// subject is processed, from the dataset's distinct-value counts.
pub fn create_mids_directory(index: &StudyIndex, opts: &ConvertOptions) -> Result<ConvertSummary> {
    let (use_bodypart, use_viewposition) = dataset_flags(index);
    let subjects = index.distinct_values(IndexTag::PatientId, &Scope::all());
    info!(
        "processing {} subjects (use_bodypart={}, use_viewposition={})",
        subjects.len(),
        use_bodypart,
        use_viewposition
    );

    let progress_bar = if opts.progress {
        let pb = ProgressBar::new(subjects.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap()
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let process = |subject: &String| {
        let outcome = process_subject(index, opts, subject, use_bodypart, use_viewposition);
        if let Some(pb) = &progress_bar {
            pb.inc(1);
        }
        outcome
    };
    let outcomes: Vec<SubjectOutcome> = if opts.parallel {
        subjects.par_iter().map(process).collect::<Result<Vec<_>>>()?
    } else {
        subjects.iter().map(process).collect::<Result<Vec<_>>>()?
    };

    if let Some(pb) = &progress_bar {
        pb.finish_and_clear();
    }

    let participants: Vec<Row> = outcomes.iter().map(|o| o.participant.clone()).collect();
    tsv::write_table(
        &opts.output.join("participants.tsv"),
        &column_vec(PARTICIPANT_COLUMNS),
        &participants,
        "participant_id",
        true,
    )?;

    Ok(outcomes
        .iter()
        .fold(ConvertSummary::default(), |mut acc, o| {
            acc.participants += 1;
            acc.sessions += o.sessions;
            acc.scans += o.scans;
            acc.skipped += o.skipped;
            acc
        }))
}

fn process_subject(
    index: &StudyIndex,
    opts: &ConvertOptions,
    subject: &str,
    use_bodypart: bool,
    use_viewposition: bool,
) -> Result<SubjectOutcome> {
    info!("processing subject {}", subject);
    let ctx = ProcedureContext {
        mids_path: &opts.output,
        dataset_bodypart: &opts.body_part,
        use_bodypart,
        use_viewposition,
        bids: opts.bids,
    };

    let mut session_rows: Vec<Row> = Vec::new();
    let mut ages: Vec<i64> = Vec::new();
    let mut birth_date = None;
    let mut scan_count = 0;
    let mut skipped = 0;

    let sessions = index.distinct_values(IndexTag::StudyId, &Scope::subject(subject));
    for session in &sessions {
        info!("processing session {} of subject {}", session, subject);
        let mut scans = ScanTable::default();
        let series_numbers =
            index.distinct_values(IndexTag::SeriesNumber, &Scope::session(subject, session));
        for series in &series_numbers {
            let group = index.series_group(subject, session, series);
            match Procedure::classify(group.modality()) {
                Some(procedure) => {
                    let table = procedure.run(&ctx, &group).with_context(|| {
                        format!(
                            "while processing subject {} session {} series {}",
                            subject, session, series
                        )
                    })?;
                    scans.merge(table);
                }
                None => {
                    warn!(
                        "series {} of subject {} session {} has unclassified modality {:?}; skipping",
                        series,
                        subject,
                        session,
                        group.modality()
                    );
                }
            }
        }

        let session_dir = opts
            .output
            .join(format!("sub-{}", subject))
            .join(format!("ses-{}", session));
        if scans.is_empty() {
            info!(
                "no scans converted for subject {} session {}",
                subject, session
            );
        } else {
            tsv::write_table(
                &session_dir.join(format!("sub-{}_ses-{}_scans.tsv", subject, session)),
                &scans.columns,
                &scans.rows,
                "scan_file",
                true,
            )?;
        }
        scan_count += scans.rows.len();
        skipped += scans.skipped;

        let snapshot = index
            .session_snapshot(&Scope::session(subject, session))
            .with_context(|| format!("session {} of subject {} has no records", session, subject))?;
        let record = tables::session_record(&snapshot, session);
        if let Some(age) = record.age {
            ages.push(age);
        }
        if record.birth_date.is_some() {
            birth_date = record.birth_date;
        }
        session_rows.push(record.row);
    }

    tsv::write_table(
        &opts
            .output
            .join(format!("sub-{}", subject))
            .join(format!("sub-{}_sessions.tsv", subject)),
        &column_vec(SESSION_COLUMNS),
        &session_rows,
        "session_date_time",
        true,
    )?;

    let participant = tables::participant_record(index, subject, &opts.body_part, &ages, birth_date)?;
    Ok(SubjectOutcome {
        participant,
        sessions: sessions.len(),
        scans: scan_count,
        skipped,
    })
}

/// The two dataset-wide naming flags: a token is emitted only when more
/// than one distinct value exists across the whole dataset.
fn dataset_flags(index: &StudyIndex) -> (bool, bool) {
    let use_bodypart = index
        .distinct_values(IndexTag::BodyPartExamined, &Scope::all())
        .len()
        > 1;
    let use_viewposition = index
        .distinct_values(IndexTag::ViewPosition, &Scope::all())
        .len()
        > 1;
    (use_bodypart, use_viewposition)
}

fn column_vec(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ImagingRecord;
    use std::fs;

    fn record(subject: &str, session: &str, date: &str) -> ImagingRecord {
        ImagingRecord {
            patient_id: subject.to_string(),
            study_id: session.to_string(),
            series_number: Some("1".to_string()),
            instance_number: Some(1),
            instance_label: Some("1".to_string()),
            modality: "XX".to_string(),
            body_part: Some("HEAD".to_string()),
            sex: Some("F".to_string()),
            birth_date: Some("19900101".to_string()),
            study_date: Some(date.to_string()),
            study_time: Some("090000".to_string()),
            ..ImagingRecord::default()
        }
    }

    fn options(output: std::path::PathBuf) -> ConvertOptions {
        ConvertOptions {
            output,
            body_part: "head".to_string(),
            bids: false,
            parallel: false,
            progress: false,
        }
    }

    #[test]
    fn unclassified_series_produce_no_scans_but_aggregation_proceeds() {
        let dir = tempfile::tempdir().unwrap();
        let index = StudyIndex::from_records(vec![
            record("01", "A", "20240101"),
            record("01", "B", "20250101"),
        ]);
        let summary = create_mids_directory(&index, &options(dir.path().to_path_buf())).unwrap();
        assert_eq!(summary.participants, 1);
        assert_eq!(summary.sessions, 2);
        assert_eq!(summary.scans, 0);

        let participants = fs::read_to_string(dir.path().join("participants.tsv")).unwrap();
        assert!(participants.contains("sub-01"));
        // floor(12418 / 365.25) = 33 and floor(12784 / 365.25) = 35.
        assert!(participants.contains("[33,35]"));
        assert!(participants.contains("[\"HEAD\"]"));

        let sessions = fs::read_to_string(
            dir.path().join("sub-01").join("sub-01_sessions.tsv"),
        )
        .unwrap();
        let lines: Vec<&str> = sessions.lines().collect();
        assert_eq!(lines[0], "session_id\tsession_pseudo_id\tsession_date_time\tage");
        // Sorted by session_date_time descending.
        assert!(lines[1].starts_with("ses-B"));
        assert!(lines[2].starts_with("ses-A"));

        assert!(!dir.path().join("sub-01/ses-A/sub-01_ses-A_scans.tsv").exists());
    }

    #[test]
    fn conflicting_sex_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = record("01", "A", "20240101");
        a.sex = Some("F".to_string());
        let mut b = record("01", "A", "20240101");
        b.sex = Some("M".to_string());
        b.instance_number = Some(2);
        b.instance_label = Some("2".to_string());
        let index = StudyIndex::from_records(vec![a, b]);
        assert!(create_mids_directory(&index, &options(dir.path().to_path_buf())).is_err());
    }

    #[test]
    fn session_attributes_carried_by_later_instances_still_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = record("01", "A", "20240101");
        a.birth_date = None;
        let mut b = record("01", "A", "20240101");
        b.instance_number = Some(2);
        b.instance_label = Some("2".to_string());
        let index = StudyIndex::from_records(vec![a, b]);
        create_mids_directory(&index, &options(dir.path().to_path_buf())).unwrap();
        let participants = fs::read_to_string(dir.path().join("participants.tsv")).unwrap();
        assert!(participants.contains("1990-01-01"));
        assert!(participants.contains("[33]"));
    }

    #[test]
    fn naming_flags_require_more_than_one_distinct_value() {
        let mut a = record("01", "A", "20240101");
        a.view_position = Some("PA".to_string());
        let b = record("02", "A", "20240101");
        assert_eq!(
            dataset_flags(&StudyIndex::from_records(vec![a.clone(), b.clone()])),
            (false, false)
        );

        let mut c = record("03", "A", "20240101");
        c.body_part = Some("CHEST".to_string());
        c.view_position = Some("AP".to_string());
        assert_eq!(
            dataset_flags(&StudyIndex::from_records(vec![a, c])),
            (true, true)
        );
    }

    #[test]
    fn participants_table_is_sorted_descending_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let index = StudyIndex::from_records(vec![
            record("01", "A", "20240101"),
            record("02", "A", "20240101"),
        ]);
        create_mids_directory(&index, &options(dir.path().to_path_buf())).unwrap();
        let participants = fs::read_to_string(dir.path().join("participants.tsv")).unwrap();
        let lines: Vec<&str> = participants.lines().collect();
        assert!(lines[1].starts_with("sub-02"));
        assert!(lines[2].starts_with("sub-01"));
    }
}
