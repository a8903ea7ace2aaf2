//! Aggregation engine: folds per-scan rows into session rows and session
//! rows into participant rows, with the timestamp normalization, age
//! computation and dedup/union rules of the three tabular outputs.

use anyhow::{Result, bail};
use chrono::{NaiveDate, NaiveDateTime};
use log::warn;

use crate::index::{ImagingRecord, IndexTag, Scope, StudyIndex};

/// Placeholder written to tabular output when a tag is absent from the
/// source record. Must be stable across runs.
pub const NOT_AVAILABLE: &str = "n/a";

/// One output row: ordered (column, value) pairs.
pub type Row = Vec<(String, String)>;

/// Look up a cell by column name.
pub fn cell<'a>(row: &'a Row, key: &str) -> Option<&'a str> {
    row.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

pub const SESSION_COLUMNS: &[&str] = &[
    "session_id",
    "session_pseudo_id",
    "session_date_time",
    "age",
];

pub const PARTICIPANT_COLUMNS: &[&str] = &[
    "participant_id",
    "participant_pseudo_id",
    "gender",
    "participant_birthday",
    "age",
    "modalities",
    "body_part_examined",
];

/// One session's summary row plus the values that graduate to the
/// participant level. The birth date is carried here but never
/// serialized into the session table.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub row: Row,
    pub age: Option<i64>,
    pub birth_date: Option<NaiveDate>,
}

/// Build the session row from the session's first record.
///
/// `session_date_time` combines StudyDate and StudyTime, padded to a full
/// timestamp; when either is missing, the corresponding component of
/// AcquisitionDateTime substitutes for it (logged, not an error). A
/// missing birth date yields the not-available marker for both the birth
/// date and the age, rather than failing.
pub fn session_record(first: &ImagingRecord, session: &str) -> SessionRecord {
    let timestamp = session_timestamp(first);
    let birth_date = first.birth_date.as_deref().and_then(|raw| {
        let parsed = NaiveDate::parse_from_str(raw, "%Y%m%d").ok();
        if parsed.is_none() {
            warn!(
                "unparsable PatientBirthDate {:?} in session {}",
                raw, session
            );
        }
        parsed
    });
    let age = match (timestamp, birth_date) {
        (Some(at), Some(born)) => Some(compute_age(at, born)),
        _ => None,
    };

    let row = vec![
        ("session_id".to_string(), format!("ses-{}", session)),
        ("session_pseudo_id".to_string(), session.to_string()),
        (
            "session_date_time".to_string(),
            timestamp
                .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        ),
        (
            "age".to_string(),
            age.map(|a| a.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        ),
    ];
    SessionRecord {
        row,
        age,
        birth_date,
    }
}

/// Age in whole years at the session timestamp, truncated.
fn compute_age(at: NaiveDateTime, born: NaiveDate) -> i64 {
    let days = at.date().signed_duration_since(born).num_days();
    (days as f64 / 365.25).floor() as i64
}

/// Normalize the acquisition timestamp of a session.
pub(crate) fn session_timestamp(record: &ImagingRecord) -> Option<NaiveDateTime> {
    let acquisition = record.acquisition_date_time.as_deref();
    let date = match record.study_date.as_deref() {
        Some(d) => d.to_string(),
        None => {
            let fallback = acquisition.filter(|a| a.len() >= 8).map(|a| &a[..8])?;
            warn!(
                "record {:?} has no StudyDate; substituting AcquisitionDateTime date",
                record.path
            );
            fallback.to_string()
        }
    };
    let time = match record.study_time.as_deref() {
        Some(t) => t.to_string(),
        None => match acquisition.filter(|a| a.len() > 8).map(|a| &a[8..]) {
            Some(fallback) => {
                warn!(
                    "record {:?} has no StudyTime; substituting AcquisitionDateTime time",
                    record.path
                );
                fallback.to_string()
            }
            None => "000000".to_string(),
        },
    };

    // Split off an optional seconds fraction, pad HMS to six digits and
    // the fraction to microseconds.
    let (mut hms, fraction) = match time.split_once('.') {
        Some((h, f)) if !f.is_empty() => (h.to_string(), f.to_string()),
        Some((h, _)) => (h.to_string(), "000000".to_string()),
        None => (time, "000000".to_string()),
    };
    while hms.len() < 6 {
        hms.push('0');
    }

    let stamp = format!("{}{}.{}", date, hms, fraction);
    let parsed = NaiveDateTime::parse_from_str(&stamp, "%Y%m%d%H%M%S%.f").ok();
    if parsed.is_none() {
        warn!(
            "record {:?} has unparsable session timestamp {:?}",
            record.path, stamp
        );
    }
    parsed
}

/// Build the participant row by folding the subject's sessions.
///
/// Ages are deduplicated; modalities and body parts are the sorted unions
/// across all the subject's series. Sex must resolve to a single distinct
/// value: disagreement indicates a mis-grouped subject identifier and is
/// surfaced as an error instead of silently picking one.
pub fn participant_record(
    index: &StudyIndex,
    subject: &str,
    dataset_bodypart: &str,
    ages: &[i64],
    birth_date: Option<NaiveDate>,
) -> Result<Row> {
    let scope = Scope::subject(subject);
    let sexes = index.distinct_values(IndexTag::PatientSex, &scope);
    let gender = match sexes.len() {
        0 => NOT_AVAILABLE.to_string(),
        1 => sexes[0].clone(),
        _ => bail!(
            "subject {} resolves to multiple sex values {:?}; the records are likely mis-grouped",
            subject,
            sexes
        ),
    };

    let mut modalities = index.distinct_values(IndexTag::Modality, &scope);
    modalities.sort_unstable();

    let mut body_parts = index.distinct_values(IndexTag::BodyPartExamined, &scope);
    if body_parts.is_empty() {
        body_parts.push(dataset_bodypart.to_string());
    }
    body_parts.sort_unstable();

    let mut unique_ages: Vec<i64> = ages.to_vec();
    unique_ages.sort_unstable();
    unique_ages.dedup();

    Ok(vec![
        ("participant_id".to_string(), format!("sub-{}", subject)),
        ("participant_pseudo_id".to_string(), subject.to_string()),
        ("gender".to_string(), gender),
        (
            "participant_birthday".to_string(),
            birth_date
                .map(|b| b.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        ),
        ("age".to_string(), format_age_list(&unique_ages)),
        ("modalities".to_string(), format_value_list(&modalities)),
        (
            "body_part_examined".to_string(),
            format_value_list(&body_parts),
        ),
    ])
}

fn format_age_list(ages: &[i64]) -> String {
    serde_json::to_string(ages).unwrap_or_else(|_| "[]".to_string())
}

fn format_value_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ImagingRecord {
        ImagingRecord {
            patient_id: "01".to_string(),
            study_id: "A".to_string(),
            study_date: Some("20200615".to_string()),
            study_time: Some("120000".to_string()),
            birth_date: Some("19900101".to_string()),
            ..ImagingRecord::default()
        }
    }

    #[test]
    fn session_row_computes_age_and_iso_timestamp() {
        let rec = session_record(&record(), "A");
        assert_eq!(cell(&rec.row, "session_id"), Some("ses-A"));
        assert_eq!(cell(&rec.row, "session_pseudo_id"), Some("A"));
        assert_eq!(
            cell(&rec.row, "session_date_time"),
            Some("2020-06-15T12:00:00")
        );
        assert_eq!(cell(&rec.row, "age"), Some("30"));
        assert_eq!(rec.age, Some(30));
        assert_eq!(rec.birth_date, NaiveDate::from_ymd_opt(1990, 1, 1));
    }

    #[test]
    fn missing_birth_date_yields_marker_not_error() {
        let mut rec = record();
        rec.birth_date = None;
        let session = session_record(&rec, "A");
        assert_eq!(cell(&session.row, "age"), Some(NOT_AVAILABLE));
        assert_eq!(session.birth_date, None);
    }

    #[test]
    fn timestamp_falls_back_to_acquisition_date_time() {
        let mut rec = record();
        rec.study_time = None;
        rec.acquisition_date_time = Some("20230101120000.000000".to_string());
        rec.study_date = Some("20230101".to_string());
        let stamp = session_timestamp(&rec).unwrap();
        assert_eq!(
            stamp,
            NaiveDate::from_ymd_opt(2023, 1, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn short_study_time_is_padded_to_seconds() {
        let mut rec = record();
        rec.study_time = Some("1200".to_string());
        let stamp = session_timestamp(&rec).unwrap();
        assert_eq!(stamp.format("%H:%M:%S").to_string(), "12:00:00");
    }

    #[test]
    fn trailing_empty_fraction_is_treated_as_zero() {
        let mut rec = record();
        rec.study_time = Some("120000.".to_string());
        let stamp = session_timestamp(&rec).unwrap();
        assert_eq!(stamp.format("%H:%M:%S").to_string(), "12:00:00");
    }

    #[test]
    fn missing_date_and_acquisition_gives_no_timestamp() {
        let mut rec = record();
        rec.study_date = None;
        rec.acquisition_date_time = None;
        assert!(session_timestamp(&rec).is_none());
    }

    fn indexed_record(sex: &str, modality: &str, body_part: Option<&str>) -> ImagingRecord {
        ImagingRecord {
            patient_id: "01".to_string(),
            study_id: "A".to_string(),
            sex: Some(sex.to_string()),
            modality: modality.to_string(),
            body_part: body_part.map(str::to_string),
            ..ImagingRecord::default()
        }
    }

    #[test]
    fn participant_row_dedups_ages_and_unions_tags() {
        let index = StudyIndex::from_records(vec![
            indexed_record("F", "OP", Some("HEAD")),
            indexed_record("F", "SC", Some("HEAD")),
        ]);
        let row = participant_record(&index, "01", "chest", &[34, 35, 34], None).unwrap();
        assert_eq!(cell(&row, "participant_id"), Some("sub-01"));
        assert_eq!(cell(&row, "gender"), Some("F"));
        assert_eq!(cell(&row, "age"), Some("[34,35]"));
        assert_eq!(cell(&row, "modalities"), Some("[\"OP\",\"SC\"]"));
        assert_eq!(cell(&row, "body_part_examined"), Some("[\"HEAD\"]"));
        assert_eq!(cell(&row, "participant_birthday"), Some(NOT_AVAILABLE));
    }

    #[test]
    fn body_part_falls_back_to_dataset_label() {
        let index = StudyIndex::from_records(vec![indexed_record("M", "OP", None)]);
        let row = participant_record(&index, "01", "chest", &[], None).unwrap();
        assert_eq!(cell(&row, "body_part_examined"), Some("[\"chest\"]"));
    }

    #[test]
    fn conflicting_sex_values_are_surfaced_as_error() {
        let index = StudyIndex::from_records(vec![
            indexed_record("F", "OP", None),
            indexed_record("M", "OP", None),
        ]);
        assert!(participant_record(&index, "01", "chest", &[], None).is_err());
    }
}
