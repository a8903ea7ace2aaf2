//! Study index: discovery of DICOM files and tag-based lookup across the
//! subject → session → series → instance hierarchy.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use dicom::dictionary_std::tags;
use dicom::object::{DefaultDicomObject, OpenFileOptions};
use log::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;
use zip::ZipArchive;

/// Immutable snapshot of one image instance: its source path plus the
/// attributes the pipeline needs for grouping, naming and aggregation.
/// The full attribute tree is re-read from `path` when a procedure
/// flattens or converts the instance.
#[derive(Debug, Clone, Default)]
pub struct ImagingRecord {
    pub path: PathBuf,
    pub patient_id: String,
    pub study_id: String,
    pub series_number: Option<String>,
    /// Instance number parsed for ordering; `None` when missing or not
    /// a valid integer.
    pub instance_number: Option<i64>,
    /// Raw instance number string, used for the chunk entity token.
    pub instance_label: Option<String>,
    pub modality: String,
    pub body_part: Option<String>,
    pub laterality: Option<String>,
    pub view_position: Option<String>,
    /// Raw ImageOrientationPatient value, backslash-separated.
    pub orientation: Option<String>,
    pub sex: Option<String>,
    pub birth_date: Option<String>,
    pub study_date: Option<String>,
    pub study_time: Option<String>,
    pub acquisition_date_time: Option<String>,
}

impl ImagingRecord {
    fn from_object(path: &Path, obj: &DefaultDicomObject) -> Option<Self> {
        let patient_id = elem_str(obj, tags::PATIENT_ID)?;
        let study_id = elem_str(obj, tags::STUDY_ID)?;
        let instance_label = elem_str(obj, tags::INSTANCE_NUMBER);
        let instance_number = instance_label
            .as_deref()
            .and_then(|s| s.trim().parse::<i64>().ok());
        Some(ImagingRecord {
            path: path.to_path_buf(),
            patient_id,
            study_id,
            series_number: elem_str(obj, tags::SERIES_NUMBER),
            instance_number,
            instance_label,
            modality: elem_str(obj, tags::MODALITY).unwrap_or_default(),
            body_part: elem_str(obj, tags::BODY_PART_EXAMINED),
            laterality: elem_str(obj, tags::LATERALITY),
            view_position: elem_str(obj, tags::VIEW_POSITION),
            orientation: elem_str(obj, tags::IMAGE_ORIENTATION_PATIENT),
            sex: elem_str(obj, tags::PATIENT_SEX),
            birth_date: elem_str(obj, tags::PATIENT_BIRTH_DATE),
            study_date: elem_str(obj, tags::STUDY_DATE),
            study_time: elem_str(obj, tags::STUDY_TIME),
            acquisition_date_time: elem_str(obj, tags::ACQUISITION_DATE_TIME),
        })
    }

    /// Sort key within a series. Records without a usable instance number
    /// sort before everything else rather than aborting the group.
    pub fn instance_sort_key(&self) -> i64 {
        self.instance_number.unwrap_or(i64::MIN)
    }
}

pub(crate) fn elem_str(obj: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<String> {
    obj.element_opt(tag)
        .ok()
        .flatten()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Attributes the index can enumerate and filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTag {
    PatientId,
    StudyId,
    SeriesNumber,
    Modality,
    BodyPartExamined,
    ViewPosition,
    PatientSex,
}

impl IndexTag {
    fn value_of<'a>(&self, record: &'a ImagingRecord) -> Option<&'a str> {
        match self {
            IndexTag::PatientId => Some(&record.patient_id),
            IndexTag::StudyId => Some(&record.study_id),
            IndexTag::SeriesNumber => record.series_number.as_deref(),
            IndexTag::Modality => {
                (!record.modality.is_empty()).then_some(record.modality.as_str())
            }
            IndexTag::BodyPartExamined => record.body_part.as_deref(),
            IndexTag::ViewPosition => record.view_position.as_deref(),
            IndexTag::PatientSex => record.sex.as_deref(),
        }
    }
}

/// Exact-match constraints on the subject/session/series identifiers.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub subject: Option<String>,
    pub session: Option<String>,
    pub series: Option<String>,
}

impl Scope {
    pub fn all() -> Self {
        Scope::default()
    }

    pub fn subject(subject: &str) -> Self {
        Scope {
            subject: Some(subject.to_string()),
            ..Scope::default()
        }
    }

    pub fn session(subject: &str, session: &str) -> Self {
        Scope {
            subject: Some(subject.to_string()),
            session: Some(session.to_string()),
            ..Scope::default()
        }
    }

    pub fn series(subject: &str, session: &str, series: &str) -> Self {
        Scope {
            subject: Some(subject.to_string()),
            session: Some(session.to_string()),
            series: Some(series.to_string()),
        }
    }

    fn matches(&self, record: &ImagingRecord) -> bool {
        self.subject
            .as_deref()
            .is_none_or(|s| s == record.patient_id)
            && self.session.as_deref().is_none_or(|s| s == record.study_id)
            && self
                .series
                .as_deref()
                .is_none_or(|s| Some(s) == record.series_number.as_deref())
    }
}

/// The ordered sequence of records sharing (subject, session, series),
/// sorted by instance number ascending. Built once per series and
/// consumed immediately.
#[derive(Debug, Clone)]
pub struct SeriesGroup {
    pub records: Vec<ImagingRecord>,
}

impl SeriesGroup {
    /// Modality of the first instance, which decides the procedure.
    pub fn modality(&self) -> &str {
        self.records
            .first()
            .map(|r| r.modality.as_str())
            .unwrap_or_default()
    }

    /// The chunk entity token is emitted iff the series holds more than
    /// one instance.
    pub fn use_chunk(&self) -> bool {
        self.records.len() > 1
    }
}

/// Flat collection of imaging records with tag-based enumeration and
/// filtering. Records keep their discovery order; `distinct_values`
/// preserves first-seen order, which is also the traversal order of the
/// orchestrator.
#[derive(Debug, Default)]
pub struct StudyIndex {
    records: Vec<ImagingRecord>,
}

impl StudyIndex {
    /// Discover DICOM files under `input` (a file, a directory or a ZIP
    /// archive) and snapshot every readable record. An empty collection
    /// is a fatal input error.
    pub fn scan(input: &Path, max_depth: usize) -> Result<Self> {
        let files = collect_dicom_files(input, max_depth)?;
        if files.is_empty() {
            bail!("no DICOM files found in {:?}", input);
        }

        let mut records = Vec::new();
        for file in &files {
            let obj = match OpenFileOptions::new()
                .read_until(tags::PIXEL_DATA)
                .open_file(file)
            {
                Ok(obj) => obj,
                Err(e) => {
                    warn!("skipping unreadable file {:?}: {}", file, e);
                    continue;
                }
            };
            match ImagingRecord::from_object(file, &obj) {
                Some(record) => records.push(record),
                None => {
                    warn!(
                        "skipping {:?}: missing PatientID or StudyID",
                        file
                    );
                }
            }
        }

        if records.is_empty() {
            bail!("no readable DICOM records found in {:?}", input);
        }
        debug!("indexed {} records from {:?}", records.len(), input);
        Ok(StudyIndex { records })
    }

    /// Build an index from pre-assembled records. Useful for embedding
    /// and for tests.
    pub fn from_records(records: Vec<ImagingRecord>) -> Self {
        StudyIndex { records }
    }

    /// Distinct values of `tag` within `scope`, first-seen order.
    pub fn distinct_values(&self, tag: IndexTag, scope: &Scope) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for record in self.filter(scope) {
            if let Some(value) = tag.value_of(record) {
                if seen.insert(value.to_string()) {
                    values.push(value.to_string());
                }
            }
        }
        values
    }

    /// Records matching `scope`, in index order. The iterator borrows
    /// only the index, not the scope.
    pub fn filter<'a>(
        &'a self,
        scope: &Scope,
    ) -> impl Iterator<Item = &'a ImagingRecord> + use<'a> {
        let scope = scope.clone();
        self.records.iter().filter(move |r| scope.matches(r))
    }

    /// First record matching `scope`, if any.
    pub fn first(&self, scope: &Scope) -> Option<&ImagingRecord> {
        self.filter(scope).next()
    }

    /// Collapse the records of `scope` into one snapshot, taking the
    /// first non-empty value of each demographic and timing attribute.
    /// An attribute carried only by a later instance still resolves.
    pub fn session_snapshot(&self, scope: &Scope) -> Option<ImagingRecord> {
        let mut records = self.filter(scope);
        let mut snapshot = records.next()?.clone();
        for record in records {
            if snapshot.sex.is_none() {
                snapshot.sex = record.sex.clone();
            }
            if snapshot.birth_date.is_none() {
                snapshot.birth_date = record.birth_date.clone();
            }
            if snapshot.study_date.is_none() {
                snapshot.study_date = record.study_date.clone();
            }
            if snapshot.study_time.is_none() {
                snapshot.study_time = record.study_time.clone();
            }
            if snapshot.acquisition_date_time.is_none() {
                snapshot.acquisition_date_time = record.acquisition_date_time.clone();
            }
        }
        Some(snapshot)
    }

    /// All records of one series, ordered by instance number ascending.
    pub fn series_group(&self, subject: &str, session: &str, series: &str) -> SeriesGroup {
        let scope = Scope::series(subject, session, series);
        let mut records: Vec<ImagingRecord> = self.filter(&scope).cloned().collect();
        for record in &records {
            if record.instance_number.is_none() {
                warn!(
                    "record {:?} has no usable InstanceNumber; sorting it first",
                    record.path
                );
            }
        }
        records.sort_by_key(|r| r.instance_sort_key());
        SeriesGroup { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Collect candidate DICOM files from a file, directory or ZIP archive.
pub fn collect_dicom_files(input: &Path, max_depth: usize) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if input.is_file() {
        let is_zip = input
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if is_zip {
            debug!("extracting ZIP archive {:?}", input);
            files.extend(extract_zip_files(input)?);
        } else {
            files.push(input.to_path_buf());
        }
    } else if input.is_dir() {
        for entry in WalkDir::new(input)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && is_likely_dicom_file(entry.path()) {
                files.push(entry.path().to_path_buf());
            }
        }
    } else {
        bail!("input path does not exist: {:?}", input);
    }

    Ok(files)
}

fn extract_zip_files(zip_path: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(zip_path)
        .with_context(|| format!("failed to open archive {:?}", zip_path))?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let mut extracted_files = Vec::new();

    let temp_dir = std::env::temp_dir().join(format!("dcm2mids_extract_{}", Uuid::new_v4()));
    fs::create_dir_all(&temp_dir)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if !file.is_dir() {
            let file_path = temp_dir.join(file.name());

            if let Some(parent) = file_path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut output = File::create(&file_path)?;
            std::io::copy(&mut file, &mut output)?;

            if is_likely_dicom_file(&file_path) {
                extracted_files.push(file_path);
            }
        }
    }

    Ok(extracted_files)
}

fn is_likely_dicom_file(path: &Path) -> bool {
    if let Some(ext) = path.extension() {
        let ext_str = ext.to_string_lossy().to_lowercase();
        if matches!(ext_str.as_str(), "dcm" | "dicom" | "ima" | "img") {
            return true;
        }
    }

    // No recognized extension: check for the DICM magic at offset 128.
    if let Ok(mut file) = File::open(path) {
        let mut buffer = [0u8; 132];
        if file.read_exact(&mut buffer).is_ok() {
            return &buffer[128..132] == b"DICM";
        }
    }

    false
}
