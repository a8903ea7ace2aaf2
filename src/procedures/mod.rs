//! Procedure dispatcher and the modality-keyed family of conversion
//! strategies.
//!
//! Each series is classified once, from the modality of its first
//! instance, into exactly one procedure variant. A variant decides the
//! target image format, the sub-directory placement, the filename suffix
//! and the technical tags of its scan rows; the conversion pipeline
//! itself is shared.

mod general_radiology;
mod magnetic_resonance;
mod visible_light;

use std::path::{Path, PathBuf};

use anyhow::Result;
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::{DefaultDicomObject, OpenFileOptions};
use log::{debug, info, warn};

use crate::codec::{self, ImageFormat};
use crate::flatten;
use crate::index::{SeriesGroup, elem_str};
use crate::naming::{self, NamingContext};
use crate::tables::{NOT_AVAILABLE, Row};

/// Dataset-wide inputs a procedure needs besides the series itself.
#[derive(Debug, Clone, Copy)]
pub struct ProcedureContext<'a> {
    /// Root of the output dataset.
    pub mids_path: &'a Path,
    /// Body part label configured for the run.
    pub dataset_bodypart: &'a str,
    pub use_bodypart: bool,
    pub use_viewposition: bool,
    /// Use the fixed BIDS naming standard where it applies.
    pub bids: bool,
}

/// Scan rows produced for one series, together with their column order.
#[derive(Debug, Clone, Default)]
pub struct ScanTable {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Records dropped because of codec or read failures.
    pub skipped: usize,
}

impl ScanTable {
    fn with_columns(columns: &[(&str, Tag)]) -> Self {
        let mut names = vec!["scan_file".to_string(), "body_part".to_string()];
        names.extend(columns.iter().map(|(name, _)| name.to_string()));
        ScanTable {
            columns: names,
            rows: Vec::new(),
            skipped: 0,
        }
    }

    /// Fold another series' table into this one, unioning columns in
    /// first-seen order so sessions mixing procedure variants still
    /// produce one aligned table.
    pub fn merge(&mut self, other: ScanTable) {
        for column in other.columns {
            if !self.columns.contains(&column) {
                self.columns.push(column);
            }
        }
        self.rows.extend(other.rows);
        self.skipped += other.skipped;
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The closed set of conversion strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Procedure {
    MagneticResonance,
    ConventionalRadiology,
    Tomography,
    Ophthalmology,
    Microscopy,
}

impl Procedure {
    /// Modality → variant lookup. Unmapped modalities are unclassified:
    /// the series is skipped with a log line and produces no rows.
    pub fn classify(modality: &str) -> Option<Procedure> {
        match modality {
            "MR" => Some(Procedure::MagneticResonance),
            "CR" | "DX" => Some(Procedure::ConventionalRadiology),
            "CT" | "PT" => Some(Procedure::Tomography),
            "OP" | "SC" | "XC" | "OT" => Some(Procedure::Ophthalmology),
            "SM" | "BF" => Some(Procedure::Microscopy),
            _ => None,
        }
    }

    /// True 3-D acquisitions get a volumetric output; projection,
    /// visible-light and microscopy images a 2-D raster.
    fn image_format(&self) -> ImageFormat {
        match self {
            Procedure::MagneticResonance | Procedure::Tomography => ImageFormat::NiftiGz,
            _ => ImageFormat::Png,
        }
    }

    /// Modality suffix ending the filename stem.
    fn suffix(&self, modality: &str) -> String {
        match self {
            Procedure::Ophthalmology => "op".to_string(),
            Procedure::Microscopy => "bf".to_string(),
            _ => modality.to_lowercase(),
        }
    }

    fn image_dirs(&self, modality: &str, ctx: &ProcedureContext) -> Vec<String> {
        match self {
            Procedure::Ophthalmology => visible_light::ophthalmology_dirs(),
            Procedure::Microscopy => visible_light::microscopy_dirs(),
            Procedure::ConventionalRadiology | Procedure::Tomography => {
                general_radiology::image_dirs(modality, ctx.dataset_bodypart, ctx.bids)
            }
            Procedure::MagneticResonance => {
                magnetic_resonance::image_dirs(ctx.dataset_bodypart, ctx.bids)
            }
        }
    }

    fn columns(&self) -> &'static [(&'static str, Tag)] {
        match self {
            Procedure::MagneticResonance => magnetic_resonance::MR_COLUMNS,
            Procedure::ConventionalRadiology => general_radiology::RADIOGRAPHY_COLUMNS,
            Procedure::Tomography => general_radiology::TOMOGRAPHY_COLUMNS,
            Procedure::Ophthalmology => visible_light::OPHTHALMOLOGY_COLUMNS,
            Procedure::Microscopy => visible_light::MICROSCOPY_COLUMNS,
        }
    }

    /// Convert every record of the series in ascending instance order:
    /// derive the output name, write the image and its JSON sidecar, and
    /// collect one scan row per converted record. A record the codec
    /// cannot handle is skipped with a diagnostic; the series continues.
    pub fn run(&self, ctx: &ProcedureContext, group: &SeriesGroup) -> Result<ScanTable> {
        let mut table = ScanTable::with_columns(self.columns());
        let naming_ctx = NamingContext {
            dataset_bodypart: ctx.dataset_bodypart,
            use_bodypart: ctx.use_bodypart,
            use_viewposition: ctx.use_viewposition,
            use_chunk: group.use_chunk(),
        };

        for (position, record) in group.records.iter().enumerate() {
            debug!("processing instance {:?}", record.path);
            let obj = match OpenFileOptions::new()
                .read_until(tags::PIXEL_DATA)
                .open_file(&record.path)
            {
                Ok(obj) => obj,
                Err(e) => {
                    warn!("skipping unreadable instance {:?}: {}", record.path, e);
                    table.skipped += 1;
                    continue;
                }
            };

            let suffix = self.suffix(&record.modality);
            let stem = naming::entity_stem(record, position + 1, &suffix, &naming_ctx);
            let subdirs = self.image_dirs(&record.modality, ctx);
            let session_dir = ctx
                .mids_path
                .join(format!("sub-{}", record.patient_id))
                .join(format!("ses-{}", record.study_id));
            let mut image_dir = session_dir.clone();
            for dir in &subdirs {
                image_dir.push(dir);
            }

            let file_name = format!("{}{}", stem, self.image_format().extension());
            let image_path: PathBuf = image_dir.join(&file_name);
            if let Err(e) = codec::convert_image(&record.path, &image_path, self.image_format()) {
                warn!("skipping instance {:?}: {:#}", record.path, e);
                table.skipped += 1;
                continue;
            }
            flatten::write_sidecar(obj.iter(), &image_dir.join(format!("{}.json", stem)))?;

            // scan_file is relative to the session directory, with
            // forward slashes regardless of platform.
            let scan_file = if subdirs.is_empty() {
                file_name.clone()
            } else {
                format!("{}/{}", subdirs.join("/"), file_name)
            };
            table.rows.push(self.scan_row(&obj, record, scan_file, ctx));
            info!("converted {:?} to {}", record.path, stem);
        }

        Ok(table)
    }

    /// Build the variant-specific scan row. Tags absent from the source
    /// are recorded with the not-available marker, never dropped from the
    /// row shape.
    fn scan_row(
        &self,
        obj: &DefaultDicomObject,
        record: &crate::index::ImagingRecord,
        scan_file: String,
        ctx: &ProcedureContext,
    ) -> Row {
        let body_part = record
            .body_part
            .clone()
            .unwrap_or_else(|| ctx.dataset_bodypart.to_string());
        let mut row: Row = vec![
            ("scan_file".to_string(), scan_file),
            ("body_part".to_string(), body_part),
        ];
        for (name, tag) in self.columns() {
            let value = elem_str(obj, *tag).unwrap_or_else(|| NOT_AVAILABLE.to_string());
            row.push((name.to_string(), value));
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::cell;

    #[test]
    fn modalities_map_to_their_variant() {
        assert_eq!(Procedure::classify("MR"), Some(Procedure::MagneticResonance));
        assert_eq!(
            Procedure::classify("CR"),
            Some(Procedure::ConventionalRadiology)
        );
        assert_eq!(
            Procedure::classify("DX"),
            Some(Procedure::ConventionalRadiology)
        );
        assert_eq!(Procedure::classify("CT"), Some(Procedure::Tomography));
        assert_eq!(Procedure::classify("PT"), Some(Procedure::Tomography));
        for m in ["OP", "SC", "XC", "OT"] {
            assert_eq!(Procedure::classify(m), Some(Procedure::Ophthalmology));
        }
        for m in ["SM", "BF"] {
            assert_eq!(Procedure::classify(m), Some(Procedure::Microscopy));
        }
    }

    #[test]
    fn unmapped_modality_is_unclassified() {
        assert_eq!(Procedure::classify("XX"), None);
        assert_eq!(Procedure::classify(""), None);
    }

    #[test]
    fn tomography_and_mr_write_volumes_others_rasters() {
        assert_eq!(
            Procedure::MagneticResonance.image_format(),
            ImageFormat::NiftiGz
        );
        assert_eq!(Procedure::Tomography.image_format(), ImageFormat::NiftiGz);
        assert_eq!(Procedure::Ophthalmology.image_format(), ImageFormat::Png);
        assert_eq!(Procedure::Microscopy.image_format(), ImageFormat::Png);
        assert_eq!(
            Procedure::ConventionalRadiology.image_format(),
            ImageFormat::Png
        );
    }

    #[test]
    fn scan_table_columns_start_with_file_and_body_part() {
        let table = ScanTable::with_columns(Procedure::Ophthalmology.columns());
        assert_eq!(table.columns[0], "scan_file");
        assert_eq!(table.columns[1], "body_part");
        assert!(table.columns.contains(&"photometric_interpretation".to_string()));
    }

    #[test]
    fn merge_unions_columns_in_first_seen_order() {
        let mut left = ScanTable {
            columns: vec!["scan_file".into(), "kvp".into()],
            rows: vec![vec![("scan_file".to_string(), "a.png".to_string())]],
            skipped: 1,
        };
        let right = ScanTable {
            columns: vec!["scan_file".into(), "number_of_frames".into()],
            rows: vec![vec![("scan_file".to_string(), "b.png".to_string())]],
            skipped: 0,
        };
        left.merge(right);
        assert_eq!(left.columns, vec!["scan_file", "kvp", "number_of_frames"]);
        assert_eq!(left.rows.len(), 2);
        assert_eq!(left.skipped, 1);
        assert_eq!(cell(&left.rows[1], "scan_file"), Some("b.png"));
    }
}
