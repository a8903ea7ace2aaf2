//! Visible-light imaging: ophthalmology-style photographs and whole-slide
//! microscopy.

use dicom::core::Tag;
use dicom::dictionary_std::tags;

/// Technical tags carried by ophthalmology/visible-light scan rows.
pub(crate) const OPHTHALMOLOGY_COLUMNS: &[(&str, Tag)] = &[
    ("series_number", tags::SERIES_NUMBER),
    ("accession_number", tags::ACCESSION_NUMBER),
    ("manufacturer", tags::MANUFACTURER),
    ("manufacturer_model_name", tags::MANUFACTURER_MODEL_NAME),
    ("modality", tags::MODALITY),
    ("columns", tags::COLUMNS),
    ("rows", tags::ROWS),
    ("photometric_interpretation", tags::PHOTOMETRIC_INTERPRETATION),
    ("laterality", tags::LATERALITY),
];

/// Microscopy rows swap laterality for the imaged-volume dimensions.
pub(crate) const MICROSCOPY_COLUMNS: &[(&str, Tag)] = &[
    ("series_number", tags::SERIES_NUMBER),
    ("accession_number", tags::ACCESSION_NUMBER),
    ("manufacturer", tags::MANUFACTURER),
    ("manufacturer_model_name", tags::MANUFACTURER_MODEL_NAME),
    ("modality", tags::MODALITY),
    ("columns", tags::COLUMNS),
    ("rows", tags::ROWS),
    ("photometric_interpretation", tags::PHOTOMETRIC_INTERPRETATION),
    ("imaged_volume_width", tags::IMAGED_VOLUME_WIDTH),
    ("imaged_volume_height", tags::IMAGED_VOLUME_HEIGHT),
    ("imaged_volume_depth", tags::IMAGED_VOLUME_DEPTH),
    ("number_of_frames", tags::NUMBER_OF_FRAMES),
];

pub(crate) fn ophthalmology_dirs() -> Vec<String> {
    vec!["mim-light".to_string(), "op".to_string()]
}

pub(crate) fn microscopy_dirs() -> Vec<String> {
    vec!["micr".to_string()]
}
