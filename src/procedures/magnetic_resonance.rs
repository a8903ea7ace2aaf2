//! Magnetic resonance imaging.

use dicom::core::Tag;
use dicom::dictionary_std::tags;

use super::general_radiology::is_bids_bodypart;

pub(crate) const MR_COLUMNS: &[(&str, Tag)] = &[
    ("series_number", tags::SERIES_NUMBER),
    ("accession_number", tags::ACCESSION_NUMBER),
    ("manufacturer", tags::MANUFACTURER),
    ("manufacturer_model_name", tags::MANUFACTURER_MODEL_NAME),
    ("modality", tags::MODALITY),
    ("columns", tags::COLUMNS),
    ("rows", tags::ROWS),
    ("photometric_interpretation", tags::PHOTOMETRIC_INTERPRETATION),
    ("laterality", tags::LATERALITY),
    ("magnetic_field_strength", tags::MAGNETIC_FIELD_STRENGTH),
    ("repetition_time", tags::REPETITION_TIME),
    ("echo_time", tags::ECHO_TIME),
    ("inversion_time", tags::INVERSION_TIME),
    ("flip_angle", tags::FLIP_ANGLE),
    ("echo_train_length", tags::ECHO_TRAIN_LENGTH),
    ("slice_thickness", tags::SLICE_THICKNESS),
];

/// Anatomical MR lands in the BIDS `anat` directory when the standard is
/// requested for a covered body part, otherwise under `mim-mr`.
pub(crate) fn image_dirs(bodypart: &str, bids: bool) -> Vec<String> {
    if bids && is_bids_bodypart(bodypart) {
        vec!["anat".to_string()]
    } else {
        vec!["mim-mr".to_string()]
    }
}
