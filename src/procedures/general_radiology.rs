//! General radiologic imaging: plain-film radiography (CR/DX) and
//! cross-sectional tomography (CT/PT).

use dicom::core::Tag;
use dicom::dictionary_std::tags;

/// Body parts with a BIDS-defined directory layout; everything else stays
/// under the MIDS `mim-rx` tree.
const BIDS_BODY_PARTS: &[&str] = &["head", "brain", "skull"];

pub(crate) const RADIOGRAPHY_COLUMNS: &[(&str, Tag)] = &[
    ("view_position", tags::VIEW_POSITION),
    ("series_number", tags::SERIES_NUMBER),
    ("accession_number", tags::ACCESSION_NUMBER),
    ("manufacturer", tags::MANUFACTURER),
    ("manufacturer_model_name", tags::MANUFACTURER_MODEL_NAME),
    ("modality", tags::MODALITY),
    ("columns", tags::COLUMNS),
    ("rows", tags::ROWS),
    ("photometric_interpretation", tags::PHOTOMETRIC_INTERPRETATION),
    ("laterality", tags::LATERALITY),
    ("kvp", tags::KVP),
    ("exposure", tags::EXPOSURE),
    ("exposure_time", tags::EXPOSURE_TIME),
    ("xray_tube_current", tags::X_RAY_TUBE_CURRENT),
];

/// Tomography rows extend radiography with the reconstruction
/// parameters.
pub(crate) const TOMOGRAPHY_COLUMNS: &[(&str, Tag)] = &[
    ("view_position", tags::VIEW_POSITION),
    ("series_number", tags::SERIES_NUMBER),
    ("accession_number", tags::ACCESSION_NUMBER),
    ("manufacturer", tags::MANUFACTURER),
    ("manufacturer_model_name", tags::MANUFACTURER_MODEL_NAME),
    ("modality", tags::MODALITY),
    ("columns", tags::COLUMNS),
    ("rows", tags::ROWS),
    ("photometric_interpretation", tags::PHOTOMETRIC_INTERPRETATION),
    ("laterality", tags::LATERALITY),
    ("kvp", tags::KVP),
    ("exposure", tags::EXPOSURE),
    ("exposure_time", tags::EXPOSURE_TIME),
    ("xray_tube_current", tags::X_RAY_TUBE_CURRENT),
    ("data_collection_diameter", tags::DATA_COLLECTION_DIAMETER),
    ("reconstruction_diameter", tags::RECONSTRUCTION_DIAMETER),
    ("slice_thickness", tags::SLICE_THICKNESS),
    ("convolution_kernel", tags::CONVOLUTION_KERNEL),
    ("smallest_image_pixel_value", tags::SMALLEST_IMAGE_PIXEL_VALUE),
    ("largest_image_pixel_value", tags::LARGEST_IMAGE_PIXEL_VALUE),
    ("window_center", tags::WINDOW_CENTER),
    ("window_width", tags::WINDOW_WIDTH),
];

pub(crate) fn is_bids_bodypart(bodypart: &str) -> bool {
    BIDS_BODY_PARTS
        .iter()
        .any(|bp| bp.eq_ignore_ascii_case(bodypart))
}

/// Image sub-directories under the session: the plain BIDS directory for
/// covered body parts when the BIDS standard is requested, otherwise the
/// MIDS `mim-rx` tree.
pub(crate) fn image_dirs(modality: &str, bodypart: &str, bids: bool) -> Vec<String> {
    let modality_dir = modality.to_lowercase();
    if bids && is_bids_bodypart(bodypart) {
        vec![modality_dir]
    } else {
        vec!["mim-rx".to_string(), modality_dir]
    }
}
