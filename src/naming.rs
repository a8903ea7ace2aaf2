//! Naming engine: derives the entity-token filename stem for a converted
//! image.
//!
//! The stem is a pure function of the record's attributes and the flag
//! set; it never depends on processing order.

use crate::index::ImagingRecord;

/// Code emitted when the orientation attribute is absent or not covered
/// by the lookup table. The token is degraded, never omitted.
pub const UNKNOWN_VIEW_POSITION: &str = "Unknown";

/// Direction-cosine strings (ImageOrientationPatient, backslash-joined)
/// mapped to short view-position codes.
const VIEW_POSITION_CODES: &[(&str, &str)] = &[
    ("1\\0\\0\\0\\1\\0", "ax"),
    ("1\\0\\0\\0\\0\\-1", "cor"),
    ("0\\1\\0\\0\\0\\-1", "sag"),
];

/// Dataset- and series-wide switches consumed by the naming engine.
///
/// `use_bodypart` and `use_viewposition` are computed once per dataset by
/// the orchestrator; `use_chunk` is true iff the enclosing series has more
/// than one instance.
#[derive(Debug, Clone, Copy)]
pub struct NamingContext<'a> {
    /// Body part label configured for the whole run, used as fallback
    /// when the record carries none.
    pub dataset_bodypart: &'a str,
    pub use_bodypart: bool,
    pub use_viewposition: bool,
    pub use_chunk: bool,
}

/// Map an orientation attribute to a short view-position code.
pub fn view_position_code(orientation: Option<&str>) -> &'static str {
    let Some(orientation) = orientation else {
        return UNKNOWN_VIEW_POSITION;
    };
    let normalized: String = orientation
        .split('\\')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\\");
    VIEW_POSITION_CODES
        .iter()
        .find(|(cosines, _)| *cosines == normalized)
        .map(|(_, code)| *code)
        .unwrap_or(UNKNOWN_VIEW_POSITION)
}

/// Build the filename stem for one record:
/// `sub-<id>[_ses-<id>][_run-<n>][_bp-<part>][_lat-<side>][_vp-<code>][_chunk-<n>]_<suffix>`.
///
/// `ordinal` is the record's 1-based position within its sorted series;
/// it substitutes for a missing instance number in the chunk token, so
/// multi-instance series never produce colliding stems.
///
/// Empty tokens are skipped when joining, so no separator ever appears
/// between two absent slots.
pub fn entity_stem(
    record: &ImagingRecord,
    ordinal: usize,
    suffix: &str,
    ctx: &NamingContext,
) -> String {
    let sub = format!("sub-{}", record.patient_id);
    let ses = format!("ses-{}", record.study_id);
    let run = record
        .series_number
        .as_ref()
        .map(|n| format!("run-{}", n));
    let bp = ctx.use_bodypart.then(|| {
        let part = record
            .body_part
            .as_deref()
            .unwrap_or(ctx.dataset_bodypart);
        format!("bp-{}", part)
    });
    let lat = record
        .laterality
        .as_ref()
        .map(|l| format!("lat-{}", l));
    let vp = ctx
        .use_viewposition
        .then(|| format!("vp-{}", view_position_code(record.orientation.as_deref())));
    let chunk = ctx.use_chunk.then(|| {
        let label = record
            .instance_label
            .clone()
            .unwrap_or_else(|| ordinal.to_string());
        format!("chunk-{}", label)
    });

    let tokens = [
        Some(sub),
        Some(ses),
        run,
        bp,
        lat,
        vp,
        chunk,
        Some(suffix.to_string()),
    ];
    tokens
        .into_iter()
        .flatten()
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
