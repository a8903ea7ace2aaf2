//! Reorganize a collection of DICOM studies into a BIDS/MIDS directory
//! tree with three tiers of tabular metadata (participants, sessions,
//! scans).
//!
//! The crate is split along the pipeline stages: [`index`] discovers and
//! groups the source records, [`procedures`] selects a modality-specific
//! conversion strategy per series, [`naming`] derives the output
//! identifiers, and [`convert`] folds the per-scan results upward into the
//! session and participant tables.

pub mod codec;
pub mod convert;
pub mod flatten;
pub mod index;
pub mod naming;
pub mod procedures;
pub mod tables;
pub mod tsv;
