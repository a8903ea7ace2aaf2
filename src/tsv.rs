//! Tabular writer: serializes uniform rows to a tab-delimited file with a
//! fixed column order and a single sort key.

use std::path::Path;

use anyhow::{Context, Result};
use csv::WriterBuilder;

use crate::tables::{NOT_AVAILABLE, Row, cell};

/// Write `rows` to `path` as TSV.
///
/// Only the named columns appear, in the given order; a cell missing from
/// a row is filled with the not-available marker so columns never
/// misalign. Rows are stable-sorted on `sort_key` before writing.
pub fn write_table(
    path: &Path,
    columns: &[String],
    rows: &[Row],
    sort_key: &str,
    descending: bool,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut ordered: Vec<&Row> = rows.iter().collect();
    ordered.sort_by(|a, b| {
        let ka = cell(a, sort_key).unwrap_or("");
        let kb = cell(b, sort_key).unwrap_or("");
        if descending { kb.cmp(ka) } else { ka.cmp(kb) }
    });

    // Cells are already sanitized (no tabs or newlines); quoting would
    // mangle the JSON-formatted list cells.
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_path(path)
        .with_context(|| format!("failed to create {:?}", path))?;
    writer.write_record(columns)?;
    for row in ordered {
        let record: Vec<&str> = columns
            .iter()
            .map(|col| cell(row, col).unwrap_or(NOT_AVAILABLE))
            .collect();
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}
