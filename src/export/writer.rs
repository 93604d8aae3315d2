//! Zip archive writer: one CSV file per sheet.

use crate::error::ResourceError;
use crate::export::sheets::{Sheet, Workbook, ARRAY_PLACEHOLDER};
use serde_json::Value;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Serialize each sheet as `<title>.csv`, headers first, every cell a string.
/// A failing sheet is logged and skipped; an archive-level failure is
/// returned to the caller.
pub fn write_zip(workbook: &Workbook) -> Result<Vec<u8>, ResourceError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut used_names: HashSet<String> = HashSet::new();
    for sheet in &workbook.sheets {
        let name = unique_name(&mut used_names, &sheet.title);
        if let Err(e) = write_sheet(&mut writer, &name, sheet) {
            tracing::error!(sheet = %sheet.title, error = %e, "failed to write export sheet");
        }
    }
    let cursor = writer.finish().map_err(|e| ResourceError::Export(e.to_string()))?;
    Ok(cursor.into_inner())
}

fn write_sheet(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: &str,
    sheet: &Sheet,
) -> Result<(), String> {
    writer
        .start_file(format!("{}.csv", name), SimpleFileOptions::default())
        .map_err(|e| e.to_string())?;
    let headers = sheet.headers();
    if !headers.is_empty() {
        write_record(writer, &headers).map_err(|e| e.to_string())?;
    }
    for row in &sheet.rows {
        let cells: Vec<String> = row.values().map(csv_cell).collect();
        write_record(writer, &cells).map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// CSV cell rendering for raw (main/focus sheet) values; relation-sheet
/// values are already strings.
fn csv_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(_) | Value::Object(_) => ARRAY_PLACEHOLDER.into(),
        other => other.to_string(),
    }
}

fn write_record<W: Write>(writer: &mut W, cells: &[String]) -> std::io::Result<()> {
    let line = cells.iter().map(|c| escape(c)).collect::<Vec<_>>().join(",");
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\r\n")
}

fn escape(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') || cell.contains('\r') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Sheet titles are display names and may repeat; archive entries cannot.
fn unique_name(used: &mut HashSet<String>, title: &str) -> String {
    let base: String = title
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    let mut name = base.clone();
    let mut n = 2;
    while !used.insert(name.clone()) {
        name = format!("{} ({})", base, n);
        n += 1;
    }
    name
}
