//! Multi-sheet tabular export: build sheets, serialize as CSVs in a zip.

mod sheets;
mod writer;

pub use sheets::{Sheet, Workbook, ARRAY_PLACEHOLDER};
pub use writer::write_zip;
