//! Spreadsheet persistence.
//!
//! Grids are written with `rust_xlsxwriter` and read back with `calamine`.
//! [`XlsxNormalizer`] rewrites a downloaded workbook as plain values, dropping
//! the styling the report server adds.

use crate::file_ops::ArtifactNormalizer;
use crate::result::{CosechaError, CosechaResult};
use crate::table::Grid;
use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use std::path::Path;

/// Sheet name used for scraped grids
pub const DEFAULT_SHEET: &str = "Sheet1";

/// Cells that look numeric are written as numbers, except codes with leading
/// zeros ("007") which must stay text
fn numeric(cell: &str) -> Option<f64> {
    let t = cell.trim();
    let digits = t.trim_start_matches('-');
    if digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.") {
        return None;
    }
    t.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn xlsx_err(path: &Path, e: &XlsxError) -> CosechaError {
    CosechaError::Normalization {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn write_cell(sheet: &mut Worksheet, row: u32, col: u16, cell: &str) -> Result<(), XlsxError> {
    if cell.is_empty() {
        return Ok(());
    }
    match numeric(cell) {
        Some(n) => sheet.write_number(row, col, n).map(|_| ()),
        None => sheet.write_string(row, col, cell).map(|_| ()),
    }
}

/// Write `grid` to a new workbook at `path`, header row in bold
pub fn write_grid(grid: &Grid, path: &Path) -> CosechaResult<()> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name(DEFAULT_SHEET).map_err(|e| xlsx_err(path, &e))?;

    let mut row = 0u32;
    if let Some(headers) = grid.headers() {
        for (col, h) in headers.iter().enumerate().filter(|(_, h)| !h.is_empty()) {
            sheet
                .write_string_with_format(0, col as u16, h, &bold)
                .map_err(|e| xlsx_err(path, &e))?;
        }
        row = 1;
    }
    for cells in grid.rows() {
        for (col, cell) in cells.iter().enumerate() {
            write_cell(sheet, row, col as u16, cell).map_err(|e| xlsx_err(path, &e))?;
        }
        row += 1;
    }

    workbook.save(path).map_err(|e| xlsx_err(path, &e))?;
    tracing::debug!(path = %path.display(), rows = grid.row_count(), "wrote workbook");
    Ok(())
}

/// Read the first sheet of a workbook; the first row becomes the header
pub fn read_grid(path: &Path) -> CosechaResult<Grid> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| CosechaError::parse(format!("{}: {e}", path.display())))?;
    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| CosechaError::parse(format!("{}: workbook has no sheets", path.display())))?;
    let range = workbook
        .worksheet_range(&first)
        .map_err(|e| CosechaError::parse(format!("{}: {e}", path.display())))?;

    let mut rows = range.rows().map(|r| {
        r.iter()
            .map(|c| match c {
                Data::Empty => String::new(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
    });
    let headers = rows.next();
    Ok(Grid::new(headers, rows.collect()))
}

/// Rewrites the first sheet of a workbook as values only; other sheets are
/// dropped
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxNormalizer;

impl ArtifactNormalizer for XlsxNormalizer {
    fn name(&self) -> &str {
        "xlsx"
    }

    fn normalize(&self, source: &Path, dest: &Path) -> CosechaResult<()> {
        let failed = |message: String| CosechaError::Normalization {
            path: source.display().to_string(),
            message,
        };
        let mut input = open_workbook_auto(source).map_err(|e| failed(e.to_string()))?;
        let name = input
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| failed("workbook has no sheets".to_string()))?;
        let range = input
            .worksheet_range(&name)
            .map_err(|e| failed(format!("sheet '{name}': {e}")))?;

        let mut output = Workbook::new();
        let date = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");
        let (row0, col0) = range.start().unwrap_or((0, 0));
        let sheet = output.add_worksheet();
        sheet.set_name(&name).map_err(|e| xlsx_err(dest, &e))?;

        for (r, cells) in range.rows().enumerate() {
            for (c, cell) in cells.iter().enumerate() {
                let row = row0 + r as u32;
                let col = (col0 as usize + c) as u16;
                let written = match cell {
                    Data::Empty => Ok(()),
                    Data::Int(i) => sheet.write_number(row, col, *i as f64).map(|_| ()),
                    Data::Float(f) => sheet.write_number(row, col, *f).map(|_| ()),
                    Data::Bool(b) => sheet.write_boolean(row, col, *b).map(|_| ()),
                    Data::DateTime(dt) => sheet
                        .write_number_with_format(row, col, dt.as_f64(), &date)
                        .map(|_| ()),
                    other => sheet.write_string(row, col, other.to_string()).map(|_| ()),
                };
                written.map_err(|e| xlsx_err(dest, &e))?;
            }
        }

        output.save(dest).map_err(|e| xlsx_err(dest, &e))?;
        tracing::debug!(sheet = %name, rows = range.height(), "normalized first sheet");
        Ok(())
    }
}
