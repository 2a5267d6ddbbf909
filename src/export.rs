//! Spreadsheet rendering for `/export`.

use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};

use crate::error::{AppError, AppResult};
use crate::gateway::{normalize_cell, ExportCell, QueryResult};

pub const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const EXPORT_FILENAME: &str = "export.xlsx";
pub const SHEET_NAME: &str = "data";

/// Excel's per-cell text limit.
const MAX_CELL_CHARS: usize = 32_767;

fn export_error(e: XlsxError) -> AppError {
    AppError::internal("export_failed".to_string(), format!("Failed to build spreadsheet: {}", e))
}

fn clip(s: &str) -> &str {
    match s.char_indices().nth(MAX_CELL_CHARS) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn write_cell(ws: &mut Worksheet, row: u32, col: u16, cell: &ExportCell, date_fmt: &Format, datetime_fmt: &Format) -> Result<(), XlsxError> {
    match cell {
        ExportCell::Empty => {}
        ExportCell::Bool(b) => {
            ws.write_boolean(row, col, *b)?;
        }
        ExportCell::Number(n) => {
            ws.write_number(row, col, *n)?;
        }
        ExportCell::Text(s) => {
            ws.write_string(row, col, clip(s))?;
        }
        ExportCell::Date(d) => {
            ws.write_datetime_with_format(row, col, d, date_fmt)?;
        }
        ExportCell::DateTime(ts) => {
            ws.write_datetime_with_format(row, col, ts, datetime_fmt)?;
        }
    }
    Ok(())
}

/// One header row, then one row per result row. The header is written even for an
/// empty result so the sheet still names its columns.
pub fn render_xlsx(result: &QueryResult) -> AppResult<Vec<u8>> {
    let width = u16::try_from(result.columns.len())
        .map_err(|_| AppError::validation("export_too_wide", "Too many columns for a spreadsheet"))?;
    let date_fmt = Format::new().set_num_format("yyyy-mm-dd");
    let datetime_fmt = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");

    let mut workbook = Workbook::new();
    {
        let ws = workbook.add_worksheet();
        ws.set_name(SHEET_NAME).map_err(export_error)?;
        for (col, name) in (0..width).zip(result.columns.iter()) {
            ws.write_string(0, col, clip(name)).map_err(export_error)?;
        }
        for (row_idx, cells) in result.rows.iter().enumerate() {
            let row = u32::try_from(row_idx + 1)
                .map_err(|_| AppError::validation("export_too_long", "Too many rows for a spreadsheet"))?;
            for (col, cell) in (0..width).zip(cells.iter()) {
                write_cell(ws, row, col, &normalize_cell(cell), &date_fmt, &datetime_fmt).map_err(export_error)?;
            }
        }
    }
    workbook.save_to_buffer().map_err(export_error)
}
