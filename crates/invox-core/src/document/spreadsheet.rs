use std::io::Cursor;

use calamine::{Data, Range, Reader, open_workbook_auto_from_rs};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("failed to read workbook: {0}")]
    Workbook(String),
}

/// Render every sheet as a textual table: a `Sheet: <name>` header followed
/// by comma-joined rows, sheets separated by blank lines.
pub fn extract_text(bytes: &[u8]) -> Result<String, SpreadsheetError> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook =
        open_workbook_auto_from_rs(cursor).map_err(|err| SpreadsheetError::Workbook(err.to_string()))?;

    let mut sections = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|err| SpreadsheetError::Workbook(err.to_string()))?;
        sections.push(sheet_to_text(&name, &range));
    }

    Ok(sections.join("\n\n"))
}

fn sheet_to_text(name: &str, range: &Range<Data>) -> String {
    let mut lines = vec![format!("Sheet: {name}")];
    for row in range.rows() {
        let cells: Vec<String> = row.iter().map(|cell| cell.to_string()).collect();
        lines.push(cells.join(","));
    }
    lines.join("\n")
}
