use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use std::io::Cursor;

use super::columns::RawGrid;
use super::IngestError;

/// Read the first worksheet of an `.xls`/`.xlsx` workbook.
pub fn read_grid(bytes: &[u8]) -> Result<RawGrid, IngestError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| IngestError::malformed("Excel", e))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or(IngestError::Empty)?
        .map_err(|e| IngestError::malformed("Excel", e))?;

    grid_from_range(&range)
}

pub fn grid_from_range(range: &Range<Data>) -> Result<RawGrid, IngestError> {
    let records = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();
    RawGrid::from_records(records)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.date().format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        _ => String::new(),
    }
}
