use super::columns::RawGrid;
use super::IngestError;

#[derive(Debug, PartialEq)]
struct CsvLayout {
    delimiter: u8,
    /// Leading `sep=;` hint line to skip.
    skip_hint: bool,
}

fn detect_layout(text: &str) -> CsvLayout {
    let first_line = text.lines().next().unwrap_or("").trim();

    if let Some(sep) = first_line.strip_prefix("sep=") {
        if let Some(&d) = sep.as_bytes().first() {
            return CsvLayout {
                delimiter: d,
                skip_hint: true,
            };
        }
    }

    // Pick whichever candidate appears most often in the first few lines
    let sample: Vec<&str> = text.lines().take(10).collect();
    let delimiter = [b',', b';', b'\t', b'|']
        .into_iter()
        .max_by_key(|&d| {
            let count: usize = sample
                .iter()
                .map(|line| line.bytes().filter(|&b| b == d).count())
                .sum();
            // ties go to the comma, which comes first
            (count, d == b',')
        })
        .unwrap_or(b',');

    CsvLayout {
        delimiter,
        skip_hint: false,
    }
}

pub fn read_grid(bytes: &[u8]) -> Result<RawGrid, IngestError> {
    let decoded = String::from_utf8_lossy(bytes);
    // Strip UTF-8 BOM if present
    let mut text: &str = decoded.strip_prefix('\u{feff}').unwrap_or(&decoded[..]);

    let layout = detect_layout(text);
    if layout.skip_hint {
        text = text.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(layout.delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record =
            result.map_err(|e| IngestError::malformed("CSV", format!("row {}: {}", i + 1, e)))?;
        records.push(record.iter().map(|s| s.to_string()).collect());
    }

    RawGrid::from_records(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_semicolon() {
        let layout = detect_layout("Date;Description;Amount\n2024-01-01;Coffee;-3,50\n");
        assert_eq!(layout.delimiter, b';');
        assert!(!layout.skip_hint);
    }

    #[test]
    fn test_sep_hint_line() {
        let data = b"sep=;\nPurchase date;Booking text;Debit\n01.02.2024;COOP;12.40\n";
        let grid = read_grid(data).unwrap();
        assert_eq!(grid.headers, vec!["Purchase date", "Booking text", "Debit"]);
        assert_eq!(grid.rows, vec![vec!["01.02.2024", "COOP", "12.40"]]);
    }

    #[test]
    fn test_quoted_thousands_stay_in_one_cell() {
        let grid = read_grid(b"Date,Description,Amount\n2024-01-01,Rent,\"-1,200.00\"\n").unwrap();
        assert_eq!(grid.rows[0][2], "-1,200.00");
    }

    #[test]
    fn test_empty_file() {
        assert!(matches!(read_grid(b""), Err(IngestError::Empty)));
        assert!(matches!(read_grid(b"\n\n , ,\n"), Err(IngestError::Empty)));
    }
}
