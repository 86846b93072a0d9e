//! CSV source parsing.
//!
//! Only row iteration is handled here: cells stay strings and column typing
//! is left to consumers of `raw_data`.

use crate::error::{Result, RowragError};
use csv::ReaderBuilder;

/// One data row, in file order
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRow {
    /// One cell per header; empty or whitespace-only cells are `None`
    Values(Vec<Option<String>>),
    /// Row the reader could not map onto the header
    Malformed(String),
}

/// Header plus rows of a parsed CSV file
#[derive(Debug, Clone)]
pub struct SourceTable {
    pub headers: Vec<String>,
    pub rows: Vec<ParsedRow>,
}

impl SourceTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Decode bytes as UTF-8, falling back to Latin-1
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            log::debug!("Source is not valid UTF-8, decoding as Latin-1");
            // Every Latin-1 byte maps to the code point of the same value
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

/// Parse a CSV file into a header and rows.
///
/// A file without a usable header is unparseable and returns `Parse`.
/// Rows with more cells than the header become `ParsedRow::Malformed`;
/// short rows are padded with `None`.
pub fn parse_csv(bytes: &[u8]) -> Result<SourceTable> {
    let text = decode_text(bytes);

    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| RowragError::Parse(format!("Failed to read header row: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(RowragError::Parse("CSV has no header row".to_string()));
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                rows.push(ParsedRow::Malformed(e.to_string()));
                continue;
            }
        };

        if record.len() > headers.len() {
            rows.push(ParsedRow::Malformed(format!(
                "row {} has {} fields, header has {}",
                idx + 1,
                record.len(),
                headers.len()
            )));
            continue;
        }

        let mut values: Vec<Option<String>> = record
            .iter()
            .map(|cell| {
                let trimmed = cell.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .collect();
        values.resize(headers.len(), None);
        rows.push(ParsedRow::Values(values));
    }

    Ok(SourceTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_csv() {
        let table = parse_csv(b"Name,Desc,Cat\nWidget,A small widget,Tools\n").unwrap();
        assert_eq!(table.headers, vec!["Name", "Desc", "Cat"]);
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.rows[0],
            ParsedRow::Values(vec![
                Some("Widget".to_string()),
                Some("A small widget".to_string()),
                Some("Tools".to_string()),
            ])
        );
    }

    #[test]
    fn test_blank_cells_become_none_and_short_rows_pad() {
        let table = parse_csv(b"a,b,c\n1,  ,\n2\n").unwrap();
        assert_eq!(
            table.rows[0],
            ParsedRow::Values(vec![Some("1".to_string()), None, None])
        );
        assert_eq!(
            table.rows[1],
            ParsedRow::Values(vec![Some("2".to_string()), None, None])
        );
    }

    #[test]
    fn test_extra_cells_are_malformed() {
        let table = parse_csv(b"a,b\n1,2\n1,2,3\n4,5\n").unwrap();
        assert_eq!(table.len(), 3);
        assert!(matches!(table.rows[1], ParsedRow::Malformed(_)));
        assert!(matches!(table.rows[2], ParsedRow::Values(_)));
    }

    #[test]
    fn test_latin1_fallback() {
        // "café" with é as a single Latin-1 byte
        let table = parse_csv(b"title\ncaf\xE9\n").unwrap();
        assert_eq!(table.rows[0], ParsedRow::Values(vec![Some("café".to_string())]));
    }

    #[test]
    fn test_utf8_bom_stripped() {
        let table = parse_csv(b"\xEF\xBB\xBFtitle\nx\n").unwrap();
        assert_eq!(table.headers, vec!["title"]);
    }

    #[test]
    fn test_quoted_fields_with_commas() {
        let table = parse_csv(b"title,tags\n\"Contract, breach\",\"a, b\"\n").unwrap();
        assert_eq!(
            table.rows[0],
            ParsedRow::Values(vec![
                Some("Contract, breach".to_string()),
                Some("a, b".to_string()),
            ])
        );
    }

    #[test]
    fn test_empty_file_is_parse_error() {
        assert!(matches!(parse_csv(b""), Err(RowragError::Parse(_))));
        assert!(matches!(parse_csv(b"\n\n"), Err(RowragError::Parse(_))));
    }

    #[test]
    fn test_header_only_has_no_rows() {
        let table = parse_csv(b"title,description\n").unwrap();
        assert!(table.is_empty());
    }
}
