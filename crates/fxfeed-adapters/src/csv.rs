use std::collections::HashSet;
use std::sync::Arc;

use fxfeed_core::{ColumnHeader, CsvLayout, CsvRecord, LayoutError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed input: {reason}")]
    MalformedInput { reason: String },
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

fn malformed(reason: impl Into<String>) -> ParseError {
    ParseError::MalformedInput {
        reason: reason.into(),
    }
}

/// Splits delimited text with a fixed header row into [`CsvRecord`]s.
///
/// Values stay strings; decimal-comma conversion is left to consumers.
#[derive(Debug, Clone, Default)]
pub struct CsvParser {
    layout: CsvLayout,
}

impl CsvParser {
    pub fn new(layout: CsvLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &CsvLayout {
        &self.layout
    }

    pub fn parse<'a>(&self, text: &'a str) -> Result<ParsedCsv<'a>, ParseError> {
        let layout = &self.layout;
        layout.validate()?;

        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let lines: Vec<&str> = text.lines().collect();

        let Some(header_line) = lines.get(layout.header_row_index) else {
            return Err(malformed(format!(
                "input has {} lines, header row {} is missing",
                lines.len(),
                layout.header_row_index
            )));
        };
        if !header_line.contains(layout.delimiter) {
            return Err(malformed(format!(
                "header row {} has no {:?} delimiter",
                layout.header_row_index, layout.delimiter
            )));
        }

        let columns: Vec<String> = header_line
            .split(layout.delimiter)
            .map(str::to_string)
            .collect();
        let mut seen = HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(malformed(format!("duplicate header column {dup:?}")));
        }
        if let Some(expected) = &layout.expected_first_column {
            if columns.first() != Some(expected) {
                return Err(malformed(format!(
                    "header row {} starts with {:?}, expected {:?}",
                    layout.header_row_index,
                    columns.first().map(String::as_str).unwrap_or_default(),
                    expected
                )));
            }
        }

        let data = lines
            .get(layout.data_start_row_index..)
            .unwrap_or_default()
            .to_vec();

        Ok(ParsedCsv {
            header: Arc::new(ColumnHeader::new(columns)),
            data,
            delimiter: layout.delimiter,
        })
    }
}

/// Header plus the unparsed data lines; rows are split lazily by [`ParsedCsv::records`].
#[derive(Debug, Clone)]
pub struct ParsedCsv<'a> {
    header: Arc<ColumnHeader>,
    data: Vec<&'a str>,
    delimiter: char,
}

impl<'a> ParsedCsv<'a> {
    pub fn header(&self) -> &ColumnHeader {
        &self.header
    }

    /// A fresh pass over the data rows. May be called any number of times.
    pub fn records(&self) -> Records<'_> {
        Records {
            header: self.header.clone(),
            lines: self.data.iter(),
            delimiter: self.delimiter,
        }
    }

    pub fn into_records(self) -> Vec<CsvRecord> {
        self.records().collect()
    }
}

impl<'p> IntoIterator for &'p ParsedCsv<'_> {
    type Item = CsvRecord;
    type IntoIter = Records<'p>;

    fn into_iter(self) -> Self::IntoIter {
        self.records()
    }
}

pub struct Records<'p> {
    header: Arc<ColumnHeader>,
    lines: std::slice::Iter<'p, &'p str>,
    delimiter: char,
}

impl Iterator for Records<'_> {
    type Item = CsvRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = *self.lines.next()?;
            // Blank lines and trailing junk without a delimiter are not rows.
            if line.trim().is_empty() || !line.contains(self.delimiter) {
                continue;
            }
            return Some(CsvRecord::from_fields(
                self.header.clone(),
                line.split(self.delimiter),
            ));
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.lines.size_hint().1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "meta1\nmeta2\nmeta3\nmeta4\nmeta5\nData;USD\n2024-01-01;4.97\n";

    fn parser() -> CsvParser {
        CsvParser::new(CsvLayout::new(5, 6))
    }

    #[test]
    fn single_row_feed_parses_to_one_record() {
        let parsed = parser().parse(SAMPLE).unwrap();
        let records = parsed.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("Data"), Some("2024-01-01"));
        assert_eq!(records[0].get("USD"), Some("4.97"));
        assert_eq!(records[0].keys().collect::<Vec<_>>(), vec!["Data", "USD"]);
    }

    #[test]
    fn every_record_has_header_key_set_in_order() {
        let text = "a\nb\nc\nd\ne\nData;EUR;USD;GBP\n02.01.2024;4,9700;4,5100;5,7300\n03.01.2024;4,9710\n";
        let parsed = parser().parse(text).unwrap();
        let header: Vec<&str> = parsed.header().iter().collect();
        for record in &parsed {
            assert_eq!(record.keys().collect::<Vec<_>>(), header);
        }
        let short = parsed.records().nth(1).unwrap();
        assert_eq!(short.get("GBP"), Some(""));
    }

    #[test]
    fn parsing_is_idempotent_and_restartable() {
        let parsed = parser().parse(SAMPLE).unwrap();
        let first: Vec<_> = parsed.records().collect();
        let second: Vec<_> = parsed.records().collect();
        assert_eq!(first, second);
        assert_eq!(first, parser().parse(SAMPLE).unwrap().into_records());
    }

    #[test]
    fn blank_and_delimiterless_lines_are_skipped() {
        let text = "m\nm\nm\nm\nm\nData;USD\r\n2024-01-01;4.97\r\n\r\n   \nGenerated by BNR\n2024-01-02;4.98\n\n";
        let records = parser().parse(text).unwrap().into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("USD"), Some("4.98"));
        assert!(records.iter().all(|r| r.values().any(|v| !v.is_empty())));
    }

    #[test]
    fn crlf_and_byte_order_mark_are_tolerated() {
        let text = "\u{feff}m\r\nm\r\nm\r\nm\r\nm\r\nData;USD\r\n2024-01-01;4.97\r\n";
        let records = parser().parse(text).unwrap().into_records();
        assert_eq!(records[0].get("USD"), Some("4.97"));
    }

    #[test]
    fn short_input_is_malformed() {
        let err = parser().parse("meta1\nmeta2\n").unwrap_err();
        assert!(matches!(err, ParseError::MalformedInput { .. }));
        assert!(parser().parse("").is_err());
    }

    #[test]
    fn header_only_file_has_no_records() {
        let records = parser().parse("m\nm\nm\nm\nm\nData;USD").unwrap().into_records();
        assert!(records.is_empty());
    }

    #[test]
    fn layout_drift_fails_fast() {
        let shifted = "m\nm\nm\nm\nData;USD\n2024-01-01;4.97\n2024-01-02;4.98\n";
        let mut layout = CsvLayout::new(5, 6);
        layout.expected_first_column = Some("Data".into());
        let err = CsvParser::new(layout).parse(shifted).unwrap_err();
        assert!(matches!(err, ParseError::MalformedInput { .. }));

        assert!(parser().parse("m\nm\nm\nm\nm\nno delimiter here\nx;y\n").is_err());
        assert!(parser().parse("m\nm\nm\nm\nm\nData;USD;USD\nx;y;z\n").is_err());
    }

    #[test]
    fn invalid_layout_is_rejected_before_parsing() {
        let err = CsvParser::new(CsvLayout::new(6, 5)).parse(SAMPLE).unwrap_err();
        assert!(matches!(err, ParseError::Layout(_)));
    }
}
