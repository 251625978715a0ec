//! Core domain model for fxfeed: artifact identity, CSV layout and parsed records.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid artifact name {name:?}: {reason}")]
pub struct InvalidArtifactName {
    pub name: String,
    pub reason: &'static str,
}

/// Logical name of a fetched file, e.g. `dailySeries.csv`.
///
/// Names double as staging file names and blob key suffixes, so they are
/// restricted to a single plain path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactName(String);

impl ArtifactName {
    pub fn parse(name: impl Into<String>) -> Result<Self, InvalidArtifactName> {
        let name = name.into();
        let reason = if name.trim().is_empty() {
            Some("name is empty")
        } else if name.contains('/') || name.contains('\\') {
            Some("name contains a path separator")
        } else if name.starts_with('.') {
            Some("name starts with '.'")
        } else if name.chars().any(char::is_control) {
            Some("name contains control characters")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(InvalidArtifactName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ArtifactName {
    type Error = InvalidArtifactName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ArtifactName> for String {
    fn from(value: ArtifactName) -> Self {
        value.0
    }
}

impl AsRef<str> for ArtifactName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bytes captured by one fetch. Identity is the logical name only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArtifact {
    pub name: ArtifactName,
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

impl RawArtifact {
    pub fn new(name: ArtifactName, source_url: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name,
            source_url: source_url.into(),
            fetched_at: Utc::now(),
            bytes,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("data start row {data_start} must come after header row {header}")]
    DataBeforeHeader { header: usize, data_start: usize },
    #[error("delimiter must not be a line break")]
    LineBreakDelimiter,
}

/// Row offsets and delimiter of the upstream feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvLayout {
    pub header_row_index: usize,
    pub data_start_row_index: usize,
    pub delimiter: char,
    /// When set, the first header column must equal this value.
    pub expected_first_column: Option<String>,
}

impl Default for CsvLayout {
    fn default() -> Self {
        Self {
            header_row_index: 5,
            data_start_row_index: 6,
            delimiter: ';',
            expected_first_column: None,
        }
    }
}

impl CsvLayout {
    pub fn new(header_row_index: usize, data_start_row_index: usize) -> Self {
        Self {
            header_row_index,
            data_start_row_index,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.data_start_row_index <= self.header_row_index {
            return Err(LayoutError::DataBeforeHeader {
                header: self.header_row_index,
                data_start: self.data_start_row_index,
            });
        }
        if self.delimiter == '\n' || self.delimiter == '\r' {
            return Err(LayoutError::LineBreakDelimiter);
        }
        Ok(())
    }
}

/// Ordered column names taken from the header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ColumnHeader {
    columns: Vec<String>,
}

impl ColumnHeader {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }
}

/// One data row keyed by the header of the file it came from.
///
/// Records share their header, so every record of a file has the same key set
/// in the same order. There is no mutating API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRecord {
    header: Arc<ColumnHeader>,
    values: Vec<String>,
}

impl CsvRecord {
    /// Zips `fields` against `header`. Missing trailing fields become `""`,
    /// surplus fields are dropped.
    pub fn from_fields<'a>(header: Arc<ColumnHeader>, fields: impl IntoIterator<Item = &'a str>) -> Self {
        let mut values: Vec<String> = fields
            .into_iter()
            .take(header.len())
            .map(str::to_string)
            .collect();
        values.resize(header.len(), String::new());
        Self { header, values }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.header
            .position(column)
            .map(|idx| self.values[idx].as_str())
    }

    pub fn header(&self) -> &ColumnHeader {
        &self.header
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.header.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header.iter().zip(self.values())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for CsvRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cols: &[&str]) -> Arc<ColumnHeader> {
        Arc::new(ColumnHeader::new(cols.iter().map(|c| c.to_string()).collect()))
    }

    #[test]
    fn artifact_names_reject_path_components() {
        assert!(ArtifactName::parse("dailySeries.csv").is_ok());
        assert!(ArtifactName::parse("").is_err());
        assert!(ArtifactName::parse("../etc/passwd").is_err());
        assert!(ArtifactName::parse("a\\b.csv").is_err());
        assert!(ArtifactName::parse(".hidden").is_err());
    }

    #[test]
    fn artifact_name_deserializes_through_validation() {
        let ok: ArtifactName = serde_json::from_str("\"archive.csv\"").unwrap();
        assert_eq!(ok.as_str(), "archive.csv");
        assert!(serde_json::from_str::<ArtifactName>("\"a/b.csv\"").is_err());
    }

    #[test]
    fn layout_defaults_match_feed_offsets() {
        let layout = CsvLayout::default();
        assert_eq!(layout.header_row_index, 5);
        assert_eq!(layout.data_start_row_index, 6);
        assert_eq!(layout.delimiter, ';');
        assert!(layout.validate().is_ok());
        assert_eq!(
            CsvLayout::new(6, 6).validate(),
            Err(LayoutError::DataBeforeHeader { header: 6, data_start: 6 })
        );
    }

    #[test]
    fn record_pads_missing_and_drops_surplus_fields() {
        let h = header(&["Data", "EUR", "USD"]);
        let short = CsvRecord::from_fields(h.clone(), ["2024-01-02", "4.97"]);
        assert_eq!(short.get("USD"), Some(""));
        assert_eq!(short.len(), 3);

        let long = CsvRecord::from_fields(h, ["2024-01-02", "4.97", "4.54", "extra"]);
        assert_eq!(long.values().collect::<Vec<_>>(), vec!["2024-01-02", "4.97", "4.54"]);
        assert_eq!(long.get("extra"), None);
    }

    #[test]
    fn record_serializes_in_header_order() {
        let h = header(&["Data", "USD", "EUR"]);
        let rec = CsvRecord::from_fields(h, ["2024-01-02", "4.54", "4.97"]);
        let json = serde_json::to_string(&rec).unwrap();
        assert_eq!(json, r#"{"Data":"2024-01-02","USD":"4.54","EUR":"4.97"}"#);
    }
}
