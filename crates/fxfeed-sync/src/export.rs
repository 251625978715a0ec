use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use chrono::{DateTime, Utc};
use fxfeed_core::ArtifactName;
use fxfeed_storage::sha256_hex;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};

use crate::job::ParsedTable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub artifact: ArtifactName,
    pub exported_at: DateTime<Utc>,
    pub rows: usize,
    pub columns: Vec<String>,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Writes `<out_dir>/<stem>/<stem>.parquet` and a `manifest.json` beside it.
///
/// Every column is exported as non-null Utf8; values are kept exactly as parsed.
pub fn export_snapshot(table: &ParsedTable, out_dir: &Path) -> Result<SnapshotManifest> {
    let stem = table
        .name
        .as_str()
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(table.name.as_str());
    let snapshot_dir = out_dir.join(stem);
    std::fs::create_dir_all(&snapshot_dir)
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let columns = column_names(table);
    let parquet_path = snapshot_dir.join(format!("{stem}.parquet"));
    write_parquet(&parquet_path, table_batch(table, &columns)?)?;

    let manifest = SnapshotManifest {
        schema_version: 1,
        artifact: table.name.clone(),
        exported_at: Utc::now(),
        rows: table.records.len(),
        columns,
        files: vec![manifest_entry(&snapshot_dir, &parquet_path)?],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
    std::fs::write(&manifest_path, bytes)
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    Ok(manifest)
}

/// Header names with blanks replaced, since Parquet columns need a name.
fn column_names(table: &ParsedTable) -> Vec<String> {
    table
        .header
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let name = name.trim();
            if name.is_empty() {
                format!("column_{idx}")
            } else {
                name.to_string()
            }
        })
        .collect()
}

fn table_batch(table: &ParsedTable, columns: &[String]) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(
        columns
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, false))
            .collect::<Vec<_>>(),
    ));
    let arrays = (0..columns.len())
        .map(|idx| {
            let values = table
                .records
                .iter()
                .map(|record| record.values().nth(idx).unwrap_or_default())
                .collect::<Vec<_>>();
            Arc::new(StringArray::from(values)) as ArrayRef
        })
        .collect::<Vec<_>>();
    RecordBatch::try_new(schema, arrays)
        .with_context(|| format!("building record batch for {}", table.name))
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn manifest_entry(base: &Path, path: &Path) -> Result<ManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path.strip_prefix(base).unwrap_or(path).display().to_string();
    Ok(ManifestFile {
        path: rel,
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ReadSource;
    use arrow_array::Array;
    use fxfeed_adapters::CsvParser;
    use fxfeed_core::CsvLayout;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::tempdir;

    fn table() -> ParsedTable {
        let text = "m\nm\nm\nm\nm\nData;EUR;;USD\n02.01.2024;4,9700;;4,5100\n03.01.2024;4,9710\n";
        let parsed = CsvParser::new(CsvLayout::new(5, 6)).parse(text).unwrap();
        ParsedTable {
            name: ArtifactName::parse("archive.csv").unwrap(),
            header: parsed.header().clone(),
            records: parsed.into_records(),
            source: ReadSource::Store,
        }
    }

    #[test]
    fn snapshot_round_trips_through_parquet() {
        let dir = tempdir().unwrap();
        let manifest = export_snapshot(&table(), dir.path()).unwrap();
        assert_eq!(manifest.rows, 2);
        assert_eq!(manifest.columns, vec!["Data", "EUR", "column_2", "USD"]);
        assert_eq!(manifest.files[0].path, "archive.parquet");
        assert_eq!(manifest.files[0].sha256.len(), 64);

        let file = File::open(dir.path().join("archive/archive.parquet")).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let batches = reader.collect::<Result<Vec<_>, _>>().unwrap();
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 2);
        let usd = batch
            .column(3)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(usd.value(0), "4,5100");
        assert_eq!(usd.value(1), "");

        let written: SnapshotManifest = serde_json::from_slice(
            &std::fs::read(dir.path().join("archive/manifest.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(written, manifest);
    }
}
