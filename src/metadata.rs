//! Metadata corpus ingestion.
//!
//! Walks the configured input directory for delimited files and parses
//! each into records keyed by header. Files that fail to parse are
//! skipped with a warning so one bad export cannot sink the rest of
//! the corpus.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::MetadataConfig;
use crate::models::MetadataDoc;

pub fn load_metadata(config: &MetadataConfig) -> Result<MetadataDoc> {
    let root = &config.input_dir;
    if !root.exists() {
        bail!("Metadata input directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        files.push(entry.path().to_path_buf());
    }
    // Sort for deterministic ordering
    files.sort();

    let mut doc: MetadataDoc = BTreeMap::new();
    for path in files {
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let rel_str = relative.to_string_lossy().to_string();

        if !include_set.is_match(&rel_str) {
            if is_spreadsheet(&path) {
                eprintln!(
                    "Warning: skipping {}: spreadsheet formats are not supported, export to CSV",
                    rel_str
                );
            }
            continue;
        }

        match read_records(&path) {
            Ok(records) => {
                doc.insert(rel_str, records);
            }
            Err(e) => {
                eprintln!("Warning: failed to parse {}: {:#}", rel_str, e);
            }
        }
    }

    Ok(doc)
}

/// Parse one delimited file into header-keyed records. The delimiter
/// follows the extension: tab for `.tsv`, comma otherwise.
fn read_records(path: &Path) -> Result<Vec<BTreeMap<String, String>>> {
    let delimiter = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        let mut row = BTreeMap::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), value.to_string());
        }
        records.push(row);
    }
    Ok(records)
}

fn is_spreadsheet(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some(ext) if ext.eq_ignore_ascii_case("xls") || ext.eq_ignore_ascii_case("xlsx")
    )
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .with_context(|| format!("Invalid metadata include glob: {}", pattern))?,
        );
    }
    Ok(builder.build()?)
}

/// Write the corpus as pretty JSON, replacing any previous copy.
pub fn save_metadata(doc: &MetadataDoc, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(doc)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write metadata document to {}", path.display()))
}

pub fn load_metadata_file(path: &Path) -> Result<MetadataDoc> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read metadata document: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid metadata document: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir) -> MetadataConfig {
        MetadataConfig {
            input_dir: dir.path().to_path_buf(),
            include_globs: vec!["**/*.csv".to_string(), "**/*.tsv".to_string()],
        }
    }

    #[test]
    fn test_missing_input_dir_is_an_error() {
        let config = MetadataConfig {
            input_dir: Path::new("/nonexistent/metadata_input").to_path_buf(),
            include_globs: vec!["**/*.csv".to_string()],
        };
        assert!(load_metadata(&config).is_err());
    }

    #[test]
    fn test_csv_parsed_into_header_keyed_records() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("products.csv"),
            "name,price\nWidget,9.99\nGadget,19.99\n",
        )
        .unwrap();

        let doc = load_metadata(&config_for(&dir)).unwrap();
        let records = &doc["products.csv"];
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], "Widget");
        assert_eq!(records[1]["price"], "19.99");
    }

    #[test]
    fn test_tsv_uses_tab_delimiter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("regions.tsv"), "code\tname\nEU\tEurope\n").unwrap();

        let doc = load_metadata(&config_for(&dir)).unwrap();
        assert_eq!(doc["regions.tsv"][0]["name"], "Europe");
    }

    #[test]
    fn test_malformed_file_skipped_others_survive() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("good.csv"), "a,b\n1,2\n").unwrap();
        std::fs::write(dir.path().join("broken.csv"), "a,b\n1\n").unwrap();

        let doc = load_metadata(&config_for(&dir)).unwrap();
        assert!(doc.contains_key("good.csv"));
        assert!(!doc.contains_key("broken.csv"));
    }

    #[test]
    fn test_spreadsheets_and_unmatched_files_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("sheet.xlsx"), b"PK\x03\x04").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not delimited").unwrap();
        std::fs::write(dir.path().join("ok.csv"), "h\nv\n").unwrap();

        let doc = load_metadata(&config_for(&dir)).unwrap();
        assert_eq!(doc.len(), 1);
        assert!(doc.contains_key("ok.csv"));
    }

    #[test]
    fn test_empty_directory_yields_empty_doc() {
        let dir = TempDir::new().unwrap();
        let doc = load_metadata(&config_for(&dir)).unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_nested_files_keyed_by_relative_path() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("finance")).unwrap();
        std::fs::write(dir.path().join("finance/budget.csv"), "q,amt\nQ1,100\n").unwrap();

        let doc = load_metadata(&config_for(&dir)).unwrap();
        let key = format!("finance{}budget.csv", std::path::MAIN_SEPARATOR);
        assert!(doc.contains_key(&key));
    }

    #[test]
    fn test_values_trimmed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("pad.csv"), "k , v\n x , y \n").unwrap();

        let doc = load_metadata(&config_for(&dir)).unwrap();
        assert_eq!(doc["pad.csv"][0]["k"], "x");
        assert_eq!(doc["pad.csv"][0]["v"], "y");
    }

    #[test]
    fn test_metadata_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ref.csv"), "id,label\n1,one\n").unwrap();
        let doc = load_metadata(&config_for(&dir)).unwrap();

        let out = dir.path().join("out/metadata.json");
        save_metadata(&doc, &out).unwrap();
        let loaded = load_metadata_file(&out).unwrap();
        assert_eq!(loaded, doc);
    }
}
