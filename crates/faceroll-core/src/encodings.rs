//! The serialized name → embedding table produced by a training run.
//!
//! Embeddings and labels are stored as two parallel sequences of equal
//! length. The file is always replaced as a whole.

use crate::types::cosine_similarity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodingsError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("serialization: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt encodings file: {encodings} encodings but {names} names")]
    LengthMismatch { encodings: usize, names: usize },
    #[error("corrupt encodings file: row {row} has {actual} values, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EncodingTable {
    encodings: Vec<Vec<f32>>,
    names: Vec<String>,
    /// Human-readable name per label, when known.
    #[serde(default)]
    display_names: BTreeMap<String, String>,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    generated_at: Option<DateTime<Utc>>,
}

/// Best label for a query embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMatch {
    pub label: String,
    pub display_name: Option<String>,
    pub similarity: f32,
}

impl EncodingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one embedding with its label.
    pub fn push(&mut self, embedding: Vec<f32>, label: impl Into<String>) {
        self.encodings.push(embedding);
        self.names.push(label.into());
    }

    pub fn len(&self) -> usize {
        self.encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encodings.is_empty()
    }

    pub fn encodings(&self) -> &[Vec<f32>] {
        &self.encodings
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Width of the stored embeddings, `None` for an empty table.
    pub fn dimension(&self) -> Option<usize> {
        self.encodings.first().map(Vec::len)
    }

    /// Number of distinct labels.
    pub fn subject_count(&self) -> usize {
        let mut labels: Vec<&String> = self.names.iter().collect();
        labels.sort();
        labels.dedup();
        labels.len()
    }

    pub fn set_display_names(&mut self, display_names: BTreeMap<String, String>) {
        self.display_names = display_names;
    }

    pub fn display_name(&self, label: &str) -> Option<&str> {
        self.display_names.get(label).map(String::as_str)
    }

    pub fn set_model_version(&mut self, version: Option<String>) {
        self.model_version = version;
    }

    pub fn model_version(&self) -> Option<&str> {
        self.model_version.as_deref()
    }

    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        self.generated_at
    }

    /// Compare `query` against every stored embedding and return the most
    /// similar label if it reaches `threshold`.
    ///
    /// The whole table is scanned even after a match is found. Rows whose
    /// width differs from the query never match.
    pub fn best_match(&self, query: &[f32], threshold: f32) -> Option<LabelMatch> {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx = None;

        for (i, encoding) in self.encodings.iter().enumerate() {
            if encoding.len() != query.len() {
                continue;
            }
            let sim = cosine_similarity(query, encoding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        let idx = best_idx.filter(|_| best_sim >= threshold)?;
        let label = self.names[idx].clone();
        Some(LabelMatch {
            display_name: self.display_name(&label).map(str::to_string),
            label,
            similarity: best_sim,
        })
    }

    /// Read and validate a table written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self, EncodingsError> {
        let bytes = std::fs::read(path)?;
        let table: Self = serde_json::from_slice(&bytes)?;
        if table.encodings.len() != table.names.len() {
            return Err(EncodingsError::LengthMismatch {
                encodings: table.encodings.len(),
                names: table.names.len(),
            });
        }
        if let Some(expected) = table.dimension() {
            let ragged = table.encodings.iter().position(|row| row.len() != expected);
            if let Some(row) = ragged {
                return Err(EncodingsError::RaggedRows {
                    row,
                    expected,
                    actual: table.encodings[row].len(),
                });
            }
        }
        Ok(table)
    }

    /// Serialize the table and replace `path`.
    ///
    /// Writes a sibling temporary file and renames it over the target, so
    /// readers see either the previous table or the new one.
    pub fn save(&mut self, path: &Path) -> Result<(), EncodingsError> {
        self.generated_at = Some(Utc::now());
        let bytes = serde_json::to_vec(self)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = temp_path(path);
        std::fs::write(&tmp, bytes)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> EncodingTable {
        let mut table = EncodingTable::new();
        table.push(vec![1.0, 0.0, 0.0], "id-alice");
        table.push(vec![0.9, 0.1, 0.0], "id-alice");
        table.push(vec![0.0, 1.0, 0.0], "id-bob");
        table.set_display_names(BTreeMap::from([("id-alice".to_string(), "Alice".to_string())]));
        table
    }

    #[test]
    fn test_parallel_sequences() {
        let table = sample_table();
        assert_eq!(table.len(), 3);
        assert_eq!(table.encodings().len(), table.names().len());
        assert_eq!(table.subject_count(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("encodings.json");
        let mut table = sample_table();
        table.save(&path).unwrap();

        let loaded = EncodingTable::load(&path).unwrap();
        assert_eq!(loaded, table);
        assert!(loaded.generated_at().is_some());
        assert!(!tmp.path().join("encodings.json.tmp").exists());
    }

    #[test]
    fn test_save_overwrites_previous_table() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("encodings.json");
        sample_table().save(&path).unwrap();

        let mut smaller = EncodingTable::new();
        smaller.push(vec![0.5, 0.5], "id-carol");
        smaller.save(&path).unwrap();

        let loaded = EncodingTable::load(&path).unwrap();
        assert_eq!(loaded.names(), ["id-carol".to_string()]);
    }

    #[test]
    fn test_load_rejects_length_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("encodings.json");
        std::fs::write(&path, r#"{"encodings": [[1.0]], "names": []}"#).unwrap();
        assert!(matches!(
            EncodingTable::load(&path),
            Err(EncodingsError::LengthMismatch { encodings: 1, names: 0 })
        ));
    }

    #[test]
    fn test_best_match_picks_most_similar() {
        let table = sample_table();
        let found = table.best_match(&[0.0, 0.9, 0.1], 0.5).unwrap();
        assert_eq!(found.label, "id-bob");
        assert_eq!(found.display_name, None);

        let found = table.best_match(&[1.0, 0.0, 0.0], 0.5).unwrap();
        assert_eq!(found.label, "id-alice");
        assert_eq!(found.display_name.as_deref(), Some("Alice"));
        assert!((found.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_rejects_ragged_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("encodings.json");
        let ragged = r#"{"encodings": [[1.0, 0.0], [1.0]], "names": ["a", "b"]}"#;
        std::fs::write(&path, ragged).unwrap();
        assert!(matches!(
            EncodingTable::load(&path),
            Err(EncodingsError::RaggedRows {
                row: 1,
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_best_match_ignores_other_dimensions() {
        let table = sample_table();
        assert_eq!(table.dimension(), Some(3));
        // Same leading values as an Alice row, but a different embedding width.
        assert!(table.best_match(&[1.0, 0.0], 0.0).is_none());
        assert!(table.best_match(&[1.0, 0.0, 0.0, 0.0], 0.0).is_none());
    }

    #[test]
    fn test_best_match_below_threshold() {
        let table = sample_table();
        assert!(table.best_match(&[0.0, 0.0, 1.0], 0.5).is_none());
        assert!(EncodingTable::new().best_match(&[1.0], 0.0).is_none());
    }
}
