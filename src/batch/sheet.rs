use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::batch::table::{parse_class, parse_confidence, row_error};
use crate::error::{CongressError, Result};
use crate::models::{Candidate, Prediction};

/// Raw row of a per-voter CSV. Cells are kept as text so labels written as
/// floats ("2.0") still parse.
#[derive(Debug, Deserialize)]
struct SheetRow {
    file_name: String,
    predicted_labels: String,
    predicted_confidence: String,
    #[serde(default)]
    second_predicted_labels: Option<String>,
    #[serde(default)]
    second_predicted_confidence: Option<String>,
}

/// One voter's scored output for a dataset:
/// `file_name, predicted_labels, predicted_confidence`, optionally followed
/// by `second_predicted_labels, second_predicted_confidence`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSheet {
    path: PathBuf,
    entries: Vec<(String, Prediction)>,
    index: HashMap<String, usize>,
}

impl ScoreSheet {
    /// Build a sheet from entries in file order. A repeated file name
    /// resolves to its first entry.
    pub fn new(path: impl Into<PathBuf>, entries: Vec<(String, Prediction)>) -> Self {
        let mut index = HashMap::with_capacity(entries.len());
        for (position, (file_name, _)) in entries.iter().enumerate() {
            index.entry(file_name.clone()).or_insert(position);
        }
        Self {
            path: path.into(),
            entries,
            index,
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| CongressError::csv(path, e))?;

        let mut entries = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for (line, row) in reader.deserialize::<SheetRow>().enumerate() {
            let row = row.map_err(|e| CongressError::csv(path, e))?;
            let class = parse_class(&row.predicted_labels)
                .map_err(|e| row_error(path, line, e))?
                .ok_or_else(|| row_error(path, line, "empty predicted_labels"))?;
            let confidence = parse_confidence(&row.predicted_confidence)
                .map_err(|e| row_error(path, line, e))?
                .ok_or_else(|| row_error(path, line, "empty predicted_confidence"))?;

            let second_class = match row.second_predicted_labels.as_deref() {
                Some(cell) => parse_class(cell).map_err(|e| row_error(path, line, e))?,
                None => None,
            };
            let second_confidence = match row.second_predicted_confidence.as_deref() {
                Some(cell) => parse_confidence(cell).map_err(|e| row_error(path, line, e))?,
                None => None,
            };
            let secondary = match (second_class, second_confidence) {
                (Some(class), Some(confidence)) => Some(Candidate::new(class, confidence)),
                _ => None,
            };

            let prediction = Prediction::new(Candidate::new(class, confidence), secondary);
            prediction
                .validate()
                .map_err(|e| row_error(path, line, e))?;

            if !seen.insert(row.file_name.clone()) {
                tracing::warn!(
                    "⚠️  Duplicate subject {} in {}, keeping the first entry",
                    row.file_name,
                    path.display()
                );
                continue;
            }
            entries.push((row.file_name, prediction));
        }

        tracing::debug!("📄 Read {} predictions from {}", entries.len(), path.display());
        Ok(Self::new(path, entries))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, Prediction)] {
        &self.entries
    }

    pub fn lookup(&self, file_name: &str) -> Option<&Prediction> {
        self.index
            .get(file_name)
            .map(|&position| &self.entries[position].1)
    }
}
