use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use crate::batch::frequency::ClassFrequencyTable;
use crate::error::{CongressError, InvalidValue, Result};
use crate::models::{check_confidence, Candidate, ClassId};

pub const FILE_NAME_COLUMN: &str = "file_name";
const VOTER_MARKER: &str = "voter";
const CONFIDENCE_MARKER: &str = "conf";

// Labels written by pandas may come out as "2" or "2.0"
static CLASS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)(?:\.0*)?\s*$").expect("valid class label regex"));

pub fn voter_column(index: usize) -> String {
    format!("voter_{}", index)
}

pub fn confidence_column(index: usize) -> String {
    format!("voter_{}_conf", index)
}

/// Number of voters implied by a header row: columns that mention the voter
/// marker but not the confidence marker.
pub fn count_voter_columns<'a>(headers: impl IntoIterator<Item = &'a str>) -> usize {
    headers
        .into_iter()
        .filter(|h| h.contains(VOTER_MARKER) && !h.contains(CONFIDENCE_MARKER))
        .count()
}

/// Parse a class label cell. Empty cells yield `Ok(None)`.
pub fn parse_class(cell: &str) -> std::result::Result<Option<ClassId>, InvalidValue> {
    if cell.trim().is_empty() {
        return Ok(None);
    }
    let not_a_label = || InvalidValue::ClassLabel(cell.to_string());
    let captures = CLASS_LABEL.captures(cell).ok_or_else(not_a_label)?;
    captures[1]
        .parse::<ClassId>()
        .map(Some)
        .map_err(|_| not_a_label())
}

/// Parse a confidence cell. Empty cells yield `Ok(None)`.
pub fn parse_confidence(cell: &str) -> std::result::Result<Option<f64>, InvalidValue> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    let value: f64 = cell
        .parse()
        .map_err(|_| InvalidValue::Confidence(cell.to_string()))?;
    check_confidence("recorded", value)?;
    Ok(Some(value))
}

/// Tie a bad cell to its file and 1-based data row.
pub(crate) fn row_error(path: &Path, line: usize, reason: impl std::fmt::Display) -> CongressError {
    CongressError::malformed(path, format!("row {}: {}", line + 1, reason))
}

fn format_confidence(value: f64) -> String {
    value.to_string()
}

/// The merged per-subject table: one row per file name, one vote cell pair
/// per voter.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    num_voters: usize,
    file_names: Vec<String>,
    rows: Vec<Vec<Option<Candidate>>>,
    index: HashMap<String, usize>,
}

impl WideTable {
    pub fn new(num_voters: usize) -> Self {
        Self {
            num_voters,
            file_names: Vec::new(),
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn num_voters(&self) -> usize {
        self.num_voters
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row; `votes` is padded with abstentions or truncated to the
    /// table's voter count.
    pub fn push_row(&mut self, file_name: impl Into<String>, mut votes: Vec<Option<Candidate>>) {
        votes.resize(self.num_voters, None);
        let file_name = file_name.into();
        self.index.entry(file_name.clone()).or_insert(self.rows.len());
        self.file_names.push(file_name);
        self.rows.push(votes);
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &[Option<Candidate>])> {
        self.file_names
            .iter()
            .map(String::as_str)
            .zip(self.rows.iter().map(Vec::as_slice))
    }

    pub fn row(&self, file_name: &str) -> Option<&[Option<Candidate>]> {
        self.index
            .get(file_name)
            .map(|&position| self.rows[position].as_slice())
    }

    /// One voter's classes down the whole table.
    pub fn voter_classes(&self, voter: usize) -> Vec<Option<ClassId>> {
        self.rows
            .iter()
            .map(|row| row.get(voter).copied().flatten().map(|vote| vote.class))
            .collect()
    }

    pub fn frequency_table(&self) -> ClassFrequencyTable {
        let columns: Vec<Vec<Option<ClassId>>> =
            (0..self.num_voters).map(|voter| self.voter_classes(voter)).collect();
        ClassFrequencyTable::from_voter_columns(&columns)
    }

    pub fn headers(&self) -> Vec<String> {
        let mut headers = vec![FILE_NAME_COLUMN.to_string()];
        for index in 0..self.num_voters {
            headers.push(voter_column(index));
            headers.push(confidence_column(index));
        }
        headers
    }

    /// Read a merged table. Fails with `MalformedBatchInput` when there are
    /// no voter columns or the expected column pairs are incomplete.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(false)
            .from_path(path)
            .map_err(|e| CongressError::csv(path, e))?;

        let headers = reader
            .headers()
            .map_err(|e| CongressError::csv(path, e))?
            .clone();

        let num_voters = count_voter_columns(headers.iter());
        if num_voters == 0 {
            return Err(CongressError::malformed(path, "no voter columns found"));
        }

        let position = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| CongressError::malformed(path, format!("missing column '{}'", name)))
        };

        let file_name_index = position(FILE_NAME_COLUMN)?;
        let voter_indices: Vec<(usize, usize)> = (0..num_voters)
            .map(|i| -> Result<(usize, usize)> {
                Ok((position(&voter_column(i))?, position(&confidence_column(i))?))
            })
            .collect::<Result<_>>()?;

        let mut table = WideTable::new(num_voters);
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| CongressError::csv(path, e))?;

            let file_name = record.get(file_name_index).unwrap_or_default().to_string();
            let mut votes = Vec::with_capacity(num_voters);
            for (voter, &(class_index, conf_index)) in voter_indices.iter().enumerate() {
                let class = parse_class(record.get(class_index).unwrap_or_default())
                    .map_err(|e| row_error(path, line, e))?;
                let confidence = parse_confidence(record.get(conf_index).unwrap_or_default())
                    .map_err(|e| row_error(path, line, e))?;
                let vote = match (class, confidence) {
                    (Some(class), Some(confidence)) => Some(Candidate::new(class, confidence)),
                    (None, None) => None,
                    _ => {
                        return Err(row_error(
                            path,
                            line,
                            format!("voter {} has a label without a confidence or vice versa", voter),
                        ))
                    }
                };
                votes.push(vote);
            }
            table.push_row(file_name, votes);
        }

        tracing::info!(
            "📥 Loaded merged table {}: {} subjects, {} voters",
            path.display(),
            table.len(),
            num_voters
        );
        Ok(table)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| CongressError::csv(path, e))?;
        writer
            .write_record(self.headers())
            .map_err(|e| CongressError::csv(path, e))?;

        for (file_name, votes) in self.rows() {
            let mut record = Vec::with_capacity(1 + 2 * self.num_voters);
            record.push(file_name.to_string());
            for vote in votes {
                match vote {
                    Some(vote) => {
                        record.push(vote.class.to_string());
                        record.push(format_confidence(vote.confidence));
                    }
                    None => {
                        record.push(String::new());
                        record.push(String::new());
                    }
                }
            }
            writer
                .write_record(&record)
                .map_err(|e| CongressError::csv(path, e))?;
        }

        writer.flush().map_err(|e| CongressError::io(path, e))?;
        Ok(())
    }
}
