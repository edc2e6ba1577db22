pub mod frequency;
pub mod merge;
pub mod sheet;
pub mod table;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::certification::Certifier;
use crate::error::{CongressError, Result};
use crate::models::{CertifiedRow, Verdict, VerdictStatus};
use table::WideTable;

/// Columns of the certified CSV, in order.
pub const CERTIFIED_COLUMNS: [&str; 6] = [
    "file_name",
    "voted_class",
    "num_voters",
    "total_voters",
    "average_confidence",
    "weighted_confidence",
];

/// File naming for one batch election.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Per-voter CSVs are the files whose names end with this.
    pub voter_file_suffix: String,
    pub merged_file: String,
    pub certified_file: String,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            voter_file_suffix: "inf_1.csv".to_string(),
            merged_file: "combined_results.csv".to_string(),
            certified_file: "congress.csv".to_string(),
        }
    }
}

/// Counts over a certified batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub subjects: usize,
    pub elected: usize,
    pub too_close_to_call: usize,
    pub no_votes: usize,
    /// Subjects per elected class.
    pub class_counts: BTreeMap<u32, usize>,
}

impl BatchSummary {
    pub fn from_verdicts<'a>(verdicts: impl IntoIterator<Item = &'a Verdict>) -> Self {
        let mut summary = BatchSummary::default();
        for verdict in verdicts {
            summary.subjects += 1;
            match verdict.status {
                VerdictStatus::Elected => summary.elected += 1,
                VerdictStatus::TooCloseToCall => summary.too_close_to_call += 1,
                VerdictStatus::NoVotes => summary.no_votes += 1,
            }
            if let Some(class) = verdict.voted_class {
                *summary.class_counts.entry(class).or_insert(0) += 1;
            }
        }
        summary
    }
}

/// Outcome of merging and certifying one data directory.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub data_dir: PathBuf,
    pub merged_path: PathBuf,
    pub certified_path: PathBuf,
    pub num_voters: usize,
    pub summary: BatchSummary,
    pub rows: Vec<CertifiedRow>,
}

/// Certify every row of a merged table.
///
/// The class frequency table is computed from the whole table before the
/// first row is certified.
pub fn certify_table(table: &WideTable, certifier: &Certifier) -> Result<Vec<(String, Verdict)>> {
    if table.num_voters() == 0 {
        return Err(CongressError::malformed(
            "merged table",
            "no voter columns found",
        ));
    }

    tracing::info!("🏛️  Sending {} subjects for certification", table.len());
    let frequencies = table.frequency_table();

    let verdicts: Vec<(String, Verdict)> = table
        .rows()
        .map(|(file_name, votes)| {
            let verdict = certifier.certify_batch_row(votes, &frequencies, table.num_voters());
            tracing::debug!(
                "{}: {} (class {}, {}/{} voters)",
                file_name,
                verdict.status.as_str(),
                verdict.voted_class_code(),
                verdict.num_voters,
                verdict.total_voters
            );
            (file_name.to_string(), verdict)
        })
        .collect();

    tracing::info!("✅ Congressional voting completed");
    Ok(verdicts)
}

/// Write the certified CSV. The header is written even when there are no rows.
pub fn write_certified_csv(path: &Path, rows: &[CertifiedRow]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| CongressError::csv(path, e))?;
    writer
        .write_record(CERTIFIED_COLUMNS)
        .map_err(|e| CongressError::csv(path, e))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| CongressError::csv(path, e))?;
    }
    writer.flush().map_err(|e| CongressError::io(path, e))?;
    tracing::info!("💾 Certified results saved to {}", path.display());
    Ok(())
}

pub fn read_certified_csv(path: &Path) -> Result<Vec<CertifiedRow>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| CongressError::csv(path, e))?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<CertifiedRow>, _>>()
        .map_err(|e| CongressError::csv(path, e))
}

/// Certify an already merged table on disk and write the certified CSV.
pub fn certify_file(
    merged_path: &Path,
    certified_path: &Path,
    certifier: &Certifier,
) -> Result<Vec<CertifiedRow>> {
    let table = WideTable::read_csv(merged_path)?;
    let rows: Vec<CertifiedRow> = certify_table(&table, certifier)?
        .iter()
        .map(|(file_name, verdict)| CertifiedRow::new(file_name.as_str(), verdict))
        .collect();
    write_certified_csv(certified_path, &rows)?;
    Ok(rows)
}

/// Merge the per-voter CSVs of `data_dir`, save the merged table, then
/// certify it. Output files go to `output_dir`.
pub fn run_batch_election(
    data_dir: &Path,
    output_dir: &Path,
    settings: &BatchSettings,
    certifier: &Certifier,
) -> Result<BatchReport> {
    let table = merge::merge_directory(data_dir, &settings.voter_file_suffix)?;

    std::fs::create_dir_all(output_dir).map_err(|e| CongressError::io(output_dir, e))?;
    let merged_path = output_dir.join(&settings.merged_file);
    table.write_csv(&merged_path)?;
    tracing::info!("💾 Election counts saved to {}", merged_path.display());

    let verdicts = certify_table(&table, certifier)?;
    let summary = BatchSummary::from_verdicts(verdicts.iter().map(|(_, v)| v));
    let rows: Vec<CertifiedRow> = verdicts
        .iter()
        .map(|(file_name, verdict)| CertifiedRow::new(file_name.as_str(), verdict))
        .collect();

    let certified_path = output_dir.join(&settings.certified_file);
    write_certified_csv(&certified_path, &rows)?;

    tracing::info!(
        "🏁 Election finished for {}: {} elected, {} too close to call, {} without votes",
        data_dir.display(),
        summary.elected,
        summary.too_close_to_call,
        summary.no_votes
    );

    Ok(BatchReport {
        data_dir: data_dir.to_path_buf(),
        merged_path,
        certified_path,
        num_voters: table.num_voters(),
        summary,
        rows,
    })
}
