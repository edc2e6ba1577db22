use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::batch::sheet::ScoreSheet;
use crate::batch::table::WideTable;
use crate::error::{CongressError, Result};
use crate::models::Candidate;

/// Find the per-voter CSVs in a data directory.
///
/// Sorted by path so voter indices are stable across runs.
pub fn discover_voter_files(data_dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(data_dir).map_err(|e| CongressError::io(data_dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::trace!("⚠️  Error reading entry in {:?}: {}", data_dir, e);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.ends_with(suffix))
        {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Join per-voter sheets on `file_name`. Voter `i` is `sheets[i]`.
///
/// Rows appear in order of first appearance; a subject missing from a
/// sheet gets an abstention for that voter.
pub fn merge_score_sheets(sheets: &[ScoreSheet]) -> WideTable {
    let num_voters = sheets.len();
    let mut order: Vec<String> = Vec::new();
    let mut rows: HashMap<String, Vec<Option<Candidate>>> = HashMap::new();

    for (voter, sheet) in sheets.iter().enumerate() {
        for (file_name, prediction) in sheet.entries() {
            let row = rows.entry(file_name.clone()).or_insert_with(|| {
                order.push(file_name.clone());
                vec![None; num_voters]
            });
            row[voter] = Some(prediction.primary);
        }
    }

    let mut table = WideTable::new(num_voters);
    for file_name in order {
        let votes = rows.remove(&file_name).unwrap_or_default();
        table.push_row(file_name, votes);
    }

    let incomplete = table
        .rows()
        .filter(|(_, votes)| votes.iter().any(Option::is_none))
        .count();
    if incomplete > 0 {
        tracing::warn!(
            "⚠️  {} of {} subjects are missing a vote from at least one voter",
            incomplete,
            table.len()
        );
    }

    table
}

/// Read every per-voter CSV in `data_dir` and merge them.
pub fn merge_directory(data_dir: &Path, suffix: &str) -> Result<WideTable> {
    tracing::info!("🗳️  Beginning election for {}", data_dir.display());

    let files = discover_voter_files(data_dir, suffix)?;
    if files.is_empty() {
        return Err(CongressError::malformed(
            data_dir,
            format!("no per-voter files ending in '{}'", suffix),
        ));
    }

    let sheets = files
        .iter()
        .enumerate()
        .map(|(index, path)| {
            tracing::info!("🧾 Voter {} ← {}", index, path.display());
            ScoreSheet::read(path)
        })
        .collect::<Result<Vec<_>>>()?;

    let table = merge_score_sheets(&sheets);
    tracing::info!(
        "📋 Merged {} voters over {} subjects",
        table.num_voters(),
        table.len()
    );
    Ok(table)
}
