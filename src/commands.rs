use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::batch::{self, merge, BatchReport, BatchSettings, BatchSummary};
use crate::certification::Certifier;
use crate::cli::OutputFormat;
use crate::election::{ElectionReport, ElectionSettings, Ensemble};
use crate::models::{CertifiedRow, Cutout};
use crate::registry::VoterRegistry;
use crate::replay::replay_registry;

pub fn list_voters(model_dir: &str, extension: &str) -> Result<()> {
    let paths = VoterRegistry::model_paths(Path::new(model_dir), extension)?;

    println!("Voters in {} (*.{}):", model_dir, extension.trim_start_matches('.'));
    println!("{:-<60}", "");
    for (index, path) in paths.iter().enumerate() {
        println!("{:>3}  {}", index, path.display());
    }
    println!("{:-<60}", "");
    println!("{} voters", paths.len());

    Ok(())
}

pub fn elect(
    model_dir: &str,
    extension: &str,
    subjects: &[String],
    concurrent: bool,
    certifier: Certifier,
    settings: ElectionSettings,
    format: OutputFormat,
) -> Result<()> {
    let registry = replay_registry(Path::new(model_dir), extension)?;
    let ensemble = Ensemble::new(registry, certifier, settings)?;

    let reports: Vec<ElectionReport> = if concurrent {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async {
            let mut reports = Vec::with_capacity(subjects.len());
            for subject in subjects {
                let cutout = Arc::new(Cutout::named(subject.as_str()));
                reports.push(ensemble.run_election_concurrent(cutout).await);
            }
            reports
        })
    } else {
        subjects
            .iter()
            .map(|subject| ensemble.run_election(&Cutout::named(subject.as_str())))
            .collect()
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        OutputFormat::Table => {
            let rows: Vec<CertifiedRow> = reports
                .iter()
                .map(|report| CertifiedRow::new(report.subject.as_str(), &report.verdict))
                .collect();
            print_certified_table(&rows);
            for report in &reports {
                for failure in &report.failures {
                    println!(
                        "  ! {}: voter {} failed: {}",
                        report.subject, failure.voter_id, failure.reason
                    );
                }
            }
        }
    }

    Ok(())
}

pub fn merge_data_dir(data_dir: &str, output_dir: Option<&str>, settings: &BatchSettings) -> Result<()> {
    let table = merge::merge_directory(Path::new(data_dir), &settings.voter_file_suffix)?;

    let output_dir = PathBuf::from(output_dir.unwrap_or(data_dir));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;
    let merged_path = output_dir.join(&settings.merged_file);
    table.write_csv(&merged_path)?;

    println!(
        "Merged {} voters over {} subjects into {}",
        table.num_voters(),
        table.len(),
        merged_path.display()
    );
    Ok(())
}

pub fn certify_merged(
    data_dir: &str,
    input: Option<&str>,
    output: Option<&str>,
    settings: &BatchSettings,
    certifier: &Certifier,
    format: OutputFormat,
) -> Result<()> {
    let data_dir = Path::new(data_dir);
    let input = input
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join(&settings.merged_file));
    let output = output
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join(&settings.certified_file));

    let rows = batch::certify_file(&input, &output, certifier)
        .with_context(|| format!("Failed to certify {}", input.display()))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Table => print_certified_table(&rows),
    }
    Ok(())
}

pub fn run_elections(
    data_dirs: &[String],
    settings: &BatchSettings,
    certifier: &Certifier,
    format: OutputFormat,
) -> Result<()> {
    tracing::info!("🏛️  Getting voters to the polls for {} data directories", data_dirs.len());

    let mut reports: Vec<BatchReport> = Vec::with_capacity(data_dirs.len());
    for data_dir in data_dirs {
        let dir = Path::new(data_dir);
        let report = batch::run_batch_election(dir, dir, settings, certifier)
            .with_context(|| format!("Election failed for {}", data_dir))?;
        reports.push(report);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Table => {
            for report in &reports {
                println!(
                    "{} ({} voters) -> {}",
                    report.data_dir.display(),
                    report.num_voters,
                    report.certified_path.display()
                );
                print_summary(&report.summary);
                println!();
            }
        }
    }
    Ok(())
}

fn print_certified_table(rows: &[CertifiedRow]) {
    println!(
        "{:<40} {:>7} {:>7} {:>7} {:>10} {:>10}",
        "file_name", "class", "votes", "voters", "avg_conf", "wtd_conf"
    );
    println!("{:-<86}", "");
    for row in rows {
        let weighted = row
            .weighted_confidence
            .map(|w| format!("{:.4}", w))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:>7} {:>7} {:>7} {:>10.4} {:>10}",
            row.file_name,
            row.voted_class,
            row.num_voters,
            row.total_voters,
            row.average_confidence,
            weighted
        );
    }
    let summary_rows = rows.len();
    let elected = rows.iter().filter(|r| r.voted_class >= 0).count();
    println!("{:-<86}", "");
    println!("{} subjects, {} with a certified class", summary_rows, elected);
}

fn print_summary(summary: &BatchSummary) {
    println!("  subjects:          {}", summary.subjects);
    println!("  elected:           {}", summary.elected);
    println!("  too close to call: {}", summary.too_close_to_call);
    println!("  no votes:          {}", summary.no_votes);
    for (class, count) in &summary.class_counts {
        println!("    class {}: {}", class, count);
    }
}
