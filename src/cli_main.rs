use anyhow::{Context, Result};
use clap::Parser;

use crate::certification::Certifier;
use crate::cli::{split_data_dirs, Cli, Commands};
use crate::commands::{certify_merged, elect, list_voters, merge_data_dir, run_elections};
use crate::config::Config;

fn init_tracing(verbose: bool) {
    // RUST_LOG wins over --verbose
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Load configuration from file or use defaults
    let mut config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)
            .with_context(|| format!("Failed to load config file: {}", config_path))?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::ListVoters {
            model_dir,
            extension,
        } => {
            config.merge_with_cli(model_dir, None, None, None);
            if extension.is_some() {
                config.registry.extension = extension;
            }
            config.validate().context("Configuration validation failed")?;

            list_voters(&config.registry.model_dir, &config.get_extension())?;
        }
        Commands::Elect {
            model_dir,
            extension,
            subjects,
            concurrent,
            workers,
            min_margin,
            format,
        } => {
            config.merge_with_cli(model_dir, workers, min_margin, None);
            if extension.is_some() {
                config.registry.replay_extension = extension;
            }
            config.validate().context("Configuration validation failed")?;

            elect(
                &config.registry.model_dir,
                &config.get_replay_extension(),
                &subjects,
                concurrent,
                Certifier::new(config.certification_config()),
                config.election_settings(),
                format,
            )?;
        }
        Commands::Merge {
            data_dir,
            output_dir,
            suffix,
        } => {
            config.merge_with_cli(None, None, None, suffix);
            config.validate().context("Configuration validation failed")?;

            merge_data_dir(&data_dir, output_dir.as_deref(), &config.batch_settings())?;
        }
        Commands::Certify {
            data_dir,
            input,
            output,
            min_margin,
            format,
        } => {
            config.merge_with_cli(None, None, min_margin, None);
            config.validate().context("Configuration validation failed")?;

            certify_merged(
                &data_dir,
                input.as_deref(),
                output.as_deref(),
                &config.batch_settings(),
                &Certifier::new(config.certification_config()),
                format,
            )?;
        }
        Commands::Run {
            data_dirs,
            suffix,
            min_margin,
            format,
        } => {
            config.merge_with_cli(None, None, min_margin, suffix);
            config.validate().context("Configuration validation failed")?;

            let data_dirs = split_data_dirs(&data_dirs);
            if data_dirs.is_empty() {
                return Err(anyhow::anyhow!("At least one data directory must be specified"));
            }

            run_elections(
                &data_dirs,
                &config.batch_settings(),
                &Certifier::new(config.certification_config()),
                format,
            )?;
        }
    }

    Ok(())
}
