use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "dragon-congress")]
#[command(about = "Hard-voting ensemble certification for DRAGON dual AGN classifications", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the voters found in a model directory
    ListVoters {
        /// Directory holding one file per voter
        #[arg(short, long)]
        model_dir: Option<String>,

        /// Voter file extension
        #[arg(short, long)]
        extension: Option<String>,
    },

    /// Run a single-image election with voters replaying recorded predictions
    Elect {
        /// Directory holding one recorded prediction CSV per voter
        #[arg(short, long)]
        model_dir: Option<String>,

        /// Extension of the recorded prediction files (default: [registry] replay_extension)
        #[arg(short, long)]
        extension: Option<String>,

        /// Subject file names to elect
        #[arg(required = true)]
        subjects: Vec<String>,

        /// Ask voters in parallel
        #[arg(long)]
        concurrent: bool,

        /// Maximum voters predicting at once with --concurrent
        #[arg(short, long)]
        workers: Option<usize>,

        /// Minimum lead over the runner-up
        #[arg(long)]
        min_margin: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Merge per-voter CSVs of a data directory into one wide table
    Merge {
        /// Directory holding the per-voter CSVs
        data_dir: String,

        /// Where to write the merged table (default: the data directory)
        #[arg(short, long)]
        output_dir: Option<String>,

        /// Suffix identifying per-voter CSVs
        #[arg(short, long)]
        suffix: Option<String>,
    },

    /// Certify an already merged table
    Certify {
        /// Directory holding the merged table
        data_dir: String,

        /// Merged table path (default: <data_dir>/combined_results.csv)
        #[arg(short, long)]
        input: Option<String>,

        /// Certified output path (default: <data_dir>/congress.csv)
        #[arg(short, long)]
        output: Option<String>,

        /// Minimum lead over the runner-up
        #[arg(long)]
        min_margin: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Merge and certify each data directory in turn
    Run {
        /// Data directories separated by commas
        #[arg(short, long, default_value = "tang_candidates,merger_test")]
        data_dirs: String,

        /// Suffix identifying per-voter CSVs
        #[arg(short, long)]
        suffix: Option<String>,

        /// Minimum lead over the runner-up
        #[arg(long)]
        min_margin: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Split a comma separated directory list, dropping empty entries.
pub fn split_data_dirs(data_dirs: &str) -> Vec<String> {
    data_dirs
        .split(',')
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .map(str::to_string)
        .collect()
}
