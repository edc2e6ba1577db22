use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::batch::BatchSettings;
use crate::certification::CertificationConfig;
use crate::election::ElectionSettings;

/// Main configuration structure for the congress
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Voter registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Election runner configuration
    #[serde(default)]
    pub election: ElectionConfig,
    /// Certification rules
    #[serde(default)]
    pub certification: CertificationSection,
    /// Batch file naming
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory holding one file per voter model
    pub model_dir: String,
    /// Model file extension (default: "pt")
    pub extension: Option<String>,
    /// Extension of recorded prediction files replayed by `elect` (default: "csv")
    pub replay_extension: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Voters predicting at once in concurrent elections (default: 4)
    pub workers: Option<usize>,
    /// Log voters slower than this, as human readable time (default: "30s")
    pub slow_voter_warning: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificationSection {
    /// Minimum lead over the runner-up (default: 2)
    pub min_margin: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Suffix identifying per-voter CSVs (default: "inf_1.csv")
    pub voter_file_suffix: Option<String>,
    /// Merged table file name (default: "combined_results.csv")
    pub merged_file: Option<String>,
    /// Certified output file name (default: "congress.csv")
    pub certified_file: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            model_dir: "good_models/voters".to_string(),
            extension: Some("pt".to_string()),
            replay_extension: Some("csv".to_string()),
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            workers: Some(4),
            slow_voter_warning: Some("30s".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml_edit::de::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_string = toml_edit::ser::to_string_pretty(self)
            .context("Failed to serialize configuration to TOML")?;

        std::fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Merge configuration with command line arguments, prioritizing CLI values
    pub fn merge_with_cli(
        &mut self,
        model_dir: Option<String>,
        workers: Option<usize>,
        min_margin: Option<usize>,
        voter_file_suffix: Option<String>,
    ) {
        if let Some(dir) = model_dir {
            self.registry.model_dir = dir;
        }

        if let Some(workers) = workers {
            self.election.workers = Some(workers);
        }

        if let Some(margin) = min_margin {
            self.certification.min_margin = Some(margin);
        }

        if let Some(suffix) = voter_file_suffix {
            self.batch.voter_file_suffix = Some(suffix);
        }
    }

    /// Get the effective values with defaults applied
    pub fn get_extension(&self) -> String {
        self.registry
            .extension
            .clone()
            .unwrap_or_else(|| "pt".to_string())
    }

    pub fn get_replay_extension(&self) -> String {
        self.registry
            .replay_extension
            .clone()
            .unwrap_or_else(|| "csv".to_string())
    }

    pub fn get_workers(&self) -> usize {
        self.election.workers.unwrap_or(4)
    }

    pub fn get_slow_voter_warning(&self) -> Duration {
        let warning = self.election.slow_voter_warning.as_deref().unwrap_or("30s");
        humantime::parse_duration(warning).unwrap_or(Duration::from_secs(30))
    }

    pub fn get_min_margin(&self) -> usize {
        self.certification.min_margin.unwrap_or(2)
    }

    pub fn election_settings(&self) -> ElectionSettings {
        ElectionSettings {
            workers: self.get_workers(),
            slow_voter_warning: self.get_slow_voter_warning(),
        }
    }

    pub fn certification_config(&self) -> CertificationConfig {
        CertificationConfig {
            min_margin: self.get_min_margin(),
        }
    }

    pub fn batch_settings(&self) -> BatchSettings {
        let defaults = BatchSettings::default();
        BatchSettings {
            voter_file_suffix: self
                .batch
                .voter_file_suffix
                .clone()
                .unwrap_or(defaults.voter_file_suffix),
            merged_file: self.batch.merged_file.clone().unwrap_or(defaults.merged_file),
            certified_file: self
                .batch
                .certified_file
                .clone()
                .unwrap_or(defaults.certified_file),
        }
    }

    /// Validate configuration values. The model directory itself is checked
    /// when the registry is built.
    pub fn validate(&self) -> Result<()> {
        if self.registry.model_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("A model directory must be specified"));
        }

        if self.get_workers() == 0 {
            return Err(anyhow::anyhow!("Election workers must be at least 1"));
        }

        if self.get_min_margin() == 0 {
            return Err(anyhow::anyhow!("Certification min_margin must be at least 1"));
        }

        if let Some(ref warning) = self.election.slow_voter_warning {
            humantime::parse_duration(warning)
                .with_context(|| format!("Invalid slow_voter_warning format: {}", warning))?;
        }

        let batch = self.batch_settings();
        if batch.voter_file_suffix.is_empty() {
            return Err(anyhow::anyhow!("Batch voter_file_suffix must not be empty"));
        }
        // The merged table must not be picked up as another voter's file
        if batch.merged_file.ends_with(&batch.voter_file_suffix)
            || batch.certified_file.ends_with(&batch.voter_file_suffix)
        {
            return Err(anyhow::anyhow!(
                "Batch output files must not end with the voter file suffix '{}'",
                batch.voter_file_suffix
            ));
        }

        Ok(())
    }
}
