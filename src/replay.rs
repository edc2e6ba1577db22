use anyhow::anyhow;
use std::path::Path;

use crate::batch::sheet::ScoreSheet;
use crate::error::Result;
use crate::models::{Cutout, Prediction};
use crate::registry::{Voter, VoterRegistry};

/// A voter that answers from predictions recorded earlier by its model,
/// looked up by the cutout's file name.
#[derive(Debug, Clone)]
pub struct ScoreSheetVoter {
    sheet: ScoreSheet,
}

impl ScoreSheetVoter {
    pub fn new(sheet: ScoreSheet) -> Self {
        Self { sheet }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(ScoreSheet::read(path)?))
    }

    pub fn sheet(&self) -> &ScoreSheet {
        &self.sheet
    }
}

impl Voter for ScoreSheetVoter {
    fn predict(&self, cutout: &Cutout) -> anyhow::Result<Prediction> {
        self.sheet.lookup(&cutout.file_name).copied().ok_or_else(|| {
            anyhow!(
                "no recorded prediction for {} in {}",
                cutout.file_name,
                self.sheet.path().display()
            )
        })
    }
}

/// Register one replay voter per score sheet in `dir`.
pub fn replay_registry(dir: &Path, extension: &str) -> Result<VoterRegistry> {
    VoterRegistry::discover(dir, extension, |path| Ok(ScoreSheetVoter::load(path)?))
}
