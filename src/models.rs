use serde::{Deserialize, Serialize};

use crate::error::InvalidValue;

/// Class label produced by a voter (0..K-1).
pub type ClassId = u32;

/// Value written to the `voted_class` column when no class was certified.
pub const NO_CONSENSUS: i64 = -1;

/// One ranked class guess from a voter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub class: ClassId,
    pub confidence: f64,
}

impl Candidate {
    pub fn new(class: ClassId, confidence: f64) -> Self {
        Self { class, confidence }
    }
}

/// Top-2 output of a single voter for a single subject.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub primary: Candidate,
    /// Not every source records a runner-up (batch per-voter files don't).
    pub secondary: Option<Candidate>,
}

impl Prediction {
    pub fn new(primary: Candidate, secondary: Option<Candidate>) -> Self {
        Self { primary, secondary }
    }

    pub fn top2(class: ClassId, confidence: f64, second_class: ClassId, second_confidence: f64) -> Self {
        Self {
            primary: Candidate::new(class, confidence),
            secondary: Some(Candidate::new(second_class, second_confidence)),
        }
    }

    /// Check confidence bounds and top-2 ordering.
    pub fn validate(&self) -> Result<(), InvalidValue> {
        check_confidence("primary", self.primary.confidence)?;
        if let Some(secondary) = self.secondary {
            check_confidence("secondary", secondary.confidence)?;
            if secondary.confidence > self.primary.confidence {
                return Err(InvalidValue::SecondaryExceedsPrimary {
                    primary: self.primary.confidence,
                    secondary: secondary.confidence,
                });
            }
        }
        Ok(())
    }
}

pub(crate) fn check_confidence(which: &'static str, value: f64) -> Result<(), InvalidValue> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(InvalidValue::ConfidenceOutOfRange { which, value });
    }
    Ok(())
}

/// One voter's opinion on one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub voter_id: String,
    pub prediction: Prediction,
}

impl VoteRecord {
    pub fn new(voter_id: impl Into<String>, prediction: Prediction) -> Self {
        Self {
            voter_id: voter_id.into(),
            prediction,
        }
    }

    pub fn primary_class(&self) -> ClassId {
        self.prediction.primary.class
    }

    pub fn primary_confidence(&self) -> f64 {
        self.prediction.primary.confidence
    }
}

/// A single grayscale image cutout handed to every voter.
///
/// Loading and normalisation happen upstream; voters receive the pixels as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct Cutout {
    pub file_name: String,
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<f32>,
}

impl Cutout {
    pub fn new(file_name: impl Into<String>, width: usize, height: usize, pixels: Vec<f32>) -> Self {
        Self {
            file_name: file_name.into(),
            width,
            height,
            pixels,
        }
    }

    /// A cutout that only carries its identity, for voters that look
    /// predictions up by file name.
    pub fn named(file_name: impl Into<String>) -> Self {
        Self::new(file_name, 0, 0, Vec::new())
    }
}

/// Which certification rules to apply.
///
/// The two modes differ on purpose and must not be merged silently:
///
/// | | `Online` | `Batch` |
/// |---|---|---|
/// | `num_voters` when too close to call | 0 | size of the leading block |
/// | `average_confidence` | mean over the winning block | mean over every cast vote |
/// | `weighted_confidence` | not computed | optimism-weighted mean |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificationMode {
    Online,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    /// A class won by at least the required margin.
    Elected,
    /// The runner-up was within the margin of the leader.
    TooCloseToCall,
    /// No votes were cast.
    NoVotes,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictStatus::Elected => "Elected",
            VerdictStatus::TooCloseToCall => "Too close to call",
            VerdictStatus::NoVotes => "No votes",
        }
    }
}

/// Certified outcome for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub mode: CertificationMode,
    pub status: VerdictStatus,
    /// `None` unless `status` is `Elected`.
    pub voted_class: Option<ClassId>,
    pub num_voters: usize,
    pub total_voters: usize,
    pub average_confidence: f64,
    /// Only computed in batch mode.
    pub weighted_confidence: Option<f64>,
}

impl Verdict {
    pub fn no_votes(total_voters: usize, mode: CertificationMode) -> Self {
        Self {
            mode,
            status: VerdictStatus::NoVotes,
            voted_class: None,
            num_voters: 0,
            total_voters,
            average_confidence: 0.0,
            weighted_confidence: None,
        }
    }

    pub fn is_elected(&self) -> bool {
        self.status == VerdictStatus::Elected
    }

    /// The class as written to CSV, with [`NO_CONSENSUS`] for no winner.
    pub fn voted_class_code(&self) -> i64 {
        self.voted_class.map(i64::from).unwrap_or(NO_CONSENSUS)
    }
}

/// Row of the certified output CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertifiedRow {
    pub file_name: String,
    pub voted_class: i64,
    pub num_voters: usize,
    pub total_voters: usize,
    pub average_confidence: f64,
    pub weighted_confidence: Option<f64>,
}

impl CertifiedRow {
    pub fn new(file_name: impl Into<String>, verdict: &Verdict) -> Self {
        Self {
            file_name: file_name.into(),
            voted_class: verdict.voted_class_code(),
            num_voters: verdict.num_voters,
            total_voters: verdict.total_voters,
            average_confidence: verdict.average_confidence,
            weighted_confidence: verdict.weighted_confidence,
        }
    }
}
