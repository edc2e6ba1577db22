use serde::Serialize;
use std::collections::BTreeMap;

use crate::certification::Tally;
use crate::models::ClassId;

/// Per-class vote count bounds across the voters of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassBounds {
    /// Smallest count among voters that voted the class at least once.
    pub min_count: usize,
    /// Largest count among all voters.
    pub max_count: usize,
}

/// Batch-wide class distributions, built once before any row is certified
/// and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ClassFrequencyTable {
    per_voter: Vec<Tally>,
    bounds: BTreeMap<ClassId, ClassBounds>,
}

impl ClassFrequencyTable {
    /// Build from one column of votes per voter. `None` cells are abstentions.
    pub fn from_voter_columns(columns: &[Vec<Option<ClassId>>]) -> Self {
        let per_voter: Vec<Tally> = columns
            .iter()
            .map(|column| column.iter().flatten().copied().collect())
            .collect();

        let mut bounds: BTreeMap<ClassId, ClassBounds> = BTreeMap::new();
        for tally in &per_voter {
            for (class, count) in tally.ranked() {
                bounds
                    .entry(class)
                    .and_modify(|b| {
                        b.min_count = b.min_count.min(count);
                        b.max_count = b.max_count.max(count);
                    })
                    .or_insert(ClassBounds {
                        min_count: count,
                        max_count: count,
                    });
            }
        }

        tracing::debug!(
            "📊 Class frequency table built: {} voters, {} classes",
            per_voter.len(),
            bounds.len()
        );

        Self { per_voter, bounds }
    }

    pub fn num_voters(&self) -> usize {
        self.per_voter.len()
    }

    pub fn bounds(&self, class: ClassId) -> Option<ClassBounds> {
        self.bounds.get(&class).copied()
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassId, ClassBounds)> + '_ {
        self.bounds.iter().map(|(&class, &bounds)| (class, bounds))
    }

    /// How many times `voter` voted `class` across the batch.
    pub fn voter_count(&self, voter: usize, class: ClassId) -> usize {
        self.per_voter.get(voter).map(|t| t.count(class)).unwrap_or(0)
    }

    /// The voter's count for `class` relative to the most prolific voter for
    /// that class, in [0, 1].
    pub fn optimism(&self, voter: usize, class: ClassId) -> f64 {
        match self.bounds.get(&class) {
            Some(bounds) if bounds.max_count > 0 => {
                self.voter_count(voter, class) as f64 / bounds.max_count as f64
            }
            _ => 0.0,
        }
    }
}
