use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::batch::frequency::ClassFrequencyTable;
pub use crate::models::CertificationMode;
use crate::models::{Candidate, ClassId, Verdict, VerdictStatus, VoteRecord};

/// Tunables for the certification step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificationConfig {
    /// Minimum lead over the runner-up for a class to be elected.
    /// With the default of 2 a one-vote lead is too close to call.
    pub min_margin: usize,
}

impl Default for CertificationConfig {
    fn default() -> Self {
        Self { min_margin: 2 }
    }
}

/// Vote counts per class.
///
/// Ranking is deterministic: higher count first, then lower class id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    counts: BTreeMap<ClassId, usize>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, class: ClassId) {
        *self.counts.entry(class).or_insert(0) += 1;
    }

    pub fn count(&self, class: ClassId) -> usize {
        self.counts.get(&class).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn distinct(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn ranked(&self) -> Vec<(ClassId, usize)> {
        let mut ranked: Vec<(ClassId, usize)> =
            self.counts.iter().map(|(&class, &count)| (class, count)).collect();
        // BTreeMap iteration is already class-ascending; a stable sort keeps that within equal counts
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    pub fn leader(&self) -> Option<(ClassId, usize)> {
        self.ranked().first().copied()
    }

    pub fn runner_up(&self) -> Option<(ClassId, usize)> {
        self.ranked().get(1).copied()
    }
}

impl FromIterator<ClassId> for Tally {
    fn from_iter<I: IntoIterator<Item = ClassId>>(iter: I) -> Self {
        let mut tally = Tally::new();
        for class in iter {
            tally.add(class);
        }
        tally
    }
}

/// Outcome of the majority/margin step, before confidences are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Decision {
    majority: ClassId,
    maj_count: usize,
    contested: bool,
}

/// Turns ballots into verdicts.
#[derive(Debug, Clone)]
pub struct Certifier {
    config: CertificationConfig,
}

impl Default for Certifier {
    fn default() -> Self {
        Self::new(CertificationConfig::default())
    }
}

impl Certifier {
    pub fn new(mut config: CertificationConfig) -> Self {
        // A margin of zero would elect on an exact tie
        config.min_margin = config.min_margin.max(1);
        Self { config }
    }

    pub fn config(&self) -> &CertificationConfig {
        &self.config
    }

    fn decide(&self, tally: &Tally) -> Option<Decision> {
        let ranked = tally.ranked();
        let &(majority, maj_count) = ranked.first()?;

        let contested = match ranked.get(1) {
            Some(&(_, second_count)) => maj_count - second_count < self.config.min_margin,
            None => false,
        };

        Some(Decision {
            majority,
            maj_count,
            contested,
        })
    }

    /// Certify one subject's ballot in online mode.
    ///
    /// `total_voters` is the registry size, which may exceed the ballot
    /// length when voters failed.
    pub fn certify(&self, ballot: &[VoteRecord], total_voters: usize) -> Verdict {
        let tally: Tally = ballot.iter().map(VoteRecord::primary_class).collect();

        let Some(decision) = self.decide(&tally) else {
            tracing::warn!("🗳️  No votes were cast");
            return Verdict::no_votes(total_voters, CertificationMode::Online);
        };

        if decision.contested {
            tracing::info!(
                "⚖️  Too close to call: class {} leads with {} of {} votes",
                decision.majority,
                decision.maj_count,
                tally.total()
            );
            return Verdict {
                mode: CertificationMode::Online,
                status: VerdictStatus::TooCloseToCall,
                voted_class: None,
                num_voters: 0,
                total_voters,
                average_confidence: 0.0,
                weighted_confidence: None,
            };
        }

        let winning: Vec<f64> = ballot
            .iter()
            .filter(|record| record.primary_class() == decision.majority)
            .map(VoteRecord::primary_confidence)
            .collect();

        Verdict {
            mode: CertificationMode::Online,
            status: VerdictStatus::Elected,
            voted_class: Some(decision.majority),
            num_voters: decision.maj_count,
            total_voters,
            average_confidence: mean(&winning),
            weighted_confidence: None,
        }
    }

    /// Certify one row of the merged batch table.
    ///
    /// `votes[i]` is voter `i`'s vote, `None` when that voter has no entry
    /// for the subject.
    pub fn certify_batch_row(
        &self,
        votes: &[Option<Candidate>],
        frequencies: &ClassFrequencyTable,
        total_voters: usize,
    ) -> Verdict {
        let tally: Tally = votes.iter().flatten().map(|vote| vote.class).collect();

        let Some(decision) = self.decide(&tally) else {
            return Verdict::no_votes(total_voters, CertificationMode::Batch);
        };

        let confidences: Vec<f64> = votes.iter().flatten().map(|vote| vote.confidence).collect();

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (index, vote) in votes.iter().enumerate() {
            if let Some(vote) = vote {
                let optimism = frequencies.optimism(index, decision.majority);
                weighted_sum += vote.confidence * optimism;
                weight_total += optimism;
            }
        }
        let weighted_confidence = if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            0.0
        };

        let (status, voted_class) = if decision.contested {
            (VerdictStatus::TooCloseToCall, None)
        } else {
            (VerdictStatus::Elected, Some(decision.majority))
        };

        Verdict {
            mode: CertificationMode::Batch,
            status,
            voted_class,
            num_voters: decision.maj_count,
            total_voters,
            average_confidence: mean(&confidences),
            weighted_confidence: Some(weighted_confidence),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Prediction, NO_CONSENSUS};
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn ballot(classes: &[ClassId], confidences: &[f64]) -> Vec<VoteRecord> {
        classes
            .iter()
            .zip(confidences)
            .enumerate()
            .map(|(i, (&class, &conf))| {
                VoteRecord::new(
                    format!("voter_{}", i),
                    Prediction::top2(class, conf, (class + 1) % 6, (1.0 - conf) / 2.0),
                )
            })
            .collect()
    }

    fn batch_votes(classes: &[ClassId], confidences: &[f64]) -> Vec<Option<Candidate>> {
        classes
            .iter()
            .zip(confidences)
            .map(|(&class, &conf)| Some(Candidate::new(class, conf)))
            .collect()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_tally_ranking_breaks_ties_by_lowest_class() {
        let tally: Tally = vec![4, 1, 4, 1, 3].into_iter().collect();
        assert_eq!(tally.ranked(), vec![(1, 2), (4, 2), (3, 1)]);
        assert_eq!(tally.leader(), Some((1, 2)));
        assert_eq!(tally.runner_up(), Some((4, 2)));
        assert_eq!(tally.total(), 5);
        assert_eq!(tally.distinct(), 3);
        assert_eq!(tally.count(0), 0);
    }

    #[test]
    fn test_tally_ranking_is_insertion_order_independent() {
        let a: Tally = vec![5, 2, 2, 5, 0].into_iter().collect();
        let b: Tally = vec![0, 5, 5, 2, 2].into_iter().collect();
        assert_eq!(a.ranked(), b.ranked());
        assert_eq!(a.leader(), Some((2, 2)));
    }

    #[test]
    fn test_single_voter_is_elected() {
        let certifier = Certifier::default();
        let verdict = certifier.certify(&ballot(&[4], &[0.65]), 1);
        assert_eq!(verdict.status, VerdictStatus::Elected);
        assert_eq!(verdict.voted_class, Some(4));
        assert_eq!(verdict.num_voters, 1);
        assert_eq!(verdict.total_voters, 1);
        assert_close(verdict.average_confidence, 0.65);
    }

    #[test]
    fn test_clear_majority() {
        let certifier = Certifier::default();
        let verdict = certifier.certify(&ballot(&[2, 2, 2, 0, 1], &[0.9, 0.8, 0.7, 0.6, 0.5]), 5);
        assert_eq!(verdict.voted_class, Some(2));
        assert_eq!(verdict.num_voters, 3);
        assert_eq!(verdict.total_voters, 5);
        assert_close(verdict.average_confidence, 0.8);
        assert_eq!(verdict.weighted_confidence, None);
        assert_eq!(verdict.mode, CertificationMode::Online);
    }

    #[test]
    fn test_exact_tie_is_no_consensus() {
        let certifier = Certifier::default();
        let verdict = certifier.certify(&ballot(&[2, 2, 0, 0], &[0.9, 0.8, 0.7, 0.6]), 4);
        assert_eq!(verdict.status, VerdictStatus::TooCloseToCall);
        assert_eq!(verdict.voted_class_code(), NO_CONSENSUS);
        assert_eq!(verdict.num_voters, 0);
        assert_eq!(verdict.average_confidence, 0.0);
    }

    #[test]
    fn test_one_vote_lead_is_too_close_to_call() {
        let certifier = Certifier::default();
        let verdict = certifier.certify(
            &ballot(&[2, 2, 2, 0, 0, 1], &[0.9, 0.8, 0.7, 0.6, 0.5, 0.4]),
            6,
        );
        assert_eq!(verdict.status, VerdictStatus::TooCloseToCall);
        assert_eq!(verdict.voted_class, None);
        assert_eq!(verdict.num_voters, 0);
        assert_eq!(verdict.total_voters, 6);
    }

    #[test]
    fn test_two_vote_lead_is_elected() {
        let certifier = Certifier::default();
        let verdict = certifier.certify(&ballot(&[1, 1, 1, 3], &[0.6, 0.6, 0.9, 0.99]), 4);
        assert_eq!(verdict.voted_class, Some(1));
        assert_eq!(verdict.num_voters, 3);
        assert_close(verdict.average_confidence, 0.7);
    }

    #[test]
    fn test_three_way_tie() {
        let certifier = Certifier::default();
        let verdict = certifier.certify(&ballot(&[0, 1, 2], &[0.5, 0.5, 0.5]), 3);
        assert_eq!(verdict.status, VerdictStatus::TooCloseToCall);
        assert_eq!(verdict.num_voters, 0);
    }

    #[test]
    fn test_empty_ballot() {
        let certifier = Certifier::default();
        let verdict = certifier.certify(&[], 9);
        assert_eq!(verdict, Verdict::no_votes(9, CertificationMode::Online));
    }

    #[test]
    fn test_total_voters_reflects_registry_not_ballot() {
        let certifier = Certifier::default();
        let verdict = certifier.certify(&ballot(&[5, 5, 5], &[0.9, 0.9, 0.9]), 8);
        assert_eq!(verdict.num_voters, 3);
        assert_eq!(verdict.total_voters, 8);
    }

    #[test]
    fn test_custom_margin() {
        let lenient = Certifier::new(CertificationConfig { min_margin: 1 });
        let verdict = lenient.certify(&ballot(&[2, 2, 2, 0, 0], &[0.9; 5]), 5);
        assert_eq!(verdict.voted_class, Some(2));

        let strict = Certifier::new(CertificationConfig { min_margin: 3 });
        let verdict = strict.certify(&ballot(&[2, 2, 2, 2, 0, 0], &[0.9; 6]), 6);
        assert_eq!(verdict.status, VerdictStatus::TooCloseToCall);
    }

    #[test]
    fn test_zero_margin_is_clamped() {
        let certifier = Certifier::new(CertificationConfig { min_margin: 0 });
        assert_eq!(certifier.config().min_margin, 1);
        let verdict = certifier.certify(&ballot(&[3, 4], &[0.9, 0.9]), 2);
        assert_eq!(verdict.status, VerdictStatus::TooCloseToCall);
    }

    #[test]
    fn test_certify_is_order_independent() {
        let certifier = Certifier::default();
        let classes = [3, 1, 3, 3, 0, 1, 3, 5, 3, 1, 2];
        let confidences = [0.91, 0.55, 0.73, 0.88, 0.41, 0.62, 0.97, 0.35, 0.69, 0.58, 0.47];
        let original = ballot(&classes, &confidences);
        let expected = certifier.certify(&original, original.len());

        let mut rng = StdRng::seed_from_u64(0x0d0a_94c7);
        for _ in 0..50 {
            let mut shuffled = original.clone();
            shuffled.shuffle(&mut rng);
            let verdict = certifier.certify(&shuffled, shuffled.len());
            assert_eq!(verdict.status, expected.status);
            assert_eq!(verdict.voted_class, expected.voted_class);
            assert_eq!(verdict.num_voters, expected.num_voters);
            assert_close(verdict.average_confidence, expected.average_confidence);
        }
    }

    #[test]
    fn test_batch_row_clear_majority() {
        let classes = [2, 2, 2, 0, 1];
        let confs = [0.9, 0.8, 0.7, 0.6, 0.5];
        // Every voter voted class 2 equally often across the batch
        let frequencies = ClassFrequencyTable::from_voter_columns(&[
            vec![Some(2), Some(2)],
            vec![Some(2), Some(2)],
            vec![Some(2), Some(2)],
            vec![Some(2), Some(2)],
            vec![Some(2), Some(2)],
        ]);

        let certifier = Certifier::default();
        let verdict = certifier.certify_batch_row(&batch_votes(&classes, &confs), &frequencies, 5);
        assert_eq!(verdict.mode, CertificationMode::Batch);
        assert_eq!(verdict.voted_class, Some(2));
        assert_eq!(verdict.num_voters, 3);
        // Batch average covers every voter, not just the winning block
        assert_close(verdict.average_confidence, 0.7);
        // Uniform optimism reduces to the plain average
        assert_close(verdict.weighted_confidence.unwrap(), 0.7);
    }

    #[test]
    fn test_batch_row_tie_keeps_leader_count() {
        let frequencies = ClassFrequencyTable::from_voter_columns(&[
            vec![Some(2)],
            vec![Some(2)],
            vec![Some(0)],
            vec![Some(0)],
        ]);
        let certifier = Certifier::default();
        let verdict = certifier.certify_batch_row(
            &batch_votes(&[2, 2, 0, 0], &[0.9, 0.8, 0.7, 0.6]),
            &frequencies,
            4,
        );
        assert_eq!(verdict.status, VerdictStatus::TooCloseToCall);
        assert_eq!(verdict.voted_class_code(), NO_CONSENSUS);
        assert_eq!(verdict.num_voters, 2);
        assert_close(verdict.average_confidence, 0.75);
    }

    #[test]
    fn test_batch_weighted_confidence_uses_optimism() {
        // Voter 0 voted class 1 twice in the batch, voter 1 once, voter 2 never
        let frequencies = ClassFrequencyTable::from_voter_columns(&[
            vec![Some(1), Some(1), Some(0)],
            vec![Some(1), Some(0), Some(0)],
            vec![Some(0), Some(0), Some(0)],
        ]);
        let votes = batch_votes(&[1, 1, 0], &[0.8, 0.5, 0.9]);
        let certifier = Certifier::new(CertificationConfig { min_margin: 1 });
        let verdict = certifier.certify_batch_row(&votes, &frequencies, 3);

        assert_eq!(verdict.voted_class, Some(1));
        // optimism = [2/2, 1/2, 0/2]
        let expected = (0.8 * 1.0 + 0.5 * 0.5 + 0.9 * 0.0) / 1.5;
        assert_close(verdict.weighted_confidence.unwrap(), expected);
        assert_close(verdict.average_confidence, (0.8 + 0.5 + 0.9) / 3.0);
    }

    #[test]
    fn test_batch_row_abstentions() {
        let frequencies = ClassFrequencyTable::from_voter_columns(&[
            vec![Some(4)],
            vec![None],
            vec![Some(4)],
        ]);
        let votes = vec![Some(Candidate::new(4, 0.6)), None, Some(Candidate::new(4, 0.8))];
        let verdict = Certifier::default().certify_batch_row(&votes, &frequencies, 3);
        assert_eq!(verdict.voted_class, Some(4));
        assert_eq!(verdict.num_voters, 2);
        assert_eq!(verdict.total_voters, 3);
        assert_close(verdict.average_confidence, 0.7);

        let all_abstained = vec![None, None, None];
        let verdict = Certifier::default().certify_batch_row(&all_abstained, &frequencies, 3);
        assert_eq!(verdict, Verdict::no_votes(3, CertificationMode::Batch));
    }
}
