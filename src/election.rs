use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::certification::Certifier;
use crate::error::{CongressError, Result};
use crate::models::{Cutout, Verdict, VoteRecord};
use crate::registry::{Voter, VoterRegistry};

/// How elections are run.
#[derive(Debug, Clone, PartialEq)]
pub struct ElectionSettings {
    /// Upper bound on voters predicting at once in concurrent elections.
    pub workers: usize,
    /// Voter calls slower than this are logged. They are never cancelled.
    pub slow_voter_warning: Duration,
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            slow_voter_warning: Duration::from_secs(30),
        }
    }
}

/// A voter that was left off the ballot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoterFailure {
    pub voter_id: String,
    pub reason: String,
}

impl From<VoterFailure> for CongressError {
    fn from(failure: VoterFailure) -> Self {
        CongressError::VoterFailure {
            voter: failure.voter_id,
            reason: failure.reason,
        }
    }
}

/// Everything one election produced.
#[derive(Debug, Clone, Serialize)]
pub struct ElectionReport {
    pub subject: String,
    pub verdict: Verdict,
    /// Votes actually cast, ordered by voter id.
    pub ballot: Vec<VoteRecord>,
    pub failures: Vec<VoterFailure>,
}

/// A long-lived ensemble: the registered voters plus the certification
/// rules. Build once, then run as many elections as needed.
#[derive(Debug, Clone)]
pub struct Ensemble {
    registry: VoterRegistry,
    certifier: Certifier,
    settings: ElectionSettings,
}

impl Ensemble {
    pub fn new(registry: VoterRegistry, certifier: Certifier, settings: ElectionSettings) -> Result<Self> {
        if registry.is_empty() {
            return Err(CongressError::Configuration(
                "an ensemble needs at least one voter".to_string(),
            ));
        }
        Ok(Self {
            registry,
            certifier,
            settings,
        })
    }

    pub fn registry(&self) -> &VoterRegistry {
        &self.registry
    }

    pub fn certifier(&self) -> &Certifier {
        &self.certifier
    }

    pub fn settings(&self) -> &ElectionSettings {
        &self.settings
    }

    pub fn total_voters(&self) -> usize {
        self.registry.len()
    }

    /// Ask every voter about `cutout` one after another and certify the result.
    pub fn run_election(&self, cutout: &Cutout) -> ElectionReport {
        tracing::info!(
            "🗳️  Beginning election for {} with {} voters",
            cutout.file_name,
            self.total_voters()
        );

        let outcomes = self
            .registry
            .iter()
            .map(|(id, voter)| cast_vote(id, voter.as_ref(), cutout, self.settings.slow_voter_warning))
            .collect();

        self.certify_outcomes(&cutout.file_name, outcomes)
    }

    /// Same as [`Ensemble::run_election`], with voters predicting in parallel
    /// on the blocking thread pool, at most `workers` at a time.
    pub async fn run_election_concurrent(&self, cutout: Arc<Cutout>) -> ElectionReport {
        let workers = self.settings.workers.max(1);
        tracing::info!(
            "🗳️  Beginning election for {} with {} voters ({} workers)",
            cutout.file_name,
            self.total_voters(),
            workers
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let slow = self.settings.slow_voter_warning;
        let mut tasks = JoinSet::new();

        for (id, voter) in self.registry.iter() {
            let id = id.to_string();
            let voter = Arc::clone(voter);
            let cutout = Arc::clone(&cutout);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return Err(VoterFailure {
                            voter_id: id,
                            reason: format!("worker pool closed: {}", e),
                        })
                    }
                };
                let task_id = id.clone();
                match tokio::task::spawn_blocking(move || {
                    cast_vote(&task_id, voter.as_ref(), &cutout, slow)
                })
                .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => Err(VoterFailure {
                        voter_id: id,
                        reason: format!("voter task aborted: {}", e),
                    }),
                }
            });
        }

        let mut outcomes = Vec::with_capacity(self.total_voters());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!("❌ Election task failed: {}", e),
            }
        }

        self.certify_outcomes(&cutout.file_name, outcomes)
    }

    /// Certify a ballot gathered elsewhere against this ensemble's registry size.
    pub fn certify(&self, ballot: &[VoteRecord]) -> Verdict {
        self.certifier.certify(ballot, self.total_voters())
    }

    fn certify_outcomes(
        &self,
        subject: &str,
        outcomes: Vec<std::result::Result<VoteRecord, VoterFailure>>,
    ) -> ElectionReport {
        let mut ballot = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(record) => ballot.push(record),
                Err(failure) => {
                    tracing::warn!(
                        "⚠️  Voter {} dropped from the ballot: {}",
                        failure.voter_id,
                        failure.reason
                    );
                    failures.push(failure);
                }
            }
        }
        ballot.sort_by(|a, b| a.voter_id.cmp(&b.voter_id));
        failures.sort_by(|a, b| a.voter_id.cmp(&b.voter_id));

        tracing::info!(
            "🏛️  Certifying {} of {} votes for {}",
            ballot.len(),
            self.total_voters(),
            subject
        );
        let verdict = self.certify(&ballot);
        tracing::info!(
            "✅ {}: {} (class {}, {}/{} voters, confidence {:.3})",
            subject,
            verdict.status.as_str(),
            verdict.voted_class_code(),
            verdict.num_voters,
            verdict.total_voters,
            verdict.average_confidence
        );

        ElectionReport {
            subject: subject.to_string(),
            verdict,
            ballot,
            failures,
        }
    }
}

/// Ask one voter for its prediction, turning errors, panics and invalid
/// output into a [`VoterFailure`].
fn cast_vote(
    voter_id: &str,
    voter: &dyn Voter,
    cutout: &Cutout,
    slow_warning: Duration,
) -> std::result::Result<VoteRecord, VoterFailure> {
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| voter.predict(cutout))).unwrap_or_else(
        |payload| Err(anyhow::anyhow!("voter panicked: {}", panic_message(payload.as_ref()))),
    );
    let elapsed = started.elapsed();

    if elapsed > slow_warning {
        tracing::warn!(
            "🐢 Voter {} took {} on {}",
            voter_id,
            humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64)),
            cutout.file_name
        );
    } else {
        tracing::debug!("Voter {} answered in {:?}", voter_id, elapsed);
    }

    let prediction = result.map_err(|e| VoterFailure {
        voter_id: voter_id.to_string(),
        reason: format!("{:#}", e),
    })?;

    prediction.validate().map_err(|reason| VoterFailure {
        voter_id: voter_id.to_string(),
        reason: format!("invalid prediction: {}", reason),
    })?;

    Ok(VoteRecord::new(voter_id, prediction))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Prediction, VerdictStatus, NO_CONSENSUS};
    use anyhow::anyhow;

    fn voter(class: u32, confidence: f64) -> Arc<dyn Voter> {
        Arc::new(move |_: &Cutout| -> anyhow::Result<Prediction> {
            Ok(Prediction::top2(class, confidence, (class + 1) % 6, (1.0 - confidence) / 2.0))
        })
    }

    fn broken(reason: &'static str) -> Arc<dyn Voter> {
        Arc::new(move |_: &Cutout| -> anyhow::Result<Prediction> { Err(anyhow!(reason)) })
    }

    fn panicking() -> Arc<dyn Voter> {
        Arc::new(|_: &Cutout| -> anyhow::Result<Prediction> { panic!("tensor shape mismatch") })
    }

    fn ensemble(voters: Vec<(&str, Arc<dyn Voter>)>) -> Ensemble {
        let registry =
            VoterRegistry::from_voters(voters.into_iter().map(|(id, v)| (id.to_string(), v))).unwrap();
        Ensemble::new(registry, Certifier::default(), ElectionSettings::default()).unwrap()
    }

    #[test]
    fn test_election_clear_majority() {
        let ensemble = ensemble(vec![
            ("m0", voter(2, 0.9)),
            ("m1", voter(2, 0.8)),
            ("m2", voter(2, 0.7)),
            ("m3", voter(0, 0.6)),
            ("m4", voter(1, 0.5)),
        ]);

        let report = ensemble.run_election(&Cutout::named("J0001+0002.fits"));
        assert_eq!(report.subject, "J0001+0002.fits");
        assert_eq!(report.verdict.voted_class, Some(2));
        assert_eq!(report.verdict.num_voters, 3);
        assert_eq!(report.verdict.total_voters, 5);
        assert!((report.verdict.average_confidence - 0.8).abs() < 1e-9);
        assert_eq!(report.ballot.len(), 5);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_failed_voters_are_dropped_but_counted() {
        let ensemble = ensemble(vec![
            ("m0", voter(3, 0.9)),
            ("m1", voter(3, 0.8)),
            ("m2", broken("cuda out of memory")),
            ("m3", voter(3, 0.7)),
        ]);

        let report = ensemble.run_election(&Cutout::named("x.fits"));
        assert_eq!(report.ballot.len(), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].voter_id, "m2");
        assert!(report.failures[0].reason.contains("cuda out of memory"));
        assert_eq!(report.verdict.voted_class, Some(3));
        assert_eq!(report.verdict.num_voters, 3);
        assert_eq!(report.verdict.total_voters, 4);
    }

    #[test]
    fn test_invalid_prediction_is_a_voter_failure() {
        let bad: Arc<dyn Voter> = Arc::new(|_: &Cutout| -> anyhow::Result<Prediction> {
            Ok(Prediction::top2(1, 0.2, 4, 0.7))
        });
        let ensemble = ensemble(vec![("good", voter(1, 0.9)), ("bad", bad)]);

        let report = ensemble.run_election(&Cutout::named("x.fits"));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].voter_id, "bad");
        assert!(report.failures[0].reason.starts_with("invalid prediction"));
        assert_eq!(report.verdict.voted_class, Some(1));
    }

    #[test]
    fn test_panicking_voter_is_dropped_from_sequential_election() {
        let ensemble = ensemble(vec![
            ("a", voter(1, 0.9)),
            ("b", panicking()),
            ("c", voter(1, 0.8)),
        ]);

        let report = ensemble.run_election(&Cutout::named("x.fits"));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].voter_id, "b");
        assert!(report.failures[0].reason.contains("tensor shape mismatch"));
        assert_eq!(report.verdict.voted_class, Some(1));
        assert_eq!(report.verdict.num_voters, 2);
        assert_eq!(report.verdict.total_voters, 3);
    }

    #[tokio::test]
    async fn test_panicking_voter_fails_the_same_way_in_both_runners() {
        let ensemble = ensemble(vec![
            ("a", voter(1, 0.9)),
            ("b", panicking()),
            ("c", voter(1, 0.8)),
        ]);

        let cutout = Arc::new(Cutout::named("x.fits"));
        let sequential = ensemble.run_election(&cutout);
        let concurrent = ensemble.run_election_concurrent(Arc::clone(&cutout)).await;

        assert_eq!(concurrent.failures, sequential.failures);
        assert_eq!(concurrent.verdict, sequential.verdict);
    }

    #[test]
    fn test_all_voters_failing_gives_no_votes() {
        let ensemble = ensemble(vec![("m0", broken("boom")), ("m1", broken("bang"))]);
        let report = ensemble.run_election(&Cutout::named("x.fits"));
        assert_eq!(report.verdict.status, VerdictStatus::NoVotes);
        assert_eq!(report.verdict.voted_class_code(), NO_CONSENSUS);
        assert_eq!(report.verdict.total_voters, 2);
        assert_eq!(report.failures.len(), 2);
    }

    #[test]
    fn test_ensemble_requires_voters() {
        let err = Ensemble::new(
            VoterRegistry::new(),
            Certifier::default(),
            ElectionSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CongressError::Configuration(_)));
    }

    #[test]
    fn test_voter_failure_converts_to_error() {
        let err: CongressError = VoterFailure {
            voter_id: "m9".to_string(),
            reason: "timeout".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "voter m9 failed: timeout");
    }

    #[tokio::test]
    async fn test_concurrent_election_matches_sequential() {
        let ensemble = ensemble(vec![
            ("m0", voter(4, 0.91)),
            ("m1", voter(4, 0.82)),
            ("m2", voter(1, 0.77)),
            ("m3", broken("weights missing")),
            ("m4", voter(4, 0.66)),
            ("m5", voter(4, 0.59)),
            ("m6", voter(0, 0.51)),
        ]);

        let cutout = Arc::new(Cutout::named("J1200-0100.fits"));
        let sequential = ensemble.run_election(&cutout);
        let concurrent = ensemble.run_election_concurrent(Arc::clone(&cutout)).await;

        assert_eq!(concurrent.verdict, sequential.verdict);
        assert_eq!(concurrent.ballot, sequential.ballot);
        assert_eq!(concurrent.failures, sequential.failures);
        assert_eq!(concurrent.verdict.voted_class, Some(4));
        assert_eq!(concurrent.verdict.total_voters, 7);
    }

    #[tokio::test]
    async fn test_concurrent_election_with_single_worker() {
        let registry = VoterRegistry::from_voters(vec![
            ("a".to_string(), voter(2, 0.8)),
            ("b".to_string(), voter(2, 0.6)),
        ])
        .unwrap();
        let settings = ElectionSettings {
            workers: 1,
            ..ElectionSettings::default()
        };
        let ensemble = Ensemble::new(registry, Certifier::default(), settings).unwrap();

        let report = ensemble
            .run_election_concurrent(Arc::new(Cutout::named("x.fits")))
            .await;
        assert_eq!(report.verdict.voted_class, Some(2));
        assert_eq!(report.verdict.num_voters, 2);
    }
}
