//! Bounded concurrent classification of a whole transcript.
//!
//! At most `concurrency_limit` backend calls are in flight at once. Every
//! call gets its own timeout; a failed or timed-out call yields a placeholder
//! for that utterance only. Results land in a slot per input position, so the
//! output order never depends on completion order.
//!
//! Failures are counted by the collecting loop in completion order. After
//! `max_consecutive_failures` in a row the backend is considered unavailable
//! and every utterance not yet dispatched is classified by the rule-based
//! reference backend instead.

use std::{sync::Arc, time::Duration};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    classifier::{Classifier, RuleBasedClassifier},
    error::{CbilError, Result},
    types::{Classification, FALLBACK_RATIONALE_PREFIX, Utterance},
};

pub const DEFAULT_CONCURRENCY_LIMIT: usize = 5;
pub const DEFAULT_PER_CALL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    pub concurrency_limit: usize,
    pub per_call_timeout: Duration,
    /// Zero disables the fallback.
    pub max_consecutive_failures: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            per_call_timeout: DEFAULT_PER_CALL_TIMEOUT,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub backend: String,
    /// Calls sent to the primary backend.
    pub dispatched: usize,
    /// Calls that ended in a placeholder.
    pub failed: usize,
    /// Number of utterances dispatched to the primary backend before the
    /// fallback engaged.
    pub fallback_after: Option<usize>,
    pub fallback_classified: usize,
}

#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub classifications: Vec<Classification>,
    pub stats: BatchStats,
}

pub struct BatchClassifier {
    primary: Arc<dyn Classifier>,
    fallback: Arc<RuleBasedClassifier>,
    settings: BatchSettings,
}

impl BatchClassifier {
    pub fn new(
        primary: Arc<dyn Classifier>,
        fallback: Arc<RuleBasedClassifier>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            primary,
            fallback,
            settings,
        }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// One classification per utterance, in input order.
    pub async fn classify_all(&self, utterances: &[Utterance]) -> Vec<Classification> {
        self.run(utterances).await.classifications
    }

    pub async fn run(&self, utterances: &[Utterance]) -> BatchOutput {
        let limit = self.settings.concurrency_limit.max(1);
        let timeout = self.settings.per_call_timeout;
        let backend = self.primary.as_ref();

        let mut stats = BatchStats {
            backend: backend.name().to_string(),
            ..BatchStats::default()
        };
        let mut slots: Vec<Option<Classification>> = vec![None; utterances.len()];
        let mut pending = utterances.iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut consecutive_failures = 0usize;
        let mut fallback_engaged = false;

        loop {
            while in_flight.len() < limit {
                let Some((position, utterance)) = pending.next() else {
                    break;
                };

                if fallback_engaged {
                    slots[position] = Some(self.fallback_classification(utterance));
                    stats.fallback_classified += 1;
                    continue;
                }

                stats.dispatched += 1;
                in_flight.push(async move {
                    let outcome = match tokio::time::timeout(timeout, backend.classify(utterance))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(CbilError::ClassificationTimeout {
                            utterance_index: utterance.index,
                            timeout_ms: timeout.as_millis(),
                        }),
                    };
                    (position, utterance, outcome)
                });
            }

            let Some((position, utterance, outcome)) = in_flight.next().await else {
                break;
            };

            let outcome = outcome.and_then(|c| checked_confidence(c, backend.name()));
            let classification = match outcome {
                Ok(mut classification) => {
                    consecutive_failures = 0;
                    classification.utterance_index = utterance.index;
                    classification
                }
                Err(err) => {
                    warn!(
                        utterance_index = utterance.index,
                        backend = backend.name(),
                        error = %err,
                        "Classification failed, substituting placeholder"
                    );
                    stats.failed += 1;
                    consecutive_failures += 1;

                    let threshold = self.settings.max_consecutive_failures;
                    if !fallback_engaged && threshold > 0 && consecutive_failures >= threshold {
                        fallback_engaged = true;
                        stats.fallback_after = Some(stats.dispatched);
                        let unavailable = CbilError::BackendUnavailable {
                            backend: backend.name(),
                            reason: format!("{consecutive_failures} consecutive failures"),
                        };
                        warn!(
                            error = %unavailable,
                            remaining = utterances.len() - stats.dispatched,
                            "Falling back to rule-based classifier"
                        );
                    }

                    Classification::placeholder(utterance.index)
                }
            };
            slots[position] = Some(classification);
        }

        debug!(
            backend = backend.name(),
            utterances = utterances.len(),
            failed = stats.failed,
            fallback_classified = stats.fallback_classified,
            "Batch classified"
        );

        let classifications = slots
            .into_iter()
            .zip(utterances)
            .map(|(slot, utterance)| {
                slot.unwrap_or_else(|| Classification::placeholder(utterance.index))
            })
            .collect();

        BatchOutput {
            classifications,
            stats,
        }
    }

    fn fallback_classification(&self, utterance: &Utterance) -> Classification {
        let mut classification = self.fallback.classify_utterance(utterance);
        let detail = classification.rationale.take().unwrap_or_default();
        classification.rationale = Some(format!("{FALLBACK_RATIONALE_PREFIX} {detail}"));
        classification
    }
}

/// Finite confidences are clamped into [0, 1]; anything else is a backend
/// fault.
fn checked_confidence(
    mut classification: Classification,
    backend: &'static str,
) -> Result<Classification> {
    if !classification.confidence.is_finite() {
        return Err(CbilError::Backend {
            backend,
            reason: format!("non-finite confidence {}", classification.confidence),
        });
    }
    classification.confidence = classification.confidence.clamp(0.0, 1.0);
    Ok(classification)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::types::CbilLevel;

    /// Sleeps a per-utterance delay, then answers with the level derived from
    /// the index. Tracks the peak number of concurrent calls.
    struct DelayedClassifier {
        delays_ms: Vec<u64>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl DelayedClassifier {
        fn new(delays_ms: Vec<u64>) -> Self {
            Self {
                delays_ms,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Classifier for DelayedClassifier {
        fn name(&self) -> &'static str {
            "delayed"
        }

        async fn classify(&self, utterance: &Utterance) -> Result<Classification> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delays_ms[utterance.index])).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            Ok(Classification {
                utterance_index: utterance.index,
                level: CbilLevel::from_number((utterance.index % 7) as u8 + 1).unwrap(),
                confidence: 0.9,
                rationale: None,
            })
        }
    }

    /// Never answers for the listed indices.
    struct StallingClassifier {
        stall: Vec<usize>,
    }

    #[async_trait]
    impl Classifier for StallingClassifier {
        fn name(&self) -> &'static str {
            "stalling"
        }

        async fn classify(&self, utterance: &Utterance) -> Result<Classification> {
            if self.stall.contains(&utterance.index) {
                std::future::pending::<()>().await;
            }
            Ok(Classification {
                utterance_index: utterance.index,
                level: CbilLevel::AnalyticalThinking,
                confidence: 0.8,
                rationale: None,
            })
        }
    }

    /// Fails every call.
    struct DownClassifier;

    #[async_trait]
    impl Classifier for DownClassifier {
        fn name(&self) -> &'static str {
            "down"
        }

        async fn classify(&self, _utterance: &Utterance) -> Result<Classification> {
            Err(CbilError::BackendUnavailable {
                backend: "down",
                reason: "connection refused".to_string(),
            })
        }
    }

    /// Reports whatever confidence it was built with.
    struct MiscalibratedClassifier {
        confidences: Vec<f64>,
    }

    #[async_trait]
    impl Classifier for MiscalibratedClassifier {
        fn name(&self) -> &'static str {
            "miscalibrated"
        }

        async fn classify(&self, utterance: &Utterance) -> Result<Classification> {
            Ok(Classification {
                utterance_index: utterance.index,
                level: CbilLevel::Synthesis,
                confidence: self.confidences[utterance.index],
                rationale: None,
            })
        }
    }

    fn utterances(n: usize) -> Vec<Utterance> {
        (0..n)
            .map(|i| Utterance::new(i, format!("Why does example {i} work?")))
            .collect()
    }

    fn batch(primary: Arc<dyn Classifier>, settings: BatchSettings) -> BatchClassifier {
        BatchClassifier::new(
            primary,
            Arc::new(RuleBasedClassifier::with_default_lexicon()),
            settings,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn restores_input_order_regardless_of_completion_order() {
        let delays = vec![90, 10, 50, 5, 70, 20, 1, 40];
        let primary = Arc::new(DelayedClassifier::new(delays));
        let out = batch(primary, BatchSettings::default())
            .run(&utterances(8))
            .await;

        let indices: Vec<usize> = out
            .classifications
            .iter()
            .map(|c| c.utterance_index)
            .collect();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());
        for c in &out.classifications {
            assert_eq!(c.level.number() as usize, c.utterance_index % 7 + 1);
        }
        assert_eq!(out.stats.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn respects_concurrency_limit() {
        let primary = Arc::new(DelayedClassifier::new(vec![10; 12]));
        let settings = BatchSettings {
            concurrency_limit: 3,
            ..BatchSettings::default()
        };
        let out = batch(primary.clone(), settings).run(&utterances(12)).await;

        assert_eq!(out.classifications.len(), 12);
        assert_eq!(primary.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn one_timeout_among_ten_only_affects_its_slot() {
        let primary = Arc::new(StallingClassifier { stall: vec![6] });
        let out = batch(primary, BatchSettings::default())
            .run(&utterances(10))
            .await;

        assert_eq!(out.classifications.len(), 10);
        for (i, c) in out.classifications.iter().enumerate() {
            assert_eq!(c.utterance_index, i);
            if i == 6 {
                assert_eq!(c.level, CbilLevel::ConceptExplanation);
                assert_eq!(c.confidence, 0.0);
                assert!(c.is_placeholder());
            } else {
                assert_eq!(c.level, CbilLevel::AnalyticalThinking);
                assert_eq!(c.confidence, 0.8);
            }
        }
        assert_eq!(out.stats.failed, 1);
        assert_eq!(out.stats.fallback_after, None);
    }

    #[tokio::test]
    async fn consecutive_failures_switch_to_rule_based_fallback() {
        let settings = BatchSettings {
            concurrency_limit: 1,
            max_consecutive_failures: 3,
            ..BatchSettings::default()
        };
        let out = batch(Arc::new(DownClassifier), settings)
            .run(&utterances(8))
            .await;

        assert_eq!(out.classifications.len(), 8);
        assert_eq!(out.stats.dispatched, 3);
        assert_eq!(out.stats.failed, 3);
        assert_eq!(out.stats.fallback_after, Some(3));
        assert_eq!(out.stats.fallback_classified, 5);

        for c in &out.classifications[..3] {
            assert!(c.is_placeholder());
        }
        for c in &out.classifications[3..] {
            assert!(c.is_fallback());
            assert_eq!(c.level, CbilLevel::AnalyticalThinking);
            assert!(c.confidence > 0.0);
        }
    }

    #[tokio::test]
    async fn zero_threshold_never_falls_back() {
        let settings = BatchSettings {
            max_consecutive_failures: 0,
            ..BatchSettings::default()
        };
        let out = batch(Arc::new(DownClassifier), settings)
            .run(&utterances(6))
            .await;

        assert!(out.classifications.iter().all(Classification::is_placeholder));
        assert_eq!(out.stats.fallback_after, None);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let out = batch(
            Arc::new(RuleBasedClassifier::with_default_lexicon()),
            BatchSettings::default(),
        )
        .run(&[])
        .await;
        assert!(out.classifications.is_empty());
        assert_eq!(out.stats.dispatched, 0);
    }

    #[tokio::test]
    async fn confidences_are_kept_within_bounds() {
        let primary = Arc::new(MiscalibratedClassifier {
            confidences: vec![1.5, -0.2, f64::NAN, f64::INFINITY, 0.6],
        });
        let out = batch(primary, BatchSettings::default())
            .run(&utterances(5))
            .await;

        let confidences: Vec<f64> = out.classifications.iter().map(|c| c.confidence).collect();
        assert_eq!(confidences, vec![1.0, 0.0, 0.0, 0.0, 0.6]);
        assert!(out.classifications[2].is_placeholder());
        assert!(out.classifications[3].is_placeholder());
        assert_eq!(out.classifications[4].level, CbilLevel::Synthesis);
        assert_eq!(out.stats.failed, 2);
    }
}
