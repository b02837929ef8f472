//! Confidence-weighted summary and improvement signals for a lesson.
//!
//! Kept apart from [`AnalysisReport`] so the renderer-facing report keeps its
//! exact shape.

use serde::{Deserialize, Serialize};

use crate::types::{AnalysisReport, CbilLevel, Classification};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightThresholds {
    /// Share of level 1-2 utterances at or above which the lesson is flagged.
    pub low_level_dominance: f64,
    /// Share of level 5-7 utterances below which the lesson is flagged.
    pub high_level_scarcity: f64,
    pub low_confidence: f64,
}

impl Default for InsightThresholds {
    fn default() -> Self {
        Self {
            low_level_dominance: 0.5,
            high_level_scarcity: 0.1,
            low_confidence: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImprovementSignal {
    LowLevelDominance { ratio: f64, threshold: f64 },
    HighLevelScarcity { ratio: f64, threshold: f64 },
    MissingLevels { levels: Vec<CbilLevel> },
    LowConfidence { mean_confidence: f64, threshold: f64 },
    DegradedClassification { count: usize },
}

impl ImprovementSignal {
    pub fn describe(&self) -> String {
        match self {
            ImprovementSignal::LowLevelDominance { ratio, .. } => format!(
                "{:.0}% of utterances are simple confirmation or fact recall",
                ratio * 100.0
            ),
            ImprovementSignal::HighLevelScarcity { ratio, .. } => format!(
                "only {:.0}% of utterances reach synthesis or above",
                ratio * 100.0
            ),
            ImprovementSignal::MissingLevels { levels } => format!(
                "never reached: {}",
                levels
                    .iter()
                    .map(|l| l.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            ImprovementSignal::LowConfidence {
                mean_confidence, ..
            } => format!("mean classification confidence is {mean_confidence:.2}"),
            ImprovementSignal::DegradedClassification { count } => {
                format!("{count} utterances were classified in degraded mode")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonInsights {
    pub mean_confidence: f64,
    /// Mean level with each utterance weighted by its confidence.
    pub confidence_weighted_mean_level: f64,
    /// Placeholders plus fallback classifications.
    pub degraded_count: usize,
    pub signals: Vec<ImprovementSignal>,
}

pub fn summarize(
    classifications: &[Classification],
    report: &AnalysisReport,
    thresholds: &InsightThresholds,
) -> LessonInsights {
    let count = classifications.len();
    let confidence_sum: f64 = classifications.iter().map(|c| c.confidence).sum();
    let weighted_level_sum: f64 = classifications
        .iter()
        .map(|c| f64::from(c.level.number()) * c.confidence)
        .sum();

    let mean_confidence = if count == 0 {
        0.0
    } else {
        confidence_sum / count as f64
    };
    let confidence_weighted_mean_level = if confidence_sum > 0.0 {
        weighted_level_sum / confidence_sum
    } else {
        0.0
    };
    let degraded_count = classifications
        .iter()
        .filter(|c| c.is_placeholder() || c.is_fallback())
        .count();

    let mut signals = Vec::new();
    if count > 0 {
        if report.low_cognitive_ratio >= thresholds.low_level_dominance {
            signals.push(ImprovementSignal::LowLevelDominance {
                ratio: report.low_cognitive_ratio,
                threshold: thresholds.low_level_dominance,
            });
        }
        if report.high_cognitive_ratio < thresholds.high_level_scarcity {
            signals.push(ImprovementSignal::HighLevelScarcity {
                ratio: report.high_cognitive_ratio,
                threshold: thresholds.high_level_scarcity,
            });
        }
        let missing: Vec<CbilLevel> = CbilLevel::ALL
            .into_iter()
            .filter(|level| *level >= CbilLevel::AnalyticalThinking)
            .filter(|level| report.level_counts.get(level).copied().unwrap_or(0) == 0)
            .collect();
        if !missing.is_empty() {
            signals.push(ImprovementSignal::MissingLevels { levels: missing });
        }
        if mean_confidence < thresholds.low_confidence {
            signals.push(ImprovementSignal::LowConfidence {
                mean_confidence,
                threshold: thresholds.low_confidence,
            });
        }
    }
    if degraded_count > 0 {
        signals.push(ImprovementSignal::DegradedClassification {
            count: degraded_count,
        });
    }

    LessonInsights {
        mean_confidence,
        confidence_weighted_mean_level,
        degraded_count,
        signals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate;

    fn classified(entries: &[(u8, f64)]) -> Vec<Classification> {
        entries
            .iter()
            .enumerate()
            .map(|(i, (n, confidence))| Classification {
                utterance_index: i,
                level: CbilLevel::from_number(*n).unwrap(),
                confidence: *confidence,
                rationale: None,
            })
            .collect()
    }

    #[test]
    fn empty_lesson_has_no_signals() {
        let report = aggregate(&[], "a");
        let insights = summarize(&[], &report, &InsightThresholds::default());
        assert_eq!(insights.mean_confidence, 0.0);
        assert_eq!(insights.confidence_weighted_mean_level, 0.0);
        assert!(insights.signals.is_empty());
    }

    #[test]
    fn low_level_lesson_is_flagged() {
        let input = classified(&[(1, 0.9), (1, 0.9), (2, 0.8), (3, 0.7)]);
        let report = aggregate(&input, "a");
        let insights = summarize(&input, &report, &InsightThresholds::default());

        assert!(insights.signals.contains(&ImprovementSignal::LowLevelDominance {
            ratio: 0.75,
            threshold: 0.5
        }));
        assert!(insights.signals.contains(&ImprovementSignal::HighLevelScarcity {
            ratio: 0.0,
            threshold: 0.1
        }));
        assert!(insights.signals.contains(&ImprovementSignal::MissingLevels {
            levels: vec![
                CbilLevel::AnalyticalThinking,
                CbilLevel::Synthesis,
                CbilLevel::EvaluativeJudgment,
                CbilLevel::CreativeApplication,
            ]
        }));
    }

    #[test]
    fn confidence_weighting() {
        let input = classified(&[(2, 1.0), (6, 0.0), (4, 0.5)]);
        let report = aggregate(&input, "a");
        let insights = summarize(&input, &report, &InsightThresholds::default());
        assert!((insights.mean_confidence - 0.5).abs() < 1e-9);
        // (2*1.0 + 4*0.5) / 1.5
        assert!((insights.confidence_weighted_mean_level - 4.0 / 1.5).abs() < 1e-9);
    }

    #[test]
    fn placeholders_are_reported_as_degraded() {
        let mut input = classified(&[(4, 0.9), (5, 0.9), (6, 0.9), (7, 0.9)]);
        input.push(Classification::placeholder(4));
        let report = aggregate(&input, "a");
        let insights = summarize(&input, &report, &InsightThresholds::default());

        assert_eq!(insights.degraded_count, 1);
        assert_eq!(
            insights.signals,
            vec![ImprovementSignal::DegradedClassification { count: 1 }]
        );
    }

    #[test]
    fn signals_serialize_with_kind_tag() {
        let json = serde_json::to_value(ImprovementSignal::DegradedClassification { count: 2 })
            .unwrap();
        assert_eq!(json["kind"], "degraded_classification");
        assert_eq!(json["count"], 2);
    }
}
