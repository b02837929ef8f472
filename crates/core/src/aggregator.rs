//! Lesson-level aggregation of utterance classifications.
//!
//! Pure and deterministic: the same classification sequence always produces
//! the same report, byte for byte once serialized.

use std::collections::BTreeMap;

use crate::types::{AnalysisReport, CbilLevel, Classification};

/// Tally classifications into an [`AnalysisReport`].
///
/// Empty input is not an error: the report carries zero counts, zero
/// percentages, a mean of 0 and zero ratios.
pub fn aggregate(classifications: &[Classification], analysis_id: &str) -> AnalysisReport {
    let mut counts = [0usize; 7];
    for classification in classifications {
        counts[classification.level.slot()] += 1;
    }
    let utterance_count = classifications.len();

    let level_counts: BTreeMap<CbilLevel, usize> = CbilLevel::ALL
        .iter()
        .map(|level| (*level, counts[level.slot()]))
        .collect();

    // Ties resolve to the lowest level: only a strictly larger count
    // replaces the current choice.
    let mut dominant_level = CbilLevel::SimpleConfirmation;
    for level in CbilLevel::ALL {
        if counts[level.slot()] > counts[dominant_level.slot()] {
            dominant_level = level;
        }
    }

    let (mean_level, low_cognitive_ratio, high_cognitive_ratio) = if utterance_count == 0 {
        (0.0, 0.0, 0.0)
    } else {
        let total = utterance_count as f64;
        let level_sum: usize = CbilLevel::ALL
            .iter()
            .map(|level| usize::from(level.number()) * counts[level.slot()])
            .sum();
        let low: usize = CbilLevel::ALL
            .iter()
            .filter(|level| level.is_low_cognitive())
            .map(|level| counts[level.slot()])
            .sum();
        let high: usize = CbilLevel::ALL
            .iter()
            .filter(|level| level.is_high_cognitive())
            .map(|level| counts[level.slot()])
            .sum();
        (
            level_sum as f64 / total,
            low as f64 / total,
            high as f64 / total,
        )
    };

    AnalysisReport {
        analysis_id: analysis_id.to_string(),
        utterance_count,
        level_counts,
        level_percentages: level_percentages(&counts, utterance_count, dominant_level),
        mean_level,
        dominant_level,
        low_cognitive_ratio,
        high_cognitive_ratio,
    }
}

/// Percentages rounded to 2 decimals. The rounding residue is absorbed by the
/// largest bucket so the values sum to exactly 100.
fn level_percentages(
    counts: &[usize; 7],
    utterance_count: usize,
    largest: CbilLevel,
) -> BTreeMap<CbilLevel, f64> {
    if utterance_count == 0 {
        return CbilLevel::ALL.iter().map(|level| (*level, 0.0)).collect();
    }

    let total = utterance_count as f64;
    let mut percentages: BTreeMap<CbilLevel, f64> = CbilLevel::ALL
        .iter()
        .map(|level| (*level, round2(counts[level.slot()] as f64 / total * 100.0)))
        .collect();

    let others: f64 = percentages
        .iter()
        .filter(|(level, _)| **level != largest)
        .map(|(_, p)| *p)
        .sum();
    percentages.insert(largest, round2(100.0 - others));

    percentages
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classified(levels: &[u8]) -> Vec<Classification> {
        levels
            .iter()
            .enumerate()
            .map(|(i, n)| Classification {
                utterance_index: i,
                level: CbilLevel::from_number(*n).unwrap(),
                confidence: 0.5,
                rationale: None,
            })
            .collect()
    }

    fn percentage_sum(report: &AnalysisReport) -> f64 {
        report.level_percentages.values().sum()
    }

    #[test]
    fn empty_input_degrades_gracefully() {
        let report = aggregate(&[], "lesson-0");
        assert_eq!(report.analysis_id, "lesson-0");
        assert_eq!(report.utterance_count, 0);
        assert_eq!(report.mean_level, 0.0);
        assert_eq!(report.low_cognitive_ratio, 0.0);
        assert_eq!(report.high_cognitive_ratio, 0.0);
        assert_eq!(report.level_counts.len(), 7);
        assert!(report.level_counts.values().all(|c| *c == 0));
        assert!(report.level_percentages.values().all(|p| *p == 0.0));
        assert_eq!(report.dominant_level, CbilLevel::SimpleConfirmation);
    }

    #[test]
    fn counts_are_zero_filled_and_sum_to_total() {
        let report = aggregate(&classified(&[1, 1, 4, 7]), "a");
        assert_eq!(report.level_counts.len(), 7);
        assert_eq!(report.level_counts[&CbilLevel::FactRecall], 0);
        assert_eq!(report.level_counts[&CbilLevel::SimpleConfirmation], 2);
        assert_eq!(
            report.level_counts.values().sum::<usize>(),
            report.utterance_count
        );
    }

    #[test]
    fn summary_statistics() {
        let report = aggregate(&classified(&[1, 2, 3, 5, 6, 7]), "a");
        assert!((report.mean_level - 4.0).abs() < 1e-9);
        assert!((report.low_cognitive_ratio - 2.0 / 6.0).abs() < 1e-9);
        assert!((report.high_cognitive_ratio - 3.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn percentages_sum_to_exactly_one_hundred() {
        // thirds do not round cleanly
        let report = aggregate(&classified(&[1, 3, 5]), "a");
        assert!((percentage_sum(&report) - 100.0).abs() < 0.01);
        assert_eq!(report.level_percentages[&CbilLevel::SimpleConfirmation], 33.34);
        assert_eq!(report.level_percentages[&CbilLevel::ConceptExplanation], 33.33);

        let report = aggregate(&classified(&[1, 2, 2, 3, 4, 4, 4, 5, 6, 7, 7]), "b");
        assert!((percentage_sum(&report) - 100.0).abs() < 0.01);
        assert!(report.level_percentages.values().all(|p| (0.0..=100.0).contains(p)));
    }

    #[test]
    fn dominant_level_ties_go_to_the_lowest_level() {
        let report = aggregate(&classified(&[6, 6, 2, 2, 7]), "a");
        assert_eq!(report.dominant_level, CbilLevel::FactRecall);

        let report = aggregate(&classified(&[4, 4, 4, 1]), "a");
        assert_eq!(report.dominant_level, CbilLevel::AnalyticalThinking);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let input = classified(&[3, 1, 4, 1, 5, 2, 6, 5, 3, 5]);
        let first = serde_json::to_string(&aggregate(&input, "lesson")).unwrap();
        let second = serde_json::to_string(&aggregate(&input, "lesson")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn report_json_uses_renderer_field_names() {
        let report = aggregate(&classified(&[2, 2]), "lesson-7");
        let value = serde_json::to_value(&report).unwrap();
        for key in [
            "analysis_id",
            "utterance_count",
            "level_counts",
            "level_percentages",
            "mean_level",
            "dominant_level",
            "low_cognitive_ratio",
            "high_cognitive_ratio",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        for n in 1..=7 {
            assert!(value["level_counts"].get(n.to_string()).is_some());
        }
        assert_eq!(value["dominant_level"], 2);
        assert_eq!(value["level_percentages"]["2"], 100.0);
    }
}
