use crate::{
    insights::LessonInsights,
    types::{AnalysisReport, CbilLevel, Classification, Utterance},
};

const BAR_WIDTH: usize = 30;

/// Format seconds as MM:SS timestamp
pub fn format_timestamp(seconds: f64) -> String {
    let mins = (seconds / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    format!("{:02}:{:02}", mins, secs)
}

/// One line per utterance: `[MM:SS] L4 speaker: text`.
pub fn format_classified_utterances(
    utterances: &[Utterance],
    classifications: &[Classification],
) -> String {
    utterances
        .iter()
        .zip(classifications)
        .map(|(utterance, classification)| {
            let mut line = String::new();
            if let Some(start) = utterance.start_time {
                line.push_str(&format!("[{}] ", format_timestamp(start)));
            }
            line.push_str(&format!("L{}", classification.level.number()));
            if classification.is_placeholder() {
                line.push('?');
            } else if classification.is_fallback() {
                line.push('*');
            }
            line.push(' ');
            if let Some(speaker) = &utterance.speaker {
                line.push_str(&format!("{speaker}: "));
            }
            line.push_str(utterance.text.trim());
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_report_readable(report: &AnalysisReport, insights: &LessonInsights) -> String {
    let mut output = String::new();
    output.push_str(&format!("# CBIL analysis {}\n\n", report.analysis_id));
    output.push_str(&format!(
        "**Utterances:** {} | **Mean level:** {:.2} | **Dominant:** {}\n\n",
        report.utterance_count, report.mean_level, report.dominant_level
    ));

    output.push_str("## Level distribution\n\n");
    for level in CbilLevel::ALL {
        let count = report.level_counts.get(&level).copied().unwrap_or(0);
        let percentage = report.level_percentages.get(&level).copied().unwrap_or(0.0);
        let filled = ((percentage / 100.0) * BAR_WIDTH as f64).round() as usize;
        output.push_str(&format!(
            "L{} {:<20} {:>6.2}% {:>4}  {}\n",
            level.number(),
            level.korean_label(),
            percentage,
            count,
            "█".repeat(filled.min(BAR_WIDTH))
        ));
    }
    output.push('\n');

    output.push_str(&format!(
        "**Low (L1-2):** {:.0}% | **High (L5-7):** {:.0}% | **Mean confidence:** {:.2}\n\n",
        report.low_cognitive_ratio * 100.0,
        report.high_cognitive_ratio * 100.0,
        insights.mean_confidence
    ));

    if !insights.signals.is_empty() {
        output.push_str("## Suggestions\n\n");
        for signal in &insights.signals {
            output.push_str(&format!("• {}\n", signal.describe()));
        }
        output.push('\n');
    }

    output
}
