use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::error::CbilError;

/// Rationale attached to placeholder classifications produced when a backend
/// call fails or times out.
pub const FAILED_RATIONALE: &str = "classification_failed";

/// Rationale prefix for utterances classified by the fallback backend.
pub const FALLBACK_RATIONALE_PREFIX: &str = "fallback_rule_based:";

/// Cognitive Behavioral Instruction Level. Declaration order is the ordinal
/// order: a higher level denotes greater cognitive demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CbilLevel {
    SimpleConfirmation = 1,
    FactRecall = 2,
    ConceptExplanation = 3,
    AnalyticalThinking = 4,
    Synthesis = 5,
    EvaluativeJudgment = 6,
    CreativeApplication = 7,
}

impl CbilLevel {
    pub const ALL: [CbilLevel; 7] = [
        CbilLevel::SimpleConfirmation,
        CbilLevel::FactRecall,
        CbilLevel::ConceptExplanation,
        CbilLevel::AnalyticalThinking,
        CbilLevel::Synthesis,
        CbilLevel::EvaluativeJudgment,
        CbilLevel::CreativeApplication,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.get(usize::from(n).checked_sub(1)?).copied()
    }

    /// Zero-based position, handy for fixed-size per-level arrays.
    pub fn slot(self) -> usize {
        usize::from(self.number()) - 1
    }

    pub fn name(self) -> &'static str {
        match self {
            CbilLevel::SimpleConfirmation => "simple confirmation",
            CbilLevel::FactRecall => "fact recall",
            CbilLevel::ConceptExplanation => "concept explanation",
            CbilLevel::AnalyticalThinking => "analytical thinking",
            CbilLevel::Synthesis => "synthesis",
            CbilLevel::EvaluativeJudgment => "evaluative judgment",
            CbilLevel::CreativeApplication => "creative application",
        }
    }

    pub fn korean_label(self) -> &'static str {
        match self {
            CbilLevel::SimpleConfirmation => "단순 확인",
            CbilLevel::FactRecall => "사실 회상",
            CbilLevel::ConceptExplanation => "개념 설명",
            CbilLevel::AnalyticalThinking => "분석적 사고",
            CbilLevel::Synthesis => "종합적 이해",
            CbilLevel::EvaluativeJudgment => "평가적 판단",
            CbilLevel::CreativeApplication => "창의적 적용",
        }
    }

    /// Levels 1-2.
    pub fn is_low_cognitive(self) -> bool {
        self <= CbilLevel::FactRecall
    }

    /// Levels 5-7.
    pub fn is_high_cognitive(self) -> bool {
        self >= CbilLevel::Synthesis
    }
}

impl TryFrom<u8> for CbilLevel {
    type Error = CbilError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Self::from_number(n)
            .ok_or_else(|| CbilError::invalid_input(format!("CBIL level must be 1..=7, got {n}")))
    }
}

impl From<CbilLevel> for u8 {
    fn from(level: CbilLevel) -> Self {
        level.number()
    }
}

impl fmt::Display for CbilLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{} {}", self.number(), self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub index: usize,
    pub text: String,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub speaker: Option<String>,
}

impl Utterance {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            start_time: None,
            end_time: None,
            speaker: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub utterance_index: usize,
    pub level: CbilLevel,
    pub confidence: f64,
    pub rationale: Option<String>,
}

impl Classification {
    /// Stand-in for an utterance whose backend call failed.
    pub fn placeholder(utterance_index: usize) -> Self {
        Self {
            utterance_index,
            level: CbilLevel::ConceptExplanation,
            confidence: 0.0,
            rationale: Some(FAILED_RATIONALE.to_string()),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.rationale.as_deref() == Some(FAILED_RATIONALE)
    }

    pub fn is_fallback(&self) -> bool {
        self.rationale
            .as_deref()
            .is_some_and(|r| r.starts_with(FALLBACK_RATIONALE_PREFIX))
    }
}

/// Lesson-level distribution handed to report renderers. Field names and
/// the zero-filled level maps are part of the renderer contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub analysis_id: String,
    pub utterance_count: usize,
    pub level_counts: BTreeMap<CbilLevel, usize>,
    pub level_percentages: BTreeMap<CbilLevel, f64>,
    pub mean_level: f64,
    pub dominant_level: CbilLevel,
    pub low_cognitive_ratio: f64,
    pub high_cognitive_ratio: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordinal() {
        assert!(CbilLevel::SimpleConfirmation < CbilLevel::CreativeApplication);
        assert_eq!(CbilLevel::ALL.len(), 7);
        for (i, level) in CbilLevel::ALL.iter().enumerate() {
            assert_eq!(level.slot(), i);
            assert_eq!(CbilLevel::from_number(level.number()), Some(*level));
        }
    }

    #[test]
    fn out_of_range_numbers_are_rejected() {
        assert_eq!(CbilLevel::from_number(0), None);
        assert_eq!(CbilLevel::from_number(8), None);
        assert!(CbilLevel::try_from(9).is_err());
        assert!(serde_json::from_str::<CbilLevel>("0").is_err());
    }

    #[test]
    fn level_serializes_as_number() {
        assert_eq!(serde_json::to_string(&CbilLevel::Synthesis).unwrap(), "5");
        let level: CbilLevel = serde_json::from_str("7").unwrap();
        assert_eq!(level, CbilLevel::CreativeApplication);
    }

    #[test]
    fn level_map_keys_are_numeric_strings() {
        let mut counts = BTreeMap::new();
        counts.insert(CbilLevel::FactRecall, 2usize);
        counts.insert(CbilLevel::SimpleConfirmation, 1usize);
        let json = serde_json::to_string(&counts).unwrap();
        assert_eq!(json, r#"{"1":1,"2":2}"#);
    }

    #[test]
    fn cognitive_bands() {
        assert!(CbilLevel::FactRecall.is_low_cognitive());
        assert!(!CbilLevel::ConceptExplanation.is_low_cognitive());
        assert!(!CbilLevel::AnalyticalThinking.is_high_cognitive());
        assert!(CbilLevel::Synthesis.is_high_cognitive());
    }

    #[test]
    fn placeholder_shape() {
        let c = Classification::placeholder(4);
        assert_eq!(c.utterance_index, 4);
        assert_eq!(c.level, CbilLevel::ConceptExplanation);
        assert_eq!(c.confidence, 0.0);
        assert!(c.is_placeholder());
        assert!(!c.is_fallback());
    }
}
