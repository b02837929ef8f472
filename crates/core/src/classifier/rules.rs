//! Rule-based reference classifier.
//!
//! Scores each level by the number of its trigger phrases found in the
//! utterance (case-insensitive substring match). The level with the most
//! matches wins, ties go to the higher level. Without any match the
//! utterance defaults to concept explanation with a low confidence.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    classifier::Classifier,
    error::{CbilError, Result},
    types::{CbilLevel, Classification, Utterance},
};

const NO_MATCH_LEVEL: CbilLevel = CbilLevel::ConceptExplanation;
const NO_MATCH_CONFIDENCE: f64 = 0.3;
const MIN_CONFIDENCE: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelTriggers {
    pub level: CbilLevel,
    pub triggers: Vec<String>,
}

/// Ordered trigger phrases per level. Loadable from TOML:
///
/// ```toml
/// [[levels]]
/// level = 1
/// triggers = ["네", "맞습니다", "yes"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerLexicon {
    pub levels: Vec<LevelTriggers>,
}

impl TriggerLexicon {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).await?;
        Self::from_toml_str(&raw).map_err(|e| CbilError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Triggers of one level in declaration order. A level listed more than
    /// once contributes all of its lists.
    pub fn triggers(&self, level: CbilLevel) -> impl Iterator<Item = &str> {
        self.levels
            .iter()
            .filter(move |entry| entry.level == level)
            .flat_map(|entry| entry.triggers.iter().map(String::as_str))
    }
}

impl Default for TriggerLexicon {
    fn default() -> Self {
        let table: [(CbilLevel, &[&str]); 7] = [
            (
                CbilLevel::SimpleConfirmation,
                &[
                    "네", "맞습니다", "맞아요", "맞나요", "그렇죠", "그렇습니다", "알겠", "됐나요",
                    "좋아요", "이해했", "yes", "okay", "that's right", "correct", "got it",
                    "is that clear",
                ],
            ),
            (
                CbilLevel::FactRecall,
                &[
                    "무엇", "뭐였", "언제", "누구", "어디", "몇 ", "이름", "기억", "말해 보",
                    "읽어 보", "when did", "who ", "where", "how many", "remember", "recall",
                    "name the", "list the",
                ],
            ),
            (
                CbilLevel::ConceptExplanation,
                &[
                    "설명", "의미", "개념", "정의", "이란", "뜻", "예를 들", "explain", "means",
                    "meaning", "definition", "define", "for example", "in other words", "describe",
                ],
            ),
            (
                CbilLevel::AnalyticalThinking,
                &[
                    "왜", "비교", "분석", "차이", "원인", "이유", "어떻게 다른", "공통점", "관계",
                    "why", "compare", "analyze", "analyse", "difference", "cause", "reason",
                    "relationship", "pattern",
                ],
            ),
            (
                CbilLevel::Synthesis,
                &[
                    "종합", "통합", "연결", "정리해", "요약", "합쳐", "전체적으로", "관련지어",
                    "combine", "summarize", "summarise", "integrate", "connect", "put together",
                    "overall",
                ],
            ),
            (
                CbilLevel::EvaluativeJudgment,
                &[
                    "평가", "판단", "어떻게 생각", "옳은", "더 나은", "타당", "근거", "장단점",
                    "비판", "evaluate", "judge", "justify", "do you agree", "which is better",
                    "pros and cons", "critique", "assess",
                ],
            ),
            (
                CbilLevel::CreativeApplication,
                &[
                    "창의", "여러분만의", "새로운 방법", "해결책", "제시해", "만들어", "설계",
                    "고안", "상상", "create", "design", "propose your own", "invent",
                    "come up with", "imagine", "build your own",
                ],
            ),
        ];

        Self {
            levels: table
                .into_iter()
                .map(|(level, triggers)| LevelTriggers {
                    level,
                    triggers: triggers.iter().map(|t| t.to_string()).collect(),
                })
                .collect(),
        }
    }
}

/// Per-level match result for one utterance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerMatches<'a> {
    pub per_level: [Vec<&'a str>; 7],
}

impl TriggerMatches<'_> {
    pub fn count(&self, level: CbilLevel) -> usize {
        self.per_level[level.slot()].len()
    }

    pub fn total(&self) -> usize {
        self.per_level.iter().map(Vec::len).sum()
    }
}

pub struct RuleBasedClassifier {
    /// Lowercased triggers indexed by level slot.
    triggers: [Vec<String>; 7],
}

impl RuleBasedClassifier {
    pub fn new(lexicon: &TriggerLexicon) -> Self {
        let triggers: [Vec<String>; 7] = CbilLevel::ALL.map(|level| {
            lexicon
                .triggers(level)
                .filter(|t| !t.trim().is_empty())
                .map(str::to_lowercase)
                .collect()
        });
        Self { triggers }
    }

    pub fn with_default_lexicon() -> Self {
        Self::new(&TriggerLexicon::default())
    }

    pub fn matches<'a>(&'a self, text: &str) -> TriggerMatches<'a> {
        let haystack = text.to_lowercase();
        TriggerMatches {
            per_level: CbilLevel::ALL.map(|level| {
                self.triggers[level.slot()]
                    .iter()
                    .filter(|t| haystack.contains(t.as_str()))
                    .map(String::as_str)
                    .collect()
            }),
        }
    }

    /// Synchronous scoring, shared by the async trait impl and the batch
    /// fallback path.
    pub fn classify_utterance(&self, utterance: &Utterance) -> Classification {
        let matches = self.matches(&utterance.text);
        let total = matches.total();

        if total == 0 {
            return Classification {
                utterance_index: utterance.index,
                level: NO_MATCH_LEVEL,
                confidence: NO_MATCH_CONFIDENCE,
                rationale: Some("no_trigger_matched".to_string()),
            };
        }

        // `>=` lets a later (higher) level win ties.
        let mut chosen = NO_MATCH_LEVEL;
        let mut best = 0;
        for level in CbilLevel::ALL {
            let count = matches.count(level);
            if count > 0 && count >= best {
                best = count;
                chosen = level;
            }
        }

        let confidence = (best as f64 / total as f64).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);

        Classification {
            utterance_index: utterance.index,
            level: chosen,
            confidence,
            rationale: Some(format!(
                "matched: {}",
                matches.per_level[chosen.slot()].join(", ")
            )),
        }
    }
}

#[async_trait]
impl Classifier for RuleBasedClassifier {
    fn name(&self) -> &'static str {
        "rule_based"
    }

    async fn classify(&self, utterance: &Utterance) -> Result<Classification> {
        Ok(self.classify_utterance(utterance))
    }
}
