//! Linear phrase model backend.
//!
//! Evaluates a pre-trained model: each feature is a phrase with one weight
//! per level. Logits are the bias plus the weights of every phrase present in
//! the utterance; a softmax turns them into level probabilities.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    classifier::{Classifier, TriggerLexicon},
    error::{CbilError, Result},
    types::{CbilLevel, Classification, Utterance},
};

const BACKEND_NAME: &str = "statistical";

/// Prior used by [`PhraseModel::from_lexicon`]: without evidence the model
/// leans towards concept explanation.
const LEXICON_PRIOR: [f64; 7] = [0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0];

/// Upper bound on `|bias| + sum(|weight|)` for any level, which keeps every
/// reachable logit finite.
pub const MAX_LOGIT_MAGNITUDE: f64 = 1e6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseFeature {
    pub phrase: String,
    pub weights: [f64; 7],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseModel {
    pub bias: [f64; 7],
    pub features: Vec<PhraseFeature>,
}

impl PhraseModel {
    /// One feature per trigger phrase, weighted 1.0 towards its own level.
    pub fn from_lexicon(lexicon: &TriggerLexicon) -> Self {
        let mut features = Vec::new();
        for level in CbilLevel::ALL {
            for phrase in lexicon.triggers(level) {
                let mut weights = [0.0; 7];
                weights[level.slot()] = 1.0;
                features.push(PhraseFeature {
                    phrase: phrase.to_string(),
                    weights,
                });
            }
        }
        Self {
            bias: LEXICON_PRIOR,
            features,
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let model: PhraseModel = serde_json::from_str(raw)?;
        let finite = model.bias.iter().all(|w| w.is_finite())
            && model
                .features
                .iter()
                .all(|f| f.weights.iter().all(|w| w.is_finite()));
        if !finite {
            return Err(CbilError::invalid_input("model weights must be finite"));
        }
        for level in CbilLevel::ALL {
            let slot = level.slot();
            let magnitude = model.bias[slot].abs()
                + model
                    .features
                    .iter()
                    .map(|f| f.weights[slot].abs())
                    .sum::<f64>();
            if magnitude > MAX_LOGIT_MAGNITUDE {
                return Err(CbilError::invalid_input(format!(
                    "weights for level {} reach {magnitude:e}, above {MAX_LOGIT_MAGNITUDE:e}",
                    level.number()
                )));
            }
        }
        Ok(model)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).await?;
        Self::from_json_str(&raw).map_err(|e| CbilError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

pub struct StatisticalClassifier {
    model: PhraseModel,
}

impl StatisticalClassifier {
    pub fn new(mut model: PhraseModel) -> Self {
        for feature in &mut model.features {
            feature.phrase = feature.phrase.to_lowercase();
        }
        model.features.retain(|f| !f.phrase.trim().is_empty());
        Self { model }
    }

    pub fn probabilities(&self, text: &str) -> ([f64; 7], Vec<&str>) {
        let haystack = text.to_lowercase();
        let mut logits = self.model.bias;
        let mut present = Vec::new();

        for feature in &self.model.features {
            if haystack.contains(feature.phrase.as_str()) {
                for (logit, weight) in logits.iter_mut().zip(feature.weights) {
                    *logit += weight;
                }
                present.push(feature.phrase.as_str());
            }
        }

        (softmax(logits), present)
    }

    /// Fails when the model's logits overflow; the batch turns that into a
    /// placeholder.
    pub fn classify_utterance(&self, utterance: &Utterance) -> Result<Classification> {
        let (probabilities, present) = self.probabilities(&utterance.text);
        if !probabilities.iter().all(|p| p.is_finite()) {
            return Err(CbilError::Backend {
                backend: BACKEND_NAME,
                reason: format!(
                    "phrase model produced non-finite probabilities for utterance {}",
                    utterance.index
                ),
            });
        }

        let mut chosen = CbilLevel::ConceptExplanation;
        let mut best = f64::NEG_INFINITY;
        for level in CbilLevel::ALL {
            let p = probabilities[level.slot()];
            if p >= best {
                best = p;
                chosen = level;
            }
        }

        let rationale = if present.is_empty() {
            format!("p={best:.2} from prior")
        } else {
            format!("p={best:.2} via: {}", present.join(", "))
        };

        Ok(Classification {
            utterance_index: utterance.index,
            level: chosen,
            confidence: best.clamp(0.0, 1.0),
            rationale: Some(rationale),
        })
    }
}

fn softmax(logits: [f64; 7]) -> [f64; 7] {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps = logits.map(|l| (l - max).exp());
    let sum: f64 = exps.iter().sum();
    exps.map(|e| e / sum)
}

#[async_trait]
impl Classifier for StatisticalClassifier {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn classify(&self, utterance: &Utterance) -> Result<Classification> {
        self.classify_utterance(utterance)
    }
}
