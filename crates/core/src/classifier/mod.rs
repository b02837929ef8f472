//! Utterance classification.
//!
//! Every scoring backend implements [`Classifier`]; the pipeline only ever
//! holds `Arc<dyn Classifier>` and never branches on the concrete backend.

mod batch;
mod remote;
mod rules;
mod statistical;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    types::{Classification, Utterance},
};

pub use batch::{
    BatchClassifier, BatchOutput, BatchSettings, BatchStats, DEFAULT_CONCURRENCY_LIMIT,
    DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_PER_CALL_TIMEOUT,
};
pub use remote::{RemoteConfig, RemoteLlmClassifier};
pub use rules::{LevelTriggers, RuleBasedClassifier, TriggerLexicon, TriggerMatches};
pub use statistical::{PhraseFeature, PhraseModel, StatisticalClassifier};

/// Maps a single utterance to a CBIL level.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Short identifier used in logs and batch statistics.
    fn name(&self) -> &'static str;

    async fn classify(&self, utterance: &Utterance) -> Result<Classification>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierBackend {
    #[default]
    RuleBased,
    Statistical,
    RemoteLlm,
}

impl ClassifierBackend {
    pub fn name(&self) -> &'static str {
        match self {
            ClassifierBackend::RuleBased => "rule_based",
            ClassifierBackend::Statistical => "statistical",
            ClassifierBackend::RemoteLlm => "remote_llm",
        }
    }
}
