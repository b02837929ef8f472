pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod error;
pub mod format;
pub mod insights;
pub mod pipeline;
pub mod provider;
pub mod request;
pub mod segmenter;
pub mod types;

pub use aggregator::aggregate;
pub use classifier::{
    BatchClassifier, BatchOutput, BatchSettings, BatchStats, Classifier, ClassifierBackend,
    PhraseModel, RemoteConfig, RemoteLlmClassifier, RuleBasedClassifier, StatisticalClassifier,
    TriggerLexicon,
};
pub use config::{AnalysisConfig, ClassifierConfig};
pub use error::{CbilError, Result};
pub use format::{format_classified_utterances, format_report_readable, format_timestamp};
pub use insights::{ImprovementSignal, InsightThresholds, LessonInsights, summarize};
pub use pipeline::{AnalysisOutcome, AnalysisPipeline};
pub use provider::{Provider, ProviderConfig};
pub use request::{AnalysisOptions, AnalysisRequest};
pub use segmenter::{SegmenterOptions, segment};
pub use types::{AnalysisReport, CbilLevel, Classification, Utterance};
