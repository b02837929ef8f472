use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    aggregator::aggregate,
    classifier::{
        BatchClassifier, BatchStats, Classifier, ClassifierBackend, PhraseModel,
        RemoteLlmClassifier, RuleBasedClassifier, StatisticalClassifier, TriggerLexicon,
    },
    config::AnalysisConfig,
    error::{CbilError, Result},
    insights::{LessonInsights, summarize},
    request::AnalysisRequest,
    segmenter::segment,
    types::{AnalysisReport, Classification, Utterance},
};

/// Everything produced for one request. `report` is the renderer contract;
/// the rest is kept for callers that want to show per-utterance detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub report: AnalysisReport,
    pub insights: LessonInsights,
    pub utterances: Vec<Utterance>,
    pub classifications: Vec<Classification>,
    pub batch: BatchStats,
}

/// Segmenter -> classifier -> aggregator, with the backends resolved once at
/// construction.
pub struct AnalysisPipeline {
    config: AnalysisConfig,
    backends: HashMap<ClassifierBackend, Arc<dyn Classifier>>,
    fallback: Arc<RuleBasedClassifier>,
}

impl AnalysisPipeline {
    /// Pipeline with the built-in lexicon. Registers the rule-based and
    /// statistical backends; a remote backend can be added with
    /// [`AnalysisPipeline::with_backend`].
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let lexicon = TriggerLexicon::default();
        let model = PhraseModel::from_lexicon(&lexicon);
        Ok(Self::assemble(config, &lexicon, model))
    }

    /// Pipeline with lexicon and model files from the configuration. The
    /// remote backend is registered only when an API key is supplied.
    pub async fn from_config(config: AnalysisConfig, api_key: Option<String>) -> Result<Self> {
        config.validate()?;

        let lexicon = match &config.classifier.lexicon_path {
            Some(path) => TriggerLexicon::load(path).await?,
            None => TriggerLexicon::default(),
        };
        let model = match &config.classifier.model_path {
            Some(path) => PhraseModel::load(path).await?,
            None => PhraseModel::from_lexicon(&lexicon),
        };

        let mut pipeline = Self::assemble(config, &lexicon, model);

        if let Some(api_key) = api_key {
            let remote = RemoteLlmClassifier::new(&pipeline.config.classifier.remote, api_key)?;
            pipeline = pipeline.with_backend(ClassifierBackend::RemoteLlm, Arc::new(remote));
        }

        Ok(pipeline)
    }

    fn assemble(config: AnalysisConfig, lexicon: &TriggerLexicon, model: PhraseModel) -> Self {
        let rule_based = Arc::new(RuleBasedClassifier::new(lexicon));
        let mut backends: HashMap<ClassifierBackend, Arc<dyn Classifier>> = HashMap::new();
        backends.insert(ClassifierBackend::RuleBased, rule_based.clone());
        backends.insert(
            ClassifierBackend::Statistical,
            Arc::new(StatisticalClassifier::new(model)),
        );

        Self {
            config,
            backends,
            fallback: rule_based,
        }
    }

    /// Register or replace the classifier used for `kind`.
    #[must_use]
    pub fn with_backend(mut self, kind: ClassifierBackend, classifier: Arc<dyn Classifier>) -> Self {
        self.backends.insert(kind, classifier);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn has_backend(&self, kind: ClassifierBackend) -> bool {
        self.backends.contains_key(&kind)
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome> {
        request.validate()?;
        let config = self.config.with_options(&request.options);
        config.validate()?;

        let kind = config.classifier.backend;
        let backend = self.backends.get(&kind).cloned().ok_or_else(|| {
            CbilError::invalid_input(format!("classifier backend {} is not configured", kind.name()))
        })?;

        info!(
            analysis_id = %request.analysis_id,
            backend = kind.name(),
            "Analysis started"
        );

        let utterances = segment(&request.transcript, &config.segmenter);
        let batch = BatchClassifier::new(
            backend,
            Arc::clone(&self.fallback),
            config.classifier.batch_settings(),
        )
        .run(&utterances)
        .await;

        let report = aggregate(&batch.classifications, &request.analysis_id);
        let insights = summarize(&batch.classifications, &report, &config.insights);

        info!(
            analysis_id = %request.analysis_id,
            utterances = report.utterance_count,
            dominant_level = report.dominant_level.number(),
            degraded = insights.degraded_count,
            "Analysis completed"
        );

        Ok(AnalysisOutcome {
            report,
            insights,
            utterances,
            classifications: batch.classifications,
            batch: batch.stats,
        })
    }
}
