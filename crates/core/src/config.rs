//! Pipeline configuration.
//!
//! A plain value object handed to [`crate::pipeline::AnalysisPipeline`] at
//! construction. Callers load it from TOML (or build it in code); the core
//! never consults the process environment.
//!
//! ```toml
//! [segmenter]
//! min_utterance_tokens = 3
//!
//! [classifier]
//! backend = "remote_llm"
//! concurrency_limit = 4
//! per_call_timeout_seconds = 8.0
//!
//! [classifier.remote]
//! provider = "openai"
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    classifier::{
        BatchSettings, ClassifierBackend, DEFAULT_CONCURRENCY_LIMIT,
        DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_PER_CALL_TIMEOUT, RemoteConfig,
    },
    error::{CbilError, Result},
    insights::InsightThresholds,
    request::AnalysisOptions,
    segmenter::SegmenterOptions,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub segmenter: SegmenterOptions,
    pub classifier: ClassifierConfig,
    pub insights: InsightThresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub backend: ClassifierBackend,
    pub concurrency_limit: usize,
    pub per_call_timeout_seconds: f64,
    /// Consecutive backend failures before the batch switches to the
    /// rule-based backend; 0 disables the switch.
    pub max_consecutive_failures: usize,
    /// TOML trigger lexicon replacing the built-in phrases.
    pub lexicon_path: Option<PathBuf>,
    /// JSON phrase model for the statistical backend.
    pub model_path: Option<PathBuf>,
    pub remote: RemoteConfig,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::default(),
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            per_call_timeout_seconds: DEFAULT_PER_CALL_TIMEOUT.as_secs_f64(),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            lexicon_path: None,
            model_path: None,
            remote: RemoteConfig::default(),
        }
    }
}

impl ClassifierConfig {
    /// Falls back to the default for values [`AnalysisConfig::validate`]
    /// would reject.
    pub fn per_call_timeout(&self) -> Duration {
        parse_timeout(self.per_call_timeout_seconds).unwrap_or(DEFAULT_PER_CALL_TIMEOUT)
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            concurrency_limit: self.concurrency_limit,
            per_call_timeout: self.per_call_timeout(),
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).await?;
        Self::from_toml_str(&raw).map_err(|e| CbilError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.segmenter.min_utterance_tokens == 0 {
            return Err(CbilError::invalid_input(
                "min_utterance_tokens must be at least 1",
            ));
        }
        if self.classifier.concurrency_limit == 0 {
            return Err(CbilError::invalid_input(
                "concurrency_limit must be at least 1",
            ));
        }
        parse_timeout(self.classifier.per_call_timeout_seconds)?;
        Ok(())
    }

    /// Copy of this configuration with the per-request overrides applied.
    pub fn with_options(&self, options: &AnalysisOptions) -> Self {
        let mut config = self.clone();
        if let Some(tokens) = options.min_utterance_tokens {
            config.segmenter.min_utterance_tokens = tokens;
        }
        if let Some(backend) = options.classifier_backend {
            config.classifier.backend = backend;
        }
        if let Some(limit) = options.concurrency_limit {
            config.classifier.concurrency_limit = limit;
        }
        if let Some(seconds) = options.per_call_timeout_seconds {
            config.classifier.per_call_timeout_seconds = seconds;
        }
        config
    }
}

/// Positive, finite and representable as a [`Duration`].
pub(crate) fn parse_timeout(seconds: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(timeout) if !timeout.is_zero() => Ok(timeout),
        _ => Err(CbilError::invalid_input(format!(
            "per_call_timeout_seconds must be a positive number of seconds, got {seconds}"
        ))),
    }
}
