//! Analysis requests as handed over by the owning service.

use serde::{Deserialize, Serialize};

use crate::{
    classifier::ClassifierBackend,
    config::parse_timeout,
    error::{CbilError, Result},
};

/// Per-request overrides of [`crate::config::AnalysisConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    pub min_utterance_tokens: Option<usize>,
    pub classifier_backend: Option<ClassifierBackend>,
    pub concurrency_limit: Option<usize>,
    pub per_call_timeout_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub analysis_id: String,
    pub transcript: String,
    #[serde(default)]
    pub options: AnalysisOptions,
}

impl AnalysisRequest {
    pub fn new(analysis_id: impl Into<String>, transcript: impl Into<String>) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            transcript: transcript.into(),
            options: AnalysisOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: AnalysisOptions) -> Self {
        self.options = options;
        self
    }

    /// Parse and validate an untyped JSON request body.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| CbilError::invalid_input(format!("request is not valid JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        match value.get("transcript") {
            Some(serde_json::Value::String(_)) => {}
            Some(serde_json::Value::Null) | None => {
                return Err(CbilError::invalid_input("transcript is missing or null"));
            }
            Some(other) => {
                return Err(CbilError::invalid_input(format!(
                    "transcript must be a string, got {}",
                    json_type_name(other)
                )));
            }
        }

        let request: AnalysisRequest = serde_json::from_value(value)
            .map_err(|e| CbilError::invalid_input(format!("malformed request: {e}")))?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.analysis_id.trim().is_empty() {
            return Err(CbilError::invalid_input("analysis_id must not be empty"));
        }
        if self.options.min_utterance_tokens == Some(0) {
            return Err(CbilError::invalid_input(
                "min_utterance_tokens must be at least 1",
            ));
        }
        if self.options.concurrency_limit == Some(0) {
            return Err(CbilError::invalid_input(
                "concurrency_limit must be at least 1",
            ));
        }
        if let Some(seconds) = self.options.per_call_timeout_seconds {
            parse_timeout(seconds)?;
        }
        Ok(())
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
