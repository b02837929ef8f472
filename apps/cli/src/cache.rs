use std::{
    hash::{DefaultHasher, Hash, Hasher},
    path::{Path, PathBuf},
};

use anyhow::Result;
use cbil_core::{AnalysisConfig, AnalysisOutcome, ClassifierBackend};
use tokio::fs;

/// Get the cache directory for a transcript analysed under `config`
pub fn get_cache_dir(transcript: &str, config: &AnalysisConfig) -> Result<PathBuf> {
    let mut hasher = DefaultHasher::new();
    transcript.hash(&mut hasher);
    // segmenter and thresholds change the report too
    serde_json::to_string(config)?.hash(&mut hasher);
    let input_hash = hasher.finish();

    Ok(get_root_cache_dir().join(input_hash.to_string()))
}

pub fn get_root_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("cbil")
}

/// Get the path for a cached report file (backend aware)
pub fn get_report_path(cache_dir: &Path, backend: ClassifierBackend) -> PathBuf {
    cache_dir.join(format!("report_{}.json", backend.name()))
}

pub async fn load_outcome(path: &Path) -> Result<AnalysisOutcome> {
    let content = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

pub async fn save_outcome(outcome: &AnalysisOutcome, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(outcome)?;
    fs::write(path, json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use cbil_core::{AnalysisPipeline, AnalysisRequest};

    use super::*;

    #[test]
    fn cache_dir_depends_on_transcript_and_config() {
        let config = AnalysisConfig::default();
        let a = get_cache_dir("hello there", &config).unwrap();
        assert_eq!(a, get_cache_dir("hello there", &config).unwrap());
        assert_ne!(a, get_cache_dir("hello again", &config).unwrap());

        let mut other = AnalysisConfig::default();
        other.segmenter.min_utterance_tokens = 5;
        assert_ne!(a, get_cache_dir("hello there", &other).unwrap());
    }

    #[test]
    fn report_path_names_the_backend() {
        let path = get_report_path(Path::new("/c"), ClassifierBackend::RemoteLlm);
        assert_eq!(path, PathBuf::from("/c/report_remote_llm.json"));
    }

    #[tokio::test]
    async fn outcome_survives_the_cache() {
        let pipeline = AnalysisPipeline::new(AnalysisConfig::default()).unwrap();
        let outcome = pipeline
            .analyze(&AnalysisRequest::new("lesson", "Why is the sky blue?"))
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report_rule_based.json");
        save_outcome(&outcome, &path).await.unwrap();

        let loaded = load_outcome(&path).await.unwrap();
        assert_eq!(loaded.report.analysis_id, "lesson");
        assert_eq!(loaded.report.level_counts, outcome.report.level_counts);
        assert_eq!(loaded.utterances, outcome.utterances);
    }
}
