use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use cbil_core::{
    AnalysisConfig, AnalysisPipeline, AnalysisRequest, ClassifierBackend, Provider,
    format_classified_utterances, format_report_readable,
};
use clap::{Parser, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::{fs, io::AsyncReadExt};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::cache::{get_cache_dir, get_report_path, load_outcome, save_outcome};

mod cache;

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// CLI wrapper for ClassifierBackend (needed for clap ValueEnum)
#[derive(Clone, Copy, ValueEnum)]
enum CliBackend {
    RuleBased,
    Statistical,
    RemoteLlm,
}

impl From<CliBackend> for ClassifierBackend {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::RuleBased => ClassifierBackend::RuleBased,
            CliBackend::Statistical => ClassifierBackend::Statistical,
            CliBackend::RemoteLlm => ClassifierBackend::RemoteLlm,
        }
    }
}

/// CLI wrapper for Provider enum (needed for clap ValueEnum)
#[derive(Clone, Copy, ValueEnum)]
enum CliProvider {
    Grok,
    Openai,
    Gemini,
}

impl From<CliProvider> for Provider {
    fn from(cli: CliProvider) -> Self {
        match cli {
            CliProvider::Grok => Provider::Grok,
            CliProvider::Openai => Provider::Openai,
            CliProvider::Gemini => Provider::Gemini,
        }
    }
}

#[derive(Parser)]
#[command(name = "cbil")]
#[command(about = "Classify lesson transcript utterances by cognitive instruction level")]
struct Cli {
    /// Transcript file, or "-" to read from stdin
    transcript: String,

    /// Identifier carried into the report. Defaults to a fresh UUID.
    #[arg(long)]
    analysis_id: Option<String>,

    /// Classifier backend (overrides the config file)
    #[arg(short, long)]
    backend: Option<CliBackend>,

    /// LLM provider for the remote-llm backend
    #[arg(short, long)]
    provider: Option<CliProvider>,

    /// Minimum tokens per utterance before merging with a neighbour
    #[arg(long)]
    min_tokens: Option<usize>,

    /// Maximum classifier calls in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Extra speaker name recognised in `name:` prefixes (repeatable)
    #[arg(long = "speaker")]
    speakers: Vec<String>,

    /// Per-utterance classification timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// TOML analysis config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TOML trigger lexicon for the rule-based backend
    #[arg(long)]
    lexicon: Option<PathBuf>,

    /// JSON phrase model for the statistical backend
    #[arg(long)]
    model: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Force re-analysis even if a cached report exists
    #[arg(short, long)]
    force: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut AnalysisConfig) {
        if let Some(backend) = self.backend {
            config.classifier.backend = backend.into();
        }
        if let Some(provider) = self.provider {
            config.classifier.remote.provider = provider.into();
        }
        if let Some(tokens) = self.min_tokens {
            config.segmenter.min_utterance_tokens = tokens;
        }
        config
            .segmenter
            .speaker_labels
            .extend(self.speakers.iter().cloned());
        if let Some(limit) = self.concurrency {
            config.classifier.concurrency_limit = limit;
        }
        if let Some(seconds) = self.timeout {
            config.classifier.per_call_timeout_seconds = seconds;
        }
        if let Some(path) = &self.lexicon {
            config.classifier.lexicon_path = Some(path.clone());
        }
        if let Some(path) = &self.model {
            config.classifier.model_path = Some(path.clone());
        }
    }
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

async fn read_transcript(source: &str) -> Result<String> {
    if source == "-" {
        let mut transcript = String::new();
        tokio::io::stdin().read_to_string(&mut transcript).await?;
        return Ok(transcript);
    }
    fs::read_to_string(source)
        .await
        .with_context(|| format!("failed to read transcript {source}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::load(path).await?,
        None => AnalysisConfig::default(),
    };
    cli.apply_overrides(&mut config);
    config.validate()?;

    let backend = config.classifier.backend;

    // Validate API key early
    let api_key = if backend == ClassifierBackend::RemoteLlm {
        let provider = config.classifier.remote.provider;
        let env_var = provider.config().env_var;
        match std::env::var(env_var) {
            Ok(key) if !key.trim().is_empty() => Some(key),
            _ => {
                eprintln!(
                    "{} {} backend needs {} to be set",
                    style("Error:").red().bold(),
                    provider.name(),
                    env_var
                );
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let transcript = read_transcript(&cli.transcript).await?;
    let analysis_id = cli
        .analysis_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let cache_dir = get_cache_dir(&transcript, &config)?;
    let report_path = get_report_path(&cache_dir, backend);

    if !cli.json {
        println!(
            "\n{}  {}\n",
            style("cbil").cyan().bold(),
            style("Lesson Analyzer").dim()
        );
        println!("{}", style("─".repeat(60)).dim());
    }

    let total_start = Instant::now();

    let outcome = if !cli.force && report_path.exists() {
        let mut outcome = load_outcome(&report_path).await?;
        outcome.report.analysis_id = analysis_id;
        if !cli.json {
            println!(
                "{} Classified {} utterances ({}) {}",
                style("✓").green().bold(),
                outcome.report.utterance_count,
                backend.name(),
                style("(cached)").dim()
            );
        }
        outcome
    } else {
        let spinner = (!cli.json)
            .then(|| create_spinner(&format!("Classifying utterances with {}...", backend.name())));

        let pipeline = AnalysisPipeline::from_config(config, api_key).await?;
        let outcome = pipeline
            .analyze(&AnalysisRequest::new(analysis_id, transcript))
            .await?;
        save_outcome(&outcome, &report_path).await?;

        if let Some(spinner) = spinner {
            spinner.finish_with_message(format!(
                "{} Classified {} utterances ({}) {}",
                style("✓").green().bold(),
                outcome.report.utterance_count,
                backend.name(),
                style(format!("[{}]", format_duration(total_start.elapsed()))).dim()
            ));
        }
        outcome
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
        return Ok(());
    }

    if outcome.batch.failed > 0 || outcome.batch.fallback_after.is_some() {
        println!(
            "{} {} failed, {} classified by fallback",
            style("!").yellow().bold(),
            outcome.batch.failed,
            outcome.batch.fallback_classified
        );
    }

    println!(
        "\n{} {}\n",
        style("Total time:").dim(),
        style(format_duration(total_start.elapsed())).cyan().bold()
    );
    println!(
        "{} {}\n",
        style("Saved:").dim(),
        style(report_path.display()).cyan()
    );
    println!("{}", style("─".repeat(60)).dim());

    if cli.verbose {
        println!(
            "{}\n",
            format_classified_utterances(&outcome.utterances, &outcome.classifications)
        );
    }
    println!("{}", format_report_readable(&outcome.report, &outcome.insights));

    Ok(())
}
