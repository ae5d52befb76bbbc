//! `citeflow ask`: Answer one question against the configured corpus.

use citeflow_agent::{
    ChatOrchestrator, ChatRequest, ChatService, ChatSettings, StreamEvent, TokenCounter,
};
use citeflow_config::AppConfig;
use citeflow_core::log::TracingLogSink;
use citeflow_core::message::HistoryEntry;
use citeflow_core::retrieval::citation_label;
use citeflow_providers::OpenAiCompatProvider;
use citeflow_retrieval::CorpusRetriever;
use citeflow_telemetry::{ModelPricing, PricingTable, SessionLedger};
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct AskArgs {
    pub query: String,
    pub mode: String,
    pub stream: bool,
    pub history: Option<PathBuf>,
    pub k: Option<usize>,
}

pub async fn run(args: AskArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Fail early with setup instructions
    let Some(api_key) = config.api_key.clone() else {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CITEFLOW_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    };

    let service = build_service(&config, api_key)?;

    let mut request = ChatRequest::new(args.query).with_mode(args.mode);
    if let Some(path) = &args.history {
        request = request.with_history(load_history(path)?);
    }
    if let Some(k) = args.k {
        request = request.with_k(k);
    }

    let log = Arc::new(TracingLogSink);

    if args.stream {
        let mut lines = Box::pin(service.stream_json(request, log));
        while let Some(line) = lines.next().await {
            println!("{line}");
        }
        return Ok(());
    }

    let mut rx = service.start(request, log);
    let mut sources = Vec::new();
    let mut stdout = std::io::stdout();

    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Loading {
                citations: Some(citations),
                ..
            } => sources = citations,
            StreamEvent::Loading { .. } => {}
            StreamEvent::Streaming { content } => {
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            StreamEvent::Done { followups } => {
                println!();
                if !sources.is_empty() {
                    println!("\nSources:");
                    for (i, c) in sources.iter().enumerate() {
                        let label = citation_label(i).unwrap_or('?');
                        println!("  [{label}] {} - {}", c.title, c.url);
                    }
                }
                if !followups.is_empty() {
                    println!("\nRelated:");
                    for f in &followups {
                        println!("  - {}", f.text);
                    }
                }
            }
            StreamEvent::Error { message } => {
                println!();
                return Err(message.into());
            }
        }
    }

    Ok(())
}

fn build_service(
    config: &AppConfig,
    api_key: String,
) -> Result<ChatService, Box<dyn std::error::Error>> {
    let provider = Arc::new(match &config.api_url {
        Some(url) => OpenAiCompatProvider::new("openai-compatible", url.as_str(), api_key),
        None => OpenAiCompatProvider::openai(api_key),
    });

    let retriever = match &config.retrieval.corpus_path {
        Some(path) => CorpusRetriever::from_path(Path::new(path))?,
        None => {
            warn!("No corpus configured; answers will have no sources");
            CorpusRetriever::default()
        }
    };

    let orchestrator = ChatOrchestrator::new(
        provider.clone(),
        Arc::new(retriever),
        provider,
        Arc::new(SessionLedger::new()),
        settings_from_config(config),
        TokenCounter::cl100k()?,
    )
    .with_pricing(Arc::new(pricing_from_config(config)));

    Ok(ChatService::new(orchestrator).with_session_budget(config.budget.session_usd))
}

/// Model profile defaults, overridden by whatever `[chat]` sets.
pub fn settings_from_config(config: &AppConfig) -> ChatSettings {
    let mut settings = ChatSettings::for_model(config.model.as_str());
    if let Some(num_tokens) = config.chat.num_tokens {
        settings.num_tokens = num_tokens;
    }
    if let Some(k) = config.chat.k {
        settings.default_k = k;
    }
    settings.context_fraction = config.chat.context_fraction;
    settings.history_fraction = config.chat.history_fraction;
    settings.completion_margin = config.chat.completion_margin;
    settings.temperature = config.chat.temperature;
    settings.request_timeout = Duration::from_secs(config.chat.request_timeout_secs);
    settings
}

/// Built-in prices plus `[pricing]` overrides.
pub fn pricing_from_config(config: &AppConfig) -> PricingTable {
    let table = PricingTable::with_defaults();
    for (model, p) in &config.pricing {
        table.set(model.as_str(), ModelPricing::new(p.input_per_m, p.output_per_m));
    }
    table
}

fn load_history(path: &Path) -> Result<Vec<HistoryEntry>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read history at {}: {e}", path.display()))?;
    let history = serde_json::from_str(&raw)
        .map_err(|e| format!("Invalid history in {}: {e}", path.display()))?;
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use citeflow_config::PricingOverrideConfig;

    #[test]
    fn settings_follow_model_profile() {
        let mut config = AppConfig::default();
        config.model = "gpt-4".into();
        let settings = settings_from_config(&config);
        assert_eq!(settings.num_tokens, 8191);
        assert_eq!(settings.default_k, 20);
        assert_eq!(settings.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn chat_section_overrides_profile() {
        let mut config = AppConfig::default();
        config.chat.num_tokens = Some(16_000);
        config.chat.k = Some(5);
        config.chat.completion_margin = 100;
        let settings = settings_from_config(&config);
        assert_eq!(settings.model, "gpt-3.5-turbo");
        assert_eq!(settings.num_tokens, 16_000);
        assert_eq!(settings.default_k, 5);
        assert_eq!(settings.completion_margin, 100);
    }

    #[test]
    fn pricing_overrides_apply() {
        let mut config = AppConfig::default();
        config.pricing.insert(
            "my-model".into(),
            PricingOverrideConfig {
                input_per_m: 1.0,
                output_per_m: 2.0,
            },
        );
        let table = pricing_from_config(&config);
        assert_eq!(table.get("my-model"), Some(ModelPricing::new(1.0, 2.0)));
        assert!(table.get("gpt-4").is_some());
    }
}
