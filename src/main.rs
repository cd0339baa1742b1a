use std::sync::Arc;

use mailcast::cache::JsonFileCache;
use mailcast::capability::gemini::{GeminiClient, GeminiConfig};
use mailcast::config::{FilterFallback, FilterMode, PipelineConfig, RenderPolicy};
use mailcast::mail::{EmlDirSource, MailQuery};
use mailcast::pipeline::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Read API key from environment
    let api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        eprintln!("Error: GEMINI_API_KEY not set");
        eprintln!("  export GEMINI_API_KEY=...");
        std::process::exit(1);
    });

    let eml_dir = std::env::var("MAILCAST_EML_DIR").unwrap_or_else(|_| {
        eprintln!("Error: MAILCAST_EML_DIR not set");
        eprintln!("  export MAILCAST_EML_DIR=./inbox   # directory of .eml files");
        std::process::exit(1);
    });

    let output_dir = std::env::var("MAILCAST_OUT_DIR").unwrap_or_else(|_| "./episodes".to_string());
    let run_id = std::env::var("MAILCAST_RUN_ID")
        .unwrap_or_else(|_| format!("daily-{}", chrono::Utc::now().format("%Y-%m-%d")));

    let text_model =
        std::env::var("MAILCAST_TEXT_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());
    let tts_model = std::env::var("MAILCAST_TTS_MODEL")
        .unwrap_or_else(|_| "gemini-2.5-flash-preview-tts".to_string());

    let target_minutes: u32 = std::env::var("MAILCAST_DURATION_MIN")
        .unwrap_or_else(|_| "30".to_string())
        .parse()
        .unwrap_or(30);

    let concurrency: usize = std::env::var("MAILCAST_CONCURRENCY")
        .unwrap_or_else(|_| "4".to_string())
        .parse()
        .unwrap_or(4);

    let filter_mode = match std::env::var("MAILCAST_FILTER") {
        Ok(criterion) if !criterion.trim().is_empty() => FilterMode::Classify { criterion },
        _ => FilterMode::Passthrough,
    };

    let filter_fallback = match std::env::var("MAILCAST_FILTER_FALLBACK").as_deref() {
        Ok("closed") => FilterFallback::Closed,
        _ => FilterFallback::Open,
    };

    let render_policy = match std::env::var("MAILCAST_RENDER_POLICY").as_deref() {
        Ok("strict") => RenderPolicy::Strict,
        _ => RenderPolicy::BestEffort,
    };

    let video_track = std::env::var("MAILCAST_VIDEO")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);

    let senders: Vec<String> = std::env::var("MAILCAST_SENDERS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    eprintln!("📻 Mailcast v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Run: {}", run_id);
    eprintln!("   Inbox: {}", eml_dir);
    eprintln!("   Output: {}", output_dir);
    eprintln!("   Models: {} / {}", text_model, tts_model);
    eprintln!(
        "   Filter: {}",
        match &filter_mode {
            FilterMode::Passthrough => "passthrough".to_string(),
            FilterMode::Classify { criterion } => format!("classify ({})", criterion),
        }
    );
    eprintln!("   Target: {} min\n", target_minutes);

    let config = PipelineConfig {
        run_id,
        output_dir: output_dir.into(),
        target_minutes,
        concurrency,
        filter_mode,
        filter_fallback,
        render_policy,
        video_track,
        ..PipelineConfig::default()
    };

    let gemini = Arc::new(GeminiClient::new(GeminiConfig {
        api_key: secrecy::SecretString::from(api_key),
        text_model,
        tts_model,
    })?);

    let cache = Arc::new(JsonFileCache::open(
        &config.output_dir.join(&config.run_id).join("cache.json"),
    )?);

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(EmlDirSource::new(eml_dir)),
        gemini.clone(),
        gemini,
        cache,
    );

    // Ctrl-C stops new external calls and lets in-flight work drain.
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling run (in-flight work will drain)...");
            cancel.cancel();
        }
    });

    let query = MailQuery {
        senders,
        ..MailQuery::default()
    };
    let report = orchestrator.run(&query).await?;

    match &report.episode {
        Some(episode) => {
            eprintln!("\n✅ Episode ready: {}", episode.audio_path.display());
            if let Some(video) = &episode.video_path {
                eprintln!("   Speaker track: {}", video.display());
            }
            eprintln!("   Duration: {:.1}s", episode.duration_secs);
            if report.substituted > 0 {
                eprintln!(
                    "   Note: {} segment(s) substituted with silence; rerun to retry them",
                    report.substituted
                );
            }
            Ok(())
        }
        None => {
            for failure in &report.failures {
                eprintln!("   {} / {}: {}", failure.stage, failure.key, failure.reason);
            }
            eprintln!("\n❌ No episode produced ({} failure(s))", report.failures.len());
            std::process::exit(1);
        }
    }
}
