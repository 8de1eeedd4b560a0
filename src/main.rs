//! Memory Context Agent CLI
//!
//! Watches the screen and keeps a running summary of what you are doing.

use anyhow::Context as _;
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use memory_context_agent::{
    analysis::{select_provider, Analyzer, Credentials, ProviderKind},
    capture::{CommandSource, DirectorySource, ScreenSource},
    config::Config,
    context::{ContextAggregator, ContextStore, CycleOutcome},
    core::{ContextState, KeyEvent},
    extraction::{TesseractRecognizer, TextHistory},
    session::{collect_key_events, load_sessions, write_key_events, write_session, ExportFormat},
    transparency::{create_shared_log, create_shared_log_with_persistence},
    Pipeline, PRIVACY_DECLARATION, VERSION,
};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "server")]
use memory_context_agent::server::{self, ServerConfig, ServerState};

const DEFAULT_LOG_FILTER: &str = "memory_context_agent=info";

#[derive(Parser)]
#[command(name = "memory-context")]
#[command(version = VERSION)]
#[command(about = "Remembers what was on your screen so you don't have to", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start watching the screen
    Start {
        /// Capture rate in frames per second
        #[arg(long)]
        fps: Option<f64>,

        /// Preferred analysis provider (gemini, groq or openai)
        #[arg(long)]
        provider: Option<ProviderKind>,

        /// Screenshot command writing one PNG to stdout, e.g. "grim -"
        #[arg(long)]
        capture_command: Option<String>,

        /// Replay screenshots from a directory instead of capturing
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Serve the context over HTTP on this port (requires server feature)
        #[arg(long)]
        serve: Option<u16>,
    },

    /// Show configuration and the last session
    Status,

    /// Display privacy declaration
    Privacy,

    /// Analyze text once and print the resulting context
    Analyze {
        /// Text to analyze; read from stdin when omitted
        text: Option<String>,

        /// Preferred analysis provider (gemini, groq or openai)
        #[arg(long)]
        provider: Option<ProviderKind>,
    },

    /// Export key events from saved sessions
    Export {
        /// Directory holding session files
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Export format (json or jsonl)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            fps,
            provider,
            capture_command,
            replay,
            serve,
        } => cmd_start(fps, provider, capture_command, replay, serve).await,
        Commands::Status => {
            cmd_status();
            Ok(())
        }
        Commands::Privacy => {
            cmd_privacy();
            Ok(())
        }
        Commands::Analyze { text, provider } => cmd_analyze(text, provider).await,
        Commands::Export { output, format } => cmd_export(output, &format),
        Commands::Config => {
            cmd_config();
            Ok(())
        }
    }
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config ({e}), using defaults");
        Config::default()
    })
}

/// `--provider`, else `LLM_PROVIDER`, else the configured provider.
fn apply_provider_override(config: &mut Config, provider: Option<ProviderKind>) {
    if let Some(kind) = provider {
        config.analysis.provider = kind;
        return;
    }

    if let Ok(name) = std::env::var("LLM_PROVIDER") {
        match name.parse() {
            Ok(kind) => config.analysis.provider = kind,
            Err(e) => eprintln!("Warning: Ignoring LLM_PROVIDER: {e}"),
        }
    }
}

/// The first usable provider, or `None` with a warning.
fn build_analyzer(config: &Config) -> Option<Arc<dyn Analyzer>> {
    match select_provider(
        &config.provider_order(),
        &Credentials::from_env(),
        &config.provider_settings(),
    ) {
        Ok(provider) => {
            println!("  Analysis: {} ({})", provider.kind(), provider.model());
            Some(Arc::new(provider))
        }
        Err(e) => {
            eprintln!("Warning: {e}");
            eprintln!("Set GEMINI_API_KEY, GROQ_API_KEY or OPENAI_API_KEY to enable analysis.");
            None
        }
    }
}

async fn cmd_start(
    fps: Option<f64>,
    provider: Option<ProviderKind>,
    capture_command: Option<String>,
    replay: Option<PathBuf>,
    serve: Option<u16>,
) -> anyhow::Result<()> {
    println!("Memory Context Agent v{VERSION}");
    println!();

    let mut config = load_config();
    if let Some(fps) = fps {
        config.capture.fps = fps;
    }
    if let Some(command) = capture_command {
        config.capture.command = command.split_whitespace().map(str::to_string).collect();
    }
    apply_provider_override(&mut config, provider);
    config.validate()?;

    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let source: Arc<dyn ScreenSource> = match &replay {
        Some(dir) => Arc::new(
            DirectorySource::open(dir).with_context(|| format!("cannot replay from {dir:?}"))?,
        ),
        None => Arc::new(CommandSource::from_argv(&config.capture.command)?),
    };

    println!("Starting capture...");
    println!("  Source: {}", source.name());
    println!(
        "  Capture: {} FPS, keeping {} frames",
        config.capture.fps,
        config.frame_capacity()
    );
    println!(
        "  OCR: every {} frames, at most once per {:?}",
        config.extraction.every_nth_frame, config.extraction.min_interval
    );
    let analyzer = build_analyzer(&config);

    let recognizer = Arc::new(TesseractRecognizer::new(&config.extraction.language));
    let log = create_shared_log_with_persistence(config.stats_path());
    let mut pipeline = Pipeline::new(&config, source, recognizer, analyzer, Arc::clone(&log))?;
    pipeline.start();

    #[cfg(feature = "server")]
    let server_shutdown = match serve {
        Some(port) => {
            let (addr, shutdown) =
                server::run(ServerConfig::new(port), ServerState::from_pipeline(&pipeline)).await?;
            println!("  Serving context on http://{addr}");
            Some(shutdown)
        }
        None => None,
    };
    #[cfg(not(feature = "server"))]
    if serve.is_some() {
        eprintln!("Warning: --serve flag ignored (server feature not enabled at compile time)");
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || signal.cancel()).context("Error setting Ctrl+C handler")?;

    let mut shown = ContextState::default();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.poll_interval) => {}
        }

        let current = pipeline.snapshot();
        print_changes(&shown, &current);
        shown = current;
    }

    println!();
    println!("Stopping...");

    #[cfg(feature = "server")]
    if let Some(shutdown) = server_shutdown {
        let _ = shutdown.send(());
    }

    pipeline.stop().await;

    if let Err(e) = log.save() {
        eprintln!("Warning: Could not save transparency stats: {e}");
    }

    let record = pipeline.session_record();
    match write_session(&config.export_path, &record) {
        Ok(path) => println!("Saved session to {path:?}"),
        Err(e) => eprintln!("Error writing session: {e}"),
    }

    let latest = pipeline
        .store()
        .latest_key_events(config.key_events_display_count);
    if !latest.is_empty() {
        println!();
        println!("Latest key events:");
        for event in &latest {
            println!("  {}", format_key_event(event));
        }
    }

    let stats = &record.stats;
    println!();
    println!("Run Statistics:");
    println!("  Frames captured: {}", stats.frames_captured);
    println!("  Text extractions: {}", stats.extractions);
    println!("  Text entries held: {}", stats.text_entries);
    println!("  Key events: {}", stats.key_events);
    println!();
    println!("{}", log.summary());

    Ok(())
}

/// Print what changed between two snapshots of the context.
fn print_changes(before: &ContextState, after: &ContextState) {
    if before.activity != after.activity || before.application != after.application {
        println!(
            "[{}] {} ({})",
            Local::now().format("%H:%M:%S"),
            after.activity,
            after.application
        );
    }

    for event in after
        .key_events
        .iter()
        .filter(|e| !before.key_events.contains(e))
    {
        println!("    {}", format_key_event(event));
    }
}

fn format_key_event(event: &KeyEvent) -> String {
    let time = event.timestamp.with_timezone(&Local).format("%H:%M:%S");
    if event.context.is_empty() {
        format!("{time} {}: {}", event.kind, event.value)
    } else {
        format!("{time} {}: {} ({})", event.kind, event.value, event.context)
    }
}

fn cmd_status() {
    let config = load_config();

    println!("Memory Context Agent Status");
    println!("===========================");
    println!();

    println!("Configuration:");
    println!("  Capture: {} FPS via {:?}", config.capture.fps, config.capture.command);
    println!(
        "  OCR: every {} frames, at most once per {:?}",
        config.extraction.every_nth_frame, config.extraction.min_interval
    );
    println!(
        "  Analysis: every {:?} with {} (fallbacks: {:?})",
        config.analysis.interval, config.analysis.provider, config.analysis.fallbacks
    );
    let available = Credentials::from_env().available();
    println!("  API keys found: {available:?}");
    println!();

    let stats_path = config.stats_path();
    if let Ok(content) = std::fs::read_to_string(&stats_path) {
        if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
            println!("Cumulative Statistics:");
            for key in [
                "frames_captured",
                "extractions",
                "analyses_completed",
                "key_events_recorded",
            ] {
                if let Some(value) = stats.get(key) {
                    println!("  {}: {value}", key.replace('_', " "));
                }
            }
            println!();
        }
    }

    match load_sessions(&config.export_path).last() {
        Some(session) => {
            println!(
                "Last session (ended {}):",
                session.ended_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
            );
            println!("  Activity: {}", session.state.activity);
            println!("  Application: {}", session.state.application);
            let events = &session.state.key_events;
            if !events.is_empty() {
                println!("  Key events:");
                for event in events.iter().rev().take(config.key_events_display_count) {
                    println!("    {}", format_key_event(event));
                }
            }
        }
        None => println!("No previous session data found."),
    }
}

fn cmd_privacy() {
    println!("{PRIVACY_DECLARATION}");
}

async fn cmd_analyze(text: Option<String>, provider: Option<ProviderKind>) -> anyhow::Result<()> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read text from stdin")?;
            buffer
        }
    };

    let mut config = load_config();
    apply_provider_override(&mut config, provider);
    config.validate()?;

    let provider = select_provider(
        &config.provider_order(),
        &Credentials::from_env(),
        &config.provider_settings(),
    )?;

    let store = Arc::new(ContextStore::new(config.analysis.key_event_capacity));
    let aggregator = ContextAggregator::new(
        Some(Arc::new(provider)),
        TextHistory::new(1),
        Arc::clone(&store),
        config.aggregator_settings(),
        create_shared_log(),
    );

    match aggregator.force_analyze(&text).await {
        CycleOutcome::Merged(_) => {
            println!("{}", serde_json::to_string_pretty(&store.get_snapshot())?);
            Ok(())
        }
        CycleOutcome::Skipped(cause) => anyhow::bail!("nothing analyzed: {cause:?}"),
        CycleOutcome::Abandoned(e) => Err(e.into()),
    }
}

fn cmd_export(output: Option<PathBuf>, format: &str) -> anyhow::Result<()> {
    let format: ExportFormat = format.parse().map_err(anyhow::Error::msg)?;
    let config = load_config();
    let export_dir = output.unwrap_or(config.export_path.clone());

    let sessions = load_sessions(&export_dir);
    if sessions.is_empty() {
        println!("No session data found in {export_dir:?}");
        println!("Run 'memory-context start' to begin collecting data.");
        return Ok(());
    }

    println!("Found {} session(s) in {:?}", sessions.len(), export_dir);

    let events = collect_key_events(&sessions);
    println!("Total key events: {}", events.len());

    let output_path = export_dir.join(format!(
        "key_events_{}.{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    ));
    write_key_events(&output_path, &events, format)
        .with_context(|| format!("error writing {output_path:?}"))?;

    println!("Exported to {output_path:?}");
    Ok(())
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}
