use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use mail_triage::classify::{Classifier, Classify};
use mail_triage::config::{LoggingConfig, TriageConfig};
use mail_triage::llm::create_provider;
use mail_triage::pipeline::Orchestrator;
use mail_triage::source::{ImapSource, MessageSource};
use mail_triage::store::{StoreConfig, open_store};

#[tokio::main]
async fn main() -> ExitCode {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Warning: a rustls crypto provider was already installed");
    }

    let config = match TriageConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_tracing(&config.logging);
    print_banner(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Stdout logging, plus a daily rolling file when a log directory is set.
fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &logging.log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "mail-triage.log"));
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    guard
}

fn print_banner(config: &TriageConfig) {
    eprintln!("📬 mail-triage v{}", env!("CARGO_PKG_VERSION"));
    match &config.llm {
        Some(llm) => eprintln!("   Model: {} ({})", llm.model, llm.backend.name()),
        None => eprintln!("   Model: disabled (keyword rules only)"),
    }
    eprintln!("   Mailbox: {}@{}/{}", config.imap.username, config.imap.host, config.imap.folder);
    match &config.store {
        StoreConfig::Sheets(sheets) => eprintln!("   Store: Google Sheets {}", sheets.spreadsheet_id),
        StoreConfig::LibSql { path } => eprintln!("   Store: libSQL {}", path.display()),
    }
    eprintln!("   Destination: {}", config.pipeline.destination);
    if config.pipeline.dry_run {
        eprintln!("   Dry run: nothing will be written or marked read");
    }
    if let Some(interval) = config.poll_interval {
        eprintln!("   Polling every {}s (Ctrl+C to stop)", interval.as_secs());
    }
    eprintln!();
}

/// Build the classifier, store and mailbox the orchestrator runs over.
async fn assemble(
    config: &TriageConfig,
    shutdown: Arc<AtomicBool>,
) -> mail_triage::error::Result<(Orchestrator, Arc<ImapSource>)> {
    let taxonomy = Arc::new(config.taxonomy.clone());

    let classifier: Arc<dyn Classify> = match &config.llm {
        Some(llm_config) => Arc::new(Classifier::new(
            create_provider(llm_config)?,
            Arc::clone(&taxonomy),
            config.classifier.clone(),
        )),
        None => {
            warn!("LLM disabled, classifying with keyword rules only");
            Arc::new(Classifier::rules_only(
                Arc::clone(&taxonomy),
                config.classifier.clone(),
            ))
        }
    };

    let store = open_store(&config.store).await?;
    let imap = Arc::new(ImapSource::new(config.imap.clone()));
    let source: Arc<dyn MessageSource> = imap.clone();

    let orchestrator = Orchestrator::new(
        source,
        classifier,
        store,
        taxonomy,
        config.pipeline.clone(),
        shutdown,
    );
    Ok((orchestrator, imap))
}

async fn run(config: TriageConfig) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let (orchestrator, imap) = assemble(&config, Arc::clone(&shutdown))
        .await
        .context("failed to start")?;

    let wake = Arc::new(Notify::new());
    {
        let shutdown = Arc::clone(&shutdown);
        let wake = Arc::clone(&wake);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received, finishing current chunk...");
                shutdown.store(true, Ordering::Relaxed);
                wake.notify_one();
            }
        });
    }

    let outcome = match config.poll_interval {
        None => orchestrator
            .run()
            .await
            .map(|_| ())
            .context("triage run failed"),
        Some(interval) => {
            poll(&orchestrator, interval, &shutdown, &wake).await;
            Ok(())
        }
    };

    imap.disconnect().await;
    outcome
}

/// Repeat runs until shutdown. A failed run is logged and retried next tick.
async fn poll(orchestrator: &Orchestrator, interval: Duration, shutdown: &AtomicBool, wake: &Notify) {
    info!(interval_secs = interval.as_secs(), "Polling mode started");
    loop {
        if let Err(e) = orchestrator.run().await {
            error!(error = %e, "Triage run failed, retrying at next interval");
        }
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wake.notified() => {}
        }
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
    }
    info!("Polling stopped");
}
