//! # Inzassa Collector
//!
//! Collects articles from francophone African news sites, checks each site's
//! robots.txt, optionally rewrites the text with an LLM, translates it into
//! six languages and stores one multilingual record per article.
//!
//! ## Usage
//!
//! ```sh
//! inzassa_collector --sources sources.yaml run
//! inzassa_collector schedule --cron "0 */2 * * *"
//! inzassa_collector verify
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Policy**: robots.txt is consulted (and cached per domain) before any page is fetched
//! 2. **Extraction**: the page is downloaded and parsed with per-site CSS selectors
//! 3. **Deduplication**: articles already stored under the same source URL are skipped
//! 4. **Rewrite**: optional, through an OpenAI-compatible chat API
//! 5. **Translation**: title, content and summary into fr, en, es, de, it, ar
//! 6. **Persistence**: one record per article in SQLite
//!
//! Items are processed one at a time, with a pause between them.

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod error;
mod extract;
mod models;
mod outputs;
mod pipeline;
mod rewrite;
mod robots;
mod scheduler;
mod store;
mod translate;
mod utils;

use cli::{Cli, Command, ScheduleArgs};
use config::SourceList;
use extract::ContentExtractor;
use pipeline::Pipeline;
use rewrite::RewriteStage;
use robots::RobotsPolicyCache;
use scheduler::{Collector, CronSchedule, run_scheduled, shutdown_signal};
use translate::{LibreTranslate, TranslationFanout};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    let dotenv = dotenvy::dotenv();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Failed to load .env"),
    }

    info!(version = env!("CARGO_PKG_VERSION"), "inzassa_collector starting up");

    let args = Cli::parse();
    debug!(command = ?args.command, sources = %args.sources.display(), "Parsed CLI arguments");

    match &args.command {
        Command::Run => run_once(&args).await,
        Command::Schedule(schedule) => run_daemon(&args, schedule).await,
        Command::Verify(schedule) => verify(&args, schedule).await,
    }
}

/// Everything a run needs, built once.
async fn build(args: &Cli) -> Result<(Pipeline, SourceList), Box<dyn Error>> {
    let sources = SourceList::load(&args.sources).await?;

    let store = match store::connect(&args.database_url).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Failed to connect to article store");
            return Err(e.into());
        }
    };

    let settings = args.pipeline_settings();
    let rewrite = RewriteStage::from_settings(&args.rewrite_settings())?;
    let translator = LibreTranslate::new(
        &args.libretranslate_url,
        args.libretranslate_api_key.clone(),
    )?;
    let fanout = TranslationFanout::new(
        Arc::new(translator),
        args.translation_interval(),
        settings.source_language,
    );

    let pipeline = Pipeline::new(
        Arc::new(RobotsPolicyCache::with_http()?),
        Arc::new(ContentExtractor::new()?),
        rewrite,
        fanout,
        store,
        sources.rules.clone(),
        settings,
    );
    Ok((pipeline, sources))
}

async fn run_once(args: &Cli) -> Result<(), Box<dyn Error>> {
    let start_time = std::time::Instant::now();
    let (pipeline, sources) = build(args).await?;

    if sources.items.is_empty() {
        warn!(path = %args.sources.display(), "Source list is empty; nothing to collect");
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received; finishing current item");
        on_signal.cancel();
    });

    let summary = pipeline.run(&sources.items, &cancel).await;
    let robots = pipeline.robots().stats().await;
    info!(
        robots_cached = robots.size,
        robots_domains = %robots.domains.join(","),
        processed = summary.processed(),
        elapsed_s = start_time.elapsed().as_secs_f64(),
        "Collection finished"
    );
    Ok(())
}

async fn run_daemon(args: &Cli, schedule_args: &ScheduleArgs) -> Result<(), Box<dyn Error>> {
    // Validated before anything else so a bad schedule never starts a run.
    let schedule = CronSchedule::parse(&schedule_args.cron, &schedule_args.timezone)?;
    let (pipeline, sources) = build(args).await?;

    let collector = Arc::new(Collector::new(
        Arc::new(pipeline),
        sources.items,
        CancellationToken::new(),
    ));
    run_scheduled(collector, &schedule, schedule_args.run_on_startup).await
}

/// Configuration and connectivity self-check.
async fn verify(args: &Cli, schedule_args: &ScheduleArgs) -> Result<(), Box<dyn Error>> {
    let mut failures = 0usize;

    match SourceList::load(&args.sources).await {
        Ok(list) => info!(
            items = list.items.len(),
            sites = %list.rules.sites().join(","),
            "check: source list OK"
        ),
        Err(e) => {
            failures += 1;
            error!(error = %e, "check: source list FAILED");
        }
    }

    match CronSchedule::parse(&schedule_args.cron, &schedule_args.timezone) {
        Ok(schedule) => info!(
            schedule = %schedule.expression(),
            timezone = %schedule.timezone(),
            run_on_startup = schedule_args.run_on_startup,
            "check: schedule OK"
        ),
        Err(e) => {
            failures += 1;
            error!(error = %e, "check: schedule FAILED");
        }
    }

    match store::connect(&args.database_url).await {
        Ok(store) => match store.count().await {
            Ok(count) => info!(backend = store.backend(), articles = count, "check: article store OK"),
            Err(e) => {
                failures += 1;
                error!(error = %e, "check: article store FAILED");
            }
        },
        Err(e) => {
            failures += 1;
            error!(error = %e, "check: article store FAILED");
        }
    }

    let translator = LibreTranslate::new(
        &args.libretranslate_url,
        args.libretranslate_api_key.clone(),
    )?;
    match translator.check().await {
        Ok(()) => info!(url = %translator.base_url(), "check: translation service OK"),
        Err(e) => {
            failures += 1;
            error!(url = %translator.base_url(), error = %e, "check: translation service FAILED");
        }
    }

    let status = RewriteStage::from_settings(&args.rewrite_settings())?.status();
    info!(
        enabled = status.enabled,
        configured = status.configured,
        model = %status.model,
        "check: rewrite status"
    );

    if failures > 0 {
        error!(failures, "Verification failed");
        return Err(format!("{failures} verification check(s) failed").into());
    }
    info!("All checks passed");
    Ok(())
}
