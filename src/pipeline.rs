//! Sequential collection run.
//!
//! Each [`SourceItem`] moves through
//!
//! ```text
//! policy check -> fetch/extract -> duplicate check -> rewrite -> translate -> persist
//! ```
//!
//! and ends as exactly one [`ItemOutcome`]. Items never run concurrently;
//! a failing item is counted and the run moves on.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::PipelineSettings;
use crate::error::{ExtractionError, PersistenceError};
use crate::extract::{ArticleSource, RuleBook};
use crate::models::{ItemOutcome, NewArticle, RunSummary, SkipReason, SourceItem};
use crate::outputs::json::write_run_summary;
use crate::rewrite::RewriteStage;
use crate::robots::RobotsPolicyCache;
use crate::store::ArticleStore;
use crate::translate::TranslationFanout;
use crate::utils::truncate_for_log;

pub struct Pipeline {
    robots: Arc<RobotsPolicyCache>,
    source: Arc<dyn ArticleSource>,
    rewrite: RewriteStage,
    translate: TranslationFanout,
    store: Arc<dyn ArticleStore>,
    rules: RuleBook,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        robots: Arc<RobotsPolicyCache>,
        source: Arc<dyn ArticleSource>,
        rewrite: RewriteStage,
        translate: TranslationFanout,
        store: Arc<dyn ArticleStore>,
        rules: RuleBook,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            robots,
            source,
            rewrite,
            translate,
            store,
            rules,
            settings,
        }
    }

    pub fn robots(&self) -> &RobotsPolicyCache {
        &self.robots
    }

    /// Process `items` in order. Stops before the next item once `cancel`
    /// fires and returns the partial summary.
    pub async fn run(&self, items: &[SourceItem], cancel: &CancellationToken) -> RunSummary {
        let t0 = Instant::now();
        let mut summary = RunSummary::new(items.len());
        if self.settings.refresh_robots {
            self.robots.clear().await;
        }
        info!(
            total = items.len(),
            source_language = %self.settings.source_language,
            rewrite = self.rewrite.is_enabled(),
            store = self.store.backend(),
            action = "collection_start",
            "Starting collection run"
        );

        for (i, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    remaining = items.len() - i,
                    action = "collection_cancelled",
                    "Shutdown requested; stopping before next item"
                );
                break;
            }

            let outcome = self.process_item(item).await;
            summary.record(&outcome);

            if i + 1 < items.len() && !self.settings.item_delay.is_zero() {
                tokio::select! {
                    _ = sleep(self.settings.item_delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        summary.finished_at = Utc::now();
        summary.elapsed = t0.elapsed();
        info!(
            total = summary.total,
            success = summary.success,
            skipped = summary.skipped,
            errors = summary.errors,
            elapsed_ms = summary.elapsed.as_millis(),
            action = "collection_summary",
            "Collection run finished"
        );

        if let Some(dir) = &self.settings.report_dir {
            if let Err(e) = write_run_summary(&summary, dir).await {
                warn!(error = %e, "Failed to write run report");
            }
        }

        summary
    }

    /// Run one item to a terminal state. Never returns an error: failures
    /// are carried in the outcome.
    #[instrument(
        level = "info",
        skip_all,
        fields(url = %item.url, site = %item.site_id, country = %item.country, category = %item.category)
    )]
    pub async fn process_item(&self, item: &SourceItem) -> ItemOutcome {
        let outcome = self.advance(item).await;
        match &outcome {
            ItemOutcome::Saved { id } => {
                info!(%id, action = "article_saved", "Article saved");
            }
            ItemOutcome::Skipped(reason) => {
                info!(reason = reason.as_str(), action = "article_skipped", "Article skipped");
            }
            ItemOutcome::Failed(e) => {
                error!(stage = e.stage(), error = %e, action = "article_error", "Failed to process article");
            }
        }
        outcome
    }

    async fn advance(&self, item: &SourceItem) -> ItemOutcome {
        let agent = self.settings.robots_agent.as_str();

        if !self.robots.is_allowed(&item.url, agent).await {
            return ItemOutcome::Skipped(SkipReason::DisallowedByRobots);
        }

        let Some(rules) = self.rules.get(&item.site_id) else {
            return ItemOutcome::Failed(
                ExtractionError::NoRules {
                    site: item.site_id.clone(),
                }
                .into(),
            );
        };

        let delay = self.robots.crawl_delay(&item.url, agent).await;
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let extracted = match self.source.extract(&item.url, &rules).await {
            Ok(article) => article,
            Err(e) => return ItemOutcome::Failed(e),
        };

        match self.store.exists(&item.url).await {
            Ok(true) => return ItemOutcome::Skipped(SkipReason::Duplicate),
            Ok(false) => {}
            Err(e) => return ItemOutcome::Failed(e.into()),
        }

        let rewritten = self.rewrite.rewrite(&extracted.title, &extracted.body).await;
        if rewritten.degraded {
            warn!(
                cause = rewritten.cause.as_deref().unwrap_or_default(),
                "Rewrite degraded to original text"
            );
        }
        let rewritten = rewritten.into_value();

        info!(
            title = %truncate_for_log(&rewritten.title, 60),
            action = "translate_start",
            "Translating article"
        );
        let translated = self
            .translate
            .translate_article(&rewritten.title, &rewritten.body, Some(&rewritten.summary))
            .await;
        if !translated.degraded.is_empty() {
            let languages: Vec<&str> = translated.degraded.iter().map(|l| l.as_str()).collect();
            warn!(
                languages = %languages.join(","),
                "Some languages kept the source text"
            );
        }

        let now = Utc::now();
        let record = NewArticle {
            text: translated.text,
            source_url: item.url.clone(),
            country: item.country,
            category: item.category,
            image_url: extracted.image_url,
            published_at: extracted.published_at.unwrap_or(now),
            scraped_at: now,
            featured: false,
        };

        match self.store.save(record).await {
            Ok(saved) => ItemOutcome::Saved { id: saved.id },
            Err(PersistenceError::Duplicate { .. }) => ItemOutcome::Skipped(SkipReason::Duplicate),
            Err(e) => ItemOutcome::Failed(e.into()),
        }
    }
}
