//! Command-line interface definitions for the collector.
//!
//! All options can be provided via command-line flags or environment
//! variables (a `.env` file is loaded first).

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    DEFAULT_ITEM_DELAY_MS, DEFAULT_TRANSLATION_INTERVAL_MS, PipelineSettings, parse_language,
};
use crate::models::Language;
use crate::rewrite::RewriteSettings;
use crate::robots::BOT_NAME;
use crate::scheduler::{DEFAULT_CRON, DEFAULT_TIMEZONE};
use crate::translate::DEFAULT_LIBRETRANSLATE_URL;

/// Command-line arguments for the collector.
///
/// # Examples
///
/// ```sh
/// # One pass over the source list, then exit
/// inzassa_collector --sources sources.yaml run
///
/// # Daemon: every two hours, Dakar time
/// inzassa_collector schedule --cron "0 */2 * * *" --timezone Africa/Dakar
///
/// # Check configuration and connectivity
/// inzassa_collector verify
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// YAML source list
    #[arg(short, long, env = "SOURCES_FILE", default_value = "sources.yaml", global = true)]
    pub sources: PathBuf,

    /// Article store: a SQLite URL, or `memory://` for a dry run
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://inzassa.db", global = true)]
    pub database_url: String,

    /// Rewrite articles through the chat provider before translating
    #[arg(long, env = "REFORMULATION_ENABLED", global = true)]
    pub reformulation_enabled: bool,

    /// API key for the chat provider
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub openai_api_key: Option<String>,

    /// Chat model used for rewriting
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-3.5-turbo", global = true)]
    pub openai_model: String,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1", global = true)]
    pub openai_base_url: String,

    /// LibreTranslate instance
    #[arg(long, env = "LIBRETRANSLATE_URL", default_value = DEFAULT_LIBRETRANSLATE_URL, global = true)]
    pub libretranslate_url: String,

    /// LibreTranslate API key, if the instance requires one
    #[arg(long, env = "LIBRETRANSLATE_API_KEY", hide_env_values = true, global = true)]
    pub libretranslate_api_key: Option<String>,

    /// Pause after each item, in milliseconds
    #[arg(long, env = "ITEM_DELAY_MS", default_value_t = DEFAULT_ITEM_DELAY_MS, global = true)]
    pub item_delay_ms: u64,

    /// Minimum spacing between translation calls, in milliseconds
    #[arg(long, env = "TRANSLATION_INTERVAL_MS", default_value_t = DEFAULT_TRANSLATION_INTERVAL_MS, global = true)]
    pub translation_interval_ms: u64,

    /// Language the sources are written in
    #[arg(long, env = "SOURCE_LANGUAGE", default_value = "fr", value_parser = parse_language, global = true)]
    pub source_language: Language,

    /// Re-read every site's robots.txt at the start of each run
    #[arg(long, env = "REFRESH_ROBOTS", global = true)]
    pub refresh_robots: bool,

    /// Write a JSON report of each run into this directory
    #[arg(long, env = "REPORT_DIR", global = true)]
    pub report_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Process the source list once, then exit
    Run,

    /// Process the source list on a cron schedule until interrupted
    Schedule(ScheduleArgs),

    /// Check configuration and connectivity, then exit
    Verify(ScheduleArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ScheduleArgs {
    /// Cron expression (5 fields, or 6/7 with seconds)
    #[arg(long, env = "CRON_SCHEDULE", default_value = DEFAULT_CRON)]
    pub cron: String,

    /// IANA timezone the schedule is evaluated in
    #[arg(long, env = "TIMEZONE", default_value = DEFAULT_TIMEZONE)]
    pub timezone: String,

    /// Run once immediately at startup
    #[arg(long, env = "RUN_ON_STARTUP", default_value_t = true, action = ArgAction::Set)]
    pub run_on_startup: bool,
}

impl Cli {
    pub fn rewrite_settings(&self) -> RewriteSettings {
        RewriteSettings {
            enabled: self.reformulation_enabled,
            api_key: self.openai_api_key.clone(),
            model: self.openai_model.clone(),
            base_url: self.openai_base_url.clone(),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            item_delay: Duration::from_millis(self.item_delay_ms),
            source_language: self.source_language,
            robots_agent: BOT_NAME.to_string(),
            refresh_robots: self.refresh_robots,
            report_dir: self.report_dir.clone(),
        }
    }

    pub fn translation_interval(&self) -> Duration {
        Duration::from_millis(self.translation_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "inzassa_collector",
            "--sources",
            "./sources.yaml",
            "--database-url",
            "memory://",
            "run",
        ]);

        assert_eq!(cli.command, Command::Run);
        assert_eq!(cli.sources, PathBuf::from("./sources.yaml"));
        assert_eq!(cli.database_url, "memory://");
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "inzassa_collector",
            "run",
            "-s",
            "/tmp/sources.yaml",
            "--item-delay-ms",
            "0",
            "--source-language",
            "en",
            "--refresh-robots",
        ]);

        assert_eq!(cli.sources, PathBuf::from("/tmp/sources.yaml"));
        let settings = cli.pipeline_settings();
        assert_eq!(settings.item_delay, Duration::ZERO);
        assert_eq!(settings.source_language, Language::En);
        assert!(settings.refresh_robots);
    }

    #[test]
    fn test_schedule_arguments() {
        let cli = Cli::parse_from([
            "inzassa_collector",
            "schedule",
            "--cron",
            "*/30 * * * *",
            "--timezone",
            "Africa/Abidjan",
            "--run-on-startup",
            "false",
        ]);

        assert_eq!(
            cli.command,
            Command::Schedule(ScheduleArgs {
                cron: "*/30 * * * *".to_string(),
                timezone: "Africa/Abidjan".to_string(),
                run_on_startup: false,
            })
        );
    }

    #[test]
    fn test_rewrite_settings() {
        let cli = Cli::parse_from([
            "inzassa_collector",
            "--reformulation-enabled",
            "--openai-api-key",
            "sk-test",
            "--openai-model",
            "gpt-4o-mini",
            "verify",
        ]);

        assert!(matches!(cli.command, Command::Verify(_)));
        let settings = cli.rewrite_settings();
        assert!(settings.enabled);
        assert_eq!(settings.api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.model, "gpt-4o-mini");
    }

    #[test]
    fn test_invalid_language_is_rejected() {
        let result = Cli::try_parse_from(["inzassa_collector", "--source-language", "xx", "run"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["inzassa_collector"]).is_err());
    }
}
