//! Startup configuration: the YAML source list and pipeline settings.
//!
//! ```yaml
//! sources:
//!   - url: https://www.seneweb.com/news/Politique/un-article_n_1.html
//!     site: seneweb
//!     country: senegal
//!     category: politique
//! rules:
//!   lesoleil:
//!     title: h1.title
//!     body: [".article-body p"]
//! ```
//!
//! Everything here is checked before the first run; any problem is a
//! [`ConfigError`].

use itertools::Itertools;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::error::ConfigError;
use crate::extract::{ExtractionRules, RuleBook};
use crate::models::{Language, SourceItem};
use crate::robots::BOT_NAME;

pub const DEFAULT_ITEM_DELAY_MS: u64 = 3000;
pub const DEFAULT_TRANSLATION_INTERVAL_MS: u64 = 500;

#[derive(Debug, Default, Deserialize)]
struct SourceFile {
    #[serde(default)]
    sources: Vec<SourceItem>,
    #[serde(default)]
    rules: HashMap<String, ExtractionRules>,
}

/// Validated items plus the rules needed to extract them.
#[derive(Debug, Clone)]
pub struct SourceList {
    pub items: Vec<SourceItem>,
    pub rules: RuleBook,
}

impl SourceList {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::SourceFile {
                path: path.display().to_string(),
                source,
            })?;
        let list = Self::from_yaml(&text)?;
        info!(
            path = %path.display(),
            items = list.items.len(),
            sites = list.rules.sites().len(),
            "Loaded source list"
        );
        Ok(list)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let file: SourceFile = if text.trim().is_empty() {
            SourceFile::default()
        } else {
            serde_yaml::from_str(text)?
        };

        let rules = RuleBook::with_overrides(&file.rules)?;

        let before = file.sources.len();
        let items: Vec<SourceItem> = file
            .sources
            .into_iter()
            .unique_by(|item| item.url.clone())
            .collect();
        if items.len() < before {
            warn!(
                dropped = before - items.len(),
                "Duplicate source URLs in source list; keeping the first occurrence"
            );
        }

        for item in &items {
            validate_item(item, &rules)?;
        }

        Ok(Self { items, rules })
    }
}

fn validate_item(item: &SourceItem, rules: &RuleBook) -> Result<(), ConfigError> {
    let url = Url::parse(&item.url).map_err(|e| ConfigError::SourceUrl {
        url: item.url.clone(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::SourceUrl {
            url: item.url.clone(),
            reason: format!("unsupported scheme `{}`", url.scheme()),
        });
    }
    if url.host_str().is_none() {
        return Err(ConfigError::SourceUrl {
            url: item.url.clone(),
            reason: "missing host".to_string(),
        });
    }
    if rules.get(&item.site_id).is_none() {
        return Err(ConfigError::UnknownSite {
            url: item.url.clone(),
            site: item.site_id.clone(),
        });
    }
    Ok(())
}

/// Orchestrator knobs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Wait after every item, whatever its outcome.
    pub item_delay: Duration,
    pub source_language: Language,
    /// Agent name matched against robots.txt groups.
    pub robots_agent: String,
    /// Drop cached robots.txt policies at the start of every run.
    pub refresh_robots: bool,
    /// Directory for the JSON run report, if any.
    pub report_dir: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            item_delay: Duration::from_millis(DEFAULT_ITEM_DELAY_MS),
            source_language: Language::Fr,
            robots_agent: BOT_NAME.to_string(),
            refresh_robots: false,
            report_dir: None,
        }
    }
}

/// `--source-language` parser.
pub fn parse_language(value: &str) -> Result<Language, ConfigError> {
    value
        .trim()
        .to_ascii_lowercase()
        .parse()
        .map_err(|_| ConfigError::Invalid {
            field: "source language",
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Country};

    const SOURCES: &str = r#"
sources:
  - url: https://www.seneweb.com/news/a.html
    site: seneweb
    country: senegal
    category: politique
  - url: https://www.malijet.com/b.html
    site: malijet
    country: mali
    category: economie
  - url: https://www.seneweb.com/news/a.html
    site: seneweb
    country: senegal
    category: politique
"#;

    #[test]
    fn test_load_dedupes_by_url() {
        let list = SourceList::from_yaml(SOURCES).unwrap();
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].country, Country::Senegal);
        assert_eq!(list.items[1].category, Category::Economie);
    }

    #[test]
    fn test_empty_file_is_an_empty_list() {
        let list = SourceList::from_yaml("").unwrap();
        assert!(list.items.is_empty());
        assert!(list.rules.get("seneweb").is_some());
    }

    #[test]
    fn test_unknown_site_is_rejected() {
        let yaml = r#"
sources:
  - url: https://x.test/a
    site: nowhere
    country: senegal
    category: societe
"#;
        let err = SourceList::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSite { .. }));
    }

    #[test]
    fn test_custom_rules_make_site_known() {
        let yaml = r#"
sources:
  - url: https://x.test/a
    site: xtest
    country: togo
    category: sport
rules:
  xtest:
    title: h1
    body: ["article p"]
"#;
        let list = SourceList::from_yaml(yaml).unwrap();
        assert!(list.rules.get("xtest").is_some());
        assert_eq!(list.items[0].site_id, "xtest");
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let yaml = r#"
rules:
  broken:
    title: "h1[["
    body: ["p"]
"#;
        let err = SourceList::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Selector { .. }));
    }

    #[test]
    fn test_bad_urls_are_rejected() {
        let yaml = r#"
sources:
  - url: ftp://x.test/a
    site: seneweb
    country: senegal
    category: societe
"#;
        assert!(matches!(
            SourceList::from_yaml(yaml).unwrap_err(),
            ConfigError::SourceUrl { .. }
        ));

        let yaml = yaml.replace("ftp://x.test/a", "not a url");
        assert!(matches!(
            SourceList::from_yaml(&yaml).unwrap_err(),
            ConfigError::SourceUrl { .. }
        ));
    }

    #[test]
    fn test_unknown_country_is_a_format_error() {
        let yaml = r#"
sources:
  - url: https://x.test/a
    site: seneweb
    country: atlantis
    category: societe
"#;
        assert!(matches!(
            SourceList::from_yaml(yaml).unwrap_err(),
            ConfigError::SourceFormat(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = SourceList::load(Path::new("/nonexistent/sources.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::SourceFile { .. }));
    }

    #[test]
    fn test_parse_language() {
        assert_eq!(parse_language("FR").unwrap(), Language::Fr);
        assert_eq!(parse_language("ar").unwrap(), Language::Ar);
        assert!(parse_language("xx").is_err());
    }

    #[test]
    fn test_default_settings() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.item_delay, Duration::from_millis(3000));
        assert_eq!(settings.source_language, Language::Fr);
        assert_eq!(settings.robots_agent, "InzassaBot");
        assert!(!settings.refresh_robots);
    }
}
