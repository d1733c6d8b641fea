//! Article extraction driven by per-site CSS selector rules.
//!
//! Each source site gets an [`ExtractionRules`] entry naming where the title,
//! body paragraphs, lead image and publication date live in its HTML. Rules
//! are compiled once into a [`RuleBook`] at startup so a bad selector is a
//! configuration error rather than a per-item failure.
//!
//! # Field semantics
//!
//! | Field | Source | Missing |
//! |-------|--------|---------|
//! | title | first matching node, trimmed text | fatal [`ExtractionError::MissingTitle`] |
//! | body | every matching node, joined by a blank line | fatal [`ExtractionError::MissingBody`] |
//! | image | first match's `src` / `data-src`, resolved against the page | `None` |
//! | date | first match's `datetime` / `content` attribute or text | `None` |

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::{ConfigError, ExtractionError, FetchError, ItemError};
use crate::models::ExtractedArticle;
use crate::utils::truncate_for_log;

const PAGE_TIMEOUT: Duration = Duration::from_secs(10);

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Selector rules for one site, as written in the source list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExtractionRules {
    pub title: String,
    /// One or more selectors; every match contributes a paragraph.
    pub body: Vec<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

impl ExtractionRules {
    fn new(title: &str, body: &[&str], image: Option<&str>, date: Option<&str>) -> Self {
        Self {
            title: title.to_string(),
            body: body.iter().map(|s| s.to_string()).collect(),
            image: image.map(str::to_string),
            date: date.map(str::to_string),
        }
    }

    /// Compile every selector, naming the site on failure.
    pub fn compile(&self, site: &str) -> Result<CompiledRules, ConfigError> {
        let parse = |selector: &str| {
            Selector::parse(selector).map_err(|_| ConfigError::Selector {
                site: site.to_string(),
                selector: selector.to_string(),
            })
        };

        if self.body.is_empty() {
            return Err(ConfigError::Selector {
                site: site.to_string(),
                selector: "<no body selector>".to_string(),
            });
        }

        Ok(CompiledRules {
            title: parse(&self.title)?,
            body: self.body.iter().map(|s| parse(s)).collect::<Result<_, _>>()?,
            image: self.image.as_deref().map(parse).transpose()?,
            date: self.date.as_deref().map(parse).transpose()?,
        })
    }
}

/// Parsed selectors ready for use on a document.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    title: Selector,
    body: Vec<Selector>,
    image: Option<Selector>,
    date: Option<Selector>,
}

/// Rules shipped with the collector for the sites it was built around.
static BUILTIN_RULES: Lazy<Vec<(&'static str, ExtractionRules)>> = Lazy::new(|| {
    vec![
        (
            "seneweb",
            ExtractionRules::new(
                "h1.article-title, h1.entry-title, .article-header h1",
                &[".article-content p, .entry-content p, .article-body p"],
                Some(".article-image img, .entry-image img, .featured-image img"),
                Some(".article-date, .entry-date, .published-date"),
            ),
        ),
        (
            "dakaractu",
            ExtractionRules::new(
                "h1.title, h1.article-title",
                &[".content p, .article-content p"],
                Some(".featured-image img, .article-img img"),
                Some(".date, .article-date"),
            ),
        ),
        (
            "camerounweb",
            ExtractionRules::new(
                "h1.article-title, .news-title h1",
                &[".article-body p, .news-content p"],
                Some(".article-image img"),
                Some(".article-date"),
            ),
        ),
        (
            "abidjannet",
            ExtractionRules::new(
                "h1, .article-title",
                &[".article-content p, .news-body p"],
                Some(".article-img img"),
                Some(".date-published"),
            ),
        ),
        (
            "malijet",
            ExtractionRules::new(
                "h1.entry-title, h1.article-title",
                &[".entry-content p, .article-text p"],
                Some(".entry-image img"),
                Some(".entry-date"),
            ),
        ),
    ]
});

/// Compiled rules by site id.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    rules: HashMap<String, Arc<CompiledRules>>,
}

impl RuleBook {
    /// Built-in rules, with `custom` entries added or replacing them.
    pub fn with_overrides(custom: &HashMap<String, ExtractionRules>) -> Result<Self, ConfigError> {
        let mut book = Self::default();
        for (site, rules) in BUILTIN_RULES.iter() {
            if !custom.contains_key(*site) {
                book.insert(site, rules)?;
            }
        }
        for (site, rules) in custom {
            book.insert(site, rules)?;
        }
        Ok(book)
    }

    pub fn insert(&mut self, site: &str, rules: &ExtractionRules) -> Result<(), ConfigError> {
        let compiled = rules.compile(site)?;
        self.rules.insert(site.to_string(), Arc::new(compiled));
        Ok(())
    }

    pub fn get(&self, site: &str) -> Option<Arc<CompiledRules>> {
        self.rules.get(site).cloned()
    }

    pub fn sites(&self) -> Vec<&str> {
        let mut sites: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        sites.sort_unstable();
        sites
    }
}

/// Fetches a page and turns it into an [`ExtractedArticle`].
#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn extract(&self, url: &str, rules: &CompiledRules) -> Result<ExtractedArticle, ItemError>;
}

/// HTTP extractor with browser-like headers and a 10 second timeout.
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    client: reqwest::Client,
}

impl ContentExtractor {
    pub fn new() -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(PAGE_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::new(url, e))?;
        let response = response
            .error_for_status()
            .map_err(|e| FetchError::new(url, e))?;
        response.text().await.map_err(|e| FetchError::new(url, e))
    }
}

#[async_trait]
impl ArticleSource for ContentExtractor {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn extract(&self, url: &str, rules: &CompiledRules) -> Result<ExtractedArticle, ItemError> {
        let html = self.fetch_html(url).await?;
        let article = parse_article(&html, url, rules)?;
        info!(
            title = %truncate_for_log(&article.title, 60),
            content_length = article.body.len(),
            action = "scrape_success",
            "Scraping successful"
        );
        Ok(article)
    }
}

fn node_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Apply `rules` to an HTML document fetched from `page_url`.
pub fn parse_article(
    html: &str,
    page_url: &str,
    rules: &CompiledRules,
) -> Result<ExtractedArticle, ExtractionError> {
    let document = Html::parse_document(html);

    let title = document
        .select(&rules.title)
        .next()
        .map(node_text)
        .unwrap_or_default();
    if title.is_empty() {
        return Err(ExtractionError::MissingTitle {
            url: page_url.to_string(),
        });
    }

    let mut seen = HashSet::new();
    let mut paragraphs = Vec::new();
    for selector in &rules.body {
        for element in document.select(selector) {
            if !seen.insert(element.id()) {
                continue;
            }
            let text = node_text(element);
            if !text.is_empty() {
                paragraphs.push(text);
            }
        }
    }
    let body = paragraphs.join("\n\n");
    if body.is_empty() {
        return Err(ExtractionError::MissingBody {
            url: page_url.to_string(),
        });
    }

    let image_url = rules.image.as_ref().and_then(|selector| {
        let element = document.select(selector).next()?;
        let src = element
            .value()
            .attr("src")
            .or_else(|| element.value().attr("data-src"))?
            .trim();
        resolve_url(page_url, src)
    });

    let published_at = rules.date.as_ref().and_then(|selector| {
        let element = document.select(selector).next()?;
        let raw = element
            .value()
            .attr("datetime")
            .or_else(|| element.value().attr("content"))
            .map(str::to_string)
            .unwrap_or_else(|| node_text(element));
        let parsed = parse_date(&raw);
        if parsed.is_none() && !raw.is_empty() {
            debug!(date_text = %raw, "Ignoring unparsable publish date");
        }
        parsed
    });

    Ok(ExtractedArticle {
        title,
        body,
        image_url,
        published_at,
        source_url: page_url.to_string(),
    })
}

fn resolve_url(page_url: &str, src: &str) -> Option<String> {
    if src.is_empty() {
        return None;
    }
    if let Ok(absolute) = Url::parse(src) {
        return Some(absolute.to_string());
    }
    Url::parse(page_url)
        .ok()?
        .join(src)
        .ok()
        .map(|u| u.to_string())
}

static NUMERIC_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4})(?:\D{1,5}(\d{1,2})[:hH](\d{2}))?")
        .expect("numeric date pattern")
});

static FRENCH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d{1,2})(?:er)?\s+(janvier|f[ée]vrier|mars|avril|mai|juin|juillet|ao[uû]t|septembre|octobre|novembre|d[ée]cembre)\s+(\d{4})(?:\D{1,5}(\d{1,2})[:hH](\d{2}))?")
        .expect("french date pattern")
});

fn french_month(name: &str) -> Option<u32> {
    let name = name.to_lowercase();
    let month = match name.as_str() {
        "janvier" => 1,
        "février" | "fevrier" => 2,
        "mars" => 3,
        "avril" => 4,
        "mai" => 5,
        "juin" => 6,
        "juillet" => 7,
        "août" | "aout" => 8,
        "septembre" => 9,
        "octobre" => 10,
        "novembre" => 11,
        "décembre" | "decembre" => 12,
        _ => return None,
    };
    Some(month)
}

/// Best-effort publish date parsing. Times without an offset are read as UTC.
///
/// Accepts RFC 3339, RFC 2822, ISO dates with optional time, day-first numeric
/// dates (`25/03/2024`, `25-03-2024 14h30`) and French long dates
/// (`1er mars 2024`).
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    let (day, month, year, hour, minute) = if let Some(caps) = NUMERIC_DATE.captures(text) {
        (
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
            caps.get(4).and_then(|m| m.as_str().parse().ok()),
            caps.get(5).and_then(|m| m.as_str().parse().ok()),
        )
    } else if let Some(caps) = FRENCH_DATE.captures(text) {
        (
            caps[1].parse().ok()?,
            french_month(&caps[2])?,
            caps[3].parse().ok()?,
            caps.get(4).and_then(|m| m.as_str().parse().ok()),
            caps.get(5).and_then(|m| m.as_str().parse().ok()),
        )
    } else {
        return None;
    };

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = date.and_hms_opt(hour.unwrap_or(0), minute.unwrap_or(0), 0)?;
    Some(time.and_utc())
}
