//! Translation of article text into every supported [`Language`].
//!
//! Each `(text, target)` pair is one provider call. A failed call never
//! affects the other languages: its entry falls back to the source text and
//! is marked degraded.

use async_trait::async_trait;
use futures::future::join3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::error::ProviderError;
use crate::models::{Language, Localized, LocalizedArticle, Outcome};
use crate::utils::{summarize, truncate_for_log};

pub const DEFAULT_LIBRETRANSLATE_URL: &str = "https://libretranslate.com";
const TRANSLATE_TIMEOUT: Duration = Duration::from_secs(30);

/// One text, one language pair.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source: Language,
        target: Language,
    ) -> Result<String, ProviderError>;
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'static str,
    target: &'static str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: Option<String>,
}

/// LibreTranslate HTTP client (public instance or self-hosted).
#[derive(Debug, Clone)]
pub struct LibreTranslate {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl LibreTranslate {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(TRANSLATE_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the service answers `GET /languages`.
    pub async fn check(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/languages", self.base_url))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProviderError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

#[async_trait]
impl Translator for LibreTranslate {
    async fn translate(
        &self,
        text: &str,
        source: Language,
        target: Language,
    ) -> Result<String, ProviderError> {
        let request = TranslateRequest {
            q: text,
            source: source.as_str(),
            target: target.as_str(),
            format: "text",
            api_key: self.api_key.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/translate", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: TranslateResponse = response.json().await?;
        parsed
            .translated_text
            .filter(|t| !t.trim().is_empty())
            .ok_or(ProviderError::MissingField {
                field: "translatedText",
            })
    }
}

/// Article text in every language, plus the languages that fell back to the
/// source text for at least one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedArticle {
    pub text: LocalizedArticle,
    pub degraded: Vec<Language>,
}

pub struct TranslationFanout {
    translator: Arc<dyn Translator>,
    /// Minimum spacing between two sequential provider calls.
    interval: Duration,
    source: Language,
}

impl std::fmt::Debug for TranslationFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationFanout")
            .field("interval", &self.interval)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl TranslationFanout {
    pub fn new(translator: Arc<dyn Translator>, interval: Duration, source: Language) -> Self {
        Self {
            translator,
            interval,
            source,
        }
    }

    /// Translate one text. Identity when `target == source`; the source text
    /// as a degraded outcome when the provider fails.
    pub async fn translate_text(
        &self,
        text: &str,
        target: Language,
        source: Language,
    ) -> Outcome<String> {
        if target == source {
            return Outcome::ok(text.to_string());
        }

        match self.translator.translate(text, source, target).await {
            Ok(translated) => Outcome::ok(translated),
            Err(e) => {
                warn!(
                    source = %source,
                    target = %target,
                    error = %e,
                    action = "translation_error",
                    "Translation failed, keeping source text"
                );
                Outcome::fallback(text.to_string(), e)
            }
        }
    }

    /// Translate into every language, one call at a time.
    pub async fn translate_all(&self, text: &str, source: Language) -> Localized<Outcome<String>> {
        let mut record = Localized::from_fn(|_| Outcome::ok(text.to_string()));
        let mut first = true;

        for &target in Language::ALL {
            if target == source {
                continue;
            }
            if !first && !self.interval.is_zero() {
                sleep(self.interval).await;
            }
            first = false;
            *record.get_mut(target) = self.translate_text(text, target, source).await;
        }

        record
    }

    /// Translate title, body and summary concurrently.
    ///
    /// A missing summary defaults to the body's first 300 characters.
    #[instrument(level = "info", skip_all, fields(title = %truncate_for_log(title, 50)))]
    pub async fn translate_article(
        &self,
        title: &str,
        body: &str,
        summary: Option<&str>,
    ) -> TranslatedArticle {
        let summary = summary.map(str::to_string).unwrap_or_else(|| summarize(body));
        debug!(source = %self.source, "Translating article");

        let (title, body, summary) = join3(
            self.translate_all(title, self.source),
            self.translate_all(body, self.source),
            self.translate_all(&summary, self.source),
        )
        .await;

        let degraded: Vec<Language> = title
            .iter()
            .filter(|(lang, t)| t.degraded || body.get(*lang).degraded || summary.get(*lang).degraded)
            .map(|(lang, _)| lang)
            .collect();

        info!(
            degraded = degraded.len(),
            action = "translation_complete",
            "Article translated"
        );

        TranslatedArticle {
            text: LocalizedArticle {
                title: title.map(|_, o| o.into_value()),
                body: body.map(|_, o| o.into_value()),
                summary: summary.map(|_, o| o.into_value()),
            },
            degraded,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Deterministic translator: `"[en] text"`; languages in `failing` error.
    #[derive(Default)]
    pub struct FakeTranslator {
        pub failing: HashSet<Language>,
        pub calls: Mutex<Vec<(String, Language)>>,
    }

    impl FakeTranslator {
        pub fn failing(langs: &[Language]) -> Self {
            Self {
                failing: langs.iter().copied().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Translator for FakeTranslator {
        async fn translate(
            &self,
            text: &str,
            _source: Language,
            target: Language,
        ) -> Result<String, ProviderError> {
            self.calls.lock().unwrap().push((text.to_string(), target));
            if self.failing.contains(&target) {
                return Err(ProviderError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(format!("[{target}] {text}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeTranslator;
    use super::*;

    fn fanout(translator: Arc<FakeTranslator>) -> TranslationFanout {
        TranslationFanout::new(translator, Duration::ZERO, Language::Fr)
    }

    #[tokio::test]
    async fn test_same_language_is_identity_without_call() {
        let translator = Arc::new(FakeTranslator::default());
        let fanout = fanout(translator.clone());

        let out = fanout.translate_text("Bonjour", Language::Fr, Language::Fr).await;
        assert_eq!(out, Outcome::ok("Bonjour".to_string()));
        assert_eq!(translator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_translate_all_is_total_and_keeps_source() {
        let translator = Arc::new(FakeTranslator::default());
        let fanout = fanout(translator.clone());

        let record = fanout.translate_all("Bonjour", Language::Fr).await;
        assert_eq!(record.fr.value, "Bonjour");
        assert_eq!(record.en.value, "[en] Bonjour");
        assert_eq!(record.ar.value, "[ar] Bonjour");
        assert!(record.iter().all(|(_, o)| !o.degraded));
        assert_eq!(translator.call_count(), 5);
    }

    #[tokio::test]
    async fn test_one_failing_language_is_isolated() {
        let translator = Arc::new(FakeTranslator::failing(&[Language::De]));
        let fanout = fanout(translator);

        let record = fanout.translate_all("Bonjour", Language::Fr).await;
        assert!(record.de.degraded);
        assert_eq!(record.de.value, "Bonjour");
        assert!(record.de.cause.as_deref().unwrap().contains("503"));
        for lang in [Language::En, Language::Es, Language::It, Language::Ar] {
            assert!(!record.get(lang).degraded);
            assert_eq!(record.get(lang).value, format!("[{lang}] Bonjour"));
        }
    }

    #[tokio::test]
    async fn test_non_french_source() {
        let translator = Arc::new(FakeTranslator::default());
        let fanout = fanout(translator);

        let record = fanout.translate_all("Hello", Language::En).await;
        assert_eq!(record.en.value, "Hello");
        assert_eq!(record.fr.value, "[fr] Hello");
    }

    #[tokio::test]
    async fn test_translate_article_defaults_summary() {
        let translator = Arc::new(FakeTranslator::default());
        let fanout = fanout(translator.clone());

        let out = fanout.translate_article("Titre", "Corps", None).await;
        assert_eq!(out.text.summary.fr, "Corps...");
        assert_eq!(out.text.summary.en, "[en] Corps...");
        assert_eq!(out.text.title.es, "[es] Titre");
        assert!(out.degraded.is_empty());
        assert_eq!(translator.call_count(), 15);
    }

    #[tokio::test]
    async fn test_translate_article_reports_degraded_languages() {
        let translator = Arc::new(FakeTranslator::failing(&[Language::Ar, Language::It]));
        let fanout = fanout(translator);

        let out = fanout.translate_article("Titre", "Corps", Some("Résumé")).await;
        assert_eq!(out.degraded, vec![Language::It, Language::Ar]);
        assert_eq!(out.text.body.ar, "Corps");
        assert_eq!(out.text.summary.en, "[en] Résumé");
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_spaced_by_interval() {
        let translator = Arc::new(FakeTranslator::default());
        let fanout = TranslationFanout::new(translator, Duration::from_millis(500), Language::Fr);

        let start = tokio::time::Instant::now();
        fanout.translate_all("Bonjour", Language::Fr).await;
        assert!(start.elapsed() >= Duration::from_millis(2000));
    }

    #[test]
    fn test_request_omits_missing_api_key() {
        let request = TranslateRequest {
            q: "Bonjour",
            source: "fr",
            target: "en",
            format: "text",
            api_key: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("api_key").is_none());
        assert_eq!(json["format"], "text");
    }
}
