//! Optional AI rewrite of extracted articles.
//!
//! The stage is either [`RewriteStage::Enabled`] with a chat provider or
//! [`RewriteStage::Disabled`]. Both variants always produce a
//! [`RewrittenArticle`]: when the provider is absent or fails, the extracted
//! title and body pass through unchanged with a generated summary.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::api::{AskAsync, OpenAiChat, RetryAsk};
use crate::error::{ConfigError, ProviderError};
use crate::models::{Outcome, RewrittenArticle};
use crate::utils::{looks_truncated, summarize, truncate_for_log};

const SYSTEM_PROMPT: &str = "Tu es un journaliste professionnel spécialisé dans la reformulation d'articles. Tu réponds toujours en JSON valide.";

const PROVIDER_RETRIES: usize = 2;
const PROVIDER_BASE_DELAY: Duration = Duration::from_secs(1);

/// Settings read from the environment / CLI.
#[derive(Debug, Clone)]
pub struct RewriteSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

/// Reported by `verify` and at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteStatus {
    pub enabled: bool,
    pub configured: bool,
    pub model: String,
}

pub enum RewriteStage {
    Enabled {
        provider: Arc<dyn AskAsync>,
        model: String,
    },
    Disabled {
        requested: bool,
        model: String,
    },
}

impl std::fmt::Debug for RewriteStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("RewriteStage")
            .field("enabled", &status.enabled)
            .field("configured", &status.configured)
            .field("model", &status.model)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct RewriteReply {
    title: Option<String>,
    content: Option<String>,
    summary: Option<String>,
}

impl RewriteReply {
    fn validate(self) -> Result<RewrittenArticle, ProviderError> {
        fn required(value: Option<String>, field: &'static str) -> Result<String, ProviderError> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ProviderError::MissingField { field })
        }

        Ok(RewrittenArticle {
            title: required(self.title, "title")?,
            body: required(self.content, "content")?,
            summary: required(self.summary, "summary")?,
        })
    }
}

impl RewriteStage {
    /// Build the stage from settings.
    ///
    /// Enabled without an API key degrades to `Disabled` with a warning.
    pub fn from_settings(settings: &RewriteSettings) -> Result<Self, ConfigError> {
        let key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());

        match (settings.enabled, key) {
            (false, _) => Ok(RewriteStage::Disabled {
                requested: false,
                model: settings.model.clone(),
            }),
            (true, None) => {
                warn!(
                    action = "reformulation_config_warning",
                    "REFORMULATION_ENABLED is true but OPENAI_API_KEY is not set; rewrite will be skipped"
                );
                Ok(RewriteStage::Disabled {
                    requested: true,
                    model: settings.model.clone(),
                })
            }
            (true, Some(key)) => {
                let chat = OpenAiChat::new(key, &settings.model, &settings.base_url)?;
                info!(
                    model = %chat.model(),
                    base_url = %settings.base_url,
                    action = "reformulation_initialized",
                    "Rewrite provider enabled"
                );
                Ok(Self::with_provider(
                    Arc::new(RetryAsk::new(chat, PROVIDER_RETRIES, PROVIDER_BASE_DELAY)),
                    &settings.model,
                ))
            }
        }
    }

    pub fn with_provider(provider: Arc<dyn AskAsync>, model: &str) -> Self {
        RewriteStage::Enabled {
            provider,
            model: model.to_string(),
        }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        RewriteStage::Disabled {
            requested: false,
            model: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, RewriteStage::Enabled { .. })
    }

    pub fn status(&self) -> RewriteStatus {
        match self {
            RewriteStage::Enabled { model, .. } => RewriteStatus {
                enabled: true,
                configured: true,
                model: model.clone(),
            },
            RewriteStage::Disabled { requested, model } => RewriteStatus {
                enabled: *requested,
                configured: false,
                model: model.clone(),
            },
        }
    }

    /// Rewrite an article. Never fails: provider problems yield a degraded
    /// passthrough.
    #[instrument(level = "debug", skip_all, fields(title = %truncate_for_log(title, 60)))]
    pub async fn rewrite(&self, title: &str, body: &str) -> Outcome<RewrittenArticle> {
        let provider = match self {
            RewriteStage::Disabled { .. } => return Outcome::ok(passthrough(title, body)),
            RewriteStage::Enabled { provider, .. } => provider,
        };

        info!(
            content_length = body.chars().count(),
            action = "reformulate_start",
            "Starting article rewrite"
        );

        match ask_rewrite(provider.as_ref(), title, body).await {
            Ok(article) => {
                info!(
                    original_length = body.chars().count(),
                    rewritten_length = article.body.chars().count(),
                    action = "reformulate_success",
                    "Article rewrite successful"
                );
                Outcome::ok(article)
            }
            Err(e) => {
                error!(
                    error = %e,
                    action = "reformulate_error",
                    "Rewrite failed, using original content"
                );
                Outcome::fallback(passthrough(title, body), e)
            }
        }
    }
}

/// Input title and body unchanged, summary derived from the body.
pub fn passthrough(title: &str, body: &str) -> RewrittenArticle {
    RewrittenArticle {
        title: title.to_string(),
        body: body.to_string(),
        summary: summarize(body),
    }
}

fn build_prompt(title: &str, body: &str) -> String {
    format!(
        "Tu es un journaliste professionnel francophone d'Afrique.

Ta mission : reformuler cet article de presse de manière unique et originale tout en préservant TOUS les faits, dates, noms et informations importantes. L'article reformulé doit :

1. Être entièrement réécrit avec tes propres mots
2. Conserver toutes les informations factuelles
3. Avoir un style journalistique professionnel
4. Être adapté à un public africain francophone
5. Éviter tout plagiat du texte original

Article original :
Titre : {title}

Contenu : {body}

Réponds UNIQUEMENT au format JSON suivant (sans code markdown, juste le JSON) :
{{
  \"title\": \"nouveau titre reformulé\",
  \"content\": \"contenu entièrement reformulé\",
  \"summary\": \"résumé en 2-3 phrases maximum\"
}}"
    )
}

async fn ask_rewrite(
    provider: &dyn AskAsync,
    title: &str,
    body: &str,
) -> Result<RewrittenArticle, ProviderError> {
    let prompt = build_prompt(title, body);
    let response = provider.ask(SYSTEM_PROMPT, &prompt).await?;

    let reply = match serde_json::from_str::<RewriteReply>(&response) {
        Ok(reply) => reply,
        // Cut off by the token limit: re-ask once.
        Err(e) if looks_truncated(&e) => {
            warn!(error = %e, "EOF while parsing rewrite; re-asking once");
            let retry = provider.ask(SYSTEM_PROMPT, &prompt).await?;
            serde_json::from_str::<RewriteReply>(&retry)?
        }
        Err(e) => {
            warn!(
                error = %e,
                response_preview = %truncate_for_log(&response, 300),
                "Model returned non-conforming JSON"
            );
            return Err(e.into());
        }
    };

    reply.validate()
}
