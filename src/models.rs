//! Data models flowing through the collection pipeline.
//!
//! - [`SourceItem`]: a static input descriptor from the source list
//! - [`ExtractedArticle`]: what the extractor pulled out of a page
//! - [`RewrittenArticle`]: title/body/summary after the (optional) rewrite stage
//! - [`LocalizedArticle`]: the same three fields in every supported [`Language`]
//! - [`NewArticle`] / [`PersistedArticle`]: the stored record
//! - [`RunSummary`]: counters reported once per run
//!
//! Country and category codes are closed enumerations. Parsing an unknown code
//! fails instead of falling back to a default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ItemError, PersistenceError};

/// Static input descriptor. Read-only for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SourceItem {
    pub url: String,
    /// Name of the extraction rule set used for this page.
    #[serde(rename = "site")]
    pub site_id: String,
    pub country: Country,
    pub category: Category,
}

macro_rules! code_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal, { $($variant:ident => $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
        pub enum $name {
            $(#[serde(rename = $code)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $code),+
                }
            }
        }

        impl FromStr for $name {
            type Err = PersistenceError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($code => Ok($name::$variant),)+
                    other => Err(PersistenceError::Validation {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

code_enum!(
    /// Countries covered by the portal.
    Country, "country", {
        Senegal => "senegal",
        Mali => "mali",
        BurkinaFaso => "burkina-faso",
        Niger => "niger",
        CoteIvoire => "cote-ivoire",
        Benin => "benin",
        Togo => "togo",
        Guinea => "guinea",
        Cameroon => "cameroon",
        Gabon => "gabon",
        Congo => "congo",
        Drc => "drc",
        Madagascar => "madagascar",
        Tunisia => "tunisia",
        Morocco => "morocco",
        Algeria => "algeria",
    }
);

code_enum!(
    /// Editorial categories.
    Category, "category", {
        Politique => "politique",
        Economie => "economie",
        Sport => "sport",
        Culture => "culture",
        Societe => "societe",
        International => "international",
    }
);

code_enum!(
    /// The six languages every stored article is available in.
    Language, "language", {
        Fr => "fr",
        En => "en",
        Es => "es",
        De => "de",
        It => "it",
        Ar => "ar",
    }
);

impl Language {
    pub const ALL: &'static [Language] = &[
        Language::Fr,
        Language::En,
        Language::Es,
        Language::De,
        Language::It,
        Language::Ar,
    ];
}

impl Default for Language {
    fn default() -> Self {
        Language::Fr
    }
}

/// One value per supported language.
///
/// Every language always has a value, so lookups never fail.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Localized<T> {
    pub fr: T,
    pub en: T,
    pub es: T,
    pub de: T,
    pub it: T,
    pub ar: T,
}

impl<T> Localized<T> {
    pub fn from_fn(mut f: impl FnMut(Language) -> T) -> Self {
        Self {
            fr: f(Language::Fr),
            en: f(Language::En),
            es: f(Language::Es),
            de: f(Language::De),
            it: f(Language::It),
            ar: f(Language::Ar),
        }
    }

    pub fn get(&self, lang: Language) -> &T {
        match lang {
            Language::Fr => &self.fr,
            Language::En => &self.en,
            Language::Es => &self.es,
            Language::De => &self.de,
            Language::It => &self.it,
            Language::Ar => &self.ar,
        }
    }

    pub fn get_mut(&mut self, lang: Language) -> &mut T {
        match lang {
            Language::Fr => &mut self.fr,
            Language::En => &mut self.en,
            Language::Es => &mut self.es,
            Language::De => &mut self.de,
            Language::It => &mut self.it,
            Language::Ar => &mut self.ar,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(Language, T) -> U) -> Localized<U> {
        Localized {
            fr: f(Language::Fr, self.fr),
            en: f(Language::En, self.en),
            es: f(Language::Es, self.es),
            de: f(Language::De, self.de),
            it: f(Language::It, self.it),
            ar: f(Language::Ar, self.ar),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Language, &T)> {
        Language::ALL.iter().map(move |lang| (*lang, self.get(*lang)))
    }
}

/// Result of a stage that may fall back instead of failing.
///
/// `degraded` is set when `value` is a fallback (e.g. the untranslated source
/// text) rather than the provider's answer; `cause` then says why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    pub value: T,
    pub degraded: bool,
    pub cause: Option<String>,
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value,
            degraded: false,
            cause: None,
        }
    }

    pub fn fallback(value: T, cause: impl fmt::Display) -> Self {
        Self {
            value,
            degraded: true,
            cause: Some(cause.to_string()),
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Content pulled from a source page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedArticle {
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub source_url: String,
}

/// Title, body and summary after the rewrite stage. Same shape for provider
/// output and passthrough.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RewrittenArticle {
    pub title: String,
    #[serde(rename = "content")]
    pub body: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LocalizedArticle {
    pub title: Localized<String>,
    #[serde(rename = "content")]
    pub body: Localized<String>,
    pub summary: Localized<String>,
}

/// Insert payload for the article store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewArticle {
    #[serde(flatten)]
    pub text: LocalizedArticle,
    pub source_url: String,
    pub country: Country,
    pub category: Category,
    pub image_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub scraped_at: DateTime<Utc>,
    pub featured: bool,
}

/// A stored article. Never updated by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedArticle {
    pub id: String,
    #[serde(flatten)]
    pub article: NewArticle,
}

/// Why an item ended without a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    DisallowedByRobots,
    Duplicate,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::DisallowedByRobots => "robots_disallowed",
            SkipReason::Duplicate => "duplicate",
        }
    }
}

/// Terminal state of one item.
#[derive(Debug)]
pub enum ItemOutcome {
    Saved { id: String },
    Skipped(SkipReason),
    Failed(ItemError),
}

/// Counters for one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub errors: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(total: usize) -> Self {
        let now = Utc::now();
        Self {
            total,
            success: 0,
            skipped: 0,
            errors: 0,
            started_at: now,
            finished_at: now,
            elapsed: Duration::ZERO,
        }
    }

    pub fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Saved { .. } => self.success += 1,
            ItemOutcome::Skipped(_) => self.skipped += 1,
            ItemOutcome::Failed(_) => self.errors += 1,
        }
    }

    /// Items that reached a terminal state. Lower than `total` when a run was
    /// cancelled.
    pub fn processed(&self) -> usize {
        self.success + self.skipped + self.errors
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
