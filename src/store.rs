//! Article persistence.
//!
//! [`ArticleStore`] is the seam the pipeline writes through. Two backends:
//!
//! - [`SqliteArticleStore`]: sqlx SQLite pool, schema created on connect
//! - [`MemoryArticleStore`]: process-local, selected with `memory://`
//!
//! `source_url` is unique in both. Inserting an existing URL is reported as
//! [`PersistenceError::Duplicate`], never as a generic database error.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use url::Url;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::models::{Category, Country, NewArticle, PersistedArticle};

pub const MEMORY_URL: &str = "memory://";

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS news (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        summary TEXT NOT NULL,
        source_url TEXT NOT NULL UNIQUE,
        country TEXT NOT NULL,
        category TEXT NOT NULL,
        image_url TEXT,
        published_at TEXT NOT NULL,
        scraped_at TEXT NOT NULL,
        featured INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_news_country_published ON news (country, published_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_news_category_published ON news (category, published_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_news_featured_published ON news (featured, published_at DESC)",
];

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Whether an article with this source URL is already stored.
    async fn exists(&self, source_url: &str) -> Result<bool, PersistenceError>;

    /// Insert a new article and return it with its generated id.
    async fn save(&self, article: NewArticle) -> Result<PersistedArticle, PersistenceError>;

    /// Number of stored articles.
    async fn count(&self) -> Result<u64, PersistenceError>;

    /// Short backend label for logs.
    fn backend(&self) -> &'static str;
}

/// Open the store named by `database_url`.
///
/// `memory://` selects the in-process backend; anything else is handed to
/// sqlx as a SQLite URL (`sqlite://news.db`, `sqlite::memory:`).
pub async fn connect(database_url: &str) -> Result<Arc<dyn ArticleStore>, PersistenceError> {
    if database_url.trim() == MEMORY_URL {
        info!(backend = "memory", "Using in-memory article store");
        return Ok(Arc::new(MemoryArticleStore::new()));
    }
    let store = SqliteArticleStore::connect(database_url).await?;
    Ok(Arc::new(store))
}

/// Checks run before any write. Country and category codes are parsed back
/// from their wire form so a record never holds a code outside the closed
/// sets.
fn validate(article: &NewArticle) -> Result<(), PersistenceError> {
    Country::from_str(article.country.as_str())?;
    Category::from_str(article.category.as_str())?;

    Url::parse(&article.source_url).map_err(|_| PersistenceError::Validation {
        field: "source_url",
        value: article.source_url.clone(),
    })?;

    if article.text.title.fr.trim().is_empty() {
        return Err(PersistenceError::Validation {
            field: "title",
            value: String::new(),
        });
    }
    if article.text.body.fr.trim().is_empty() {
        return Err(PersistenceError::Validation {
            field: "content",
            value: String::new(),
        });
    }
    Ok(())
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone)]
pub struct SqliteArticleStore {
    pool: SqlitePool,
}

impl SqliteArticleStore {
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to `:memory:` is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        for (i, migration) in MIGRATIONS.iter().enumerate() {
            debug!(migration = i, "Applying migration");
            sqlx::query(migration).execute(&pool).await?;
        }

        info!(backend = "sqlite", "Connected to article store");
        Ok(Self { pool })
    }
}

#[async_trait]
impl ArticleStore for SqliteArticleStore {
    async fn exists(&self, source_url: &str) -> Result<bool, PersistenceError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM news WHERE source_url = ?) AS found")
            .bind(source_url)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("found") != 0)
    }

    #[instrument(level = "debug", skip_all, fields(url = %article.source_url))]
    async fn save(&self, article: NewArticle) -> Result<PersistedArticle, PersistenceError> {
        validate(&article)?;

        let id = new_id();
        let now = Utc::now().to_rfc3339();
        let title = serde_json::to_string(&article.text.title)?;
        let content = serde_json::to_string(&article.text.body)?;
        let summary = serde_json::to_string(&article.text.summary)?;

        let result = sqlx::query(
            r#"
            INSERT INTO news
            (id, title, content, summary, source_url, country, category, image_url,
             published_at, scraped_at, featured, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(title)
        .bind(content)
        .bind(summary)
        .bind(&article.source_url)
        .bind(article.country.as_str())
        .bind(article.category.as_str())
        .bind(article.image_url.as_deref())
        .bind(article.published_at.to_rfc3339())
        .bind(article.scraped_at.to_rfc3339())
        .bind(article.featured)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(PersistedArticle { id, article }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(PersistenceError::Duplicate {
                    source_url: article.source_url,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn count(&self) -> Result<u64, PersistenceError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM news")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n").max(0) as u64)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

/// Process-local store for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryArticleStore {
    articles: RwLock<Vec<PersistedArticle>>,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn all(&self) -> Vec<PersistedArticle> {
        self.articles.read().await.clone()
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn exists(&self, source_url: &str) -> Result<bool, PersistenceError> {
        Ok(self
            .articles
            .read()
            .await
            .iter()
            .any(|a| a.article.source_url == source_url))
    }

    async fn save(&self, article: NewArticle) -> Result<PersistedArticle, PersistenceError> {
        validate(&article)?;

        let mut articles = self.articles.write().await;
        if articles
            .iter()
            .any(|a| a.article.source_url == article.source_url)
        {
            return Err(PersistenceError::Duplicate {
                source_url: article.source_url,
            });
        }

        let persisted = PersistedArticle {
            id: new_id(),
            article,
        };
        articles.push(persisted.clone());
        Ok(persisted)
    }

    async fn count(&self) -> Result<u64, PersistenceError> {
        Ok(self.articles.read().await.len() as u64)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::models::{Localized, LocalizedArticle};

    pub fn sample_article(source_url: &str) -> NewArticle {
        let now = Utc::now();
        NewArticle {
            text: LocalizedArticle {
                title: Localized::from_fn(|lang| format!("Titre {lang}")),
                body: Localized::from_fn(|lang| format!("Contenu {lang}")),
                summary: Localized::from_fn(|lang| format!("Résumé {lang}")),
            },
            source_url: source_url.to_string(),
            country: Country::Senegal,
            category: Category::Societe,
            image_url: None,
            published_at: now,
            scraped_at: now,
            featured: false,
        }
    }
}
