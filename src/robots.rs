//! robots.txt policy: parsing, fetching and a per-domain cache.
//!
//! [`RobotsPolicyCache`] answers two questions for the orchestrator: may this
//! URL be fetched, and how long to wait before fetching it. Policies are
//! cached per origin (`scheme://host[:port]`) for 24 hours and refreshed lazily
//! on the next lookup after they expire.
//!
//! # Fail-open
//!
//! A missing robots.txt, a non-2xx answer or a network error all produce an
//! allow-all policy with no crawl delay. The failure is logged as a warning and
//! cached like a normal policy, so an unreachable host is not asked again on
//! every item.
//!
//! # Concurrency
//!
//! Each origin has its own async slot. Concurrent lookups for a cold origin
//! queue on that slot, so only the first one fetches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::error::PolicyError;
use crate::utils::origin_of;

/// Identifying user agent sent with robots.txt requests.
pub const BOT_USER_AGENT: &str = "InzassaBot/1.0 (+https://inzassa.com/bot)";

/// Agent name matched against `User-agent` groups.
pub const BOT_NAME: &str = "InzassaBot";

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const CACHE_TTL_HOURS: i64 = 24;

/// Upper bound applied to any `Crawl-delay` value.
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);

/// Allow/disallow rules for one `User-agent` group.
#[derive(Debug, Clone, Default, PartialEq)]
struct AgentRules {
    allow: Vec<String>,
    disallow: Vec<String>,
    crawl_delay: Option<Duration>,
}

impl AgentRules {
    fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.disallow.is_empty() && self.crawl_delay.is_none()
    }
}

/// Parsed robots.txt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsTxt {
    /// Groups keyed by lowercased product token.
    groups: HashMap<String, AgentRules>,
    /// The `*` group.
    default_group: AgentRules,
    sitemaps: Vec<String>,
}

impl RobotsTxt {
    /// An empty policy: everything allowed, no delay.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn parse(content: &str) -> Self {
        let mut robots = Self::default();
        let mut agents: Vec<String> = Vec::new();
        let mut rules = AgentRules::default();
        // A `User-agent` line after rules starts a new group; consecutive
        // `User-agent` lines share one.
        let mut in_rules = false;

        for raw in content.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if in_rules {
                        robots.commit(&mut agents, std::mem::take(&mut rules));
                        in_rules = false;
                    }
                    if let Some(token) = product_token(value) {
                        agents.push(token);
                    }
                }
                "allow" | "disallow" | "crawl-delay" if agents.is_empty() => {
                    // Rules outside any group are ignored.
                }
                "allow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        rules.allow.push(value.to_string());
                    }
                }
                "disallow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        rules.disallow.push(value.to_string());
                    }
                }
                "crawl-delay" => {
                    in_rules = true;
                    if let Some(delay) = parse_crawl_delay(value) {
                        rules.crawl_delay = Some(delay);
                    }
                }
                "sitemap" => robots.sitemaps.push(value.to_string()),
                _ => {}
            }
        }

        robots.commit(&mut agents, rules);
        robots
    }

    fn commit(&mut self, agents: &mut Vec<String>, rules: AgentRules) {
        for agent in agents.drain(..) {
            let target = if agent == "*" {
                &mut self.default_group
            } else {
                self.groups.entry(agent).or_default()
            };
            if target.is_empty() {
                *target = rules.clone();
            } else {
                target.allow.extend(rules.allow.iter().cloned());
                target.disallow.extend(rules.disallow.iter().cloned());
                target.crawl_delay = target.crawl_delay.or(rules.crawl_delay);
            }
        }
    }

    /// The group naming this agent's product token exactly, else `*`.
    fn rules_for(&self, user_agent: &str) -> &AgentRules {
        product_token(user_agent)
            .and_then(|token| self.groups.get(&token))
            .unwrap_or(&self.default_group)
    }

    /// Whether `path` (path plus optional query) may be fetched.
    ///
    /// The longest matching rule wins; on a tie `Allow` wins.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let rules = self.rules_for(user_agent);
        let longest = |patterns: &[String]| {
            patterns
                .iter()
                .filter(|p| pattern_matches(p, path))
                .map(|p| p.len())
                .max()
        };

        match (longest(&rules.allow), longest(&rules.disallow)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(allow), Some(disallow)) => allow >= disallow,
        }
    }

    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.rules_for(user_agent).crawl_delay
    }

    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }
}

/// Lowercased name before any `/version`, `None` for a blank value.
fn product_token(agent: &str) -> Option<String> {
    let token = agent.split('/').next().unwrap_or("").trim();
    (!token.is_empty()).then(|| token.to_ascii_lowercase())
}

/// Seconds, fractional allowed, capped at [`MAX_CRAWL_DELAY`].
fn parse_crawl_delay(value: &str) -> Option<Duration> {
    let secs = value.parse::<f64>().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let delay = Duration::try_from_secs_f64(secs).unwrap_or(MAX_CRAWL_DELAY);
    Some(delay.min(MAX_CRAWL_DELAY))
}

/// robots.txt path pattern match with `*` wildcards and a trailing `$` anchor.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };

    let pieces: Vec<&str> = parts.collect();
    for (i, piece) in pieces.iter().enumerate() {
        let is_last = i + 1 == pieces.len();
        if is_last && anchored {
            return rest.ends_with(piece);
        }
        match rest.find(piece) {
            Some(pos) => rest = &rest[pos + piece.len()..],
            None => return false,
        }
    }

    !anchored || rest.is_empty()
}

/// Source of robots.txt bodies.
#[async_trait]
pub trait RobotsFetcher: Send + Sync {
    /// Fetch the body at `robots_url`. Non-2xx answers are errors.
    async fn fetch(&self, robots_url: &str) -> Result<String, PolicyError>;
}

/// Fetches robots.txt over HTTP with the bot user agent and a 5 second
/// timeout.
#[derive(Debug, Clone)]
pub struct HttpRobotsFetcher {
    client: reqwest::Client,
}

impl HttpRobotsFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(BOT_USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RobotsFetcher for HttpRobotsFetcher {
    async fn fetch(&self, robots_url: &str) -> Result<String, PolicyError> {
        let url = Url::parse(robots_url).map_err(|_| PolicyError::InvalidUrl {
            url: robots_url.to_string(),
        })?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PolicyError::Status {
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

/// Source of the current time, injectable for TTL tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A cached policy for one origin.
#[derive(Debug, Clone)]
pub struct RobotsPolicy {
    pub rules: Arc<RobotsTxt>,
    pub fetched_at: DateTime<Utc>,
}

/// Snapshot of the cache contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsCacheStats {
    pub size: usize,
    pub domains: Vec<String>,
}

type Slot = Arc<Mutex<Option<RobotsPolicy>>>;

/// Per-origin robots.txt cache shared by every pipeline stage that needs a
/// crawl decision.
pub struct RobotsPolicyCache {
    fetcher: Arc<dyn RobotsFetcher>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl RobotsPolicyCache {
    pub fn new(fetcher: Arc<dyn RobotsFetcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            fetcher,
            clock,
            ttl: chrono::Duration::hours(CACHE_TTL_HOURS),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Cache backed by HTTP and the system clock.
    pub fn with_http() -> Result<Self, reqwest::Error> {
        Ok(Self::new(
            Arc::new(HttpRobotsFetcher::new()?),
            Arc::new(SystemClock),
        ))
    }

    /// Whether `url` may be fetched by `agent`. Unparsable URLs are allowed.
    #[instrument(level = "debug", skip(self))]
    pub async fn is_allowed(&self, url: &str, agent: &str) -> bool {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(%url, error = %e, action = "robots_check_error", "Error checking robots.txt; allowing");
                return true;
            }
        };
        let Some(policy) = self.policy_for(&parsed).await else {
            return true;
        };

        let path = match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        };
        let allowed = policy.rules.is_allowed(agent, &path);
        if !allowed {
            warn!(%url, user_agent = agent, action = "robots_disallowed", "URL disallowed by robots.txt");
        }
        allowed
    }

    /// Crawl delay requested for `agent`, zero when none is set.
    #[instrument(level = "debug", skip(self))]
    pub async fn crawl_delay(&self, url: &str, agent: &str) -> Duration {
        let Ok(parsed) = Url::parse(url) else {
            return Duration::ZERO;
        };
        let Some(policy) = self.policy_for(&parsed).await else {
            return Duration::ZERO;
        };
        match policy.rules.crawl_delay(agent) {
            Some(delay) => {
                info!(domain = %parsed.host_str().unwrap_or_default(), ?delay, action = "robots_crawl_delay", "Crawl delay found in robots.txt");
                delay
            }
            None => Duration::ZERO,
        }
    }

    async fn policy_for(&self, url: &Url) -> Option<RobotsPolicy> {
        let Some(origin) = origin_of(url) else {
            warn!(%url, action = "robots_check_error", "URL has no host; allowing");
            return None;
        };

        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(origin.clone()).or_default())
        };

        let mut entry = slot.lock().await;
        let now = self.clock.now();
        if let Some(policy) = entry.as_ref() {
            if now - policy.fetched_at < self.ttl {
                debug!(%origin, "robots.txt cache hit");
                return Some(policy.clone());
            }
        }

        let rules = self.fetch_rules(&origin).await;
        let policy = RobotsPolicy {
            rules: Arc::new(rules),
            fetched_at: now,
        };
        *entry = Some(policy.clone());
        Some(policy)
    }

    async fn fetch_rules(&self, origin: &str) -> RobotsTxt {
        let robots_url = format!("{}/robots.txt", origin);
        match self.fetcher.fetch(&robots_url).await {
            Ok(body) => {
                let rules = RobotsTxt::parse(&body);
                info!(
                    domain = %origin,
                    sitemaps = rules.sitemaps().len(),
                    action = "robots_fetched",
                    "robots.txt fetched successfully"
                );
                rules
            }
            Err(PolicyError::Status { status }) => {
                info!(domain = %origin, status, action = "robots_not_found", "robots.txt not found, assuming allowed");
                RobotsTxt::allow_all()
            }
            Err(e) => {
                warn!(domain = %origin, error = %e, action = "robots_fetch_error", "Failed to fetch robots.txt, assuming allowed");
                RobotsTxt::allow_all()
            }
        }
    }

    /// Drop every cached policy.
    pub async fn clear(&self) {
        self.slots.lock().await.clear();
        info!(action = "robots_cache_cleared", "robots.txt cache cleared");
    }

    pub async fn stats(&self) -> RobotsCacheStats {
        let slots = self.slots.lock().await;
        let mut domains: Vec<String> = slots.keys().cloned().collect();
        domains.sort();
        RobotsCacheStats {
            size: domains.len(),
            domains,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeRobotsFetcher, ManualClock};
    use super::*;

    #[test]
    fn test_parse_basic() {
        let content = r#"
User-agent: *
Disallow: /private/
Disallow: /admin/
Allow: /public/
Crawl-delay: 2

Sitemap: https://example.com/sitemap.xml
        "#;

        let robots = RobotsTxt::parse(content);

        assert!(robots.is_allowed(BOT_NAME, "/public/page"));
        assert!(!robots.is_allowed(BOT_NAME, "/private/page"));
        assert!(!robots.is_allowed(BOT_NAME, "/admin/"));
        assert!(robots.is_allowed(BOT_NAME, "/other/page"));
        assert_eq!(robots.crawl_delay(BOT_NAME), Some(Duration::from_secs(2)));
        assert_eq!(robots.sitemaps().len(), 1);
    }

    #[test]
    fn test_specific_user_agent_group() {
        let content = r#"
User-agent: *
Disallow: /

User-agent: inzassabot
Disallow:
Crawl-delay: 1.5
        "#;

        let robots = RobotsTxt::parse(content);

        assert!(!robots.is_allowed("OtherBot", "/page"));
        assert!(robots.is_allowed(BOT_NAME, "/page"));
        assert_eq!(robots.crawl_delay(BOT_NAME), Some(Duration::from_millis(1500)));
        assert_eq!(robots.crawl_delay("OtherBot"), None);
    }

    #[test]
    fn test_consecutive_agents_share_group() {
        let content = "User-agent: googlebot\nUser-agent: inzassabot\nDisallow: /archives/\n";
        let robots = RobotsTxt::parse(content);
        assert!(!robots.is_allowed(BOT_NAME, "/archives/2020"));
        assert!(!robots.is_allowed("Googlebot", "/archives/2020"));
        assert!(robots.is_allowed("bingbot", "/archives/2020"));
    }

    #[test]
    fn test_longest_match_wins() {
        let content = r#"
User-agent: *
Disallow: /private/
Allow: /private/public/
Allow: /a
Disallow: /ab
        "#;

        let robots = RobotsTxt::parse(content);

        assert!(!robots.is_allowed(BOT_NAME, "/private/secret"));
        assert!(robots.is_allowed(BOT_NAME, "/private/public/page"));
        assert!(!robots.is_allowed(BOT_NAME, "/abc"));
        assert!(robots.is_allowed(BOT_NAME, "/ac"));
    }

    #[test]
    fn test_wildcards_and_anchor() {
        assert!(pattern_matches("/*.pdf$", "/docs/report.pdf"));
        assert!(!pattern_matches("/*.pdf$", "/docs/report.pdf?x=1"));
        assert!(pattern_matches("/search*q=", "/search/page?q=rust"));
        assert!(pattern_matches("/exact$", "/exact"));
        assert!(!pattern_matches("/exact$", "/exact/more"));
        assert!(!pattern_matches("/news", "/sport/news"));
    }

    #[test]
    fn test_agent_groups_match_exact_product_token() {
        let content = "User-agent: *\nAllow: /\n\nUser-agent:\nDisallow: /\n\nUser-agent: bot\nDisallow: /\n";
        let robots = RobotsTxt::parse(content);
        assert!(robots.is_allowed(BOT_NAME, "/a"));
        assert!(robots.is_allowed(BOT_USER_AGENT, "/a"));
        assert!(!robots.is_allowed("bot", "/a"));

        let robots = RobotsTxt::parse("User-agent: InzassaBot/2.0\nDisallow: /private\n");
        assert!(!robots.is_allowed(BOT_USER_AGENT, "/private/x"));
        assert!(robots.is_allowed("OtherBot", "/private/x"));
    }

    #[test]
    fn test_crawl_delay_is_capped() {
        let robots = RobotsTxt::parse("User-agent: *\nCrawl-delay: 1e300\n");
        assert_eq!(robots.crawl_delay(BOT_NAME), Some(MAX_CRAWL_DELAY));

        let robots = RobotsTxt::parse("User-agent: *\nCrawl-delay: 600\n");
        assert_eq!(robots.crawl_delay(BOT_NAME), Some(MAX_CRAWL_DELAY));

        for bad in ["-1", "NaN", "inf", "soon"] {
            let robots = RobotsTxt::parse(&format!("User-agent: *\nCrawl-delay: {bad}\n"));
            assert_eq!(robots.crawl_delay(BOT_NAME), None, "{bad}");
        }
    }

    #[test]
    fn test_empty_and_comment_only() {
        let robots = RobotsTxt::parse("# nothing here\n\n");
        assert!(robots.is_allowed(BOT_NAME, "/any/path"));
        assert!(robots.crawl_delay(BOT_NAME).is_none());
        assert_eq!(robots, RobotsTxt::allow_all());
    }

    fn cache_with(fetcher: FakeRobotsFetcher) -> (RobotsPolicyCache, Arc<FakeRobotsFetcher>, Arc<ManualClock>) {
        let fetcher = Arc::new(fetcher);
        let clock = Arc::new(ManualClock::new());
        let cache = RobotsPolicyCache::new(fetcher.clone(), clock.clone());
        (cache, fetcher, clock)
    }

    #[tokio::test]
    async fn test_disallow_all_blocks_every_url() {
        let (cache, _, _) = cache_with(
            FakeRobotsFetcher::default().with("https://x.test/robots.txt", "User-agent: *\nDisallow: /\n"),
        );

        for url in ["https://x.test/", "https://x.test/a", "https://x.test/news/1?page=2"] {
            assert!(!cache.is_allowed(url, BOT_NAME).await, "{url} should be blocked");
        }
    }

    #[tokio::test]
    async fn test_cache_hit_within_ttl() {
        let (cache, fetcher, clock) = cache_with(
            FakeRobotsFetcher::default().with("https://x.test/robots.txt", "User-agent: *\nCrawl-delay: 3\n"),
        );

        assert!(cache.is_allowed("https://x.test/a", BOT_NAME).await);
        clock.advance(chrono::Duration::hours(23));
        assert!(cache.is_allowed("https://x.test/b", BOT_NAME).await);
        assert_eq!(cache.crawl_delay("https://x.test/c", BOT_NAME).await, Duration::from_secs(3));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let (cache, fetcher, clock) = cache_with(
            FakeRobotsFetcher::default().with("https://x.test/robots.txt", "User-agent: *\nDisallow:\n"),
        );

        cache.is_allowed("https://x.test/a", BOT_NAME).await;
        clock.advance(chrono::Duration::hours(24));
        cache.is_allowed("https://x.test/a", BOT_NAME).await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_fail_open_on_error_status_and_network_failure() {
        let (cache, fetcher, _) = cache_with(
            FakeRobotsFetcher::default().with_status("https://missing.test/robots.txt", 404),
        );

        assert!(cache.is_allowed("https://missing.test/a", BOT_NAME).await);
        assert_eq!(cache.crawl_delay("https://missing.test/a", BOT_NAME).await, Duration::ZERO);
        // unknown host in the fake behaves like a network error
        assert!(cache.is_allowed("https://down.test/a", BOT_NAME).await);
        assert_eq!(cache.crawl_delay("https://down.test/a", BOT_NAME).await, Duration::ZERO);
        // fallback policies are cached too
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_domains_are_cached_separately() {
        let (cache, fetcher, _) = cache_with(
            FakeRobotsFetcher::default()
                .with("https://a.test/robots.txt", "User-agent: *\nDisallow: /\n")
                .with("https://b.test/robots.txt", ""),
        );

        assert!(!cache.is_allowed("https://a.test/x", BOT_NAME).await);
        assert!(cache.is_allowed("https://b.test/x", BOT_NAME).await);
        assert_eq!(fetcher.calls(), 2);

        let stats = cache.stats().await;
        assert_eq!(stats.size, 2);
        assert_eq!(stats.domains, vec!["https://a.test", "https://b.test"]);

        cache.clear().await;
        assert_eq!(cache.stats().await.size, 0);
    }

    #[tokio::test]
    async fn test_concurrent_cold_lookups_fetch_once() {
        let mut fetcher = FakeRobotsFetcher::default().with("https://x.test/robots.txt", "");
        fetcher.delay = Some(Duration::from_millis(20));
        let (cache, fetcher, _) = cache_with(fetcher);

        let (a, b, c) = tokio::join!(
            cache.is_allowed("https://x.test/1", BOT_NAME),
            cache.is_allowed("https://x.test/2", BOT_NAME),
            cache.crawl_delay("https://x.test/3", BOT_NAME),
        );
        assert!(a && b);
        assert_eq!(c, Duration::ZERO);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_huge_crawl_delay_from_remote_is_capped() {
        let (cache, _, _) = cache_with(
            FakeRobotsFetcher::default().with("https://x.test/robots.txt", "User-agent: *\nCrawl-delay: 1e300\n"),
        );
        assert_eq!(cache.crawl_delay("https://x.test/a", BOT_NAME).await, MAX_CRAWL_DELAY);
        assert!(cache.is_allowed("https://x.test/a", BOT_NAME).await);
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_bad_robots_url() {
        let fetcher = HttpRobotsFetcher::new().unwrap();
        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, PolicyError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_unparsable_url_is_allowed() {
        let (cache, fetcher, _) = cache_with(FakeRobotsFetcher::default());
        assert!(cache.is_allowed("not a url", BOT_NAME).await);
        assert_eq!(fetcher.calls(), 0);
    }
}
