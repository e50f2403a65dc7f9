//! Identity, politeness, retry and bot-wall handling for the crawler. One
//! [`CrawlClient`] is built per sync run and reused across every page so the
//! user-agent, header set and cookie jar stay consistent for the whole crawl,
//! the way a real browsing session would look to the target site.

use crate::config::{CRAWL_DELAY_FLOOR_SECS, CRAWL_FETCH_TIMEOUT_SECS, CRAWL_JITTER_SECS, CRAWL_MAX_ATTEMPTS};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

const USER_AGENT: &str =
    "Mozilla/5.0 (compatible; KnowledgeBot/1.0; +https://example.com/bot) AppleWebKit/537.36";

/// Token `robots.txt` groups are matched against; matched case-insensitively
/// as a substring of the group's `User-agent` value.
const ROBOTS_UA_TOKEN: &str = "knowledgebot";

const BOT_WALL_MARKERS: &[&str] = &[
    "checking your browser before accessing",
    "cf-browser-verification",
    "cloudflare",
    "sucuri website firewall",
    "wordfence",
    "captcha-delivery.com",
    "recaptcha",
    "please verify you are a human",
];

/// A collaborator able to fetch a page through a managed rendering/proxy
/// service (headless browser, residential proxy, etc.) when plain HTTP is
/// turned back by a bot wall. No concrete implementation ships in-tree; a
/// deployment wires one in when it has such a service to call.
#[async_trait]
pub trait ManagedRenderClient: Send + Sync {
    async fn render(&self, url: &str) -> AppResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    Direct,
    ManagedRender,
    SitemapFallback,
}

pub struct FetchedPage {
    pub body: String,
    pub strategy: FetchStrategy,
}

/// A `robots.txt` group's rules resolved for our user-agent: path prefixes
/// disallowed for crawling, and the site's requested crawl delay (if any).
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    pub disallow: Vec<String>,
    pub crawl_delay: Option<f64>,
}

impl RobotsRules {
    fn is_disallowed(&self, path: &str) -> bool {
        self.disallow.iter().any(|rule| !rule.is_empty() && path.starts_with(rule.as_str()))
    }
}

struct RobotsGroup {
    agents: Vec<String>,
    disallow: Vec<String>,
    crawl_delay: Option<f64>,
}

/// Parses `robots.txt` into its `User-agent` groups. A new group starts at a
/// `User-agent:` line once the current group has already seen a directive
/// (`Disallow`/`Crawl-delay`), so consecutive `User-agent:` lines sharing one
/// set of rules stay in the same group.
fn parse_robots_groups(body: &str) -> Vec<RobotsGroup> {
    let mut groups = Vec::new();
    let mut current: Option<RobotsGroup> = None;
    let mut seen_directive = false;

    for raw_line in body.lines() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else { continue };
        let key = key.trim().to_lowercase();
        let value = value.trim().to_string();

        match key.as_str() {
            "user-agent" => {
                if seen_directive || current.is_none() {
                    if let Some(g) = current.take() {
                        groups.push(g);
                    }
                    current = Some(RobotsGroup { agents: Vec::new(), disallow: Vec::new(), crawl_delay: None });
                    seen_directive = false;
                }
                current.as_mut().unwrap().agents.push(value.to_lowercase());
            }
            "disallow" => {
                seen_directive = true;
                if !value.is_empty() {
                    current.get_or_insert_with(|| RobotsGroup { agents: vec!["*".to_string()], disallow: Vec::new(), crawl_delay: None })
                        .disallow
                        .push(value);
                }
            }
            "crawl-delay" => {
                seen_directive = true;
                if let Some(g) = current.as_mut() {
                    g.crawl_delay = value.parse::<f64>().ok();
                }
            }
            _ => {}
        }
    }
    if let Some(g) = current.take() {
        groups.push(g);
    }
    groups
}

/// Picks the group matching our user-agent token, falling back to `*`, per
/// the politeness rule in design §4.10 ("parse Disallow lines for matching UA,
/// fallback `*`").
fn select_robots_rules(groups: &[RobotsGroup], ua_token: &str) -> RobotsRules {
    if let Some(g) = groups.iter().find(|g| g.agents.iter().any(|a| a != "*" && ua_token.contains(a.as_str()))) {
        return RobotsRules { disallow: g.disallow.clone(), crawl_delay: g.crawl_delay };
    }
    if let Some(g) = groups.iter().find(|g| g.agents.iter().any(|a| a == "*")) {
        return RobotsRules { disallow: g.disallow.clone(), crawl_delay: g.crawl_delay };
    }
    RobotsRules::default()
}

pub struct CrawlClient {
    http: reqwest::Client,
    managed: Option<Arc<dyn ManagedRenderClient>>,
    last_fetch: Mutex<Option<Instant>>,
    robots_cache: Mutex<HashMap<String, RobotsRules>>,
}

impl CrawlClient {
    pub fn new(managed: Option<Arc<dyn ManagedRenderClient>>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(std::time::Duration::from_secs(CRAWL_FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build crawl http client: {e}")))?;
        Ok(Self { http, managed, last_fetch: Mutex::new(None), robots_cache: Mutex::new(HashMap::new()) })
    }

    /// Fetches and caches (per-origin) the `robots.txt` rules covering `url`.
    /// A missing or unparseable `robots.txt` is treated as allow-all, matching
    /// the usual crawler convention.
    async fn robots_rules_for(&self, url: &str) -> RobotsRules {
        let Ok(parsed) = url::Url::parse(url) else {
            return RobotsRules::default();
        };
        let Some(host) = parsed.host_str() else {
            return RobotsRules::default();
        };
        let origin = match parsed.port() {
            Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
            None => format!("{}://{host}", parsed.scheme()),
        };

        if let Some(rules) = self.robots_cache.lock().await.get(&origin) {
            return rules.clone();
        }

        let robots_url = format!("{origin}/robots.txt");
        let rules = match self.http.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => select_robots_rules(&parse_robots_groups(&body), ROBOTS_UA_TOKEN),
                Err(_) => RobotsRules::default(),
            },
            _ => RobotsRules::default(),
        };

        self.robots_cache.lock().await.insert(origin, rules.clone());
        rules
    }

    /// Sleeps so consecutive requests are at least `floor_secs` apart, plus up
    /// to `CRAWL_JITTER_SECS` of jitter so request timing doesn't look robotic.
    /// `floor_secs` is the site's `robots.txt` `Crawl-delay` when one was set
    /// (never below `CRAWL_DELAY_FLOOR_SECS`), else the bare floor.
    async fn wait_politely(&self, floor_secs: f64) {
        let mut last = self.last_fetch.lock().await;
        let jitter: f64 = rand::thread_rng().gen_range(0.0..CRAWL_JITTER_SECS);
        let floor = std::time::Duration::from_secs_f64(floor_secs.max(CRAWL_DELAY_FLOOR_SECS) + jitter);
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < floor {
                tokio::time::sleep(floor - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn looks_like_bot_wall(body: &str) -> bool {
        let lowered = body.to_lowercase();
        BOT_WALL_MARKERS.iter().any(|m| lowered.contains(m))
    }

    /// Fetches `url` with retry/backoff on transient upstream errors
    /// (403/429/503), escalating to a managed render client on a detected bot
    /// wall, and surfacing the caller's sitemap-fallback responsibility via
    /// `FetchStrategy::SitemapFallback` when neither plain fetch nor a managed
    /// client could get through. Rejects paths `robots.txt` disallows for our
    /// user-agent before making any request.
    pub async fn fetch(&self, url: &str) -> AppResult<FetchedPage> {
        let rules = self.robots_rules_for(url).await;
        if let Ok(parsed) = url::Url::parse(url) {
            if rules.is_disallowed(parsed.path()) {
                return Err(AppError::Validation(format!("{url} is disallowed by robots.txt")));
            }
        }
        let delay_floor = rules.crawl_delay.unwrap_or(CRAWL_DELAY_FLOOR_SECS);

        for attempt in 0..CRAWL_MAX_ATTEMPTS {
            self.wait_politely(delay_floor).await;
            match self.http.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body = resp
                            .text()
                            .await
                            .map_err(|e| AppError::UpstreamTransient(format!("failed reading body: {e}")))?;
                        if Self::looks_like_bot_wall(&body) {
                            return self.escalate(url).await;
                        }
                        return Ok(FetchedPage { body, strategy: FetchStrategy::Direct });
                    }
                    if is_retryable(status) {
                        backoff(attempt).await;
                        continue;
                    }
                    return Err(AppError::UpstreamHard(format!("fetch of {url} failed with status {status}")));
                }
                Err(e) if attempt + 1 < CRAWL_MAX_ATTEMPTS => {
                    tracing::warn!(url, attempt, error = %e, "crawl fetch failed, retrying");
                    backoff(attempt).await;
                }
                Err(e) => return Err(AppError::UpstreamTransient(format!("fetch of {url} failed: {e}"))),
            }
        }
        self.escalate(url).await
    }

    async fn escalate(&self, url: &str) -> AppResult<FetchedPage> {
        if let Some(managed) = &self.managed {
            tracing::info!(url, "escalating to managed render client after bot-wall detection");
            let body = managed.render(url).await?;
            return Ok(FetchedPage { body, strategy: FetchStrategy::ManagedRender });
        }
        tracing::warn!(url, "no managed render client configured, falling back to sitemap discovery");
        Ok(FetchedPage { body: String::new(), strategy: FetchStrategy::SitemapFallback })
    }

    /// WordPress sites expose a JSON feed that is cheaper and more reliable
    /// than HTML scraping; tried before falling back to link-walking.
    pub async fn try_wordpress_feed(&self, base_url: &str) -> Option<Vec<String>> {
        let endpoint = format!("{}/wp-json/wp/v2/posts", base_url.trim_end_matches('/'));
        self.wait_politely(CRAWL_DELAY_FLOOR_SECS).await;
        let resp = self.http.get(&endpoint).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let posts: Vec<serde_json::Value> = resp.json().await.ok()?;
        let links: Vec<String> = posts
            .iter()
            .filter_map(|p| p.get("link").and_then(|l| l.as_str()).map(|s| s.to_string()))
            .collect();
        if links.is_empty() {
            None
        } else {
            Some(links)
        }
    }

    pub async fn fetch_sitemap(&self, base_url: &str) -> Vec<String> {
        let sitemap_url = format!("{}/sitemap.xml", base_url.trim_end_matches('/'));
        self.wait_politely(CRAWL_DELAY_FLOOR_SECS).await;
        let Ok(resp) = self.http.get(&sitemap_url).send().await else {
            return Vec::new();
        };
        let Ok(body) = resp.text().await else {
            return Vec::new();
        };
        let Ok(doc) = roxmltree::Document::parse(&body) else {
            return Vec::new();
        };
        doc.descendants()
            .filter(|n| n.has_tag_name("loc"))
            .filter_map(|n| n.text())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .take(crate::config::SITEMAP_FANOUT_LIMIT)
            .collect()
    }
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(status, StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE)
}

async fn backoff(attempt: u32) {
    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.5);
    let secs = 2f64.powi(attempt as i32) + jitter;
    tokio::time::sleep(std::time::Duration::from_secs_f64(secs)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_cloudflare_bot_wall() {
        assert!(CrawlClient::looks_like_bot_wall("<html>Checking your browser before accessing example.com</html>"));
    }

    #[test]
    fn plain_page_is_not_a_bot_wall() {
        assert!(!CrawlClient::looks_like_bot_wall("<html><body>Welcome to our store</body></html>"));
    }

    #[test]
    fn retryable_statuses_match_spec() {
        assert!(is_retryable(StatusCode::FORBIDDEN));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
    }

    #[test]
    fn robots_txt_disallow_applies_to_matching_user_agent_group() {
        let body = "User-agent: KnowledgeBot\nDisallow: /private\nCrawl-delay: 7\n\nUser-agent: *\nDisallow: /admin\n";
        let rules = select_robots_rules(&parse_robots_groups(body), ROBOTS_UA_TOKEN);
        assert!(rules.is_disallowed("/private/data"));
        assert!(!rules.is_disallowed("/admin"));
        assert_eq!(rules.crawl_delay, Some(7.0));
    }

    #[test]
    fn robots_txt_falls_back_to_wildcard_group_when_no_match() {
        let body = "User-agent: *\nDisallow: /admin\nCrawl-delay: 5\n";
        let rules = select_robots_rules(&parse_robots_groups(body), ROBOTS_UA_TOKEN);
        assert!(rules.is_disallowed("/admin/settings"));
        assert!(!rules.is_disallowed("/blog"));
        assert_eq!(rules.crawl_delay, Some(5.0));
    }

    #[test]
    fn empty_disallow_value_allows_everything() {
        let body = "User-agent: *\nDisallow:\n";
        let rules = select_robots_rules(&parse_robots_groups(body), ROBOTS_UA_TOKEN);
        assert!(!rules.is_disallowed("/anything"));
    }
}
