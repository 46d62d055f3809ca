//! Site adapters.
//!
//! Each supported site is described by a [`Hook`]: the domains it serves and
//! whichever scraping capabilities it implements. Callers look a hook up by
//! URL and dispatch on the capability they need; a site without that
//! capability simply has `None` in the slot.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use super::cloudflare::ChallengeResolver;
use super::error::ScrapeError;
use crate::models::{ListResult, MediumType, NewsResult, Toc};

/// A search hit on some site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub title: String,
    /// Toc link of the hit.
    pub link: String,
    #[serde(default)]
    pub medium_type: MediumType,
}

#[async_trait]
pub trait TocScraper: Send + Sync {
    /// Scrape the toc(s) behind `url`. Some sites list several media per page.
    async fn toc(&self, client: &ChallengeResolver, url: &str) -> Result<Vec<Toc>, ScrapeError>;
}

#[async_trait]
pub trait NewsScraper: Send + Sync {
    async fn news(&self, client: &ChallengeResolver, url: &str)
        -> Result<NewsResult, ScrapeError>;
}

#[async_trait]
pub trait FeedScraper: Send + Sync {
    async fn feed(&self, client: &ChallengeResolver, url: &str)
        -> Result<NewsResult, ScrapeError>;
}

#[async_trait]
pub trait ListScraper: Send + Sync {
    async fn list(&self, client: &ChallengeResolver, url: &str)
        -> Result<ListResult, ScrapeError>;
}

#[async_trait]
pub trait SearchScraper: Send + Sync {
    async fn search(
        &self,
        client: &ChallengeResolver,
        title: &str,
        medium: MediumType,
    ) -> Result<Vec<SearchResult>, ScrapeError>;
}

/// One site and what it can do.
#[derive(Clone, Default)]
pub struct Hook {
    pub name: String,
    /// Hosts served; subdomains match too.
    pub domains: Vec<String>,
    pub toc: Option<Arc<dyn TocScraper>>,
    pub news: Option<Arc<dyn NewsScraper>>,
    pub feed: Option<Arc<dyn FeedScraper>>,
    pub list: Option<Arc<dyn ListScraper>>,
    pub search: Option<Arc<dyn SearchScraper>>,
}

impl Hook {
    pub fn new(name: impl Into<String>, domains: &[&str]) -> Self {
        Self {
            name: name.into(),
            domains: domains.iter().map(|d| d.to_ascii_lowercase()).collect(),
            ..Default::default()
        }
    }

    pub fn with_toc(mut self, scraper: Arc<dyn TocScraper>) -> Self {
        self.toc = Some(scraper);
        self
    }

    pub fn with_news(mut self, scraper: Arc<dyn NewsScraper>) -> Self {
        self.news = Some(scraper);
        self
    }

    pub fn with_feed(mut self, scraper: Arc<dyn FeedScraper>) -> Self {
        self.feed = Some(scraper);
        self
    }

    pub fn with_list(mut self, scraper: Arc<dyn ListScraper>) -> Self {
        self.list = Some(scraper);
        self
    }

    pub fn with_search(mut self, scraper: Arc<dyn SearchScraper>) -> Self {
        self.search = Some(scraper);
        self
    }

    /// Whether this hook serves `host`.
    pub fn serves(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
    }
}

/// All registered hooks.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<Hook>>,
    /// Feed scraper for links no hook claims.
    fallback_feed: Option<Arc<dyn FeedScraper>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Hook) -> &mut Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn with_fallback_feed(&mut self, scraper: Arc<dyn FeedScraper>) -> &mut Self {
        self.fallback_feed = Some(scraper);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Hook serving the host of `url`.
    pub fn for_url(&self, url: &str) -> Option<Arc<Hook>> {
        let host = Url::parse(url).ok()?.host_str()?.to_string();
        self.hooks.iter().find(|h| h.serves(&host)).cloned()
    }

    pub fn toc(&self, url: &str) -> Option<Arc<dyn TocScraper>> {
        self.for_url(url)?.toc.clone()
    }

    pub fn news(&self, url: &str) -> Option<Arc<dyn NewsScraper>> {
        self.for_url(url)?.news.clone()
    }

    pub fn feed(&self, url: &str) -> Option<Arc<dyn FeedScraper>> {
        self.for_url(url)
            .and_then(|h| h.feed.clone())
            .or_else(|| self.fallback_feed.clone())
    }

    pub fn list(&self, url: &str) -> Option<Arc<dyn ListScraper>> {
        self.for_url(url)?.list.clone()
    }

    /// Every hook able to search.
    pub fn searchers(&self) -> Vec<(String, Arc<dyn SearchScraper>)> {
        self.hooks
            .iter()
            .filter_map(|h| h.search.clone().map(|s| (h.name.clone(), s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoToc;

    #[async_trait]
    impl TocScraper for NoToc {
        async fn toc(&self, _: &ChallengeResolver, _: &str) -> Result<Vec<Toc>, ScrapeError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_dispatch_by_capability() {
        let mut registry = HookRegistry::new();
        registry
            .register(Hook::new("novels", &["novels.example"]).with_toc(Arc::new(NoToc)))
            .register(Hook::new("news only", &["news.example"]));

        assert!(registry.toc("https://www.novels.example/book/1").is_some());
        assert!(registry.news("https://novels.example/book/1").is_none());
        assert!(registry.toc("https://news.example/").is_none());
        assert!(registry.for_url("https://news.example/").is_some());
        assert!(registry.for_url("https://notnovels.example/").is_none());
        assert!(registry.for_url("not a url").is_none());
        assert!(registry.searchers().is_empty());
        assert!(registry.feed("https://news.example/rss").is_none());

        registry.with_fallback_feed(Arc::new(super::super::feed::GenericFeed::new()));
        assert!(registry.feed("https://news.example/rss").is_some());
        assert!(registry.feed("https://unknown.example/rss").is_some());
    }
}
