//! Generic RSS 2.0 / Atom feed scraper, used for every feed link no site
//! hook claims.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use super::cloudflare::ChallengeResolver;
use super::error::ScrapeError;
use super::hook::FeedScraper;
use super::http_client::RequestConfig;
use crate::models::{News, NewsResult};

#[derive(Debug, Default)]
pub struct GenericFeed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Published,
    Updated,
}

impl Field {
    fn of(local_name: &[u8]) -> Option<Self> {
        match local_name {
            b"title" => Some(Self::Title),
            b"link" => Some(Self::Link),
            // dc:date shows up in RSS 1.0 style feeds
            b"pubDate" | b"published" | b"date" => Some(Self::Published),
            b"updated" => Some(Self::Updated),
            _ => None,
        }
    }
}

/// An `<item>` or `<entry>` being read.
#[derive(Debug, Default)]
struct Draft {
    title: String,
    link: String,
    published: String,
    updated: String,
    /// Atom `<link href>` with rel `alternate` (or no rel).
    alternate: Option<String>,
    /// First Atom `<link href>` of any rel.
    any_href: Option<String>,
}

impl Draft {
    fn push(&mut self, field: Field, text: &str) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Published => &mut self.published,
            Field::Updated => &mut self.updated,
        };
        slot.push_str(text);
    }

    fn offer_href(&mut self, link: &BytesStart) {
        let attr = |key: &str| {
            link.try_get_attribute(key)
                .ok()
                .flatten()
                .and_then(|a| a.unescape_value().ok())
                .map(|v| v.into_owned())
        };
        let Some(href) = attr("href") else {
            return;
        };
        if self.alternate.is_none() && attr("rel").map_or(true, |rel| rel == "alternate") {
            self.alternate = Some(href.clone());
        }
        self.any_href.get_or_insert(href);
    }

    /// Entries without title, link or a readable date are dropped.
    fn finish(self) -> Option<News> {
        let title = self.title.trim();
        let link = Some(self.link.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .or(self.alternate)
            .or(self.any_href)?;
        let date = parse_date(&self.published).or_else(|| parse_date(&self.updated))?;
        if title.is_empty() {
            return None;
        }
        Some(News {
            title: title.to_string(),
            link,
            date,
            medium_type: None,
            locked: false,
        })
    }
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(text)
        .or_else(|_| DateTime::parse_from_rfc3339(text))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

impl GenericFeed {
    pub fn new() -> Self {
        Self
    }

    /// Parse a feed document. Reading stops at the first XML error, keeping
    /// the entries completed before it.
    pub fn parse(&self, xml: &str) -> Vec<News> {
        let mut reader = Reader::from_str(xml);
        let config = reader.config_mut();
        config.expand_empty_elements = true;
        config.check_end_names = false;

        let mut news = Vec::new();
        let mut draft: Option<Draft> = None;
        // Element depth below the open item/entry.
        let mut depth = 0usize;
        let mut field: Option<Field> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => match draft.as_mut() {
                    None => {
                        if matches!(e.local_name().as_ref(), b"item" | b"entry") {
                            draft = Some(Draft::default());
                            depth = 0;
                        }
                    }
                    Some(current) => {
                        depth += 1;
                        if depth == 1 {
                            field = Field::of(e.local_name().as_ref());
                            if field == Some(Field::Link) {
                                current.offer_href(&e);
                            }
                        }
                    }
                },
                Ok(Event::End(_)) if draft.is_some() => {
                    if depth == 0 {
                        news.extend(draft.take().and_then(Draft::finish));
                    } else {
                        depth -= 1;
                        if depth == 0 {
                            field = None;
                        }
                    }
                }
                Ok(Event::Text(t)) => {
                    if let (Some(current), Some(f)) = (draft.as_mut(), field) {
                        match t.unescape() {
                            Ok(text) => current.push(f, &text),
                            // Undeclared entities such as &nbsp; stay verbatim.
                            Err(_) => current.push(f, &String::from_utf8_lossy(&t)),
                        }
                    }
                }
                Ok(Event::CData(c)) => {
                    if let (Some(current), Some(f)) = (draft.as_mut(), field) {
                        current.push(f, &String::from_utf8_lossy(&c));
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    debug!(position = reader.buffer_position(), "Feed XML error: {}", e);
                    break;
                }
                _ => {}
            }
        }
        news
    }
}

#[async_trait]
impl FeedScraper for GenericFeed {
    async fn feed(&self, client: &ChallengeResolver, url: &str) -> Result<NewsResult, ScrapeError> {
        let response = client.request(RequestConfig::get(url)).await?;
        let news = self.parse(&response.text());
        debug!(url, entries = news.len(), "Parsed feed");
        Ok(NewsResult {
            source: url.to_string(),
            news,
            ..Default::default()
        })
    }
}
