//! Scrape output shapes.
//!
//! Site adapters return these; the reconciliation engine consumes each one
//! exactly once. Content nodes arrive untyped and are classified into parts
//! and episodes by [`TocContent::classify`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::content::MediumType;
use super::index::{combi_index, synthesize_title};

/// A scraped table of contents for one medium.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toc {
    pub title: String,
    /// Source link the toc was scraped from.
    pub link: String,
    #[serde(default)]
    pub medium_id: Option<i64>,
    #[serde(default)]
    pub medium_type: MediumType,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub content: Vec<TocContent>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub lang_of_origin: Option<String>,
    #[serde(default)]
    pub country_of_origin: Option<String>,
    /// Whether the source marks the work as finished.
    #[serde(default)]
    pub end: Option<bool>,
}

/// A raw content node as an adapter produced it.
///
/// Indices are kept as floats here since adapters parse them out of free
/// text; validation turns them into integers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocContent {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub total_index: Option<f64>,
    #[serde(default)]
    pub partial_index: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locked: bool,
    /// Nested episodes; presence marks the node as a part.
    #[serde(default)]
    pub episodes: Option<Vec<TocContent>>,
}

/// Why a content node was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentIssue {
    MissingTotalIndex,
    NonIntegralTotalIndex,
    InvalidPartialIndex,
    /// Neither a url nor nested episodes.
    Unclassifiable,
}

impl std::fmt::Display for ContentIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTotalIndex => write!(f, "missing total index"),
            Self::NonIntegralTotalIndex => write!(f, "total index is not an integer"),
            Self::InvalidPartialIndex => write!(f, "partial index is not a non-negative integer"),
            Self::Unclassifiable => write!(f, "node is neither episode nor part"),
        }
    }
}

/// A validated content node.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedContent {
    Part(TocPart),
    Episode(TocEpisode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TocPart {
    pub title: String,
    pub total_index: i64,
    pub partial_index: Option<i64>,
    pub combi_index: f64,
    pub episodes: Vec<TocEpisode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TocEpisode {
    pub title: String,
    pub total_index: i64,
    pub partial_index: Option<i64>,
    pub combi_index: f64,
    pub url: String,
    pub release_date: Option<DateTime<Utc>>,
    pub locked: bool,
}

fn validate_indices(node: &TocContent) -> Result<(i64, Option<i64>), ContentIssue> {
    let total = node.total_index.ok_or(ContentIssue::MissingTotalIndex)?;
    if total.fract() != 0.0 || !total.is_finite() {
        return Err(ContentIssue::NonIntegralTotalIndex);
    }
    let partial = match node.partial_index {
        None => None,
        Some(p) if p.is_finite() && p >= 0.0 && p.fract() == 0.0 => {
            Some(p as i64).filter(|p| *p > 0)
        }
        Some(_) => return Err(ContentIssue::InvalidPartialIndex),
    };
    Ok((total as i64, partial))
}

impl TocContent {
    /// Validate and classify the node.
    ///
    /// Nodes with a url are episodes, nodes with nested episodes are parts.
    /// Episodes nested inside a part are validated as well; one bad child
    /// rejects the whole part.
    pub fn classify(&self) -> Result<ClassifiedContent, ContentIssue> {
        let (total_index, partial_index) = validate_indices(self)?;
        let combi = combi_index(total_index, partial_index);

        if let Some(children) = &self.episodes {
            let episodes = children
                .iter()
                .map(|child| match child.classify()? {
                    ClassifiedContent::Episode(episode) => Ok(episode),
                    ClassifiedContent::Part(_) => Err(ContentIssue::Unclassifiable),
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(ClassifiedContent::Part(TocPart {
                title: self
                    .title
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| synthesize_title("Volume", total_index, partial_index)),
                total_index,
                partial_index,
                combi_index: combi,
                episodes,
            }));
        }

        match &self.url {
            Some(url) => Ok(ClassifiedContent::Episode(TocEpisode {
                title: self
                    .title
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| synthesize_title("Episode", total_index, partial_index)),
                total_index,
                partial_index,
                combi_index: combi,
                url: url.clone(),
                release_date: self.release_date,
                locked: self.locked,
            })),
            None => Err(ContentIssue::Unclassifiable),
        }
    }
}

/// One scraped news entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct News {
    pub title: String,
    pub link: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub medium_type: Option<MediumType>,
    #[serde(default)]
    pub locked: bool,
}

/// Result of a news or feed job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsResult {
    /// Page or feed the batch came from.
    pub source: String,
    #[serde(default)]
    pub news: Vec<News>,
    /// Feed links discovered while scraping.
    #[serde(default)]
    pub feeds: Vec<String>,
    /// Toc links discovered while scraping.
    #[serde(default)]
    pub tocs: Vec<String>,
}

/// One medium on an external user list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMedium {
    pub title: String,
    #[serde(default)]
    pub medium_type: MediumType,
    pub toc_link: String,
}

/// Result of a list job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult {
    pub source: String,
    #[serde(default)]
    pub media: Vec<ListMedium>,
}

/// Result of a toc job: the tocs plus the link that was requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocResult {
    pub url: String,
    #[serde(default)]
    pub medium_id: Option<i64>,
    pub tocs: Vec<Toc>,
    /// Whether the job was the first scrape of this link.
    #[serde(default)]
    pub first_scrape: bool,
}
