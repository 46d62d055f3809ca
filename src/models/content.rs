//! Canonical content: media, parts, episodes and releases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Total index of the synthetic part holding unassigned episodes.
pub const STANDARD_PART_INDEX: i64 = -1;

/// Kind of media.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediumType {
    #[default]
    Text,
    Audio,
    Video,
    Image,
}

impl MediumType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Image => "image",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

/// A tracked work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medium {
    pub id: i64,
    pub title: String,
    pub medium: MediumType,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub lang_of_origin: Option<String>,
    pub country_of_origin: Option<String>,
    pub finished: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Medium fields taken from a scrape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediumInfo {
    pub title: String,
    pub medium: MediumType,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub lang_of_origin: Option<String>,
    pub country_of_origin: Option<String>,
    pub finished: Option<bool>,
}

impl MediumInfo {
    /// Whether applying this info would change `medium`.
    ///
    /// Missing values never overwrite stored ones.
    pub fn differs_from(&self, medium: &Medium) -> bool {
        fn changed(new: &Option<String>, old: &Option<String>) -> bool {
            new.is_some() && new != old
        }
        changed(&self.author, &medium.author)
            || changed(&self.artist, &medium.artist)
            || changed(&self.lang_of_origin, &medium.lang_of_origin)
            || changed(&self.country_of_origin, &medium.country_of_origin)
            || self.finished.map_or(false, |f| f != medium.finished)
    }
}

/// A volume of a medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: i64,
    pub medium_id: i64,
    pub title: String,
    pub total_index: i64,
    pub partial_index: Option<i64>,
    pub combi_index: f64,
}

impl Part {
    pub fn is_standard(&self) -> bool {
        self.total_index == STANDARD_PART_INDEX
    }
}

/// A new part to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPart {
    pub medium_id: i64,
    pub title: String,
    pub total_index: i64,
    pub partial_index: Option<i64>,
    pub combi_index: f64,
}

impl NewPart {
    pub fn standard(medium_id: i64) -> Self {
        Self {
            medium_id,
            title: "Standard Part".to_string(),
            total_index: STANDARD_PART_INDEX,
            partial_index: None,
            combi_index: STANDARD_PART_INDEX as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub part_id: i64,
    pub total_index: i64,
    pub partial_index: Option<i64>,
    /// Unique within a part.
    pub combi_index: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEpisode {
    pub part_id: i64,
    pub total_index: i64,
    pub partial_index: Option<i64>,
    pub combi_index: f64,
}

/// A published copy of an episode on some host, keyed by `(episode_id, url)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub episode_id: i64,
    pub url: String,
    pub title: String,
    pub release_date: DateTime<Utc>,
    pub locked: bool,
    /// Host the release was scraped from.
    pub source_type: Option<String>,
}

impl Release {
    /// Merge an incoming observation of the same release.
    ///
    /// Returns the row to write, or `None` when nothing needs writing. The
    /// stored date is never pushed later: relative dates ("3 days ago")
    /// resolve to a later timestamp on every scrape.
    pub fn merge(&self, incoming: &Release) -> Option<Release> {
        let fields_differ = self.title != incoming.title
            || self.locked != incoming.locked
            || self.source_type != incoming.source_type;
        let earlier_date = incoming.release_date < self.release_date;

        if !fields_differ && !earlier_date {
            return None;
        }
        Some(Release {
            episode_id: self.episode_id,
            url: self.url.clone(),
            title: incoming.title.clone(),
            release_date: self.release_date.min(incoming.release_date),
            locked: incoming.locked,
            source_type: incoming.source_type.clone(),
        })
    }
}

/// A stored news entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: i64,
    pub title: String,
    pub link: String,
    pub date: DateTime<Utc>,
    pub medium_id: Option<i64>,
    pub locked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn release(date: DateTime<Utc>) -> Release {
        Release {
            episode_id: 1,
            url: "https://example.com/1".to_string(),
            title: "Chapter 1".to_string(),
            release_date: date,
            locked: false,
            source_type: Some("example.com".to_string()),
        }
    }

    #[test]
    fn test_merge_ignores_later_date() {
        let t1 = Utc::now();
        let stored = release(t1);
        let incoming = release(t1 + Duration::hours(5));
        assert_eq!(stored.merge(&incoming), None);
    }

    #[test]
    fn test_merge_takes_earlier_date() {
        let t1 = Utc::now();
        let stored = release(t1);
        let incoming = release(t1 - Duration::hours(5));
        let merged = stored.merge(&incoming).unwrap();
        assert_eq!(merged.release_date, t1 - Duration::hours(5));
    }

    #[test]
    fn test_merge_field_change_keeps_earlier_date() {
        let t1 = Utc::now();
        let stored = release(t1);
        let mut incoming = release(t1 + Duration::days(1));
        incoming.title = "Chapter 1: Renamed".to_string();
        incoming.locked = true;

        let merged = stored.merge(&incoming).unwrap();
        assert_eq!(merged.title, "Chapter 1: Renamed");
        assert!(merged.locked);
        assert_eq!(merged.release_date, t1);
    }

    #[test]
    fn test_medium_info_differs() {
        let now = Utc::now();
        let medium = Medium {
            id: 1,
            title: "A".to_string(),
            medium: MediumType::Text,
            author: Some("X".to_string()),
            artist: None,
            lang_of_origin: None,
            country_of_origin: None,
            finished: false,
            created_at: now,
            updated_at: now,
        };
        let mut info = MediumInfo {
            title: "A".to_string(),
            ..Default::default()
        };
        assert!(!info.differs_from(&medium));

        info.author = Some("X".to_string());
        assert!(!info.differs_from(&medium));

        info.finished = Some(true);
        assert!(info.differs_from(&medium));
    }
}
