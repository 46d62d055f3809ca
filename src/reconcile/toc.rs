//! Merge of one scraped toc into canonical storage.
//!
//! Steps run strictly in order for a single medium:
//!
//! 1. validate and classify every content node, so a malformed node aborts
//!    before anything is written
//! 2. resolve (or create) the medium and attach synonyms and the toc link
//! 3. match parts by combi index, creating the missing ones
//! 4. per part, pull matching episodes out of the standard part, then create
//!    whatever is still missing
//! 5. merge releases and flush them in one batch

use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;
use url::Url;

use super::error::ReconcileError;
use crate::models::{
    ClassifiedContent, Medium, MediumInfo, NewEpisode, NewPart, Part, Release, Toc, TocEpisode,
    TocPart,
};
use crate::repository::{ContentStore, Relink};

/// What one toc merge changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub medium_id: i64,
    pub created_medium: bool,
    pub new_parts: usize,
    pub reused_parts: usize,
    pub new_episodes: usize,
    /// Episodes moved out of the standard part with their id intact.
    pub relocated_episodes: usize,
    /// Standard-part duplicates folded into an existing episode.
    pub merged_episodes: usize,
    pub new_releases: usize,
    pub updated_releases: usize,
}

impl ReconcileReport {
    pub fn new(medium_id: i64) -> Self {
        Self {
            medium_id,
            ..Default::default()
        }
    }
}

/// Classify the toc's content into real parts and loose episodes.
fn classify(toc: &Toc) -> Result<(Vec<TocPart>, Vec<TocEpisode>), ReconcileError> {
    let mut parts = Vec::new();
    let mut loose = Vec::new();
    for node in &toc.content {
        match node.classify() {
            Ok(ClassifiedContent::Part(part)) => parts.push(part),
            Ok(ClassifiedContent::Episode(episode)) => loose.push(episode),
            Err(issue) => {
                return Err(ReconcileError::InvalidContent {
                    link: toc.link.clone(),
                    issue,
                })
            }
        }
    }
    Ok((parts, loose))
}

fn medium_info(toc: &Toc) -> MediumInfo {
    MediumInfo {
        title: toc.title.clone(),
        medium: toc.medium_type,
        author: toc.author.clone(),
        artist: toc.artist.clone(),
        lang_of_origin: toc.lang_of_origin.clone(),
        country_of_origin: toc.country_of_origin.clone(),
        finished: toc.end,
    }
}

/// Combi indices are exact decimal parses, so their bit patterns are stable keys.
fn key(combi_index: f64) -> u64 {
    combi_index.to_bits()
}

fn source_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
}

pub(super) struct TocMerge<'a> {
    store: &'a dyn ContentStore,
    report: ReconcileReport,
    /// Scraped episodes paired with their stored episode id.
    resolved: Vec<(i64, TocEpisode)>,
}

impl<'a> TocMerge<'a> {
    pub(super) async fn run(
        store: &'a dyn ContentStore,
        toc: &Toc,
    ) -> Result<ReconcileReport, ReconcileError> {
        let (parts, loose) = classify(toc)?;
        let (medium, created) = resolve_medium(store, toc).await?;

        let mut merge = TocMerge {
            store,
            report: ReconcileReport {
                created_medium: created,
                ..ReconcileReport::new(medium.id)
            },
            resolved: Vec::new(),
        };
        merge.merge_parts(&medium, parts).await?;
        if !loose.is_empty() {
            let standard = store.get_standard_part(medium.id).await?;
            merge.merge_episodes(&standard, loose, None).await?;
        }
        merge.merge_releases().await?;

        debug!(medium_id = medium.id, report = ?merge.report, "Merged toc");
        Ok(merge.report)
    }

    async fn merge_parts(&mut self, medium: &Medium, parts: Vec<TocPart>) -> Result<(), ReconcileError> {
        if parts.is_empty() {
            return Ok(());
        }
        let mut stored: HashMap<u64, Part> = self
            .store
            .get_parts(medium.id)
            .await?
            .into_iter()
            .filter(|p| !p.is_standard())
            .map(|p| (key(p.combi_index), p))
            .collect();
        let standard = self.store.find_standard_part(medium.id).await?;

        for part in parts {
            let target = match stored.get(&key(part.combi_index)) {
                Some(existing) => {
                    self.report.reused_parts += 1;
                    existing.clone()
                }
                None => {
                    let created = self
                        .store
                        .create_part(&NewPart {
                            medium_id: medium.id,
                            title: part.title.clone(),
                            total_index: part.total_index,
                            partial_index: part.partial_index,
                            combi_index: part.combi_index,
                        })
                        .await?;
                    self.report.new_parts += 1;
                    stored.insert(key(created.combi_index), created.clone());
                    created
                }
            };
            self.merge_episodes(&target, part.episodes, standard.as_ref())
                .await?;
        }
        Ok(())
    }

    /// Resolve the scraped episodes of `part` to stored ids.
    ///
    /// Episodes the standard part already holds are relinked into `part`
    /// before anything is created, so a relocated episode keeps its id.
    async fn merge_episodes(
        &mut self,
        part: &Part,
        episodes: Vec<TocEpisode>,
        standard: Option<&Part>,
    ) -> Result<(), ReconcileError> {
        if episodes.is_empty() {
            return Ok(());
        }
        let mut indices: Vec<f64> = episodes.iter().map(|e| e.combi_index).collect();
        indices.dedup_by_key(|c| key(*c));

        let mut known: HashMap<u64, i64> = self
            .store
            .get_episodes(part.id, &indices)
            .await?
            .into_iter()
            .map(|e| (key(e.combi_index), e.id))
            .collect();

        if let Some(standard) = standard.filter(|s| s.id != part.id) {
            for orphan in self.store.get_episodes(standard.id, &indices).await? {
                match self.store.relink_episode(orphan.id, part.id).await? {
                    Relink::Moved => {
                        self.report.relocated_episodes += 1;
                        known.insert(key(orphan.combi_index), orphan.id);
                    }
                    Relink::Merged { into } => {
                        self.report.merged_episodes += 1;
                        known.insert(key(orphan.combi_index), into);
                    }
                }
            }
        }

        let mut missing: Vec<NewEpisode> = Vec::new();
        for episode in &episodes {
            let k = key(episode.combi_index);
            if !known.contains_key(&k) && !missing.iter().any(|m| key(m.combi_index) == k) {
                missing.push(NewEpisode {
                    part_id: part.id,
                    total_index: episode.total_index,
                    partial_index: episode.partial_index,
                    combi_index: episode.combi_index,
                });
            }
        }
        if !missing.is_empty() {
            let created = self.store.create_episodes(&missing).await?;
            self.report.new_episodes += created.len();
            known.extend(created.into_iter().map(|e| (key(e.combi_index), e.id)));
        }

        for episode in episodes {
            if let Some(id) = known.get(&key(episode.combi_index)) {
                self.resolved.push((*id, episode));
            }
        }
        Ok(())
    }

    async fn merge_releases(&mut self) -> Result<(), ReconcileError> {
        if self.resolved.is_empty() {
            return Ok(());
        }
        let mut ids: Vec<i64> = self.resolved.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut stored: HashMap<(i64, String), Release> = self
            .store
            .get_releases(&ids)
            .await?
            .into_iter()
            .map(|r| ((r.episode_id, r.url.clone()), r))
            .collect();

        let now = Utc::now();
        let mut writes = Vec::new();
        for (episode_id, episode) in &self.resolved {
            let incoming = Release {
                episode_id: *episode_id,
                url: episode.url.clone(),
                title: episode.title.clone(),
                release_date: episode.release_date.unwrap_or(now),
                locked: episode.locked,
                source_type: source_host(&episode.url),
            };
            let slot = (incoming.episode_id, incoming.url.clone());
            match stored.get(&slot) {
                None => {
                    self.report.new_releases += 1;
                    writes.push(incoming.clone());
                    stored.insert(slot, incoming);
                }
                Some(existing) => {
                    if let Some(merged) = existing.merge(&incoming) {
                        self.report.updated_releases += 1;
                        writes.push(merged.clone());
                        stored.insert(slot, merged);
                    }
                }
            }
        }

        if !writes.is_empty() {
            self.store.upsert_releases(&writes).await?;
        }
        Ok(())
    }
}

/// Find the toc's medium by id, toc link or title; create it otherwise.
async fn resolve_medium(
    store: &dyn ContentStore,
    toc: &Toc,
) -> Result<(Medium, bool), ReconcileError> {
    let info = medium_info(toc);
    let found = match toc.medium_id {
        Some(id) => Some(
            store
                .get_medium(id)
                .await?
                .ok_or(ReconcileError::MediumNotFound(id))?,
        ),
        None => match store.find_medium_by_toc(&toc.link).await? {
            Some(medium) => Some(medium),
            None => store.find_medium_by_title(&toc.title, toc.medium_type).await?,
        },
    };

    let (medium, created) = match found {
        Some(medium) => {
            if info.differs_from(&medium) {
                store.update_medium(medium.id, &info).await?;
            }
            (medium, false)
        }
        None => (store.create_medium(&info).await?, true),
    };

    if !toc.synonyms.is_empty() {
        store.add_synonyms(medium.id, &toc.synonyms).await?;
    }
    if !toc.link.is_empty() {
        store.add_toc(medium.id, &toc.link).await?;
    }
    Ok((medium, created))
}
