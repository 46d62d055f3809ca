//! Diesel-based content repository: media, parts, episodes, releases, news.

use async_trait::async_trait;
use chrono::Utc;
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::diesel_models::{
    EpisodeRecord, MediumRecord, NewEpisodeRecord, NewMediumRecord, NewPartRecord, NewsRecord,
    PartRecord, ReleaseRecord, ResultEpisodeRecord, UserEpisodeRecord,
};
use super::error::StoreError;
use super::pool::{DbPool, DieselError, SqliteConn};
use super::store::{ContentStore, Relink};
use super::util::{flag, stored_timestamp, normalize_title, read_timestamp};
use crate::models::{
    Episode, Medium, MediumInfo, MediumType, NewEpisode, NewPart, News, NewsItem, Part, Release,
    STANDARD_PART_INDEX,
};
use crate::schema::{
    episode_releases, episodes, media, medium_synonyms, medium_tocs, news, parts,
    result_episodes, user_episodes,
};
use crate::with_conn;

impl From<MediumRecord> for Medium {
    fn from(record: MediumRecord) -> Self {
        Medium {
            id: record.id,
            title: record.title,
            medium: MediumType::from_str(&record.medium).unwrap_or_default(),
            author: record.author,
            artist: record.artist,
            lang_of_origin: record.lang_of_origin,
            country_of_origin: record.country_of_origin,
            finished: record.finished != 0,
            created_at: read_timestamp(&record.created_at),
            updated_at: read_timestamp(&record.updated_at),
        }
    }
}

impl From<PartRecord> for Part {
    fn from(record: PartRecord) -> Self {
        Part {
            id: record.id,
            medium_id: record.medium_id,
            title: record.title,
            total_index: record.total_index,
            partial_index: record.partial_index,
            combi_index: record.combi_index,
        }
    }
}

impl From<EpisodeRecord> for Episode {
    fn from(record: EpisodeRecord) -> Self {
        Episode {
            id: record.id,
            part_id: record.part_id,
            total_index: record.total_index,
            partial_index: record.partial_index,
            combi_index: record.combi_index,
        }
    }
}

impl From<ReleaseRecord> for Release {
    fn from(record: ReleaseRecord) -> Self {
        Release {
            episode_id: record.episode_id,
            url: record.url,
            title: record.title,
            release_date: read_timestamp(&record.release_date),
            locked: record.locked != 0,
            source_type: record.source_type,
        }
    }
}

impl From<&Release> for ReleaseRecord {
    fn from(release: &Release) -> Self {
        ReleaseRecord {
            episode_id: release.episode_id,
            url: release.url.clone(),
            title: release.title.clone(),
            release_date: stored_timestamp(release.release_date),
            locked: flag(release.locked),
            source_type: release.source_type.clone(),
        }
    }
}

impl From<NewsRecord> for NewsItem {
    fn from(record: NewsRecord) -> Self {
        NewsItem {
            id: record.id,
            title: record.title,
            link: record.link,
            date: read_timestamp(&record.date),
            medium_id: record.medium_id,
            locked: record.locked != 0,
        }
    }
}

async fn last_insert_id(conn: &mut SqliteConn) -> Result<i64, DieselError> {
    diesel::select(sql::<BigInt>("last_insert_rowid()"))
        .get_result::<i64>(conn)
        .await
}

/// Diesel-based content repository.
#[derive(Clone)]
pub struct DieselContentRepository {
    pool: DbPool,
}

impl DieselContentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record reading progress for a user.
    pub async fn set_progress(
        &self,
        user_id: &str,
        episode_id: i64,
        progress: f64,
    ) -> Result<(), StoreError> {
        let record = UserEpisodeRecord {
            user_id: user_id.to_string(),
            episode_id,
            progress,
            read_date: Some(stored_timestamp(Utc::now())),
        };
        with_conn!(self.pool, conn, {
            diesel::replace_into(user_episodes::table)
                .values(&record)
                .execute(&mut conn)
                .await?;
        });
        Ok(())
    }

    /// Users with progress on an episode.
    pub async fn get_progress(&self, episode_id: i64) -> Result<Vec<(String, f64)>, StoreError> {
        let rows = with_conn!(self.pool, conn, {
            user_episodes::table
                .filter(user_episodes::episode_id.eq(episode_id))
                .select((user_episodes::user_id, user_episodes::progress))
                .load::<(String, f64)>(&mut conn)
                .await?
        });
        Ok(rows)
    }

    /// Map a search result key to an episode.
    pub async fn add_result_mapping(&self, search_key: &str, episode_id: i64) -> Result<(), StoreError> {
        let record = ResultEpisodeRecord {
            search_key: search_key.to_string(),
            episode_id,
        };
        with_conn!(self.pool, conn, {
            diesel::insert_or_ignore_into(result_episodes::table)
                .values(&record)
                .execute(&mut conn)
                .await?;
        });
        Ok(())
    }

    pub async fn get_result_mappings(&self, search_key: &str) -> Result<Vec<i64>, StoreError> {
        let rows = with_conn!(self.pool, conn, {
            result_episodes::table
                .filter(result_episodes::search_key.eq(search_key))
                .select(result_episodes::episode_id)
                .load::<i64>(&mut conn)
                .await?
        });
        Ok(rows)
    }

    /// All episodes of a part, ordered by index.
    pub async fn get_part_episodes(&self, part_id: i64) -> Result<Vec<Episode>, StoreError> {
        let rows = with_conn!(self.pool, conn, {
            episodes::table
                .filter(episodes::part_id.eq(part_id))
                .order(episodes::combi_index.asc())
                .load::<EpisodeRecord>(&mut conn)
                .await?
        });
        Ok(rows.into_iter().map(Episode::from).collect())
    }

    pub async fn get_synonyms(&self, medium_id: i64) -> Result<Vec<String>, StoreError> {
        let rows = with_conn!(self.pool, conn, {
            medium_synonyms::table
                .filter(medium_synonyms::medium_id.eq(medium_id))
                .select(medium_synonyms::synonym)
                .load::<String>(&mut conn)
                .await?
        });
        Ok(rows)
    }
}

#[async_trait]
impl ContentStore for DieselContentRepository {
    async fn get_medium(&self, id: i64) -> Result<Option<Medium>, StoreError> {
        let record = with_conn!(self.pool, conn, {
            media::table
                .find(id)
                .first::<MediumRecord>(&mut conn)
                .await
                .optional()?
        });
        Ok(record.map(Medium::from))
    }

    async fn find_medium_by_toc(&self, link: &str) -> Result<Option<Medium>, StoreError> {
        let record = with_conn!(self.pool, conn, {
            medium_tocs::table
                .inner_join(media::table)
                .filter(medium_tocs::link.eq(link))
                .select(MediumRecord::as_select())
                .first::<MediumRecord>(&mut conn)
                .await
                .optional()?
        });
        Ok(record.map(Medium::from))
    }

    async fn find_medium_by_title(
        &self,
        title: &str,
        medium: MediumType,
    ) -> Result<Option<Medium>, StoreError> {
        let target = normalize_title(title);
        if target.is_empty() {
            return Ok(None);
        }

        let (candidates, synonyms) = with_conn!(self.pool, conn, {
            let candidates = media::table
                .filter(media::medium.eq(medium.as_str()))
                .order(media::id.asc())
                .load::<MediumRecord>(&mut conn)
                .await?;
            let synonyms = medium_synonyms::table
                .inner_join(media::table)
                .filter(media::medium.eq(medium.as_str()))
                .select((medium_synonyms::medium_id, medium_synonyms::synonym))
                .load::<(i64, String)>(&mut conn)
                .await?;
            (candidates, synonyms)
        });

        let by_synonym = synonyms
            .iter()
            .find(|(_, synonym)| normalize_title(synonym) == target)
            .map(|(id, _)| *id);

        Ok(candidates
            .into_iter()
            .find(|r| normalize_title(&r.title) == target || Some(r.id) == by_synonym)
            .map(Medium::from))
    }

    async fn create_medium(&self, info: &MediumInfo) -> Result<Medium, StoreError> {
        let now = stored_timestamp(Utc::now());
        let info = info.clone();

        let record = with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    let new = NewMediumRecord {
                        title: &info.title,
                        medium: info.medium.as_str(),
                        author: info.author.as_deref(),
                        artist: info.artist.as_deref(),
                        lang_of_origin: info.lang_of_origin.as_deref(),
                        country_of_origin: info.country_of_origin.as_deref(),
                        finished: flag(info.finished.unwrap_or(false)),
                        created_at: &now,
                        updated_at: &now,
                    };
                    diesel::insert_into(media::table)
                        .values(&new)
                        .execute(conn)
                        .await?;
                    let id = last_insert_id(conn).await?;
                    media::table.find(id).first::<MediumRecord>(conn).await
                })
            })
            .await?
        });
        Ok(Medium::from(record))
    }

    async fn update_medium(&self, id: i64, info: &MediumInfo) -> Result<(), StoreError> {
        let current = self
            .get_medium(id)
            .await?
            .ok_or_else(|| StoreError::not_found("medium", id))?;
        if !info.differs_from(&current) {
            return Ok(());
        }

        let author = info.author.clone().or(current.author);
        let artist = info.artist.clone().or(current.artist);
        let lang = info.lang_of_origin.clone().or(current.lang_of_origin);
        let country = info.country_of_origin.clone().or(current.country_of_origin);
        let finished = info.finished.unwrap_or(current.finished);
        let now = stored_timestamp(Utc::now());

        with_conn!(self.pool, conn, {
            diesel::update(media::table.find(id))
                .set((
                    media::author.eq(author),
                    media::artist.eq(artist),
                    media::lang_of_origin.eq(lang),
                    media::country_of_origin.eq(country),
                    media::finished.eq(flag(finished)),
                    media::updated_at.eq(now),
                ))
                .execute(&mut conn)
                .await?;
        });
        Ok(())
    }

    async fn add_synonyms(&self, medium_id: i64, synonyms: &[String]) -> Result<(), StoreError> {
        let synonyms: Vec<String> = synonyms
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if synonyms.is_empty() {
            return Ok(());
        }

        with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    for synonym in &synonyms {
                        diesel::insert_or_ignore_into(medium_synonyms::table)
                            .values((
                                medium_synonyms::medium_id.eq(medium_id),
                                medium_synonyms::synonym.eq(synonym),
                            ))
                            .execute(conn)
                            .await?;
                    }
                    Ok(())
                })
            })
            .await?;
        });
        Ok(())
    }

    async fn add_toc(&self, medium_id: i64, link: &str) -> Result<bool, StoreError> {
        let rows = with_conn!(self.pool, conn, {
            diesel::insert_or_ignore_into(medium_tocs::table)
                .values((
                    medium_tocs::medium_id.eq(medium_id),
                    medium_tocs::link.eq(link),
                ))
                .execute(&mut conn)
                .await?
        });
        Ok(rows > 0)
    }

    async fn remove_toc(&self, link: &str) -> Result<Option<i64>, StoreError> {
        let link = link.to_string();
        let medium_id = with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    let medium_id = medium_tocs::table
                        .filter(medium_tocs::link.eq(&link))
                        .select(medium_tocs::medium_id)
                        .first::<i64>(conn)
                        .await
                        .optional()?;
                    if medium_id.is_some() {
                        diesel::delete(medium_tocs::table.filter(medium_tocs::link.eq(&link)))
                            .execute(conn)
                            .await?;
                    }
                    Ok(medium_id)
                })
            })
            .await?
        });
        Ok(medium_id)
    }

    async fn get_tocs(&self) -> Result<Vec<(i64, String)>, StoreError> {
        let rows = with_conn!(self.pool, conn, {
            medium_tocs::table
                .select((medium_tocs::medium_id, medium_tocs::link))
                .order(medium_tocs::id.asc())
                .load::<(i64, String)>(&mut conn)
                .await?
        });
        Ok(rows)
    }

    async fn get_parts(&self, medium_id: i64) -> Result<Vec<Part>, StoreError> {
        let rows = with_conn!(self.pool, conn, {
            parts::table
                .filter(parts::medium_id.eq(medium_id))
                .order(parts::combi_index.asc())
                .load::<PartRecord>(&mut conn)
                .await?
        });
        Ok(rows.into_iter().map(Part::from).collect())
    }

    async fn create_part(&self, part: &NewPart) -> Result<Part, StoreError> {
        let part = part.clone();
        let record = with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    let new = NewPartRecord {
                        medium_id: part.medium_id,
                        title: &part.title,
                        total_index: part.total_index,
                        partial_index: part.partial_index,
                        combi_index: part.combi_index,
                    };
                    diesel::insert_into(parts::table)
                        .values(&new)
                        .execute(conn)
                        .await?;
                    let id = last_insert_id(conn).await?;
                    parts::table.find(id).first::<PartRecord>(conn).await
                })
            })
            .await?
        });
        Ok(Part::from(record))
    }

    async fn get_standard_part(&self, medium_id: i64) -> Result<Part, StoreError> {
        if let Some(part) = self.find_standard_part(medium_id).await? {
            return Ok(part);
        }
        let standard = NewPart::standard(medium_id);
        let record = with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    let new = NewPartRecord {
                        medium_id: standard.medium_id,
                        title: &standard.title,
                        total_index: standard.total_index,
                        partial_index: standard.partial_index,
                        combi_index: standard.combi_index,
                    };
                    diesel::insert_or_ignore_into(parts::table)
                        .values(&new)
                        .execute(conn)
                        .await?;
                    parts::table
                        .filter(parts::medium_id.eq(medium_id))
                        .filter(parts::total_index.eq(STANDARD_PART_INDEX))
                        .first::<PartRecord>(conn)
                        .await
                })
            })
            .await?
        });
        Ok(Part::from(record))
    }

    async fn find_standard_part(&self, medium_id: i64) -> Result<Option<Part>, StoreError> {
        let record = with_conn!(self.pool, conn, {
            parts::table
                .filter(parts::medium_id.eq(medium_id))
                .filter(parts::total_index.eq(STANDARD_PART_INDEX))
                .first::<PartRecord>(&mut conn)
                .await
                .optional()?
        });
        Ok(record.map(Part::from))
    }

    async fn get_episodes(
        &self,
        part_id: i64,
        combi_indices: &[f64],
    ) -> Result<Vec<Episode>, StoreError> {
        if combi_indices.is_empty() {
            return Ok(Vec::new());
        }
        let rows = with_conn!(self.pool, conn, {
            episodes::table
                .filter(episodes::part_id.eq(part_id))
                .filter(episodes::combi_index.eq_any(combi_indices))
                .load::<EpisodeRecord>(&mut conn)
                .await?
        });
        Ok(rows.into_iter().map(Episode::from).collect())
    }

    async fn create_episodes(&self, new: &[NewEpisode]) -> Result<Vec<Episode>, StoreError> {
        if new.is_empty() {
            return Ok(Vec::new());
        }
        let new = new.to_vec();
        let records = with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    let mut created = Vec::with_capacity(new.len());
                    for episode in &new {
                        diesel::insert_into(episodes::table)
                            .values(&NewEpisodeRecord {
                                part_id: episode.part_id,
                                total_index: episode.total_index,
                                partial_index: episode.partial_index,
                                combi_index: episode.combi_index,
                            })
                            .execute(conn)
                            .await?;
                        let id = last_insert_id(conn).await?;
                        created.push(episodes::table.find(id).first::<EpisodeRecord>(conn).await?);
                    }
                    Ok(created)
                })
            })
            .await?
        });
        Ok(records.into_iter().map(Episode::from).collect())
    }

    async fn get_releases(&self, episode_ids: &[i64]) -> Result<Vec<Release>, StoreError> {
        if episode_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = with_conn!(self.pool, conn, {
            episode_releases::table
                .filter(episode_releases::episode_id.eq_any(episode_ids))
                .load::<ReleaseRecord>(&mut conn)
                .await?
        });
        Ok(rows.into_iter().map(Release::from).collect())
    }

    async fn upsert_releases(&self, releases: &[Release]) -> Result<usize, StoreError> {
        if releases.is_empty() {
            return Ok(0);
        }
        let records: Vec<ReleaseRecord> = releases.iter().map(ReleaseRecord::from).collect();
        let written = with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    let mut written = 0;
                    for record in &records {
                        written += diesel::replace_into(episode_releases::table)
                            .values(record)
                            .execute(conn)
                            .await?;
                    }
                    Ok(written)
                })
            })
            .await?
        });
        Ok(written)
    }

    async fn relink_episode(
        &self,
        episode_id: i64,
        target_part_id: i64,
    ) -> Result<Relink, StoreError> {
        let outcome = with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    let episode = episodes::table
                        .find(episode_id)
                        .first::<EpisodeRecord>(conn)
                        .await?;
                    let occupant = episodes::table
                        .filter(episodes::part_id.eq(target_part_id))
                        .filter(episodes::combi_index.eq(episode.combi_index))
                        .filter(episodes::id.ne(episode_id))
                        .select(episodes::id)
                        .first::<i64>(conn)
                        .await
                        .optional()?;

                    let Some(into) = occupant else {
                        diesel::update(episodes::table.find(episode_id))
                            .set(episodes::part_id.eq(target_part_id))
                            .execute(conn)
                            .await?;
                        return Ok(Relink::Moved);
                    };

                    // Dependents first, then the episode row.
                    let releases = episode_releases::table
                        .filter(episode_releases::episode_id.eq(episode_id))
                        .load::<ReleaseRecord>(conn)
                        .await?;
                    for mut release in releases {
                        release.episode_id = into;
                        diesel::insert_or_ignore_into(episode_releases::table)
                            .values(&release)
                            .execute(conn)
                            .await?;
                    }
                    diesel::delete(
                        episode_releases::table.filter(episode_releases::episode_id.eq(episode_id)),
                    )
                    .execute(conn)
                    .await?;

                    let progress = user_episodes::table
                        .filter(user_episodes::episode_id.eq(episode_id))
                        .load::<UserEpisodeRecord>(conn)
                        .await?;
                    for mut row in progress {
                        row.episode_id = into;
                        diesel::insert_or_ignore_into(user_episodes::table)
                            .values(&row)
                            .execute(conn)
                            .await?;
                    }
                    diesel::delete(
                        user_episodes::table.filter(user_episodes::episode_id.eq(episode_id)),
                    )
                    .execute(conn)
                    .await?;

                    let results = result_episodes::table
                        .filter(result_episodes::episode_id.eq(episode_id))
                        .load::<ResultEpisodeRecord>(conn)
                        .await?;
                    for mut row in results {
                        row.episode_id = into;
                        diesel::insert_or_ignore_into(result_episodes::table)
                            .values(&row)
                            .execute(conn)
                            .await?;
                    }
                    diesel::delete(
                        result_episodes::table.filter(result_episodes::episode_id.eq(episode_id)),
                    )
                    .execute(conn)
                    .await?;

                    diesel::delete(episodes::table.find(episode_id))
                        .execute(conn)
                        .await?;
                    Ok(Relink::Merged { into })
                })
            })
            .await?
        });
        Ok(outcome)
    }

    async fn add_news(
        &self,
        items: &[News],
        medium_id: Option<i64>,
    ) -> Result<Vec<NewsItem>, StoreError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let items = items.to_vec();
        let records = with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    let mut inserted = Vec::new();
                    for item in &items {
                        let rows = diesel::insert_or_ignore_into(news::table)
                            .values((
                                news::title.eq(&item.title),
                                news::link.eq(&item.link),
                                news::date.eq(stored_timestamp(item.date)),
                                news::medium_id.eq(medium_id),
                                news::locked.eq(flag(item.locked)),
                            ))
                            .execute(conn)
                            .await?;
                        if rows > 0 {
                            inserted.push(
                                news::table
                                    .filter(news::link.eq(&item.link))
                                    .first::<NewsRecord>(conn)
                                    .await?,
                            );
                        }
                    }
                    Ok(inserted)
                })
            })
            .await?
        });
        Ok(records.into_iter().map(NewsItem::from).collect())
    }
}
