//! Diesel ORM records for database tables.

use diesel::prelude::*;

use crate::schema;

/// Job record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobRecord {
    pub id: i64,
    pub name: String,
    pub job_type: String,
    pub arguments: Option<String>,
    pub state: String,
    pub interval_ms: i64,
    pub next_run: Option<String>,
    pub last_run: Option<String>,
    pub running_since: Option<String>,
    pub delete_after_run: i32,
    pub run_after: Option<i64>,
}

/// New job for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::jobs)]
pub struct NewJobRecord<'a> {
    pub name: &'a str,
    pub job_type: &'a str,
    pub arguments: Option<&'a str>,
    pub state: &'a str,
    pub interval_ms: i64,
    pub next_run: Option<String>,
    pub delete_after_run: i32,
    pub run_after: Option<i64>,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::media)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MediumRecord {
    pub id: i64,
    pub title: String,
    pub medium: String,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub lang_of_origin: Option<String>,
    pub country_of_origin: Option<String>,
    pub finished: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::media)]
pub struct NewMediumRecord<'a> {
    pub title: &'a str,
    pub medium: &'a str,
    pub author: Option<&'a str>,
    pub artist: Option<&'a str>,
    pub lang_of_origin: Option<&'a str>,
    pub country_of_origin: Option<&'a str>,
    pub finished: i32,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::parts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PartRecord {
    pub id: i64,
    pub medium_id: i64,
    pub title: String,
    pub total_index: i64,
    pub partial_index: Option<i64>,
    pub combi_index: f64,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::parts)]
pub struct NewPartRecord<'a> {
    pub medium_id: i64,
    pub title: &'a str,
    pub total_index: i64,
    pub partial_index: Option<i64>,
    pub combi_index: f64,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::episodes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EpisodeRecord {
    pub id: i64,
    pub part_id: i64,
    pub total_index: i64,
    pub partial_index: Option<i64>,
    pub combi_index: f64,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::episodes)]
pub struct NewEpisodeRecord {
    pub part_id: i64,
    pub total_index: i64,
    pub partial_index: Option<i64>,
    pub combi_index: f64,
}

/// Release record; also used for upserts.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::episode_releases)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ReleaseRecord {
    pub episode_id: i64,
    pub url: String,
    pub title: String,
    pub release_date: String,
    pub locked: i32,
    pub source_type: Option<String>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::user_episodes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserEpisodeRecord {
    pub user_id: String,
    pub episode_id: i64,
    pub progress: f64,
    pub read_date: Option<String>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::result_episodes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ResultEpisodeRecord {
    pub search_key: String,
    pub episode_id: i64,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::news)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NewsRecord {
    pub id: i64,
    pub title: String,
    pub link: String,
    pub date: String,
    pub medium_id: Option<i64>,
    pub locked: i32,
}
