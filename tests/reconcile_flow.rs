//! Toc reconciliation against a real SQLite store.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tempfile::tempdir;

use tocwatch::models::{combi_index, JobType, Toc, TocContent, TocResult};
use tocwatch::reconcile::{Reconciler, TOC_INTERVAL_MS};
use tocwatch::repository::migrations::run_migrations;
use tocwatch::repository::{ContentStore, DbPool, DieselContentRepository};

const LINK: &str = "https://novels.example/long-road";

fn chapter(index: i64) -> TocContent {
    TocContent {
        title: Some(format!("Chapter {}", index)),
        total_index: Some(index as f64),
        url: Some(format!("https://novels.example/long-road/{}", index)),
        release_date: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::days(index)),
        ..Default::default()
    }
}

fn volume(index: i64, chapters: &[i64]) -> TocContent {
    TocContent {
        title: Some(format!("Volume {}", index)),
        total_index: Some(index as f64),
        episodes: Some(chapters.iter().map(|c| chapter(*c)).collect()),
        ..Default::default()
    }
}

fn result(content: Vec<TocContent>, first_scrape: bool) -> TocResult {
    TocResult {
        url: LINK.to_string(),
        medium_id: None,
        tocs: vec![Toc {
            title: "The Long Road".to_string(),
            link: LINK.to_string(),
            content,
            ..Default::default()
        }],
        first_scrape,
    }
}

#[tokio::test]
async fn test_volumes_absorb_loose_chapters() {
    let dir = tempdir().unwrap();
    let pool = DbPool::from_path(&dir.path().join("tocwatch.db"));
    run_migrations(&pool).await.unwrap();
    let repo = Arc::new(DieselContentRepository::new(pool));
    let reconciler = Reconciler::new(repo.clone());

    // First scrape: volume 1 with chapter 1, chapter 3 not yet assigned.
    let first = reconciler
        .process_toc(&result(vec![volume(1, &[1]), chapter(3)], true))
        .await;
    assert_eq!(first.failed, 0);
    let medium_id = first.reports[0].medium_id;
    assert!(first.reports[0].created_medium);
    assert_eq!(first.jobs.len(), 1);
    assert_eq!(first.jobs[0].job_type, JobType::Toc);
    assert_eq!(first.jobs[0].interval, TOC_INTERVAL_MS);

    let standard = repo.find_standard_part(medium_id).await.unwrap().unwrap();
    let loose = repo.get_part_episodes(standard.id).await.unwrap();
    assert_eq!(loose.len(), 1);
    let chapter_three = loose[0].id;

    // Periodic re-scrape: two volumes with two chapters each.
    let second = reconciler
        .process_toc(&result(vec![volume(1, &[1, 2]), volume(2, &[3, 4])], false))
        .await;
    assert!(second.jobs.is_empty());
    let report = &second.reports[0];
    assert_eq!(report.medium_id, medium_id);
    assert!(!report.created_medium);
    assert_eq!(report.new_parts, 1);
    assert_eq!(report.reused_parts, 1);
    assert_eq!(report.new_episodes, 2);
    assert_eq!(report.relocated_episodes, 1);
    assert_eq!(report.merged_episodes, 0);
    assert_eq!(report.new_releases, 2);
    assert_eq!(report.updated_releases, 0);

    assert!(repo.get_part_episodes(standard.id).await.unwrap().is_empty());
    let parts = repo.get_parts(medium_id).await.unwrap();
    let second_volume = parts
        .iter()
        .find(|p| p.total_index == 2)
        .expect("volume 2 created");
    let in_volume = repo
        .get_episodes(second_volume.id, &[combi_index(3, None), combi_index(4, None)])
        .await
        .unwrap();
    assert_eq!(in_volume.len(), 2);
    assert!(in_volume.iter().any(|e| e.id == chapter_three));

    let mut episode_ids = Vec::new();
    for part in parts.iter().filter(|p| !p.is_standard()) {
        episode_ids.extend(
            repo.get_part_episodes(part.id)
                .await
                .unwrap()
                .into_iter()
                .map(|e| e.id),
        );
    }
    assert_eq!(episode_ids.len(), 4);
    let releases = repo.get_releases(&episode_ids).await.unwrap();
    assert_eq!(releases.len(), 4);

    // Re-observing the same toc changes nothing.
    let third = reconciler
        .process_toc(&result(vec![volume(1, &[1, 2]), volume(2, &[3, 4])], false))
        .await;
    let report = &third.reports[0];
    assert_eq!(report.new_parts, 0);
    assert_eq!(report.reused_parts, 2);
    assert_eq!(report.new_episodes, 0);
    assert_eq!(report.relocated_episodes, 0);
    assert_eq!(report.new_releases, 0);
    assert_eq!(report.updated_releases, 0);
}

#[tokio::test]
async fn test_two_volume_toc_against_empty_volume_and_loose_chapter() {
    let dir = tempdir().unwrap();
    let pool = DbPool::from_path(&dir.path().join("tocwatch.db"));
    run_migrations(&pool).await.unwrap();
    let repo = Arc::new(DieselContentRepository::new(pool));
    let reconciler = Reconciler::new(repo.clone());

    // Stored state: volume 1 without episodes, chapter 3 in the standard part.
    let first = reconciler
        .process_toc(&result(vec![volume(1, &[]), chapter(3)], true))
        .await;
    assert_eq!(first.failed, 0);
    let medium_id = first.reports[0].medium_id;
    assert_eq!(first.reports[0].new_parts, 1);
    assert_eq!(first.reports[0].new_episodes, 1);
    let standard = repo.find_standard_part(medium_id).await.unwrap().unwrap();
    let chapter_three = repo.get_part_episodes(standard.id).await.unwrap()[0].id;

    let second = reconciler
        .process_toc(&result(vec![volume(1, &[1, 2]), volume(2, &[3, 4])], false))
        .await;
    assert_eq!(second.failed, 0);
    let report = &second.reports[0];
    assert_eq!(report.new_parts, 1);
    assert_eq!(report.reused_parts, 1);
    assert_eq!(report.new_episodes, 3);
    assert_eq!(report.relocated_episodes, 1);
    assert_eq!(report.merged_episodes, 0);
    assert_eq!(report.new_releases, 3);
    assert_eq!(report.updated_releases, 0);

    assert!(repo.get_part_episodes(standard.id).await.unwrap().is_empty());
    let parts = repo.get_parts(medium_id).await.unwrap();
    assert_eq!(parts.iter().filter(|p| !p.is_standard()).count(), 2);

    let mut episode_ids = Vec::new();
    for part in parts.iter().filter(|p| !p.is_standard()) {
        episode_ids.extend(
            repo.get_part_episodes(part.id)
                .await
                .unwrap()
                .into_iter()
                .map(|e| e.id),
        );
    }
    assert_eq!(episode_ids.len(), 4);
    assert!(episode_ids.contains(&chapter_three));

    // One release per episode, none duplicated.
    let releases = repo.get_releases(&episode_ids).await.unwrap();
    assert_eq!(releases.len(), 4);
    let mut released: Vec<i64> = releases.iter().map(|r| r.episode_id).collect();
    released.sort_unstable();
    released.dedup();
    assert_eq!(released.len(), 4);
}
