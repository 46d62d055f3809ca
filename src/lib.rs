//! tocwatch - serial fiction toc crawler.
//!
//! Scrapes table-of-contents pages of serial fiction sites on a schedule,
//! answers the anti-bot challenges in front of them and merges what it finds
//! into a store of media, parts, episodes and releases.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod jobs;
pub mod models;
pub mod reconcile;
pub mod repository;
pub mod scheduler;
pub mod schema;
pub mod scrapers;
