//! Data models for tocwatch.

mod content;
mod index;
mod job;
mod toc;

pub use content::{
    Episode, Medium, MediumInfo, MediumType, NewEpisode, NewPart, NewsItem, Part, Release,
    STANDARD_PART_INDEX,
};
pub use index::{combi_index, separate_index, synthesize_title};
pub use job::{EventKind, JobItem, JobRequest, JobState, JobType, ScrapeArguments};
pub use toc::{
    ClassifiedContent, ContentIssue, ListMedium, ListResult, News, NewsResult, Toc, TocContent,
    TocEpisode, TocPart, TocResult,
};
