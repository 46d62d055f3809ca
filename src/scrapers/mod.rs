//! Request layer, anti-bot challenge handling and site adapter contracts.

pub mod browser;
pub mod cloudflare;
mod error;
pub mod feed;
pub mod hook;
mod http_client;
pub mod request_queue;
pub mod sandbox;

pub use browser::{BrowserEngineConfig, BrowserFallback, BrowserFetcher};
pub use cloudflare::{ChallengeConfig, ChallengeResolver};
pub use error::{ErrorKind, RequestSummary, ResponseSummary, ScrapeError};
pub use feed::GenericFeed;
pub use hook::{Hook, HookRegistry, SearchResult};
pub use http_client::{
    Cookie, CookieJar, HttpClient, HttpResponse, RequestBody, RequestConfig, ResponseType,
    Transport,
};
pub use request_queue::{QueueConfig, RequestQueue};
