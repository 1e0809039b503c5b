//! Resilient outbound HTTP layer for job-board adapters
//!
//! Every request made through [`FetchClient`] gets:
//! - Per-key minimum-interval pacing
//! - A per-key circuit breaker that fails fast and self-heals after a cooldown
//! - Retries with exponential backoff for transport failures and timeouts
//! - A cancellable per-attempt timeout
//! - Lifecycle hooks for telemetry
//!
//! Multi-page listings are collected with the [`pagination`] driver, which
//! calls a page-fetch closure strictly one page at a time.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use integrations_jobfetch::pagination::{collect_pages, Page, PageRequest};
//! use integrations_jobfetch::{FetchClient, FetchConfig, FetchOptions, FetchResult};
//!
//! #[derive(serde::Deserialize)]
//! struct Postings {
//!     jobs: Vec<String>,
//!     total: usize,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FetchClient::new(FetchConfig::from_env()?)?;
//!
//!     let jobs = collect_pages(|page: PageRequest| {
//!         let client = client.clone();
//!         async move {
//!             let url = format!("https://boards.example.com/acme/jobs?offset={}", page.offset);
//!             let response = client
//!                 .fetch(&url, FetchOptions::for_provider("greenhouse", "acme"))
//!                 .await?;
//!             let body: Postings = response.json().unwrap_or(Postings { jobs: vec![], total: 0 });
//!             FetchResult::Ok(Page::new(body.jobs).total(body.total))
//!         }
//!     })
//!     .await?;
//!
//!     println!("{} postings", jobs.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Core modules
pub mod client;
pub mod config;
pub mod errors;
pub mod time;
pub mod transport;

// Resilience
pub mod resilience;

// Pagination
pub mod pagination;

// Observability
pub mod observability;

// Testing utilities
pub mod mocks;

// Re-exports for convenience
pub use client::{FetchClient, FetchClientBuilder, FetchOptions};
pub use config::{FetchConfig, FetchConfigBuilder};
pub use errors::{ConfigurationError, ErrorKind, FetchError, FetchResult, TransportError};
pub use transport::{HttpMethod, HttpResponse, HttpTransport};

/// User-Agent sent when a request does not set one
pub const DEFAULT_USER_AGENT: &str = concat!("integrations-jobfetch/", env!("CARGO_PKG_VERSION"));

/// Default per-attempt timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
