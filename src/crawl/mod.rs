//! Crawl & Sync (design §4.10): fetches web pages under a politeness policy,
//! extracts readable content, detects change against previously-ingested
//! documents, and runs a scheduler loop over due [`crate::model::ScrapeSource`]
//! records.

pub mod content;
pub mod fetch;
pub mod links;
pub mod sync;

pub use fetch::{CrawlClient, ManagedRenderClient};
pub use sync::{run_sync_cycle, sync_source, SyncOutcome};
