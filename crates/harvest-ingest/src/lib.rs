//! Harvest Ingest Library
//!
//! Resumable, paginated harvesting of issues from a tracker search API.
//!
//! # Components
//!
//! - **fetcher**: one page per call, with retries and a shared rate limiter
//! - **retry**: pure backoff decisions for classified failures
//! - **checkpoint**: durable per-query offsets with atomic replacement
//! - **normalize** / **derive**: raw issue fields to output records
//! - **sink**: JSON Lines output
//! - **paths**: collision-free file names for query ids
//! - **pipeline**: the per-query resume/fetch/process/advance loop
//!
//! # Example
//!
//! ```no_run
//! use harvest_ingest::{
//!     FetcherConfig, FileCheckpointStore, HttpFetcher, JsonlSink, Pipeline, PipelineConfig,
//!     QuerySpec, RetryConfig, RetryPolicy,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let fetcher = HttpFetcher::new(FetcherConfig::default(), RetryPolicy::new(RetryConfig::default()))?;
//!     let store = FileCheckpointStore::open("./data/checkpoints").await?;
//!     let sink = JsonlSink::open("./data").await?;
//!
//!     let pipeline = Pipeline::new(Arc::new(fetcher), Arc::new(store), Arc::new(sink), PipelineConfig::default());
//!     let report = pipeline.run(&[QuerySpec::project("KAFKA")]).await;
//!     println!("{} records", report.records_emitted());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checkpoint;
pub mod config;
pub mod derive;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod normalize;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod sink;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::HarvestConfig;
pub use error::{CheckpointError, ErrorKind, FetchError, QueryError, SinkError};
pub use fetcher::{FetcherConfig, HttpFetcher, PageFetcher};
pub use models::{IssueRecord, Page, QuerySpec, RawRecord};
pub use pipeline::{Pipeline, PipelineConfig, QueryReport, QueryStatus, RunReport};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
pub use sink::{JsonlSink, RecordSink};
