//! Resumable harvesting of one or more queries
//!
//! Per query the pipeline moves through
//!
//! ```text
//! RESUME -> FETCH -> PROCESS -> ADVANCE -> (FETCH | DONE)
//!   |         |         |          |
//!   +---------+---------+----------+--> FAILED / CANCELLED / LIMITED
//! ```
//!
//! RESUME loads the checkpoint and short-circuits completed queries. FETCH
//! asks the [`PageFetcher`] for the page at the checkpoint offset. PROCESS
//! normalizes each record, appends it to the [`RecordSink`] and flushes.
//! ADVANCE moves the offset by the number of records processed and saves the
//! checkpoint. Within a query nothing is fetched before the previous page's
//! checkpoint is durable, so a stored offset always means "every record
//! before this index was emitted".
//!
//! A query that fails keeps its checkpoint and the run continues with the next
//! query. Queries share nothing but the fetcher (and thus its rate limiter).

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::{FetchError, QueryError, SinkError};
use crate::fetcher::PageFetcher;
use crate::models::{Page, QuerySpec};
use crate::normalize::normalize;
use crate::progress::{create_multi_progress, create_query_progress};
use crate::sink::RecordSink;
use futures::stream::{self, StreamExt};
use indicatif::MultiProgress;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Pipeline tunables
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Records requested per page
    pub page_size: u32,
    /// Queries harvested at the same time; 1 means strictly sequential
    pub concurrency: usize,
    /// Pause between consecutive pages of one query
    pub page_delay: Duration,
    /// Stop a query after this many records in one run, resuming next run
    pub max_records_per_query: Option<u64>,
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            concurrency: 1,
            page_delay: Duration::ZERO,
            max_records_per_query: None,
            show_progress: false,
        }
    }
}

/// How a query ended in this run
#[derive(Debug)]
pub enum QueryStatus {
    /// Every record up to the server's total was processed
    Completed,
    /// A fatal error stopped the query; progress up to `offset` is kept
    Failed(QueryError),
    /// Cancellation was requested before the next page
    Cancelled,
    /// The per-run record limit was reached; the next run continues
    Limited,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Completed => "completed",
            QueryStatus::Failed(_) => "failed",
            QueryStatus::Cancelled => "cancelled",
            QueryStatus::Limited => "limited",
        }
    }
}

/// Result of harvesting one query
#[derive(Debug)]
pub struct QueryReport {
    pub query_id: String,
    pub status: QueryStatus,
    /// Durable offset at the end of the run
    pub offset: u64,
    pub total: Option<u64>,
    /// Records handed to the sink during this run
    pub records_emitted: u64,
    pub pages_fetched: u64,
}

impl QueryReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, QueryStatus::Failed(_))
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, QueryStatus::Completed)
    }

    pub fn error(&self) -> Option<&QueryError> {
        match &self.status {
            QueryStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Result of a whole run
#[derive(Debug, Default)]
pub struct RunReport {
    pub queries: Vec<QueryReport>,
}

impl RunReport {
    /// The run failed only if every query failed without any durable progress
    pub fn is_failure(&self) -> bool {
        !self.queries.is_empty()
            && self
                .queries
                .iter()
                .all(|q| q.is_failed() && q.offset == 0)
    }

    pub fn get(&self, query_id: &str) -> Option<&QueryReport> {
        self.queries.iter().find(|q| q.query_id == query_id)
    }

    pub fn records_emitted(&self) -> u64 {
        self.queries.iter().map(|q| q.records_emitted).sum()
    }

    pub fn failed(&self) -> usize {
        self.queries.iter().filter(|q| q.is_failed()).count()
    }
}

/// Per-run counters for one query
struct QueryRun {
    records_emitted: u64,
    pages_fetched: u64,
}

/// Orchestrates fetcher, checkpoint store and sink across queries
pub struct Pipeline {
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn RecordSink>,
    config: PipelineConfig,
    cancel: CancellationToken,
    progress: MultiProgress,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn CheckpointStore>,
        sink: Arc<dyn RecordSink>,
        config: PipelineConfig,
    ) -> Self {
        let progress = create_multi_progress(config.show_progress);
        Self {
            fetcher,
            store,
            sink,
            config,
            cancel: CancellationToken::new(),
            progress,
        }
    }

    /// Use `token` to stop the run between pages
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Harvest every query; reports come back in input order
    pub async fn run(&self, queries: &[QuerySpec]) -> RunReport {
        info!(
            queries = queries.len(),
            concurrency = self.config.concurrency,
            page_size = self.config.page_size,
            "Starting harvest run"
        );

        let queries_out = if self.config.concurrency <= 1 {
            let mut reports = Vec::with_capacity(queries.len());
            for query in queries {
                reports.push(self.run_query(query).await);
            }
            reports
        } else {
            stream::iter(queries)
                .map(|query| self.run_query(query))
                .buffered(self.config.concurrency)
                .collect::<Vec<_>>()
                .await
        };

        let report = RunReport {
            queries: queries_out,
        };
        info!(
            records = report.records_emitted(),
            failed = report.failed(),
            "Harvest run finished"
        );
        report
    }

    /// Harvest a single query from its checkpoint to the end
    pub async fn run_query(&self, query: &QuerySpec) -> QueryReport {
        let span = info_span!("query", query_id = %query.id);
        self.drive(query).instrument(span).await
    }

    async fn drive(&self, query: &QuerySpec) -> QueryReport {
        let mut run = QueryRun {
            records_emitted: 0,
            pages_fetched: 0,
        };

        // RESUME
        let mut checkpoint = match self.store.load_or_new(&query.id, self.config.page_size).await {
            Ok(cp) => cp,
            Err(e) => {
                error!(error = %e, "Failed to load checkpoint, skipping query");
                let fresh = Checkpoint::new(&query.id, self.config.page_size);
                return report(&fresh, QueryStatus::Failed(e.into()), &run);
            },
        };

        if checkpoint.completed {
            info!(offset = checkpoint.offset, total = ?checkpoint.total, "Query already completed");
            return report(&checkpoint, QueryStatus::Completed, &run);
        }

        checkpoint.page_size = self.config.page_size;
        info!(offset = checkpoint.offset, total = ?checkpoint.total, "Resuming query");

        let bar = self.progress.add(create_query_progress(
            &query.id,
            checkpoint.offset,
            checkpoint.total,
        ));

        let status = loop {
            if self.cancel.is_cancelled() {
                break QueryStatus::Cancelled;
            }
            if let Some(limit) = self.config.max_records_per_query {
                if run.records_emitted >= limit {
                    break QueryStatus::Limited;
                }
            }

            // FETCH
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.fetcher.fetch_page(query, checkpoint.offset, checkpoint.page_size) => Some(result),
            };
            let Some(fetched) = fetched else {
                break QueryStatus::Cancelled;
            };

            let page = match fetched.and_then(reject_stalled) {
                Ok(page) => page,
                Err(e) => {
                    error!(offset = checkpoint.offset, error = %e, "Fetch failed, marking query failed");
                    self.persist_as_is(&checkpoint).await;
                    break QueryStatus::Failed(e.into());
                },
            };
            run.pages_fetched += 1;

            // PROCESS
            if let Err(e) = self.process(query, &page).await {
                error!(offset = checkpoint.offset, error = %e, "Output failed, marking query failed");
                break QueryStatus::Failed(e.into());
            }
            let processed = page.records.len() as u64;
            run.records_emitted += processed;

            // ADVANCE
            let mut next = checkpoint.clone();
            next.advance(processed, page.total);
            if let Err(e) = self.store.save(&next).await {
                error!(offset = next.offset, error = %e, "Checkpoint save failed, marking query failed");
                break QueryStatus::Failed(e.into());
            }
            checkpoint = next;

            bar.set_length(page.total);
            bar.set_position(checkpoint.offset);
            debug!(
                offset = checkpoint.offset,
                total = page.total,
                processed,
                "Page processed"
            );

            if checkpoint.completed {
                break QueryStatus::Completed;
            }

            if !self.config.page_delay.is_zero() {
                let paused = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => false,
                    _ = tokio::time::sleep(self.config.page_delay) => true,
                };
                if !paused {
                    break QueryStatus::Cancelled;
                }
            }
        };

        bar.finish_with_message(status.as_str());
        match &status {
            QueryStatus::Failed(_) => {},
            QueryStatus::Completed => info!(
                offset = checkpoint.offset,
                records = run.records_emitted,
                "Query completed"
            ),
            other => warn!(
                offset = checkpoint.offset,
                records = run.records_emitted,
                status = other.as_str(),
                "Query stopped before completion"
            ),
        }

        report(&checkpoint, status, &run)
    }

    /// Normalize and emit every record of `page`, then flush the sink
    async fn process(&self, query: &QuerySpec, page: &Page) -> Result<(), SinkError> {
        for raw in &page.records {
            let record = normalize(&query.id, raw);
            self.sink.append(&query.id, &record).await?;
        }
        self.sink.flush(&query.id).await
    }

    /// Re-save the last durable checkpoint after a fatal fetch error
    async fn persist_as_is(&self, checkpoint: &Checkpoint) {
        if let Err(e) = self.store.save(checkpoint).await {
            warn!(offset = checkpoint.offset, error = %e, "Failed to persist checkpoint of failed query");
        }
    }
}

fn reject_stalled(page: Page) -> Result<Page, FetchError> {
    if page.is_stalled() {
        Err(FetchError::server(format!(
            "empty page at startAt={} before reported total {}",
            page.offset, page.total
        )))
    } else {
        Ok(page)
    }
}

fn report(checkpoint: &Checkpoint, status: QueryStatus, run: &QueryRun) -> QueryReport {
    QueryReport {
        query_id: checkpoint.query_id.clone(),
        status,
        offset: checkpoint.offset,
        total: checkpoint.total,
        records_emitted: run.records_emitted,
        pages_fetched: run.pages_fetched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(offset: u64) -> QueryReport {
        QueryReport {
            query_id: "A".into(),
            status: QueryStatus::Failed(QueryError::Fetch(FetchError::Client {
                status: 400,
                message: "bad jql".into(),
            })),
            offset,
            total: None,
            records_emitted: 0,
            pages_fetched: 0,
        }
    }

    #[test]
    fn test_run_fails_only_without_any_progress() {
        let all_zero = RunReport {
            queries: vec![failed(0), failed(0)],
        };
        assert!(all_zero.is_failure());

        let some_progress = RunReport {
            queries: vec![failed(0), failed(50)],
        };
        assert!(!some_progress.is_failure());

        assert!(!RunReport::default().is_failure());
    }

    #[test]
    fn test_reject_stalled() {
        let page = Page {
            records: vec![],
            offset: 0,
            page_size: 50,
            total: 10,
        };
        assert!(reject_stalled(page).is_err());
    }
}
