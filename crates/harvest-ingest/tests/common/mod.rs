//! Shared fixtures for harvest-ingest integration tests
//!
//! - JSON builders for search API responses
//! - A scripted in-process [`PageFetcher`] with configurable failures
//! - A sink that collects records in memory

#![allow(dead_code)]

use async_trait::async_trait;
use harvest_ingest::error::{FetchError, SinkError};
use harvest_ingest::models::{IssueRecord, Page, QuerySpec, RawRecord};
use harvest_ingest::{PageFetcher, RecordSink, RetryConfig};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One issue as returned by the search API
pub fn issue_json(key: &str, assignee: Option<&str>) -> Value {
    let mut fields = json!({
        "summary": format!("Issue {}", key),
        "description": "Broker crashes on startup. Stack trace attached. Happens on 3.6.",
        "status": {"name": "Open"},
        "priority": {"name": "Major"},
        "reporter": {"displayName": "Reporter"},
        "labels": ["broker"],
        "created": "2024-01-02T03:04:05.000+0000",
        "updated": "2024-01-03T03:04:05.000+0000",
        "comment": {"comments": [{"body": "Fixed by upgrading the client library."}]}
    });
    if let Some(name) = assignee {
        fields["assignee"] = json!({"displayName": name});
    }
    json!({"key": key, "fields": fields})
}

/// A search response page containing `keys`
pub fn search_body(start_at: u64, total: u64, keys: &[&str]) -> Value {
    let issues: Vec<Value> = keys.iter().map(|k| issue_json(k, Some("Dev"))).collect();
    json!({
        "startAt": start_at,
        "maxResults": keys.len(),
        "total": total,
        "issues": issues
    })
}

/// Retry settings with millisecond delays and no jitter
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        base_delay: Duration::from_millis(10),
        multiplier: 2.0,
        max_delay: Duration::from_millis(50),
        jitter: 0.0,
        rate_limit_fallback: Duration::from_millis(10),
        max_retry_after: Duration::from_secs(5),
    }
}

/// Fetcher serving `total` synthetic issues per query.
///
/// Issue keys are `<query_id>-<n>` with `n` starting at 1.
#[derive(Default)]
pub struct ScriptedFetcher {
    totals: HashMap<String, u64>,
    failures: HashMap<(String, u64), u16>,
    calls: Mutex<Vec<(String, u64)>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_total(mut self, query_id: &str, total: u64) -> Self {
        self.totals.insert(query_id.to_string(), total);
        self
    }

    /// Answer the page at `offset` of `query_id` with a terminal HTTP error
    pub fn failing_at(mut self, query_id: &str, offset: u64, status: u16) -> Self {
        self.failures.insert((query_id.to_string(), offset), status);
        self
    }

    /// Cancel `token` once `calls` pages have been served
    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    pub async fn calls(&self) -> Vec<(String, u64)> {
        self.calls.lock().await.clone()
    }

    pub async fn offsets_for(&self, query_id: &str) -> Vec<u64> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|(id, _)| id == query_id)
            .map(|(_, offset)| *offset)
            .collect()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_page(
        &self,
        query: &QuerySpec,
        offset: u64,
        page_size: u32,
    ) -> Result<Page, FetchError> {
        let served = {
            let mut calls = self.calls.lock().await;
            calls.push((query.id.clone(), offset));
            calls.len()
        };
        if let Some((after, token)) = &self.cancel_after {
            if served >= *after {
                token.cancel();
            }
        }

        if let Some(status) = self.failures.get(&(query.id.clone(), offset)) {
            let message = format!("scripted failure at {}", offset);
            return Err(if *status < 500 {
                FetchError::Client {
                    status: *status,
                    message,
                }
            } else {
                FetchError::RetriesExhausted {
                    attempts: 5,
                    last: Box::new(FetchError::Server {
                        status: Some(*status),
                        message,
                    }),
                }
            });
        }

        let total = self.totals.get(&query.id).copied().unwrap_or(0);
        let end = total.min(offset + u64::from(page_size));
        let records = (offset..end)
            .map(|n| RawRecord {
                key: Some(format!("{}-{}", query.id, n + 1)),
                title: Some(format!("Issue {}", n + 1)),
                ..RawRecord::default()
            })
            .collect();

        Ok(Page {
            records,
            offset,
            page_size,
            total,
        })
    }
}

/// Sink keeping every record in memory
#[derive(Default)]
pub struct CollectingSink {
    records: Mutex<Vec<(String, IssueRecord)>>,
    flushes: Mutex<usize>,
    fail_appends: bool,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose every append fails
    pub fn failing() -> Self {
        Self {
            fail_appends: true,
            ..Self::default()
        }
    }

    pub async fn ids_for(&self, query_id: &str) -> Vec<String> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|(id, _)| id == query_id)
            .map(|(_, record)| record.issue_id.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn flushes(&self) -> usize {
        *self.flushes.lock().await
    }
}

#[async_trait]
impl RecordSink for CollectingSink {
    async fn append(&self, query_id: &str, record: &IssueRecord) -> Result<(), SinkError> {
        if self.fail_appends {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.records
            .lock()
            .await
            .push((query_id.to_string(), record.clone()));
        Ok(())
    }

    async fn flush(&self, _query_id: &str) -> Result<(), SinkError> {
        *self.flushes.lock().await += 1;
        Ok(())
    }
}
