//! Row-by-row extraction: timestamp, plain text, attributed body, registry.

use crate::archive::{self, DecodeError};
use crate::links::{LinkExtractor, LinkMatcher};
use crate::registry::{LinkRegistry, SharedRegistry};
use crate::store::MessageRow;
use crate::timestamp::from_store_time;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;

// =============================================================================
// Run statistics
// =============================================================================

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub rows_processed: usize,
    pub rows_skipped_timestamp: usize,
    pub blobs_decoded: usize,
    pub blobs_failed: usize,
    pub links_merged: usize,
    pub errors: Vec<String>,
}

impl PipelineStats {
    fn absorb(&mut self, other: PipelineStats) {
        self.rows_processed += other.rows_processed;
        self.rows_skipped_timestamp += other.rows_skipped_timestamp;
        self.blobs_decoded += other.blobs_decoded;
        self.blobs_failed += other.blobs_failed;
        self.links_merged += other.links_merged;
        self.errors.extend(other.errors);
    }
}

/// Links recovered from one row, ready to merge.
#[derive(Debug, Default)]
struct RowLinks {
    timestamp: Option<DateTime<Utc>>,
    urls: BTreeSet<String>,
    stats: PipelineStats,
}

// =============================================================================
// Pipeline
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Scan the lossy text of blobs that fail to decode.
    pub scan_raw_blobs: bool,
}

pub struct Pipeline {
    matcher: LinkMatcher,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(matcher: LinkMatcher, options: PipelineOptions) -> Self {
        Self { matcher, options }
    }

    pub fn matcher(&self) -> &LinkMatcher {
        &self.matcher
    }

    /// Process rows in order into a fresh registry.
    pub fn run(&self, rows: &[MessageRow]) -> (LinkRegistry, PipelineStats) {
        let mut registry = LinkRegistry::new();
        let mut stats = PipelineStats::default();
        for row in rows {
            self.process_row(&mut registry, row, &mut stats);
        }
        tracing::info!(
            rows = stats.rows_processed,
            links = registry.len(),
            failed_blobs = stats.blobs_failed,
            "pipeline finished"
        );
        (registry, stats)
    }

    /// Same result as [`Pipeline::run`], with rows spread over the rayon pool.
    pub fn run_parallel(&self, rows: &[MessageRow]) -> (LinkRegistry, PipelineStats) {
        let shared = SharedRegistry::new(LinkRegistry::new());
        let stats = rows
            .par_iter()
            .map(|row| {
                let mut found = self.extract_row(row);
                if let Some(timestamp) = found.timestamp {
                    let sender = row.sender_display();
                    for url in &found.urls {
                        if shared.merge(url, timestamp, sender) {
                            found.stats.links_merged += 1;
                        }
                    }
                }
                found.stats
            })
            .reduce(PipelineStats::default, |mut acc, s| {
                acc.absorb(s);
                acc
            });

        let registry = shared.into_inner();
        tracing::info!(
            rows = stats.rows_processed,
            links = registry.len(),
            failed_blobs = stats.blobs_failed,
            "parallel pipeline finished"
        );
        (registry, stats)
    }

    /// Extract one row and merge its links. Never fails: problems are
    /// recorded in `stats` and the row is skipped in part or whole.
    pub fn process_row(&self, registry: &mut LinkRegistry, row: &MessageRow, stats: &mut PipelineStats) {
        let found = self.extract_row(row);
        if let Some(timestamp) = found.timestamp {
            let sender = row.sender_display();
            let mut merged = 0;
            for url in &found.urls {
                if registry.merge(url, timestamp, sender) {
                    merged += 1;
                }
            }
            stats.links_merged += merged;
        }
        stats.absorb(found.stats);
    }

    fn extract_row(&self, row: &MessageRow) -> RowLinks {
        let mut out = RowLinks::default();
        out.stats.rows_processed = 1;

        let timestamp = match from_store_time(row.raw_timestamp) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(raw = ?row.raw_timestamp, error = %e, "skipping row");
                out.stats.rows_skipped_timestamp = 1;
                return out;
            }
        };
        out.timestamp = Some(timestamp);

        let extractor = LinkExtractor::new(&self.matcher);

        if let Some(text) = row.text.as_deref().filter(|t| !t.is_empty()) {
            out.urls.extend(extractor.extract_text(text));
        }

        if let Some(blob) = row.attributed_body.as_deref().filter(|b| !b.is_empty()) {
            match archive::decode(blob) {
                Ok(decoded) => {
                    out.stats.blobs_decoded = 1;
                    out.urls.extend(extractor.extract_archive(&decoded));
                }
                Err(e) => {
                    self.record_decode_failure(&mut out.stats, timestamp, &e);
                    if self.options.scan_raw_blobs {
                        out.urls.extend(extractor.extract_text(&String::from_utf8_lossy(blob)));
                    }
                }
            }
        }
        out
    }

    fn record_decode_failure(&self, stats: &mut PipelineStats, timestamp: DateTime<Utc>, error: &DecodeError) {
        tracing::warn!(%timestamp, %error, "skipping undecodable attributed body");
        stats.blobs_failed = 1;
        stats.errors.push(format!("{}: {}", timestamp.to_rfc3339(), error));
    }
}
