//! Listing ingestion.
//!
//! Reads a batch of listings (a JSON array, or one JSON object per line)
//! and runs each through the pipeline. Every listing ends as an
//! observation, a discovery-queue item or a rejection; malformed records
//! and per-listing errors are counted and the batch continues.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info, warn};

use basarometer_core::models::Listing;
use basarometer_core::pipeline::{IngestOutcome, Pipeline};
use basarometer_core::store::Store;

use crate::catalog;
use crate::config::Config;

/// Per-batch counters.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestSummary {
    pub read: usize,
    pub observed: usize,
    pub queued: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl IngestSummary {
    pub fn record(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Observed { .. } => self.observed += 1,
            IngestOutcome::Queued { .. } => self.queued += 1,
            IngestOutcome::Rejected { .. } => self.rejected += 1,
        }
    }
}

/// One parsed record: the listing or the reason it could not be read.
pub type ParsedListing = std::result::Result<Listing, String>;

/// Parse listings from a JSON array or from JSON lines.
///
/// A malformed array fails as a whole; malformed lines fail individually.
pub fn parse_listings(text: &str) -> Result<Vec<ParsedListing>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let listings: Vec<Listing> =
            serde_json::from_str(trimmed).context("Failed to parse listing array")?;
        return Ok(listings.into_iter().map(Ok).collect());
    }

    Ok(text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<Listing>(line).map_err(|e| format!("line {}: {}", n + 1, e))
        })
        .collect())
}

/// SHA-256 of the input, hex encoded.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Run a batch through the pipeline. With `dry_run`, nothing is written.
pub async fn ingest_batch(
    pipeline: &mut Pipeline,
    store: &dyn Store,
    records: Vec<ParsedListing>,
    dry_run: bool,
) -> IngestSummary {
    let mut summary = IngestSummary::default();

    for record in records {
        summary.read += 1;
        let listing = match record {
            Ok(l) => l,
            Err(reason) => {
                warn!("skipping malformed listing: {}", reason);
                summary.failed += 1;
                continue;
            }
        };

        let result = if dry_run {
            pipeline.assess(store, &listing).await
        } else {
            pipeline.ingest(store, &listing).await
        };
        match result {
            Ok(outcome) => {
                debug!(name = %listing.name, outcome = outcome.label(), "listing processed");
                summary.record(&outcome);
            }
            Err(e) => {
                warn!(name = %listing.name, "listing failed: {}", e);
                summary.failed += 1;
            }
        }
    }

    summary
}

/// `basar ingest <file>`.
pub async fn run_ingest(
    config: &Config,
    path: &Path,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read listings file: {}", path.display()))?;
    let hash = fingerprint(&bytes);
    let text = String::from_utf8(bytes)
        .with_context(|| format!("Listings file is not UTF-8: {}", path.display()))?;

    let mut records = parse_listings(&text)?;
    if let Some(lim) = limit {
        records.truncate(lim);
    }

    let store = catalog::open_store(config).await?;
    let mut pipeline = catalog::load_pipeline(config, &store).await;
    let summary = ingest_batch(&mut pipeline, &store, records, dry_run).await;

    info!(
        file = %path.display(),
        sha256 = %hash,
        dry_run,
        read = summary.read,
        observed = summary.observed,
        queued = summary.queued,
        rejected = summary.rejected,
        failed = summary.failed,
        "ingest complete"
    );

    if dry_run {
        println!("ingest {} (dry-run)", path.display());
    } else {
        println!("ingest {}", path.display());
    }
    println!("  sha256: {}", hash);
    println!("  read: {}", summary.read);
    println!("  observed: {}", summary.observed);
    println!("  queued for review: {}", summary.queued);
    println!("  rejected: {}", summary.rejected);
    println!("  failed: {}", summary.failed);
    println!("ok");

    store.pool().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use basarometer_core::classifier::Classifier;
    use basarometer_core::pipeline::PipelineSettings;
    use basarometer_core::rules::RuleTable;
    use basarometer_core::store::memory::InMemoryStore;

    const LINES: &str = r#"{"name": "אנטריקוט בקר טרי", "price": 119.9, "unit": "ק\"ג", "source": "rami_levy", "vendor": "rami-levy"}
{"name": "חלב 3%", "price": 6.5, "source": "rami_levy"}

not json
{"name": "ברווז שלם", "price": 70, "source": "shufersal"}
"#;

    #[test]
    fn test_parse_json_lines_keeps_bad_lines_as_errors() {
        let records = parse_listings(LINES).unwrap();
        assert_eq!(records.len(), 4);
        assert!(records[2].as_ref().unwrap_err().starts_with("line 4"));
    }

    #[test]
    fn test_parse_array() {
        let records =
            parse_listings(r#"[{"name": "פילה", "price": 150, "source": "x"}]"#).unwrap();
        assert_eq!(records.len(), 1);
        assert!(parse_listings("[{\"name\": 1}]").is_err());
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint(b"abc");
        assert_eq!(
            fp,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_batch_counts_every_listing_once() {
        let store = InMemoryStore::new();
        let table = RuleTable::seed();
        catalog::seed_catalog(&store, &table).await.unwrap();
        let mut pipeline = Pipeline::new(Classifier::new(table), PipelineSettings::default());

        let summary =
            ingest_batch(&mut pipeline, &store, parse_listings(LINES).unwrap(), false).await;
        assert_eq!(summary.read, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.observed + summary.queued + summary.rejected + summary.failed,
            summary.read
        );
        assert_eq!(summary.rejected, 1);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let store = InMemoryStore::new();
        let table = RuleTable::seed();
        catalog::seed_catalog(&store, &table).await.unwrap();
        let mut pipeline = Pipeline::new(Classifier::new(table), PipelineSettings::default());

        ingest_batch(&mut pipeline, &store, parse_listings(LINES).unwrap(), true).await;
        assert!(store.active_observations().await.unwrap().is_empty());
        assert!(store.list_discovery(false, None).await.unwrap().is_empty());
    }
}
