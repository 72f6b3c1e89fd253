//! Database statistics and health overview.
//!
//! Summarizes catalog size, learned rules, the review backlog and conflict
//! resolution progress. Used by `basar stats` and `GET /stats`.

use anyhow::Result;
use serde::Serialize;
use sqlx::Row;

use basarometer_core::conflict::{conflict_stats, ConflictStats};
use basarometer_core::store::{ConflictFilter, Store};

use crate::catalog;
use crate::config::Config;
use crate::sqlite_store::{SqliteStore, TableCounts};

/// Observation counts for one retailer.
#[derive(Debug, Clone, Serialize)]
pub struct RetailerStats {
    pub retailer_id: String,
    pub observations: i64,
    pub avg_confidence: f64,
    pub last_observed: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub tables: TableCounts,
    pub conflicts: ConflictStats,
    pub by_retailer: Vec<RetailerStats>,
}

pub async fn collect(store: &SqliteStore) -> Result<Stats> {
    let tables = store.counts().await?;
    let conflicts = conflict_stats(&store.list_conflicts(ConflictFilter::All).await?);

    let rows = sqlx::query(
        r#"
        SELECT
            retailer_id,
            COUNT(*) AS observations,
            AVG(confidence_score) AS avg_confidence,
            MAX(observed_at) AS last_observed
        FROM price_observations
        WHERE is_active = 1
        GROUP BY retailer_id
        ORDER BY observations DESC, retailer_id
        "#,
    )
    .fetch_all(store.pool())
    .await?;

    let by_retailer = rows
        .iter()
        .map(|row| RetailerStats {
            retailer_id: row.get("retailer_id"),
            observations: row.get("observations"),
            avg_confidence: row.get("avg_confidence"),
            last_observed: row.get("last_observed"),
        })
        .collect();

    Ok(Stats {
        tables,
        conflicts,
        by_retailer,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = catalog::open_store(config).await?;
    let stats = collect(&store).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    let t = &stats.tables;
    let c = &stats.conflicts;

    println!("Basarometer — Database Stats");
    println!("============================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Cuts:          {}", t.cuts);
    println!("  Retailers:     {}", t.retailers);
    println!("  Rules:         {} active / {} total", t.rules_active, t.rules_total);
    println!("  Observations:  {}", t.observations);
    println!(
        "  Review queue:  {} pending / {} total",
        t.discovery_pending, t.discovery_total
    );
    println!();
    println!("  Conflicts:     {}", c.total);
    println!("    auto-resolved:     {}", c.auto_resolved);
    println!("    manually resolved: {}", c.manually_resolved);
    println!("    pending:           {}", c.pending);
    println!("    needs review:      {}", c.needs_human);
    println!("    auto rate:         {}%", c.auto_resolution_rate);
    if let Some(secs) = c.avg_resolution_seconds {
        println!("    avg time to fix:   {}", format_duration(secs));
    }

    if !stats.by_retailer.is_empty() {
        println!();
        println!("  By retailer:");
        println!(
            "  {:<28} {:>8} {:>8}   {}",
            "RETAILER", "OBS", "AVG CONF", "LAST SEEN"
        );
        println!("  {}", "-".repeat(70));
        for r in &stats.by_retailer {
            println!(
                "  {:<28} {:>8} {:>8.2}   {}",
                r.retailer_id,
                r.observations,
                r.avg_confidence,
                r.last_observed
                    .as_deref()
                    .map(format_ts)
                    .unwrap_or_else(|| "never".to_string())
            );
        }
    }

    println!();
    store.pool().close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        format!("{:.1} min", secs / 60.0)
    } else if secs < 86400.0 {
        format!("{:.1} hours", secs / 3600.0)
    } else {
        format!("{:.1} days", secs / 86400.0)
    }
}

fn format_ts(rfc3339: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| rfc3339.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42.0), "42s");
        assert_eq!(format_duration(5400.0), "1.5 hours");
    }

    #[test]
    fn test_format_ts() {
        assert_eq!(format_ts("2025-07-03T10:00:00.000000Z"), "2025-07-03 10:00");
        assert_eq!(format_ts("garbage"), "garbage");
    }
}
