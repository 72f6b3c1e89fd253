//! Idempotent schema migrations.
//!
//! Every statement uses `IF NOT EXISTS`, so `basar init` can be run any
//! number of times. Two partial unique indexes carry invariants:
//!
//! - at most one active mapping rule per normalized name;
//! - at most one unresolved conflict per `(cut, source1, source2)`.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS retailers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS meat_cuts (
        id TEXT PRIMARY KEY,
        name_hebrew TEXT NOT NULL,
        name_english TEXT NOT NULL,
        category TEXT NOT NULL,
        typical_price_min REAL,
        typical_price_max REAL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mapping_rules (
        id TEXT PRIMARY KEY,
        original_name TEXT NOT NULL,
        normalized_name TEXT NOT NULL,
        category TEXT,
        quality_grade TEXT,
        confidence REAL NOT NULL,
        source TEXT NOT NULL,
        usage_count INTEGER NOT NULL DEFAULT 0,
        active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS price_observations (
        id TEXT PRIMARY KEY,
        canonical_cut_id TEXT NOT NULL REFERENCES meat_cuts(id),
        retailer_id TEXT NOT NULL REFERENCES retailers(id),
        price_per_kg REAL NOT NULL,
        confidence_score REAL NOT NULL,
        source TEXT NOT NULL,
        observed_at TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS price_conflicts (
        id TEXT PRIMARY KEY,
        canonical_cut_id TEXT NOT NULL,
        product_identifier TEXT NOT NULL,
        source1_id TEXT NOT NULL,
        source2_id TEXT NOT NULL,
        price1 REAL NOT NULL,
        price2 REAL NOT NULL,
        confidence1 REAL NOT NULL,
        confidence2 REAL NOT NULL,
        percentage_difference REAL NOT NULL,
        confidence_score REAL NOT NULL,
        resolved INTEGER NOT NULL DEFAULT 0,
        resolution_method TEXT,
        resolved_price REAL,
        resolution_confidence REAL,
        auto_resolution_attempted INTEGER NOT NULL DEFAULT 0,
        human_intervention_required INTEGER NOT NULL DEFAULT 0,
        notes TEXT,
        created_at TEXT NOT NULL,
        resolved_at TEXT,
        CHECK (source1_id <> source2_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS discovery_queue (
        id TEXT PRIMARY KEY,
        product_name TEXT NOT NULL,
        normalized_suggestion TEXT NOT NULL,
        category_suggestion TEXT,
        quality_grade_suggestion TEXT,
        confidence_score REAL NOT NULL,
        approved INTEGER,
        manual_review_needed INTEGER NOT NULL DEFAULT 1,
        admin_notes TEXT,
        source TEXT,
        price REAL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_rules_active_name ON mapping_rules(normalized_name) WHERE active = 1",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_conflicts_open_triple ON price_conflicts(canonical_cut_id, source1_id, source2_id) WHERE resolved = 0",
    "CREATE INDEX IF NOT EXISTS idx_observations_cut_day ON price_observations(canonical_cut_id, observed_at)",
    "CREATE INDEX IF NOT EXISTS idx_observations_current ON price_observations(canonical_cut_id, retailer_id) WHERE is_active = 1",
    "CREATE INDEX IF NOT EXISTS idx_discovery_pending ON discovery_queue(created_at DESC) WHERE approved IS NULL",
];

/// Apply the schema to an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Open the configured database and apply the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    info!(path = %config.db.path.display(), "schema up to date");
    pool.close().await;
    Ok(())
}
