//! Catalog seeding and the shared store/pipeline bootstrap.
//!
//! `basar seed` copies the rule table's cut aliases and retailer aliases
//! into the `meat_cuts` and `retailers` tables. Ids are derived from the
//! English cut name and the retailer slug, so reseeding updates rows in
//! place instead of duplicating them.

use anyhow::Result;
use std::collections::BTreeSet;
use tracing::{error, info};

use basarometer_core::classifier::Classifier;
use basarometer_core::models::{CanonicalCut, MappingRule, Retailer};
use basarometer_core::pipeline::Pipeline;
use basarometer_core::rules::RuleTable;
use basarometer_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// What a seed pass wrote.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedSummary {
    pub cuts: usize,
    pub retailers: usize,
}

pub fn cut_id(name_english: &str) -> String {
    format!("cut-{}", name_english)
}

pub fn retailer_id(slug: &str) -> String {
    format!("retailer-{}", slug)
}

/// Open the configured database as a [`SqliteStore`].
pub async fn open_store(config: &Config) -> Result<SqliteStore> {
    let pool = db::connect(config).await?;
    Ok(SqliteStore::new(pool))
}

/// Load the configured rule table, falling back to built-in rules.
pub fn load_rule_table(config: &Config) -> RuleTable {
    RuleTable::load_or_fallback(config.rules.path.as_deref())
}

/// Active learned rules. An unreadable rule store yields none, so
/// classification falls back to the seeded table.
pub async fn learned_rules(store: &dyn Store) -> Vec<MappingRule> {
    match store.active_rules().await {
        Ok(rules) => rules,
        Err(e) => {
            error!("learned rules unavailable, classifying with seeded rules only: {:#}", e);
            Vec::new()
        }
    }
}

/// Build a pipeline whose classifier knows every active learned rule.
pub async fn load_pipeline(config: &Config, store: &dyn Store) -> Pipeline {
    let table = load_rule_table(config);
    let classifier = Classifier::with_learned_rules(table, learned_rules(store).await);
    Pipeline::new(classifier, config.pipeline_settings())
}

/// Upsert the table's cuts and retailers into the store.
pub async fn seed_catalog(store: &dyn Store, table: &RuleTable) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for alias in &table.cuts {
        let (min, max) = match alias.typical_price {
            Some((lo, hi)) => (Some(lo), Some(hi)),
            None => (None, None),
        };
        store
            .upsert_cut(&CanonicalCut {
                id: cut_id(&alias.name_english),
                name_hebrew: alias.name_hebrew.clone(),
                name_english: alias.name_english.clone(),
                category: alias.category.clone(),
                typical_price_min: min,
                typical_price_max: max,
            })
            .await?;
        summary.cuts += 1;
    }

    let slugs: BTreeSet<&String> = table.retailers.values().collect();
    for slug in slugs {
        store
            .upsert_retailer(&Retailer {
                id: retailer_id(slug),
                name: slug.clone(),
            })
            .await?;
        summary.retailers += 1;
    }

    info!(
        version = %table.version,
        cuts = summary.cuts,
        retailers = summary.retailers,
        "catalog seeded"
    );
    Ok(summary)
}

/// `basar seed`.
pub async fn run_seed(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let table = load_rule_table(config);
    let summary = seed_catalog(&store, &table).await?;

    println!("seed {}", table.version);
    println!("  fingerprint: {}", table.fingerprint());
    println!("  cuts: {}", summary.cuts);
    println!("  retailers: {}", summary.retailers);
    println!("ok");

    store.pool().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use basarometer_core::store::memory::InMemoryStore;

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = InMemoryStore::new();
        let table = RuleTable::seed();

        let first = seed_catalog(&store, &table).await.unwrap();
        let second = seed_catalog(&store, &table).await.unwrap();
        assert_eq!(first, second);

        let cuts = store.list_cuts().await.unwrap();
        assert_eq!(cuts.len(), table.cuts.len());
        assert!(cuts.iter().any(|c| c.id == "cut-entrecote"));

        let retailers = store.list_retailers().await.unwrap();
        assert!(retailers.iter().any(|r| r.id == "retailer-rami-levy"));
    }

    #[tokio::test]
    async fn test_unreadable_rule_store_degrades_to_seeded_rules() {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

        let dir = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("test.sqlite"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        let store = SqliteStore::new(pool);
        sqlx::query("DROP TABLE mapping_rules")
            .execute(store.pool())
            .await
            .unwrap();

        assert!(learned_rules(&store).await.is_empty());
        let mut classifier =
            Classifier::with_learned_rules(RuleTable::seed(), learned_rules(&store).await);
        assert!(classifier.classify("אנטריקוט בקר טרי", None).is_valid_meat);
    }
}
