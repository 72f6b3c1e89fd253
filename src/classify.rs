//! `basar classify` and `basar validate`.
//!
//! Both run the classifier only; nothing is written. Learned rules are
//! loaded from the database when it is reachable, otherwise the rule
//! table alone is used.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{error, warn};

use basarometer_core::classifier::Classifier;
use basarometer_core::store::Store;

use crate::catalog;
use crate::config::Config;
use crate::ingest::parse_listings;

async fn load_classifier(config: &Config) -> Classifier {
    let table = catalog::load_rule_table(config);
    let learned = async {
        let store = catalog::open_store(config).await?;
        let rules = store.active_rules().await;
        store.pool().close().await;
        rules
    }
    .await;

    match learned {
        Ok(rules) => Classifier::with_learned_rules(table, rules),
        Err(e) => {
            error!("learned rules unavailable, classifying with the rule table only: {:#}", e);
            Classifier::new(table)
        }
    }
}

pub async fn run_classify(config: &Config, name: &str, category: Option<&str>) -> Result<()> {
    let mut classifier = load_classifier(config).await;
    let result = classifier.classify(name, category);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Classify every listing in a file and print the purity report.
pub async fn run_validate(config: &Config, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read listings file: {}", path.display()))?;

    let mut products = Vec::new();
    let mut skipped = 0usize;
    for record in parse_listings(&text)? {
        match record {
            Ok(l) => products.push((l.name, l.category)),
            Err(reason) => {
                warn!("skipping malformed listing: {}", reason);
                skipped += 1;
            }
        }
    }

    let mut classifier = load_classifier(config).await;
    let report = classifier.quality_report(&products);

    println!("validate {}", path.display());
    println!("  products: {}", report.total_products);
    println!("  valid meat: {}", report.valid_meat_products);
    println!("  contaminated: {}", report.contaminated_products);
    println!("  purity: {:.1}%", report.purity_percentage);
    if skipped > 0 {
        println!("  malformed: {}", skipped);
    }
    if !report.contamination_sources.is_empty() {
        println!("  contamination sources:");
        for (family, count) in &report.contamination_sources {
            println!("    {:<16} {:>5}", family, count);
        }
    }
    Ok(())
}
