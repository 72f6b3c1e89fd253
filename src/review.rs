//! Discovery-queue review commands: `queue`, `approve`, `bulk-approve`.

use anyhow::Result;

use basarometer_core::learning::{self, ApprovalDecision, OverrideClassification};
use basarometer_core::store::Store;

use crate::catalog;
use crate::config::Config;

/// `basar queue`: list pending items, newest first.
pub async fn run_queue(config: &Config, limit: Option<i64>) -> Result<()> {
    let store = catalog::open_store(config).await?;
    let items = store.list_discovery(true, limit).await?;

    if items.is_empty() {
        println!("No items awaiting review.");
    } else {
        println!(
            "{:<36}  {:>5}  {:<8}  {:<10}  {:>8}  NAME",
            "ID", "CONF", "CATEGORY", "GRADE", "PRICE"
        );
        for item in &items {
            println!(
                "{:<36}  {:>5.2}  {:<8}  {:<10}  {:>8}  {}",
                item.id,
                item.confidence_score,
                item.category_suggestion.as_deref().unwrap_or("-"),
                item.quality_grade_suggestion.as_deref().unwrap_or("-"),
                item.price
                    .map(|p| format!("{:.2}", p))
                    .unwrap_or_else(|| "-".to_string()),
                item.product_name
            );
        }
    }

    store.pool().close().await;
    Ok(())
}

/// Flags for `basar approve`.
#[derive(Debug, Default)]
pub struct ApproveArgs {
    pub reject: bool,
    pub notes: Option<String>,
    pub normalized_name: Option<String>,
    pub grade: Option<String>,
    pub confidence: Option<f64>,
}

impl ApproveArgs {
    fn into_decision(self, id: &str) -> ApprovalDecision {
        let override_classification =
            if self.normalized_name.is_some() || self.grade.is_some() || self.confidence.is_some() {
                Some(OverrideClassification {
                    normalized_name: self.normalized_name,
                    quality_grade: self.grade,
                    confidence_adjustment: self.confidence,
                })
            } else {
                None
            };
        ApprovalDecision {
            discovery_id: id.to_string(),
            approved: !self.reject,
            admin_notes: self.notes,
            override_classification,
        }
    }
}

/// `basar approve <id>`.
pub async fn run_approve(config: &Config, id: &str, args: ApproveArgs) -> Result<()> {
    let store = catalog::open_store(config).await?;
    let decision = args.into_decision(id);
    let outcome = learning::approve(&store, &decision, &config.learning_policy()).await?;

    if decision.approved {
        println!("approved {}", outcome.discovery_id);
        if let Some(rule) = &outcome.rule {
            println!("  mapping: {} ({})", rule.id, rule.normalized_name);
            println!("  confidence: {:.2}", rule.confidence);
        }
        println!("  similar items nudged: {}", outcome.similar_items_affected);
        if outcome.similar_items_affected > 0 {
            println!("  boost: +{:.3}", outcome.confidence_boost);
        }
    } else {
        println!("rejected {}", outcome.discovery_id);
    }

    store.pool().close().await;
    Ok(())
}

/// `basar bulk-approve <ids..>`.
pub async fn run_bulk_approve(config: &Config, ids: &[String], reject: bool) -> Result<()> {
    let store = catalog::open_store(config).await?;
    let summary = learning::bulk_approve(&store, ids, !reject).await?;

    println!("bulk {}", if reject { "reject" } else { "approve" });
    println!("  processed: {}", summary.processed);
    println!("  successful: {}", summary.successful);
    println!("  failed: {}", summary.failed);
    println!("  mappings created: {}", summary.mappings_created);

    store.pool().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_only_when_a_field_is_given() {
        let plain = ApproveArgs::default().into_decision("d1");
        assert!(plain.approved);
        assert!(plain.override_classification.is_none());

        let over = ApproveArgs {
            grade: Some("premium".to_string()),
            ..Default::default()
        }
        .into_decision("d1");
        let o = over.override_classification.unwrap();
        assert_eq!(o.quality_grade.as_deref(), Some("premium"));
        assert!(o.normalized_name.is_none());
    }

    #[test]
    fn test_reject_flag() {
        let d = ApproveArgs {
            reject: true,
            notes: Some("not meat".to_string()),
            ..Default::default()
        }
        .into_decision("d2");
        assert!(!d.approved);
        assert_eq!(d.admin_notes.as_deref(), Some("not meat"));
    }
}
