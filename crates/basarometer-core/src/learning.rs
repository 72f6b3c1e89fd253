//! The learning loop: admin decisions on discovery-queue items.
//!
//! Approving an item turns it into a [`MappingRule`] and nudges the
//! confidence of pending items that share its first word. Rejecting an item
//! only records the decision.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{DiscoveryQueueItem, MappingRule, RuleSource};
use crate::normalize::{first_token, normalize};
use crate::store::Store;

/// Bounds on how far one approval may raise similar items' confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LearningPolicy {
    pub max_confidence_nudge: f64,
    pub nudge_factor: f64,
}

impl Default for LearningPolicy {
    fn default() -> Self {
        Self {
            max_confidence_nudge: 0.05,
            nudge_factor: 0.2,
        }
    }
}

/// Admin corrections applied to the rule created by an approval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverrideClassification {
    #[serde(default)]
    pub normalized_name: Option<String>,
    #[serde(default)]
    pub quality_grade: Option<String>,
    /// Absolute confidence for the new rule, clamped to `0..=1`.
    #[serde(default)]
    pub confidence_adjustment: Option<f64>,
}

/// One approve/reject decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub discovery_id: String,
    pub approved: bool,
    #[serde(default)]
    pub admin_notes: Option<String>,
    #[serde(default)]
    pub override_classification: Option<OverrideClassification>,
}

/// Result of [`approve`].
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub mapping_created: bool,
    pub mapping_id: Option<String>,
    pub discovery_id: String,
    pub confidence_boost: f64,
    pub similar_items_affected: usize,
    #[serde(skip)]
    pub rule: Option<MappingRule>,
}

/// Counts returned by [`bulk_approve`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkApprovalSummary {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub mappings_created: usize,
}

/// Confidence boost an approval at `approved_confidence` gives similar items.
pub fn nudge_amount(approved_confidence: f64, policy: &LearningPolicy) -> f64 {
    ((1.0 - approved_confidence) * policy.nudge_factor)
        .clamp(0.0, policy.max_confidence_nudge)
}

fn rule_from_item(
    item: &DiscoveryQueueItem,
    over: Option<&OverrideClassification>,
    source: RuleSource,
) -> MappingRule {
    let normalized_name = over
        .and_then(|o| o.normalized_name.as_deref())
        .map(normalize)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| normalize(&item.normalized_suggestion));
    let quality_grade = over
        .and_then(|o| o.quality_grade.clone())
        .or_else(|| item.quality_grade_suggestion.clone());
    let confidence = over
        .and_then(|o| o.confidence_adjustment)
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(item.confidence_score);

    MappingRule {
        id: Uuid::new_v4().to_string(),
        original_name: item.product_name.clone(),
        normalized_name,
        category: item.category_suggestion.clone(),
        quality_grade,
        confidence,
        source,
        usage_count: 1,
        active: true,
        created_at: Utc::now(),
    }
}

async fn pending_item(store: &dyn Store, id: &str) -> Result<DiscoveryQueueItem> {
    let item = store
        .get_discovery_item(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("discovery item {}", id)))?;
    if !item.is_pending() {
        return Err(Error::AlreadyReviewed(id.to_string()));
    }
    Ok(item)
}

/// Raise the confidence of pending items that share the approved item's
/// first word. Returns how many items changed.
async fn nudge_similar(
    store: &dyn Store,
    item: &DiscoveryQueueItem,
    boost: f64,
) -> anyhow::Result<usize> {
    let Some(token) = first_token(&item.product_name) else {
        return Ok(0);
    };
    if boost <= 0.0 {
        return Ok(0);
    }
    let updates: Vec<(String, f64)> = store
        .pending_items_with_token(&token)
        .await?
        .into_iter()
        .filter(|s| s.id != item.id && s.confidence_score < 1.0)
        .map(|s| (s.id, (s.confidence_score + boost).min(1.0)))
        .collect();
    store.update_discovery_confidences(&updates).await?;
    Ok(updates.len())
}

/// Record an admin decision on one discovery item.
pub async fn approve(
    store: &dyn Store,
    decision: &ApprovalDecision,
    policy: &LearningPolicy,
) -> Result<ApprovalOutcome> {
    let id = decision.discovery_id.trim();
    if id.is_empty() {
        return Err(Error::invalid("discovery_id is required"));
    }
    let item = pending_item(store, id).await?;

    let rule = decision.approved.then(|| {
        rule_from_item(
            &item,
            decision.override_classification.as_ref(),
            RuleSource::AdminApproved,
        )
    });
    if !store
        .review_discovery_item(
            id,
            decision.approved,
            decision.admin_notes.as_deref(),
            rule.as_ref(),
        )
        .await?
    {
        return Err(Error::AlreadyReviewed(id.to_string()));
    }

    let Some(rule) = rule else {
        info!(target: "audit", action = "reject_discovery", discovery = %id, "discovery item rejected");
        return Ok(ApprovalOutcome {
            mapping_created: false,
            mapping_id: None,
            discovery_id: id.to_string(),
            confidence_boost: 0.0,
            similar_items_affected: 0,
            rule: None,
        });
    };

    let boost = nudge_amount(rule.confidence, policy);
    let affected = match nudge_similar(store, &item, boost).await {
        Ok(n) => n,
        Err(e) => {
            warn!(discovery = %id, "failed to nudge similar items: {:#}", e);
            0
        }
    };

    info!(
        target: "audit",
        action = "approve_discovery",
        discovery = %id,
        mapping = %rule.id,
        normalized = %rule.normalized_name,
        boost,
        affected,
        "discovery item approved"
    );

    Ok(ApprovalOutcome {
        mapping_created: true,
        mapping_id: Some(rule.id.clone()),
        discovery_id: id.to_string(),
        confidence_boost: if affected > 0 { boost } else { 0.0 },
        similar_items_affected: affected,
        rule: Some(rule),
    })
}

/// Apply one decision to many items. Similar items are not nudged.
///
/// Per-item failures (unknown id, already reviewed, storage error) are
/// counted and the batch continues.
pub async fn bulk_approve(
    store: &dyn Store,
    ids: &[String],
    approved: bool,
) -> Result<BulkApprovalSummary> {
    if ids.is_empty() {
        return Err(Error::invalid("discovery_ids must not be empty"));
    }

    let mut summary = BulkApprovalSummary::default();
    for id in ids {
        summary.processed += 1;
        match bulk_one(store, id, approved).await {
            Ok(created) => {
                summary.successful += 1;
                if created {
                    summary.mappings_created += 1;
                }
            }
            Err(e) => {
                warn!(discovery = %id, "bulk review failed: {}", e);
                summary.failed += 1;
            }
        }
    }

    info!(
        target: "audit",
        action = if approved { "bulk_approve_discoveries" } else { "bulk_reject_discoveries" },
        processed = summary.processed,
        successful = summary.successful,
        failed = summary.failed,
        mappings_created = summary.mappings_created,
        "bulk review complete"
    );
    Ok(summary)
}

async fn bulk_one(store: &dyn Store, id: &str, approved: bool) -> Result<bool> {
    let item = pending_item(store, id).await?;
    let rule = approved.then(|| rule_from_item(&item, None, RuleSource::AdminBulkApproved));
    if !store
        .review_discovery_item(id, approved, None, rule.as_ref())
        .await?
    {
        return Err(Error::AlreadyReviewed(id.to_string()));
    }
    Ok(rule.is_some())
}
