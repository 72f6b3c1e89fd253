//! Core data models used throughout Basarometer.
//!
//! These types represent the listings, classifications, catalog rows, price
//! observations, conflicts and review-queue items that flow through the
//! reconciliation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw product listing produced by a scraper, a government feed or an OCR
/// receipt mapping, before any normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub unit: Option<String>,
    pub source: String,
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

/// Outcome of meat/non-meat classification for one `(name, category)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub is_valid_meat: bool,
    pub confidence: f64,
    pub category: Option<String>,
    pub quality_grade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contamination_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_correction: Option<String>,
    /// Lexical family that triggered the contamination screen (e.g. `dairy`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contamination_family: Option<String>,
    /// Learned mapping rule that produced the match, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule_id: Option<String>,
}

/// Where a mapping rule came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    AdminApproved,
    AdminBulkApproved,
    AutoLearned,
    Seed,
}

impl RuleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSource::AdminApproved => "admin_approved",
            RuleSource::AdminBulkApproved => "admin_bulk_approved",
            RuleSource::AutoLearned => "auto_learned",
            RuleSource::Seed => "seed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin_approved" => Some(RuleSource::AdminApproved),
            "admin_bulk_approved" => Some(RuleSource::AdminBulkApproved),
            "auto_learned" => Some(RuleSource::AutoLearned),
            "seed" => Some(RuleSource::Seed),
            _ => None,
        }
    }
}

/// A persisted association between a raw product-name pattern and its
/// canonical classification.
///
/// Rules are never deleted. When a newer rule is stored for the same
/// `normalized_name`, the older one is kept with `active = false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRule {
    pub id: String,
    pub original_name: String,
    pub normalized_name: String,
    pub category: Option<String>,
    pub quality_grade: Option<String>,
    pub confidence: f64,
    pub source: RuleSource,
    pub usage_count: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A retailer (chain or site) that reports prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retailer {
    pub id: String,
    pub name: String,
}

/// The catalog's authoritative representation of a meat product type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCut {
    pub id: String,
    pub name_hebrew: String,
    pub name_english: String,
    pub category: String,
    pub typical_price_min: Option<f64>,
    pub typical_price_max: Option<f64>,
}

/// One price report for a mapped listing. Immutable once written; a newer
/// report for the same cut and retailer, or a conflict resolution that
/// settles it, expires the row through `is_active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceObservation {
    pub id: String,
    pub canonical_cut_id: String,
    pub retailer_id: String,
    pub price_per_kg: f64,
    pub confidence_score: f64,
    pub source: String,
    pub observed_at: DateTime<Utc>,
    pub is_active: bool,
}

/// How a conflict reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    PatternBased,
    AdminOverride,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMethod::PatternBased => "pattern_based",
            ResolutionMethod::AdminOverride => "admin_override",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pattern_based" => Some(ResolutionMethod::PatternBased),
            "admin_override" => Some(ResolutionMethod::AdminOverride),
            _ => None,
        }
    }
}

/// A detected disagreement between two sources about the price of one cut.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub canonical_cut_id: String,
    pub product_identifier: String,
    pub source1_id: String,
    pub source2_id: String,
    pub price1: f64,
    pub price2: f64,
    /// Observation confidence (0..1) behind `price1`.
    pub confidence1: f64,
    /// Observation confidence (0..1) behind `price2`.
    pub confidence2: f64,
    /// Relative difference in percent, two decimals.
    pub percentage_difference: f64,
    /// Certainty about the better-supported side, on a 0..100 scale.
    pub confidence_score: f64,
    pub resolved: bool,
    pub resolution_method: Option<ResolutionMethod>,
    pub resolved_price: Option<f64>,
    pub resolution_confidence: Option<f64>,
    pub auto_resolution_attempted: bool,
    pub human_intervention_required: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A listing held back for human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryQueueItem {
    pub id: String,
    pub product_name: String,
    pub normalized_suggestion: String,
    pub category_suggestion: Option<String>,
    pub quality_grade_suggestion: Option<String>,
    pub confidence_score: f64,
    /// `None` while pending, `Some(true|false)` once an admin decided.
    pub approved: Option<bool>,
    pub manual_review_needed: bool,
    pub admin_notes: Option<String>,
    pub source: Option<String>,
    pub price: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl DiscoveryQueueItem {
    pub fn is_pending(&self) -> bool {
        self.approved.is_none()
    }
}
