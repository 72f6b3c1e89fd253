//! Storage abstraction for Basarometer.
//!
//! The [`Store`] trait covers the three collaborators the pipeline talks to:
//! the catalog (retailers, canonical cuts, mapping rules), the observation
//! store (price observations and conflicts) and the review surface (the
//! discovery queue). The application crate implements it over SQLite; the
//! in-memory implementation here backs the unit tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    CanonicalCut, Conflict, DiscoveryQueueItem, MappingRule, PriceObservation, Retailer,
};

/// Which conflicts a listing should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictFilter {
    All,
    Unresolved,
    Resolved,
    /// Unresolved and flagged for a human.
    NeedsReview,
}

impl ConflictFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(ConflictFilter::All),
            "unresolved" | "pending" => Some(ConflictFilter::Unresolved),
            "resolved" => Some(ConflictFilter::Resolved),
            "needs_review" | "review" => Some(ConflictFilter::NeedsReview),
            _ => None,
        }
    }

    pub fn matches(&self, conflict: &Conflict) -> bool {
        match self {
            ConflictFilter::All => true,
            ConflictFilter::Unresolved => !conflict.resolved,
            ConflictFilter::Resolved => conflict.resolved,
            ConflictFilter::NeedsReview => {
                !conflict.resolved && conflict.human_intervention_required
            }
        }
    }
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_retailer`](Store::upsert_retailer) / [`upsert_cut`](Store::upsert_cut) | Seed the catalog |
/// | [`insert_rule`](Store::insert_rule) | Store a mapping rule, superseding older ones |
/// | [`insert_observation`](Store::insert_observation) | Record a price report, superseding older ones |
/// | [`deactivate_observations`](Store::deactivate_observations) | Retire observations a resolution has settled |
/// | [`insert_conflict_if_absent`](Store::insert_conflict_if_absent) | Create a conflict unless an unresolved duplicate exists |
/// | [`resolve_conflict`](Store::resolve_conflict) | Terminal transition, applied only once |
/// | [`insert_discovery_item`](Store::insert_discovery_item) | Queue a listing for review |
/// | [`review_discovery_item`](Store::review_discovery_item) | Record an approve/reject decision and its rule once |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a retailer by id.
    async fn upsert_retailer(&self, retailer: &Retailer) -> Result<()>;

    async fn list_retailers(&self) -> Result<Vec<Retailer>>;

    /// Insert or update a canonical cut by id.
    async fn upsert_cut(&self, cut: &CanonicalCut) -> Result<()>;

    async fn list_cuts(&self) -> Result<Vec<CanonicalCut>>;

    /// Look a cut up by its Hebrew or English name.
    async fn find_cut_by_name(&self, name: &str) -> Result<Option<CanonicalCut>>;

    /// Store a new rule. Any active rule with the same `normalized_name` is
    /// marked inactive in the same operation.
    async fn insert_rule(&self, rule: &MappingRule) -> Result<()>;

    /// Active rules, newest first.
    async fn active_rules(&self) -> Result<Vec<MappingRule>>;

    /// Every rule ever stored, including superseded ones.
    async fn list_rules(&self) -> Result<Vec<MappingRule>>;

    async fn increment_rule_usage(&self, rule_id: &str) -> Result<()>;

    /// Store an observation. Active observations for the same
    /// `(canonical_cut_id, retailer_id)` observed at or before it are marked
    /// inactive in the same operation. If an active one observed later
    /// already exists, the new row is stored inactive.
    async fn insert_observation(&self, observation: &PriceObservation) -> Result<()>;

    async fn active_observations(&self) -> Result<Vec<PriceObservation>>;

    /// Mark inactive every active observation of `cut_id` from the given
    /// retailers observed at or before `observed_until`. Returns how many
    /// rows changed.
    async fn deactivate_observations(
        &self,
        cut_id: &str,
        retailer_ids: &[&str],
        observed_until: DateTime<Utc>,
    ) -> Result<u64>;

    /// Insert a conflict unless an unresolved one already exists for the same
    /// `(canonical_cut_id, source1_id, source2_id)`. Returns whether a row was
    /// written.
    async fn insert_conflict_if_absent(&self, conflict: &Conflict) -> Result<bool>;

    async fn get_conflict(&self, id: &str) -> Result<Option<Conflict>>;

    /// Conflicts matching the filter, newest first.
    async fn list_conflicts(&self, filter: ConflictFilter) -> Result<Vec<Conflict>>;

    /// Write the resolution fields of `conflict` if the stored row is still
    /// unresolved. Returns `false` (and changes nothing) otherwise.
    async fn resolve_conflict(&self, conflict: &Conflict) -> Result<bool>;

    /// Record a failed automatic resolution on an unresolved conflict.
    async fn flag_conflict(&self, id: &str, notes: Option<&str>) -> Result<()>;

    async fn insert_discovery_item(&self, item: &DiscoveryQueueItem) -> Result<()>;

    async fn get_discovery_item(&self, id: &str) -> Result<Option<DiscoveryQueueItem>>;

    /// Queue items, newest first.
    async fn list_discovery(
        &self,
        pending_only: bool,
        limit: Option<i64>,
    ) -> Result<Vec<DiscoveryQueueItem>>;

    /// Record an admin decision if the item is still pending, storing `rule`
    /// (with the same supersession as [`insert_rule`](Store::insert_rule)) in
    /// the same operation. Either both land or neither does. Returns `false`
    /// when the item was already reviewed.
    async fn review_discovery_item(
        &self,
        id: &str,
        approved: bool,
        admin_notes: Option<&str>,
        rule: Option<&MappingRule>,
    ) -> Result<bool>;

    /// Pending items whose product name contains `token`.
    async fn pending_items_with_token(&self, token: &str) -> Result<Vec<DiscoveryQueueItem>>;

    /// Batch update of `(id, confidence_score)` pairs.
    async fn update_discovery_confidences(&self, updates: &[(String, f64)]) -> Result<()>;
}
