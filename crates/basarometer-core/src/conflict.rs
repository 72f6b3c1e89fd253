//! Cross-source price conflict detection and resolution.
//!
//! Detection groups active observations by canonical cut and UTC calendar
//! day and compares every pair reported by different retailers. A pair
//! whose relative difference (against the lower price) exceeds the policy
//! threshold becomes a [`Conflict`], unless an unresolved conflict already
//! exists for the same `(cut, source1, source2)` triple.
//!
//! Resolution is single-shot: once a conflict is resolved, later attempts
//! report [`ResolveOutcome::AlreadyResolved`] and change nothing. A
//! resolution settles the prices it compared: the observations both
//! retailers reported for the cut up to the conflict's creation are retired,
//! so the next detection pass does not raise the same pair again.

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::mapper::round2;
use crate::models::{Conflict, PriceObservation, ResolutionMethod};
use crate::store::{ConflictFilter, Store};

/// Tunable thresholds for detection and automatic resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConflictPolicy {
    /// Relative difference (0.20 = 20%) above which two prices conflict.
    pub price_difference_threshold: f64,
    /// `confidence_score` (0..100) a single conflict must exceed to be
    /// auto-resolved.
    pub auto_resolve_min_confidence: f64,
    /// `confidence_score` a conflict must exceed to be resolved by a sweep.
    pub sweep_min_confidence: f64,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self {
            price_difference_threshold: 0.20,
            auto_resolve_min_confidence: 70.0,
            sweep_min_confidence: 80.0,
        }
    }
}

/// What a resolution attempt did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "conflict", rename_all = "snake_case")]
pub enum ResolveOutcome {
    Resolved(Conflict),
    /// Confidence too low; flagged for a human and left unresolved.
    Escalated(Conflict),
    AlreadyResolved(Conflict),
}

impl ResolveOutcome {
    pub fn conflict(&self) -> &Conflict {
        match self {
            ResolveOutcome::Resolved(c)
            | ResolveOutcome::Escalated(c)
            | ResolveOutcome::AlreadyResolved(c) => c,
        }
    }
}

/// Counts returned by [`sweep`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub analyzed: usize,
    pub auto_resolved: usize,
    pub flagged: usize,
    pub failed: usize,
}

/// Read-only aggregate over conflict rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictStats {
    pub total: usize,
    pub auto_resolved: usize,
    pub manually_resolved: usize,
    pub pending: usize,
    pub needs_human: usize,
    /// Mean seconds from creation to resolution over resolved conflicts.
    pub avg_resolution_seconds: Option<f64>,
    /// Percentage of all conflicts resolved automatically, rounded.
    pub auto_resolution_rate: f64,
}

/// Relative price difference against the lower price. `None` when either
/// price is not positive.
pub fn relative_difference(p1: f64, p2: f64) -> Option<f64> {
    let low = p1.min(p2);
    if low.is_nan() || low <= 0.0 || !p1.is_finite() || !p2.is_finite() {
        return None;
    }
    Some((p1 - p2).abs() / low)
}

/// Scan active observations and record new conflicts.
///
/// Returns only the conflicts created by this run. A storage failure on one
/// pair is logged and the scan continues.
pub async fn detect_conflicts(store: &dyn Store, policy: &ConflictPolicy) -> Result<Vec<Conflict>> {
    let observations = store.active_observations().await?;
    let names: HashMap<String, String> = store
        .list_cuts()
        .await?
        .into_iter()
        .map(|c| (c.id, c.name_hebrew))
        .collect();

    let mut groups: BTreeMap<(String, NaiveDate), Vec<PriceObservation>> = BTreeMap::new();
    for obs in observations {
        let day = obs.observed_at.date_naive();
        groups
            .entry((obs.canonical_cut_id.clone(), day))
            .or_default()
            .push(obs);
    }

    let mut created = Vec::new();
    let mut compared = 0usize;
    for ((cut_id, day), group) in &groups {
        for (i, a) in group.iter().enumerate() {
            for b in &group[i + 1..] {
                if a.retailer_id == b.retailer_id {
                    continue;
                }
                compared += 1;
                let Some(diff) = relative_difference(a.price_per_kg, b.price_per_kg) else {
                    continue;
                };
                if diff <= policy.price_difference_threshold {
                    continue;
                }

                let (first, second) = if a.retailer_id <= b.retailer_id {
                    (a, b)
                } else {
                    (b, a)
                };
                let conflict = Conflict {
                    id: Uuid::new_v4().to_string(),
                    canonical_cut_id: cut_id.clone(),
                    product_identifier: names.get(cut_id).cloned().unwrap_or_else(|| cut_id.clone()),
                    source1_id: first.retailer_id.clone(),
                    source2_id: second.retailer_id.clone(),
                    price1: first.price_per_kg,
                    price2: second.price_per_kg,
                    confidence1: first.confidence_score,
                    confidence2: second.confidence_score,
                    percentage_difference: round2(diff * 100.0),
                    confidence_score: (100.0 * first.confidence_score.max(second.confidence_score))
                        .round(),
                    resolved: false,
                    resolution_method: None,
                    resolved_price: None,
                    resolution_confidence: None,
                    auto_resolution_attempted: false,
                    human_intervention_required: false,
                    notes: None,
                    created_at: Utc::now(),
                    resolved_at: None,
                };

                match store.insert_conflict_if_absent(&conflict).await {
                    Ok(true) => {
                        debug!(
                            cut = %cut_id,
                            %day,
                            source1 = %conflict.source1_id,
                            source2 = %conflict.source2_id,
                            diff = conflict.percentage_difference,
                            "conflict recorded"
                        );
                        created.push(conflict);
                    }
                    Ok(false) => {}
                    Err(e) => warn!(cut = %cut_id, "failed to record conflict: {:#}", e),
                }
            }
        }
    }

    info!(
        groups = groups.len(),
        pairs = compared,
        created = created.len(),
        "conflict detection complete"
    );
    Ok(created)
}

/// Price taken from the better-supported side; the mean when both sides
/// are equally supported.
pub fn preferred_price(conflict: &Conflict) -> f64 {
    if conflict.confidence1 > conflict.confidence2 {
        conflict.price1
    } else if conflict.confidence2 > conflict.confidence1 {
        conflict.price2
    } else {
        round2((conflict.price1 + conflict.price2) / 2.0)
    }
}

async fn load(store: &dyn Store, id: &str) -> Result<Conflict> {
    if id.trim().is_empty() {
        return Err(Error::invalid("conflict id is required"));
    }
    store
        .get_conflict(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("conflict {}", id)))
}

/// Retire the observations a resolved conflict compared.
async fn retire_settled(store: &dyn Store, conflict: &Conflict) {
    let retailers = [conflict.source1_id.as_str(), conflict.source2_id.as_str()];
    match store
        .deactivate_observations(&conflict.canonical_cut_id, &retailers, conflict.created_at)
        .await
    {
        Ok(n) => debug!(conflict = %conflict.id, retired = n, "settled observations retired"),
        Err(e) => warn!(conflict = %conflict.id, "failed to retire settled observations: {:#}", e),
    }
}

/// Persist a terminal transition, reporting a lost race as already resolved.
async fn commit(store: &dyn Store, resolved: Conflict) -> Result<ResolveOutcome> {
    if store.resolve_conflict(&resolved).await? {
        retire_settled(store, &resolved).await;
        Ok(ResolveOutcome::Resolved(resolved))
    } else {
        let current = load(store, &resolved.id).await?;
        Ok(ResolveOutcome::AlreadyResolved(current))
    }
}

fn pattern_resolution(conflict: &Conflict, resolution_confidence: f64) -> Conflict {
    let mut resolved = conflict.clone();
    resolved.resolved = true;
    resolved.resolution_method = Some(ResolutionMethod::PatternBased);
    resolved.resolved_price = Some(preferred_price(conflict));
    resolved.resolution_confidence = Some(resolution_confidence);
    resolved.auto_resolution_attempted = true;
    resolved.human_intervention_required = false;
    resolved.resolved_at = Some(Utc::now());
    resolved
}

/// Try to resolve one conflict automatically.
pub async fn auto_resolve(
    store: &dyn Store,
    id: &str,
    policy: &ConflictPolicy,
) -> Result<ResolveOutcome> {
    let conflict = load(store, id).await?;
    if conflict.resolved {
        return Ok(ResolveOutcome::AlreadyResolved(conflict));
    }

    if conflict.confidence_score > policy.auto_resolve_min_confidence {
        let confidence = (conflict.confidence_score + 10.0).min(95.0);
        let outcome = commit(store, pattern_resolution(&conflict, confidence)).await?;
        if let ResolveOutcome::Resolved(c) = &outcome {
            info!(
                target: "audit",
                conflict = %c.id,
                price = c.resolved_price.unwrap_or_default(),
                confidence,
                "conflict auto-resolved"
            );
        }
        return Ok(outcome);
    }

    let note = format!(
        "confidence {} does not exceed auto-resolution bar {}",
        conflict.confidence_score, policy.auto_resolve_min_confidence
    );
    store.flag_conflict(&conflict.id, Some(&note)).await?;
    info!(target: "audit", conflict = %conflict.id, "conflict escalated for manual review");
    let current = load(store, id).await?;
    Ok(ResolveOutcome::Escalated(current))
}

/// Resolve a conflict with an admin-supplied price.
pub async fn resolve_manually(
    store: &dyn Store,
    id: &str,
    price: f64,
    notes: Option<&str>,
) -> Result<ResolveOutcome> {
    if !price.is_finite() || price <= 0.0 {
        return Err(Error::invalid(format!("resolved price must be positive, got {}", price)));
    }
    let conflict = load(store, id).await?;
    if conflict.resolved {
        return Ok(ResolveOutcome::AlreadyResolved(conflict));
    }

    let mut resolved = conflict.clone();
    resolved.resolved = true;
    resolved.resolution_method = Some(ResolutionMethod::AdminOverride);
    resolved.resolved_price = Some(price);
    resolved.resolution_confidence = Some(100.0);
    resolved.human_intervention_required = false;
    resolved.notes = notes.map(str::to_string).or(conflict.notes);
    resolved.resolved_at = Some(Utc::now());

    let outcome = commit(store, resolved).await?;
    if let ResolveOutcome::Resolved(c) = &outcome {
        info!(target: "audit", conflict = %c.id, price, "conflict resolved by admin");
    }
    Ok(outcome)
}

/// Resolve every unresolved conflict whose confidence clears the sweep bar.
///
/// The rest are flagged for a human. Per-conflict failures are counted and
/// never abort the sweep.
pub async fn sweep(store: &dyn Store, policy: &ConflictPolicy) -> Result<SweepSummary> {
    let pending = store.list_conflicts(ConflictFilter::Unresolved).await?;
    let mut summary = SweepSummary {
        analyzed: pending.len(),
        ..Default::default()
    };

    for conflict in &pending {
        if conflict.confidence_score > policy.sweep_min_confidence {
            let resolved = pattern_resolution(conflict, conflict.confidence_score);
            match store.resolve_conflict(&resolved).await {
                Ok(true) => {
                    retire_settled(store, &resolved).await;
                    summary.auto_resolved += 1;
                }
                Ok(false) => debug!(conflict = %conflict.id, "resolved concurrently, skipping"),
                Err(e) => {
                    warn!(conflict = %conflict.id, "sweep failed to resolve: {:#}", e);
                    summary.failed += 1;
                }
            }
        } else {
            match store.flag_conflict(&conflict.id, None).await {
                Ok(()) => summary.flagged += 1,
                Err(e) => {
                    warn!(conflict = %conflict.id, "sweep failed to flag: {:#}", e);
                    summary.failed += 1;
                }
            }
        }
    }

    info!(
        target: "audit",
        analyzed = summary.analyzed,
        auto_resolved = summary.auto_resolved,
        flagged = summary.flagged,
        failed = summary.failed,
        "conflict sweep complete"
    );
    Ok(summary)
}

/// Aggregate statistics over a set of conflicts.
pub fn conflict_stats(conflicts: &[Conflict]) -> ConflictStats {
    let total = conflicts.len();
    let mut auto_resolved = 0;
    let mut manually_resolved = 0;
    let mut pending = 0;
    let mut needs_human = 0;
    let mut durations = Vec::new();

    for c in conflicts {
        if c.resolved {
            match c.resolution_method {
                Some(ResolutionMethod::PatternBased) => auto_resolved += 1,
                Some(ResolutionMethod::AdminOverride) => manually_resolved += 1,
                None => {}
            }
            if let Some(at) = c.resolved_at {
                durations.push((at - c.created_at).num_milliseconds() as f64 / 1000.0);
            }
        } else {
            pending += 1;
            if c.human_intervention_required {
                needs_human += 1;
            }
        }
    }

    ConflictStats {
        total,
        auto_resolved,
        manually_resolved,
        pending,
        needs_human,
        avg_resolution_seconds: if durations.is_empty() {
            None
        } else {
            Some(round2(durations.iter().sum::<f64>() / durations.len() as f64))
        },
        auto_resolution_rate: if total > 0 {
            (auto_resolved as f64 / total as f64 * 100.0).round()
        } else {
            0.0
        },
    }
}
