//! In-memory [`Store`] implementation for testing.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Conflict
//! de-duplication and single-shot resolution are checked under the write
//! lock, so concurrent callers see the same guarantees the SQLite schema
//! gives through its unique indexes.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    CanonicalCut, Conflict, DiscoveryQueueItem, MappingRule, PriceObservation, Retailer,
};
use crate::normalize::normalize;

use super::{ConflictFilter, Store};

/// In-memory store for tests and dry runs.
pub struct InMemoryStore {
    retailers: RwLock<HashMap<String, Retailer>>,
    cuts: RwLock<HashMap<String, CanonicalCut>>,
    rules: RwLock<Vec<MappingRule>>,
    observations: RwLock<Vec<PriceObservation>>,
    conflicts: RwLock<Vec<Conflict>>,
    discovery: RwLock<Vec<DiscoveryQueueItem>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            retailers: RwLock::new(HashMap::new()),
            cuts: RwLock::new(HashMap::new()),
            rules: RwLock::new(Vec::new()),
            observations: RwLock::new(Vec::new()),
            conflicts: RwLock::new(Vec::new()),
            discovery: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

fn push_superseding(rules: &mut Vec<MappingRule>, rule: &MappingRule) {
    let key = normalize(&rule.normalized_name);
    for existing in rules.iter_mut() {
        if existing.active && normalize(&existing.normalized_name) == key {
            existing.active = false;
        }
    }
    let mut stored = rule.clone();
    stored.active = true;
    rules.push(stored);
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_retailer(&self, retailer: &Retailer) -> Result<()> {
        let mut retailers = self.retailers.write().map_err(poisoned)?;
        retailers.insert(retailer.id.clone(), retailer.clone());
        Ok(())
    }

    async fn list_retailers(&self) -> Result<Vec<Retailer>> {
        let retailers = self.retailers.read().map_err(poisoned)?;
        let mut out: Vec<Retailer> = retailers.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn upsert_cut(&self, cut: &CanonicalCut) -> Result<()> {
        let mut cuts = self.cuts.write().map_err(poisoned)?;
        cuts.insert(cut.id.clone(), cut.clone());
        Ok(())
    }

    async fn list_cuts(&self) -> Result<Vec<CanonicalCut>> {
        let cuts = self.cuts.read().map_err(poisoned)?;
        let mut out: Vec<CanonicalCut> = cuts.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn find_cut_by_name(&self, name: &str) -> Result<Option<CanonicalCut>> {
        let cuts = self.cuts.read().map_err(poisoned)?;
        let mut hits: Vec<&CanonicalCut> = cuts
            .values()
            .filter(|c| c.name_hebrew == name || c.name_english == name)
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hits.first().map(|c| (*c).clone()))
    }

    async fn insert_rule(&self, rule: &MappingRule) -> Result<()> {
        let mut rules = self.rules.write().map_err(poisoned)?;
        push_superseding(&mut rules, rule);
        Ok(())
    }

    async fn active_rules(&self) -> Result<Vec<MappingRule>> {
        let rules = self.rules.read().map_err(poisoned)?;
        let mut out: Vec<MappingRule> = rules.iter().filter(|r| r.active).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_rules(&self) -> Result<Vec<MappingRule>> {
        let rules = self.rules.read().map_err(poisoned)?;
        Ok(rules.clone())
    }

    async fn increment_rule_usage(&self, rule_id: &str) -> Result<()> {
        let mut rules = self.rules.write().map_err(poisoned)?;
        if let Some(rule) = rules.iter_mut().find(|r| r.id == rule_id) {
            rule.usage_count += 1;
        }
        Ok(())
    }

    async fn insert_observation(&self, observation: &PriceObservation) -> Result<()> {
        let mut observations = self.observations.write().map_err(poisoned)?;
        let mut stored = observation.clone();
        if stored.is_active {
            for existing in observations.iter_mut().filter(|o| {
                o.is_active
                    && o.canonical_cut_id == observation.canonical_cut_id
                    && o.retailer_id == observation.retailer_id
            }) {
                if existing.observed_at <= observation.observed_at {
                    existing.is_active = false;
                } else {
                    stored.is_active = false;
                }
            }
        }
        observations.push(stored);
        Ok(())
    }

    async fn active_observations(&self) -> Result<Vec<PriceObservation>> {
        let observations = self.observations.read().map_err(poisoned)?;
        Ok(observations.iter().filter(|o| o.is_active).cloned().collect())
    }

    async fn deactivate_observations(
        &self,
        cut_id: &str,
        retailer_ids: &[&str],
        observed_until: DateTime<Utc>,
    ) -> Result<u64> {
        let mut observations = self.observations.write().map_err(poisoned)?;
        let mut changed = 0;
        for o in observations.iter_mut().filter(|o| {
            o.is_active
                && o.canonical_cut_id == cut_id
                && retailer_ids.contains(&o.retailer_id.as_str())
                && o.observed_at <= observed_until
        }) {
            o.is_active = false;
            changed += 1;
        }
        Ok(changed)
    }

    async fn insert_conflict_if_absent(&self, conflict: &Conflict) -> Result<bool> {
        let mut conflicts = self.conflicts.write().map_err(poisoned)?;
        let exists = conflicts.iter().any(|c| {
            !c.resolved
                && c.canonical_cut_id == conflict.canonical_cut_id
                && c.source1_id == conflict.source1_id
                && c.source2_id == conflict.source2_id
        });
        if exists {
            return Ok(false);
        }
        conflicts.push(conflict.clone());
        Ok(true)
    }

    async fn get_conflict(&self, id: &str) -> Result<Option<Conflict>> {
        let conflicts = self.conflicts.read().map_err(poisoned)?;
        Ok(conflicts.iter().find(|c| c.id == id).cloned())
    }

    async fn list_conflicts(&self, filter: ConflictFilter) -> Result<Vec<Conflict>> {
        let conflicts = self.conflicts.read().map_err(poisoned)?;
        let mut out: Vec<Conflict> = conflicts.iter().filter(|c| filter.matches(c)).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn resolve_conflict(&self, conflict: &Conflict) -> Result<bool> {
        let mut conflicts = self.conflicts.write().map_err(poisoned)?;
        match conflicts.iter_mut().find(|c| c.id == conflict.id) {
            Some(stored) if !stored.resolved => {
                stored.resolved = true;
                stored.resolution_method = conflict.resolution_method;
                stored.resolved_price = conflict.resolved_price;
                stored.resolution_confidence = conflict.resolution_confidence;
                stored.human_intervention_required = conflict.human_intervention_required;
                stored.auto_resolution_attempted = conflict.auto_resolution_attempted;
                stored.notes = conflict.notes.clone();
                stored.resolved_at = conflict.resolved_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn flag_conflict(&self, id: &str, notes: Option<&str>) -> Result<()> {
        let mut conflicts = self.conflicts.write().map_err(poisoned)?;
        if let Some(stored) = conflicts.iter_mut().find(|c| c.id == id && !c.resolved) {
            stored.human_intervention_required = true;
            stored.auto_resolution_attempted = true;
            if let Some(n) = notes {
                stored.notes = Some(n.to_string());
            }
        }
        Ok(())
    }

    async fn insert_discovery_item(&self, item: &DiscoveryQueueItem) -> Result<()> {
        let mut discovery = self.discovery.write().map_err(poisoned)?;
        discovery.push(item.clone());
        Ok(())
    }

    async fn get_discovery_item(&self, id: &str) -> Result<Option<DiscoveryQueueItem>> {
        let discovery = self.discovery.read().map_err(poisoned)?;
        Ok(discovery.iter().find(|i| i.id == id).cloned())
    }

    async fn list_discovery(
        &self,
        pending_only: bool,
        limit: Option<i64>,
    ) -> Result<Vec<DiscoveryQueueItem>> {
        let discovery = self.discovery.read().map_err(poisoned)?;
        let mut out: Vec<DiscoveryQueueItem> = discovery
            .iter()
            .filter(|i| !pending_only || i.is_pending())
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(n) = limit {
            out.truncate(n.max(0) as usize);
        }
        Ok(out)
    }

    async fn review_discovery_item(
        &self,
        id: &str,
        approved: bool,
        admin_notes: Option<&str>,
        rule: Option<&MappingRule>,
    ) -> Result<bool> {
        let mut discovery = self.discovery.write().map_err(poisoned)?;
        match discovery.iter_mut().find(|i| i.id == id) {
            Some(item) if item.is_pending() => {
                if let Some(rule) = rule {
                    let mut rules = self.rules.write().map_err(poisoned)?;
                    push_superseding(&mut rules, rule);
                }
                item.approved = Some(approved);
                item.manual_review_needed = false;
                item.admin_notes = admin_notes.map(str::to_string);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pending_items_with_token(&self, token: &str) -> Result<Vec<DiscoveryQueueItem>> {
        let discovery = self.discovery.read().map_err(poisoned)?;
        let token = normalize(token);
        if token.is_empty() {
            return Ok(Vec::new());
        }
        Ok(discovery
            .iter()
            .filter(|i| i.is_pending() && normalize(&i.product_name).contains(&token))
            .cloned()
            .collect())
    }

    async fn update_discovery_confidences(&self, updates: &[(String, f64)]) -> Result<()> {
        let mut discovery = self.discovery.write().map_err(poisoned)?;
        for (id, confidence) in updates {
            if let Some(item) = discovery.iter_mut().find(|i| &i.id == id) {
                item.confidence_score = *confidence;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResolutionMethod, RuleSource};
    use chrono::TimeZone;

    fn rule(id: &str, name: &str) -> MappingRule {
        MappingRule {
            id: id.to_string(),
            original_name: name.to_string(),
            normalized_name: name.to_string(),
            category: None,
            quality_grade: Some("regular".to_string()),
            confidence: 0.8,
            source: RuleSource::AdminApproved,
            usage_count: 0,
            active: true,
            created_at: Utc::now(),
        }
    }

    fn conflict(id: &str) -> Conflict {
        Conflict {
            id: id.to_string(),
            canonical_cut_id: "cut-1".to_string(),
            product_identifier: "אנטריקוט".to_string(),
            source1_id: "a".to_string(),
            source2_id: "b".to_string(),
            price1: 90.0,
            price2: 135.0,
            confidence1: 0.9,
            confidence2: 0.8,
            percentage_difference: 50.0,
            confidence_score: 90.0,
            resolved: false,
            resolution_method: None,
            resolved_price: None,
            resolution_confidence: None,
            auto_resolution_attempted: false,
            human_intervention_required: false,
            notes: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn test_rule_supersession() {
        let store = InMemoryStore::new();
        store.insert_rule(&rule("r1", "סינטה")).await.unwrap();
        store.insert_rule(&rule("r2", "סינטה")).await.unwrap();
        store.insert_rule(&rule("r3", "פילה")).await.unwrap();

        let active = store.active_rules().await.unwrap();
        let ids: Vec<&str> = active.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&"r2"));
        assert!(ids.contains(&"r3"));
        assert!(!ids.contains(&"r1"));
        assert_eq!(store.list_rules().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_conflict_dedup_until_resolved() {
        let store = InMemoryStore::new();
        assert!(store.insert_conflict_if_absent(&conflict("c1")).await.unwrap());
        assert!(!store.insert_conflict_if_absent(&conflict("c2")).await.unwrap());

        let mut resolved = conflict("c1");
        resolved.resolution_method = Some(ResolutionMethod::AdminOverride);
        resolved.resolved_price = Some(100.0);
        resolved.resolved_at = Some(Utc::now());
        assert!(store.resolve_conflict(&resolved).await.unwrap());
        assert!(!store.resolve_conflict(&resolved).await.unwrap());

        assert!(store.insert_conflict_if_absent(&conflict("c3")).await.unwrap());
        assert_eq!(
            store.list_conflicts(ConflictFilter::Unresolved).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_review_only_once() {
        let store = InMemoryStore::new();
        let item = DiscoveryQueueItem {
            id: "d1".to_string(),
            product_name: "פילה עגל".to_string(),
            normalized_suggestion: "פילה עגל".to_string(),
            category_suggestion: None,
            quality_grade_suggestion: None,
            confidence_score: 0.5,
            approved: None,
            manual_review_needed: true,
            admin_notes: None,
            source: None,
            price: None,
            created_at: Utc::now(),
        };
        store.insert_discovery_item(&item).await.unwrap();
        assert_eq!(store.pending_items_with_token("פילה").await.unwrap().len(), 1);
        assert!(store
            .review_discovery_item("d1", true, Some("ok"), Some(&rule("r1", "פילה עגל")))
            .await
            .unwrap());
        assert!(!store
            .review_discovery_item("d1", false, None, Some(&rule("r2", "פילה עגל")))
            .await
            .unwrap());
        assert!(store.pending_items_with_token("פילה").await.unwrap().is_empty());
        let rules = store.list_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "r1");
    }

    fn observation(retailer: &str, price: f64, hour: u32) -> PriceObservation {
        PriceObservation {
            id: format!("{}-{}", retailer, hour),
            canonical_cut_id: "cut-1".to_string(),
            retailer_id: retailer.to_string(),
            price_per_kg: price,
            confidence_score: 0.9,
            source: "scanner".to_string(),
            observed_at: Utc.with_ymd_and_hms(2025, 7, 3, hour, 0, 0).unwrap(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_newer_observation_supersedes_older() {
        let store = InMemoryStore::new();
        store.insert_observation(&observation("a", 90.0, 9)).await.unwrap();
        store.insert_observation(&observation("b", 95.0, 9)).await.unwrap();
        store.insert_observation(&observation("a", 99.0, 12)).await.unwrap();
        // Arrives late; the 12:00 price stays current.
        store.insert_observation(&observation("a", 80.0, 10)).await.unwrap();

        let mut ids: Vec<String> = store
            .active_observations()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a-12", "b-9"]);
    }

    #[tokio::test]
    async fn test_deactivate_observations_respects_cutoff() {
        let store = InMemoryStore::new();
        store.insert_observation(&observation("a", 90.0, 9)).await.unwrap();
        store.insert_observation(&observation("b", 135.0, 11)).await.unwrap();
        store.insert_observation(&observation("c", 100.0, 9)).await.unwrap();

        let cutoff = Utc.with_ymd_and_hms(2025, 7, 3, 10, 0, 0).unwrap();
        let changed = store
            .deactivate_observations("cut-1", &["a", "b"], cutoff)
            .await
            .unwrap();
        assert_eq!(changed, 1);
        let active = store.active_observations().await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|o| o.retailer_id != "a"));
    }
}
