//! Meat / non-meat classification.
//!
//! The [`Classifier`] owns its rule table, the active learned mapping rules
//! and a per-`(name, category)` result cache. It is constructed explicitly
//! and handed to callers; there is no process-wide instance.
//!
//! # Algorithm
//!
//! First matching stage wins:
//!
//! 1. **Contamination screen**: non-meat lexical families (dairy, produce,
//!    grains, condiments, cleaning, non-food). A hit returns non-meat with
//!    confidence 0.95.
//! 2. **Mapping rules**: learned rules first (newest first), then the seeded
//!    category → grade lists in priority order. Substring containment in
//!    either direction counts as a match; confidence is 0.95 for exact
//!    equality with a known term and 0.80 for containment.
//! 3. **Partial lexical fallback**: core Hebrew meat terms, confidence 0.75.
//! 4. **Default**: non-meat, confidence 0.20.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::Serialize;

use crate::models::{ClassificationResult, MappingRule};
use crate::normalize::normalize;
use crate::rules::RuleTable;

const CONTAMINATION_CONFIDENCE: f64 = 0.95;
const EXACT_CONFIDENCE: f64 = 0.95;
const PARTIAL_CONFIDENCE: f64 = 0.80;
const WEAK_CONFIDENCE: f64 = 0.65;
const LEXICAL_FALLBACK_CONFIDENCE: f64 = 0.75;
const DEFAULT_CONFIDENCE: f64 = 0.20;

/// Diagnostics about the classifier's owned state.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub cache_size: usize,
    pub mappings_loaded: bool,
    pub rule_table_version: String,
    pub learned_rules: usize,
}

/// Purity summary for a batch of listings.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub total_products: usize,
    pub valid_meat_products: usize,
    pub contaminated_products: usize,
    pub purity_percentage: f64,
    pub contamination_sources: BTreeMap<String, usize>,
    pub processed_at: String,
}

/// Meat classifier with an owned rule set and result cache.
pub struct Classifier {
    table: RuleTable,
    learned: Vec<MappingRule>,
    cache: HashMap<(String, String), ClassificationResult>,
}

impl Classifier {
    pub fn new(table: RuleTable) -> Self {
        Self {
            table,
            learned: Vec::new(),
            cache: HashMap::new(),
        }
    }

    /// Build a classifier that also consults previously learned rules.
    /// Inactive (superseded) rules are ignored.
    pub fn with_learned_rules(table: RuleTable, rules: Vec<MappingRule>) -> Self {
        let mut classifier = Self::new(table);
        classifier.reload_learned_rules(rules);
        classifier
    }

    /// Replace the learned rule set wholesale and clear the cache.
    pub fn reload_learned_rules(&mut self, rules: Vec<MappingRule>) {
        let mut learned: Vec<MappingRule> = rules.into_iter().filter(|r| r.active).collect();
        learned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.learned = learned;
        self.clear_cache();
    }

    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    /// Classify a listing name, using the cache when the pair was seen before.
    pub fn classify(&mut self, name: &str, category: Option<&str>) -> ClassificationResult {
        let key = (name.to_string(), category.unwrap_or("unknown").to_string());
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let result = self.evaluate(name);
        self.cache.insert(key, result.clone());
        result
    }

    /// Make a newly approved rule visible to classification.
    ///
    /// Any active learned rule with the same normalized name is superseded,
    /// and the cache is cleared so earlier verdicts are recomputed.
    pub fn apply_learned_rule(&mut self, rule: MappingRule) {
        let key = normalize(&rule.normalized_name);
        self.learned.retain(|r| normalize(&r.normalized_name) != key);
        self.learned.insert(0, rule);
        self.clear_cache();
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            cache_size: self.cache.len(),
            mappings_loaded: !self.table.is_fallback(),
            rule_table_version: self.table.version.clone(),
            learned_rules: self.learned.len(),
        }
    }

    /// Classify a batch and summarize how much of it is actually meat.
    pub fn quality_report(&mut self, products: &[(String, Option<String>)]) -> QualityReport {
        let mut valid = 0usize;
        let mut sources: BTreeMap<String, usize> = BTreeMap::new();

        for (name, category) in products {
            let result = self.classify(name, category.as_deref());
            if result.is_valid_meat {
                valid += 1;
            } else {
                let family = result
                    .contamination_family
                    .clone()
                    .unwrap_or_else(|| "unmatched".to_string());
                *sources.entry(family).or_insert(0) += 1;
            }
        }

        let total = products.len();
        QualityReport {
            total_products: total,
            valid_meat_products: valid,
            contaminated_products: total - valid,
            purity_percentage: if total > 0 {
                (valid as f64 / total as f64) * 100.0
            } else {
                0.0
            },
            contamination_sources: sources,
            processed_at: Utc::now().to_rfc3339(),
        }
    }

    fn evaluate(&self, name: &str) -> ClassificationResult {
        let normalized = normalize(name);
        if normalized.is_empty() {
            return default_result();
        }

        if let Some(result) = self.check_contamination(&normalized) {
            return result;
        }
        if let Some(result) = self.match_learned(&normalized) {
            return result;
        }
        if let Some(result) = self.match_seeded(&normalized) {
            return result;
        }
        if let Some(result) = self.match_meat_terms(&normalized) {
            return result;
        }
        default_result()
    }

    fn check_contamination(&self, normalized: &str) -> Option<ClassificationResult> {
        for family in &self.table.contamination {
            let hebrew_hit = family.hebrew.iter().any(|k| normalized.contains(k.as_str()));
            let english_hit =
                !hebrew_hit && family.english.iter().any(|k| normalized.contains(k.as_str()));
            if !hebrew_hit && !english_hit {
                continue;
            }
            let suggestion = if hebrew_hit {
                format!("מוצר זה נראה כ{} ולא בשר", family.family)
            } else {
                format!("This product appears to be {}, not meat", family.family)
            };
            return Some(ClassificationResult {
                is_valid_meat: false,
                confidence: CONTAMINATION_CONFIDENCE,
                category: None,
                quality_grade: None,
                contamination_reason: Some(format!(
                    "Product appears to be {} rather than meat",
                    family.family
                )),
                suggested_correction: Some(suggestion),
                contamination_family: Some(family.family.clone()),
                matched_rule_id: None,
            });
        }
        None
    }

    fn match_learned(&self, normalized: &str) -> Option<ClassificationResult> {
        for rule in &self.learned {
            let terms = [normalize(&rule.original_name), normalize(&rule.normalized_name)];
            let terms: Vec<&str> = terms.iter().map(String::as_str).filter(|t| !t.is_empty()).collect();
            if terms.iter().any(|t| matches_either_way(normalized, t)) {
                return Some(ClassificationResult {
                    is_valid_meat: true,
                    confidence: term_confidence(normalized, &terms),
                    category: Some(rule.category.clone().unwrap_or_else(|| "unknown".to_string())),
                    quality_grade: Some(
                        rule.quality_grade
                            .clone()
                            .unwrap_or_else(|| "regular".to_string()),
                    ),
                    contamination_reason: None,
                    suggested_correction: None,
                    contamination_family: None,
                    matched_rule_id: Some(rule.id.clone()),
                });
            }
        }
        None
    }

    fn match_seeded(&self, normalized: &str) -> Option<ClassificationResult> {
        let mut entries: Vec<(&str, &crate::rules::GradeRules)> = self
            .table
            .categories
            .iter()
            .flat_map(|c| c.grades.iter().map(move |g| (c.name.as_str(), g)))
            .collect();
        // Stable: table order is kept within a tier.
        entries.sort_by_key(|(_, g)| g.priority);

        for (category, grade) in entries {
            let terms: Vec<&str> = grade
                .variations
                .iter()
                .chain(grade.keywords.iter())
                .map(String::as_str)
                .collect();
            if terms.iter().any(|t| matches_either_way(normalized, t)) {
                return Some(ClassificationResult {
                    is_valid_meat: true,
                    confidence: term_confidence(normalized, &terms),
                    category: Some(category.to_string()),
                    quality_grade: Some(grade.grade.clone()),
                    contamination_reason: None,
                    suggested_correction: None,
                    contamination_family: None,
                    matched_rule_id: None,
                });
            }
        }
        None
    }

    fn match_meat_terms(&self, normalized: &str) -> Option<ClassificationResult> {
        self.table
            .meat_terms
            .iter()
            .find(|t| matches_either_way(normalized, &t.term))
            .map(|t| ClassificationResult {
                is_valid_meat: true,
                confidence: LEXICAL_FALLBACK_CONFIDENCE,
                category: Some(t.category.clone()),
                quality_grade: Some("regular".to_string()),
                contamination_reason: None,
                suggested_correction: None,
                contamination_family: None,
                matched_rule_id: None,
            })
    }
}

fn matches_either_way(normalized: &str, term: &str) -> bool {
    !term.is_empty() && (normalized.contains(term) || term.contains(normalized))
}

fn term_confidence(normalized: &str, terms: &[&str]) -> f64 {
    if terms.iter().any(|t| *t == normalized) {
        EXACT_CONFIDENCE
    } else if terms.iter().any(|t| matches_either_way(normalized, t)) {
        PARTIAL_CONFIDENCE
    } else {
        WEAK_CONFIDENCE
    }
}

fn default_result() -> ClassificationResult {
    ClassificationResult {
        is_valid_meat: false,
        confidence: DEFAULT_CONFIDENCE,
        category: None,
        quality_grade: None,
        contamination_reason: Some("Product does not match known meat patterns".to_string()),
        suggested_correction: Some("Verify product is actually a meat product".to_string()),
        contamination_family: None,
        matched_rule_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RuleSource;

    fn classifier() -> Classifier {
        Classifier::new(RuleTable::seed())
    }

    fn learned(name: &str, normalized: &str, grade: &str) -> MappingRule {
        MappingRule {
            id: format!("rule-{}", normalized),
            original_name: name.to_string(),
            normalized_name: normalized.to_string(),
            category: Some("בקר".to_string()),
            quality_grade: Some(grade.to_string()),
            confidence: 0.9,
            source: RuleSource::AdminApproved,
            usage_count: 1,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_dairy_is_rejected() {
        let mut c = classifier();
        let r = c.classify("חלב 3%", Some("מוצרי חלב"));
        assert!(!r.is_valid_meat);
        assert!(r.contamination_reason.unwrap().contains("dairy"));
        assert!((r.confidence - 0.95).abs() < 1e-9);
        assert_eq!(r.contamination_family.as_deref(), Some("dairy"));
    }

    #[test]
    fn test_english_contamination_hint() {
        let mut c = classifier();
        let r = c.classify("Dish Soap Lemon", None);
        assert!(!r.is_valid_meat);
        assert_eq!(
            r.suggested_correction.as_deref(),
            Some("This product appears to be cleaning, not meat")
        );
    }

    #[test]
    fn test_contamination_beats_meat_terms() {
        let mut c = classifier();
        let r = c.classify("נקניקיית בשר וגבינה", None);
        assert!(!r.is_valid_meat);
        assert_eq!(r.contamination_family.as_deref(), Some("dairy"));
    }

    #[test]
    fn test_entrecote_is_beef() {
        let mut c = classifier();
        let r = c.classify("אנטריקוט בקר טרי", Some("בשר"));
        assert!(r.is_valid_meat);
        assert_eq!(r.category.as_deref(), Some("בקר"));
        assert!(r.confidence >= 0.75);
    }

    #[test]
    fn test_exact_variation_scores_highest() {
        let mut c = classifier();
        let r = c.classify("שניצל עוף", None);
        assert!(r.is_valid_meat);
        assert_eq!(r.category.as_deref(), Some("עוף"));
        assert_eq!(r.quality_grade.as_deref(), Some("regular"));
        assert!((r.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_priority_tier_wins() {
        let mut c = classifier();
        let r = c.classify("אנטריקוט אנגוס", None);
        assert_eq!(r.quality_grade.as_deref(), Some("angus"));
    }

    #[test]
    fn test_lexical_fallback() {
        let mut c = classifier();
        let r = c.classify("ברווז שלם", None);
        assert!(r.is_valid_meat);
        assert!((r.confidence - 0.75).abs() < 1e-9);
        assert_eq!(r.category.as_deref(), Some("unknown"));
        assert_eq!(r.quality_grade.as_deref(), Some("regular"));
    }

    #[test]
    fn test_default_non_meat() {
        let mut c = classifier();
        let r = c.classify("מטען לטלפון", None);
        assert!(!r.is_valid_meat);
        assert!(r.confidence <= 0.30);
        assert!(r.contamination_reason.unwrap().contains("does not match"));
    }

    #[test]
    fn test_empty_name_is_not_meat() {
        let mut c = classifier();
        let r = c.classify("  !!! ", None);
        assert!(!r.is_valid_meat);
    }

    #[test]
    fn test_cache_returns_identical_results() {
        let mut c = classifier();
        let a = c.classify("שניצל עוף", Some("עוף"));
        let b = c.classify("שניצל עוף", Some("עוף"));
        assert_eq!(a, b);
        assert_eq!(c.cache_stats().cache_size, 1);
        c.classify("שניצל עוף", None);
        assert_eq!(c.cache_stats().cache_size, 2);
        c.clear_cache();
        assert_eq!(c.cache_stats().cache_size, 0);
    }

    #[test]
    fn test_learned_rule_takes_precedence() {
        let mut c = Classifier::with_learned_rules(
            RuleTable::seed(),
            vec![learned("פילה עגל מיושן", "פילה עגל מיושן", "premium")],
        );
        let r = c.classify("פילה עגל מיושן", None);
        assert!(r.is_valid_meat);
        assert_eq!(r.quality_grade.as_deref(), Some("premium"));
        assert!((r.confidence - 0.95).abs() < 1e-9);
        assert_eq!(r.matched_rule_id.as_deref(), Some("rule-פילה עגל מיושן"));
    }

    #[test]
    fn test_apply_learned_rule_supersedes_and_clears_cache() {
        let mut c = Classifier::with_learned_rules(
            RuleTable::seed(),
            vec![learned("סינטה מיושנת", "סינטה מיושנת", "regular")],
        );
        assert_eq!(
            c.classify("סינטה מיושנת", None).quality_grade.as_deref(),
            Some("regular")
        );
        let mut newer = learned("סינטה מיושנת", "סינטה מיושנת", "premium");
        newer.id = "rule-newer".to_string();
        c.apply_learned_rule(newer);
        assert_eq!(c.cache_stats().cache_size, 0);
        assert_eq!(c.cache_stats().learned_rules, 1);
        assert_eq!(
            c.classify("סינטה מיושנת", None).quality_grade.as_deref(),
            Some("premium")
        );
    }

    #[test]
    fn test_inactive_rules_ignored() {
        let mut rule = learned("סינטה מיושנת", "סינטה מיושנת", "premium");
        rule.active = false;
        let mut c = Classifier::with_learned_rules(RuleTable::seed(), vec![rule]);
        assert!(c.classify("סינטה מיושנת", None).matched_rule_id.is_none());
    }

    #[test]
    fn test_reload_replaces_learned_rules() {
        let mut c = classifier();
        assert!(c.classify("סינטה מיושנת", None).matched_rule_id.is_none());
        c.reload_learned_rules(vec![learned("סינטה מיושנת", "סינטה מיושנת", "premium")]);
        assert_eq!(c.cache_stats().learned_rules, 1);
        assert_eq!(
            c.classify("סינטה מיושנת", None).quality_grade.as_deref(),
            Some("premium")
        );
    }

    #[test]
    fn test_fallback_table_still_classifies_beef() {
        let mut c = Classifier::new(RuleTable::fallback());
        assert!(!c.cache_stats().mappings_loaded);
        let r = c.classify("אנטריקוט", None);
        assert!(r.is_valid_meat);
        assert_eq!(r.category.as_deref(), Some("בקר"));
        assert!(!c.classify("גבינה צהובה", None).is_valid_meat);
    }

    #[test]
    fn test_quality_report() {
        let mut c = classifier();
        let products = vec![
            ("אנטריקוט".to_string(), None),
            ("חזה עוף".to_string(), Some("עוף".to_string())),
            ("חלב".to_string(), None),
            ("מטען".to_string(), None),
        ];
        let report = c.quality_report(&products);
        assert_eq!(report.total_products, 4);
        assert_eq!(report.valid_meat_products, 2);
        assert_eq!(report.contaminated_products, 2);
        assert!((report.purity_percentage - 50.0).abs() < 1e-9);
        assert_eq!(report.contamination_sources.get("dairy"), Some(&1));
        assert_eq!(report.contamination_sources.get("unmatched"), Some(&1));
    }
}
