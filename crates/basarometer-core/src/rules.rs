//! The versioned, data-driven rule table.
//!
//! One table holds every lexicon the pipeline consults: category → grade
//! keyword/variation lists for the classifier, cut aliases for the mapper,
//! contamination families, core meat terms, the brand gazetteer, grade
//! keyword families, category default cuts and retailer site aliases.
//!
//! The seed table ships embedded in the crate (`data/rules.json`). A
//! deployment can point at its own JSON file; if that file cannot be read or
//! parsed, [`RuleTable::load_or_fallback`] degrades to
//! [`RuleTable::fallback`], a small built-in set that covers beef and chicken
//! only but keeps the full contamination screen.
//!
//! All keyword strings are passed through [`normalize`] at load time so that
//! matching code compares normalized text against normalized text.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::normalize::normalize;

const SEED_JSON: &str = include_str!("../data/rules.json");

/// Complete rule table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTable {
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    pub categories: Vec<CategoryRules>,
    #[serde(default)]
    pub cuts: Vec<CutAlias>,
    /// Category label → English name of the default cut for that category.
    #[serde(default)]
    pub category_defaults: BTreeMap<String, String>,
    #[serde(default = "default_cut")]
    pub default_cut: String,
    pub contamination: Vec<ContaminationFamily>,
    #[serde(default)]
    pub meat_terms: Vec<MeatTerm>,
    #[serde(default)]
    pub brands: Vec<String>,
    #[serde(default)]
    pub grade_keywords: Vec<GradeKeywords>,
    /// Site slug → retailer name.
    #[serde(default)]
    pub retailers: BTreeMap<String, String>,
    #[serde(skip)]
    fingerprint: String,
}

fn default_cut() -> String {
    "ground-beef".to_string()
}

/// Keyword lists for one meat category, split by quality grade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRules {
    pub name: String,
    pub english: String,
    pub grades: Vec<GradeRules>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeRules {
    pub grade: String,
    /// Lower tiers are consulted first. Learned rules use tier 0.
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub variations: Vec<String>,
}

fn default_priority() -> u8 {
    2
}

/// Alias entry the mapper scores listings against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutAlias {
    pub name_hebrew: String,
    pub name_english: String,
    pub category: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub typical_price: Option<(f64, f64)>,
}

/// A non-meat lexical family used by the contamination screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContaminationFamily {
    pub family: String,
    #[serde(default)]
    pub hebrew: Vec<String>,
    #[serde(default)]
    pub english: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeatTerm {
    pub term: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeKeywords {
    pub grade: String,
    pub keywords: Vec<String>,
}

/// Score multiplier for a priority tier: common cuts outrank rare ones on ties.
pub fn priority_weight(priority: u8) -> f64 {
    match priority {
        0 | 1 => 1.0,
        2 => 0.9,
        _ => 0.8,
    }
}

impl RuleTable {
    /// Parse a rule table from JSON text and normalize its lexicons.
    pub fn from_json(text: &str) -> Result<Self> {
        let mut table: RuleTable =
            serde_json::from_str(text).context("Failed to parse rule table JSON")?;
        if table.categories.is_empty() {
            bail!("rule table '{}' defines no categories", table.version);
        }
        if table.contamination.is_empty() {
            bail!("rule table '{}' defines no contamination families", table.version);
        }
        table.prepare();
        table.fingerprint = fingerprint_of(text);
        Ok(table)
    }

    /// Read a rule table file from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule table: {}", path.display()))?;
        Self::from_json(&text)
    }

    /// The table embedded in the crate.
    pub fn seed() -> Self {
        match Self::from_json(SEED_JSON) {
            Ok(table) => table,
            Err(e) => {
                error!("embedded rule table is unusable, using built-in fallback: {:#}", e);
                Self::fallback()
            }
        }
    }

    /// Load the configured table, or the embedded seed when no path is given.
    ///
    /// Never fails: an unreadable or invalid file degrades to
    /// [`RuleTable::fallback`].
    pub fn load_or_fallback(path: Option<&Path>) -> Self {
        let table = match path {
            None => Self::seed(),
            Some(p) => match Self::from_path(p) {
                Ok(t) => t,
                Err(e) => {
                    error!(
                        "rule source {} unavailable, degrading to built-in beef/chicken rules: {:#}",
                        p.display(),
                        e
                    );
                    Self::fallback()
                }
            },
        };
        info!(
            version = %table.version,
            fingerprint = %table.fingerprint(),
            categories = table.categories.len(),
            cuts = table.cuts.len(),
            "rule table loaded"
        );
        table
    }

    /// Minimal built-in rules: beef and chicken plus the contamination screen.
    pub fn fallback() -> Self {
        fn words(list: &[&str]) -> Vec<String> {
            list.iter().map(|s| s.to_string()).collect()
        }
        fn family(name: &str, hebrew: &[&str], english: &[&str]) -> ContaminationFamily {
            ContaminationFamily {
                family: name.to_string(),
                hebrew: words(hebrew),
                english: words(english),
            }
        }
        fn alias(he: &str, en: &str, category: &str, keywords: &[&str]) -> CutAlias {
            CutAlias {
                name_hebrew: he.to_string(),
                name_english: en.to_string(),
                category: category.to_string(),
                priority: 1,
                keywords: words(keywords),
                typical_price: None,
            }
        }

        let mut table = RuleTable {
            version: "fallback".to_string(),
            description: Some("Basic meat validation patterns".to_string()),
            categories: vec![
                CategoryRules {
                    name: "בקר".to_string(),
                    english: "beef".to_string(),
                    grades: vec![GradeRules {
                        grade: "regular".to_string(),
                        priority: 1,
                        keywords: words(&["בקר", "אנטריקוט", "פילה", "סטייק"]),
                        variations: words(&["בקר", "בשר בקר", "אנטריקוט", "פילה בקר"]),
                    }],
                },
                CategoryRules {
                    name: "עוף".to_string(),
                    english: "chicken".to_string(),
                    grades: vec![GradeRules {
                        grade: "regular".to_string(),
                        priority: 1,
                        keywords: words(&["עוף", "תרנגול", "חזה", "כנף"]),
                        variations: words(&["עוף", "חזה עוף", "כנפיים", "שניצל עוף"]),
                    }],
                },
            ],
            cuts: vec![
                alias("בשר טחון", "ground-beef", "beef", &["טחון"]),
                alias("אנטריקוט", "entrecote", "beef", &["אנטריקוט"]),
                alias("חזה עוף", "chicken-breast", "chicken", &["חזה עוף", "חזה"]),
            ],
            category_defaults: [("עוף", "chicken-breast"), ("בקר", "ground-beef")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            default_cut: default_cut(),
            contamination: vec![
                family(
                    "dairy",
                    &["חלב", "גבינה", "יוגורט", "חמאה", "קרם", "שמנת"],
                    &["milk", "cheese", "yogurt", "butter", "cream", "dairy"],
                ),
                family(
                    "vegetables",
                    &["ירקות", "פירות", "עגבניה", "מלפפון", "חסה", "גזר", "בצל"],
                    &["vegetable", "fruit", "tomato", "cucumber", "lettuce", "carrot", "onion"],
                ),
                family(
                    "grains",
                    &["לחם", "קמח", "אורז", "פסטה", "מקרונים", "בורגול"],
                    &["bread", "flour", "rice", "pasta", "grain", "cereal"],
                ),
                family(
                    "condiments",
                    &["ממרח", "רוטב", "תבלין", "מתובל", "חומוס", "טחינה"],
                    &["spread", "sauce", "spice", "seasoned", "hummus", "tahini"],
                ),
                family(
                    "cleaning",
                    &["ניקוי", "כביסה", "סבון", "דטרגנט", "מחטא"],
                    &["cleaning", "detergent", "soap", "sanitizer", "bleach"],
                ),
                family(
                    "non_food",
                    &["פלסטיק", "נייר", "בגדים", "צעצוע", "ספר"],
                    &["plastic", "paper", "clothing", "toy", "book"],
                ),
            ],
            meat_terms: [
                ("בקר", "בקר"),
                ("אנטריקוט", "בקר"),
                ("פילה", "בקר"),
                ("עוף", "עוף"),
                ("חזה", "עוף"),
                ("שניצל", "עוף"),
                ("טלה", "כבש"),
                ("כבש", "כבש"),
            ]
            .into_iter()
            .map(|(term, category)| MeatTerm {
                term: term.to_string(),
                category: category.to_string(),
            })
            .collect(),
            brands: Vec::new(),
            grade_keywords: Vec::new(),
            retailers: BTreeMap::new(),
            fingerprint: String::new(),
        };
        table.prepare();
        table.fingerprint = fingerprint_of(&table.version);
        table
    }

    /// SHA-256 of the source text (hex), identifying the loaded revision.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_fallback(&self) -> bool {
        self.version == "fallback"
    }

    /// Look up a cut alias by its English identifier.
    pub fn cut_by_english(&self, name_english: &str) -> Option<&CutAlias> {
        self.cuts.iter().find(|c| c.name_english == name_english)
    }

    /// Normalize every keyword list in place and drop entries that normalize
    /// to nothing.
    fn prepare(&mut self) {
        fn clean(list: &mut Vec<String>) {
            for item in list.iter_mut() {
                *item = normalize(item);
            }
            list.retain(|s| !s.is_empty());
        }

        for category in &mut self.categories {
            for grade in &mut category.grades {
                clean(&mut grade.keywords);
                clean(&mut grade.variations);
            }
        }
        for cut in &mut self.cuts {
            clean(&mut cut.keywords);
        }
        for family in &mut self.contamination {
            clean(&mut family.hebrew);
            clean(&mut family.english);
        }
        for term in &mut self.meat_terms {
            term.term = normalize(&term.term);
        }
        self.meat_terms.retain(|t| !t.term.is_empty());
        clean(&mut self.brands);
        for family in &mut self.grade_keywords {
            clean(&mut family.keywords);
        }
    }
}

fn fingerprint_of(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_parses() {
        let table = RuleTable::seed();
        assert!(!table.is_fallback());
        assert!(table.categories.iter().any(|c| c.english == "beef"));
        assert!(table.cut_by_english("entrecote").is_some());
        assert_eq!(table.fingerprint().len(), 64);
    }

    #[test]
    fn test_keywords_are_normalized() {
        let table = RuleTable::seed();
        let kosher = table
            .grade_keywords
            .iter()
            .find(|g| g.grade == "kosher")
            .unwrap();
        assert!(kosher.keywords.iter().all(|k| normalize(k) == *k));
    }

    #[test]
    fn test_fallback_covers_beef_and_chicken_only() {
        let table = RuleTable::fallback();
        let names: Vec<&str> = table.categories.iter().map(|c| c.english.as_str()).collect();
        assert_eq!(names, vec!["beef", "chicken"]);
        assert_eq!(table.contamination.len(), 6);
    }

    #[test]
    fn test_missing_file_degrades_to_fallback() {
        let table = RuleTable::load_or_fallback(Some(Path::new("/nonexistent/rules.json")));
        assert!(table.is_fallback());
    }

    #[test]
    fn test_invalid_file_degrades_to_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "{ \"version\": \"x\", \"categories\": [] }").unwrap();
        let table = RuleTable::load_or_fallback(Some(&path));
        assert!(table.is_fallback());
    }

    #[test]
    fn test_priority_weight() {
        assert_eq!(priority_weight(1), 1.0);
        assert_eq!(priority_weight(2), 0.9);
        assert_eq!(priority_weight(3), 0.8);
    }
}
