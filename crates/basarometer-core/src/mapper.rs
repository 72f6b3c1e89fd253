//! Catalog mapping: from a classified listing to a canonical cut, a retailer
//! and a combined mapping confidence.
//!
//! Cut scoring runs over the rule table's cut aliases. A listing that
//! contains an alias' Hebrew name scores 1.0, one that only contains a
//! keyword scores 0.8; the score is then weighted by the alias' priority
//! tier so common cuts outrank rare ones on ties. Scores above 0.5 are
//! resolved against the catalog; otherwise the listing's category picks a
//! default cut, and as a last resort any catalog cut is used.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::CanonicalCut;
use crate::normalize::{is_hebrew_word, normalize};
use crate::rules::{priority_weight, CutAlias, RuleTable};
use crate::store::Store;

const ALIAS_THRESHOLD: f64 = 0.5;
const CATEGORY_DEFAULT_CONFIDENCE: f64 = 0.3;
const LAST_RESORT_CONFIDENCE: f64 = 0.1;
const GRAMS_PER_POUND: f64 = 453.592;

/// How a cut was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    Alias,
    CategoryDefault,
    LastResort,
}

/// Result of [`map_to_canonical_cut`].
#[derive(Debug, Clone, Serialize)]
pub struct CutResolution {
    pub cut_id: String,
    pub confidence: f64,
    pub method: ResolutionPath,
}

/// Best scoring alias for a name, before any catalog lookup.
#[derive(Debug, Clone)]
pub struct CutMatch<'a> {
    pub alias: &'a CutAlias,
    pub score: f64,
}

/// Score every cut alias against `product_name` and return the best one.
pub fn best_cut_match<'a>(table: &'a RuleTable, product_name: &str) -> Option<CutMatch<'a>> {
    let name = normalize(product_name);
    if name.is_empty() {
        return None;
    }

    let mut best: Option<CutMatch<'a>> = None;
    for alias in &table.cuts {
        let hebrew = normalize(&alias.name_hebrew);
        let raw = if !hebrew.is_empty() && name.contains(&hebrew) {
            1.0
        } else if alias.keywords.iter().any(|k| name.contains(k.as_str())) {
            0.8
        } else {
            0.0
        };
        let score = raw * priority_weight(alias.priority);
        if score > best.as_ref().map_or(0.0, |b| b.score) {
            best = Some(CutMatch { alias, score });
        }
    }
    best
}

/// Resolve a listing to a catalog cut.
///
/// Fails with [`Error::NotFound`] only when the catalog holds no cuts at
/// all; callers route such listings to the discovery queue.
pub async fn map_to_canonical_cut(
    store: &dyn Store,
    table: &RuleTable,
    product_name: &str,
    category: Option<&str>,
) -> Result<CutResolution> {
    if let Some(best) = best_cut_match(table, product_name) {
        if best.score > ALIAS_THRESHOLD {
            let found = match store.find_cut_by_name(&best.alias.name_hebrew).await? {
                Some(cut) => Some(cut),
                None => store.find_cut_by_name(&best.alias.name_english).await?,
            };
            if let Some(cut) = found {
                return Ok(CutResolution {
                    cut_id: cut.id,
                    confidence: best.score,
                    method: ResolutionPath::Alias,
                });
            }
        }
    }

    let fallback = category
        .and_then(|c| table.category_defaults.get(c.trim()))
        .unwrap_or(&table.default_cut);
    if let Some(cut) = store.find_cut_by_name(fallback).await? {
        return Ok(CutResolution {
            cut_id: cut.id,
            confidence: CATEGORY_DEFAULT_CONFIDENCE,
            method: ResolutionPath::CategoryDefault,
        });
    }

    match store.list_cuts().await?.into_iter().next() {
        Some(cut) => Ok(CutResolution {
            cut_id: cut.id,
            confidence: LAST_RESORT_CONFIDENCE,
            method: ResolutionPath::LastResort,
        }),
        None => Err(Error::not_found("catalog has no canonical cuts")),
    }
}

/// Find a brand in a product name.
///
/// Known brands from the gazetteer win. Otherwise, in names of two or more
/// words, a leading Hebrew-only word longer than two letters is taken as the
/// brand unless it is itself a meat term or cut keyword.
pub fn extract_brand(table: &RuleTable, product_name: &str) -> Option<String> {
    let name = normalize(product_name);
    if let Some(brand) = table.brands.iter().find(|b| name.contains(b.as_str())) {
        return Some(brand.clone());
    }

    let words: Vec<&str> = name.split(' ').filter(|w| !w.is_empty()).collect();
    if words.len() < 2 {
        return None;
    }
    let first = words[0];
    if first.chars().count() <= 2 || !is_hebrew_word(first) {
        return None;
    }
    let is_meat_word = table.meat_terms.iter().any(|t| t.term == first)
        || table
            .cuts
            .iter()
            .any(|c| normalize(&c.name_hebrew) == first || c.keywords.iter().any(|k| k == first));
    if is_meat_word {
        return None;
    }
    Some(first.to_string())
}

/// Detected quality grade and how sure the detector is about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeMatch {
    pub grade: String,
    pub confidence: f64,
}

/// First grade family whose keyword appears in the name.
pub fn detect_grade(table: &RuleTable, product_name: &str) -> GradeMatch {
    let name = normalize(product_name);
    for family in &table.grade_keywords {
        if family.keywords.iter().any(|k| name.contains(k.as_str())) {
            let confidence = match family.grade.as_str() {
                "premium" | "angus" => 0.9,
                _ => 0.7,
            };
            return GradeMatch {
                grade: family.grade.clone(),
                confidence,
            };
        }
    }
    GradeMatch {
        grade: "regular".to_string(),
        confidence: 0.5,
    }
}

/// Weighted mapping confidence, rounded to two decimals.
pub fn mapping_confidence(
    cut_confidence: f64,
    brand_found: bool,
    grade_confidence: f64,
    price_valid: bool,
) -> f64 {
    let total = cut_confidence * 0.4
        + if brand_found { 0.9 } else { 0.3 } * 0.2
        + grade_confidence * 0.2
        + if price_valid { 1.0 } else { 0.5 } * 0.2;
    round2(total)
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Unit a listing price refers to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Kilogram,
    Gram,
    Piece,
    Pound,
}

impl Unit {
    /// Hebrew display label.
    pub fn label(&self) -> &'static str {
        match self {
            Unit::Kilogram => "ק\"ג",
            Unit::Gram => "גרם",
            Unit::Piece => "יחידה",
            Unit::Pound => "lb",
        }
    }
}

/// A parsed unit string such as `ק"ג`, `500 גרם` or `2 lb`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PackUnit {
    pub unit: Unit,
    /// Pack size in `unit`s, when the string carried a number.
    pub quantity: Option<f64>,
}

/// Parse a free-text unit. Missing or unrecognized units mean kilograms.
pub fn normalize_unit(unit: Option<&str>) -> PackUnit {
    let raw: String = unit
        .unwrap_or("")
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let quantity = leading_number(&raw).filter(|q| *q > 0.0);
    let compact: String = raw.chars().filter(|c| *c != '"' && *c != '״').collect();

    let unit = if compact.contains("קג") || compact.contains("kg") || compact.contains("קילו") {
        Unit::Kilogram
    } else if compact.contains("גר") || compact.contains("gr") || compact.contains("gram") {
        Unit::Gram
    } else if compact.contains("יח")
        || compact.contains("unit")
        || compact.contains("piece")
        || compact.contains("ea")
    {
        Unit::Piece
    } else if compact.contains("לב") || compact.contains("lb") || compact.contains("pound") {
        Unit::Pound
    } else {
        Unit::Kilogram
    };
    PackUnit { unit, quantity }
}

fn leading_number(s: &str) -> Option<f64> {
    let digits: String = s
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}

/// Convert a listing price to a price per kilogram.
///
/// Gram prices with a pack size scale to 1000 g; a bare gram unit is read
/// as a per-100 g price. Per-piece prices cannot be converted.
pub fn price_per_kg(price: f64, unit: &PackUnit) -> Option<f64> {
    if !price.is_finite() || price <= 0.0 {
        return None;
    }
    let per_kg = match unit.unit {
        Unit::Kilogram => price / unit.quantity.unwrap_or(1.0),
        Unit::Gram => match unit.quantity {
            Some(grams) => price * 1000.0 / grams,
            None => price * 10.0,
        },
        Unit::Pound => price * 1000.0 / (GRAMS_PER_POUND * unit.quantity.unwrap_or(1.0)),
        Unit::Piece => return None,
    };
    Some(round2(per_kg))
}

/// Whether a per-kg price is plausible for the cut.
///
/// Uses the cut's typical range when the catalog knows one, else the
/// configured global bounds.
pub fn price_is_valid(
    price_per_kg: f64,
    cut: Option<&CanonicalCut>,
    min_per_kg: f64,
    max_per_kg: f64,
) -> bool {
    if !price_per_kg.is_finite() || price_per_kg <= 0.0 {
        return false;
    }
    match cut.and_then(|c| c.typical_price_min.zip(c.typical_price_max)) {
        Some((lo, hi)) => price_per_kg >= lo && price_per_kg <= hi,
        None => price_per_kg >= min_per_kg && price_per_kg <= max_per_kg,
    }
}

/// Resolve a scraper site name to a retailer id.
///
/// Tries the rule table's site aliases, then an exact name, then a
/// case-insensitive containment match, then the first known retailer.
pub async fn map_site_to_retailer(
    store: &dyn Store,
    table: &RuleTable,
    site: &str,
) -> Result<String> {
    let retailers = store.list_retailers().await?;
    if retailers.is_empty() {
        return Err(Error::not_found("no retailers in catalog"));
    }

    let slug: String = site
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || *c == '-')
        .collect();
    if let Some(mapped) = table.retailers.get(&slug) {
        if let Some(r) = retailers.iter().find(|r| &r.name == mapped || &r.id == mapped) {
            return Ok(r.id.clone());
        }
    }

    let needle = site.trim().to_lowercase();
    if let Some(r) = retailers.iter().find(|r| r.name == site.trim()) {
        return Ok(r.id.clone());
    }
    if !needle.is_empty() {
        if let Some(r) = retailers
            .iter()
            .find(|r| r.name.to_lowercase().contains(&needle))
        {
            return Ok(r.id.clone());
        }
    }

    tracing::warn!(site = %site, "unknown site, attributing to first retailer");
    Ok(retailers[0].id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Retailer;
    use crate::store::memory::InMemoryStore;

    fn cut(id: &str, he: &str, en: &str, category: &str) -> CanonicalCut {
        CanonicalCut {
            id: id.to_string(),
            name_hebrew: he.to_string(),
            name_english: en.to_string(),
            category: category.to_string(),
            typical_price_min: None,
            typical_price_max: None,
        }
    }

    async fn catalog() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.upsert_cut(&cut("c-entrecote", "אנטריקוט", "entrecote", "beef")).await.unwrap();
        store.upsert_cut(&cut("c-ground", "בשר טחון", "ground-beef", "beef")).await.unwrap();
        store.upsert_cut(&cut("c-breast", "חזה עוף", "chicken-breast", "chicken")).await.unwrap();
        store
    }

    #[test]
    fn test_best_cut_match_prefers_hebrew_name() {
        let table = RuleTable::seed();
        let m = best_cut_match(&table, "אנטריקוט בקר טרי").unwrap();
        assert_eq!(m.alias.name_english, "entrecote");
        assert!((m.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_priority_weight_applies() {
        let table = RuleTable::seed();
        let m = best_cut_match(&table, "צלע בקר").unwrap();
        assert_eq!(m.alias.name_english, "ribs");
        assert!((m.score - 0.72).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_alias_resolution() {
        let store = catalog().await;
        let table = RuleTable::seed();
        let r = map_to_canonical_cut(&store, &table, "אנטריקוט בקר טרי", Some("בקר"))
            .await
            .unwrap();
        assert_eq!(r.cut_id, "c-entrecote");
        assert_eq!(r.method, ResolutionPath::Alias);
    }

    #[tokio::test]
    async fn test_category_default() {
        let store = catalog().await;
        let table = RuleTable::seed();
        let r = map_to_canonical_cut(&store, &table, "מוצר עוף מיוחד", Some("עוף"))
            .await
            .unwrap();
        assert_eq!(r.cut_id, "c-breast");
        assert_eq!(r.method, ResolutionPath::CategoryDefault);
        assert!((r.confidence - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_last_resort_and_empty_catalog() {
        let table = RuleTable::seed();
        let store = InMemoryStore::new();
        let err = map_to_canonical_cut(&store, &table, "משהו", None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        store.upsert_cut(&cut("c-lamb", "טלה", "lamb", "lamb")).await.unwrap();
        let r = map_to_canonical_cut(&store, &table, "משהו", Some("דגים")).await.unwrap();
        assert_eq!(r.method, ResolutionPath::LastResort);
        assert!((r.confidence - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_extract_brand() {
        let table = RuleTable::seed();
        assert_eq!(extract_brand(&table, "שניצל עוף טוב").as_deref(), Some("עוף טוב"));
        assert_eq!(extract_brand(&table, "זוגלובק נקניקיות").as_deref(), Some("זוגלובק"));
        assert_eq!(extract_brand(&table, "אנטריקוט מיושן"), None);
        assert_eq!(extract_brand(&table, "סלמון"), None);
        assert_eq!(extract_brand(&table, "אב בשר"), None);
    }

    #[test]
    fn test_detect_grade() {
        let table = RuleTable::seed();
        assert_eq!(detect_grade(&table, "אנטריקוט אנגוס").grade, "angus");
        assert!((detect_grade(&table, "אנטריקוט אנגוס").confidence - 0.9).abs() < 1e-9);
        let frozen = detect_grade(&table, "חזה עוף קפוא");
        assert_eq!(frozen.grade, "frozen");
        assert!((frozen.confidence - 0.7).abs() < 1e-9);
        assert_eq!(detect_grade(&table, "כתף בקר").grade, "regular");
    }

    #[test]
    fn test_mapping_confidence() {
        assert!((mapping_confidence(1.0, true, 0.9, true) - 0.96).abs() < 1e-9);
        assert!((mapping_confidence(0.3, false, 0.5, false) - 0.38).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_unit_and_price_per_kg() {
        let kg = normalize_unit(Some("ק\"ג"));
        assert_eq!(kg.unit, Unit::Kilogram);
        assert_eq!(price_per_kg(89.9, &kg), Some(89.9));

        let pack = normalize_unit(Some("500 גרם"));
        assert_eq!(pack.unit, Unit::Gram);
        assert_eq!(price_per_kg(45.0, &pack), Some(90.0));

        let per_100 = normalize_unit(Some("גרם"));
        assert_eq!(price_per_kg(9.0, &per_100), Some(90.0));

        let lb = normalize_unit(Some("lb"));
        assert_eq!(lb.unit, Unit::Pound);
        assert_eq!(price_per_kg(10.0, &lb), Some(22.05));

        let piece = normalize_unit(Some("יחידה"));
        assert_eq!(piece.unit, Unit::Piece);
        assert_eq!(price_per_kg(12.0, &piece), None);

        assert_eq!(normalize_unit(None).unit, Unit::Kilogram);
        assert_eq!(price_per_kg(-1.0, &kg), None);
    }

    #[test]
    fn test_price_is_valid() {
        let mut c = cut("c", "אנטריקוט", "entrecote", "beef");
        assert!(price_is_valid(90.0, Some(&c), 10.0, 1000.0));
        c.typical_price_min = Some(120.0);
        c.typical_price_max = Some(220.0);
        assert!(!price_is_valid(90.0, Some(&c), 10.0, 1000.0));
        assert!(price_is_valid(150.0, Some(&c), 10.0, 1000.0));
        assert!(!price_is_valid(5.0, None, 10.0, 1000.0));
        assert!(!price_is_valid(f64::NAN, None, 10.0, 1000.0));
    }

    #[tokio::test]
    async fn test_map_site_to_retailer() {
        let table = RuleTable::seed();
        let store = InMemoryStore::new();
        assert!(map_site_to_retailer(&store, &table, "shufersal").await.is_err());

        for (id, name) in [("r1", "rami-levy"), ("r2", "shufersal"), ("r3", "Victory Online")] {
            store
                .upsert_retailer(&Retailer {
                    id: id.to_string(),
                    name: name.to_string(),
                })
                .await
                .unwrap();
        }
        assert_eq!(map_site_to_retailer(&store, &table, "Shufersal").await.unwrap(), "r2");
        assert_eq!(map_site_to_retailer(&store, &table, "victory online").await.unwrap(), "r3");
        assert_eq!(map_site_to_retailer(&store, &table, "unknown.example").await.unwrap(), "r1");
    }
}
