//! Per-listing pipeline: normalize → classify → map → observe or queue.
//!
//! [`Pipeline::assess`] computes what should happen to a listing without
//! touching the store's write side; [`Pipeline::ingest`] also persists the
//! result. Every listing ends as exactly one of:
//!
//! - an observation, when it is meat and maps with enough confidence,
//! - a discovery-queue item, when any step is unsure or fails to resolve,
//! - a rejection, when the contamination screen is confident it is not meat.

use chrono::Utc;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::error::{Error, Result};
use crate::mapper::{
    detect_grade, extract_brand, map_site_to_retailer, map_to_canonical_cut, mapping_confidence,
    normalize_unit, price_is_valid, price_per_kg, CutResolution, GradeMatch,
};
use crate::models::{ClassificationResult, DiscoveryQueueItem, Listing, PriceObservation};
use crate::normalize::normalize;
use crate::store::Store;

/// Thresholds for committing a listing without review.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PipelineSettings {
    pub review_threshold: f64,
    pub min_price_per_kg: f64,
    pub max_price_per_kg: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            review_threshold: 0.7,
            min_price_per_kg: 10.0,
            max_price_per_kg: 1000.0,
        }
    }
}

/// Where a listing ended up.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Observed {
        observation: PriceObservation,
        cut: CutResolution,
        brand: Option<String>,
        grade: GradeMatch,
        classification: ClassificationResult,
    },
    Queued {
        item: DiscoveryQueueItem,
        reason: String,
    },
    Rejected {
        reason: String,
        classification: ClassificationResult,
    },
}

impl IngestOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Observed { .. } => "observed",
            IngestOutcome::Queued { .. } => "queued",
            IngestOutcome::Rejected { .. } => "rejected",
        }
    }
}

/// Listing pipeline owning its classifier.
pub struct Pipeline {
    classifier: Classifier,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(classifier: Classifier, settings: PipelineSettings) -> Self {
        Self {
            classifier,
            settings,
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn classifier_mut(&mut self) -> &mut Classifier {
        &mut self.classifier
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Decide the fate of a listing. Reads the catalog, writes nothing.
    pub async fn assess(&mut self, store: &dyn Store, listing: &Listing) -> Result<IngestOutcome> {
        if normalize(&listing.name).is_empty() {
            return Err(Error::invalid("listing name is empty"));
        }
        if !listing.price.is_finite() || listing.price <= 0.0 {
            return Err(Error::invalid(format!(
                "listing '{}' has invalid price {}",
                listing.name, listing.price
            )));
        }
        if listing.source.trim().is_empty() {
            return Err(Error::invalid(format!("listing '{}' has no source", listing.name)));
        }

        let threshold = self.settings.review_threshold;
        let classification = self
            .classifier
            .classify(&listing.name, listing.category.as_deref());

        if !classification.is_valid_meat {
            if classification.confidence >= threshold {
                let reason = classification
                    .contamination_reason
                    .clone()
                    .unwrap_or_else(|| "not a meat product".to_string());
                return Ok(IngestOutcome::Rejected {
                    reason,
                    classification,
                });
            }
            return Ok(queued(listing, &classification, None, "unrecognized product"));
        }
        if classification.confidence < threshold {
            return Ok(queued(listing, &classification, None, "low classification confidence"));
        }

        let table = self.classifier.table();
        let category = classification
            .category
            .as_deref()
            .or(listing.category.as_deref());
        let cut = match map_to_canonical_cut(store, table, &listing.name, category).await {
            Ok(cut) => cut,
            Err(Error::NotFound(msg)) => {
                return Ok(queued(listing, &classification, None, &msg));
            }
            Err(e) => return Err(e),
        };

        let site = listing.vendor.as_deref().unwrap_or(&listing.source);
        let retailer_id = match map_site_to_retailer(store, table, site).await {
            Ok(id) => id,
            Err(Error::NotFound(msg)) => {
                return Ok(queued(listing, &classification, None, &msg));
            }
            Err(e) => return Err(e),
        };

        let unit = normalize_unit(listing.unit.as_deref());
        let Some(per_kg) = price_per_kg(listing.price, &unit) else {
            return Ok(queued(
                listing,
                &classification,
                None,
                &format!("price per {} cannot be converted to per-kg", unit.unit.label()),
            ));
        };

        let catalog_cut = store
            .list_cuts()
            .await?
            .into_iter()
            .find(|c| c.id == cut.cut_id);
        let price_ok = price_is_valid(
            per_kg,
            catalog_cut.as_ref(),
            self.settings.min_price_per_kg,
            self.settings.max_price_per_kg,
        );
        let brand = extract_brand(table, &listing.name);
        let grade = detect_grade(table, &listing.name);
        let confidence = mapping_confidence(cut.confidence, brand.is_some(), grade.confidence, price_ok);

        debug!(
            name = %listing.name,
            cut = %cut.cut_id,
            retailer = %retailer_id,
            per_kg,
            confidence,
            "listing mapped"
        );

        if confidence < threshold {
            return Ok(queued(
                listing,
                &classification,
                Some(confidence),
                "low mapping confidence",
            ));
        }

        let observation = PriceObservation {
            id: Uuid::new_v4().to_string(),
            canonical_cut_id: cut.cut_id.clone(),
            retailer_id,
            price_per_kg: per_kg,
            confidence_score: confidence,
            source: listing.source.clone(),
            observed_at: listing.observed_at,
            is_active: true,
        };
        Ok(IngestOutcome::Observed {
            observation,
            cut,
            brand,
            grade,
            classification,
        })
    }

    /// Assess a listing and persist the outcome.
    pub async fn ingest(&mut self, store: &dyn Store, listing: &Listing) -> Result<IngestOutcome> {
        let outcome = self.assess(store, listing).await?;
        match &outcome {
            IngestOutcome::Observed {
                observation,
                classification,
                ..
            } => {
                store.insert_observation(observation).await?;
                if let Some(rule_id) = &classification.matched_rule_id {
                    store.increment_rule_usage(rule_id).await?;
                }
            }
            IngestOutcome::Queued { item, .. } => store.insert_discovery_item(item).await?,
            IngestOutcome::Rejected { reason, .. } => {
                debug!(name = %listing.name, %reason, "listing rejected");
            }
        }
        Ok(outcome)
    }
}

fn queued(
    listing: &Listing,
    classification: &ClassificationResult,
    mapping_confidence: Option<f64>,
    reason: &str,
) -> IngestOutcome {
    let confidence = match mapping_confidence {
        Some(m) => m.min(classification.confidence),
        None => classification.confidence,
    };
    IngestOutcome::Queued {
        item: DiscoveryQueueItem {
            id: Uuid::new_v4().to_string(),
            product_name: listing.name.clone(),
            normalized_suggestion: normalize(&listing.name),
            category_suggestion: classification
                .category
                .clone()
                .or_else(|| listing.category.clone()),
            quality_grade_suggestion: classification.quality_grade.clone(),
            confidence_score: confidence,
            approved: None,
            manual_review_needed: true,
            admin_notes: None,
            source: Some(listing.source.clone()),
            price: Some(listing.price),
            created_at: Utc::now(),
        },
        reason: reason.to_string(),
    }
}
