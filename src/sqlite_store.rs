//! SQLite-backed [`Store`] implementation.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (UTC, microseconds)
//! so that lexical `ORDER BY` matches chronological order. Booleans are
//! stored as `INTEGER` 0/1; `discovery_queue.approved` is `NULL` while an
//! item is pending.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};

use basarometer_core::models::{
    CanonicalCut, Conflict, DiscoveryQueueItem, MappingRule, PriceObservation, ResolutionMethod,
    Retailer, RuleSource,
};
use basarometer_core::normalize::normalize;
use basarometer_core::store::{ConflictFilter, Store};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

/// Row counts per table, for `basar stats` and `GET /stats`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TableCounts {
    pub retailers: i64,
    pub cuts: i64,
    pub rules_active: i64,
    pub rules_total: i64,
    pub observations: i64,
    pub discovery_pending: i64,
    pub discovery_total: i64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn counts(&self) -> Result<TableCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM retailers) AS retailers,
                (SELECT COUNT(*) FROM meat_cuts) AS cuts,
                (SELECT COUNT(*) FROM mapping_rules WHERE active = 1) AS rules_active,
                (SELECT COUNT(*) FROM mapping_rules) AS rules_total,
                (SELECT COUNT(*) FROM price_observations WHERE is_active = 1) AS observations,
                (SELECT COUNT(*) FROM discovery_queue WHERE approved IS NULL) AS discovery_pending,
                (SELECT COUNT(*) FROM discovery_queue) AS discovery_total
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(TableCounts {
            retailers: row.get("retailers"),
            cuts: row.get("cuts"),
            rules_active: row.get("rules_active"),
            rules_total: row.get("rules_total"),
            observations: row.get("observations"),
            discovery_pending: row.get("discovery_pending"),
            discovery_total: row.get("discovery_total"),
        })
    }
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp in database: {}", s))?
        .with_timezone(&Utc))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn cut_from_row(row: &SqliteRow) -> CanonicalCut {
    CanonicalCut {
        id: row.get("id"),
        name_hebrew: row.get("name_hebrew"),
        name_english: row.get("name_english"),
        category: row.get("category"),
        typical_price_min: row.get("typical_price_min"),
        typical_price_max: row.get("typical_price_max"),
    }
}

fn rule_from_row(row: &SqliteRow) -> Result<MappingRule> {
    let source: String = row.get("source");
    Ok(MappingRule {
        id: row.get("id"),
        original_name: row.get("original_name"),
        normalized_name: row.get("normalized_name"),
        category: row.get("category"),
        quality_grade: row.get("quality_grade"),
        confidence: row.get("confidence"),
        source: RuleSource::parse(&source)
            .with_context(|| format!("unknown rule source: {}", source))?,
        usage_count: row.get("usage_count"),
        active: row.get("active"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

fn observation_from_row(row: &SqliteRow) -> Result<PriceObservation> {
    Ok(PriceObservation {
        id: row.get("id"),
        canonical_cut_id: row.get("canonical_cut_id"),
        retailer_id: row.get("retailer_id"),
        price_per_kg: row.get("price_per_kg"),
        confidence_score: row.get("confidence_score"),
        source: row.get("source"),
        observed_at: parse_ts(&row.get::<String, _>("observed_at"))?,
        is_active: row.get("is_active"),
    })
}

fn conflict_from_row(row: &SqliteRow) -> Result<Conflict> {
    let method: Option<String> = row.get("resolution_method");
    Ok(Conflict {
        id: row.get("id"),
        canonical_cut_id: row.get("canonical_cut_id"),
        product_identifier: row.get("product_identifier"),
        source1_id: row.get("source1_id"),
        source2_id: row.get("source2_id"),
        price1: row.get("price1"),
        price2: row.get("price2"),
        confidence1: row.get("confidence1"),
        confidence2: row.get("confidence2"),
        percentage_difference: row.get("percentage_difference"),
        confidence_score: row.get("confidence_score"),
        resolved: row.get("resolved"),
        resolution_method: method.as_deref().and_then(ResolutionMethod::parse),
        resolved_price: row.get("resolved_price"),
        resolution_confidence: row.get("resolution_confidence"),
        auto_resolution_attempted: row.get("auto_resolution_attempted"),
        human_intervention_required: row.get("human_intervention_required"),
        notes: row.get("notes"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        resolved_at: parse_opt_ts(row.get("resolved_at"))?,
    })
}

fn discovery_from_row(row: &SqliteRow) -> Result<DiscoveryQueueItem> {
    Ok(DiscoveryQueueItem {
        id: row.get("id"),
        product_name: row.get("product_name"),
        normalized_suggestion: row.get("normalized_suggestion"),
        category_suggestion: row.get("category_suggestion"),
        quality_grade_suggestion: row.get("quality_grade_suggestion"),
        confidence_score: row.get("confidence_score"),
        approved: row.get("approved"),
        manual_review_needed: row.get("manual_review_needed"),
        admin_notes: row.get("admin_notes"),
        source: row.get("source"),
        price: row.get("price"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

/// Deactivate the active rule for the same normalized name, then insert
/// `rule` as the active one.
async fn write_rule(conn: &mut SqliteConnection, rule: &MappingRule) -> Result<()> {
    sqlx::query("UPDATE mapping_rules SET active = 0 WHERE normalized_name = ? AND active = 1")
        .bind(&rule.normalized_name)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO mapping_rules (id, original_name, normalized_name, category,
                                   quality_grade, confidence, source, usage_count,
                                   active, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(&rule.id)
    .bind(&rule.original_name)
    .bind(&rule.normalized_name)
    .bind(&rule.category)
    .bind(&rule.quality_grade)
    .bind(rule.confidence)
    .bind(rule.source.as_str())
    .bind(rule.usage_count)
    .bind(ts(&rule.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_retailer(&self, retailer: &Retailer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO retailers (id, name) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(&retailer.id)
        .bind(&retailer.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_retailers(&self) -> Result<Vec<Retailer>> {
        let rows = sqlx::query("SELECT id, name FROM retailers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| Retailer {
                id: r.get("id"),
                name: r.get("name"),
            })
            .collect())
    }

    async fn upsert_cut(&self, cut: &CanonicalCut) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO meat_cuts (id, name_hebrew, name_english, category,
                                   typical_price_min, typical_price_max)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name_hebrew = excluded.name_hebrew,
                name_english = excluded.name_english,
                category = excluded.category,
                typical_price_min = excluded.typical_price_min,
                typical_price_max = excluded.typical_price_max
            "#,
        )
        .bind(&cut.id)
        .bind(&cut.name_hebrew)
        .bind(&cut.name_english)
        .bind(&cut.category)
        .bind(cut.typical_price_min)
        .bind(cut.typical_price_max)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_cuts(&self) -> Result<Vec<CanonicalCut>> {
        let rows = sqlx::query("SELECT * FROM meat_cuts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(cut_from_row).collect())
    }

    async fn find_cut_by_name(&self, name: &str) -> Result<Option<CanonicalCut>> {
        let row = sqlx::query(
            "SELECT * FROM meat_cuts WHERE name_hebrew = ?1 OR name_english = ?1 ORDER BY id LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(cut_from_row))
    }

    async fn insert_rule(&self, rule: &MappingRule) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_rule(&mut *tx, rule).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn active_rules(&self) -> Result<Vec<MappingRule>> {
        let rows = sqlx::query(
            "SELECT * FROM mapping_rules WHERE active = 1 ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(rule_from_row).collect()
    }

    async fn list_rules(&self) -> Result<Vec<MappingRule>> {
        let rows = sqlx::query("SELECT * FROM mapping_rules ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(rule_from_row).collect()
    }

    async fn increment_rule_usage(&self, rule_id: &str) -> Result<()> {
        sqlx::query("UPDATE mapping_rules SET usage_count = usage_count + 1 WHERE id = ?")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_observation(&self, observation: &PriceObservation) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let observed_at = ts(&observation.observed_at);

        let mut is_active = observation.is_active;
        if is_active {
            let newer: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM price_observations
                WHERE canonical_cut_id = ? AND retailer_id = ? AND is_active = 1
                  AND observed_at > ?
                "#,
            )
            .bind(&observation.canonical_cut_id)
            .bind(&observation.retailer_id)
            .bind(&observed_at)
            .fetch_one(&mut *tx)
            .await?;

            if newer > 0 {
                is_active = false;
            } else {
                sqlx::query(
                    r#"
                    UPDATE price_observations SET is_active = 0
                    WHERE canonical_cut_id = ? AND retailer_id = ? AND is_active = 1
                      AND observed_at <= ?
                    "#,
                )
                .bind(&observation.canonical_cut_id)
                .bind(&observation.retailer_id)
                .bind(&observed_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO price_observations (id, canonical_cut_id, retailer_id, price_per_kg,
                                            confidence_score, source, observed_at, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&observation.id)
        .bind(&observation.canonical_cut_id)
        .bind(&observation.retailer_id)
        .bind(observation.price_per_kg)
        .bind(observation.confidence_score)
        .bind(&observation.source)
        .bind(&observed_at)
        .bind(is_active)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn active_observations(&self) -> Result<Vec<PriceObservation>> {
        let rows = sqlx::query(
            "SELECT * FROM price_observations WHERE is_active = 1 ORDER BY observed_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(observation_from_row).collect()
    }

    async fn deactivate_observations(
        &self,
        cut_id: &str,
        retailer_ids: &[&str],
        observed_until: DateTime<Utc>,
    ) -> Result<u64> {
        let until = ts(&observed_until);
        let mut tx = self.pool.begin().await?;
        let mut changed = 0;
        for retailer_id in retailer_ids {
            changed += sqlx::query(
                r#"
                UPDATE price_observations SET is_active = 0
                WHERE canonical_cut_id = ? AND retailer_id = ? AND is_active = 1
                  AND observed_at <= ?
                "#,
            )
            .bind(cut_id)
            .bind(*retailer_id)
            .bind(&until)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(changed)
    }

    async fn insert_conflict_if_absent(&self, c: &Conflict) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO price_conflicts (id, canonical_cut_id, product_identifier, source1_id,
                                         source2_id, price1, price2, confidence1, confidence2,
                                         percentage_difference, confidence_score, resolved,
                                         resolution_method, resolved_price, resolution_confidence,
                                         auto_resolution_attempted, human_intervention_required,
                                         notes, created_at, resolved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&c.id)
        .bind(&c.canonical_cut_id)
        .bind(&c.product_identifier)
        .bind(&c.source1_id)
        .bind(&c.source2_id)
        .bind(c.price1)
        .bind(c.price2)
        .bind(c.confidence1)
        .bind(c.confidence2)
        .bind(c.percentage_difference)
        .bind(c.confidence_score)
        .bind(c.resolved)
        .bind(c.resolution_method.map(|m| m.as_str()))
        .bind(c.resolved_price)
        .bind(c.resolution_confidence)
        .bind(c.auto_resolution_attempted)
        .bind(c.human_intervention_required)
        .bind(&c.notes)
        .bind(ts(&c.created_at))
        .bind(c.resolved_at.as_ref().map(ts))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_conflict(&self, id: &str) -> Result<Option<Conflict>> {
        let row = sqlx::query("SELECT * FROM price_conflicts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(conflict_from_row).transpose()
    }

    async fn list_conflicts(&self, filter: ConflictFilter) -> Result<Vec<Conflict>> {
        let predicate = match filter {
            ConflictFilter::All => "1 = 1",
            ConflictFilter::Unresolved => "resolved = 0",
            ConflictFilter::Resolved => "resolved = 1",
            ConflictFilter::NeedsReview => "resolved = 0 AND human_intervention_required = 1",
        };
        let sql = format!(
            "SELECT * FROM price_conflicts WHERE {} ORDER BY created_at DESC, id",
            predicate
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(conflict_from_row).collect()
    }

    async fn resolve_conflict(&self, c: &Conflict) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE price_conflicts SET
                resolved = 1,
                resolution_method = ?,
                resolved_price = ?,
                resolution_confidence = ?,
                auto_resolution_attempted = ?,
                human_intervention_required = ?,
                notes = ?,
                resolved_at = ?
            WHERE id = ? AND resolved = 0
            "#,
        )
        .bind(c.resolution_method.map(|m| m.as_str()))
        .bind(c.resolved_price)
        .bind(c.resolution_confidence)
        .bind(c.auto_resolution_attempted)
        .bind(c.human_intervention_required)
        .bind(&c.notes)
        .bind(c.resolved_at.as_ref().map(ts))
        .bind(&c.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn flag_conflict(&self, id: &str, notes: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE price_conflicts SET
                human_intervention_required = 1,
                auto_resolution_attempted = 1,
                notes = COALESCE(?, notes)
            WHERE id = ? AND resolved = 0
            "#,
        )
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_discovery_item(&self, item: &DiscoveryQueueItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO discovery_queue (id, product_name, normalized_suggestion,
                                         category_suggestion, quality_grade_suggestion,
                                         confidence_score, approved, manual_review_needed,
                                         admin_notes, source, price, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.product_name)
        .bind(&item.normalized_suggestion)
        .bind(&item.category_suggestion)
        .bind(&item.quality_grade_suggestion)
        .bind(item.confidence_score)
        .bind(item.approved)
        .bind(item.manual_review_needed)
        .bind(&item.admin_notes)
        .bind(&item.source)
        .bind(item.price)
        .bind(ts(&item.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_discovery_item(&self, id: &str) -> Result<Option<DiscoveryQueueItem>> {
        let row = sqlx::query("SELECT * FROM discovery_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(discovery_from_row).transpose()
    }

    async fn list_discovery(
        &self,
        pending_only: bool,
        limit: Option<i64>,
    ) -> Result<Vec<DiscoveryQueueItem>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM discovery_queue
            WHERE (?1 = 0 OR approved IS NULL)
            ORDER BY created_at DESC, id
            LIMIT ?2
            "#,
        )
        .bind(pending_only)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(discovery_from_row).collect()
    }

    async fn review_discovery_item(
        &self,
        id: &str,
        approved: bool,
        admin_notes: Option<&str>,
        rule: Option<&MappingRule>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE discovery_queue
            SET approved = ?, manual_review_needed = 0, admin_notes = ?
            WHERE id = ? AND approved IS NULL
            "#,
        )
        .bind(approved)
        .bind(admin_notes)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(rule) = rule {
            write_rule(&mut *tx, rule).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn pending_items_with_token(&self, token: &str) -> Result<Vec<DiscoveryQueueItem>> {
        let token = normalize(token);
        if token.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT * FROM discovery_queue WHERE approved IS NULL")
            .fetch_all(&self.pool)
            .await?;
        let mut matched = Vec::new();
        for row in &rows {
            let item = discovery_from_row(row)?;
            if normalize(&item.product_name).contains(&token) {
                matched.push(item);
            }
        }
        Ok(matched)
    }

    async fn update_discovery_confidences(&self, updates: &[(String, f64)]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (id, confidence) in updates {
            sqlx::query("UPDATE discovery_queue SET confidence_score = ? WHERE id = ?")
                .bind(confidence)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
