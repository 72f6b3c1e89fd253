//! `basar conflicts` subcommands.

use anyhow::{bail, Result};

use basarometer_core::conflict::{self, ResolveOutcome};
use basarometer_core::models::Conflict;
use basarometer_core::store::{ConflictFilter, Store};

use crate::catalog;
use crate::config::Config;

fn print_conflict_row(c: &Conflict) {
    let state = if c.resolved {
        c.resolution_method.map(|m| m.as_str()).unwrap_or("resolved")
    } else if c.human_intervention_required {
        "needs_review"
    } else {
        "pending"
    };
    println!(
        "{:<36}  {:<20}  {:>9.2}  {:>9.2}  {:>7.2}%  {:>5.1}  {}",
        c.id,
        c.canonical_cut_id,
        c.price1,
        c.price2,
        c.percentage_difference,
        c.confidence_score,
        state
    );
}

fn print_outcome(outcome: &ResolveOutcome) {
    let c = outcome.conflict();
    match outcome {
        ResolveOutcome::Resolved(_) => {
            println!("resolved {}", c.id);
            if let Some(price) = c.resolved_price {
                println!("  price: {:.2}", price);
            }
            if let Some(conf) = c.resolution_confidence {
                println!("  confidence: {:.1}", conf);
            }
        }
        ResolveOutcome::Escalated(_) => {
            println!("escalated {} for manual review", c.id);
            if let Some(notes) = &c.notes {
                println!("  {}", notes);
            }
        }
        ResolveOutcome::AlreadyResolved(_) => {
            println!("{} was already resolved", c.id);
        }
    }
}

pub async fn run_detect(config: &Config) -> Result<()> {
    let store = catalog::open_store(config).await?;
    let created = conflict::detect_conflicts(&store, &config.conflict_policy()).await?;

    println!("conflicts detected: {}", created.len());
    for c in &created {
        print_conflict_row(c);
    }

    store.pool().close().await;
    Ok(())
}

pub async fn run_list(config: &Config, status: &str) -> Result<()> {
    let Some(filter) = ConflictFilter::parse(status) else {
        bail!(
            "Unknown status '{}'. Available: all, unresolved, resolved, needs_review",
            status
        );
    };
    let store = catalog::open_store(config).await?;
    let conflicts = store.list_conflicts(filter).await?;

    if conflicts.is_empty() {
        println!("No conflicts.");
    } else {
        println!(
            "{:<36}  {:<20}  {:>9}  {:>9}  {:>8}  {:>5}  STATE",
            "ID", "CUT", "PRICE1", "PRICE2", "DIFF", "CONF"
        );
        for c in &conflicts {
            print_conflict_row(c);
        }
    }

    store.pool().close().await;
    Ok(())
}

pub async fn run_resolve(config: &Config, id: &str) -> Result<()> {
    let store = catalog::open_store(config).await?;
    let outcome = conflict::auto_resolve(&store, id, &config.conflict_policy()).await?;
    print_outcome(&outcome);
    store.pool().close().await;
    Ok(())
}

pub async fn run_resolve_manual(
    config: &Config,
    id: &str,
    price: f64,
    notes: Option<&str>,
) -> Result<()> {
    let store = catalog::open_store(config).await?;
    let outcome = conflict::resolve_manually(&store, id, price, notes).await?;
    print_outcome(&outcome);
    store.pool().close().await;
    Ok(())
}

pub async fn run_sweep(config: &Config) -> Result<()> {
    let store = catalog::open_store(config).await?;
    let summary = conflict::sweep(&store, &config.conflict_policy()).await?;

    println!("conflict sweep");
    println!("  analyzed: {}", summary.analyzed);
    println!("  auto-resolved: {}", summary.auto_resolved);
    println!("  flagged for review: {}", summary.flagged);
    println!("  failed: {}", summary.failed);
    println!("ok");

    store.pool().close().await;
    Ok(())
}
