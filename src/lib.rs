//! # Basarometer
//!
//! Identity resolution and price reconciliation for Hebrew retail meat
//! listings.
//!
//! Raw listings from supermarket scrapers, government price feeds and
//! receipt OCR are normalized, screened for non-meat contamination,
//! classified into category and quality grade, and mapped onto a canonical
//! catalog of cuts and retailers. Confident results become price
//! observations; everything else waits in a discovery queue for an admin,
//! whose approvals are learned as mapping rules. Cross-retailer price
//! disagreements are detected and resolved in batch passes.
//!
//! The domain logic lives in the `basarometer-core` crate; this crate adds
//! configuration, SQLite persistence, the `basar` CLI and the admin HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │  Listings   │──▶│ Normalize → Classify │──▶│  SQLite  │
//! │ JSON/JSONL  │   │   → Map → Observe    │   │  (WAL)   │
//! └─────────────┘   └──────────┬───────────┘   └────┬─────┘
//!                              │ low confidence     │
//!                              ▼                    ▼
//!                      ┌───────────────┐   ┌────────────────┐
//!                      │ Review queue  │   │   Conflicts    │
//!                      │ (learn rules) │   │ detect/resolve │
//!                      └───────────────┘   └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! basar init                          # create database
//! basar seed                          # load cuts and retailers
//! basar ingest ./listings.jsonl       # run listings through the pipeline
//! basar queue                         # see what needs review
//! basar conflicts detect              # find cross-retailer price gaps
//! basar serve                         # start the admin API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`catalog`] | Catalog seeding and pipeline bootstrap |
//! | [`ingest`] | Batch listing ingestion |
//! | [`classify`] | One-off classification and purity reports |
//! | [`review`] | Discovery-queue review commands |
//! | [`conflicts`] | Conflict commands |
//! | [`stats`] | Database statistics |
//! | [`server`] | Admin HTTP API |

pub mod catalog;
pub mod classify;
pub mod config;
pub mod conflicts;
pub mod db;
pub mod ingest;
pub mod migrate;
pub mod review;
pub mod server;
pub mod sqlite_store;
pub mod stats;
