//! # Basarometer Core
//!
//! Identity resolution and price reconciliation for Hebrew retail meat
//! listings: text normalization, meat/non-meat classification, catalog
//! mapping, cross-source conflict detection and resolution, and the
//! admin learning loop.
//!
//! This crate contains no sqlx, HTTP or CLI code. Persistence goes through
//! the [`store::Store`] trait; an in-memory implementation is included.

pub mod classifier;
pub mod conflict;
pub mod error;
pub mod learning;
pub mod mapper;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod rules;
pub mod store;

pub use error::{Error, Result};
