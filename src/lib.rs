//! # derivq
//!
//! Postgres-backed work queue for deriving artifacts (captions, embeddings)
//! from content items.
//!
//! The ledger lives in Postgres, which doubles as the notification bus
//! (LISTEN/NOTIFY) and the vector store (pgvector). Fulfillment workers
//! combine push wake-ups with a polling fallback, so a dropped notification
//! never strands a request.

pub mod collab;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod model;
pub mod query;
pub mod telemetry;
pub mod worker;
