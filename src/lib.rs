//! # Paper Index
//!
//! Retrieval-augmented context for a library of research papers.
//!
//! Cleaned paper text is split into overlapping token-budgeted chunks,
//! embedded through a hosted provider (Voyage or OpenAI), and stored in a
//! SQLite-backed vector collection. At question time the [`retriever`]
//! embeds the query, ranks chunks by cosine distance, and hands back a
//! [`ContextBundle`](models::ContextBundle) ready to paste into a prompt.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌────────────┐
//! │ PaperInput  │──▶│ IngestionCoordinator │──▶│  SQLite    │
//! │ (cleaned)   │   │ chunk + embed + swap │   │ papers+vec │
//! └─────────────┘   └──────────┬───────────┘   └─────┬──────┘
//!                              │                     │
//!                              ▼                     ▼
//!                     ┌────────────────┐      ┌────────────┐
//!                     │ Voyage/OpenAI  │◀─────│ Retriever  │
//!                     │  embeddings    │      │ top-k ctx  │
//!                     └────────────────┘      └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! paperx init                          # create database
//! paperx ingest papers/*.json          # chunk, embed, index
//! paperx search "attention heads" --limit 5
//! paperx context "what is the loss?" --paper attention
//! paperx stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Per-stage error enums |
//! | [`chunk`] | Paragraph-aware text chunking |
//! | [`identifiers`] | DOI and arXiv id normalization |
//! | [`embedding`] | Embedding provider abstraction and retry policy |
//! | [`store`] | Vector store trait, in-memory and SQLite backends |
//! | [`catalog`] | Paper records and duplicate detection |
//! | [`ingest`] | Ingestion coordinator |
//! | [`pool`] | Bounded ingestion worker pool |
//! | [`retriever`] | Query-time context assembly |
//! | [`index`] | Wiring for an on-disk index |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod catalog;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod identifiers;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod papers;
pub mod pool;
pub mod retriever;
pub mod search;
pub mod stats;
pub mod store;

pub use index::PaperIndex;
