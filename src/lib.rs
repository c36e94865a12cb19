//! # Lorebase
//!
//! An incremental knowledge-base engine for a software project: it indexes
//! documentation, source code, and live structured records (freeform context
//! entries and work-item tasks) into SQLite, keeps the index fresh with a
//! periodic fingerprint-diffing cycle, and answers natural-language questions
//! by merging fresh live data with vector search before delegating synthesis
//! to a chat model.
//!
//! ## Pipeline
//!
//! ```text
//! project tree + live records
//!        │
//!        ▼
//!   scan ──▶ diff ──▶ chunk ──▶ embed ──▶ commit ──▶ watermark
//!                                             │
//!                                             ▼
//!                          SQLite (chunks, vectors, fingerprints)
//!                                             │
//!                                             ▼
//!               retrieve (live-first, budgeted) ──▶ synthesize
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`scan`] | Enumeration and fingerprint diffing |
//! | [`chunker`] | Fixed, prose, and code chunking strategies |
//! | [`embedder`] | Embedding provider, batching, cache |
//! | [`store`] | Index persistence and nearest-neighbor search |
//! | [`indexer`] | The periodic indexing cycle coordinator |
//! | [`records`] | Live record store access |
//! | [`retrieve`] | Budgeted hybrid retrieval |
//! | [`answer`] | Prompt assembly and chat synthesis |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chunker;
pub mod config;
pub mod db;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod migrate;
pub mod models;
pub mod records;
pub mod retrieve;
pub mod scan;
pub mod store;
