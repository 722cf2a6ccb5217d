//! # Atlascope
//!
//! A humanitarian situation-report map backend.
//!
//! Atlascope keeps a local store of disaster reports pulled from the
//! ReliefWeb feed, and answers plain-English questions about them by having
//! a language model write a read query against that store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ ReliefWeb    │──▶│  Normalize   │──▶│  SQLite   │
//! │ feed (paged) │   │  + filter    │   │ reports   │
//! └──────────────┘   └─────────────┘   └────┬─────┘
//!                                           │ read-only
//!            ┌──────────┐   ┌───────────┐   ▼
//! question ─▶│  Quota   │──▶│ Translator │──▶ guard ─▶ rows
//!            └──────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! atlascope init                          # create database
//! atlascope backfill --days 5             # initial historical load
//! atlascope query "floods in Asia this week"
//! atlascope serve                         # HTTP API + ingestion schedule
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`feed`] | ReliefWeb feed client |
//! | [`normalize`] | Raw record → [`models::Report`] with rejection reasons |
//! | [`store`] | Report upserts and fixed reads |
//! | [`lock`] | Cross-process ingestion run lock |
//! | [`ingest`] | Paged ingestion runs |
//! | [`scheduler`] | Periodic ingestion |
//! | [`quota`] | Anonymous query quota |
//! | [`regions`] | Region → country expansion tables |
//! | [`translator`] | Question → SQL via a language model |
//! | [`sql_guard`] | Generated-query shape check |
//! | [`gateway`] | Quota + translate + execute |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connections |
//! | [`migrate`] | Schema creation |

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod get;
pub mod ingest;
pub mod lock;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod quota;
pub mod regions;
pub mod scheduler;
pub mod server;
pub mod sql_guard;
pub mod store;
pub mod translator;
