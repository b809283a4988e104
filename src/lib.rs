//! # Point Blocks
//!
//! Parses knowledge-point content documents into stage × module blocks and
//! keeps a SQLite block store in step with the files on disk.
//!
//! Each topic code (e.g. `C8.4.10`) has one plain-text document in the
//! content directory. A document holds up to three stages, and each stage
//! holds module blocks introduced by headers like
//! `【考点 C8.4.10｜M02｜本页定位】`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │ FileLocator │──▶│  parser  │──▶│ Synchronizer │──▶│  SQLite  │
//! │ points/*.txt│   │  (pure)  │   │ hash + swap  │   │  blocks  │
//! └─────────────┘   └──────────┘   └──────────────┘   └────┬─────┘
//!                                                          │
//!                      ┌───────────────────────────────────┤
//!                      ▼                                   ▼
//!                 ┌──────────┐                       ┌──────────┐
//!                 │   CLI    │                       │   HTTP   │
//!                 │  (kpb)   │                       │  (axum)  │
//!                 └──────────┘                       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kpb init                      # create database
//! kpb sync --all                # import every document
//! kpb show C8.4.10              # live-parsed content, store fallback
//! kpb diagnose C8.4.10          # why is this code empty?
//! kpb serve                     # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Stage, module and record types |
//! | [`locator`] | Finding the document for a code |
//! | [`parser`] | Document → stages and module blocks |
//! | [`fingerprint`] | SHA-256 fingerprints and block keys |
//! | [`store`] | Block store trait, SQLite and in-memory backends |
//! | [`sync`] | Fingerprint-gated block replacement |
//! | [`content`] | Live content and persisted block reads |
//! | [`diagnose`] | Read-only troubleshooting report |
//! | [`coverage`] | Directory-wide coverage report |
//! | [`stats`] | Store statistics |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod content;
pub mod coverage;
pub mod db;
pub mod diagnose;
pub mod error;
pub mod fingerprint;
pub mod locator;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod server;
pub mod stats;
pub mod store;
pub mod sync;

pub use error::ContentError;
