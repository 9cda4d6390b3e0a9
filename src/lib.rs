//! # HS Match
//!
//! A Harmonized System (HS) tariff code matching engine: free-text product
//! descriptions in, ranked HS codes with confidence scores out.
//!
//! HS Match loads a validated HS taxonomy, embeds every node description
//! once, and ranks nodes against each query by cosine similarity with a
//! hierarchical boost and a deterministic tie-break. Results are cached per
//! normalized query and the taxonomy can be reloaded without downtime.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌──────────────┐
//! │  Taxonomy  │──▶│  Embedder  │──▶│   Snapshot   │
//! │ JSON + map │   │ hash/API/  │   │ nodes+vectors│
//! └────────────┘   │ fastembed  │   │ index+cache  │
//!                  └────────────┘   └──────┬───────┘
//!                                          │
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │   CLI    │       │   HTTP   │
//!                 │  (hsm)   │       │  (axum)  │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hsm check                                  # validate the taxonomy
//! hsm classify "smartphone with OLED screen" --top-k 5
//! hsm classify "cotton t-shirts" --isic 1410 --explain
//! hsm node 8517
//! hsm serve                                  # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding backends and provider selection |
//! | [`cache`] | Per-snapshot result cache |
//! | [`isic`] | ISIC → HS mapping |
//! | [`engine`] | Snapshot swap, timeouts, `classify` |
//! | [`server`] | HTTP adapter |
//! | [`commands`] | CLI command implementations |
//!
//! Taxonomy, normalization, ranking, and indexing live in `hs_match_core`.

pub mod cache;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod isic;
pub mod server;
