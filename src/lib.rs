//! # Inquest
//!
//! A client-side orchestration engine for streamed document Q&A.
//!
//! Inquest drives a document analysis service from the command line: it
//! decomposes free-text prompts into discrete questions, submits them as a
//! batch, follows each answer over a long-lived SSE stream through
//! verification and retry, and synthesizes a per-document combined analysis
//! once every answer has settled.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Swap/Undo │──▶│ Orchestrator │──▶│ Query Units │
//! │   board   │   │   (batch)    │   │ (per query) │
//! └───────────┘   └──────────────┘   └──────┬──────┘
//!                                           │ SSE
//!                                           ▼
//!                 ┌──────────────┐   ┌─────────────┐
//!                 │ SessionStore │◀──│   Decoder   │
//!                 └──────┬───────┘   └─────────────┘
//!                        │
//!                        ▼
//!                 ┌──────────────┐
//!                 │  Aggregator  │
//!                 └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! inq session                     # show documents and query history
//! inq extract "brief the case"    # preview extracted questions
//! inq ask "summarize the risks"   # extract, submit, stream answers
//! inq ask -q "Who are the parties?" -q "What are the damages?"
//! inq analyze --all               # combined analysis per document
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and the status transition table |
//! | [`decode`] | Answer stream decoder (SSE framing) |
//! | [`client`] | HTTP client and the [`QueryService`](client::QueryService) seam |
//! | [`notify`] | User-facing notices |
//! | [`session`] | In-memory session store |
//! | [`unit`] | Per-query execution unit |
//! | [`orchestrate`] | Batch submission and extraction fallback |
//! | [`swap`] | Question board with swap and undo |
//! | [`analysis`] | Per-document combined analysis |

pub mod analysis;
pub mod client;
pub mod config;
pub mod decode;
pub mod models;
pub mod notify;
pub mod orchestrate;
pub mod session;
pub mod swap;
pub mod unit;
