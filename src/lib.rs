//! botfleet
//!
//! Multi-tenant control plane for a fleet of Telegram bots whose replies come
//! from external LLM providers. One process polls Telegram for every enabled
//! bot, routes each message through command-intent classification or a
//! memory-aware LLM call, and exposes an admin HTTP surface for operating the
//! fleet.
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► Supervisor ──► Message Pipeline ──► LLM Adapter ──► Provider
//!   (long poll per bot)          │                    (URL-dispatched)
//!                                ├── Command Engine (intent probe + UI)
//!                                ├── Context Registry (multi-command state)
//!                                └── Store (SQLite: bots, commands, history)
//!
//! Admin UI ──► axum API ──► Supervisor / Store / Log Buffer / Stats
//! ```

pub mod admin;
pub mod commands;
pub mod config;
pub mod context;
pub mod llm;
pub mod logbuf;
pub mod pipeline;
pub mod state;
pub mod stats;
pub mod store;
pub mod supervisor;

pub use config::Config;
pub use context::ContextRegistry;
pub use llm::{ChatRequest, LlmClient, ProviderFamily};
pub use logbuf::{LogBuffer, LogCategory, LogEntry, LogLevel};
pub use state::AppContext;
pub use stats::RequestStats;
pub use store::Store;
pub use supervisor::Supervisor;
