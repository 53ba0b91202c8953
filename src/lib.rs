//! # dashforge
//!
//! Turns natural-language descriptions into Grafana dashboard JSON.
//!
//! Every request becomes a task that runs through an asynchronous pipeline:
//!
//! ```text
//!   prompt ──► [augment] ──► generate ──► validate ──► completed
//!                               ▲            │
//!                               │            ▼
//!                               └─ retry ◄─ fix (bounded)
//!                                            │ budget spent
//!                                            ▼
//!                                     awaiting review ──► completed
//! ```
//!
//! ## Modules
//! - `task`: task snapshots, stages and the task store
//! - `backend`: generator, validator, corrector and context augmenter
//! - `pipeline`: the per-task state machine and retry backoff
//! - `gateway`: request validation, status polling and reviewer feedback
//! - `llm`: chat-completion client used by the generator and corrector
//! - `api`: HTTP routes
//! - `config`: environment and file based configuration

pub mod api;
pub mod backend;
pub mod config;
pub mod gateway;
pub mod llm;
pub mod pipeline;
pub mod task;

pub use config::Config;
pub use gateway::TaskGateway;
