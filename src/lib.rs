#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Provisioner Core
//!
//! Resumable stage execution engine for long-running cluster lifecycle
//! operations: provisioning, deprovisioning, upgrade and hibernation.
//!
//! ## Overview
//!
//! Each lifecycle operation is a sequence of independently retryable
//! **stages**. The engine advances an operation one stage at a time, bounds
//! every invocation with a timeout, classifies failures as recoverable or
//! terminal, and reschedules work with delays instead of holding a worker for
//! the lifetime of a multi-hour operation. Every transition is persisted with
//! compare-and-swap, so a crash at any point resumes by re-running the same
//! (idempotent) stage.
//!
//! ## Module Organization
//!
//! - [`stages`] - The `Stage` contract and reference stages
//! - [`registry`] - Per-kind stage catalog, validated at startup
//! - [`orchestration`] - Error classification, backoff, executor and scheduler loop
//! - [`state_machine`] - Pure operation transitions
//! - [`store`] - Durable operation store (in-memory and PostgreSQL)
//! - [`lifecycle`] - Built-in stage graphs per operation kind
//! - [`service`] - Lifecycle requests, status and stuck-operation queries
//! - [`clients`] - Interfaces to the cluster API, kubeconfig source, shoot API and deployer
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use provisioner_core::config::ConfigManager;
//! use provisioner_core::lifecycle::{default_registry, Collaborators};
//! use provisioner_core::orchestration::{SchedulerLoop, StageExecutor};
//! use provisioner_core::store::InMemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example(collaborators: Collaborators) -> Result<(), Box<dyn std::error::Error>> {
//! provisioner_core::logging::init_structured_logging();
//! let config = ConfigManager::load()?;
//!
//! let registry = Arc::new(default_registry(&collaborators, &config.config().stages)?);
//! let store = Arc::new(InMemoryStore::new());
//! let executor = Arc::new(StageExecutor::from_config(registry, store, config.config()));
//!
//! let scheduler = Arc::new(SchedulerLoop::new(executor, config.config().scheduler.clone()));
//! scheduler.start()?;
//! // ...
//! scheduler.stop(config.config().scheduler.shutdown_timeout()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                                  # Unit and in-memory integration tests
//! cargo test --features database-tests        # PostgreSQL store tests (needs DATABASE_URL)
//! ```

pub mod clients;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod service;
pub mod stages;
pub mod state_machine;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigManager, EngineConfig};
pub use error::{ProvisionerError, Result};
pub use models::{Cluster, Operation, OperationKind, OperationStatus};
pub use orchestration::{
    ErrorCategory, SchedulerLoop, StageError, StageExecutor, TickReport,
};
pub use registry::{StageDefinition, StageRegistry, StageSpec};
pub use service::OperationService;
pub use stages::{Stage, StageName, StageResult};
pub use store::{InMemoryStore, OperationStore};
