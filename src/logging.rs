//! # Structured Logging Module
//!
//! Environment-aware console logging built on `tracing`. Output goes to
//! stdout; set `PROVISIONER_LOG_FORMAT=json` for machine-readable lines and
//! `RUST_LOG` to override the environment's default level.

use crate::models::{OperationKind, OperationStatus};
use crate::stages::StageName;
use std::io::IsTerminal;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_log_level(&environment)));
        let json = std::env::var("PROVISIONER_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let layer = if json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(std::io::stdout().is_terminal())
                .boxed()
        };

        // A subscriber may already be installed by an embedding process
        if tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            environment = %environment,
            json = json,
            "Structured logging initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("PROVISIONER_ENV").unwrap_or_else(|_| "development".to_string())
}

fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "warn",
        _ => "debug",
    }
}

/// Log one executor decision for an operation
pub fn log_operation_transition(
    operation_id: Uuid,
    kind: OperationKind,
    from_stage: &StageName,
    to_stage: &StageName,
    status: OperationStatus,
    delay: Option<Duration>,
) {
    tracing::info!(
        operation_id = %operation_id,
        kind = %kind,
        from_stage = %from_stage,
        to_stage = %to_stage,
        status = %status,
        delay_ms = delay.map(|d| d.as_millis() as u64),
        "OPERATION_TRANSITION"
    );
}

/// Logger handed to every stage invocation.
///
/// Each event carries the operation, cluster and stage identity so stage
/// authors only supply the message and any extra detail.
#[derive(Debug, Clone)]
pub struct StageLogger {
    operation_id: Uuid,
    cluster_id: String,
    stage: StageName,
}

impl StageLogger {
    pub fn new(operation_id: Uuid, cluster_id: impl Into<String>, stage: StageName) -> Self {
        Self {
            operation_id,
            cluster_id: cluster_id.into(),
            stage,
        }
    }

    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    pub fn stage(&self) -> &StageName {
        &self.stage
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(
            operation_id = %self.operation_id,
            cluster_id = %self.cluster_id,
            stage = %self.stage,
            "{message}"
        );
    }

    pub fn info(&self, message: &str) {
        tracing::info!(
            operation_id = %self.operation_id,
            cluster_id = %self.cluster_id,
            stage = %self.stage,
            "{message}"
        );
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(
            operation_id = %self.operation_id,
            cluster_id = %self.cluster_id,
            stage = %self.stage,
            "{message}"
        );
    }

    pub fn error(&self, message: &str) {
        tracing::error!(
            operation_id = %self.operation_id,
            cluster_id = %self.cluster_id,
            stage = %self.stage,
            "{message}"
        );
    }
}
