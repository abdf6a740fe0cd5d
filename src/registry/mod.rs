//! # Stage Registry
//!
//! Per-operation-kind catalog mapping a stage name to its implementation,
//! its invocation timeout and the next stages it declares.
//!
//! ## Overview
//!
//! The registry is built once during startup from declarative, ordered stage
//! lists and is read-only afterwards. It is a plain value passed to the
//! executor; nothing looks it up through globals.
//!
//! `build()` validates the graphs structurally and fails fast:
//!
//! - every kind has at least one stage, and the first declared stage is the
//!   kind's initial stage
//! - stage names are unique within a kind
//! - the terminal marker (`Finished`) is not registered as a stage
//! - every declared next stage is registered or is the terminal marker
//! - every timeout is non-zero
//!
//! ## Usage
//!
//! ```rust
//! use provisioner_core::models::{Cluster, Operation, OperationKind};
//! use provisioner_core::logging::StageLogger;
//! use provisioner_core::registry::{StageRegistry, StageSpec};
//! use provisioner_core::stages::{Stage, StageName, StageOutcome, StageResult};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Done;
//!
//! #[async_trait::async_trait]
//! impl Stage for Done {
//!     async fn run(&self, _: &Cluster, _: &Operation, _: &StageLogger) -> StageOutcome {
//!         Ok(StageResult::advance(StageName::finished()))
//!     }
//! }
//!
//! let registry = StageRegistry::builder()
//!     .with_default_timeout(Duration::from_secs(60))
//!     .register(
//!         OperationKind::Hibernate,
//!         StageSpec::new("TriggerHibernation", Arc::new(Done)).then(StageName::finished()),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let definition = registry
//!     .lookup(OperationKind::Hibernate, &"TriggerHibernation".into())
//!     .unwrap();
//! assert_eq!(definition.timeout, Duration::from_secs(60));
//! ```

use crate::models::OperationKind;
use crate::stages::{Stage, StageName};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("No stages registered for operation kind {0}")]
    MissingKind(OperationKind),

    #[error("Stage {stage} not found for operation kind {kind}")]
    StageNotFound {
        kind: OperationKind,
        stage: StageName,
    },

    #[error("Stage {stage} registered twice for operation kind {kind}")]
    DuplicateStage {
        kind: OperationKind,
        stage: StageName,
    },

    #[error("Stage {from} of {kind} declares unknown next stage {to}")]
    UnknownNextStage {
        kind: OperationKind,
        from: StageName,
        to: StageName,
    },

    #[error("Stage {stage} of {kind} has a zero timeout")]
    ZeroTimeout {
        kind: OperationKind,
        stage: StageName,
    },

    #[error("Terminal marker {0} cannot be registered as a stage")]
    ReservedName(StageName),
}

/// Declarative registration entry
pub struct StageSpec {
    name: StageName,
    stage: Arc<dyn Stage>,
    timeout: Option<Duration>,
    time_limit: Option<Duration>,
    retry_delay: Option<Duration>,
    next_stages: Vec<StageName>,
}

impl StageSpec {
    pub fn new(name: impl Into<StageName>, stage: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            stage,
            timeout: None,
            time_limit: None,
            retry_delay: None,
            next_stages: Vec::new(),
        }
    }

    /// Bound on a single invocation; the builder default applies otherwise
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Maximum total time an operation may spend on this stage
    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = Some(time_limit);
        self
    }

    /// Delay before retrying after a recoverable failure that carries no
    /// hint of its own; the retry policy applies otherwise
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    /// Declare a stage this one may hand over to
    pub fn then(mut self, next: impl Into<StageName>) -> Self {
        self.next_stages.push(next.into());
        self
    }
}

/// Resolved registry entry
#[derive(Clone)]
pub struct StageDefinition {
    pub name: StageName,
    pub stage: Arc<dyn Stage>,
    pub timeout: Duration,
    pub time_limit: Option<Duration>,
    pub retry_delay: Option<Duration>,
    pub next_stages: Vec<StageName>,
}

impl fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDefinition")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("time_limit", &self.time_limit)
            .field("retry_delay", &self.retry_delay)
            .field("next_stages", &self.next_stages)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct KindGraph {
    order: Vec<StageName>,
    stages: HashMap<StageName, StageDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub operation_kinds: usize,
    pub total_stages: usize,
}

/// Read-only stage catalog
#[derive(Debug)]
pub struct StageRegistry {
    graphs: HashMap<OperationKind, KindGraph>,
}

impl StageRegistry {
    pub fn builder() -> StageRegistryBuilder {
        StageRegistryBuilder::default()
    }

    pub fn lookup(
        &self,
        kind: OperationKind,
        stage: &StageName,
    ) -> Result<&StageDefinition, RegistryError> {
        self.graph(kind)?
            .stages
            .get(stage)
            .ok_or_else(|| RegistryError::StageNotFound {
                kind,
                stage: stage.clone(),
            })
    }

    pub fn first_stage(&self, kind: OperationKind) -> Result<&StageName, RegistryError> {
        self.graph(kind)?
            .order
            .first()
            .ok_or(RegistryError::MissingKind(kind))
    }

    pub fn stage_names(&self, kind: OperationKind) -> Vec<&StageName> {
        self.graphs
            .get(&kind)
            .map(|graph| graph.order.iter().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            operation_kinds: self.graphs.len(),
            total_stages: self.graphs.values().map(|graph| graph.stages.len()).sum(),
        }
    }

    fn graph(&self, kind: OperationKind) -> Result<&KindGraph, RegistryError> {
        self.graphs
            .get(&kind)
            .ok_or(RegistryError::MissingKind(kind))
    }
}

pub struct StageRegistryBuilder {
    default_timeout: Duration,
    default_time_limit: Option<Duration>,
    specs: Vec<(OperationKind, StageSpec)>,
}

impl Default for StageRegistryBuilder {
    fn default() -> Self {
        let stages = crate::config::StagesConfig::default();
        Self {
            default_timeout: stages.default_timeout(),
            default_time_limit: stages.default_time_limit(),
            specs: Vec::new(),
        }
    }
}

impl StageRegistryBuilder {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_default_time_limit(mut self, time_limit: Option<Duration>) -> Self {
        self.default_time_limit = time_limit;
        self
    }

    /// Append a stage to `kind`'s ordered list; the first one registered is
    /// the kind's initial stage
    pub fn register(mut self, kind: OperationKind, spec: StageSpec) -> Self {
        self.specs.push((kind, spec));
        self
    }

    pub fn register_all(
        mut self,
        kind: OperationKind,
        specs: impl IntoIterator<Item = StageSpec>,
    ) -> Self {
        self.specs
            .extend(specs.into_iter().map(|spec| (kind, spec)));
        self
    }

    pub fn build(self) -> Result<StageRegistry, RegistryError> {
        let mut graphs: HashMap<OperationKind, KindGraph> = HashMap::new();

        for (kind, spec) in self.specs {
            if spec.name.is_finished() {
                return Err(RegistryError::ReservedName(spec.name));
            }

            let timeout = spec.timeout.unwrap_or(self.default_timeout);
            if timeout.is_zero() {
                return Err(RegistryError::ZeroTimeout {
                    kind,
                    stage: spec.name,
                });
            }

            let graph = graphs.entry(kind).or_default();
            if graph.stages.contains_key(&spec.name) {
                return Err(RegistryError::DuplicateStage {
                    kind,
                    stage: spec.name,
                });
            }

            graph.order.push(spec.name.clone());
            graph.stages.insert(
                spec.name.clone(),
                StageDefinition {
                    name: spec.name,
                    stage: spec.stage,
                    timeout,
                    time_limit: spec.time_limit.or(self.default_time_limit),
                    retry_delay: spec.retry_delay,
                    next_stages: spec.next_stages,
                },
            );
        }

        for (kind, graph) in &graphs {
            for name in &graph.order {
                let definition = &graph.stages[name];
                for next in &definition.next_stages {
                    if !next.is_finished() && !graph.stages.contains_key(next) {
                        return Err(RegistryError::UnknownNextStage {
                            kind: *kind,
                            from: name.clone(),
                            to: next.clone(),
                        });
                    }
                }
            }
            debug!(kind = %kind, stages = graph.order.len(), "Validated stage graph");
        }

        let registry = StageRegistry { graphs };
        let stats = registry.stats();
        info!(
            operation_kinds = stats.operation_kinds,
            total_stages = stats.total_stages,
            "Stage registry built"
        );
        Ok(registry)
    }
}
