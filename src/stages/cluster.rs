//! Infrastructure-level stages: waiting for the shoot to come up, hibernate
//! or disappear, and triggering hibernation or deletion.

use super::{ConditionProbe, Stage, StageName, StageOutcome, StageResult, WaitForCondition};
use crate::clients::ShootClient;
use crate::logging::StageLogger;
use crate::models::{Cluster, Operation};
use crate::orchestration::error_classifier::{ClassifyResultExt, StageError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Shoot exists and reports ready
pub struct ClusterCreated {
    shoots: Arc<dyn ShootClient>,
}

impl ClusterCreated {
    pub fn new(shoots: Arc<dyn ShootClient>) -> Self {
        Self { shoots }
    }
}

#[async_trait]
impl ConditionProbe for ClusterCreated {
    fn describe(&self) -> &'static str {
        "cluster created"
    }

    async fn check(&self, cluster: &Cluster, _operation: &Operation) -> Result<bool, StageError> {
        match self.shoots.status(&cluster.name).await {
            Ok(status) => Ok(status.ready),
            // The shoot may not be visible yet right after the create request
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e).or_recoverable("while getting shoot status"),
        }
    }
}

/// Hibernation requested and reached
pub struct ClusterHibernated {
    shoots: Arc<dyn ShootClient>,
}

impl ClusterHibernated {
    pub fn new(shoots: Arc<dyn ShootClient>) -> Self {
        Self { shoots }
    }
}

#[async_trait]
impl ConditionProbe for ClusterHibernated {
    fn describe(&self) -> &'static str {
        "cluster hibernated"
    }

    async fn check(&self, cluster: &Cluster, _operation: &Operation) -> Result<bool, StageError> {
        let status = self
            .shoots
            .status(&cluster.name)
            .await
            .or_recoverable("while getting shoot status")?;
        Ok(status.hibernation_enabled && status.hibernated)
    }
}

/// Shoot no longer exists
pub struct ClusterDeleted {
    shoots: Arc<dyn ShootClient>,
}

impl ClusterDeleted {
    pub fn new(shoots: Arc<dyn ShootClient>) -> Self {
        Self { shoots }
    }
}

#[async_trait]
impl ConditionProbe for ClusterDeleted {
    fn describe(&self) -> &'static str {
        "cluster deleted"
    }

    async fn check(&self, cluster: &Cluster, _operation: &Operation) -> Result<bool, StageError> {
        match self.shoots.status(&cluster.name).await {
            Ok(_) => Ok(false),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e).or_recoverable("while getting shoot status"),
        }
    }
}

pub type WaitForHibernation = WaitForCondition<ClusterHibernated>;

impl WaitForHibernation {
    pub fn for_shoots(
        shoots: Arc<dyn ShootClient>,
        next_stage: StageName,
        poll_interval: Duration,
    ) -> Self {
        WaitForCondition::new(ClusterHibernated::new(shoots), next_stage, poll_interval)
    }
}

pub struct TriggerHibernation {
    shoots: Arc<dyn ShootClient>,
    next_stage: StageName,
}

impl TriggerHibernation {
    pub fn new(shoots: Arc<dyn ShootClient>, next_stage: StageName) -> Self {
        Self { shoots, next_stage }
    }
}

#[async_trait]
impl Stage for TriggerHibernation {
    async fn run(
        &self,
        cluster: &Cluster,
        _operation: &Operation,
        logger: &StageLogger,
    ) -> StageOutcome {
        self.shoots.hibernate(&cluster.name).await?;
        logger.info("hibernation requested");
        Ok(StageResult::advance(self.next_stage.clone()))
    }
}

pub struct TriggerClusterDeletion {
    shoots: Arc<dyn ShootClient>,
    next_stage: StageName,
}

impl TriggerClusterDeletion {
    pub fn new(shoots: Arc<dyn ShootClient>, next_stage: StageName) -> Self {
        Self { shoots, next_stage }
    }
}

#[async_trait]
impl Stage for TriggerClusterDeletion {
    async fn run(
        &self,
        cluster: &Cluster,
        _operation: &Operation,
        logger: &StageLogger,
    ) -> StageOutcome {
        match self.shoots.delete(&cluster.name).await {
            Ok(()) => logger.info("cluster deletion requested"),
            Err(e) if e.is_not_found() => logger.info("cluster already gone"),
            Err(e) => return Err(e.into()),
        }
        Ok(StageResult::advance(self.next_stage.clone()))
    }
}
