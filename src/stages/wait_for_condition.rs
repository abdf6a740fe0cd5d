use super::{Stage, StageName, StageOutcome, StageResult};
use crate::logging::StageLogger;
use crate::models::{Cluster, Operation};
use crate::orchestration::error_classifier::StageError;
use async_trait::async_trait;
use std::time::Duration;

/// A yes/no question about external state, asked on every poll
#[async_trait]
pub trait ConditionProbe: Send + Sync {
    /// Human-readable condition for logs, e.g. "cluster hibernated"
    fn describe(&self) -> &'static str;

    /// A failed check is reported as a classified error; probes normally tag
    /// it recoverable so the stage is retried.
    async fn check(&self, cluster: &Cluster, operation: &Operation) -> Result<bool, StageError>;
}

/// Generic polling stage.
///
/// Condition unmet: `(current stage, poll_interval)`. Condition met:
/// `(next_stage, 0)`. Probe failure: the probe's error, retried by the
/// executor on its own retry delay rather than the poll interval.
pub struct WaitForCondition<P> {
    probe: P,
    next_stage: StageName,
    poll_interval: Duration,
}

impl<P: ConditionProbe> WaitForCondition<P> {
    pub fn new(probe: P, next_stage: StageName, poll_interval: Duration) -> Self {
        Self {
            probe,
            next_stage,
            poll_interval,
        }
    }
}

#[async_trait]
impl<P: ConditionProbe> Stage for WaitForCondition<P> {
    async fn run(
        &self,
        cluster: &Cluster,
        operation: &Operation,
        logger: &StageLogger,
    ) -> StageOutcome {
        if self.probe.check(cluster, operation).await? {
            logger.info(&format!("{} condition met", self.probe.describe()));
            return Ok(StageResult::advance(self.next_stage.clone()));
        }

        logger.debug(&format!(
            "{} condition not met, checking again in {:?}",
            self.probe.describe(),
            self.poll_interval
        ));
        Ok(StageResult::poll(operation, self.poll_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewOperation, OperationKind};
    use anyhow::anyhow;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU8, Ordering};

    /// 0 = unmet, 1 = met, 2 = probe failure
    struct ScriptedProbe(AtomicU8);

    #[async_trait]
    impl ConditionProbe for ScriptedProbe {
        fn describe(&self) -> &'static str {
            "scripted"
        }

        async fn check(&self, _: &Cluster, _: &Operation) -> Result<bool, StageError> {
            match self.0.load(Ordering::SeqCst) {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(StageError::recoverable(anyhow!("probe unavailable"))),
            }
        }
    }

    fn fixture(state: u8) -> (WaitForCondition<ScriptedProbe>, Cluster, Operation, StageLogger) {
        let stage = WaitForCondition::new(
            ScriptedProbe(AtomicU8::new(state)),
            "Next".into(),
            Duration::from_secs(30),
        );
        let cluster = Cluster::new("c1", "shoot");
        let operation = NewOperation::new("c1", OperationKind::Hibernate, "Waiting".into())
            .into_operation(Utc::now());
        let logger = StageLogger::new(operation.id, "c1", operation.stage.clone());
        (stage, cluster, operation, logger)
    }

    #[tokio::test]
    async fn test_unmet_condition_polls_same_stage() {
        let (stage, cluster, operation, logger) = fixture(0);
        let result = stage.run(&cluster, &operation, &logger).await.unwrap();
        assert_eq!(result.next, operation.stage);
        assert_eq!(result.delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_met_condition_advances_immediately() {
        let (stage, cluster, operation, logger) = fixture(1);
        let result = stage.run(&cluster, &operation, &logger).await.unwrap();
        assert_eq!(result, StageResult::advance("Next".into()));
    }

    #[tokio::test]
    async fn test_probe_failure_is_returned() {
        let (stage, cluster, operation, logger) = fixture(2);
        let error = stage.run(&cluster, &operation, &logger).await.unwrap_err();
        assert!(error.is_recoverable());
    }

    #[tokio::test]
    async fn test_repeated_invocation_is_idempotent() {
        let (stage, cluster, operation, logger) = fixture(0);
        let first = stage.run(&cluster, &operation, &logger).await.unwrap();
        let second = stage.run(&cluster, &operation, &logger).await.unwrap();
        assert_eq!(first, second);
    }
}
