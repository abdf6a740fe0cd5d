//! Stage whose outcomes are scripted per invocation

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use provisioner_core::logging::StageLogger;
use provisioner_core::models::{Cluster, Operation};
use provisioner_core::orchestration::StageError;
use provisioner_core::stages::{Stage, StageName, StageOutcome, StageResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Scripted {
    /// Return `(next, delay)`
    Next(StageName, Duration),
    /// Return `(current stage, delay)`
    Poll(Duration),
    Recoverable(&'static str),
    RecoverableAfter(&'static str, Duration),
    NonRecoverable(&'static str),
    /// Plain `anyhow` error with no classification
    Unclassified(&'static str),
    /// Never finishes on its own
    Hang,
}

impl Scripted {
    pub fn finish() -> Self {
        Scripted::Next(StageName::finished(), Duration::ZERO)
    }

    pub fn next(stage: &str) -> Self {
        Scripted::Next(stage.into(), Duration::ZERO)
    }
}

/// Plays back a script; the fallback answers once the script runs out
pub struct ScriptedStage {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    work: Duration,
    invocations: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    seen_attempts: Mutex<Vec<u32>>,
}

impl ScriptedStage {
    pub fn new(script: Vec<Scripted>, fallback: Scripted) -> Arc<Self> {
        Arc::new(Self::build(script, fallback, Duration::ZERO))
    }

    pub fn always(outcome: Scripted) -> Arc<Self> {
        Self::new(Vec::new(), outcome)
    }

    /// Every invocation sleeps for `work` before answering
    pub fn slow(outcome: Scripted, work: Duration) -> Arc<Self> {
        Arc::new(Self::build(Vec::new(), outcome, work))
    }

    fn build(script: Vec<Scripted>, fallback: Scripted, work: Duration) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            work,
            invocations: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            seen_attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Highest number of invocations observed running at the same time
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// `operation.attempts` as seen by each invocation
    pub fn seen_attempts(&self) -> Vec<u32> {
        self.seen_attempts.lock().clone()
    }

    fn next_outcome(&self) -> Scripted {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    async fn run(
        &self,
        _cluster: &Cluster,
        operation: &Operation,
        _logger: &StageLogger,
    ) -> StageOutcome {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.seen_attempts.lock().push(operation.attempts);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }

        match self.next_outcome() {
            Scripted::Next(next, delay) => Ok(StageResult::new(next, delay)),
            Scripted::Poll(delay) => Ok(StageResult::poll(operation, delay)),
            Scripted::Recoverable(message) => Err(StageError::recoverable(anyhow!(message))),
            Scripted::RecoverableAfter(message, delay) => {
                Err(StageError::recoverable_after(anyhow!(message), delay))
            }
            Scripted::NonRecoverable(message) => {
                Err(StageError::non_recoverable(anyhow!(message)))
            }
            Scripted::Unclassified(message) => Err(anyhow!(message).into()),
            Scripted::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(StageResult::poll(operation, Duration::ZERO))
            }
        }
    }
}
