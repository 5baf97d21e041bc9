use crate::engine::Orchestrator;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Background dispatch loop.
///
/// Ticks on a fixed interval and additionally whenever the orchestrator
/// signals new pending work or freed capacity, so dispatch latency after a
/// submission or completion is bounded by the time of one tick rather than
/// the interval. The interval is the fallback for anything not signalled.
pub struct TickLoop {
    orchestrator: Orchestrator,
    interval: Duration,
}

impl TickLoop {
    /// Use the orchestrator's configured tick interval.
    pub fn new(orchestrator: Orchestrator) -> Self {
        let interval = orchestrator.config().tick_interval();
        Self {
            orchestrator,
            interval,
        }
    }

    /// Override the tick interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the loop. Abort the returned handle to stop it.
    pub fn start(self) -> JoinHandle<()> {
        let signal = self.orchestrator.dispatch_signal();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_ms = self.interval.as_millis() as u64,
                "Dispatch loop started"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = signal.notified() => {}
                }
                self.orchestrator.tick().await;
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::executor::{AgentExecutor, Delegation, ExecutionOutcome};
    use crate::types::{AgentRole, AgentSpec, TaskSpec, TaskStatus};
    use cohort_core::TaskId;
    use std::sync::Arc;

    async fn wait_for(orch: &Orchestrator, id: TaskId, status: TaskStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if orch.get_task(id).await.unwrap().status == status {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task did not reach expected status");
    }

    #[tokio::test]
    async fn test_submission_wakes_loop() {
        let orch = Orchestrator::new(OrchestratorConfig::default()).unwrap();
        let handle = TickLoop::new(orch.clone())
            .with_interval(Duration::from_secs(3600))
            .start();

        orch.register_agent(AgentSpec::new("a", AgentRole::Worker))
            .await
            .unwrap();
        let task = orch.submit_task(TaskSpec::new("t")).await.unwrap();
        wait_for(&orch, task.id, TaskStatus::Running).await;
        handle.abort();
    }

    struct Echo;

    #[async_trait::async_trait]
    impl AgentExecutor for Echo {
        async fn execute(&self, delegation: Delegation) -> ExecutionOutcome {
            ExecutionOutcome::Completed(serde_json::json!({ "echo": delegation.title }))
        }
    }

    #[tokio::test]
    async fn test_executor_completes_through_loop() {
        let orch = Orchestrator::new(OrchestratorConfig::default()).unwrap();
        let handle = TickLoop::new(orch.clone())
            .with_interval(Duration::from_millis(50))
            .start();

        let agent = orch
            .register_agent(AgentSpec::new("a", AgentRole::Worker))
            .await
            .unwrap();
        orch.attach_executor(agent.id, Arc::new(Echo))
            .await
            .unwrap();
        let task = orch.submit_task(TaskSpec::new("hello")).await.unwrap();

        wait_for(&orch, task.id, TaskStatus::Completed).await;
        let task = orch.get_task(task.id).await.unwrap();
        assert_eq!(task.result, Some(serde_json::json!({ "echo": "hello" })));
        handle.abort();
    }
}
