use crate::types::{Priority, Task};
use async_trait::async_trait;
use cohort_core::{AgentId, TaskId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What an agent receives when a task is delegated to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    /// The delegated task.
    pub task_id: TaskId,
    /// The agent it was assigned to.
    pub agent_id: AgentId,
    /// Task title.
    pub title: String,
    /// Task description.
    pub description: String,
    /// Capabilities the task asked for.
    pub required_capabilities: BTreeSet<String>,
    /// Task priority.
    pub priority: Priority,
    /// Outputs of the workflow steps this task depends on.
    pub inputs: BTreeMap<String, serde_json::Value>,
    /// Owning workflow, if the task is a step.
    pub workflow_id: Option<WorkflowId>,
}

impl Delegation {
    /// Build the delegation for `task` assigned to `agent_id`.
    pub fn for_task(task: &Task, agent_id: AgentId) -> Self {
        Self {
            task_id: task.id,
            agent_id,
            title: task.title.clone(),
            description: task.description.clone(),
            required_capabilities: task.required_capabilities.clone(),
            priority: task.priority,
            inputs: task.inputs.clone(),
            workflow_id: task.workflow_id,
        }
    }
}

/// How an executor finished a delegation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Reported back as a completion with this result.
    Completed(serde_json::Value),
    /// Reported back as a failure. `fatal` puts the agent into `error`.
    Failed {
        /// Failure reason.
        error: String,
        /// Whether the agent should be marked as errored.
        fatal: bool,
    },
    /// The executor reports on its own through the command interface.
    Detached,
}

/// Runs delegated tasks on behalf of one agent.
///
/// The orchestrator spawns `execute` when a task is delegated and never
/// awaits it inline; the outcome is fed back through complete/fail.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run one delegation to completion.
    async fn execute(&self, delegation: Delegation) -> ExecutionOutcome;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::TaskTemplate;
    use std::sync::Arc;

    struct Upper;

    #[async_trait]
    impl AgentExecutor for Upper {
        async fn execute(&self, delegation: Delegation) -> ExecutionOutcome {
            ExecutionOutcome::Completed(serde_json::json!(delegation.title.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn test_executor_behind_trait_object() {
        let task = Task::from_template(&TaskTemplate {
            title: "build".into(),
            description: String::new(),
            required_capabilities: BTreeSet::new(),
            priority: Priority::High,
            min_agent_priority: Priority::Low,
        });
        let agent_id = AgentId::new();
        let delegation = Delegation::for_task(&task, agent_id);
        assert_eq!(delegation.task_id, task.id);
        assert_eq!(delegation.priority, Priority::High);

        let executor: Arc<dyn AgentExecutor> = Arc::new(Upper);
        assert_eq!(
            executor.execute(delegation).await,
            ExecutionOutcome::Completed(serde_json::json!("BUILD"))
        );
    }
}
