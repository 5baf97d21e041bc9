use crate::types::{AgentStatus, TaskStatus};
use crate::workflow::WorkflowStatus;
use cohort_core::{AgentId, MessageId, TaskId, WorkflowId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A state change published by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// A new agent joined the registry.
    AgentRegistered {
        /// The new agent.
        agent_id: AgentId,
        /// Its display name.
        name: String,
    },
    /// An agent moved between statuses.
    AgentStatusChanged {
        /// The agent.
        agent_id: AgentId,
        /// Previous status.
        from: AgentStatus,
        /// New status.
        to: AgentStatus,
    },
    /// An agent left the registry.
    AgentDeregistered {
        /// The removed agent.
        agent_id: AgentId,
    },
    /// A task entered the pending queue.
    TaskSubmitted {
        /// The new task.
        task_id: TaskId,
        /// Owning workflow, if the task is a step.
        workflow_id: Option<WorkflowId>,
    },
    /// A task was assigned to an agent.
    TaskDelegated {
        /// The task.
        task_id: TaskId,
        /// Its assignee.
        agent_id: AgentId,
    },
    /// A task changed lifecycle status.
    TaskStatusChanged {
        /// The task.
        task_id: TaskId,
        /// New status.
        status: TaskStatus,
        /// Assignee at the time of the change.
        agent_id: Option<AgentId>,
    },
    /// A running task reported progress.
    TaskProgress {
        /// The task.
        task_id: TaskId,
        /// Percentage, clamped to 100.
        progress: u8,
    },
    /// A workflow changed status.
    WorkflowStatusChanged {
        /// The workflow.
        workflow_id: WorkflowId,
        /// New status.
        status: WorkflowStatus,
    },
    /// A message was appended to the bus.
    MessageSent {
        /// The message.
        message_id: MessageId,
        /// Sender.
        from_agent_id: AgentId,
        /// Recipient.
        to_agent_id: AgentId,
    },
}

/// Fan-out of [`OrchestratorEvent`]s to any number of subscribers.
///
/// Slow subscribers lag and lose the oldest events; polling queries remain
/// the source of truth.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Events with no subscriber are dropped.
    pub fn publish(&self, event: OrchestratorEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live receivers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
