//! Command/query surface of the orchestrator.
//!
//! Both enums are internally tagged so a transport can carry them as plain
//! JSON objects: `{"command": "submit_task", "task": {"title": "..."}}` or
//! `{"query": "get_agent", "agent_id": "..."}`.

use crate::bus::Message;
use crate::classifier::Classification;
use crate::engine::{Orchestrator, TickReport};
use crate::monitor::{PerformanceSample, PerformanceSnapshot, ResourceMetrics};
use crate::types::{Agent, AgentFilter, AgentSpec, Task, TaskFilter, TaskSpec};
use crate::workflow::{Workflow, WorkflowSpec};
use cohort_core::{AgentId, CohortError, CohortResult, TaskId, WorkflowId};
use serde::{Deserialize, Serialize};

/// State-changing requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Add an agent to the registry.
    RegisterAgent {
        /// Registration request.
        agent: AgentSpec,
    },
    /// Bring an offline agent online as idle.
    StartAgent {
        /// Target agent.
        agent_id: AgentId,
    },
    /// Take an agent offline, re-queuing its tasks.
    StopAgent {
        /// Target agent.
        agent_id: AgentId,
    },
    /// Remove an agent, re-queuing its tasks.
    DeregisterAgent {
        /// Target agent.
        agent_id: AgentId,
    },
    /// Clear an agent's error status.
    ResetAgent {
        /// Target agent.
        agent_id: AgentId,
    },
    /// Pause an active agent until it is resumed.
    MarkAgentWaiting {
        /// Target agent.
        agent_id: AgentId,
    },
    /// Return a waiting agent to active.
    ResumeAgent {
        /// Target agent.
        agent_id: AgentId,
    },
    /// Queue a standalone task.
    SubmitTask {
        /// Task request.
        task: TaskSpec,
    },
    /// Confirm receipt of a delegated task.
    AcknowledgeTask {
        /// Delegated task.
        task_id: TaskId,
        /// Its assignee.
        agent_id: AgentId,
    },
    /// Report progress on a running task.
    ReportProgress {
        /// Running task.
        task_id: TaskId,
        /// Its assignee.
        agent_id: AgentId,
        /// Percentage, clamped to 100.
        progress: u8,
    },
    /// Finish a task successfully.
    CompleteTask {
        /// Running task.
        task_id: TaskId,
        /// Its assignee.
        agent_id: AgentId,
        /// Output handed to dependent steps.
        #[serde(default)]
        result: serde_json::Value,
    },
    /// Finish a task with an error.
    FailTask {
        /// Running task.
        task_id: TaskId,
        /// Its assignee.
        agent_id: AgentId,
        /// Failure reason.
        error: String,
        /// Whether the agent should be marked as errored.
        #[serde(default)]
        fatal: bool,
    },
    /// Cancel a non-terminal task.
    CancelTask {
        /// Target task.
        task_id: TaskId,
    },
    /// Validate and start a workflow.
    CreateWorkflow {
        /// Workflow definition.
        workflow: WorkflowSpec,
    },
    /// Cancel a workflow and its unfinished steps.
    CancelWorkflow {
        /// Target workflow.
        workflow_id: WorkflowId,
    },
    /// Append a message to the recipient's mailbox.
    SendMessage {
        /// Sender.
        from_agent_id: AgentId,
        /// Recipient.
        to_agent_id: AgentId,
        /// Opaque JSON body.
        payload: serde_json::Value,
    },
    /// Advance an agent's committed mailbox offset.
    CommitMessages {
        /// Mailbox owner.
        agent_id: AgentId,
        /// New offset.
        offset: usize,
    },
    /// Record a resource sample for an agent.
    SamplePerformance {
        /// Sampled agent.
        agent_id: AgentId,
        /// Measured resources.
        metrics: ResourceMetrics,
    },
    /// Run one dispatch cycle now.
    Tick,
}

impl Command {
    /// Parse a JSON command. Malformed input is a validation error.
    pub fn from_json(input: &str) -> CohortResult<Self> {
        serde_json::from_str(input)
            .map_err(|e| CohortError::Validation(format!("malformed command: {e}")))
    }
}

/// Successful result of a [`Command`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutput {
    /// The affected agent after the change.
    Agent(Agent),
    /// The affected task after the change.
    Task(Task),
    /// The affected workflow after the change.
    Workflow(Workflow),
    /// The sent message.
    Message(Message),
    /// New committed mailbox offset.
    Offset(usize),
    /// The recorded sample.
    Sample(PerformanceSample),
    /// What the dispatch cycle did.
    Tick(TickReport),
}

/// Read-only requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum Query {
    /// One agent by id.
    GetAgent {
        /// Target agent.
        agent_id: AgentId,
    },
    /// Agents matching a filter.
    ListAgents {
        /// Empty matches everything.
        #[serde(default)]
        filter: AgentFilter,
    },
    /// One task by id.
    GetTask {
        /// Target task.
        task_id: TaskId,
    },
    /// Tasks matching a filter.
    ListTasks {
        /// Empty matches everything.
        #[serde(default)]
        filter: TaskFilter,
    },
    /// One workflow by id.
    GetWorkflow {
        /// Target workflow.
        workflow_id: WorkflowId,
    },
    /// Every workflow.
    ListWorkflows,
    /// Messages from `since`, or from the committed offset when absent.
    ReceiveMessages {
        /// Mailbox owner.
        agent_id: AgentId,
        /// Starting offset.
        #[serde(default)]
        since: Option<usize>,
    },
    /// Aggregate performance view.
    GetPerformanceSnapshot,
    /// Run the classifier over free text.
    Classify {
        /// Task title.
        title: String,
        /// Task description.
        #[serde(default)]
        description: String,
    },
}

impl Query {
    /// Parse a JSON query. Malformed input is a validation error.
    pub fn from_json(input: &str) -> CohortResult<Self> {
        serde_json::from_str(input)
            .map_err(|e| CohortError::Validation(format!("malformed query: {e}")))
    }
}

/// Successful result of a [`Query`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutput {
    /// A single agent.
    Agent(Agent),
    /// Matching agents.
    Agents(Vec<Agent>),
    /// A single task.
    Task(Task),
    /// Matching tasks.
    Tasks(Vec<Task>),
    /// A single workflow.
    Workflow(Workflow),
    /// All workflows.
    Workflows(Vec<Workflow>),
    /// A page of mailbox messages.
    Messages {
        /// Messages in send order.
        messages: Vec<Message>,
        /// Pass back as `since` to continue reading.
        next_offset: usize,
    },
    /// Aggregate performance view.
    Performance(PerformanceSnapshot),
    /// Classifier verdict.
    Classification(Classification),
}

impl Orchestrator {
    /// Apply a state-changing [`Command`].
    pub async fn execute(&self, command: Command) -> CohortResult<CommandOutput> {
        Ok(match command {
            Command::RegisterAgent { agent } => {
                CommandOutput::Agent(self.register_agent(agent).await?)
            }
            Command::StartAgent { agent_id } => {
                CommandOutput::Agent(self.start_agent(agent_id).await?)
            }
            Command::StopAgent { agent_id } => {
                CommandOutput::Agent(self.stop_agent(agent_id).await?)
            }
            Command::DeregisterAgent { agent_id } => {
                CommandOutput::Agent(self.deregister_agent(agent_id).await?)
            }
            Command::ResetAgent { agent_id } => {
                CommandOutput::Agent(self.reset_agent(agent_id).await?)
            }
            Command::MarkAgentWaiting { agent_id } => {
                CommandOutput::Agent(self.mark_agent_waiting(agent_id).await?)
            }
            Command::ResumeAgent { agent_id } => {
                CommandOutput::Agent(self.resume_agent(agent_id).await?)
            }
            Command::SubmitTask { task } => CommandOutput::Task(self.submit_task(task).await?),
            Command::AcknowledgeTask { task_id, agent_id } => {
                CommandOutput::Task(self.acknowledge_task(task_id, agent_id).await?)
            }
            Command::ReportProgress {
                task_id,
                agent_id,
                progress,
            } => CommandOutput::Task(self.report_progress(task_id, agent_id, progress).await?),
            Command::CompleteTask {
                task_id,
                agent_id,
                result,
            } => CommandOutput::Task(self.complete_task(task_id, agent_id, result).await?),
            Command::FailTask {
                task_id,
                agent_id,
                error,
                fatal,
            } => CommandOutput::Task(self.fail_task(task_id, agent_id, error, fatal).await?),
            Command::CancelTask { task_id } => {
                CommandOutput::Task(self.cancel_task(task_id).await?)
            }
            Command::CreateWorkflow { workflow } => {
                CommandOutput::Workflow(self.create_workflow(workflow).await?)
            }
            Command::CancelWorkflow { workflow_id } => {
                CommandOutput::Workflow(self.cancel_workflow(workflow_id).await?)
            }
            Command::SendMessage {
                from_agent_id,
                to_agent_id,
                payload,
            } => CommandOutput::Message(self.send_message(from_agent_id, to_agent_id, payload)?),
            Command::CommitMessages { agent_id, offset } => {
                CommandOutput::Offset(self.commit_messages(agent_id, offset)?)
            }
            Command::SamplePerformance { agent_id, metrics } => {
                CommandOutput::Sample(self.sample_performance(agent_id, metrics)?)
            }
            Command::Tick => CommandOutput::Tick(self.tick().await),
        })
    }

    /// Answer a read-only [`Query`].
    pub async fn query(&self, query: Query) -> CohortResult<QueryOutput> {
        Ok(match query {
            Query::GetAgent { agent_id } => QueryOutput::Agent(self.get_agent(agent_id).await?),
            Query::ListAgents { filter } => QueryOutput::Agents(self.list_agents(&filter).await),
            Query::GetTask { task_id } => QueryOutput::Task(self.get_task(task_id).await?),
            Query::ListTasks { filter } => QueryOutput::Tasks(self.list_tasks(&filter).await),
            Query::GetWorkflow { workflow_id } => {
                QueryOutput::Workflow(self.get_workflow(workflow_id).await?)
            }
            Query::ListWorkflows => QueryOutput::Workflows(self.list_workflows().await),
            Query::ReceiveMessages { agent_id, since } => {
                let mut iter = self.receive_messages(agent_id, since)?;
                let messages: Vec<Message> = iter.by_ref().map(|m| Message::clone(&m)).collect();
                QueryOutput::Messages {
                    messages,
                    next_offset: iter.offset(),
                }
            }
            Query::GetPerformanceSnapshot => {
                QueryOutput::Performance(self.performance_snapshot().await)
            }
            Query::Classify { title, description } => {
                QueryOutput::Classification(self.classify(&title, &description))
            }
        })
    }

    /// Handle one JSON request, either a command or a query, and return a
    /// JSON response: `{"ok": ...}` on success, `{"error": {kind, message}}`
    /// otherwise.
    pub async fn handle_json(&self, input: &str) -> serde_json::Value {
        let result = match serde_json::from_str::<serde_json::Value>(input) {
            Err(e) => Err(CohortError::Validation(format!("malformed request: {e}"))),
            Ok(value) if value.get("command").is_some() => {
                match serde_json::from_value::<Command>(value) {
                    Ok(command) => self
                        .execute(command)
                        .await
                        .and_then(|out| serde_json::to_value(out).map_err(CohortError::from)),
                    Err(e) => Err(CohortError::Validation(format!("malformed command: {e}"))),
                }
            }
            Ok(value) if value.get("query").is_some() => {
                match serde_json::from_value::<Query>(value) {
                    Ok(query) => self
                        .query(query)
                        .await
                        .and_then(|out| serde_json::to_value(out).map_err(CohortError::from)),
                    Err(e) => Err(CohortError::Validation(format!("malformed query: {e}"))),
                }
            }
            Ok(_) => Err(CohortError::Validation(
                "request needs a \"command\" or \"query\" field".into(),
            )),
        };
        match result {
            Ok(value) => serde_json::json!({ "ok": value }),
            Err(e) => serde_json::json!({ "error": e.to_body() }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::types::TaskStatus;
    use serde_json::json;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(OrchestratorConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_command() {
        let cmd = Command::from_json(
            r#"{"command": "submit_task", "task": {"title": "t", "required_capabilities": ["x"]}}"#,
        )
        .unwrap();
        match cmd {
            Command::SubmitTask { task } => assert_eq!(task.required_capabilities, vec!["x"]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            Command::from_json(r#"{"command": "tick"}"#).unwrap(),
            Command::Tick
        ));
    }

    #[test]
    fn test_malformed_is_validation() {
        let err = Command::from_json(r#"{"command": "launch_rocket"}"#).unwrap_err();
        assert!(matches!(err, CohortError::Validation(_)));
        let err = Query::from_json("not json").unwrap_err();
        assert!(matches!(err, CohortError::Validation(_)));
    }

    #[test]
    fn test_invalid_role_is_validation() {
        let err = Command::from_json(
            r#"{"command": "register_agent", "agent": {"name": "a", "role": "wizard"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CohortError::Validation(_)));
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let orch = orchestrator();
        let agent = match orch
            .execute(
                Command::from_json(
                    r#"{"command": "register_agent", "agent": {"name": "a", "role": "worker"}}"#,
                )
                .unwrap(),
            )
            .await
            .unwrap()
        {
            CommandOutput::Agent(agent) => agent,
            other => panic!("unexpected {other:?}"),
        };

        let task = match orch
            .execute(Command::SubmitTask {
                task: TaskSpec::new("t"),
            })
            .await
            .unwrap()
        {
            CommandOutput::Task(task) => task,
            other => panic!("unexpected {other:?}"),
        };
        orch.execute(Command::Tick).await.unwrap();

        let output = orch
            .query(Query::GetTask { task_id: task.id })
            .await
            .unwrap();
        match output {
            QueryOutput::Task(t) => {
                assert_eq!(t.status, TaskStatus::Running);
                assert_eq!(t.assigned_agent_id, Some(agent.id));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handle_json_errors() {
        let orch = orchestrator();
        let response = orch
            .handle_json(&format!(
                r#"{{"query": "get_agent", "agent_id": "{}"}}"#,
                AgentId::new()
            ))
            .await;
        assert_eq!(response["error"]["kind"], "not_found");

        let response = orch.handle_json(r#"{"hello": 1}"#).await;
        assert_eq!(response["error"]["kind"], "validation");

        let response = orch.handle_json(r#"{"query": "list_agents"}"#).await;
        assert_eq!(response["ok"]["agents"], json!([]));
    }

    #[tokio::test]
    async fn test_receive_messages_query() {
        let orch = orchestrator();
        let a = orch
            .register_agent(AgentSpec::new("a", crate::types::AgentRole::Worker))
            .await
            .unwrap();
        let b = orch
            .register_agent(AgentSpec::new("b", crate::types::AgentRole::Worker))
            .await
            .unwrap();
        orch.execute(Command::SendMessage {
            from_agent_id: a.id,
            to_agent_id: b.id,
            payload: json!({"ping": true}),
        })
        .await
        .unwrap();

        match orch
            .query(Query::ReceiveMessages {
                agent_id: b.id,
                since: Some(0),
            })
            .await
            .unwrap()
        {
            QueryOutput::Messages {
                messages,
                next_offset,
            } => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].payload, json!({"ping": true}));
                assert_eq!(next_offset, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
