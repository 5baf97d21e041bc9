use crate::bus::{CommunicationBus, MailboxIter, Message};
use crate::classifier::{self, Classification, ComplexityClassifier};
use crate::config::{CohortConfig, DispatchMode, OrchestratorConfig};
use crate::dispatcher::{Dispatcher, TaskCounts};
use crate::events::{EventBus, OrchestratorEvent};
use crate::executor::{AgentExecutor, Delegation, ExecutionOutcome};
use crate::monitor::{PerformanceMonitor, PerformanceSample, PerformanceSnapshot, ResourceMetrics};
use crate::registry::AgentRegistry;
use crate::types::{
    normalize_tags, Agent, AgentFilter, AgentSpec, Priority, StatusChange, Task, TaskFilter,
    TaskSpec, TaskTemplate,
};
use crate::workflow::{Workflow, WorkflowEngine, WorkflowSpec};
use cohort_core::{AgentId, CohortError, CohortResult, TaskId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Notify, RwLock};
use tracing::{debug, info, warn};

/// State guarded by the single writer lock.
struct Core {
    registry: AgentRegistry,
    dispatcher: Dispatcher,
    workflows: WorkflowEngine,
}

impl Core {
    /// Publish a task transition and mirror it into its workflow.
    fn track(&mut self, task: &Task, events: &mut Vec<OrchestratorEvent>) {
        events.push(OrchestratorEvent::TaskStatusChanged {
            task_id: task.id,
            status: task.status,
            agent_id: task.assigned_agent_id,
        });
        let dispatcher = &mut self.dispatcher;
        let Some(update) = self.workflows.on_task_transition(task, dispatcher) else {
            return;
        };
        for submitted in &update.submitted {
            events.push(OrchestratorEvent::TaskSubmitted {
                task_id: submitted.id,
                workflow_id: Some(update.workflow_id),
            });
        }
        if update.status_changed {
            events.push(OrchestratorEvent::WorkflowStatusChanged {
                workflow_id: update.workflow_id,
                status: update.status,
            });
        }
    }
}

fn agent_changed(
    events: &mut Vec<OrchestratorEvent>,
    agent_id: AgentId,
    change: Option<StatusChange>,
) {
    if let Some(change) = change {
        events.push(OrchestratorEvent::AgentStatusChanged {
            agent_id,
            from: change.from,
            to: change.to,
        });
    }
}

/// Rejected operations that indicate a caller or agent bug are logged at warn.
fn log_rejection(op: &'static str, err: &CohortError) {
    match err {
        CohortError::InvalidState(_) => warn!(op, error = %err, "Operation rejected"),
        _ => debug!(op, error = %err, "Operation failed"),
    }
}

/// Outcome of one dispatch cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickReport {
    /// Tasks handed out this cycle, in dispatch order.
    pub delegations: Vec<Delegation>,
    /// Tasks still waiting for an eligible agent.
    pub pending: usize,
}

/// The orchestration engine.
///
/// Registry, dispatcher and workflows sit behind one write-preferring async
/// lock so every command is atomic with respect to the agents and tasks it
/// touches. Queries clone what they return. The bus and monitor keep their
/// own short locks. Cloning is cheap and shares the same state.
#[derive(Clone)]
pub struct Orchestrator {
    core: Arc<RwLock<Core>>,
    bus: CommunicationBus,
    monitor: Arc<PerformanceMonitor>,
    events: EventBus,
    executors: Arc<parking_lot::RwLock<HashMap<AgentId, Arc<dyn AgentExecutor>>>>,
    classifier: Arc<dyn ComplexityClassifier>,
    dispatch_signal: Arc<Notify>,
    config: Arc<OrchestratorConfig>,
}

impl Orchestrator {
    /// Create an empty orchestrator with the configured built-in classifier.
    pub fn new(config: OrchestratorConfig) -> CohortResult<Self> {
        config.validate()?;
        let classifier = classifier::build(config.classifier)?;
        Ok(Self {
            core: Arc::new(RwLock::new(Core {
                registry: AgentRegistry::new(
                    &config.known_specializations,
                    config.default_max_concurrent_tasks,
                ),
                dispatcher: Dispatcher::new(config.dispatch_mode),
                workflows: WorkflowEngine::new(),
            })),
            bus: CommunicationBus::new(),
            monitor: Arc::new(PerformanceMonitor::new()),
            events: EventBus::new(config.event_capacity),
            executors: Arc::new(parking_lot::RwLock::new(HashMap::new())),
            classifier,
            dispatch_signal: Arc::new(Notify::new()),
            config: Arc::new(config),
        })
    }

    /// Create an orchestrator and register the configured seed agents.
    pub async fn from_config(config: CohortConfig) -> CohortResult<Self> {
        let orchestrator = Self::new(config.orchestrator)?;
        for spec in config.agents {
            orchestrator.register_agent(spec).await?;
        }
        Ok(orchestrator)
    }

    /// Replace the complexity classifier used by auto-classified submissions.
    pub fn with_classifier(mut self, classifier: Arc<dyn ComplexityClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Settings the orchestrator was built with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Shared performance counters.
    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Receive every state change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Notified whenever pending work or free capacity may have appeared.
    pub fn dispatch_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.dispatch_signal)
    }

    fn publish(&self, events: Vec<OrchestratorEvent>) {
        for event in events {
            self.events.publish(event);
        }
    }

    fn wake_dispatcher(&self) {
        self.dispatch_signal.notify_one();
    }

    // ---- agents ----

    /// Register an agent and open its mailbox. It starts `idle` unless the
    /// spec asks for `offline`.
    pub async fn register_agent(&self, spec: AgentSpec) -> CohortResult<Agent> {
        let agent = {
            let mut core = self.core.write().await;
            core.registry
                .register(spec)
                .inspect_err(|e| log_rejection("register_agent", e))?
        };
        self.bus.open_mailbox(agent.id);
        self.monitor.track(agent.id);
        self.events.publish(OrchestratorEvent::AgentRegistered {
            agent_id: agent.id,
            name: agent.name.clone(),
        });
        self.wake_dispatcher();
        Ok(agent)
    }

    /// Bring an agent online.
    pub async fn start_agent(&self, id: AgentId) -> CohortResult<Agent> {
        let transition = {
            let mut core = self.core.write().await;
            core.registry
                .start(id)
                .inspect_err(|e| log_rejection("start_agent", e))?
        };
        let mut events = Vec::new();
        agent_changed(&mut events, id, transition.change);
        self.publish(events);
        self.wake_dispatcher();
        Ok(transition.agent)
    }

    /// Take an agent offline. Its running tasks are cancelled and its
    /// delegated-but-unstarted tasks go back to pending.
    pub async fn stop_agent(&self, id: AgentId) -> CohortResult<Agent> {
        let mut events = Vec::new();
        let (agent, requeued) = {
            let mut guard = self.core.write().await;
            let core = &mut *guard;
            core.registry
                .require(id)
                .inspect_err(|e| log_rejection("stop_agent", e))?;
            let detached = core.dispatcher.detach_agent(id);
            let transition = core.registry.stop(id)?;
            agent_changed(&mut events, id, transition.change);
            for task in detached.cancelled.iter().chain(&detached.requeued) {
                core.track(task, &mut events);
            }
            if !detached.cancelled.is_empty() || !detached.requeued.is_empty() {
                info!(
                    agent_id = %id,
                    cancelled = detached.cancelled.len(),
                    requeued = detached.requeued.len(),
                    "Detached tasks from stopped agent"
                );
            }
            (transition.agent, !detached.requeued.is_empty())
        };
        self.publish(events);
        if requeued {
            self.wake_dispatcher();
        }
        Ok(agent)
    }

    /// Remove an agent with no work in flight. Its mailbox, counters and
    /// executor go with it.
    pub async fn deregister_agent(&self, id: AgentId) -> CohortResult<Agent> {
        let agent = {
            let mut core = self.core.write().await;
            core.registry
                .deregister(id)
                .inspect_err(|e| log_rejection("deregister_agent", e))?
        };
        self.bus.close_mailbox(id);
        self.monitor.forget(id);
        self.executors.write().remove(&id);
        self.events
            .publish(OrchestratorEvent::AgentDeregistered { agent_id: id });
        Ok(agent)
    }

    /// Recover an agent from `error`.
    pub async fn reset_agent(&self, id: AgentId) -> CohortResult<Agent> {
        let transition = {
            let mut core = self.core.write().await;
            core.registry
                .reset(id)
                .inspect_err(|e| log_rejection("reset_agent", e))?
        };
        let mut events = Vec::new();
        agent_changed(&mut events, id, transition.change);
        self.publish(events);
        self.wake_dispatcher();
        Ok(transition.agent)
    }

    /// `working -> waiting`. The agent keeps its tasks but takes no new ones.
    pub async fn mark_agent_waiting(&self, id: AgentId) -> CohortResult<Agent> {
        let transition = {
            let mut core = self.core.write().await;
            core.registry
                .mark_waiting(id)
                .inspect_err(|e| log_rejection("mark_agent_waiting", e))?
        };
        let mut events = Vec::new();
        agent_changed(&mut events, id, transition.change);
        self.publish(events);
        Ok(transition.agent)
    }

    /// `waiting -> working`.
    pub async fn resume_agent(&self, id: AgentId) -> CohortResult<Agent> {
        let transition = {
            let mut core = self.core.write().await;
            core.registry
                .resume(id)
                .inspect_err(|e| log_rejection("resume_agent", e))?
        };
        let mut events = Vec::new();
        agent_changed(&mut events, id, transition.change);
        self.publish(events);
        self.wake_dispatcher();
        Ok(transition.agent)
    }

    /// Run delegations to this agent through `executor`.
    pub async fn attach_executor(
        &self,
        id: AgentId,
        executor: Arc<dyn AgentExecutor>,
    ) -> CohortResult<()> {
        self.core.read().await.registry.require(id)?;
        self.executors.write().insert(id, executor);
        debug!(agent_id = %id, "Executor attached");
        Ok(())
    }

    /// Stop routing delegations to an executor. Returns whether one was attached.
    pub fn detach_executor(&self, id: AgentId) -> bool {
        self.executors.write().remove(&id).is_some()
    }

    // ---- tasks ----

    /// Validate a submission and turn it into a template, consulting the
    /// classifier when `auto_classify` is set.
    fn resolve_task(&self, spec: &TaskSpec) -> CohortResult<TaskTemplate> {
        let title = spec.title.trim();
        if title.is_empty() {
            return Err(CohortError::Validation(
                "task title must not be empty".into(),
            ));
        }
        let mut required = normalize_tags("capability", &spec.required_capabilities)?;
        let mut priority = spec.priority;
        if spec.auto_classify {
            let suggestion = self.classifier.classify(title, &spec.description);
            debug!(
                classifier = self.classifier.name(),
                complexity = %suggestion.complexity,
                "Task classified"
            );
            priority = priority.or(Some(suggestion.priority));
            required.extend(suggestion.capabilities);
        }
        Ok(TaskTemplate {
            title: title.to_string(),
            description: spec.description.clone(),
            required_capabilities: required,
            priority: priority.unwrap_or_default(),
            min_agent_priority: spec.min_agent_priority.unwrap_or(Priority::Low),
        })
    }

    /// Queue a task as `pending`. Dispatch happens on the next tick.
    pub async fn submit_task(&self, spec: TaskSpec) -> CohortResult<Task> {
        let template = self
            .resolve_task(&spec)
            .inspect_err(|e| log_rejection("submit_task", e))?;
        let task = Task::from_template(&template);
        {
            let mut core = self.core.write().await;
            core.dispatcher.submit(task.clone());
        }
        self.events.publish(OrchestratorEvent::TaskSubmitted {
            task_id: task.id,
            workflow_id: None,
        });
        self.wake_dispatcher();
        Ok(task)
    }

    /// One dispatch cycle: match pending tasks to eligible agents and hand
    /// each delegation to the agent's executor, if one is attached.
    pub async fn tick(&self) -> TickReport {
        let mut events = Vec::new();
        let report = {
            let mut guard = self.core.write().await;
            let core = &mut *guard;
            let assignments = core.dispatcher.tick(&mut core.registry);
            let mut delegations = Vec::with_capacity(assignments.len());
            for assignment in assignments {
                agent_changed(&mut events, assignment.agent_id, assignment.agent_change);
                events.push(OrchestratorEvent::TaskDelegated {
                    task_id: assignment.task.id,
                    agent_id: assignment.agent_id,
                });
                core.track(&assignment.task, &mut events);
                delegations.push(Delegation::for_task(&assignment.task, assignment.agent_id));
            }
            TickReport {
                delegations,
                pending: core.dispatcher.pending_count(),
            }
        };
        self.publish(events);

        if !report.delegations.is_empty() {
            debug!(
                delegated = report.delegations.len(),
                pending = report.pending,
                "Dispatch tick"
            );
        }
        for delegation in &report.delegations {
            self.spawn_execution(delegation.clone());
        }
        report
    }

    /// Fire-and-forget execution of a delegation. The outcome comes back
    /// through the regular complete/fail path.
    fn spawn_execution(&self, delegation: Delegation) {
        let Some(executor) = self.executors.read().get(&delegation.agent_id).cloned() else {
            return;
        };
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let (task_id, agent_id) = (delegation.task_id, delegation.agent_id);
            if orchestrator.config.dispatch_mode == DispatchMode::Acknowledged {
                let acked = orchestrator.acknowledge_task(task_id, agent_id).await;
                if acked.is_err() {
                    return;
                }
            }
            let reported = match executor.execute(delegation).await {
                ExecutionOutcome::Completed(result) => orchestrator
                    .complete_task(task_id, agent_id, result)
                    .await
                    .map(|_| ()),
                ExecutionOutcome::Failed { error, fatal } => orchestrator
                    .fail_task(task_id, agent_id, error, fatal)
                    .await
                    .map(|_| ()),
                ExecutionOutcome::Detached => Ok(()),
            };
            if let Err(e) = reported {
                debug!(
                    task_id = %task_id,
                    agent_id = %agent_id,
                    error = %e,
                    "Execution report dropped"
                );
            }
        });
    }

    /// `delegated -> running` in acknowledged dispatch mode.
    pub async fn acknowledge_task(&self, task_id: TaskId, agent_id: AgentId) -> CohortResult<Task> {
        let mut events = Vec::new();
        let task = {
            let mut core = self.core.write().await;
            let task = core
                .dispatcher
                .acknowledge(task_id, agent_id)
                .inspect_err(|e| log_rejection("acknowledge_task", e))?;
            core.track(&task, &mut events);
            task
        };
        self.publish(events);
        Ok(task)
    }

    /// Record progress on a running task, clamped to 100.
    pub async fn report_progress(
        &self,
        task_id: TaskId,
        agent_id: AgentId,
        progress: u8,
    ) -> CohortResult<Task> {
        let task = {
            let mut core = self.core.write().await;
            core.dispatcher
                .report_progress(task_id, agent_id, progress)
                .inspect_err(|e| log_rejection("report_progress", e))?
        };
        self.events.publish(OrchestratorEvent::TaskProgress {
            task_id,
            progress: task.progress,
        });
        Ok(task)
    }

    /// Report success. Only the assignee of a running task may complete it;
    /// a late report on a task cancelled under the same agent is a no-op.
    pub async fn complete_task(
        &self,
        task_id: TaskId,
        agent_id: AgentId,
        result: serde_json::Value,
    ) -> CohortResult<Task> {
        let mut events = Vec::new();
        let settlement = {
            let mut guard = self.core.write().await;
            let core = &mut *guard;
            let settlement = core
                .dispatcher
                .complete(task_id, agent_id, result, &mut core.registry)
                .inspect_err(|e| log_rejection("complete_task", e))?;
            if settlement.applied {
                agent_changed(&mut events, agent_id, settlement.agent_change);
                core.track(&settlement.task, &mut events);
            }
            settlement
        };
        if settlement.applied {
            self.monitor.record_completed(agent_id);
            self.publish(events);
            self.wake_dispatcher();
        }
        Ok(settlement.task)
    }

    /// Report failure. `fatal` moves the agent into `error`.
    pub async fn fail_task(
        &self,
        task_id: TaskId,
        agent_id: AgentId,
        error: impl Into<String>,
        fatal: bool,
    ) -> CohortResult<Task> {
        let mut events = Vec::new();
        let settlement = {
            let mut guard = self.core.write().await;
            let core = &mut *guard;
            let settlement = core
                .dispatcher
                .fail(task_id, agent_id, error, fatal, &mut core.registry)
                .inspect_err(|e| log_rejection("fail_task", e))?;
            if settlement.applied {
                agent_changed(&mut events, agent_id, settlement.agent_change);
                core.track(&settlement.task, &mut events);
            }
            settlement
        };
        if settlement.applied {
            self.monitor.record_failed(agent_id);
            self.publish(events);
            self.wake_dispatcher();
        }
        Ok(settlement.task)
    }

    /// Cancel a task. For running tasks this is advisory towards the agent,
    /// but its capacity is freed immediately.
    pub async fn cancel_task(&self, task_id: TaskId) -> CohortResult<Task> {
        let mut events = Vec::new();
        let task = {
            let mut guard = self.core.write().await;
            let core = &mut *guard;
            let settlement = core
                .dispatcher
                .cancel(task_id, &mut core.registry)
                .inspect_err(|e| log_rejection("cancel_task", e))?;
            if let Some(agent_id) = settlement.task.assigned_agent_id {
                agent_changed(&mut events, agent_id, settlement.agent_change);
            }
            core.track(&settlement.task, &mut events);
            settlement.task
        };
        self.publish(events);
        self.wake_dispatcher();
        Ok(task)
    }

    // ---- workflows ----

    /// Validate a workflow and submit its root steps.
    pub async fn create_workflow(&self, spec: WorkflowSpec) -> CohortResult<Workflow> {
        let mut events = Vec::new();
        let workflow = {
            let mut guard = self.core.write().await;
            let core = &mut *guard;
            let (workflow, submitted) = core
                .workflows
                .create(spec, |s| self.resolve_task(s), &mut core.dispatcher)
                .inspect_err(|e| log_rejection("create_workflow", e))?;
            for task in &submitted {
                events.push(OrchestratorEvent::TaskSubmitted {
                    task_id: task.id,
                    workflow_id: Some(workflow.id),
                });
            }
            workflow
        };
        self.publish(events);
        self.wake_dispatcher();
        Ok(workflow)
    }

    /// Cancel every unfinished step of a workflow, including running tasks.
    pub async fn cancel_workflow(&self, id: WorkflowId) -> CohortResult<Workflow> {
        let mut events = Vec::new();
        let workflow = {
            let mut guard = self.core.write().await;
            let core = &mut *guard;
            let (workflow, settlements) = core
                .workflows
                .cancel(id, &mut core.dispatcher, &mut core.registry)
                .inspect_err(|e| log_rejection("cancel_workflow", e))?;
            for settlement in settlements {
                if let Some(agent_id) = settlement.task.assigned_agent_id {
                    agent_changed(&mut events, agent_id, settlement.agent_change);
                }
                events.push(OrchestratorEvent::TaskStatusChanged {
                    task_id: settlement.task.id,
                    status: settlement.task.status,
                    agent_id: settlement.task.assigned_agent_id,
                });
            }
            events.push(OrchestratorEvent::WorkflowStatusChanged {
                workflow_id: id,
                status: workflow.status,
            });
            workflow
        };
        self.publish(events);
        self.wake_dispatcher();
        Ok(workflow)
    }

    // ---- messaging ----

    /// Deliver a message to `to`'s mailbox.
    pub fn send_message(
        &self,
        from: AgentId,
        to: AgentId,
        payload: serde_json::Value,
    ) -> CohortResult<Message> {
        let message = self
            .bus
            .send(from, to, payload)
            .inspect_err(|e| log_rejection("send_message", e))?;
        self.events.publish(OrchestratorEvent::MessageSent {
            message_id: message.id,
            from_agent_id: from,
            to_agent_id: to,
        });
        Ok(Message::clone(&message))
    }

    /// Lazy view of an agent's mailbox from `since` (or its committed offset).
    pub fn receive_messages(
        &self,
        agent_id: AgentId,
        since: Option<usize>,
    ) -> CohortResult<MailboxIter> {
        self.bus.receive(agent_id, since)
    }

    /// Mark messages before `offset` as consumed.
    pub fn commit_messages(&self, agent_id: AgentId, offset: usize) -> CohortResult<usize> {
        self.bus.commit(agent_id, offset)
    }

    /// Messages past the committed offset.
    pub fn unread_messages(&self, agent_id: AgentId) -> CohortResult<usize> {
        self.bus.unread(agent_id)
    }

    // ---- monitoring ----

    /// Record resource readings for an agent.
    pub fn sample_performance(
        &self,
        agent_id: AgentId,
        metrics: ResourceMetrics,
    ) -> CohortResult<PerformanceSample> {
        self.monitor.sample(agent_id, metrics)
    }

    /// Rollup over copies of agent and task state taken under a short read guard.
    pub async fn performance_snapshot(&self) -> PerformanceSnapshot {
        let (agents, counts) = {
            let core = self.core.read().await;
            (core.registry.all(), core.dispatcher.counts())
        };
        self.monitor.aggregate(&agents, counts)
    }

    // ---- queries ----

    /// Copy of one agent.
    pub async fn get_agent(&self, id: AgentId) -> CohortResult<Agent> {
        self.core.read().await.registry.require(id).cloned()
    }

    /// Agents matching `filter`, in registration order.
    pub async fn list_agents(&self, filter: &AgentFilter) -> Vec<Agent> {
        self.core.read().await.registry.list(filter)
    }

    /// Copy of one task.
    pub async fn get_task(&self, id: TaskId) -> CohortResult<Task> {
        self.core
            .read()
            .await
            .dispatcher
            .get(id)
            .cloned()
            .ok_or_else(|| CohortError::NotFound(format!("task {id}")))
    }

    /// Tasks matching `filter`, oldest first.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        self.core.read().await.dispatcher.list(filter)
    }

    /// Ids of pending tasks in the order the next tick will consider them.
    pub async fn pending_order(&self) -> Vec<TaskId> {
        self.core.read().await.dispatcher.pending_order()
    }

    /// Tasks per status.
    pub async fn task_counts(&self) -> TaskCounts {
        self.core.read().await.dispatcher.counts()
    }

    /// Copy of one workflow.
    pub async fn get_workflow(&self, id: WorkflowId) -> CohortResult<Workflow> {
        self.core
            .read()
            .await
            .workflows
            .get(id)
            .cloned()
            .ok_or_else(|| CohortError::NotFound(format!("workflow {id}")))
    }

    /// Every workflow, oldest first.
    pub async fn list_workflows(&self) -> Vec<Workflow> {
        self.core.read().await.workflows.list()
    }

    /// Run the configured classifier without submitting anything.
    pub fn classify(&self, title: &str, description: &str) -> Classification {
        self.classifier.classify(title, description)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{AgentRole, AgentStatus, TaskStatus};
    use crate::workflow::{StepSpec, WorkflowStatus};
    use serde_json::json;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(OrchestratorConfig::default()).unwrap()
    }

    fn worker(name: &str, caps: &[&str], max: u32) -> AgentSpec {
        AgentSpec::new(name, AgentRole::Worker)
            .with_capabilities(caps.iter().copied())
            .with_max_concurrent_tasks(max)
    }

    #[tokio::test]
    async fn test_submit_tick_complete() {
        let orch = orchestrator();
        let agent = orch
            .register_agent(worker("a1", &["frontend"], 1))
            .await
            .unwrap();
        let task = orch
            .submit_task(TaskSpec::new("t1").requiring(["frontend"]))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let report = orch.tick().await;
        assert_eq!(report.delegations.len(), 1);
        assert_eq!(report.pending, 0);
        assert_eq!(
            orch.get_task(task.id).await.unwrap().status,
            TaskStatus::Running
        );

        let done = orch
            .complete_task(task.id, agent.id, json!("ok"))
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        let agent = orch.get_agent(agent.id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.active_task_count, 0);
        assert_eq!(
            orch.monitor().get(agent.id).unwrap().completed_task_count,
            1
        );
    }

    #[tokio::test]
    async fn test_blank_title_rejected() {
        let orch = orchestrator();
        let err = orch.submit_task(TaskSpec::new("   ")).await.unwrap_err();
        assert!(matches!(err, CohortError::Validation(_)));
        assert_eq!(orch.task_counts().await.total, 0);
    }

    #[tokio::test]
    async fn test_auto_classify_merges_suggestion() {
        let orch = orchestrator();
        let task = orch
            .submit_task(
                TaskSpec::new("Redesign the API")
                    .requiring(["review"])
                    .auto_classified(),
            )
            .await
            .unwrap();
        assert_eq!(task.priority, Priority::High);
        assert!(task.required_capabilities.contains("backend"));
        assert!(task.required_capabilities.contains("review"));

        let explicit = orch
            .submit_task(
                TaskSpec::new("Redesign the API")
                    .with_priority(Priority::Low)
                    .auto_classified(),
            )
            .await
            .unwrap();
        assert_eq!(explicit.priority, Priority::Low);
    }

    #[tokio::test]
    async fn test_events_published() {
        let orch = orchestrator();
        let mut rx = orch.subscribe();
        let agent = orch.register_agent(worker("a", &[], 1)).await.unwrap();
        let task = orch.submit_task(TaskSpec::new("t")).await.unwrap();
        orch.tick().await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&OrchestratorEvent::AgentRegistered {
            agent_id: agent.id,
            name: "a".into(),
        }));
        assert!(seen.contains(&OrchestratorEvent::TaskDelegated {
            task_id: task.id,
            agent_id: agent.id,
        }));
        assert!(seen.contains(&OrchestratorEvent::AgentStatusChanged {
            agent_id: agent.id,
            from: AgentStatus::Idle,
            to: AgentStatus::Working,
        }));
    }

    #[tokio::test]
    async fn test_workflow_through_orchestrator() {
        let orch = orchestrator();
        let agent = orch.register_agent(worker("a", &[], 2)).await.unwrap();
        let wf = orch
            .create_workflow(WorkflowSpec {
                name: "ship".into(),
                steps: vec![
                    StepSpec::new("build", TaskSpec::new("build")),
                    StepSpec::new("deploy", TaskSpec::new("deploy")).after(["build"]),
                ],
            })
            .await
            .unwrap();

        let first = orch.tick().await.delegations;
        assert_eq!(first.len(), 1);
        orch.complete_task(first[0].task_id, agent.id, json!({"artifact": "x"}))
            .await
            .unwrap();

        let second = orch.tick().await.delegations;
        assert_eq!(second.len(), 1);
        assert_eq!(
            second[0].inputs.get("build"),
            Some(&json!({"artifact": "x"}))
        );
        orch.complete_task(second[0].task_id, agent.id, json!(null))
            .await
            .unwrap();

        assert_eq!(
            orch.get_workflow(wf.id).await.unwrap().status,
            WorkflowStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_messages_require_registered_agents() {
        let orch = orchestrator();
        let a = orch.register_agent(worker("a", &[], 1)).await.unwrap();
        let b = orch.register_agent(worker("b", &[], 1)).await.unwrap();
        orch.send_message(a.id, b.id, json!({"hi": 1})).unwrap();
        assert_eq!(orch.unread_messages(b.id).unwrap(), 1);

        orch.deregister_agent(b.id).await.unwrap();
        assert!(matches!(
            orch.send_message(a.id, b.id, json!(null)).unwrap_err(),
            CohortError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_performance_snapshot() {
        let orch = orchestrator();
        let agent = orch.register_agent(worker("a", &[], 1)).await.unwrap();
        orch.sample_performance(
            agent.id,
            ResourceMetrics {
                cpu_usage: 10.0,
                memory_usage: 64.0,
                uptime_secs: None,
            },
        )
        .unwrap();
        let snapshot = orch.performance_snapshot().await;
        assert_eq!(snapshot.agents.total, 1);
        assert_eq!(snapshot.agents.idle, 1);
        assert_eq!(snapshot.overall_efficiency, 0.0);
    }
}
