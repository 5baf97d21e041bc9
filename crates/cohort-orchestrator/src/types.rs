use chrono::{DateTime, Utc};
use cohort_core::{AgentId, CohortError, CohortResult, TaskId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Role of an agent in the multi-agent system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Plans work and hands it to other agents.
    Orchestrator,
    /// General-purpose executor.
    Worker,
    /// Executor restricted to a narrow specialization.
    Specialist,
    /// Sequences work between a group of agents.
    Coordinator,
    /// Observes other agents and reports on them.
    Monitor,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRole::Orchestrator => write!(f, "orchestrator"),
            AgentRole::Worker => write!(f, "worker"),
            AgentRole::Specialist => write!(f, "specialist"),
            AgentRole::Coordinator => write!(f, "coordinator"),
            AgentRole::Monitor => write!(f, "monitor"),
        }
    }
}

impl FromStr for AgentRole {
    type Err = CohortError;

    fn from_str(s: &str) -> CohortResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "orchestrator" => Ok(AgentRole::Orchestrator),
            "worker" => Ok(AgentRole::Worker),
            "specialist" => Ok(AgentRole::Specialist),
            "coordinator" => Ok(AgentRole::Coordinator),
            "monitor" => Ok(AgentRole::Monitor),
            other => Err(CohortError::Validation(format!(
                "unknown agent role '{other}'"
            ))),
        }
    }
}

/// Priority shared by agents and tasks. Ordered `Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// Dispatched ahead of everything else.
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

impl FromStr for Priority {
    type Err = CohortError;

    fn from_str(s: &str) -> CohortResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(CohortError::Validation(format!(
                "unknown priority '{other}'"
            ))),
        }
    }
}

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Online with no work in flight.
    Idle,
    /// Online and holding at least one task.
    Working,
    /// Blocked on a dependency or external resource. Still holds its tasks.
    Waiting,
    /// Finished its run. Treated like offline for eligibility.
    Completed,
    /// Faulted. Must be reset before it takes work again.
    Error,
    /// Registered but not started, or stopped.
    Offline,
}

impl AgentStatus {
    /// Whether the dispatcher may hand this agent new work (capacity aside).
    pub fn accepts_delegations(self) -> bool {
        matches!(self, AgentStatus::Idle | AgentStatus::Working)
    }

    /// Whether the agent is currently holding work.
    pub fn is_active(self) -> bool {
        matches!(self, AgentStatus::Working | AgentStatus::Waiting)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Waiting => "waiting",
            AgentStatus::Completed => "completed",
            AgentStatus::Error => "error",
            AgentStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Status of a task owned by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue for an eligible agent.
    Pending,
    /// Assigned to an agent, not yet acknowledged.
    Delegated,
    /// Acknowledged by its agent.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// Withdrawn before it finished.
    Cancelled,
}

impl TaskStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the task currently occupies a slot on its agent.
    pub fn holds_capacity(self) -> bool {
        matches!(self, TaskStatus::Delegated | TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Delegated => "delegated",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Trim, lowercase and deduplicate a list of tags. Empty tags are rejected.
pub fn normalize_tags<I, S>(kind: &str, tags: I) -> CohortResult<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BTreeSet::new();
    for tag in tags {
        let tag = tag.as_ref().trim().to_lowercase();
        if tag.is_empty() {
            return Err(CohortError::Validation(format!("empty {kind} tag")));
        }
        out.insert(tag);
    }
    Ok(out)
}

/// Registration request for a new agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Display name. Must not be blank.
    pub name: String,
    /// Role in the system.
    pub role: AgentRole,
    /// Free-form specialization tags.
    #[serde(default)]
    pub specializations: Vec<String>,
    /// Capability tags used for task matching.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Falls back to the configured default when absent.
    #[serde(default)]
    pub max_concurrent_tasks: Option<u32>,
    /// Selection priority among eligible agents.
    #[serde(default)]
    pub priority: Priority,
    /// Register the agent as `offline`; it then needs an explicit start.
    #[serde(default)]
    pub start_offline: bool,
}

impl AgentSpec {
    /// Create a spec with no tags, medium priority and the default capacity.
    pub fn new(name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            name: name.into(),
            role,
            specializations: Vec::new(),
            capabilities: Vec::new(),
            max_concurrent_tasks: None,
            priority: Priority::Medium,
            start_offline: false,
        }
    }

    /// Set the capability tags.
    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the specialization tags.
    pub fn with_specializations<I, S>(mut self, specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.specializations = specs.into_iter().map(Into::into).collect();
        self
    }

    /// Override the configured concurrency limit.
    pub fn with_max_concurrent_tasks(mut self, max: u32) -> Self {
        self.max_concurrent_tasks = Some(max);
        self
    }

    /// Set the selection priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Register without starting.
    pub fn offline(mut self) -> Self {
        self.start_offline = true;
        self
    }
}

/// A registered agent, owned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique id assigned at registration.
    pub id: AgentId,
    /// Display name.
    pub name: String,
    /// Role in the system.
    pub role: AgentRole,
    /// Normalized specialization tags.
    pub specializations: BTreeSet<String>,
    /// Normalized capability tags.
    pub capabilities: BTreeSet<String>,
    /// Upper bound on delegated plus running tasks.
    pub max_concurrent_tasks: u32,
    /// Selection priority among eligible agents.
    pub priority: Priority,
    /// Current lifecycle state.
    pub status: AgentStatus,
    /// Tasks currently delegated to or running on this agent.
    pub active_task_count: u32,
    /// When the agent was registered.
    pub registered_at: DateTime<Utc>,
    /// When the agent last came online.
    pub started_at: Option<DateTime<Utc>>,
    /// Monotonic registration order, used as the final selection tie-break.
    pub registration_seq: u64,
}

impl Agent {
    /// Whether another task fits under the concurrency limit.
    pub fn has_capacity(&self) -> bool {
        self.active_task_count < self.max_concurrent_tasks
    }

    /// Whether the agent holds every tag in `required`.
    pub fn has_capabilities(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }
}

/// Submission request for a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Short title. Must not be blank.
    pub title: String,
    /// Longer description, also fed to the classifier.
    #[serde(default)]
    pub description: String,
    /// Tags an agent must hold to take the task.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Defaults to medium, or to the classifier's suggestion with `auto_classify`.
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Only agents at or above this priority are considered.
    #[serde(default)]
    pub min_agent_priority: Option<Priority>,
    /// Merge the complexity classifier's suggested priority and capabilities.
    #[serde(default)]
    pub auto_classify: bool,
}

impl TaskSpec {
    /// Create a spec with only a title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the required capability tags.
    pub fn requiring<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the task priority explicitly.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Only consider agents at or above `priority`.
    pub fn with_min_agent_priority(mut self, priority: Priority) -> Self {
        self.min_agent_priority = Some(priority);
        self
    }

    /// Merge the classifier's suggestions on submit.
    pub fn auto_classified(mut self) -> Self {
        self.auto_classify = true;
        self
    }
}

/// A validated, normalized task definition from which tasks are stamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Task title.
    pub title: String,
    /// Task description.
    pub description: String,
    /// Normalized required capability tags.
    pub required_capabilities: BTreeSet<String>,
    /// Resolved task priority.
    pub priority: Priority,
    /// Minimum agent priority.
    pub min_agent_priority: Priority,
}

/// A unit of work delegated to a single agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id assigned at submission.
    pub id: TaskId,
    /// Task title.
    pub title: String,
    /// Task description.
    pub description: String,
    /// Tags the assigned agent must hold.
    pub required_capabilities: BTreeSet<String>,
    /// Current status.
    pub status: TaskStatus,
    /// Agent holding the task while delegated or running.
    pub assigned_agent_id: Option<AgentId>,
    /// Last reported progress, 0 to 100.
    pub progress: u8,
    /// Dispatch priority.
    pub priority: Priority,
    /// Minimum agent priority.
    pub min_agent_priority: Priority,
    /// Submission time. Orders tasks of equal priority.
    pub created_at: DateTime<Utc>,
    /// When the task was last delegated.
    pub delegated_at: Option<DateTime<Utc>>,
    /// When the agent acknowledged the task.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Result payload of a completed task.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error message of a failed task.
    #[serde(default)]
    pub error: Option<String>,
    /// Results of the workflow steps this task depends on, keyed by step name.
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
    /// Workflow that owns this task, if any.
    #[serde(default)]
    pub workflow_id: Option<WorkflowId>,
}

impl Task {
    /// Stamp a new pending task from a template.
    pub fn from_template(template: &TaskTemplate) -> Self {
        Self {
            id: TaskId::new(),
            title: template.title.clone(),
            description: template.description.clone(),
            required_capabilities: template.required_capabilities.clone(),
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            progress: 0,
            priority: template.priority,
            min_agent_priority: template.min_agent_priority,
            created_at: Utc::now(),
            delegated_at: None,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            inputs: BTreeMap::new(),
            workflow_id: None,
        }
    }

    /// Attach dependency results.
    pub fn with_inputs(mut self, inputs: BTreeMap<String, serde_json::Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Mark the task as owned by a workflow.
    pub fn in_workflow(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }
}

/// Filter for agent listings. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentFilter {
    /// Only agents with this role.
    #[serde(default)]
    pub role: Option<AgentRole>,
    /// Only agents in this status.
    #[serde(default)]
    pub status: Option<AgentStatus>,
    /// Only agents holding this capability tag.
    #[serde(default)]
    pub capability: Option<String>,
}

impl AgentFilter {
    /// Whether `agent` passes every set field.
    pub fn matches(&self, agent: &Agent) -> bool {
        self.role.is_none_or(|r| agent.role == r)
            && self.status.is_none_or(|s| agent.status == s)
            && self
                .capability
                .as_ref()
                .is_none_or(|c| agent.capabilities.contains(&c.trim().to_lowercase()))
    }
}

/// Filter for task listings. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Only tasks in this status.
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// Only tasks assigned to this agent.
    #[serde(default)]
    pub assigned_agent_id: Option<AgentId>,
    /// Only tasks owned by this workflow.
    #[serde(default)]
    pub workflow_id: Option<WorkflowId>,
}

impl TaskFilter {
    /// Whether `task` passes every set field.
    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|s| task.status == s)
            && self
                .assigned_agent_id
                .is_none_or(|a| task.assigned_agent_id == Some(a))
            && self
                .workflow_id
                .is_none_or(|w| task.workflow_id == Some(w))
    }
}

/// An agent status transition caused by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Status before the operation.
    pub from: AgentStatus,
    /// Status after the operation.
    pub to: AgentStatus,
}

impl StatusChange {
    /// `None` when the status did not actually move.
    pub fn between(from: AgentStatus, to: AgentStatus) -> Option<Self> {
        (from != to).then_some(Self { from, to })
    }
}
