use crate::capability::CapabilityIndex;
use crate::types::{
    normalize_tags, Agent, AgentFilter, AgentSpec, AgentStatus, Priority, StatusChange,
};
use chrono::Utc;
use cohort_core::{AgentId, CohortError, CohortResult};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Specializations recognized when no vocabulary is configured.
pub const DEFAULT_SPECIALIZATIONS: &[&str] = &[
    "frontend",
    "backend",
    "database",
    "devops",
    "testing",
    "security",
    "documentation",
    "architecture",
    "data",
    "research",
    "design",
    "integration",
    "performance",
    "general",
];

/// Concurrency limit applied when a registration does not specify one.
pub const DEFAULT_MAX_CONCURRENT_TASKS: u32 = 3;

/// Result of an explicit lifecycle call: the updated agent and what moved.
#[derive(Debug, Clone)]
pub struct AgentTransition {
    /// The agent after the call.
    pub agent: Agent,
    /// `None` when the status did not move.
    pub change: Option<StatusChange>,
}

/// Owns every [`Agent`] record and its lifecycle state machine.
///
/// ```text
/// offline <-> idle -> working -> { idle | error | waiting }
/// waiting -> working,  error -> idle (reset),  any -> offline (stop)
/// ```
///
/// The [`CapabilityIndex`] lives inside the registry so that membership and
/// capability changes and index updates always happen under the same borrow.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: HashMap<AgentId, Agent>,
    index: CapabilityIndex,
    vocabulary: BTreeSet<String>,
    default_max_concurrent_tasks: u32,
    next_seq: u64,
}

impl AgentRegistry {
    /// Create a registry recognizing the given specializations.
    pub fn new<I, S>(vocabulary: I, default_max_concurrent_tasks: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            agents: HashMap::new(),
            index: CapabilityIndex::new(),
            vocabulary: vocabulary
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .collect(),
            default_max_concurrent_tasks,
            next_seq: 0,
        }
    }

    /// Validate a spec and add the agent. New agents are `idle` unless the
    /// spec asks for `offline`.
    pub fn register(&mut self, spec: AgentSpec) -> CohortResult<Agent> {
        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err(CohortError::Validation(
                "agent name must not be empty".into(),
            ));
        }

        let max = spec
            .max_concurrent_tasks
            .unwrap_or(self.default_max_concurrent_tasks);
        if max < 1 {
            return Err(CohortError::Validation(format!(
                "agent '{name}': max_concurrent_tasks must be at least 1"
            )));
        }

        let specializations = normalize_tags("specialization", &spec.specializations)?;
        if let Some(unknown) = specializations
            .iter()
            .find(|s| !self.vocabulary.contains(*s))
        {
            return Err(CohortError::Validation(format!(
                "agent '{name}': unknown specialization '{unknown}'"
            )));
        }
        let capabilities = normalize_tags("capability", &spec.capabilities)?;

        let now = Utc::now();
        let (status, started_at) = if spec.start_offline {
            (AgentStatus::Offline, None)
        } else {
            (AgentStatus::Idle, Some(now))
        };

        let agent = Agent {
            id: AgentId::new(),
            name,
            role: spec.role,
            specializations,
            capabilities,
            max_concurrent_tasks: max,
            priority: spec.priority,
            status,
            active_task_count: 0,
            registered_at: now,
            started_at,
            registration_seq: self.next_seq,
        };
        self.next_seq += 1;

        self.index.insert(&agent);
        self.agents.insert(agent.id, agent.clone());
        info!(
            agent_id = %agent.id,
            name = %agent.name,
            role = %agent.role,
            "Agent registered"
        );
        Ok(agent)
    }

    /// Look up an agent by id.
    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    /// Like [`get`](Self::get) but unknown ids are a [`CohortError::NotFound`].
    pub fn require(&self, id: AgentId) -> CohortResult<&Agent> {
        self.agents
            .get(&id)
            .ok_or_else(|| CohortError::NotFound(format!("agent {id}")))
    }

    fn require_mut(&mut self, id: AgentId) -> CohortResult<&mut Agent> {
        self.agents
            .get_mut(&id)
            .ok_or_else(|| CohortError::NotFound(format!("agent {id}")))
    }

    /// Agents matching `filter`, in registration order.
    pub fn list(&self, filter: &AgentFilter) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .agents
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        agents.sort_by_key(|a| a.registration_seq);
        agents
    }

    /// All agents, in registration order.
    pub fn all(&self) -> Vec<Agent> {
        self.list(&AgentFilter::default())
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Bring an `offline` (or already `idle`) agent to `idle`.
    pub fn start(&mut self, id: AgentId) -> CohortResult<AgentTransition> {
        let agent = self.require_mut(id)?;
        let from = agent.status;
        match from {
            AgentStatus::Offline | AgentStatus::Idle | AgentStatus::Completed => {
                agent.status = AgentStatus::Idle;
                if from != AgentStatus::Idle {
                    agent.started_at = Some(Utc::now());
                }
            }
            AgentStatus::Working | AgentStatus::Waiting => {
                return Err(CohortError::InvalidState(format!(
                    "agent {id} is already {from}"
                )));
            }
            AgentStatus::Error => {
                return Err(CohortError::InvalidState(format!(
                    "agent {id} is in error; reset it first"
                )));
            }
        }
        debug!(agent_id = %id, from = %from, "Agent started");
        Ok(AgentTransition {
            agent: agent.clone(),
            change: StatusChange::between(from, AgentStatus::Idle),
        })
    }

    /// Force the agent `offline` and zero its load.
    ///
    /// The dispatcher must have detached the agent's tasks beforehand; this
    /// only updates the agent record.
    pub fn stop(&mut self, id: AgentId) -> CohortResult<AgentTransition> {
        let agent = self.require_mut(id)?;
        let from = agent.status;
        agent.status = AgentStatus::Offline;
        agent.active_task_count = 0;
        agent.started_at = None;
        info!(agent_id = %id, from = %from, "Agent stopped");
        Ok(AgentTransition {
            agent: agent.clone(),
            change: StatusChange::between(from, AgentStatus::Offline),
        })
    }

    /// Remove an agent that holds no work.
    pub fn deregister(&mut self, id: AgentId) -> CohortResult<Agent> {
        let agent = self.require(id)?;
        if agent.active_task_count > 0 {
            return Err(CohortError::Conflict(format!(
                "agent {id} still has {} active task(s); stop it first",
                agent.active_task_count
            )));
        }
        let agent = self
            .agents
            .remove(&id)
            .ok_or_else(|| CohortError::NotFound(format!("agent {id}")))?;
        self.index.remove(&agent);
        info!(agent_id = %id, name = %agent.name, "Agent deregistered");
        Ok(agent)
    }

    /// Manual recovery from `error`.
    pub fn reset(&mut self, id: AgentId) -> CohortResult<AgentTransition> {
        let agent = self.require_mut(id)?;
        if agent.status != AgentStatus::Error {
            return Err(CohortError::InvalidState(format!(
                "agent {id} is {}, only errored agents can be reset",
                agent.status
            )));
        }
        let to = if agent.active_task_count > 0 {
            AgentStatus::Working
        } else {
            AgentStatus::Idle
        };
        agent.status = to;
        Ok(AgentTransition {
            agent: agent.clone(),
            change: StatusChange::between(AgentStatus::Error, to),
        })
    }

    /// `working -> waiting`: the agent is blocked but keeps its tasks.
    pub fn mark_waiting(&mut self, id: AgentId) -> CohortResult<AgentTransition> {
        let agent = self.require_mut(id)?;
        if agent.status != AgentStatus::Working {
            return Err(CohortError::InvalidState(format!(
                "agent {id} is {}, only working agents can wait",
                agent.status
            )));
        }
        agent.status = AgentStatus::Waiting;
        Ok(AgentTransition {
            agent: agent.clone(),
            change: StatusChange::between(AgentStatus::Working, AgentStatus::Waiting),
        })
    }

    /// `waiting -> working` (or `idle` if its tasks were settled meanwhile).
    pub fn resume(&mut self, id: AgentId) -> CohortResult<AgentTransition> {
        let agent = self.require_mut(id)?;
        if agent.status != AgentStatus::Waiting {
            return Err(CohortError::InvalidState(format!(
                "agent {id} is {}, not waiting",
                agent.status
            )));
        }
        let to = if agent.active_task_count > 0 {
            AgentStatus::Working
        } else {
            AgentStatus::Idle
        };
        agent.status = to;
        Ok(AgentTransition {
            agent: agent.clone(),
            change: StatusChange::between(AgentStatus::Waiting, to),
        })
    }

    /// Take one capacity slot for a delegation.
    pub(crate) fn acquire(&mut self, id: AgentId) -> CohortResult<Option<StatusChange>> {
        let agent = self.require_mut(id)?;
        if !agent.status.accepts_delegations() {
            return Err(CohortError::InvalidState(format!(
                "agent {id} is {} and accepts no delegations",
                agent.status
            )));
        }
        if !agent.has_capacity() {
            return Err(CohortError::InvalidState(format!(
                "agent {id} is at capacity ({})",
                agent.max_concurrent_tasks
            )));
        }
        let from = agent.status;
        agent.active_task_count += 1;
        agent.status = AgentStatus::Working;
        Ok(StatusChange::between(from, AgentStatus::Working))
    }

    /// Give back one capacity slot after a task settles.
    ///
    /// A fatal failure moves the agent to `error`; otherwise a working or
    /// waiting agent falls back to `idle` once its count reaches zero.
    pub(crate) fn release(
        &mut self,
        id: AgentId,
        fatal: bool,
    ) -> CohortResult<Option<StatusChange>> {
        let agent = self.require_mut(id)?;
        if agent.active_task_count == 0 {
            return Err(CohortError::InvalidState(format!(
                "agent {id} holds no active tasks"
            )));
        }
        let from = agent.status;
        agent.active_task_count -= 1;
        agent.status = if fatal {
            AgentStatus::Error
        } else {
            match from {
                AgentStatus::Working | AgentStatus::Waiting if agent.active_task_count == 0 => {
                    AgentStatus::Idle
                }
                other => other,
            }
        };
        Ok(StatusChange::between(from, agent.status))
    }

    /// Eligible agents for the given requirements, best first. See
    /// [`CapabilityIndex::find_eligible`].
    pub fn find_eligible(
        &self,
        required: &BTreeSet<String>,
        min_priority: Priority,
    ) -> Vec<&Agent> {
        self.index
            .find_eligible(&self.agents, required, min_priority)
    }

    /// Recognized specialization tags.
    pub fn vocabulary(&self) -> &BTreeSet<String> {
        &self.vocabulary
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SPECIALIZATIONS, DEFAULT_MAX_CONCURRENT_TASKS)
    }
}
