use crate::config::DispatchMode;
use crate::registry::AgentRegistry;
use crate::types::{Priority, StatusChange, Task, TaskFilter, TaskStatus};
use chrono::Utc;
use cohort_core::{AgentId, CohortError, CohortResult, TaskId};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Pending queue key: higher priority first, then submission order.
type PendingKey = (Reverse<Priority>, u64, TaskId);

/// One delegation decided by [`Dispatcher::tick`].
#[derive(Debug, Clone)]
pub struct Assignment {
    /// The task after delegation.
    pub task: Task,
    /// Agent that took the task.
    pub agent_id: AgentId,
    /// Set when the agent went from `idle` to `working`.
    pub agent_change: Option<StatusChange>,
}

/// Outcome of a report against an existing task.
#[derive(Debug, Clone)]
pub struct Settlement {
    /// The task after the call.
    pub task: Task,
    /// `false` when the report was a late no-op against a cancelled task.
    pub applied: bool,
    /// Status move of the agent whose slot was released, if any.
    pub agent_change: Option<StatusChange>,
}

/// Tasks pulled off an agent that went offline.
#[derive(Debug, Clone, Default)]
pub struct Detached {
    /// Running tasks, now cancelled.
    pub cancelled: Vec<Task>,
    /// Delegated but never started, now pending again.
    pub requeued: Vec<Task>,
}

/// Aggregate task counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    /// Every task ever submitted.
    pub total: usize,
    /// Waiting for an agent.
    pub pending: usize,
    /// Assigned, not yet acknowledged.
    pub delegated: usize,
    /// In progress on an agent.
    pub running: usize,
    /// Finished with a result.
    pub completed: usize,
    /// Finished with an error.
    pub failed: usize,
    /// Withdrawn before finishing.
    pub cancelled: usize,
}

/// Owns every [`Task`] and is the only writer of task status and assignee.
///
/// Pending tasks sit in an ordered set so that a tick walks them by
/// descending priority and FIFO within a priority without re-sorting.
#[derive(Debug)]
pub struct Dispatcher {
    tasks: HashMap<TaskId, Task>,
    seqs: HashMap<TaskId, u64>,
    pending: BTreeSet<PendingKey>,
    next_seq: u64,
    mode: DispatchMode,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new(mode: DispatchMode) -> Self {
        Self {
            tasks: HashMap::new(),
            seqs: HashMap::new(),
            pending: BTreeSet::new(),
            next_seq: 0,
            mode,
        }
    }

    /// Whether delegations start running at once or wait for an acknowledgement.
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Store a task as `pending` and return its id.
    pub fn submit(&mut self, mut task: Task) -> TaskId {
        let id = task.id;
        task.status = TaskStatus::Pending;
        task.assigned_agent_id = None;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert((Reverse(task.priority), seq, id));
        self.seqs.insert(id, seq);
        debug!(task_id = %id, priority = %task.priority, "Task submitted");
        self.tasks.insert(id, task);
        id
    }

    fn pending_key(&self, task: &Task) -> Option<PendingKey> {
        self.seqs
            .get(&task.id)
            .map(|seq| (Reverse(task.priority), *seq, task.id))
    }

    /// Match pending tasks to eligible agents.
    ///
    /// Each match takes a capacity slot on the agent before the task moves,
    /// so later tasks in the same tick see the updated load. Tasks with no
    /// eligible agent stay pending.
    pub fn tick(&mut self, registry: &mut AgentRegistry) -> Vec<Assignment> {
        let mut assignments = Vec::new();
        let queue: Vec<PendingKey> = self.pending.iter().copied().collect();

        for key in queue {
            let task_id = key.2;
            let Some(task) = self.tasks.get(&task_id) else {
                self.pending.remove(&key);
                continue;
            };

            let agent_id = match registry
                .find_eligible(&task.required_capabilities, task.min_agent_priority)
                .first()
            {
                Some(agent) => agent.id,
                None => continue,
            };

            let agent_change = match registry.acquire(agent_id) {
                Ok(change) => change,
                Err(e) => {
                    debug!(task_id = %task_id, agent_id = %agent_id, error = %e, "Acquire failed");
                    continue;
                }
            };

            self.pending.remove(&key);
            let Some(task) = self.tasks.get_mut(&task_id) else {
                continue;
            };
            let now = Utc::now();
            task.assigned_agent_id = Some(agent_id);
            task.status = TaskStatus::Delegated;
            task.delegated_at = Some(now);
            if self.mode == DispatchMode::Immediate {
                task.status = TaskStatus::Running;
                task.started_at = Some(now);
            }
            info!(
                task_id = %task_id,
                agent_id = %agent_id,
                status = %task.status,
                "Task delegated"
            );

            assignments.push(Assignment {
                task: task.clone(),
                agent_id,
                agent_change,
            });
        }

        assignments
    }

    fn require(&self, id: TaskId) -> CohortResult<&Task> {
        self.tasks
            .get(&id)
            .ok_or_else(|| CohortError::NotFound(format!("task {id}")))
    }

    fn require_mut(&mut self, id: TaskId) -> CohortResult<&mut Task> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| CohortError::NotFound(format!("task {id}")))
    }

    fn check_assignee(task: &Task, agent_id: AgentId) -> CohortResult<()> {
        if task.assigned_agent_id != Some(agent_id) {
            return Err(CohortError::InvalidState(format!(
                "task {} is not assigned to agent {agent_id}",
                task.id
            )));
        }
        Ok(())
    }

    /// `delegated -> running`, reported by the assignee in acknowledged mode.
    pub fn acknowledge(&mut self, task_id: TaskId, agent_id: AgentId) -> CohortResult<Task> {
        let task = self.require_mut(task_id)?;
        Self::check_assignee(task, agent_id)?;
        if task.status != TaskStatus::Delegated {
            return Err(CohortError::InvalidState(format!(
                "task {task_id} is {}, expected delegated",
                task.status
            )));
        }
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        Ok(task.clone())
    }

    /// Record progress for a running task. Lower values than already
    /// recorded are ignored so progress never moves backwards.
    pub fn report_progress(
        &mut self,
        task_id: TaskId,
        agent_id: AgentId,
        progress: u8,
    ) -> CohortResult<Task> {
        let task = self.require_mut(task_id)?;
        Self::check_assignee(task, agent_id)?;
        if task.status != TaskStatus::Running {
            return Err(CohortError::InvalidState(format!(
                "task {task_id} is {}, progress is only tracked while running",
                task.status
            )));
        }
        task.progress = task.progress.max(progress.min(100));
        Ok(task.clone())
    }

    /// Shared path of [`complete`](Self::complete) and [`fail`](Self::fail).
    fn settle(
        &mut self,
        task_id: TaskId,
        agent_id: AgentId,
        outcome: TaskStatus,
        fatal: bool,
        registry: &mut AgentRegistry,
    ) -> CohortResult<Settlement> {
        let task = self.require(task_id)?;
        if task.status == TaskStatus::Cancelled && task.assigned_agent_id == Some(agent_id) {
            debug!(
                task_id = %task_id,
                agent_id = %agent_id,
                "Late report on cancelled task ignored"
            );
            return Ok(Settlement {
                task: task.clone(),
                applied: false,
                agent_change: None,
            });
        }
        Self::check_assignee(task, agent_id)?;
        if task.status != TaskStatus::Running {
            return Err(CohortError::InvalidState(format!(
                "task {task_id} is {}, expected running",
                task.status
            )));
        }

        let agent_change = registry.release(agent_id, fatal)?;

        let task = self.require_mut(task_id)?;
        task.status = outcome;
        task.completed_at = Some(Utc::now());
        if outcome == TaskStatus::Completed {
            task.progress = 100;
        }
        Ok(Settlement {
            task: task.clone(),
            applied: true,
            agent_change,
        })
    }

    /// Mark a running task completed by its assignee and free the slot.
    pub fn complete(
        &mut self,
        task_id: TaskId,
        agent_id: AgentId,
        result: serde_json::Value,
        registry: &mut AgentRegistry,
    ) -> CohortResult<Settlement> {
        let mut settlement =
            self.settle(task_id, agent_id, TaskStatus::Completed, false, registry)?;
        if settlement.applied {
            if let Some(task) = self.tasks.get_mut(&task_id) {
                task.result = Some(result);
                settlement.task = task.clone();
            }
        }
        Ok(settlement)
    }

    /// Mark a running task failed. `fatal` puts the agent into `error`.
    pub fn fail(
        &mut self,
        task_id: TaskId,
        agent_id: AgentId,
        error: impl Into<String>,
        fatal: bool,
        registry: &mut AgentRegistry,
    ) -> CohortResult<Settlement> {
        let mut settlement = self.settle(task_id, agent_id, TaskStatus::Failed, fatal, registry)?;
        if settlement.applied {
            if let Some(task) = self.tasks.get_mut(&task_id) {
                task.error = Some(error.into());
                settlement.task = task.clone();
            }
        }
        Ok(settlement)
    }

    /// Cancel a pending, delegated or running task.
    ///
    /// For delegated and running tasks this is advisory towards the agent,
    /// but the slot is released here and now.
    pub fn cancel(
        &mut self,
        task_id: TaskId,
        registry: &mut AgentRegistry,
    ) -> CohortResult<Settlement> {
        let task = self.require(task_id)?;
        let mut agent_change = None;
        match task.status {
            TaskStatus::Pending => {
                if let Some(key) = self.pending_key(task) {
                    self.pending.remove(&key);
                }
            }
            TaskStatus::Delegated | TaskStatus::Running => {
                if let Some(agent_id) = task.assigned_agent_id {
                    agent_change = registry.release(agent_id, false)?;
                }
            }
            status => {
                return Err(CohortError::InvalidState(format!(
                    "task {task_id} is already {status}"
                )));
            }
        }

        let task = self.require_mut(task_id)?;
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        info!(task_id = %task_id, "Task cancelled");
        Ok(Settlement {
            task: task.clone(),
            applied: true,
            agent_change,
        })
    }

    /// Pull every task off an agent that is going offline.
    ///
    /// Running tasks are cancelled, delegated ones go back to pending for the
    /// next tick. The caller zeroes the agent's load afterwards.
    pub fn detach_agent(&mut self, agent_id: AgentId) -> Detached {
        let mut detached = Detached::default();
        let now = Utc::now();
        let mut requeue = Vec::new();

        for task in self.tasks.values_mut() {
            if task.assigned_agent_id != Some(agent_id) {
                continue;
            }
            match task.status {
                TaskStatus::Running => {
                    task.status = TaskStatus::Cancelled;
                    task.completed_at = Some(now);
                    detached.cancelled.push(task.clone());
                }
                TaskStatus::Delegated => {
                    task.status = TaskStatus::Pending;
                    task.assigned_agent_id = None;
                    task.delegated_at = None;
                    requeue.push(task.id);
                    detached.requeued.push(task.clone());
                }
                _ => {}
            }
        }

        for id in requeue {
            let key = self.tasks.get(&id).and_then(|t| self.pending_key(t));
            if let Some(key) = key {
                self.pending.insert(key);
            }
        }
        detached
    }

    /// Look up a task by id.
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Tasks matching `filter`, in submission order.
    pub fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().filter(|t| filter.matches(t)).collect();
        tasks.sort_by_key(|t| self.seqs.get(&t.id).copied().unwrap_or(u64::MAX));
        tasks.into_iter().cloned().collect()
    }

    /// Ids of pending tasks in dispatch order.
    pub fn pending_order(&self) -> Vec<TaskId> {
        self.pending.iter().map(|k| k.2).collect()
    }

    /// Tasks waiting for an agent.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Tasks per status.
    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts {
            total: self.tasks.len(),
            ..TaskCounts::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Delegated => counts.delegated += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatchMode::Immediate)
    }
}
