use crate::dispatcher::TaskCounts;
use crate::types::{Agent, AgentStatus};
use chrono::{DateTime, Utc};
use cohort_core::{AgentId, CohortError, CohortResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Resource readings reported for an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    /// Percent of one core, as reported by the agent host.
    pub cpu_usage: f64,
    /// Resident memory in megabytes.
    pub memory_usage: f64,
    /// Reported uptime. Derived from tracking time when absent.
    #[serde(default)]
    pub uptime_secs: Option<u64>,
}

/// Latest counters for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// Agent the sample belongs to.
    pub agent_id: AgentId,
    /// Last reported CPU usage.
    pub cpu_usage: f64,
    /// Last reported memory usage.
    pub memory_usage: f64,
    /// Uptime at the last sample.
    pub uptime_secs: u64,
    /// Tasks this agent completed.
    pub completed_task_count: u64,
    /// Tasks this agent failed.
    pub failed_task_count: u64,
    /// When tracking started.
    pub tracked_since: DateTime<Utc>,
    /// When resource readings last arrived. `None` before the first sample.
    pub sampled_at: Option<DateTime<Utc>>,
}

impl PerformanceSample {
    fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            uptime_secs: 0,
            completed_task_count: 0,
            failed_task_count: 0,
            tracked_since: Utc::now(),
            sampled_at: None,
        }
    }

    /// `completed / (completed + failed)`, or 0 with no finished tasks.
    pub fn efficiency(&self) -> f64 {
        efficiency(self.completed_task_count, self.failed_task_count)
    }
}

fn efficiency(completed: u64, failed: u64) -> f64 {
    let total = completed + failed;
    if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64
    }
}

/// Agent population by status.
///
/// `active + idle + error + offline == total`. `completed` is counted
/// separately and overlaps the status buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCounts {
    /// Registered agents.
    pub total: usize,
    /// Working or waiting.
    pub active: usize,
    /// Online without work.
    pub idle: usize,
    /// Agents that have completed at least one task.
    pub completed: usize,
    /// Faulted agents awaiting reset.
    pub error: usize,
    /// Offline, or in the `completed` status, which the dispatcher treats alike.
    pub offline: usize,
}

/// Per-agent line of a [`PerformanceSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformance {
    /// Agent name.
    pub name: String,
    /// Agent status at snapshot time.
    pub status: AgentStatus,
    /// Tasks delegated to or running on the agent.
    pub active_task_count: u32,
    /// See [`PerformanceSample::efficiency`].
    pub efficiency: f64,
    /// Raw counters.
    #[serde(flatten)]
    pub sample: PerformanceSample,
}

/// Process-wide rollup. Approximately consistent: agent and task state are
/// read from copies, not under the writer lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// Agent population.
    pub agents: AgentCounts,
    /// Task population.
    pub tasks: TaskCounts,
    /// Completions summed over all agents.
    pub completed_task_count: u64,
    /// Failures summed over all agents.
    pub failed_task_count: u64,
    /// Efficiency over the summed counters.
    pub overall_efficiency: f64,
    /// Completed tasks per minute since the monitor started.
    pub throughput_per_minute: f64,
    /// Mean of the last CPU readings.
    pub average_cpu_usage: f64,
    /// Mean of the last memory readings.
    pub average_memory_usage: f64,
    /// One line per registered agent, in registration order.
    pub per_agent: Vec<AgentPerformance>,
    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
}

impl PerformanceSnapshot {
    /// Dashboard payload.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "agents": self.per_agent,
            "aggregate": {
                "agents": self.agents,
                "tasks": self.tasks,
                "overall_efficiency": self.overall_efficiency,
                "throughput_per_minute": self.throughput_per_minute,
                "average_cpu_usage": self.average_cpu_usage,
                "average_memory_usage": self.average_memory_usage,
            },
            "generated_at": self.generated_at,
        })
    }
}

/// Tracks rolling performance counters for every registered agent.
pub struct PerformanceMonitor {
    samples: RwLock<HashMap<AgentId, PerformanceSample>>,
    started_at: DateTime<Utc>,
}

impl PerformanceMonitor {
    /// Create an empty monitor. Throughput is measured from this instant.
    pub fn new() -> Self {
        Self {
            samples: RwLock::new(HashMap::new()),
            started_at: Utc::now(),
        }
    }

    /// Start tracking an agent with zeroed counters.
    pub fn track(&self, agent_id: AgentId) {
        self.samples
            .write()
            .entry(agent_id)
            .or_insert_with(|| PerformanceSample::new(agent_id));
    }

    /// Drop the counters of a deregistered agent.
    pub fn forget(&self, agent_id: AgentId) {
        self.samples.write().remove(&agent_id);
    }

    /// Overwrite the resource readings of an agent.
    pub fn sample(
        &self,
        agent_id: AgentId,
        metrics: ResourceMetrics,
    ) -> CohortResult<PerformanceSample> {
        if !metrics.cpu_usage.is_finite() || metrics.cpu_usage < 0.0 {
            return Err(CohortError::Validation(format!(
                "cpu_usage must be a non-negative number, got {}",
                metrics.cpu_usage
            )));
        }
        if !metrics.memory_usage.is_finite() || metrics.memory_usage < 0.0 {
            return Err(CohortError::Validation(format!(
                "memory_usage must be a non-negative number, got {}",
                metrics.memory_usage
            )));
        }

        let mut samples = self.samples.write();
        let sample = samples
            .get_mut(&agent_id)
            .ok_or_else(|| CohortError::NotFound(format!("agent {agent_id}")))?;
        let now = Utc::now();
        sample.cpu_usage = metrics.cpu_usage;
        sample.memory_usage = metrics.memory_usage;
        sample.uptime_secs = metrics.uptime_secs.unwrap_or_else(|| {
            u64::try_from((now - sample.tracked_since).num_seconds())
                .unwrap_or(0)
        });
        sample.sampled_at = Some(now);
        Ok(sample.clone())
    }

    /// Count a completed task. Untracked agents are ignored.
    pub fn record_completed(&self, agent_id: AgentId) {
        if let Some(sample) = self.samples.write().get_mut(&agent_id) {
            sample.completed_task_count += 1;
        }
    }

    /// Count a failed task. Untracked agents are ignored.
    pub fn record_failed(&self, agent_id: AgentId) {
        if let Some(sample) = self.samples.write().get_mut(&agent_id) {
            sample.failed_task_count += 1;
        }
    }

    /// Current counters of one agent.
    pub fn get(&self, agent_id: AgentId) -> Option<PerformanceSample> {
        self.samples.read().get(&agent_id).cloned()
    }

    /// Counters of every tracked agent, in no particular order.
    pub fn samples(&self) -> Vec<PerformanceSample> {
        self.samples.read().values().cloned().collect()
    }

    /// Roll the counters up together with copies of agent and task state.
    pub fn aggregate(&self, agents: &[Agent], tasks: TaskCounts) -> PerformanceSnapshot {
        let samples = self.samples.read();
        let mut counts = AgentCounts {
            total: agents.len(),
            ..AgentCounts::default()
        };
        let mut per_agent = Vec::with_capacity(agents.len());
        let (mut completed, mut failed) = (0u64, 0u64);
        let (mut cpu, mut memory) = (0.0, 0.0);

        for agent in agents {
            match agent.status {
                AgentStatus::Working | AgentStatus::Waiting => counts.active += 1,
                AgentStatus::Idle => counts.idle += 1,
                AgentStatus::Error => counts.error += 1,
                AgentStatus::Offline | AgentStatus::Completed => counts.offline += 1,
            }
            let sample = samples
                .get(&agent.id)
                .cloned()
                .unwrap_or_else(|| PerformanceSample::new(agent.id));
            if sample.completed_task_count > 0 {
                counts.completed += 1;
            }
            completed += sample.completed_task_count;
            failed += sample.failed_task_count;
            cpu += sample.cpu_usage;
            memory += sample.memory_usage;
            per_agent.push(AgentPerformance {
                name: agent.name.clone(),
                status: agent.status,
                active_task_count: agent.active_task_count,
                efficiency: sample.efficiency(),
                sample,
            });
        }
        drop(samples);

        let now = Utc::now();
        let minutes = (now - self.started_at).num_milliseconds() as f64 / 60_000.0;
        let n = agents.len().max(1) as f64;
        PerformanceSnapshot {
            agents: counts,
            tasks,
            completed_task_count: completed,
            failed_task_count: failed,
            overall_efficiency: efficiency(completed, failed),
            throughput_per_minute: if minutes > 0.0 {
                completed as f64 / minutes
            } else {
                0.0
            },
            average_cpu_usage: cpu / n,
            average_memory_usage: memory / n,
            per_agent,
            generated_at: now,
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
