use crate::dispatcher::{Dispatcher, Settlement};
use crate::registry::AgentRegistry;
use crate::types::{Task, TaskSpec, TaskStatus, TaskTemplate};
use chrono::{DateTime, Utc};
use cohort_core::{CohortError, CohortResult, TaskId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::{info, warn};

/// One step of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Unique within the workflow; dependencies refer to steps by name.
    pub name: String,
    /// Task submitted for this step.
    pub task: TaskSpec,
    /// Names of steps that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Extra submissions allowed after a failure. 0 means no retry.
    #[serde(default)]
    pub max_retries: u32,
}

impl StepSpec {
    /// A step with no dependencies and no retries.
    pub fn new(name: impl Into<String>, task: TaskSpec) -> Self {
        Self {
            name: name.into(),
            task,
            depends_on: Vec::new(),
            max_retries: 0,
        }
    }

    /// Run after the named steps.
    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Allow up to `max_retries` resubmissions after a failure.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// A workflow definition: a dependency graph of task templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Display name. Must not be blank.
    pub name: String,
    /// At least one step. Names are unique.
    pub steps: Vec<StepSpec>,
}

/// Aggregate status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Nothing has started executing yet.
    Pending,
    /// At least one step is executing or has completed.
    Running,
    /// Every step completed.
    Completed,
    /// A step failed (after retries) or was cancelled underneath the workflow.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

impl WorkflowStatus {
    /// Completed, failed or cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Runtime state of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step name.
    pub name: String,
    /// Resolved task definition, stamped anew on every attempt.
    pub template: TaskTemplate,
    /// Names of the steps this one waits for.
    pub depends_on: Vec<String>,
    /// `pending` until submitted, then mirrors the current task.
    pub status: TaskStatus,
    /// Task of the latest attempt.
    pub task_id: Option<TaskId>,
    /// Tasks submitted so far for this step.
    pub attempts: u32,
    /// Resubmissions allowed after a failure.
    pub max_retries: u32,
    /// Result of the completed task, passed on to dependents as input.
    pub output: Option<serde_json::Value>,
    #[serde(skip)]
    deps: Vec<usize>,
    #[serde(skip)]
    dependents: Vec<usize>,
    /// Dependencies not yet completed.
    #[serde(skip)]
    remaining: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct StepCounts {
    started: usize,
    completed: usize,
    failed: usize,
    cancelled: usize,
}

impl StepCounts {
    fn slot(&mut self, status: TaskStatus) -> Option<&mut usize> {
        match status {
            TaskStatus::Pending => None,
            TaskStatus::Delegated | TaskStatus::Running => Some(&mut self.started),
            TaskStatus::Completed => Some(&mut self.completed),
            TaskStatus::Failed => Some(&mut self.failed),
            TaskStatus::Cancelled => Some(&mut self.cancelled),
        }
    }
}

/// A workflow and the state of its steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique id assigned at creation.
    pub id: WorkflowId,
    /// Display name.
    pub name: String,
    /// Aggregate status derived from the steps.
    pub status: WorkflowStatus,
    /// Steps in definition order.
    pub steps: Vec<WorkflowStep>,
    /// When the workflow was created.
    pub created_at: DateTime<Utc>,
    /// When the workflow reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    counts: StepCounts,
    #[serde(skip)]
    cancelled_by_caller: bool,
}

impl Workflow {
    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    fn set_step_status(&mut self, idx: usize, status: TaskStatus) {
        let old = self.steps[idx].status;
        if old == status {
            return;
        }
        if let Some(n) = self.counts.slot(old) {
            *n = n.saturating_sub(1);
        }
        if let Some(n) = self.counts.slot(status) {
            *n += 1;
        }
        self.steps[idx].status = status;
    }

    /// Derive the status from the step counters. Returns whether it moved.
    fn recompute(&mut self) -> bool {
        let c = self.counts;
        let status = if self.cancelled_by_caller {
            WorkflowStatus::Cancelled
        } else if c.failed > 0 || c.cancelled > 0 {
            WorkflowStatus::Failed
        } else if c.completed == self.steps.len() {
            WorkflowStatus::Completed
        } else if c.started > 0 || c.completed > 0 {
            WorkflowStatus::Running
        } else {
            WorkflowStatus::Pending
        };
        if status == self.status {
            return false;
        }
        self.status = status;
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        true
    }
}

/// What a task transition did to its workflow.
#[derive(Debug, Clone)]
pub struct WorkflowUpdate {
    /// Workflow the task belongs to.
    pub workflow_id: WorkflowId,
    /// Workflow status after the transition.
    pub status: WorkflowStatus,
    /// Whether the transition moved the workflow status.
    pub status_changed: bool,
    /// Tasks newly handed to the dispatcher (ready dependents or retries).
    pub submitted: Vec<Task>,
    /// Steps cancelled because an ancestor failed.
    pub cancelled_steps: Vec<String>,
}

/// Owns every [`Workflow`] and drives its steps through the dispatcher.
///
/// Each step keeps a counter of unfinished dependencies, so a task
/// transition touches only the step and its direct dependents.
#[derive(Debug, Default)]
pub struct WorkflowEngine {
    workflows: HashMap<WorkflowId, Workflow>,
    by_task: HashMap<TaskId, (WorkflowId, usize)>,
    order: Vec<WorkflowId>,
}

impl WorkflowEngine {
    /// Create an engine with no workflows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the definition, store the workflow and submit its root steps.
    ///
    /// Nothing is submitted if validation fails.
    pub fn create<F>(
        &mut self,
        spec: WorkflowSpec,
        resolve: F,
        dispatcher: &mut Dispatcher,
    ) -> CohortResult<(Workflow, Vec<Task>)>
    where
        F: Fn(&TaskSpec) -> CohortResult<TaskTemplate>,
    {
        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err(CohortError::Validation(
                "workflow name must not be empty".into(),
            ));
        }
        if spec.steps.is_empty() {
            return Err(CohortError::Validation(format!(
                "workflow '{name}' has no steps"
            )));
        }

        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (idx, step) in spec.steps.iter().enumerate() {
            let step_name = step.name.trim();
            if step_name.is_empty() {
                return Err(CohortError::Validation(format!(
                    "workflow '{name}': step {idx} has no name"
                )));
            }
            if positions.insert(step_name, idx).is_some() {
                return Err(CohortError::Validation(format!(
                    "workflow '{name}': duplicate step '{step_name}'"
                )));
            }
        }

        let mut steps = Vec::with_capacity(spec.steps.len());
        for step in &spec.steps {
            let mut deps = Vec::new();
            for dep in &step.depends_on {
                let dep = dep.trim();
                let &pos = positions.get(dep).ok_or_else(|| {
                    CohortError::Validation(format!(
                        "workflow '{name}': step '{}' depends on unknown step '{dep}'",
                        step.name.trim()
                    ))
                })?;
                if !deps.contains(&pos) {
                    deps.push(pos);
                }
            }
            steps.push(WorkflowStep {
                name: step.name.trim().to_string(),
                template: resolve(&step.task)?,
                depends_on: deps
                    .iter()
                    .map(|&d| spec.steps[d].name.trim().to_string())
                    .collect(),
                status: TaskStatus::Pending,
                task_id: None,
                attempts: 0,
                max_retries: step.max_retries,
                output: None,
                remaining: deps.len(),
                deps,
                dependents: Vec::new(),
            });
        }

        for idx in 0..steps.len() {
            for dep in steps[idx].deps.clone() {
                steps[dep].dependents.push(idx);
            }
        }

        if has_cycle(&steps) {
            return Err(CohortError::Validation(format!(
                "workflow '{name}': dependency cycle detected"
            )));
        }

        let mut workflow = Workflow {
            id: WorkflowId::new(),
            name,
            status: WorkflowStatus::Pending,
            steps,
            created_at: Utc::now(),
            completed_at: None,
            counts: StepCounts::default(),
            cancelled_by_caller: false,
        };

        let roots: Vec<usize> = (0..workflow.steps.len())
            .filter(|&i| workflow.steps[i].remaining == 0)
            .collect();
        let mut submitted = Vec::with_capacity(roots.len());
        for idx in roots {
            let task = submit_step(&mut workflow, idx, &mut self.by_task, dispatcher);
            submitted.push(task);
        }

        info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            steps = workflow.steps.len(),
            roots = submitted.len(),
            "Workflow created"
        );
        self.order.push(workflow.id);
        self.workflows.insert(workflow.id, workflow.clone());
        Ok((workflow, submitted))
    }

    /// Mirror a task transition into its workflow, if the task belongs to one.
    ///
    /// Completion unlocks dependents whose counters reach zero. A failure is
    /// retried while the step has budget left; otherwise it, like a
    /// cancellation, cancels every descendant step and fails the workflow.
    pub fn on_task_transition(
        &mut self,
        task: &Task,
        dispatcher: &mut Dispatcher,
    ) -> Option<WorkflowUpdate> {
        let &(workflow_id, idx) = self.by_task.get(&task.id)?;
        let workflow = self.workflows.get_mut(&workflow_id)?;
        let step = &workflow.steps[idx];
        if step.task_id != Some(task.id) || step.status.is_terminal() {
            return None;
        }

        let mut submitted = Vec::new();
        let mut cancelled_steps = Vec::new();
        let halted = workflow.status.is_terminal();

        match task.status {
            TaskStatus::Pending | TaskStatus::Delegated | TaskStatus::Running => {
                workflow.set_step_status(idx, task.status);
            }
            TaskStatus::Completed => {
                workflow.steps[idx].output = task.result.clone();
                workflow.set_step_status(idx, TaskStatus::Completed);
                for dependent in workflow.steps[idx].dependents.clone() {
                    let d = &mut workflow.steps[dependent];
                    d.remaining = d.remaining.saturating_sub(1);
                    if d.remaining > 0 || d.task_id.is_some() || d.status.is_terminal() {
                        continue;
                    }
                    if halted {
                        workflow.set_step_status(dependent, TaskStatus::Cancelled);
                        cancelled_steps.push(workflow.steps[dependent].name.clone());
                    } else {
                        let task = submit_step(workflow, dependent, &mut self.by_task, dispatcher);
                        submitted.push(task);
                    }
                }
            }
            TaskStatus::Failed => {
                let step = &workflow.steps[idx];
                if !halted && step.attempts <= step.max_retries {
                    warn!(
                        workflow_id = %workflow_id,
                        step = %step.name,
                        attempt = step.attempts,
                        "Workflow step failed, retrying"
                    );
                    workflow.set_step_status(idx, TaskStatus::Pending);
                    submitted.push(submit_step(workflow, idx, &mut self.by_task, dispatcher));
                } else {
                    workflow.set_step_status(idx, TaskStatus::Failed);
                    cancelled_steps = cancel_descendants(workflow, idx);
                }
            }
            TaskStatus::Cancelled => {
                workflow.set_step_status(idx, TaskStatus::Cancelled);
                cancelled_steps = cancel_descendants(workflow, idx);
            }
        }

        let status_changed = workflow.recompute();
        if status_changed {
            info!(workflow_id = %workflow_id, status = %workflow.status, "Workflow status changed");
        }
        Some(WorkflowUpdate {
            workflow_id,
            status: workflow.status,
            status_changed,
            submitted,
            cancelled_steps,
        })
    }

    /// Cancel every unfinished step, including in-flight tasks.
    pub fn cancel(
        &mut self,
        id: WorkflowId,
        dispatcher: &mut Dispatcher,
        registry: &mut AgentRegistry,
    ) -> CohortResult<(Workflow, Vec<Settlement>)> {
        let workflow = self
            .workflows
            .get_mut(&id)
            .ok_or_else(|| CohortError::NotFound(format!("workflow {id}")))?;
        if workflow.status.is_terminal() {
            return Err(CohortError::InvalidState(format!(
                "workflow {id} is already {}",
                workflow.status
            )));
        }

        let mut settlements = Vec::new();
        for idx in 0..workflow.steps.len() {
            if workflow.steps[idx].status.is_terminal() {
                continue;
            }
            if let Some(task_id) = workflow.steps[idx].task_id {
                let live = dispatcher
                    .get(task_id)
                    .is_some_and(|t| !t.status.is_terminal());
                if live {
                    settlements.push(dispatcher.cancel(task_id, registry)?);
                }
            }
            workflow.set_step_status(idx, TaskStatus::Cancelled);
        }
        workflow.cancelled_by_caller = true;
        workflow.recompute();
        info!(workflow_id = %id, "Workflow cancelled");
        Ok((workflow.clone(), settlements))
    }

    /// Look up a workflow by id.
    pub fn get(&self, id: WorkflowId) -> Option<&Workflow> {
        self.workflows.get(&id)
    }

    /// All workflows in creation order.
    pub fn list(&self) -> Vec<Workflow> {
        self.order
            .iter()
            .filter_map(|id| self.workflows.get(id))
            .cloned()
            .collect()
    }

    /// Number of workflows.
    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    /// Whether no workflow exists.
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

/// Stamp a task for the step from its template and hand it to the dispatcher.
fn submit_step(
    workflow: &mut Workflow,
    idx: usize,
    by_task: &mut HashMap<TaskId, (WorkflowId, usize)>,
    dispatcher: &mut Dispatcher,
) -> Task {
    let inputs: BTreeMap<String, serde_json::Value> = workflow.steps[idx]
        .deps
        .iter()
        .map(|&d| {
            let dep = &workflow.steps[d];
            (
                dep.name.clone(),
                dep.output.clone().unwrap_or(serde_json::Value::Null),
            )
        })
        .collect();

    let step = &mut workflow.steps[idx];
    let task = Task::from_template(&step.template)
        .with_inputs(inputs)
        .in_workflow(workflow.id);
    step.attempts += 1;
    step.task_id = Some(task.id);
    by_task.insert(task.id, (workflow.id, idx));
    dispatcher.submit(task.clone());
    task
}

/// Cancel every not-yet-finished step downstream of `idx`.
fn cancel_descendants(workflow: &mut Workflow, idx: usize) -> Vec<String> {
    let mut cancelled = Vec::new();
    let mut seen = HashSet::new();
    let mut queue: VecDeque<usize> = workflow.steps[idx].dependents.iter().copied().collect();
    while let Some(next) = queue.pop_front() {
        if !seen.insert(next) {
            continue;
        }
        if !workflow.steps[next].status.is_terminal() {
            workflow.set_step_status(next, TaskStatus::Cancelled);
            cancelled.push(workflow.steps[next].name.clone());
        }
        queue.extend(workflow.steps[next].dependents.iter().copied());
    }
    cancelled
}

/// Depth-first search for a back edge in the step dependency graph.
fn has_cycle(steps: &[WorkflowStep]) -> bool {
    fn visit(idx: usize, steps: &[WorkflowStep], state: &mut [u8]) -> bool {
        match state[idx] {
            1 => return true,  // back edge = cycle
            2 => return false, // already processed
            _ => {}
        }
        state[idx] = 1;
        for &dep in &steps[idx].deps {
            if visit(dep, steps, state) {
                return true;
            }
        }
        state[idx] = 2;
        false
    }

    let mut state = vec![0u8; steps.len()];
    (0..steps.len()).any(|i| visit(i, steps, &mut state))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{normalize_tags, AgentRole, AgentSpec, Priority};
    use cohort_core::AgentId;
    use serde_json::json;

    fn resolve(spec: &TaskSpec) -> CohortResult<TaskTemplate> {
        Ok(TaskTemplate {
            title: spec.title.clone(),
            description: spec.description.clone(),
            required_capabilities: normalize_tags("capability", &spec.required_capabilities)?,
            priority: spec.priority.unwrap_or_default(),
            min_agent_priority: Priority::Low,
        })
    }

    fn setup() -> (AgentRegistry, AgentId, Dispatcher, WorkflowEngine) {
        let mut reg = AgentRegistry::default();
        let spec = AgentSpec::new("w", AgentRole::Worker).with_max_concurrent_tasks(5);
        let agent = reg.register(spec).unwrap();
        (reg, agent.id, Dispatcher::default(), WorkflowEngine::new())
    }

    fn step(name: &str) -> StepSpec {
        StepSpec::new(name, TaskSpec::new(name))
    }

    fn spec(steps: Vec<StepSpec>) -> WorkflowSpec {
        WorkflowSpec {
            name: "wf".into(),
            steps,
        }
    }

    /// Complete a running task and feed the transition back to the engine.
    fn finish(
        engine: &mut WorkflowEngine,
        d: &mut Dispatcher,
        reg: &mut AgentRegistry,
        agent: AgentId,
        task: TaskId,
        result: serde_json::Value,
    ) -> WorkflowUpdate {
        let s = d.complete(task, agent, result, reg).unwrap();
        engine.on_task_transition(&s.task, d).unwrap()
    }

    #[test]
    fn test_validation_errors() {
        let (_, _, mut d, mut engine) = setup();
        let cases = vec![
            spec(vec![]),
            spec(vec![step("a"), step("a")]),
            spec(vec![step("a").after(["missing"])]),
            spec(vec![step("a").after(["b"]), step("b").after(["a"])]),
            spec(vec![step("a").after(["a"])]),
        ];
        for case in cases {
            let err = engine.create(case, resolve, &mut d).unwrap_err();
            assert!(matches!(err, CohortError::Validation(_)), "{err}");
        }
        assert_eq!(d.pending_count(), 0);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_only_roots_are_submitted() {
        let (_, _, mut d, mut engine) = setup();
        let (wf, submitted) = engine
            .create(
                spec(vec![step("a"), step("b").after(["a"]), step("c")]),
                resolve,
                &mut d,
            )
            .unwrap();
        assert_eq!(submitted.len(), 2);
        assert_eq!(d.pending_count(), 2);
        assert_eq!(wf.status, WorkflowStatus::Pending);
        assert!(wf.step("b").unwrap().task_id.is_none());
    }

    #[test]
    fn test_dependent_runs_after_dependency_with_inputs() {
        let (mut reg, agent, mut d, mut engine) = setup();
        let (wf, submitted) = engine
            .create(
                spec(vec![step("a"), step("b").after(["a"])]),
                resolve,
                &mut d,
            )
            .unwrap();
        let a = submitted[0].id;

        for assignment in d.tick(&mut reg) {
            engine.on_task_transition(&assignment.task, &mut d);
        }
        assert_eq!(engine.get(wf.id).unwrap().status, WorkflowStatus::Running);

        let output = json!({"spec": "done"});
        let update = finish(&mut engine, &mut d, &mut reg, agent, a, output.clone());
        assert_eq!(update.submitted.len(), 1);
        let b = &update.submitted[0];
        assert_eq!(b.inputs.get("a"), Some(&output));
        assert_eq!(b.workflow_id, Some(wf.id));

        std::thread::sleep(std::time::Duration::from_millis(2));
        d.tick(&mut reg);
        let update = finish(&mut engine, &mut d, &mut reg, agent, b.id, json!(null));
        assert_eq!(update.status, WorkflowStatus::Completed);
        assert!(update.status_changed);

        let a_done = d.get(a).unwrap().completed_at.unwrap();
        let b_done = d.get(b.id).unwrap().completed_at.unwrap();
        assert!(b_done > a_done);
        assert!(engine.get(wf.id).unwrap().completed_at.is_some());
    }

    #[test]
    fn test_failure_cancels_descendants_only() {
        let (mut reg, agent, mut d, mut engine) = setup();
        let (wf, submitted) = engine
            .create(
                spec(vec![
                    step("root"),
                    step("sibling"),
                    step("child").after(["root"]),
                    step("grandchild").after(["child", "sibling"]),
                ]),
                resolve,
                &mut d,
            )
            .unwrap();
        let (root, sibling) = (submitted[0].id, submitted[1].id);
        d.tick(&mut reg);

        finish(&mut engine, &mut d, &mut reg, agent, sibling, json!(1));
        let s = d.fail(root, agent, "boom", false, &mut reg).unwrap();
        let update = engine.on_task_transition(&s.task, &mut d).unwrap();

        assert_eq!(update.status, WorkflowStatus::Failed);
        assert_eq!(update.cancelled_steps, vec!["child", "grandchild"]);
        let wf = engine.get(wf.id).unwrap();
        assert_eq!(wf.step("root").unwrap().status, TaskStatus::Failed);
        assert_eq!(wf.step("sibling").unwrap().status, TaskStatus::Completed);
        assert_eq!(wf.step("child").unwrap().status, TaskStatus::Cancelled);
        assert_eq!(
            wf.step("grandchild").unwrap().status,
            TaskStatus::Cancelled
        );
        assert_eq!(d.pending_count(), 0);
    }

    #[test]
    fn test_retry_resubmits_until_budget_exhausted() {
        let (mut reg, agent, mut d, mut engine) = setup();
        let (wf, submitted) = engine
            .create(spec(vec![step("flaky").with_retries(1)]), resolve, &mut d)
            .unwrap();
        d.tick(&mut reg);

        let first = submitted[0].id;
        let s = d.fail(first, agent, "once", false, &mut reg).unwrap();
        let update = engine.on_task_transition(&s.task, &mut d).unwrap();
        assert_eq!(update.submitted.len(), 1);
        assert_ne!(update.status, WorkflowStatus::Failed);
        let retry = update.submitted[0].id;

        // stale transitions of the first attempt are ignored
        assert!(engine.on_task_transition(&s.task, &mut d).is_none());

        d.tick(&mut reg);
        let s = d.fail(retry, agent, "twice", false, &mut reg).unwrap();
        let update = engine.on_task_transition(&s.task, &mut d).unwrap();
        assert!(update.submitted.is_empty());
        assert_eq!(update.status, WorkflowStatus::Failed);
        assert_eq!(engine.get(wf.id).unwrap().steps[0].attempts, 2);
    }

    #[test]
    fn test_cancel_workflow() {
        let (mut reg, agent, mut d, mut engine) = setup();
        let (wf, _) = engine
            .create(
                spec(vec![step("a"), step("b").after(["a"])]),
                resolve,
                &mut d,
            )
            .unwrap();
        d.tick(&mut reg);
        assert_eq!(reg.get(agent).unwrap().active_task_count, 1);

        let (cancelled, settlements) = engine.cancel(wf.id, &mut d, &mut reg).unwrap();
        assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
        assert_eq!(settlements.len(), 1);
        for step in &cancelled.steps {
            assert_eq!(step.status, TaskStatus::Cancelled);
        }
        assert_eq!(reg.get(agent).unwrap().active_task_count, 0);

        assert!(matches!(
            engine.cancel(wf.id, &mut d, &mut reg).unwrap_err(),
            CohortError::InvalidState(_)
        ));
    }

    #[test]
    fn test_list_in_creation_order() {
        let (_, _, mut d, mut engine) = setup();
        let (first, _) = engine
            .create(spec(vec![step("a")]), resolve, &mut d)
            .unwrap();
        let (second, _) = engine
            .create(spec(vec![step("a")]), resolve, &mut d)
            .unwrap();
        let ids: Vec<WorkflowId> = engine.list().iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }
}
