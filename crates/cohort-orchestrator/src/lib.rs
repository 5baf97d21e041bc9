//! Subagent orchestration engine.
//!
//! Registers agents with roles and capabilities, dispatches tasks to them
//! under concurrency and priority constraints, sequences dependent tasks as
//! workflows, relays messages between agents and tracks their performance.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Entry point; every command and query goes through it.
//! - [`AgentRegistry`] — Agent records and their lifecycle state machine.
//! - [`CapabilityIndex`] — Tag-to-agent index used for agent selection.
//! - [`Dispatcher`] — Pending queue and the only writer of task state.
//! - [`WorkflowEngine`] — Dependency graphs of tasks with per-step retries.
//! - [`CommunicationBus`] — Append-only message log with per-agent mailboxes.
//! - [`PerformanceMonitor`] — Per-agent counters and process-wide rollups.
//! - [`TickLoop`] — Background dispatch loop (interval plus event wakeups).

/// Inter-agent messaging.
pub mod bus;
/// Tag-to-agent index for eligibility queries.
pub mod capability;
/// Complexity classification strategies for auto-classified tasks.
pub mod classifier;
/// Command and query surface.
pub mod command;
/// TOML configuration.
pub mod config;
/// Pending queue, delegation and task settlement.
pub mod dispatcher;
/// Orchestrator engine tying the components together.
pub mod engine;
/// State-change events.
pub mod events;
/// Executor seam for running delegated tasks.
pub mod executor;
/// Agent performance tracking.
pub mod monitor;
/// Agent records and lifecycle.
pub mod registry;
/// Background dispatch loop.
pub mod scheduler;
/// Shared types (Agent, Task, specs, filters).
pub mod types;
/// Workflow definitions and execution.
pub mod workflow;

pub use bus::{CommunicationBus, MailboxIter, Message};
pub use capability::CapabilityIndex;
pub use classifier::{
    Classification, Complexity, ComplexityClassifier, FnClassifier, KeywordClassifier,
    LengthClassifier,
};
pub use command::{Command, CommandOutput, Query, QueryOutput};
pub use config::{ClassifierKind, CohortConfig, DispatchMode, OrchestratorConfig};
pub use dispatcher::{Dispatcher, TaskCounts};
pub use engine::{Orchestrator, TickReport};
pub use events::{EventBus, OrchestratorEvent};
pub use executor::{AgentExecutor, Delegation, ExecutionOutcome};
pub use monitor::{
    AgentCounts, PerformanceMonitor, PerformanceSample, PerformanceSnapshot, ResourceMetrics,
};
pub use registry::{AgentRegistry, DEFAULT_MAX_CONCURRENT_TASKS, DEFAULT_SPECIALIZATIONS};
pub use scheduler::TickLoop;
pub use types::{
    Agent, AgentFilter, AgentRole, AgentSpec, AgentStatus, Priority, Task, TaskFilter, TaskSpec,
    TaskStatus,
};
pub use workflow::{
    StepSpec, Workflow, WorkflowEngine, WorkflowSpec, WorkflowStatus, WorkflowStep,
};
