use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{CohortError, CohortResult};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// The underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = CohortError;

            fn from_str(s: &str) -> CohortResult<Self> {
                Uuid::parse_str(s).map(Self).map_err(|e| {
                    CohortError::Validation(format!("invalid {} id '{s}': {e}", $label))
                })
            }
        }
    };
}

entity_id!(
    /// Identifier of a registered agent.
    AgentId,
    "agent"
);
entity_id!(
    /// Identifier of a task owned by the dispatcher.
    TaskId,
    "task"
);
entity_id!(
    /// Identifier of a workflow.
    WorkflowId,
    "workflow"
);
entity_id!(
    /// Identifier of a bus message. Consumers deduplicate on it.
    MessageId,
    "message"
);
