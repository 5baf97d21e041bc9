#![allow(clippy::unwrap_used, clippy::expect_used)]

use cohort_core::*;
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// 1. Ids survive a JSON roundtrip inside a larger document
// ---------------------------------------------------------------------------

#[test]
fn ids_roundtrip_inside_json_documents() {
    let agent = AgentId::new();
    let task = TaskId::new();
    let doc = serde_json::json!({ "agent": agent, "task": task });

    let agent_back: AgentId = serde_json::from_value(doc["agent"].clone()).unwrap();
    let task_back: TaskId = serde_json::from_value(doc["task"].clone()).unwrap();
    assert_eq!(agent_back, agent);
    assert_eq!(task_back, task);
}

// ---------------------------------------------------------------------------
// 2. Ids are usable as map keys
// ---------------------------------------------------------------------------

#[test]
fn ids_hash_and_compare() {
    let ids: HashSet<AgentId> = (0..100).map(|_| AgentId::new()).collect();
    assert_eq!(ids.len(), 100);

    let id = WorkflowId::new();
    let copy = WorkflowId::from_uuid(id.as_uuid());
    assert_eq!(id, copy);
}

// ---------------------------------------------------------------------------
// 3. Error display and structured body
// ---------------------------------------------------------------------------

#[test]
fn error_messages_are_prefixed_by_class() {
    let cases = vec![
        (CohortError::Validation("bad role".into()), "Validation error: bad role"),
        (CohortError::NotFound("agent x".into()), "Not found: agent x"),
        (CohortError::InvalidState("done".into()), "Invalid state: done"),
        (CohortError::Conflict("busy".into()), "Conflict: busy"),
        (CohortError::Config("missing".into()), "Config error: missing"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn error_body_serializes() {
    let body = CohortError::NotFound("task 1".into()).to_body();
    let json = serde_json::to_value(&body).unwrap();
    assert_eq!(json["kind"], "not_found");
    assert_eq!(json["message"], "Not found: task 1");
}

#[test]
fn io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: CohortError = io.into();
    assert_eq!(err.kind(), "io");
}
