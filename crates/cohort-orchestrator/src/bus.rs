use chrono::{DateTime, Utc};
use cohort_core::{AgentId, CohortError, CohortResult, MessageId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A point-to-point message between two agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id assigned on send.
    pub id: MessageId,
    /// Sender.
    pub from_agent_id: AgentId,
    /// Recipient.
    pub to_agent_id: AgentId,
    /// Opaque JSON body.
    pub payload: serde_json::Value,
    /// When the message entered the log.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Mailbox {
    /// Positions in the shared log, in delivery order.
    entries: Vec<usize>,
    committed: usize,
}

#[derive(Debug, Default)]
struct BusState {
    log: Vec<Arc<Message>>,
    mailboxes: HashMap<AgentId, Mailbox>,
}

/// Append-only message log with one mailbox per registered agent.
///
/// Mailbox offsets are positions within the recipient's own mailbox and
/// never shift, so a reader can resume from any offset it has seen.
#[derive(Debug, Clone, Default)]
pub struct CommunicationBus {
    state: Arc<RwLock<BusState>>,
}

impl CommunicationBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Give an agent an empty mailbox. Existing mailboxes are kept.
    pub fn open_mailbox(&self, agent_id: AgentId) {
        self.state.write().mailboxes.entry(agent_id).or_default();
    }

    /// Drop an agent's mailbox. Delivered messages stay in the log.
    pub fn close_mailbox(&self, agent_id: AgentId) {
        self.state.write().mailboxes.remove(&agent_id);
    }

    /// Whether the agent can send and receive.
    pub fn has_mailbox(&self, agent_id: AgentId) -> bool {
        self.state.read().mailboxes.contains_key(&agent_id)
    }

    /// Append a message and deliver it to the recipient's mailbox.
    ///
    /// Both ends must have an open mailbox.
    pub fn send(
        &self,
        from: AgentId,
        to: AgentId,
        payload: serde_json::Value,
    ) -> CohortResult<Arc<Message>> {
        let mut state = self.state.write();
        if !state.mailboxes.contains_key(&from) {
            return Err(CohortError::NotFound(format!("agent {from}")));
        }
        if !state.mailboxes.contains_key(&to) {
            return Err(CohortError::NotFound(format!("agent {to}")));
        }

        let message = Arc::new(Message {
            id: MessageId::new(),
            from_agent_id: from,
            to_agent_id: to,
            payload,
            timestamp: Utc::now(),
        });
        let position = state.log.len();
        state.log.push(Arc::clone(&message));
        if let Some(mailbox) = state.mailboxes.get_mut(&to) {
            mailbox.entries.push(position);
        }
        debug!(message_id = %message.id, from = %from, to = %to, "Message sent");
        Ok(message)
    }

    /// Lazily iterate an agent's mailbox from `since`, or from its committed
    /// offset when `since` is `None`.
    ///
    /// The iterator ends at the mailbox length observed at call time;
    /// messages delivered later need a new call.
    pub fn receive(&self, agent_id: AgentId, since: Option<usize>) -> CohortResult<MailboxIter> {
        let state = self.state.read();
        let mailbox = state
            .mailboxes
            .get(&agent_id)
            .ok_or_else(|| CohortError::NotFound(format!("agent {agent_id}")))?;
        let end = mailbox.entries.len();
        let start = since.unwrap_or(mailbox.committed).min(end);
        Ok(MailboxIter {
            state: Arc::clone(&self.state),
            agent_id,
            next: start,
            end,
        })
    }

    /// Record that the agent has consumed its mailbox up to `offset`.
    ///
    /// The committed offset only moves forward and never past the mailbox end.
    pub fn commit(&self, agent_id: AgentId, offset: usize) -> CohortResult<usize> {
        let mut state = self.state.write();
        let mailbox = state
            .mailboxes
            .get_mut(&agent_id)
            .ok_or_else(|| CohortError::NotFound(format!("agent {agent_id}")))?;
        mailbox.committed = mailbox.committed.max(offset.min(mailbox.entries.len()));
        Ok(mailbox.committed)
    }

    /// Messages delivered to the agent past its committed offset.
    pub fn unread(&self, agent_id: AgentId) -> CohortResult<usize> {
        let state = self.state.read();
        let mailbox = state
            .mailboxes
            .get(&agent_id)
            .ok_or_else(|| CohortError::NotFound(format!("agent {agent_id}")))?;
        Ok(mailbox.entries.len() - mailbox.committed)
    }

    /// Total messages ever sent.
    pub fn log_len(&self) -> usize {
        self.state.read().log.len()
    }
}

/// Iterator over a mailbox snapshot. See [`CommunicationBus::receive`].
#[derive(Debug)]
pub struct MailboxIter {
    state: Arc<RwLock<BusState>>,
    agent_id: AgentId,
    next: usize,
    end: usize,
}

impl MailboxIter {
    /// Mailbox offset of the next message; pass it back as `since` to resume.
    pub fn offset(&self) -> usize {
        self.next
    }
}

impl Iterator for MailboxIter {
    type Item = Arc<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let state = self.state.read();
        let position = *state.mailboxes.get(&self.agent_id)?.entries.get(self.next)?;
        let message = state.log.get(position).cloned()?;
        self.next += 1;
        Some(message)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.end - self.next))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bus_with(n: usize) -> (CommunicationBus, Vec<AgentId>) {
        let bus = CommunicationBus::new();
        let ids: Vec<AgentId> = (0..n).map(|_| AgentId::new()).collect();
        for id in &ids {
            bus.open_mailbox(*id);
        }
        (bus, ids)
    }

    #[test]
    fn test_send_and_receive_in_order() {
        let (bus, ids) = bus_with(2);
        for i in 0..3 {
            bus.send(ids[0], ids[1], json!({"n": i})).unwrap();
        }
        let got: Vec<serde_json::Value> = bus
            .receive(ids[1], None)
            .unwrap()
            .map(|m| m.payload.clone())
            .collect();
        assert_eq!(
            got,
            vec![json!({"n": 0}), json!({"n": 1}), json!({"n": 2})]
        );
        assert_eq!(bus.receive(ids[0], None).unwrap().count(), 0);
        assert_eq!(bus.log_len(), 3);
    }

    #[test]
    fn test_unknown_agents_rejected() {
        let (bus, ids) = bus_with(1);
        let stranger = AgentId::new();
        assert!(matches!(
            bus.send(ids[0], stranger, json!(null)).unwrap_err(),
            CohortError::NotFound(_)
        ));
        assert!(matches!(
            bus.send(stranger, ids[0], json!(null)).unwrap_err(),
            CohortError::NotFound(_)
        ));
        assert!(bus.receive(stranger, None).is_err());
        assert_eq!(bus.log_len(), 0);
    }

    #[test]
    fn test_resume_from_offset() {
        let (bus, ids) = bus_with(2);
        bus.send(ids[0], ids[1], json!(1)).unwrap();
        bus.send(ids[0], ids[1], json!(2)).unwrap();

        let mut iter = bus.receive(ids[1], Some(0)).unwrap();
        assert_eq!(iter.next().unwrap().payload, json!(1));
        let offset = iter.offset();
        assert_eq!(offset, 1);

        bus.send(ids[0], ids[1], json!(3)).unwrap();
        let rest: Vec<_> = bus
            .receive(ids[1], Some(offset))
            .unwrap()
            .map(|m| m.payload.clone())
            .collect();
        assert_eq!(rest, vec![json!(2), json!(3)]);
    }

    #[test]
    fn test_snapshot_end_is_fixed() {
        let (bus, ids) = bus_with(2);
        bus.send(ids[0], ids[1], json!(1)).unwrap();
        let iter = bus.receive(ids[1], None).unwrap();
        bus.send(ids[0], ids[1], json!(2)).unwrap();
        assert_eq!(iter.count(), 1);
    }

    #[test]
    fn test_commit_and_unread() {
        let (bus, ids) = bus_with(2);
        for i in 0..4 {
            bus.send(ids[0], ids[1], json!(i)).unwrap();
        }
        assert_eq!(bus.unread(ids[1]).unwrap(), 4);
        assert_eq!(bus.commit(ids[1], 3).unwrap(), 3);
        assert_eq!(bus.commit(ids[1], 1).unwrap(), 3);
        assert_eq!(bus.commit(ids[1], 99).unwrap(), 4);
        assert_eq!(bus.unread(ids[1]).unwrap(), 0);
        assert_eq!(bus.receive(ids[1], None).unwrap().count(), 0);
    }

    #[test]
    fn test_close_mailbox_keeps_log() {
        let (bus, ids) = bus_with(2);
        bus.send(ids[0], ids[1], json!(1)).unwrap();
        bus.close_mailbox(ids[1]);
        assert!(!bus.has_mailbox(ids[1]));
        assert!(bus.send(ids[0], ids[1], json!(2)).is_err());
        assert_eq!(bus.log_len(), 1);
    }
}
