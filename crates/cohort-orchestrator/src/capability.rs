use crate::types::{Agent, Priority};
use cohort_core::AgentId;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

/// Inverted index from capability tag to the agents declaring it.
///
/// Entries are keyed by `(registration_seq, id)` so every candidate list comes
/// out in registration order without sorting. Load and status are not indexed;
/// they are read from the live agent records at query time.
#[derive(Debug, Default)]
pub struct CapabilityIndex {
    by_tag: HashMap<String, BTreeSet<(u64, AgentId)>>,
    all: BTreeSet<(u64, AgentId)>,
}

impl CapabilityIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the whole index from a set of agents.
    pub fn rebuild<'a>(agents: impl IntoIterator<Item = &'a Agent>) -> Self {
        let mut index = Self::new();
        for agent in agents {
            index.insert(agent);
        }
        index
    }

    /// Index an agent under each of its capabilities.
    pub fn insert(&mut self, agent: &Agent) {
        let key = (agent.registration_seq, agent.id);
        self.all.insert(key);
        for tag in &agent.capabilities {
            self.by_tag.entry(tag.clone()).or_default().insert(key);
        }
    }

    /// Drop an agent from every tag it was indexed under.
    pub fn remove(&mut self, agent: &Agent) {
        let key = (agent.registration_seq, agent.id);
        self.all.remove(&key);
        for tag in &agent.capabilities {
            if let Some(set) = self.by_tag.get_mut(tag) {
                set.remove(&key);
                if set.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
    }

    /// Agents whose capabilities are a superset of `required`, in registration order.
    pub fn candidates(&self, required: &BTreeSet<String>) -> Vec<AgentId> {
        if required.is_empty() {
            return self.all.iter().map(|(_, id)| *id).collect();
        }

        let mut sets = Vec::with_capacity(required.len());
        for tag in required {
            match self.by_tag.get(tag) {
                Some(set) => sets.push(set),
                None => return Vec::new(),
            }
        }
        sets.sort_by_key(|s| s.len());

        let Some((smallest, rest)) = sets.split_first() else {
            return Vec::new();
        };
        smallest
            .iter()
            .filter(|key| rest.iter().all(|s| s.contains(*key)))
            .map(|(_, id)| *id)
            .collect()
    }

    /// Eligible agents for a task, best candidate first.
    ///
    /// Only agents accepting delegations with spare capacity and a priority of
    /// at least `min_priority` are returned. Ordering is priority descending,
    /// then active task count ascending, then registration order.
    pub fn find_eligible<'a>(
        &self,
        agents: &'a HashMap<AgentId, Agent>,
        required: &BTreeSet<String>,
        min_priority: Priority,
    ) -> Vec<&'a Agent> {
        let mut eligible: Vec<&Agent> = self
            .candidates(required)
            .into_iter()
            .filter_map(|id| agents.get(&id))
            .filter(|a| a.status.accepts_delegations() && a.has_capacity())
            .filter(|a| a.priority >= min_priority)
            .collect();
        // Stable sort keeps registration order for full ties.
        eligible.sort_by_key(|a| (Reverse(a.priority), a.active_task_count));
        eligible
    }

    /// Number of distinct capability tags indexed.
    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{AgentRole, AgentStatus};
    use chrono::Utc;

    fn agent(seq: u64, caps: &[&str], priority: Priority, active: u32) -> Agent {
        Agent {
            id: AgentId::new(),
            name: format!("agent-{seq}"),
            role: AgentRole::Worker,
            specializations: BTreeSet::new(),
            capabilities: caps.iter().map(|c| (*c).to_string()).collect(),
            max_concurrent_tasks: 3,
            priority,
            status: if active > 0 {
                AgentStatus::Working
            } else {
                AgentStatus::Idle
            },
            active_task_count: active,
            registered_at: Utc::now(),
            started_at: None,
            registration_seq: seq,
        }
    }

    fn tags(t: &[&str]) -> BTreeSet<String> {
        t.iter().map(|s| (*s).to_string()).collect()
    }

    fn setup(list: Vec<Agent>) -> (CapabilityIndex, HashMap<AgentId, Agent>) {
        let index = CapabilityIndex::rebuild(&list);
        let map = list.into_iter().map(|a| (a.id, a)).collect();
        (index, map)
    }

    #[test]
    fn test_superset_matching() {
        let a = agent(0, &["frontend", "css"], Priority::Medium, 0);
        let b = agent(1, &["backend"], Priority::Medium, 0);
        let (a_id, b_id) = (a.id, b.id);
        let (index, _) = setup(vec![a, b]);

        assert_eq!(index.candidates(&tags(&["frontend"])), vec![a_id]);
        assert_eq!(index.candidates(&tags(&["frontend", "css"])), vec![a_id]);
        assert!(index.candidates(&tags(&["frontend", "backend"])).is_empty());
        assert!(index.candidates(&tags(&["mobile"])).is_empty());
        assert_eq!(index.candidates(&BTreeSet::new()), vec![a_id, b_id]);
    }

    #[test]
    fn test_ordering_priority_then_load_then_registration() {
        let low = agent(0, &["x"], Priority::Low, 0);
        let busy_high = agent(1, &["x"], Priority::High, 2);
        let idle_high = agent(2, &["x"], Priority::High, 0);
        let idle_high_late = agent(3, &["x"], Priority::High, 0);
        let expected = vec![idle_high.id, idle_high_late.id, busy_high.id, low.id];
        let (index, map) = setup(vec![low, busy_high, idle_high, idle_high_late]);

        let order: Vec<AgentId> = index
            .find_eligible(&map, &tags(&["x"]), Priority::Low)
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_excludes_full_offline_and_low_priority() {
        let full = agent(0, &["x"], Priority::High, 3);
        let mut offline = agent(1, &["x"], Priority::High, 0);
        offline.status = AgentStatus::Offline;
        let mut waiting = agent(2, &["x"], Priority::High, 1);
        waiting.status = AgentStatus::Waiting;
        let low = agent(3, &["x"], Priority::Low, 0);
        let ok = agent(4, &["x"], Priority::Medium, 0);
        let ok_id = ok.id;
        let (index, map) = setup(vec![full, offline, waiting, low, ok]);

        let found = index.find_eligible(&map, &tags(&["x"]), Priority::Medium);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, ok_id);
    }

    #[test]
    fn test_remove() {
        let a = agent(0, &["x", "y"], Priority::Medium, 0);
        let mut index = CapabilityIndex::rebuild([&a]);
        assert_eq!(index.tag_count(), 2);
        index.remove(&a);
        assert_eq!(index.tag_count(), 0);
        assert!(index.candidates(&BTreeSet::new()).is_empty());
    }
}
