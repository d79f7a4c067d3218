//! In-memory agent forest.

use std::collections::HashMap;

use super::types::{Agent, AgentTreeNode, FlatTreeEntry};

/// Agents keyed by session ID plus ordered child lists.
///
/// Every non-root agent's parent is present in `agents`; child lists keep
/// registration order.
#[derive(Debug, Default)]
pub(crate) struct AgentTree {
    agents: HashMap<String, Agent>,
    children: HashMap<String, Vec<String>>,
}

impl AgentTree {
    pub fn get(&self, session_id: &str) -> Option<&Agent> {
        self.agents.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut Agent> {
        self.agents.get_mut(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.agents.contains_key(session_id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// Insert a new agent. The caller has checked that the parent exists.
    pub fn insert(&mut self, agent: Agent) {
        if let Some(parent) = &agent.parent_session_id {
            self.children
                .entry(parent.clone())
                .or_default()
                .push(agent.session_id.clone());
        }
        self.agents.insert(agent.session_id.clone(), agent);
    }

    /// Remove an agent, handing its children to its parent (or making them
    /// roots).
    pub fn remove(&mut self, session_id: &str) -> Option<Agent> {
        let agent = self.agents.remove(session_id)?;
        let orphans = self.children.remove(session_id).unwrap_or_default();

        if let Some(parent) = &agent.parent_session_id
            && let Some(siblings) = self.children.get_mut(parent)
        {
            siblings.retain(|id| id != session_id);
        }
        for child_id in &orphans {
            if let Some(child) = self.agents.get_mut(child_id) {
                child.parent_session_id.clone_from(&agent.parent_session_id);
            }
        }
        if let Some(parent) = &agent.parent_session_id {
            self.children
                .entry(parent.clone())
                .or_default()
                .extend(orphans);
        }
        Some(agent)
    }

    /// Direct children in registration order.
    pub fn children_of(&self, session_id: &str) -> Vec<&Agent> {
        self.children
            .get(session_id)
            .map(|ids| ids.iter().filter_map(|id| self.agents.get(id)).collect())
            .unwrap_or_default()
    }

    /// Depth-first pre-order walk of a subtree with depths relative to
    /// `root`. Empty if `root` is unknown.
    pub fn preorder(&self, root: &str) -> Vec<(&Agent, usize)> {
        let mut out = Vec::new();
        let mut stack = match self.agents.get(root) {
            Some(agent) => vec![(agent, 0)],
            None => return out,
        };
        while let Some((agent, depth)) = stack.pop() {
            out.push((agent, depth));
            for child in self.children_of(&agent.session_id).into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }

    /// Session IDs of a subtree ordered so every descendant precedes its
    /// ancestors; `root` comes last.
    pub fn deepest_first(&self, root: &str) -> Vec<String> {
        self.preorder(root)
            .into_iter()
            .rev()
            .map(|(agent, _)| agent.session_id.clone())
            .collect()
    }

    pub fn flat_list(&self, root: &str) -> Vec<FlatTreeEntry> {
        self.preorder(root)
            .into_iter()
            .map(|(agent, depth)| FlatTreeEntry {
                agent: agent.clone(),
                depth,
            })
            .collect()
    }

    pub fn nested(&self, root: &str) -> Option<AgentTreeNode> {
        let agent = self.agents.get(root)?;
        Some(AgentTreeNode {
            agent: agent.clone(),
            children: self
                .children_of(root)
                .into_iter()
                .filter_map(|child| self.nested(&child.session_id))
                .collect(),
        })
    }
}
