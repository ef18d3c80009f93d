//! Live connection registry and named groups.

use crate::connection::{Connection, ConnectionId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Name of a broadcast group (channel).
pub type GroupName = String;

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Connection>,
    groups: HashMap<GroupName, HashSet<ConnectionId>>,
    // Reverse index so `remove` does not scan every group
    memberships: HashMap<ConnectionId, HashSet<GroupName>>,
}

/// Holds every live connection keyed by id, plus group membership.
///
/// All maps sit behind one lock, so add, remove, join and leave are atomic
/// with respect to each other and to broadcast snapshots.
#[derive(Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, returning any connection it replaced.
    pub fn add(&self, connection: Connection) -> Option<Connection> {
        let id = connection.id().to_string();
        let mut state = self.state.write();
        state.memberships.entry(id.clone()).or_default();
        let previous = state.connections.insert(id.clone(), connection);
        tracing::debug!(connection_id = %id, total = state.connections.len(), "Connection registered");
        previous
    }

    /// Unregister a connection and evict it from every group.
    pub fn remove(&self, id: &str) -> Option<Connection> {
        let mut state = self.state.write();
        let removed = state.connections.remove(id);
        if let Some(groups) = state.memberships.remove(id) {
            for name in groups {
                if let Some(members) = state.groups.get_mut(&name) {
                    members.remove(id);
                }
            }
        }
        if removed.is_some() {
            tracing::debug!(connection_id = %id, total = state.connections.len(), "Connection unregistered");
        }
        removed
    }

    /// Look up a connection.
    pub fn get(&self, id: &str) -> Option<Connection> {
        self.state.read().connections.get(id).cloned()
    }

    /// Whether a connection is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.state.read().connections.contains_key(id)
    }

    /// Create a group. Returns false if it already existed.
    pub fn create_group(&self, name: impl Into<GroupName>) -> bool {
        let name = name.into();
        let mut state = self.state.write();
        if state.groups.contains_key(&name) {
            return false;
        }
        tracing::debug!(group = %name, "Group created");
        state.groups.insert(name, HashSet::new());
        true
    }

    /// Delete a group. Member connections stay open and registered.
    pub fn remove_group(&self, name: &str) -> bool {
        let mut state = self.state.write();
        let Some(members) = state.groups.remove(name) else {
            return false;
        };
        for id in members {
            if let Some(groups) = state.memberships.get_mut(&id) {
                groups.remove(name);
            }
        }
        tracing::debug!(group = %name, "Group removed");
        true
    }

    /// Add a connection to a group, creating the group on first use.
    ///
    /// Unknown connection ids are ignored.
    pub fn join_group(&self, id: &str, name: &str) {
        let mut state = self.state.write();
        if !state.connections.contains_key(id) {
            tracing::trace!(connection_id = %id, group = %name, "Join ignored for unknown connection");
            return;
        }
        state
            .groups
            .entry(name.to_string())
            .or_default()
            .insert(id.to_string());
        state
            .memberships
            .entry(id.to_string())
            .or_default()
            .insert(name.to_string());
    }

    /// Remove a connection from a group. Absent ids and groups are ignored.
    pub fn leave_group(&self, id: &str, name: &str) {
        let mut state = self.state.write();
        if let Some(members) = state.groups.get_mut(name) {
            members.remove(id);
        }
        if let Some(groups) = state.memberships.get_mut(id) {
            groups.remove(name);
        }
    }

    /// Member ids of a group.
    pub fn members(&self, name: &str) -> Vec<ConnectionId> {
        self.state
            .read()
            .groups
            .get(name)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of members in a group, 0 if it does not exist.
    pub fn group_size(&self, name: &str) -> usize {
        self.state.read().groups.get(name).map_or(0, HashSet::len)
    }

    /// Whether a group exists.
    pub fn has_group(&self, name: &str) -> bool {
        self.state.read().groups.contains_key(name)
    }

    /// Names of all groups.
    pub fn group_names(&self) -> Vec<GroupName> {
        self.state.read().groups.keys().cloned().collect()
    }

    /// Groups a connection belongs to.
    pub fn groups_of(&self, id: &str) -> Vec<GroupName> {
        self.state
            .read()
            .memberships
            .get(id)
            .map(|groups| groups.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Ids of all registered connections.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.state.read().connections.keys().cloned().collect()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Number of groups.
    pub fn group_count(&self) -> usize {
        self.state.read().groups.len()
    }

    /// Point-in-time copy of the targets for `group`, or of every connection.
    ///
    /// Returns an empty list for a group that does not exist.
    pub fn snapshot(&self, group: Option<&str>) -> Vec<Connection> {
        let state = self.state.read();
        match group {
            None => state.connections.values().cloned().collect(),
            Some(name) => state
                .groups
                .get(name)
                .map(|members| {
                    members
                        .iter()
                        .filter_map(|id| state.connections.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}
