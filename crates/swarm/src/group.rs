//! Named connection groups.
//!
//! A group is a caller-keyed set of connection ids used to scope selection
//! (e.g. "all connections to peer X"). Groups are created implicitly when
//! the first member joins and removed when the last member leaves, so a
//! registered group always has at least one member.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use skein_primitives::{ConnId, GroupId};

/// Registry of group memberships, guarded like the other swarm registries:
/// one reader/writer lock, snapshot copies on enumeration.
#[derive(Default)]
pub(crate) struct GroupRegistry {
    groups: RwLock<HashMap<GroupId, HashSet<ConnId>>>,
}

impl GroupRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to a group, creating the group if needed.
    pub(crate) fn join(&self, group: GroupId, conn: ConnId) {
        self.groups.write().entry(group).or_default().insert(conn);
    }

    /// Removes a connection from a group; empty groups are dropped.
    pub(crate) fn leave(&self, group: &GroupId, conn: ConnId) {
        let mut groups = self.groups.write();
        if let Some(members) = groups.get_mut(group) {
            members.remove(&conn);
            if members.is_empty() {
                groups.remove(group);
            }
        }
    }

    /// Snapshot of a group's members, or `None` for an unknown group.
    pub(crate) fn members(&self, group: &GroupId) -> Option<Vec<ConnId>> {
        self.groups
            .read()
            .get(group)
            .map(|members| members.iter().copied().collect())
    }

    /// Whether a connection is a member of a group.
    pub(crate) fn contains(&self, group: &GroupId, conn: ConnId) -> bool {
        self.groups
            .read()
            .get(group)
            .is_some_and(|members| members.contains(&conn))
    }

    /// Snapshot of all groups a connection belongs to.
    pub(crate) fn groups_of(&self, conn: ConnId) -> Vec<GroupId> {
        self.groups
            .read()
            .iter()
            .filter(|(_, members)| members.contains(&conn))
            .map(|(group, _)| group.clone())
            .collect()
    }

    /// Removes a connection from every group it belongs to.
    pub(crate) fn drop_conn(&self, conn: ConnId) {
        let mut groups = self.groups.write();
        groups.retain(|_, members| {
            members.remove(&conn);
            !members.is_empty()
        });
    }

    /// Snapshot of all registered group ids.
    pub(crate) fn ids(&self) -> Vec<GroupId> {
        self.groups.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_members() {
        let registry = GroupRegistry::new();
        let group = GroupId::from("peer-x");
        registry.join(group.clone(), ConnId::new(1));
        registry.join(group.clone(), ConnId::new(2));

        let mut members = registry.members(&group).unwrap();
        members.sort();
        assert_eq!(members, vec![ConnId::new(1), ConnId::new(2)]);
        assert!(registry.contains(&group, ConnId::new(1)));
        assert!(!registry.contains(&group, ConnId::new(3)));
    }

    #[test]
    fn test_unknown_group() {
        let registry = GroupRegistry::new();
        assert!(registry.members(&GroupId::from("nope")).is_none());
    }

    #[test]
    fn test_empty_group_is_dropped() {
        let registry = GroupRegistry::new();
        let group = GroupId::from("peer-x");
        registry.join(group.clone(), ConnId::new(1));
        registry.leave(&group, ConnId::new(1));

        assert!(registry.members(&group).is_none());
        assert!(registry.ids().is_empty());
    }

    #[test]
    fn test_drop_conn_leaves_all_groups() {
        let registry = GroupRegistry::new();
        registry.join(GroupId::from("a"), ConnId::new(1));
        registry.join(GroupId::from("b"), ConnId::new(1));
        registry.join(GroupId::from("b"), ConnId::new(2));

        registry.drop_conn(ConnId::new(1));

        assert!(registry.members(&GroupId::from("a")).is_none());
        assert_eq!(
            registry.members(&GroupId::from("b")),
            Some(vec![ConnId::new(2)])
        );
        assert_eq!(registry.groups_of(ConnId::new(1)), Vec::<GroupId>::new());
    }
}
