//! Group representation and the group hierarchy.

use indexmap::{IndexMap, IndexSet};

/// A named set of hosts and/or child groups sharing variables.
#[derive(Debug, Clone)]
pub struct Group {
    /// Group name, unique within the inventory.
    pub name: String,
    /// Variables from the inventory source.
    pub vars: IndexMap<String, serde_yaml::Value>,
    /// Variables from a `group_vars/` overlay; a separate precedence tier.
    pub overlay_vars: IndexMap<String, serde_yaml::Value>,
    /// Direct member hosts, in declaration order.
    pub hosts: IndexSet<String>,
    /// Direct child groups, in declaration order.
    pub children: IndexSet<String>,
    /// Direct parent groups.
    pub parents: IndexSet<String>,
}

impl Group {
    /// Creates an empty group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: IndexMap::new(),
            overlay_vars: IndexMap::new(),
            hosts: IndexSet::new(),
            children: IndexSet::new(),
            parents: IndexSet::new(),
        }
    }

    /// The implicit `all` group.
    pub fn all() -> Self {
        Self::new("all")
    }

    /// The implicit `ungrouped` group.
    pub fn ungrouped() -> Self {
        Self::new("ungrouped")
    }

    /// Adds a direct member host.
    pub fn add_host(&mut self, host: impl Into<String>) {
        self.hosts.insert(host.into());
    }

    /// Adds a direct child group.
    pub fn add_child(&mut self, child: impl Into<String>) {
        self.children.insert(child.into());
    }

    /// Records a parent group.
    pub fn add_parent(&mut self, parent: impl Into<String>) {
        self.parents.insert(parent.into());
    }

    /// Sets a group variable.
    pub fn set_var(&mut self, key: impl Into<String>, value: serde_yaml::Value) {
        self.vars.insert(key.into(), value);
    }

    /// True if `host` is a direct member.
    pub fn has_host(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_preserves_order_and_dedupes() {
        let mut group = Group::new("web");
        group.add_host("b");
        group.add_host("a");
        group.add_host("b");
        let hosts: Vec<_> = group.hosts.iter().cloned().collect();
        assert_eq!(hosts, vec!["b", "a"]);
    }
}
