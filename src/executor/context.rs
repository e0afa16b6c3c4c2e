//! Per-play, per-host mutable state.

use crate::inventory::Host;
use crate::vars::{merge_var, VarMap};

/// Runtime context for a single host during one play.
///
/// Owned by the host's worker while a task runs; no other worker reads or
/// writes it concurrently.
#[derive(Debug, Clone)]
pub struct HostContext {
    /// The inventory host.
    pub host: Host,
    /// Resolved inventory snapshot plus play vars (tiers 1–6).
    pub vars: VarMap,
    /// Runtime facts from `setup`, `set_fact`, and `include_vars`.
    pub facts: VarMap,
    /// Registered task results, by register name.
    pub registered: VarMap,
    /// The host failed and is skipped until rescued.
    pub failed: bool,
    /// The host's transport is gone for the rest of the play.
    pub unreachable: bool,
    /// Pending handler notifications: first-notify order, de-duplicated
    /// by handler name.
    pub notified: Vec<String>,
    /// Handlers that already ran this play (a handler runs at most once
    /// per play per host).
    pub ran_handlers: Vec<String>,
    /// Play-level check-mode default for this host.
    pub check_mode: bool,
    /// Play-level diff-mode default for this host.
    pub diff_mode: bool,
}

impl HostContext {
    /// Creates the context with the resolved variable snapshot.
    pub fn new(host: Host, vars: VarMap, check_mode: bool, diff_mode: bool) -> Self {
        Self {
            host,
            vars,
            facts: VarMap::new(),
            registered: VarMap::new(),
            failed: false,
            unreachable: false,
            notified: Vec::new(),
            ran_handlers: Vec::new(),
            check_mode,
            diff_mode,
        }
    }

    /// True while the host keeps receiving tasks.
    pub fn eligible(&self) -> bool {
        !self.failed && !self.unreachable
    }

    /// The full variable view for templating: snapshot, then facts, then
    /// registered results (later tiers win).
    pub fn merged_vars(&self) -> VarMap {
        let mut vars = self.vars.clone();
        for (key, value) in &self.facts {
            merge_var(&mut vars, key, value.clone());
        }
        for (key, value) in &self.registered {
            merge_var(&mut vars, key, value.clone());
        }
        vars
    }

    /// Stores a registered result.
    pub fn register(&mut self, name: &str, value: serde_yaml::Value) {
        self.registered.insert(name.to_string(), value);
    }

    /// Merges new facts (from `setup`, `set_fact`, `include_vars`).
    pub fn merge_facts(&mut self, facts: &serde_yaml::Value) {
        if let serde_yaml::Value::Mapping(map) = facts {
            for (key, value) in map {
                if let Some(key) = key.as_str() {
                    merge_var(&mut self.facts, key, value.clone());
                }
            }
        }
    }

    /// Adds a handler notification, keeping first-notify order. A handler
    /// that already ran this play is not re-notified.
    pub fn notify(&mut self, handler: &str) {
        if self.ran_handlers.iter().any(|n| n == handler) {
            return;
        }
        if !self.notified.iter().any(|n| n == handler) {
            self.notified.push(handler.to_string());
        }
    }

    /// True if the handler is pending on this host.
    pub fn has_pending(&self, handler: &str) -> bool {
        self.notified.iter().any(|n| n == handler)
    }

    /// Clears one handler after it ran and bars re-notification.
    pub fn clear_pending(&mut self, handler: &str) {
        self.notified.retain(|n| n != handler);
        if !self.ran_handlers.iter().any(|n| n == handler) {
            self.ran_handlers.push(handler.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Host;

    #[test]
    fn notifications_dedupe_and_keep_order() {
        let mut ctx = HostContext::new(Host::new("h1"), VarMap::new(), false, false);
        ctx.notify("restart b");
        ctx.notify("restart a");
        ctx.notify("restart b");
        assert_eq!(ctx.notified, vec!["restart b", "restart a"]);
    }

    #[test]
    fn merged_vars_layering() {
        let mut vars = VarMap::new();
        vars.insert("x".into(), serde_yaml::Value::String("snapshot".into()));
        let mut ctx = HostContext::new(Host::new("h1"), vars, false, false);

        ctx.facts
            .insert("x".into(), serde_yaml::Value::String("fact".into()));
        assert_eq!(
            ctx.merged_vars()["x"],
            serde_yaml::Value::String("fact".into())
        );

        ctx.register("x", serde_yaml::Value::String("registered".into()));
        assert_eq!(
            ctx.merged_vars()["x"],
            serde_yaml::Value::String("registered".into())
        );
    }
}
