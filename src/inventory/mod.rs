//! Inventory resolution.
//!
//! Parses the line-oriented sections format and the hierarchical YAML
//! format (plus the conventional JSON document printed by dynamic
//! inventory executables), expands host ranges, builds the host/group
//! graph, and answers host-pattern queries.
//!
//! `group_vars/` and `host_vars/` directories next to the inventory source
//! contribute overlay variables kept in their own precedence tier.

pub mod group;
pub mod host;

pub use group::Group;
pub use host::{coerce_scalar, expand_host_pattern, Host, TransportKind};

use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::warn;

/// Errors that can occur during inventory operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("inventory path does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("invalid host pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid host range '{0}'")]
    InvalidRange(String),

    #[error("invalid inventory format in {} at line {line}: {message}", .path.display())]
    InvalidFormat {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("circular group dependency: {0}")]
    CircularDependency(String),

    #[error("dynamic inventory script failed: {0}")]
    DynamicInventoryFailed(String),
}

/// Result type for inventory operations.
pub type InventoryResult<T> = Result<T, InventoryError>;

/// The host/group graph with per-source variables.
#[derive(Debug, Clone)]
pub struct Inventory {
    hosts: IndexMap<String, Host>,
    groups: IndexMap<String, Group>,
    source: Option<PathBuf>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    /// Creates an empty inventory with the implicit `all` and `ungrouped`
    /// groups.
    pub fn new() -> Self {
        let mut groups = IndexMap::new();
        groups.insert("all".to_string(), Group::all());
        groups.insert("ungrouped".to_string(), Group::ungrouped());
        Self {
            hosts: IndexMap::new(),
            groups,
            source: None,
        }
    }

    /// Loads an inventory from a file, directory, or dynamic executable.
    pub fn load<P: AsRef<Path>>(path: P) -> InventoryResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(InventoryError::NotFound(path.to_path_buf()));
        }

        let mut inventory = Self::new();
        inventory.source = Some(path.to_path_buf());

        let base_dir = if path.is_file() {
            inventory.load_file(path)?;
            path.parent().map(Path::to_path_buf)
        } else {
            inventory.load_directory(path)?;
            Some(path.to_path_buf())
        };

        if let Some(dir) = base_dir {
            inventory.load_overlays(&dir)?;
        }

        inventory.finalize()?;
        Ok(inventory)
    }

    /// Parses inventory content in the sections format. Exposed for tests
    /// and for in-memory construction.
    pub fn from_ini(content: &str) -> InventoryResult<Self> {
        let mut inventory = Self::new();
        inventory.parse_ini(content, Path::new("<inline>"))?;
        inventory.finalize()?;
        Ok(inventory)
    }

    fn load_file(&mut self, path: &Path) -> InventoryResult<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = path.metadata() {
                if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
                    return self.load_dynamic(path);
                }
            }
        }

        let content = std::fs::read_to_string(path)?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match extension.to_lowercase().as_str() {
            "yml" | "yaml" => self.parse_yaml(&content)?,
            "json" => self.parse_json(&content)?,
            _ => {
                let trimmed = content.trim_start();
                if trimmed.starts_with('{') {
                    self.parse_json(&content)?;
                } else if trimmed.starts_with("---")
                    || trimmed.starts_with("all:")
                    || trimmed.starts_with("ungrouped:")
                {
                    self.parse_yaml(&content)?;
                } else {
                    self.parse_ini(&content, path)?;
                }
            }
        }

        Ok(())
    }

    fn load_directory(&mut self, path: &Path) -> InventoryResult<()> {
        let mut entries: Vec<_> = std::fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        entries.sort();

        for entry in entries {
            if !entry.is_file() {
                continue;
            }
            let name = entry.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with('.') {
                continue;
            }
            let ext = entry.extension().and_then(|e| e.to_str()).unwrap_or("");
            if matches!(ext, "bak" | "orig" | "retry") {
                continue;
            }
            self.load_file(&entry)?;
        }
        Ok(())
    }

    /// Runs an executable inventory source with `--list` and parses the
    /// conventional JSON document it prints.
    fn load_dynamic(&mut self, path: &Path) -> InventoryResult<()> {
        let output = Command::new(path)
            .arg("--list")
            .output()
            .map_err(|e| InventoryError::DynamicInventoryFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(InventoryError::DynamicInventoryFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        self.parse_json(&String::from_utf8_lossy(&output.stdout))
    }

    fn parse_ini(&mut self, content: &str, path: &Path) -> InventoryResult<()> {
        #[derive(PartialEq)]
        enum Section {
            Hosts,
            Vars,
            Children,
        }

        let mut current_group = "ungrouped".to_string();
        let mut section = Section::Hosts;

        for (line_no, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') {
                if !line.ends_with(']') {
                    return Err(InventoryError::InvalidFormat {
                        path: path.to_path_buf(),
                        line: line_no + 1,
                        message: format!("unterminated section header '{}'", line),
                    });
                }
                let header = &line[1..line.len() - 1];
                let (name, suffix) = match header.rsplit_once(':') {
                    Some((n, s)) => (n.trim(), Some(s.trim())),
                    None => (header.trim(), None),
                };
                section = match suffix {
                    None => Section::Hosts,
                    Some("vars") => Section::Vars,
                    Some("children") => Section::Children,
                    Some(other) => {
                        return Err(InventoryError::InvalidFormat {
                            path: path.to_path_buf(),
                            line: line_no + 1,
                            message: format!("unknown section suffix ':{}'", other),
                        })
                    }
                };
                current_group = name.to_string();
                self.ensure_group(name);
                continue;
            }

            match section {
                Section::Vars => {
                    let (key, value) = parse_var_line(line).ok_or_else(|| {
                        InventoryError::InvalidFormat {
                            path: path.to_path_buf(),
                            line: line_no + 1,
                            message: format!("expected key=value, got '{}'", line),
                        }
                    })?;
                    if let Some(group) = self.groups.get_mut(&current_group) {
                        group.set_var(key, value);
                    }
                }
                Section::Children => {
                    let child = line.to_string();
                    self.ensure_group(&child);
                    if let Some(group) = self.groups.get_mut(&current_group) {
                        group.add_child(child);
                    }
                }
                Section::Hosts => {
                    let parsed = Host::parse_line(line)?;
                    for host in parsed {
                        self.insert_host(host, &current_group);
                    }
                }
            }
        }

        Ok(())
    }

    fn parse_yaml(&mut self, content: &str) -> InventoryResult<()> {
        let data: serde_yaml::Value = serde_yaml::from_str(content)?;
        if let serde_yaml::Value::Mapping(map) = data {
            for (key, value) in map {
                if let serde_yaml::Value::String(group_name) = key {
                    self.parse_yaml_group(&group_name, &value)?;
                }
            }
        }
        Ok(())
    }

    fn parse_yaml_group(
        &mut self,
        name: &str,
        value: &serde_yaml::Value,
    ) -> InventoryResult<()> {
        self.ensure_group(name);

        let map = match value {
            serde_yaml::Value::Mapping(m) => m,
            _ => return Ok(()),
        };

        if let Some(serde_yaml::Value::Mapping(hosts)) = map.get("hosts") {
            for (host_key, host_value) in hosts {
                let pattern = match host_key.as_str() {
                    Some(p) => p,
                    None => continue,
                };
                for name_expanded in expand_host_pattern(pattern)? {
                    let mut host = Host::new(name_expanded);
                    if let serde_yaml::Value::Mapping(vars) = host_value {
                        for (k, v) in vars {
                            if let Some(key) = k.as_str() {
                                host.vars.insert(key.to_string(), v.clone());
                            }
                        }
                    }
                    self.insert_host(host, name);
                }
            }
        }

        if let Some(serde_yaml::Value::Mapping(vars)) = map.get("vars") {
            for (k, v) in vars {
                if let Some(key) = k.as_str() {
                    if let Some(group) = self.groups.get_mut(name) {
                        group.set_var(key, v.clone());
                    }
                }
            }
        }

        if let Some(serde_yaml::Value::Mapping(children)) = map.get("children") {
            for (child_key, child_value) in children {
                if let Some(child_name) = child_key.as_str() {
                    if let Some(group) = self.groups.get_mut(name) {
                        group.add_child(child_name);
                    }
                    self.parse_yaml_group(child_name, child_value)?;
                }
            }
        }

        Ok(())
    }

    /// Parses the conventional dynamic-inventory JSON document: top-level
    /// group objects with `hosts`/`vars`/`children`, plus optional
    /// `_meta.hostvars`.
    fn parse_json(&mut self, content: &str) -> InventoryResult<()> {
        let data: serde_json::Value = serde_json::from_str(content)?;
        let map = match data {
            serde_json::Value::Object(m) => m,
            _ => return Ok(()),
        };

        for (group_name, group_data) in &map {
            if group_name == "_meta" {
                continue;
            }
            self.ensure_group(group_name);

            match group_data {
                serde_json::Value::Object(obj) => {
                    if let Some(serde_json::Value::Array(hosts)) = obj.get("hosts") {
                        for h in hosts {
                            if let Some(name) = h.as_str() {
                                self.insert_host(Host::new(name), group_name);
                            }
                        }
                    }
                    if let Some(serde_json::Value::Object(vars)) = obj.get("vars") {
                        for (k, v) in vars {
                            let value = json_to_yaml(v);
                            if let Some(group) = self.groups.get_mut(group_name) {
                                group.set_var(k, value);
                            }
                        }
                    }
                    if let Some(serde_json::Value::Array(children)) = obj.get("children") {
                        for c in children {
                            if let Some(child) = c.as_str() {
                                self.ensure_group(child);
                                if let Some(group) = self.groups.get_mut(group_name) {
                                    group.add_child(child);
                                }
                            }
                        }
                    }
                }
                serde_json::Value::Array(hosts) => {
                    for h in hosts {
                        if let Some(name) = h.as_str() {
                            self.insert_host(Host::new(name), group_name);
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(serde_json::Value::Object(meta)) = map.get("_meta") {
            if let Some(serde_json::Value::Object(hostvars)) = meta.get("hostvars") {
                for (host_name, vars) in hostvars {
                    if let serde_json::Value::Object(vars_map) = vars {
                        if let Some(host) = self.hosts.get_mut(host_name) {
                            for (k, v) in vars_map {
                                host.vars.insert(k.clone(), json_to_yaml(v));
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn load_overlays(&mut self, base: &Path) -> InventoryResult<()> {
        let group_vars = base.join("group_vars");
        if group_vars.is_dir() {
            for (name, vars) in read_vars_dir(&group_vars)? {
                self.ensure_group(&name);
                if let Some(group) = self.groups.get_mut(&name) {
                    group.overlay_vars.extend(vars);
                }
            }
        }

        let host_vars = base.join("host_vars");
        if host_vars.is_dir() {
            for (name, vars) in read_vars_dir(&host_vars)? {
                if let Some(host) = self.hosts.get_mut(&name) {
                    host.overlay_vars.extend(vars);
                }
            }
        }

        Ok(())
    }

    fn ensure_group(&mut self, name: &str) {
        if !self.groups.contains_key(name) {
            self.groups.insert(name.to_string(), Group::new(name));
        }
    }

    fn insert_host(&mut self, mut host: Host, group: &str) {
        host.add_group(group);
        self.ensure_group(group);
        if let Some(g) = self.groups.get_mut(group) {
            g.add_host(host.name.clone());
        }

        match self.hosts.get_mut(&host.name) {
            Some(existing) => {
                existing.add_group(group);
                existing.vars.extend(host.vars);
            }
            None => {
                self.hosts.insert(host.name.clone(), host);
            }
        }
    }

    /// Computes parent links, implicit memberships, and validates the
    /// group graph is a DAG.
    fn finalize(&mut self) -> InventoryResult<()> {
        // Parent links from children declarations.
        let edges: Vec<(String, Vec<String>)> = self
            .groups
            .iter()
            .map(|(name, g)| (name.clone(), g.children.iter().cloned().collect()))
            .collect();
        for (parent, children) in &edges {
            for child in children {
                self.ensure_group(child);
                if let Some(g) = self.groups.get_mut(child) {
                    g.add_parent(parent.clone());
                }
            }
        }

        self.detect_cycles()?;

        // Every host is in `all`; hosts without a user-defined group are in
        // `ungrouped`.
        let host_names: Vec<String> = self.hosts.keys().cloned().collect();
        for name in host_names {
            if let Some(all) = self.groups.get_mut("all") {
                all.add_host(name.clone());
            }
            let ungrouped = {
                let host = &self.hosts[&name];
                !host
                    .groups
                    .iter()
                    .any(|g| g != "all" && g != "ungrouped")
            };
            if let Some(host) = self.hosts.get_mut(&name) {
                host.add_group("all");
                if ungrouped {
                    host.add_group("ungrouped");
                }
            }
            if ungrouped {
                if let Some(g) = self.groups.get_mut("ungrouped") {
                    g.add_host(name);
                }
            }
        }

        Ok(())
    }

    fn detect_cycles(&self) -> InventoryResult<()> {
        fn visit(
            inventory: &Inventory,
            name: &str,
            path: &mut Vec<String>,
            done: &mut HashSet<String>,
        ) -> InventoryResult<()> {
            if done.contains(name) {
                return Ok(());
            }
            if let Some(pos) = path.iter().position(|p| p == name) {
                let mut cycle: Vec<&str> = path[pos..].iter().map(String::as_str).collect();
                cycle.push(name);
                return Err(InventoryError::CircularDependency(cycle.join(" -> ")));
            }
            path.push(name.to_string());
            if let Some(group) = inventory.groups.get(name) {
                for child in &group.children {
                    visit(inventory, child, path, done)?;
                }
            }
            path.pop();
            done.insert(name.to_string());
            Ok(())
        }

        let mut done = HashSet::new();
        for name in self.groups.keys() {
            visit(self, name, &mut Vec::new(), &mut done)?;
        }
        Ok(())
    }

    /// Gets a host by name.
    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    /// Gets a group by name.
    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// All hosts in declaration order.
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// All groups in declaration order.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Number of hosts.
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Every group a host belongs to, direct and transitive, paired with
    /// its depth in the ancestor graph (`all` is depth 0; deeper groups
    /// are more specific).
    pub fn transitive_groups(&self, host: &Host) -> Vec<(String, usize)> {
        let mut out: IndexMap<String, usize> = IndexMap::new();

        fn ascend(
            inventory: &Inventory,
            name: &str,
            out: &mut IndexMap<String, usize>,
        ) -> usize {
            if let Some(depth) = out.get(name) {
                return *depth;
            }
            if name == "all" {
                out.insert(name.to_string(), 0);
                return 0;
            }
            // Insert a provisional depth to terminate on (already rejected)
            // cycles, then refine from parents.
            out.insert(name.to_string(), 1);
            let parents: Vec<String> = inventory
                .groups
                .get(name)
                .map(|g| g.parents.iter().cloned().collect())
                .unwrap_or_default();
            let depth = parents
                .iter()
                .filter(|p| p.as_str() != "ungrouped")
                .map(|p| ascend(inventory, p, out) + 1)
                .max()
                .unwrap_or(1);
            out.insert(name.to_string(), depth);
            depth
        }

        for group in &host.groups {
            ascend(self, group, &mut out);
        }
        out.entry("all".to_string()).or_insert(0);
        out.into_iter().collect()
    }

    /// Names of groups a host belongs to (transitively), excluding `all`
    /// and `ungrouped`, sorted for the `group_names` magic variable.
    pub fn group_names_for(&self, host: &Host) -> Vec<String> {
        let mut names: Vec<String> = self
            .transitive_groups(host)
            .into_iter()
            .map(|(n, _)| n)
            .filter(|n| n != "all" && n != "ungrouped")
            .collect();
        names.sort();
        names
    }

    /// Resolves a host selector to hosts, preserving inventory declaration
    /// order.
    ///
    /// A selector is a comma- (or colon-) separated list of patterns; each
    /// pattern is a host name, a group name, a shell-style wildcard, `all`,
    /// `~regex`, `!pattern` (subtract), or `&pattern` (intersect),
    /// evaluated left to right.
    pub fn select(&self, selector: &str) -> InventoryResult<Vec<&Host>> {
        let selector = selector.trim();
        if selector.is_empty() || self.hosts.is_empty() {
            return Ok(Vec::new());
        }

        let mut selected: HashSet<&str> = HashSet::new();
        for part in split_selector(selector) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some(rest) = part.strip_prefix('&') {
                let matched = self.match_single(rest)?;
                selected.retain(|name| matched.contains(name));
            } else if let Some(rest) = part.strip_prefix('!') {
                let matched = self.match_single(rest)?;
                selected.retain(|name| !matched.contains(name));
            } else {
                selected.extend(self.match_single(part)?);
            }
        }

        if selected.is_empty() {
            warn!(selector, "provided host pattern matched no hosts");
        }

        Ok(self
            .hosts
            .values()
            .filter(|h| selected.contains(h.name.as_str()))
            .collect())
    }

    /// Matches a single pattern element against hosts and groups.
    fn match_single(&self, pattern: &str) -> InventoryResult<HashSet<&str>> {
        let pattern = pattern.trim();
        let mut out = HashSet::new();

        if pattern == "all" || pattern == "*" {
            out.extend(self.hosts.keys().map(String::as_str));
            return Ok(out);
        }

        if let Some(regex_str) = pattern.strip_prefix('~') {
            let regex = Regex::new(regex_str)
                .map_err(|_| InventoryError::InvalidPattern(pattern.to_string()))?;
            out.extend(
                self.hosts
                    .keys()
                    .filter(|n| regex.is_match(n))
                    .map(String::as_str),
            );
            return Ok(out);
        }

        if pattern.contains('*') || pattern.contains('?') {
            let regex = Regex::new(&glob_to_regex(pattern))
                .map_err(|_| InventoryError::InvalidPattern(pattern.to_string()))?;
            for name in self.hosts.keys().filter(|n| regex.is_match(n)) {
                out.insert(name.as_str());
            }
            for (group_name, _) in self.groups.iter().filter(|(n, _)| regex.is_match(n)) {
                out.extend(self.group_hosts_recursive(group_name));
            }
            return Ok(out);
        }

        if self.groups.contains_key(pattern) {
            out.extend(self.group_hosts_recursive(pattern));
            return Ok(out);
        }

        if let Some(host) = self.hosts.get(pattern) {
            out.insert(host.name.as_str());
        }
        Ok(out)
    }

    fn group_hosts_recursive(&self, group_name: &str) -> HashSet<&str> {
        let mut out = HashSet::new();
        let mut stack = vec![group_name];
        let mut seen = HashSet::new();
        while let Some(name) = stack.pop() {
            if !seen.insert(name) {
                continue;
            }
            if let Some(group) = self.groups.get(name) {
                out.extend(group.hosts.iter().map(String::as_str));
                stack.extend(group.children.iter().map(String::as_str));
            }
        }
        out
    }

    /// Serializes the inventory back to the sections format. Parsing the
    /// output yields an equivalent host/group graph and variable mapping.
    pub fn to_ini(&self) -> String {
        let mut out = String::new();

        for group in self.groups.values() {
            if group.name == "all" || group.name == "ungrouped" {
                continue;
            }
            if !group.hosts.is_empty() {
                out.push_str(&format!("[{}]\n", group.name));
                for host_name in &group.hosts {
                    if let Some(host) = self.hosts.get(host_name) {
                        out.push_str(&host_line(host));
                    }
                }
                out.push('\n');
            }
            if !group.children.is_empty() {
                out.push_str(&format!("[{}:children]\n", group.name));
                for child in &group.children {
                    out.push_str(child);
                    out.push('\n');
                }
                out.push('\n');
            }
            if !group.vars.is_empty() {
                out.push_str(&format!("[{}:vars]\n", group.name));
                for (key, value) in &group.vars {
                    out.push_str(&format!("{}={}\n", key, scalar_to_ini(value)));
                }
                out.push('\n');
            }
        }

        // Hosts only in implicit groups.
        let ungrouped: Vec<&Host> = self
            .hosts
            .values()
            .filter(|h| h.in_group("ungrouped"))
            .collect();
        if !ungrouped.is_empty() {
            for host in ungrouped {
                out.push_str(&host_line(host));
            }
        }

        out
    }
}

fn host_line(host: &Host) -> String {
    let mut line = host.name.clone();
    for (key, value) in &host.vars {
        line.push_str(&format!(" {}={}", key, scalar_to_ini(value)));
    }
    line.push('\n');
    line
}

fn scalar_to_ini(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) if s.contains(' ') => format!("\"{}\"", s),
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim_end()
            .to_string(),
    }
}

fn parse_var_line(line: &str) -> Option<(String, serde_yaml::Value)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim().to_string();
    let value = value.trim();
    let value = if (value.starts_with('"') && value.ends_with('"') && value.len() >= 2)
        || (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
    {
        serde_yaml::Value::String(value[1..value.len() - 1].to_string())
    } else {
        coerce_scalar(value)
    };
    Some((key, value))
}

/// Splits a selector on commas and colons, but not inside range brackets
/// and not the `:&`/`:!` operator prefixes themselves.
fn split_selector(selector: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let bytes = selector.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            b',' | b':' if depth == 0 => {
                parts.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&selector[start..]);
    parts
}

fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '.' | '+' | '(' | ')' | '|' | '^' | '$' | '{' | '}' | '[' | ']' | '\\' => {
                regex.push('\\');
                regex.push(ch);
            }
            _ => regex.push(ch),
        }
    }
    regex.push('$');
    regex
}

fn read_vars_dir(
    dir: &Path,
) -> InventoryResult<Vec<(String, IndexMap<String, serde_yaml::Value>)>> {
    let mut out = Vec::new();
    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    for entry in entries {
        let name = entry
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_string();
        if name.is_empty() {
            continue;
        }

        if entry.is_file() {
            let ext = entry.extension().and_then(|e| e.to_str()).unwrap_or("");
            if matches!(ext, "yml" | "yaml" | "json" | "") {
                out.push((name, read_vars_file(&entry)?));
            }
        } else if entry.is_dir() {
            let mut merged = IndexMap::new();
            let mut files: Vec<_> = std::fs::read_dir(&entry)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("yml") | Some("yaml")
                    )
                })
                .collect();
            files.sort();
            for file in files {
                merged.extend(read_vars_file(&file)?);
            }
            out.push((
                entry
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or(&name)
                    .to_string(),
                merged,
            ));
        }
    }
    Ok(out)
}

fn read_vars_file(path: &Path) -> InventoryResult<IndexMap<String, serde_yaml::Value>> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(IndexMap::new());
    }
    Ok(serde_yaml::from_str(&content)?)
}

fn json_to_yaml(value: &serde_json::Value) -> serde_yaml::Value {
    match value {
        serde_json::Value::Null => serde_yaml::Value::Null,
        serde_json::Value::Bool(b) => serde_yaml::Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_yaml::Value::Number(i.into())
            } else if let Some(f) = n.as_f64() {
                serde_yaml::Value::Number(serde_yaml::Number::from(f))
            } else {
                serde_yaml::Value::Null
            }
        }
        serde_json::Value::String(s) => serde_yaml::Value::String(s.clone()),
        serde_json::Value::Array(arr) => {
            serde_yaml::Value::Sequence(arr.iter().map(json_to_yaml).collect())
        }
        serde_json::Value::Object(obj) => {
            let mut map = serde_yaml::Mapping::new();
            for (k, v) in obj {
                map.insert(serde_yaml::Value::String(k.clone()), json_to_yaml(v));
            }
            serde_yaml::Value::Mapping(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[webservers]
web1 ansible_host=10.0.0.1
web2 ansible_host=10.0.0.2

[databases]
db1

[webservers:vars]
http_port=80

[production:children]
webservers
databases
"#;

    #[test]
    fn empty_inventory_has_implicit_groups() {
        let inv = Inventory::new();
        assert_eq!(inv.host_count(), 0);
        assert!(inv.get_group("all").is_some());
        assert!(inv.get_group("ungrouped").is_some());
        assert!(inv.select("all").unwrap().is_empty());
    }

    #[test]
    fn parse_sections_format() {
        let inv = Inventory::from_ini(SAMPLE).unwrap();
        assert_eq!(inv.host_count(), 3);
        let webservers = inv.get_group("webservers").unwrap();
        assert!(webservers.has_host("web1"));
        assert_eq!(
            webservers.vars.get("http_port"),
            Some(&serde_yaml::Value::Number(80.into()))
        );
        let production = inv.get_group("production").unwrap();
        assert!(production.children.contains("webservers"));
    }

    #[test]
    fn selection_preserves_declaration_order() {
        let inv = Inventory::from_ini(SAMPLE).unwrap();
        let hosts: Vec<&str> = inv
            .select("databases,webservers")
            .unwrap()
            .iter()
            .map(|h| h.name.as_str())
            .collect();
        assert_eq!(hosts, vec!["web1", "web2", "db1"]);
    }

    #[test]
    fn selection_operators() {
        let inv = Inventory::from_ini(SAMPLE).unwrap();

        let subtracted: Vec<&str> = inv
            .select("all,!databases")
            .unwrap()
            .iter()
            .map(|h| h.name.as_str())
            .collect();
        assert_eq!(subtracted, vec!["web1", "web2"]);

        let intersected: Vec<&str> = inv
            .select("production,&webservers")
            .unwrap()
            .iter()
            .map(|h| h.name.as_str())
            .collect();
        assert_eq!(intersected, vec!["web1", "web2"]);
    }

    #[test]
    fn wildcard_selection() {
        let inv = Inventory::from_ini(SAMPLE).unwrap();
        let hosts: Vec<&str> = inv
            .select("web*")
            .unwrap()
            .iter()
            .map(|h| h.name.as_str())
            .collect();
        assert_eq!(hosts, vec!["web1", "web2"]);
    }

    #[test]
    fn no_match_is_empty_not_error() {
        let inv = Inventory::from_ini(SAMPLE).unwrap();
        assert!(inv.select("nosuchthing").unwrap().is_empty());
    }

    #[test]
    fn child_group_membership_is_transitive() {
        let inv = Inventory::from_ini(SAMPLE).unwrap();
        let hosts = inv.select("production").unwrap();
        assert_eq!(hosts.len(), 3);
    }

    #[test]
    fn group_cycle_is_rejected() {
        let content = r#"
[a:children]
b

[b:children]
a
"#;
        let err = Inventory::from_ini(content).unwrap_err();
        assert!(matches!(err, InventoryError::CircularDependency(_)));
    }

    #[test]
    fn ranges_expand_in_host_sections() {
        let inv = Inventory::from_ini("[web]\nweb[01:03]\n").unwrap();
        assert_eq!(inv.host_count(), 3);
        assert!(inv.get_host("web02").is_some());
    }

    #[test]
    fn ini_round_trip_is_equivalent() {
        let inv = Inventory::from_ini(SAMPLE).unwrap();
        let reparsed = Inventory::from_ini(&inv.to_ini()).unwrap();

        assert_eq!(inv.host_count(), reparsed.host_count());
        for host in inv.hosts() {
            let other = reparsed.get_host(&host.name).expect("host survives");
            assert_eq!(host.vars, other.vars);
            let mut a = host.groups.clone();
            let mut b = other.groups.clone();
            a.sort();
            b.sort();
            assert_eq!(a, b);
        }
        for group in inv.groups() {
            let other = reparsed.get_group(&group.name).expect("group survives");
            assert_eq!(group.vars, other.vars);
            assert_eq!(group.children, other.children);
        }
    }

    #[test]
    fn transitive_group_depths() {
        let inv = Inventory::from_ini(SAMPLE).unwrap();
        let host = inv.get_host("web1").unwrap();
        let groups = inv.transitive_groups(host);
        let depth_of = |name: &str| {
            groups
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, d)| *d)
                .unwrap()
        };
        assert_eq!(depth_of("all"), 0);
        assert!(depth_of("webservers") > depth_of("production"));
    }

    #[test]
    fn ungrouped_membership() {
        let inv = Inventory::from_ini("lonely\n[web]\nweb1\n").unwrap();
        let lonely = inv.get_host("lonely").unwrap();
        assert!(lonely.in_group("ungrouped"));
        let web1 = inv.get_host("web1").unwrap();
        assert!(!web1.in_group("ungrouped"));
    }
}
