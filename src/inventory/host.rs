//! Host representation and host-line parsing.
//!
//! A host line in the sections format is the host name (possibly carrying
//! range brackets) followed by `key=value` pairs. Values may be single- or
//! double-quoted to contain spaces.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use super::InventoryError;

/// `key=value` with optional quoting, as used on host lines and in
/// `[group:vars]` sections.
static VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\w+)=(?:"([^"]*)"|'([^']*)'|(\S+))"#).expect("valid regex")
});

/// `[LOW:HIGH]` or `[LOW:HIGH:STRIDE]` range brackets.
static RANGE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([0-9a-zA-Z]+):([0-9a-zA-Z]+)(?::(\d+))?\]").expect("valid regex")
});

/// Which transport a host is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Child process on the control node.
    Local,
    /// SSH session.
    #[default]
    Ssh,
    /// Windows remote shell (WinRM).
    Winrm,
}

impl TransportKind {
    /// Parses the `ansible_connection` value.
    pub fn parse(value: &str) -> Self {
        match value {
            "local" => Self::Local,
            "winrm" | "psrp" => Self::Winrm,
            _ => Self::Ssh,
        }
    }

    /// Default port for the transport.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Local => 0,
            Self::Ssh => 22,
            Self::Winrm => 5985,
        }
    }
}

/// A named target of task execution.
///
/// Immutable after inventory parse; runtime variables (`set_fact`,
/// `register`) live in the executor's per-host context, not here.
#[derive(Debug, Clone)]
pub struct Host {
    /// Stable inventory name.
    pub name: String,
    /// Variables from the inventory source itself.
    pub vars: IndexMap<String, serde_yaml::Value>,
    /// Variables contributed by a `host_vars/` overlay. A separate
    /// precedence tier from [`Host::vars`].
    pub overlay_vars: IndexMap<String, serde_yaml::Value>,
    /// Groups this host belongs to directly, in declaration order.
    pub groups: Vec<String>,
}

impl Host {
    /// Creates a host with no variables.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: IndexMap::new(),
            overlay_vars: IndexMap::new(),
            groups: Vec::new(),
        }
    }

    /// Parses one host line into one or more hosts (range brackets expand).
    pub fn parse_line(line: &str) -> Result<Vec<Host>, InventoryError> {
        let mut parts = line.split_whitespace();
        let pattern = match parts.next() {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };
        let var_string: String = parts.collect::<Vec<_>>().join(" ");

        let mut vars = IndexMap::new();
        for caps in VAR_PATTERN.captures_iter(&var_string) {
            let key = caps.get(1).map_or("", |m| m.as_str()).to_string();
            let raw = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str());
            // Quoted values stay strings; bare values coerce.
            let value = if caps.get(2).is_some() || caps.get(3).is_some() {
                serde_yaml::Value::String(raw.to_string())
            } else {
                coerce_scalar(raw)
            };
            vars.insert(key, value);
        }

        let names = expand_host_pattern(pattern)?;
        Ok(names
            .into_iter()
            .map(|name| {
                let mut host = Host::new(name);
                host.vars = vars.clone();
                host
            })
            .collect())
    }

    /// Records direct membership in a group, keeping declaration order.
    pub fn add_group(&mut self, group: impl Into<String>) {
        let group = group.into();
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
    }

    /// True if the host is a direct member of `group`.
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Looks up a variable in overlay vars first, then inventory vars.
    pub fn get_var(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.overlay_vars.get(key).or_else(|| self.vars.get(key))
    }

    fn var_str(&self, key: &str) -> Option<String> {
        match self.get_var(key) {
            Some(serde_yaml::Value::String(s)) => Some(s.clone()),
            Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// The address to connect to: `ansible_host` or the inventory name.
    pub fn address(&self) -> String {
        self.var_str("ansible_host")
            .unwrap_or_else(|| self.name.clone())
    }

    /// Selected transport for this host.
    pub fn transport(&self) -> TransportKind {
        if let Some(conn) = self.var_str("ansible_connection") {
            return TransportKind::parse(&conn);
        }
        if self.name == "localhost" || self.name == "127.0.0.1" {
            return TransportKind::Local;
        }
        TransportKind::Ssh
    }

    /// Port to connect to, falling back to the transport default.
    pub fn port(&self) -> u16 {
        match self.get_var("ansible_port") {
            Some(serde_yaml::Value::Number(n)) => {
                n.as_u64().map(|p| p as u16).unwrap_or_else(|| self.transport().default_port())
            }
            Some(serde_yaml::Value::String(s)) => s
                .parse()
                .unwrap_or_else(|_| self.transport().default_port()),
            _ => self.transport().default_port(),
        }
    }

    /// Remote user, if set in the inventory.
    pub fn user(&self) -> Option<String> {
        self.var_str("ansible_user")
    }

    /// Connection password, if set in the inventory.
    pub fn password(&self) -> Option<String> {
        self.var_str("ansible_password")
            .or_else(|| self.var_str("ansible_ssh_pass"))
    }

    /// Private key path, if set in the inventory.
    pub fn private_key_file(&self) -> Option<String> {
        self.var_str("ansible_ssh_private_key_file")
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Coerces a bare INI scalar: booleans, null, integers, floats; everything
/// else stays a string.
pub fn coerce_scalar(value: &str) -> serde_yaml::Value {
    match value.to_lowercase().as_str() {
        "true" | "yes" => return serde_yaml::Value::Bool(true),
        "false" | "no" => return serde_yaml::Value::Bool(false),
        "null" | "none" | "~" => return serde_yaml::Value::Null,
        _ => {}
    }
    if let Ok(n) = value.parse::<i64>() {
        return serde_yaml::Value::Number(n.into());
    }
    if let Ok(n) = value.parse::<f64>() {
        return serde_yaml::Value::Number(serde_yaml::Number::from(n));
    }
    serde_yaml::Value::String(value.to_string())
}

/// Expands `<prefix>[LOW:HIGH(:STRIDE)]<suffix>` tokens into the
/// cross-product of ranges in left-to-right odometer order.
///
/// Numeric ranges preserve the zero-padding width of LOW; single-letter
/// alphabetic ranges walk character codes. Multiple brackets compose.
pub fn expand_host_pattern(pattern: &str) -> Result<Vec<String>, InventoryError> {
    let caps = match RANGE_PATTERN.captures(pattern) {
        Some(c) => c,
        None => return Ok(vec![pattern.to_string()]),
    };
    let whole = caps.get(0).expect("capture 0 always present");
    let low = caps.get(1).map_or("", |m| m.as_str());
    let high = caps.get(2).map_or("", |m| m.as_str());
    let stride: usize = caps
        .get(3)
        .map_or(Ok(1), |m| m.as_str().parse())
        .map_err(|_| InventoryError::InvalidRange(whole.as_str().to_string()))?;
    if stride == 0 {
        return Err(InventoryError::InvalidRange(whole.as_str().to_string()));
    }

    let prefix = &pattern[..whole.start()];
    let suffix = &pattern[whole.end()..];

    let values = expand_bounds(low, high, stride)
        .ok_or_else(|| InventoryError::InvalidRange(whole.as_str().to_string()))?;

    let mut results = Vec::new();
    for value in values {
        let expanded = format!("{}{}{}", prefix, value, suffix);
        results.extend(expand_host_pattern(&expanded)?);
    }
    Ok(results)
}

fn expand_bounds(low: &str, high: &str, stride: usize) -> Option<Vec<String>> {
    let numeric = low.chars().all(|c| c.is_ascii_digit());
    if numeric {
        if !high.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let start: u64 = low.parse().ok()?;
        let end: u64 = high.parse().ok()?;
        if start > end {
            return None;
        }
        let width = low.len();
        Some(
            (start..=end)
                .step_by(stride)
                .map(|i| format!("{:0width$}", i, width = width))
                .collect(),
        )
    } else {
        // Alphabetic range: single characters only.
        if low.len() != 1 || high.len() != 1 {
            return None;
        }
        let start = low.chars().next()?;
        let end = high.chars().next()?;
        if !start.is_ascii_alphabetic() || !end.is_ascii_alphabetic() || start > end {
            return None;
        }
        Some(
            (start as u32..=end as u32)
                .step_by(stride)
                .filter_map(char::from_u32)
                .map(|c| c.to_string())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_range_preserves_padding() {
        let names = expand_host_pattern("web[01:03].example.com").unwrap();
        assert_eq!(
            names,
            vec![
                "web01.example.com",
                "web02.example.com",
                "web03.example.com"
            ]
        );
    }

    #[test]
    fn range_with_stride() {
        let names = expand_host_pattern("node[0:6:2]").unwrap();
        assert_eq!(names, vec!["node0", "node2", "node4", "node6"]);
    }

    #[test]
    fn alphabetic_range() {
        let names = expand_host_pattern("db-[a:c]").unwrap();
        assert_eq!(names, vec!["db-a", "db-b", "db-c"]);
    }

    #[test]
    fn multiple_brackets_compose_in_odometer_order() {
        let names = expand_host_pattern("r[1:2]c[1:2]").unwrap();
        assert_eq!(names, vec!["r1c1", "r1c2", "r2c1", "r2c2"]);
    }

    #[test]
    fn reversed_range_is_an_error() {
        assert!(expand_host_pattern("web[9:1]").is_err());
    }

    #[test]
    fn host_line_with_quoted_value() {
        let hosts = Host::parse_line(r#"web1 ansible_host=10.0.0.1 greeting="hello world""#)
            .unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(
            hosts[0].get_var("greeting"),
            Some(&serde_yaml::Value::String("hello world".into()))
        );
        assert_eq!(hosts[0].address(), "10.0.0.1");
    }

    #[test]
    fn host_line_coerces_bare_scalars() {
        let hosts = Host::parse_line("db1 ansible_port=2222 fast=yes weight=3").unwrap();
        let host = &hosts[0];
        assert_eq!(host.port(), 2222);
        assert_eq!(host.get_var("fast"), Some(&serde_yaml::Value::Bool(true)));
        assert_eq!(
            host.get_var("weight"),
            Some(&serde_yaml::Value::Number(3.into()))
        );
    }

    #[test]
    fn transport_selection() {
        let hosts = Host::parse_line("win1 ansible_connection=winrm").unwrap();
        assert_eq!(hosts[0].transport(), TransportKind::Winrm);
        assert_eq!(hosts[0].port(), 5985);

        let local = Host::new("localhost");
        assert_eq!(local.transport(), TransportKind::Local);
    }

    #[test]
    fn range_line_expands_with_shared_vars() {
        let hosts = Host::parse_line("app[1:3] ansible_user=deploy").unwrap();
        assert_eq!(hosts.len(), 3);
        assert!(hosts.iter().all(|h| h.user().as_deref() == Some("deploy")));
    }
}
