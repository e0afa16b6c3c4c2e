//! Variable precedence resolution.
//!
//! Per host, a flat variable mapping is computed by merging tiers in order
//! of increasing priority (later wins on key collision; mappings merge
//! shallowly, lists replace):
//!
//! 1. group vars from `all`
//! 2. other group vars (child groups override parents; siblings at equal
//!    depth apply in alphabetical name order, so the alphabetically later
//!    group wins)
//! 3. `group_vars/` overlays (same group ordering)
//! 4. host vars from the inventory source
//! 5. `host_vars/` overlays
//! 6. play `vars` / `vars_files` (applied by the executor)
//! 7. `--extra-vars` (applied by the executor)
//! 8. runtime `set_fact` / `register` (applied by the executor)

use indexmap::IndexMap;

use crate::inventory::{Host, Inventory};

/// A flat variable mapping.
pub type VarMap = IndexMap<String, serde_yaml::Value>;

/// Inserts `value` under `key`, shallow-merging when both the existing and
/// the new value are mappings. Lists and scalars replace.
pub fn merge_var(vars: &mut VarMap, key: &str, value: serde_yaml::Value) {
    if let (Some(serde_yaml::Value::Mapping(existing)), serde_yaml::Value::Mapping(new)) =
        (vars.get_mut(key), &value)
    {
        for (k, v) in new {
            existing.insert(k.clone(), v.clone());
        }
        return;
    }
    vars.insert(key.to_string(), value);
}

/// Merges every entry of `source` into `vars` with [`merge_var`] rules.
pub fn merge_all(vars: &mut VarMap, source: &VarMap) {
    for (key, value) in source {
        merge_var(vars, key, value.clone());
    }
}

/// Computes tiers 1–5 for a host, plus the magic variables.
pub fn merged_host_vars(inventory: &Inventory, host: &Host) -> VarMap {
    let mut vars = VarMap::new();

    // Groups ordered least- to most-specific: by depth ascending, then
    // alphabetical within a depth. Later application wins.
    let mut groups = inventory.transitive_groups(host);
    groups.sort_by(|(an, ad), (bn, bd)| ad.cmp(bd).then_with(|| an.cmp(bn)));

    for (name, _) in &groups {
        if let Some(group) = inventory.get_group(name) {
            merge_all(&mut vars, &group.vars);
        }
    }
    for (name, _) in &groups {
        if let Some(group) = inventory.get_group(name) {
            merge_all(&mut vars, &group.overlay_vars);
        }
    }

    merge_all(&mut vars, &host.vars);
    merge_all(&mut vars, &host.overlay_vars);

    insert_magic_vars(&mut vars, inventory, host);
    vars
}

/// The computed variables every host context carries:
/// `inventory_hostname`, `inventory_hostname_short`, `ansible_host`,
/// `groups`, and `group_names`.
fn insert_magic_vars(vars: &mut VarMap, inventory: &Inventory, host: &Host) {
    vars.insert(
        "inventory_hostname".to_string(),
        serde_yaml::Value::String(host.name.clone()),
    );
    let short = host.name.split('.').next().unwrap_or(&host.name);
    vars.insert(
        "inventory_hostname_short".to_string(),
        serde_yaml::Value::String(short.to_string()),
    );
    vars.insert(
        "ansible_host".to_string(),
        serde_yaml::Value::String(host.address()),
    );

    let mut groups_map = serde_yaml::Mapping::new();
    for group in inventory.groups() {
        let members: Vec<serde_yaml::Value> = inventory
            .select(&group.name)
            .unwrap_or_default()
            .iter()
            .map(|h| serde_yaml::Value::String(h.name.clone()))
            .collect();
        groups_map.insert(
            serde_yaml::Value::String(group.name.clone()),
            serde_yaml::Value::Sequence(members),
        );
    }
    vars.insert(
        "groups".to_string(),
        serde_yaml::Value::Mapping(groups_map),
    );

    let names: Vec<serde_yaml::Value> = inventory
        .group_names_for(host)
        .into_iter()
        .map(serde_yaml::Value::String)
        .collect();
    vars.insert(
        "group_names".to_string(),
        serde_yaml::Value::Sequence(names),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Inventory;

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn host_vars_override_group_vars() {
        let inv = Inventory::from_ini(
            "[web]\nweb1 color=blue\n\n[web:vars]\ncolor=green\nport=80\n",
        )
        .unwrap();
        let host = inv.get_host("web1").unwrap();
        let vars = merged_host_vars(&inv, host);
        assert_eq!(vars["color"], yaml("blue"));
        assert_eq!(vars["port"], yaml("80"));
    }

    #[test]
    fn child_group_overrides_parent() {
        let content = r#"
[parent:children]
child

[parent:vars]
tier=parent

[child]
h1

[child:vars]
tier=child
"#;
        let inv = Inventory::from_ini(content).unwrap();
        let host = inv.get_host("h1").unwrap();
        let vars = merged_host_vars(&inv, host);
        assert_eq!(vars["tier"], yaml("child"));
    }

    #[test]
    fn sibling_conflict_resolves_alphabetically() {
        let content = r#"
[alpha]
h1

[beta]
h1

[alpha:vars]
who=alpha

[beta:vars]
who=beta
"#;
        let inv = Inventory::from_ini(content).unwrap();
        let host = inv.get_host("h1").unwrap();
        let vars = merged_host_vars(&inv, host);
        // Equal depth: alphabetical application order, later wins.
        assert_eq!(vars["who"], yaml("beta"));
    }

    #[test]
    fn mappings_merge_shallowly_lists_replace() {
        let mut vars = VarMap::new();
        merge_var(&mut vars, "conf", yaml("{a: 1, b: 2}"));
        merge_var(&mut vars, "conf", yaml("{b: 3, c: 4}"));
        assert_eq!(vars["conf"], yaml("{a: 1, b: 3, c: 4}"));

        merge_var(&mut vars, "list", yaml("[1, 2]"));
        merge_var(&mut vars, "list", yaml("[3]"));
        assert_eq!(vars["list"], yaml("[3]"));
    }

    #[test]
    fn magic_vars_present() {
        let inv = Inventory::from_ini("[web]\nweb1.example.com ansible_host=10.0.0.1\n").unwrap();
        let host = inv.get_host("web1.example.com").unwrap();
        let vars = merged_host_vars(&inv, host);
        assert_eq!(vars["inventory_hostname"], yaml("web1.example.com"));
        assert_eq!(vars["inventory_hostname_short"], yaml("web1"));
        assert_eq!(vars["ansible_host"], yaml("10.0.0.1"));
        assert_eq!(vars["group_names"], yaml("[web]"));
    }
}
