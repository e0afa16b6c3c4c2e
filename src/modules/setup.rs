//! `setup` module: minimal fact gathering.
//!
//! Reports at least hostname, OS family, distribution, and architecture.
//! POSIX targets are probed with `uname` and `/etc/os-release`; Windows
//! targets through environment variables and CIM.

use async_trait::async_trait;

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult};
use crate::connection::RunOptions;
use crate::inventory::TransportKind;

#[derive(Debug)]
pub struct SetupModule;

#[async_trait]
impl Module for SetupModule {
    fn name(&self) -> &'static str {
        "setup"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["gather_facts"]
    }

    async fn execute(
        &self,
        _params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let facts = match ctx.connection.kind() {
            TransportKind::Winrm => gather_windows(ctx).await?,
            _ => gather_posix(ctx).await?,
        };
        Ok(ModuleOutput::ok("").with_data("ansible_facts", serde_json::Value::Object(facts)))
    }
}

async fn gather_posix(
    ctx: &ModuleContext,
) -> ModuleResult<serde_json::Map<String, serde_json::Value>> {
    let out = ctx
        .connection
        .run(
            "uname -s; uname -n; uname -m; cat /etc/os-release 2>/dev/null || true",
            RunOptions::sh(),
        )
        .await?;

    let mut lines = out.stdout.lines();
    let system = lines.next().unwrap_or("Linux").trim().to_string();
    let hostname = lines.next().unwrap_or("").trim().to_string();
    let machine = lines.next().unwrap_or("").trim().to_string();

    let mut distribution = system.clone();
    let mut distribution_id = String::new();
    for line in lines {
        if let Some(value) = line.strip_prefix("NAME=") {
            distribution = value.trim_matches('"').to_string();
        } else if let Some(value) = line.strip_prefix("ID=") {
            distribution_id = value.trim_matches('"').to_lowercase();
        }
    }

    let os_family = match distribution_id.as_str() {
        "debian" | "ubuntu" | "raspbian" | "linuxmint" => "Debian",
        "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "ol" => "RedHat",
        "sles" | "opensuse" | "opensuse-leap" => "Suse",
        "alpine" => "Alpine",
        "arch" => "Archlinux",
        _ if system == "Darwin" => "Darwin",
        _ => "Linux",
    };

    let mut facts = serde_json::Map::new();
    facts.insert("ansible_system".into(), serde_json::json!(system));
    facts.insert("ansible_hostname".into(), serde_json::json!(hostname));
    facts.insert("ansible_architecture".into(), serde_json::json!(machine));
    facts.insert("ansible_os_family".into(), serde_json::json!(os_family));
    facts.insert(
        "ansible_distribution".into(),
        serde_json::json!(distribution),
    );
    Ok(facts)
}

async fn gather_windows(
    ctx: &ModuleContext,
) -> ModuleResult<serde_json::Map<String, serde_json::Value>> {
    let script = r#"$os = Get-CimInstance Win32_OperatingSystem
Write-Output $env:COMPUTERNAME
Write-Output $env:PROCESSOR_ARCHITECTURE
Write-Output $os.Caption"#;
    let out = ctx
        .connection
        .run(script, RunOptions::powershell())
        .await?;

    let mut lines = out.stdout.lines();
    let hostname = lines.next().unwrap_or("").trim().to_string();
    let architecture = lines.next().unwrap_or("").trim().to_string();
    let caption = lines.next().unwrap_or("Windows").trim().to_string();

    let mut facts = serde_json::Map::new();
    facts.insert("ansible_system".into(), serde_json::json!("Win32NT"));
    facts.insert("ansible_hostname".into(), serde_json::json!(hostname));
    facts.insert(
        "ansible_architecture".into(),
        serde_json::json!(architecture),
    );
    facts.insert("ansible_os_family".into(), serde_json::json!("Windows"));
    facts.insert("ansible_distribution".into(), serde_json::json!(caption));
    Ok(facts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests_support::local_context;

    #[tokio::test]
    async fn gathers_core_facts_locally() {
        let ctx = local_context(false, false);
        let out = SetupModule
            .execute(&ModuleParams::new(), &ctx)
            .await
            .unwrap();
        let facts = out.data["ansible_facts"].as_object().unwrap();
        assert!(facts.contains_key("ansible_hostname"));
        assert!(facts.contains_key("ansible_os_family"));
        assert!(facts.contains_key("ansible_distribution"));
        assert!(facts.contains_key("ansible_architecture"));
    }
}
