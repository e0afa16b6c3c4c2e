//! Module system: the contract every task module implements, the
//! name/alias registry, and shared parameter plumbing.
//!
//! A module receives the rendered argument mapping plus a
//! [`ModuleContext`] (connection, template engine, host variables, check
//! and diff flags) and returns a [`ModuleOutput`]. Modules never decide
//! host state transitions; the executor does that from the output and the
//! error kind.

pub mod assert;
pub mod blockinfile;
pub mod command;
pub mod copy;
pub mod debug;
pub mod fail;
pub mod file;
pub mod include_vars;
pub mod lineinfile;
pub mod ping;
pub mod replace;
pub mod set_fact;
pub mod setup;
pub mod stat;
pub mod wait_for;
pub mod windows;

use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::connection::{Connection, ConnectionError};
use crate::template::{TemplateEngine, TemplateError};
use crate::vars::VarMap;

/// Errors from module resolution and execution.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("module '{name}' is not provided by this runner: {message}")]
    UnsupportedNamespace { name: String, message: String },

    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("module execution failed: {0}")]
    ExecutionFailed(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for module operations.
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Rendered module arguments.
pub type ModuleParams = IndexMap<String, serde_yaml::Value>;

/// Diff payload attached to results of file-editing modules in diff mode.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DiffPayload {
    pub before: String,
    pub after: String,
    pub before_header: String,
    pub after_header: String,
}

/// What a module reports back.
#[derive(Debug, Clone, Default)]
pub struct ModuleOutput {
    /// The module changed (or, in check mode, would change) remote state.
    pub changed: bool,
    /// The module failed.
    pub failed: bool,
    /// The module declined to run (unmet precondition, unsafe check-mode
    /// simulation).
    pub skipped: bool,
    /// One-line human message.
    pub msg: String,
    /// Module-specific result map.
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Captured stdout for command-style modules.
    pub stdout: Option<String>,
    /// Captured stderr for command-style modules.
    pub stderr: Option<String>,
    /// Exit code for command-style modules.
    pub rc: Option<i32>,
    /// Diff payload when diff mode is active and the module changed a file.
    pub diff: Option<DiffPayload>,
}

impl ModuleOutput {
    /// Success without changes.
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            ..Self::default()
        }
    }

    /// Success with changes.
    pub fn changed(msg: impl Into<String>) -> Self {
        Self {
            changed: true,
            msg: msg.into(),
            ..Self::default()
        }
    }

    /// Failure.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            failed: true,
            msg: msg.into(),
            ..Self::default()
        }
    }

    /// Skipped, with the reason.
    pub fn skipped(msg: impl Into<String>) -> Self {
        Self {
            skipped: true,
            msg: msg.into(),
            ..Self::default()
        }
    }

    /// Attaches a data entry.
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Attaches command output.
    pub fn with_command_output(mut self, stdout: String, stderr: String, rc: i32) -> Self {
        self.stdout = Some(stdout);
        self.stderr = Some(stderr);
        self.rc = Some(rc);
        self
    }

    /// Attaches a diff payload.
    pub fn with_diff(mut self, diff: DiffPayload) -> Self {
        self.diff = Some(diff);
        self
    }
}

/// Execution context handed to a module.
#[derive(Clone)]
pub struct ModuleContext {
    /// Transport to the task's effective target (the delegated host when
    /// `delegate_to` is set).
    pub connection: Arc<dyn Connection>,
    /// Shared template engine (for modules that evaluate expressions,
    /// e.g. `assert`).
    pub engine: Arc<TemplateEngine>,
    /// The originating host's variables.
    pub vars: VarMap,
    /// Dry-run mode: compute would-change, mutate nothing.
    pub check_mode: bool,
    /// Attach diff payloads for file edits.
    pub diff_mode: bool,
    /// Directory of the playbook, for resolving relative `src` paths.
    pub base_dir: PathBuf,
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("connection", &self.connection.identifier())
            .field("check_mode", &self.check_mode)
            .field("diff_mode", &self.diff_mode)
            .finish()
    }
}

/// The contract every module implements.
#[async_trait]
pub trait Module: Send + Sync + std::fmt::Debug {
    /// Primary registry name.
    fn name(&self) -> &'static str;

    /// Additional names resolving to this module.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Parameters that must be present after rendering.
    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    /// Runs the module.
    async fn execute(&self, params: &ModuleParams, ctx: &ModuleContext)
        -> ModuleResult<ModuleOutput>;
}

/// Maps module names (including fully qualified forms) to implementations.
pub struct ModuleRegistry {
    modules: HashMap<&'static str, Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Creates the registry with every built-in module.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        // Command execution
        registry.register(Arc::new(command::CommandModule));
        registry.register(Arc::new(command::ShellModule));
        registry.register(Arc::new(command::RawModule));

        // File management
        registry.register(Arc::new(copy::CopyModule));
        registry.register(Arc::new(file::FileModule));
        registry.register(Arc::new(lineinfile::LineinfileModule));
        registry.register(Arc::new(blockinfile::BlockinfileModule));
        registry.register(Arc::new(replace::ReplaceModule));
        registry.register(Arc::new(stat::StatModule));

        // Control-node logic
        registry.register(Arc::new(ping::PingModule));
        registry.register(Arc::new(debug::DebugModule));
        registry.register(Arc::new(set_fact::SetFactModule));
        registry.register(Arc::new(include_vars::IncludeVarsModule));
        registry.register(Arc::new(assert::AssertModule));
        registry.register(Arc::new(fail::FailModule));

        // Facts and waiting
        registry.register(Arc::new(setup::SetupModule));
        registry.register(Arc::new(wait_for::WaitForModule));

        // Windows counterparts
        registry.register(Arc::new(windows::win_command::WinCommandModule));
        registry.register(Arc::new(windows::win_command::WinShellModule));
        registry.register(Arc::new(windows::win_copy::WinCopyModule));
        registry.register(Arc::new(windows::win_file::WinFileModule));
        registry.register(Arc::new(windows::win_service::WinServiceModule));
        registry.register(Arc::new(windows::win_stat::WinStatModule));
        registry.register(Arc::new(windows::win_lineinfile::WinLineinfileModule));
        registry.register(Arc::new(windows::win_wait_for::WinWaitForModule));

        registry
    }

    /// Registers a module under its name and every alias.
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name(), module.clone());
        for alias in module.aliases() {
            self.modules.insert(alias, module.clone());
        }
    }

    /// True if the (unqualified) name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Resolves a module name. Exact match first; a qualified
    /// `namespace.collection.module` form is stripped when the namespace
    /// maps onto the native registry, and rejected with a precise error
    /// otherwise.
    pub fn resolve(&self, name: &str) -> ModuleResult<Arc<dyn Module>> {
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }

        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() == 3 {
            let (namespace, collection, module_name) = (parts[0], parts[1], parts[2]);
            let native = matches!(
                (namespace, collection),
                ("ansible", "builtin") | ("ansible", "windows") | ("ansible", "posix")
            );
            if native {
                if let Some(module) = self.modules.get(module_name) {
                    return Ok(module.clone());
                }
                return Err(ModuleError::UnknownModule(name.to_string()));
            }
            return Err(ModuleError::UnsupportedNamespace {
                name: name.to_string(),
                message: format!(
                    "collection '{}.{}' has no native implementation here",
                    namespace, collection
                ),
            });
        }

        Err(ModuleError::UnknownModule(name.to_string()))
    }

    /// Resolves, validates required parameters, and executes.
    pub async fn execute(
        &self,
        name: &str,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let module = self.resolve(name)?;
        for required in module.required_params() {
            if !params.contains_key(*required) {
                return Err(ModuleError::MissingParameter(format!(
                    "{} (module '{}')",
                    required, name
                )));
            }
        }
        module.execute(params, ctx).await
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// The process-wide registry, written once at first use.
pub fn global_registry() -> &'static ModuleRegistry {
    static REGISTRY: Lazy<ModuleRegistry> = Lazy::new(ModuleRegistry::with_builtins);
    &REGISTRY
}

/// Typed access to rendered parameters.
pub trait ParamExt {
    fn get_str(&self, key: &str) -> Option<String>;
    fn get_str_required(&self, key: &str) -> ModuleResult<String>;
    fn get_bool(&self, key: &str) -> ModuleResult<Option<bool>>;
    fn get_bool_or(&self, key: &str, default: bool) -> bool;
    fn get_u64(&self, key: &str) -> ModuleResult<Option<u64>>;
    /// File modes arrive as octal strings (`'0644'`) or numbers.
    fn get_mode(&self, key: &str) -> ModuleResult<Option<u32>>;
    fn get_seq(&self, key: &str) -> Option<Vec<serde_yaml::Value>>;
}

impl ParamExt for ModuleParams {
    fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn get_str_required(&self, key: &str) -> ModuleResult<String> {
        self.get_str(key)
            .ok_or_else(|| ModuleError::MissingParameter(key.to_string()))
    }

    fn get_bool(&self, key: &str) -> ModuleResult<Option<bool>> {
        match self.get(key) {
            None | Some(serde_yaml::Value::Null) => Ok(None),
            Some(serde_yaml::Value::Bool(b)) => Ok(Some(*b)),
            Some(serde_yaml::Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(Some(true)),
                "false" | "no" | "0" | "off" => Ok(Some(false)),
                _ => Err(ModuleError::InvalidParameter(format!(
                    "{} must be a boolean, got '{}'",
                    key, s
                ))),
            },
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be a boolean",
                key
            ))),
        }
    }

    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).ok().flatten().unwrap_or(default)
    }

    fn get_u64(&self, key: &str) -> ModuleResult<Option<u64>> {
        match self.get(key) {
            None | Some(serde_yaml::Value::Null) => Ok(None),
            Some(serde_yaml::Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
                ModuleError::InvalidParameter(format!("{} must be a non-negative integer", key))
            }),
            Some(serde_yaml::Value::String(s)) => s.parse().map(Some).map_err(|_| {
                ModuleError::InvalidParameter(format!("{} must be an integer, got '{}'", key, s))
            }),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be an integer",
                key
            ))),
        }
    }

    fn get_mode(&self, key: &str) -> ModuleResult<Option<u32>> {
        match self.get(key) {
            None | Some(serde_yaml::Value::Null) => Ok(None),
            Some(serde_yaml::Value::String(s)) => {
                u32::from_str_radix(s.trim_start_matches("0o"), 8)
                    .map(Some)
                    .map_err(|_| {
                        ModuleError::InvalidParameter(format!(
                            "{} must be an octal mode, got '{}'",
                            key, s
                        ))
                    })
            }
            // A bare YAML number like 0644 has already been parsed as
            // decimal 644; reinterpret its digits as octal.
            Some(serde_yaml::Value::Number(n)) => {
                let digits = n.to_string();
                u32::from_str_radix(&digits, 8).map(Some).map_err(|_| {
                    ModuleError::InvalidParameter(format!("{} must be an octal mode", key))
                })
            }
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be a mode string",
                key
            ))),
        }
    }

    fn get_seq(&self, key: &str) -> Option<Vec<serde_yaml::Value>> {
        match self.get(key)? {
            serde_yaml::Value::Sequence(seq) => Some(seq.clone()),
            other => Some(vec![other.clone()]),
        }
    }
}

/// Builds the unified-diff payload for file-editing modules.
pub(crate) fn file_diff(before: &str, after: &str, path: &str) -> DiffPayload {
    DiffPayload {
        before: before.to_string(),
        after: after.to_string(),
        before_header: format!("{} (before)", path),
        after_header: format!("{} (after)", path),
    }
}

/// Renders a unified diff string for verbose display.
pub(crate) fn unified_diff(before: &str, after: &str) -> String {
    similar::TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .to_string()
}

#[cfg(test)]
pub(crate) mod tests_support {
    //! Shared fixtures for module unit tests.

    use super::*;
    use crate::connection::local::LocalConnection;

    /// A context wired to the local transport, as module tests use it.
    pub(crate) fn local_context(check_mode: bool, diff_mode: bool) -> ModuleContext {
        ModuleContext {
            connection: Arc::new(LocalConnection::new()),
            engine: Arc::new(TemplateEngine::default()),
            vars: VarMap::new(),
            check_mode,
            diff_mode,
            base_dir: std::env::temp_dir(),
        }
    }
}
