//! # runbook - a minimal configuration-management runner
//!
//! runbook executes declarative playbooks against an inventory of hosts
//! over pluggable transports (local subprocess, SSH, Windows remote
//! shell), reporting per-host results and a final recap.
//!
//! ## Core concepts
//!
//! - **Inventory**: hosts and groups with variables, parsed from the
//!   line-oriented sections format, YAML, or a dynamic executable
//! - **Playbooks**: ordered plays, each binding a host selector to task
//!   sections, blocks, and handlers
//! - **Modules**: units of work resolved by name through a registry
//! - **Transports**: implementations of the [`connection::Connection`]
//!   contract
//! - **Templating**: strict `{{ … }}` interpolation with a fixed
//!   filter/test/lookup surface
//!
//! ## Architecture
//!
//! ```text
//! playbook parser ─┐                 ┌─ template engine
//!                  ├─► executor ─────┤
//! inventory ───────┘   (linear       ├─ module registry
//!                       strategy)    └─ connection manager ─► hosts
//! ```
//!
//! The executor runs plays sequentially; within a play each task fans
//! out across all eligible hosts with bounded concurrency before the
//! next task starts. Results stream into the reporter, which renders the
//! human output and the structured run document.
//!
//! ## Quick example
//!
//! ```rust,ignore
//! use runbook::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> runbook::error::Result<()> {
//!     let inventory = Inventory::load("hosts.ini")?;
//!     let playbook = PlaybookParser::new("site.yml").parse()?;
//!     let connections = Arc::new(ConnectionManager::new(ConnectSettings::default()));
//!     let runner = PlaybookRunner::new(inventory, RunnerOptions::default(), connections, None);
//!     runner.run(&[playbook]).await
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::connection::{
        ConnectSettings, Connection, ConnectionManager, FileStat, RunOptions, RunOutput,
    };
    pub use crate::error::{Error, Result};
    pub use crate::executor::{HostContext, PlaybookRunner, RunnerOptions};
    pub use crate::inventory::{Group, Host, Inventory, TransportKind};
    pub use crate::modules::{Module, ModuleOutput, ModuleRegistry};
    pub use crate::playbook::{Play, Playbook, PlaybookParser, Task};
    pub use crate::report::{Reporter, TaskResult, TaskStatus};
    pub use crate::template::TemplateEngine;
    pub use crate::vault::VaultLib;
}

pub mod cli;
pub mod config;
pub mod error;

pub mod inventory;
pub mod vars;

pub mod template;
pub mod vault;

pub mod connection;
pub mod modules;

pub mod playbook;
pub mod roles;

pub mod executor;

pub mod output;
pub mod report;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
