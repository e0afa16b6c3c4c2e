//! Error types for runbook.
//!
//! One crate-level [`Error`] carries the exit-code mapping the CLI relies
//! on; the larger subsystems (inventory, template, connection, modules)
//! define their own error enums and convert into this one.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for runbook operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for runbook.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed inventory or playbook. Fatal to the whole run.
    #[error("Parse error in '{}'{}: {message}", .path.display(), .line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    Parse {
        /// File the error was found in
        path: PathBuf,
        /// Human-readable description
        message: String,
        /// Line number, when the parser knows it
        line: Option<usize>,
    },

    /// Syntactically valid input using a construct outside the supported
    /// subset. Fatal to the whole run.
    #[error("Unsupported feature: {feature}")]
    UnsupportedFeature {
        /// The offending construct
        feature: String,
        /// What to do instead
        suggestion: Option<String>,
    },

    /// Template rendering or expression evaluation failed.
    #[error(transparent)]
    Template(#[from] crate::template::TemplateError),

    /// Inventory loading or host resolution failed.
    #[error(transparent)]
    Inventory(#[from] crate::inventory::InventoryError),

    /// Transport-level failure.
    #[error(transparent)]
    Connection(#[from] crate::connection::ConnectionError),

    /// Module resolution or execution failed.
    #[error(transparent)]
    Module(#[from] crate::modules::ModuleError),

    /// Vault decryption failed.
    #[error("Vault error: {0}")]
    Vault(String),

    /// One or more hosts failed during the run. Carries no message of its
    /// own; the reporter has already printed the details.
    #[error("one or more hosts failed")]
    HostsFailed,

    /// The run was interrupted (SIGINT / console break).
    #[error("execution interrupted")]
    Interrupted,

    /// Too many hosts for the connection bound.
    #[error("play targets {hosts} hosts, exceeding the connection limit of {limit}")]
    TooManyHosts {
        /// Hosts selected by the play
        hosts: usize,
        /// Configured upper bound
        limit: usize,
    },

    /// IO error on the control node.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML error outside the playbook/inventory parsers.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error (structured output, extra-vars).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bug. Should never be user-visible in a correct build.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a parse error for a file without line information.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
            line: None,
        }
    }

    /// Creates a parse error pinned to a line.
    pub fn parse_at(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
            line: Some(line),
        }
    }

    /// Creates an unsupported-feature error.
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            feature: feature.into(),
            suggestion: None,
        }
    }

    /// Creates an unsupported-feature error with a suggestion.
    pub fn unsupported_with(feature: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            feature: feature.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// Maps the error onto the documented process exit codes.
    ///
    /// `0` success, `2` host failures, `3` parse error, `4` unsupported
    /// feature, `130` interrupted, `1` everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::HostsFailed => 2,
            Error::Parse { .. } | Error::Inventory(_) | Error::Yaml(_) => 3,
            Error::UnsupportedFeature { .. } => 4,
            Error::Interrupted => 130,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(Error::HostsFailed.exit_code(), 2);
        assert_eq!(Error::parse("pb.yml", "bad").exit_code(), 3);
        assert_eq!(Error::unsupported("serial").exit_code(), 4);
        assert_eq!(Error::Interrupted.exit_code(), 130);
        assert_eq!(Error::Internal("bug".into()).exit_code(), 1);
    }

    #[test]
    fn parse_error_carries_location() {
        let err = Error::parse_at("hosts.ini", 12, "bad section");
        match err {
            Error::Parse { path, line, .. } => {
                assert_eq!(path, PathBuf::from("hosts.ini"));
                assert_eq!(line, Some(12));
            }
            _ => panic!("expected parse error"),
        }
    }
}
