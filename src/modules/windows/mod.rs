//! Windows counterparts of the core modules. All of them drive the
//! target through PowerShell over the Windows remote-shell transport.

pub mod win_command;
pub mod win_copy;
pub mod win_file;
pub mod win_lineinfile;
pub mod win_service;
pub mod win_stat;
pub mod win_wait_for;

/// Single-quote a string for PowerShell.
pub(crate) fn ps_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
