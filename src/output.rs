//! Human output stream: play and task banners, per-host status lines,
//! and the final recap.

use colored::Colorize;
use std::collections::BTreeMap;

use crate::report::{HostStats, TaskStatus};

/// Print a play banner.
pub fn play_banner(name: &str) {
    let header = format!("PLAY [{}]", name);
    let stars = "*".repeat(79_usize.saturating_sub(header.len() + 1));
    println!("\n{} {}", header.bright_white().bold(), stars.bright_black());
}

/// Print a task banner.
pub fn task_banner(name: &str) {
    let header = format!("TASK [{}]", name);
    let stars = "*".repeat(79_usize.saturating_sub(header.len() + 1));
    println!("\n{} {}", header.bright_white().bold(), stars.bright_black());
}

/// Print a single host's status line for the current task.
pub fn host_line(host: &str, status: TaskStatus, msg: Option<&str>) {
    let label = match status {
        TaskStatus::Ok => "ok".green().to_string(),
        TaskStatus::Changed => "changed".yellow().to_string(),
        TaskStatus::Failed => "failed".red().bold().to_string(),
        TaskStatus::Skipped => "skipping".cyan().to_string(),
        TaskStatus::Unreachable => "unreachable".red().bold().to_string(),
    };
    match msg {
        Some(msg) if !msg.is_empty() => {
            println!("{}: [{}] => {}", label, host.bright_white().bold(), msg)
        }
        _ => println!("{}: [{}]", label, host.bright_white().bold()),
    }
}

/// Print a warning to stderr.
pub fn warning(msg: &str) {
    eprintln!("{}", format!("[WARNING]: {}", msg).yellow());
}

/// Print an error to stderr.
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print the final recap table.
pub fn recap(stats: &BTreeMap<String, HostStats>) {
    println!(
        "\n{} {}",
        "PLAY RECAP".bright_white().bold(),
        "*".repeat(69).bright_black()
    );

    for (host, s) in stats {
        let host_colored = if s.unreachable > 0 || s.failed > 0 {
            host.red().bold()
        } else if s.changed > 0 {
            host.yellow()
        } else {
            host.green()
        };

        println!(
            "{:<26} : {}={:<4} {}={:<4} {}={:<4} {}={:<4} {}={:<4} {}={:<4} {}={:<4}",
            host_colored,
            "ok".green(),
            s.ok,
            "changed".yellow(),
            s.changed,
            "failed".red(),
            s.failed,
            "skipped".cyan(),
            s.skipped,
            "unreachable".red(),
            s.unreachable,
            "rescued".cyan(),
            s.rescued,
            "ignored".cyan(),
            s.ignored,
        );
    }
}

/// Print a unified diff (diff mode, verbose).
pub fn diff(payload: &crate::modules::DiffPayload) {
    println!("{}", format!("--- {}", payload.before_header).red());
    println!("{}", format!("+++ {}", payload.after_header).green());
    let text = crate::modules::unified_diff(&payload.before, &payload.after);
    for line in text.lines() {
        if line.starts_with('+') {
            println!("{}", line.green());
        } else if line.starts_with('-') {
            println!("{}", line.red());
        } else {
            println!("{}", line);
        }
    }
}
