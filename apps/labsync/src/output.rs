//! Terminal output helpers for consistent CLI formatting

use serde::Serialize;

use labsync_db::SyncRun;

use crate::error::CliResult;

/// Check if color output is enabled
fn use_color() -> bool {
    std::env::var("NO_COLOR").is_err()
}

/// Print a success message (green checkmark)
pub fn print_success(message: &str) {
    if use_color() {
        println!("\x1b[32m✓\x1b[0m {message}");
    } else {
        println!("OK: {message}");
    }
}

/// Print a warning message (yellow)
pub fn print_warning(message: &str) {
    if use_color() {
        eprintln!("\x1b[33mWarning:\x1b[0m {message}");
    } else {
        eprintln!("Warning: {message}");
    }
}

/// Print a key-value pair with consistent formatting
pub fn print_key_value(key: &str, value: &str) {
    if use_color() {
        println!("  \x1b[1m{key}:\x1b[0m {value}");
    } else {
        println!("  {key}: {value}");
    }
}

/// Print `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the details of one run.
pub fn print_run(run: &SyncRun) {
    print_key_value("Run", &run.id.to_string());
    print_key_value("Kind", &run.kind.to_string());
    print_key_value("Status", &run.status.to_string());
    if let Some(since) = run.since {
        print_key_value("Since", &since.to_rfc3339());
    }
    if let Some(origin) = &run.triggered_by {
        print_key_value("Triggered by", origin);
    }
    print_key_value("Started", &run.started_at.to_rfc3339());
    if let Some(finished) = run.finished_at {
        print_key_value("Finished", &finished.to_rfc3339());
    }
    if let Some(ms) = run.duration_ms {
        print_key_value("Duration", &format!("{ms} ms"));
    }
    let c = &run.counters;
    print_key_value(
        "Records",
        &format!(
            "{} seen, {} created, {} updated, {} unchanged, {} reactivated, {} deactivated, {} skipped",
            c.records_seen, c.created, c.updated, c.unchanged, c.reactivated, c.deactivated, c.skipped
        ),
    );
    if let Some(message) = &run.failure_message {
        print_key_value("Failure", message);
    }
    for entry in run.errors.iter().take(20) {
        print_warning(&format!(
            "{} [{}]: {}",
            entry.external_id.as_deref().unwrap_or("-"),
            entry.kind,
            entry.message
        ));
    }
    if run.errors.len() > 20 {
        print_warning(&format!("... and {} more record errors", run.errors.len() - 20));
    }
}

/// One-line summary of a run, for listings.
pub fn run_line(run: &SyncRun) -> String {
    format!(
        "{}  {:<11} {:<9} {}  seen={} touched={} skipped={}",
        run.id,
        run.kind.to_string(),
        run.status.to_string(),
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        run.counters.records_seen,
        run.counters.touched(),
        run.counters.skipped
    )
}
