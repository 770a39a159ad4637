use owo_colors::OwoColorize;
use stackpull_core::BatchSummary;

use crate::VERSION;

/// Print a styled banner for verbose mode
pub fn print_banner() {
    eprintln!("\n{} {} {}", "stackpull".bold().bright_blue(), "v".dimmed(), VERSION.dimmed());
    eprintln!("{}", "Download newsletter posts and their images\n".dimmed());
}

/// Print a styled step message
pub fn print_step(step: usize, total: usize, message: &str) {
    eprintln!("{} {}", format!("[{}/{}]", step, total).dimmed(), message.bright_cyan());
}

/// Print a success message
pub fn print_success(message: &str) {
    eprintln!("{} {}", "✓".green(), message.bright_green());
}

/// Print an info message
pub fn print_info(message: &str) {
    eprintln!("{} {}", "ℹ".blue(), message.bright_blue());
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow(), message.bright_yellow());
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message.bright_red());
}

/// Progress prefix such as `[3/12]`, padded to the width of the total
pub fn progress(done: usize, total: usize) -> String {
    let width = total.to_string().len();
    format!("[{:>width$}/{}]", done, total, width = width)
}

/// Print the batch summary
pub fn print_summary(summary: &BatchSummary) {
    eprintln!("\n{}", "═".repeat(40).dimmed());
    eprintln!("{}", "Summary".bold().cyan());
    eprintln!("{}", "═".repeat(40).dimmed());
    eprintln!("  {} {}", "Downloaded:".dimmed(), summary.completed.to_string().bright_green());
    eprintln!("  {} {}", "Skipped:".dimmed(), summary.skipped.to_string().bright_white());

    let failed = summary.failed.to_string();
    if summary.failed > 0 {
        eprintln!("  {} {}", "Failed:".dimmed(), failed.bright_red());
    } else {
        eprintln!("  {} {}", "Failed:".dimmed(), failed.bright_white());
    }
    eprintln!("  {} {}\n", "Recorded:".dimmed(), summary.recorded.to_string().bright_white());
}
