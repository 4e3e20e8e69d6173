//! Terminal output for `apr-prune`.
//!
//! Plain results go to stdout; warnings go to stderr so `inspect --json`
//! output stays machine-readable.

use colored::Colorize;
use std::fmt::Display;

/// Width keys are padded to so values line up in a section.
const KEY_WIDTH: usize = 26;

/// Print a section header
pub(crate) fn section(title: &str) {
    println!("\n{}", format!("=== {title} ===").cyan().bold());
}

/// Print an aligned key-value pair
pub(crate) fn kv(key: &str, value: impl Display) {
    let key = format!("{:<KEY_WIDTH$}", format!("{key}:"));
    println!("  {} {}", key.white().bold(), value);
}

/// Print `before -> after` with the relative reduction.
pub(crate) fn shrink(key: &str, before: usize, after: usize) {
    let reduction = reduction_percent(before, after);
    kv(
        key,
        format!("{before} -> {after} ({})", format!("-{reduction:.1}%").green()),
    );
}

fn reduction_percent(before: usize, after: usize) -> f64 {
    if before == 0 {
        0.0
    } else {
        100.0 * (1.0 - after as f64 / before as f64)
    }
}

/// Print the pruned model's location.
pub(crate) fn saved(path: &std::path::Path) {
    println!("{} pruned model saved to {}", "[DONE]".green().bold(), path.display());
}

/// Print a warning to stderr
pub(crate) fn warning(msg: &str) {
    eprintln!("{} {}", "[WARN]".yellow().bold(), msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduction_percent() {
        assert_eq!(reduction_percent(200, 150), 25.0);
        assert_eq!(reduction_percent(10, 10), 0.0);
        assert_eq!(reduction_percent(0, 0), 0.0);
    }
}
