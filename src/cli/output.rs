//! Terminal output: banners, per-role results, tables and the recap.

use colored::{Color, Colorize};
use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::executor::{RoleOutcome, UnitStatus};

const ROLE_COLORS: &[Color] = &[
    Color::Cyan,
    Color::Magenta,
    Color::Yellow,
    Color::Green,
    Color::Blue,
    Color::BrightCyan,
    Color::BrightMagenta,
    Color::BrightYellow,
];

/// Output formatter
pub struct OutputFormatter {
    use_color: bool,
    verbosity: u8,
    start_time: Instant,
}

impl OutputFormatter {
    pub fn new(use_color: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();
        colored::control::set_override(use_color);

        Self {
            use_color,
            verbosity,
            start_time: Instant::now(),
        }
    }

    pub fn use_color(&self) -> bool {
        self.use_color
    }

    /// Print a banner/header
    pub fn banner(&self, title: &str) {
        let line = "=".repeat(title.len() + 4);
        if self.use_color {
            println!("\n{}", line.bright_blue());
            println!("{}", format!("  {}  ", title).bright_blue().bold());
            println!("{}\n", line.bright_blue());
        } else {
            println!("\n{}", line);
            println!("  {}  ", title);
            println!("{}\n", line);
        }
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        if self.use_color {
            println!("\n{}", title.cyan().bold());
            println!("{}", "-".repeat(title.len()).cyan());
        } else {
            println!("\n{}", title);
            println!("{}", "-".repeat(title.len()));
        }
    }

    fn status_str(&self, status: UnitStatus) -> String {
        let plain = status.to_string();
        if !self.use_color {
            return plain;
        }
        match status {
            UnitStatus::Succeeded => plain.green().to_string(),
            UnitStatus::AlreadyInState => plain.cyan().to_string(),
            UnitStatus::Failed => plain.red().bold().to_string(),
        }
    }

    /// One line per unit result of a role.
    pub fn role_outcome(&self, outcome: &RoleOutcome) {
        for result in &outcome.results {
            let role = if self.use_color {
                outcome.role.bright_white().bold().to_string()
            } else {
                outcome.role.clone()
            };
            print!("{}: [{}] {}", self.status_str(result.status), role, result.label);
            if result.status == UnitStatus::Failed {
                print!(" => {}", result.failure_detail());
            } else if self.verbosity >= 1 && !result.stdout.trim().is_empty() {
                print!(" => {}", result.stdout.trim());
            }
            println!();
        }
    }

    /// Per-role summary of an action.
    pub fn recap(&self, title: &str, outcomes: &[RoleOutcome]) {
        let header = format!("{} RECAP", title.to_uppercase());
        let stars = "*".repeat(80_usize.saturating_sub(header.len() + 1));
        if self.use_color {
            println!("\n{} {}", header.bright_white().bold(), stars.bright_black());
        } else {
            println!("\n{} {}", header, stars);
        }

        let mut stats: IndexMap<&str, RoleStats> = IndexMap::new();
        for outcome in outcomes {
            let entry = stats.entry(outcome.role.as_str()).or_default();
            for result in &outcome.results {
                entry.record(result.status);
            }
        }

        for (role, s) in &stats {
            if self.use_color {
                let role = if s.failed > 0 {
                    role.red().bold()
                } else if s.ok > 0 {
                    role.green()
                } else {
                    role.cyan()
                };
                let fmt_stat = |label: &str, value: u32, color: Color| -> String {
                    if value > 0 {
                        format!("{}={:<4}", label.color(color), value)
                    } else {
                        format!("{}={:<4}", label, value).dimmed().to_string()
                    }
                };
                println!(
                    "{:<30} : {} {} {}",
                    role,
                    fmt_stat("ok", s.ok, Color::Green),
                    fmt_stat("unchanged", s.unchanged, Color::Cyan),
                    fmt_stat("failed", s.failed, Color::Red)
                );
            } else {
                println!(
                    "{:<30} : ok={:<4} unchanged={:<4} failed={:<4}",
                    role, s.ok, s.unchanged, s.failed
                );
            }
        }

        let took = format_duration(self.start_time.elapsed());
        if self.use_color {
            println!("\n{} {}", "Took".bright_black(), took.bright_white());
        } else {
            println!("\nTook {}", took);
        }
    }

    /// One log line, prefixed by its role.
    pub fn log_line(&self, role: &str, line: &str) {
        if self.use_color {
            println!("{} {}", format!("[{}]", role).color(role_color(role)), line);
        } else {
            println!("[{}] {}", role, line);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }

    /// Print a hint message
    pub fn hint(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "HINT:".cyan().bold(), message);
        } else {
            eprintln!("HINT: {}", message);
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.use_color {
            println!("{}", message.green().bold());
        } else {
            println!("{}", message);
        }
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if self.verbosity < 1 {
            return;
        }
        if self.use_color {
            println!("{} {}", "INFO:".blue(), message);
        } else {
            println!("INFO: {}", message);
        }
    }

    /// Spinner for long steps such as a maven build.
    pub fn create_spinner(&self, message: &str) -> ProgressBar {
        let sp = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
            sp.set_style(style);
        }
        sp.set_message(message.to_string());
        sp.enable_steady_tick(Duration::from_millis(100));
        sp
    }

    /// Print a table
    pub fn table(&self, headers: &[&str], rows: &[Vec<String>]) {
        let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
        for row in rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.len());
                }
            }
        }

        let header_line = headers
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
            .collect::<Vec<_>>()
            .join(" | ");
        let sep = widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-");
        if self.use_color {
            println!("{}", header_line.bright_white().bold());
            println!("{}", sep.bright_black());
        } else {
            println!("{}", header_line);
            println!("{}", sep);
        }

        for row in rows {
            let line = row
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{:width$}", cell, width = *w))
                .collect::<Vec<_>>()
                .join(" | ");
            println!("{}", line);
        }
    }

    /// Flush stdout
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Default)]
struct RoleStats {
    ok: u32,
    unchanged: u32,
    failed: u32,
}

impl RoleStats {
    fn record(&mut self, status: UnitStatus) {
        match status {
            UnitStatus::Succeeded => self.ok += 1,
            UnitStatus::AlreadyInState => self.unchanged += 1,
            UnitStatus::Failed => self.failed += 1,
        }
    }
}

/// Stable color for a role name.
fn role_color(role: &str) -> Color {
    let hash = role
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    ROLE_COLORS[hash % ROLE_COLORS.len()]
}

/// Format a duration as a human-readable string
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}.{:03}s", secs, millis)
    } else {
        format!("{}ms", millis)
    }
}
