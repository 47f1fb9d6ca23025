//! Utilities for terminal output during scanning.
//!
//! Matches are the only thing written to stdout (besides the header line),
//! so the output of a scan can be piped straight into a file. Everything
//! meant for the person at the terminal goes to stderr.
use crate::input::ScanConfig;
use crate::scanner::ProbeResult;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use log::error;
use serde_derive::Serialize;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Terminal User Interface Module for hipscan
/// Defines macros to use
#[macro_export]
macro_rules! warning {
    ($name:expr) => {{
        use colored::Colorize;
        eprintln!("{} {}", "[!]".red().bold(), $name);
    }};
    ($name:expr, $greppable:expr, $accessible:expr) => {{
        use colored::Colorize;
        // if not greppable then print, otherwise no else statement so do not print.
        if !$greppable {
            if $accessible {
                eprintln!("{}", $name);
            } else {
                eprintln!("{} {}", "[!]".red().bold(), $name);
            }
        }
    }};
}

#[macro_export]
macro_rules! detail {
    ($name:expr) => {{
        use colored::Colorize;
        eprintln!("{} {}", "[~]".blue().bold(), $name);
    }};
    ($name:expr, $greppable:expr, $accessible:expr) => {{
        use colored::Colorize;
        if !$greppable {
            if $accessible {
                eprintln!("{}", $name);
            } else {
                eprintln!("{} {}", "[~]".blue().bold(), $name);
            }
        }
    }};
}

#[macro_export]
macro_rules! output {
    ($name:expr) => {{
        use colored::Colorize;
        eprintln!("{} {}", "[>]".green().bold(), $name);
    }};
    ($name:expr, $greppable:expr, $accessible:expr) => {{
        use colored::Colorize;
        if !$greppable {
            if $accessible {
                eprintln!("{}", $name);
            } else {
                eprintln!("{} {}", "[>]".green().bold(), $name);
            }
        }
    }};
}

/// How a match is printed on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `a.b.c.d:port`
    Plain,
    /// One JSON object per line.
    Json,
}

#[derive(Debug, Serialize)]
struct MatchRecord {
    address: String,
    port: u16,
    timestamp: DateTime<Utc>,
}

/// The comment line printed before a scan starts.
///
/// ```rust
/// # use hipscan::address::{Address, ScanRange};
/// # use hipscan::input::ScanConfig;
/// # use hipscan::tui::header;
/// let range = ScanRange::new("10.0.0.1".parse().unwrap(), "10.0.0.9".parse().unwrap()).unwrap();
/// let config = ScanConfig::new(range, vec![80, 81]);
/// assert_eq!(header(&config), "# from:10.0.0.1 to:10.0.0.9 threads:255 timeout:5 ports:80,81");
/// ```
pub fn header(config: &ScanConfig) -> String {
    let ports: Vec<String> = config.ports.iter().map(u16::to_string).collect();
    format!(
        "# from:{} to:{} threads:{} timeout:{} ports:{}",
        config.range.start,
        config.range.end,
        config.max_concurrency,
        config.connect_timeout.as_secs(),
        ports.join(",")
    )
}

/// Renders one match for stdout.
pub fn render_match(
    result: &ProbeResult,
    format: OutputFormat,
    timestamp: DateTime<Utc>,
) -> serde_json::Result<String> {
    match format {
        OutputFormat::Plain => Ok(format!("{}:{}", result.address, result.port)),
        OutputFormat::Json => serde_json::to_string(&MatchRecord {
            address: result.address.to_string(),
            port: result.port,
            timestamp,
        }),
    }
}

/// Prints matches until every sender is gone and returns how many were
/// printed.
///
/// Lines go through [`ProgressBar::suspend`] so they never end up in the
/// middle of the progress line.
pub async fn report_matches(
    mut results: UnboundedReceiver<ProbeResult>,
    format: OutputFormat,
    progress: ProgressBar,
) -> usize {
    let mut printed = 0;

    while let Some(result) = results.recv().await {
        if !result.matched {
            continue;
        }
        match render_match(&result, format, Utc::now()) {
            Ok(line) => {
                progress.suspend(|| println!("{line}"));
                printed += 1;
            }
            Err(e) => error!("Cannot render match {}:{}: {e}", result.address, result.port),
        }
    }

    printed
}

/// The `Probing a.b.c.d [n IPs left]` line on stderr.
///
/// Hidden in greppable and accessible mode, and whenever stderr is not a
/// terminal.
pub fn progress_bar(greppable: bool, accessible: bool) -> ProgressBar {
    if greppable || accessible {
        return ProgressBar::hidden();
    }

    let progress = ProgressBar::no_length();
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] Probing {msg} [{pos}/{len}, {eta} left]")
    {
        progress.set_style(style);
    }
    progress.enable_steady_tick(Duration::from_millis(250));
    progress
}
