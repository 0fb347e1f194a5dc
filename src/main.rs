//! dirscope - concurrent directory size scanner with live progress.
//!
//! Usage:
//!   dirscope [PATH]              Scan and print the largest entries
//!   dirscope [PATH] --json       Export the scanned tree as JSON
//!   dirscope [PATH] --largest 20 Also list the 20 largest files
//!   dirscope [PATH] --timeout 10 Cancel the scan after 10 seconds
//!   dirscope --help              Show help

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use clap::Parser;
use color_eyre::eyre::{Context, Result, bail};

use dirscope_scan::{ScanConfig, ScanEvent, ScanProgress, ScanSession, TreeNode};

/// Update the progress line every this many files.
const PROGRESS_EVERY: u64 = 500;

#[derive(Parser)]
#[command(
    name = "dirscope",
    version,
    about = "Concurrent directory size scanner",
    long_about = "dirscope walks a directory tree in parallel, reports progress while \
                  it runs, and prints where the space goes."
)]
struct Cli {
    /// Path to scan (defaults to current directory)
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Maximum depth to display
    #[arg(short, long, default_value = "3")]
    depth: u32,

    /// Show all entries (no depth limit on display)
    #[arg(short, long)]
    all: bool,

    /// Number of top entries to show per directory
    #[arg(short = 'n', long, default_value = "10")]
    top: usize,

    /// Worker threads (0 = auto-detect)
    #[arg(short, long, default_value = "0")]
    threads: usize,

    /// Count files on the worker pool before scanning
    #[arg(long)]
    parallel_count: bool,

    /// Print the tree as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Also list this many of the largest files in the whole tree
    #[arg(long, value_name = "N")]
    largest: Option<usize>,

    /// Show modification times
    #[arg(short, long)]
    long: bool,

    /// Cancel the scan after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = ScanConfig::builder()
        .threads(cli.threads)
        .parallel_count(cli.parallel_count)
        .build()
        .context("Invalid configuration")?;

    let (session, mut events) = ScanSession::new(config).context("Failed to create scan session")?;
    let session = Arc::new(session);

    eprintln!(
        "Scanning {} with {} threads...",
        cli.path.display(),
        session.config().pool_size()
    );
    let Some(run) = session.start(&cli.path).context("Invalid path")? else {
        bail!("A scan is already running");
    };

    if let Some(secs) = cli.timeout {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            // stop() blocks while tasks drain.
            let _ = tokio::task::spawn_blocking(move || session.stop()).await;
        });
    }

    let mut error_count = 0usize;
    let root = loop {
        match events.recv().await {
            Some(ScanEvent::Progress(progress)) => render_progress(&progress),
            Some(ScanEvent::FileFound { .. }) => {}
            Some(ScanEvent::Error(warning)) => {
                error_count += 1;
                eprintln!("\rwarning: {warning}");
            }
            Some(ScanEvent::Finished { run: id, root }) if id == run => break root,
            Some(ScanEvent::Finished { .. }) => {}
            None => bail!("Scan session closed without finishing"),
        }
    };
    eprintln!();

    let Some(root) = root else {
        eprintln!("Scan cancelled");
        return Ok(());
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(root.as_ref())?);
        return Ok(());
    }

    let stats = session.stats();
    println!("{}", "─".repeat(60));
    println!(" {} - {}", root.path().display(), format_size(root.total_size()));
    println!(
        " {} files, {} directories",
        stats.scanned_files,
        root.dir_count()
    );
    println!("{}", "─".repeat(60));
    println!();

    let max_depth = if cli.all { u32::MAX } else { cli.depth };
    print_node(&root, 0, max_depth, cli.top, root.total_size(), cli.long);

    if let Some(n) = cli.largest {
        println!();
        println!("Largest files:");
        for file in root.largest_files(n) {
            println!(
                " {:>10}  {}",
                format_size(file.size()),
                file.path().display()
            );
        }
    }

    if error_count > 0 {
        println!();
        println!("{} warning(s) during scan", error_count);
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "dirscope=debug,dirscope_scan=debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Redraw the single progress line on stderr.
fn render_progress(progress: &ScanProgress) {
    if !progress.is_final() && progress.files_scanned % PROGRESS_EVERY != 0 {
        return;
    }
    eprint!(
        "\r{:>3}%  {} files  {}  {:.0} files/s ",
        progress.display_percent(),
        progress.files_scanned,
        format_size(progress.bytes_scanned),
        progress.files_per_second()
    );
    let _ = std::io::stderr().flush();
}

/// Print a node and its largest children.
fn print_node(
    node: &TreeNode,
    depth: u32,
    max_depth: u32,
    top_n: usize,
    root_size: u64,
    long: bool,
) {
    let indent = "  ".repeat(depth as usize);
    let total = node.total_size();
    let ratio = if root_size > 0 {
        total as f64 / root_size as f64 * 100.0
    } else {
        0.0
    };

    let bar = make_bar(ratio / 100.0, 10);
    let name = if depth == 0 {
        node.path().display().to_string()
    } else {
        node.name().to_string()
    };
    let dir_marker = if node.is_dir() { "/" } else { "" };
    let modified = if long {
        let time: DateTime<Local> = node.modified().into();
        format!("  {}", time.format("%Y-%m-%d %H:%M"))
    } else {
        String::new()
    };

    println!(
        "{}{}{:<40} {:>10} {:>5.1}% {}{}",
        indent,
        if node.is_dir() { "▼ " } else { "  " },
        truncate(&format!("{}{}", name, dir_marker), 40),
        format_size(total),
        ratio,
        bar,
        modified
    );

    if node.is_dir() && depth < max_depth {
        let mut children = node.children();
        children.sort_by_key(|c| std::cmp::Reverse(c.total_size()));
        let remaining = children.len().saturating_sub(top_n);

        for child in children.iter().take(top_n) {
            print_node(child, depth + 1, max_depth, top_n, root_size, long);
        }

        if remaining > 0 {
            let indent = "  ".repeat((depth + 1) as usize);
            println!("{}  ... and {} more", indent, remaining);
        }
    }
}

/// Create a simple ASCII bar.
fn make_bar(ratio: f64, width: usize) -> String {
    let filled = (ratio * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to max length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 1).collect();
        format!("{head}…")
    }
}
